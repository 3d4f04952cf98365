//! Per-document slot → coder resolution.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::registry::{SlotError, SlotRegistry};
use crate::model::{CoderId, Document, DocumentId, RunWarning, SlotIndex, WarningKind};

/// Concrete coder chosen for each slot of one document.
///
/// A slot index is present only if some eligible coder actually produced data
/// for the document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAssignment {
    pub document_id: DocumentId,
    pub slots: BTreeMap<SlotIndex, CoderId>,
}

impl SlotAssignment {
    pub fn new(document_id: DocumentId) -> Self {
        Self {
            document_id,
            slots: BTreeMap::new(),
        }
    }

    pub fn coder_for(&self, slot_index: SlotIndex) -> Option<CoderId> {
        self.slots.get(&slot_index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotIndex, CoderId)> + '_ {
        self.slots.iter().map(|(slot, coder)| (*slot, *coder))
    }

    pub fn assigned_coders(&self) -> BTreeSet<CoderId> {
        self.slots.values().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Pick, for every configured slot, the highest-ranked eligible coder that
/// has at least one annotation on `document`. Slots with no such coder are
/// omitted rather than defaulted to the top-ranked coder.
pub fn assign_for_document(
    document: &Document,
    registry: &SlotRegistry,
) -> Result<SlotAssignment, SlotError> {
    if document.id <= 0 {
        return Err(SlotError::InvalidArgument(format!(
            "document id must be positive, got {}",
            document.id
        )));
    }

    let present = document.coder_ids();
    let mut assignment = SlotAssignment::new(document.id);
    for slot_index in registry.slot_indices() {
        let chosen = registry
            .coders_for_slot(slot_index)
            .iter()
            .find(|candidate| present.contains(&candidate.coder_id));
        if let Some(chosen) = chosen {
            assignment.slots.insert(slot_index, chosen.coder_id);
        }
    }
    debug!(
        document_id = document.id,
        slots = assignment.len(),
        "assigned coders to slots"
    );
    Ok(assignment)
}

/// Outcome of assigning a batch of documents.
#[derive(Debug, Clone, Default)]
pub struct AssignmentBatch {
    pub assignments: BTreeMap<DocumentId, SlotAssignment>,
    /// Coders with data that the registry does not know about at all.
    pub unregistered_coders: BTreeSet<CoderId>,
    pub warnings: Vec<RunWarning>,
}

/// Stateless resolver bound to one registry snapshot.
#[derive(Debug, Clone, Copy)]
pub struct SlotAssigner<'a> {
    registry: &'a SlotRegistry,
}

impl<'a> SlotAssigner<'a> {
    pub fn new(registry: &'a SlotRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &'a SlotRegistry {
        self.registry
    }

    pub fn assign_for_document(&self, document: &Document) -> Result<SlotAssignment, SlotError> {
        assign_for_document(document, self.registry)
    }

    /// Assign every document; invalid or repeated documents become warnings.
    pub fn assign_all(&self, documents: &[Document]) -> AssignmentBatch {
        let mut batch = AssignmentBatch::default();
        for document in documents {
            if batch.assignments.contains_key(&document.id) {
                batch.warnings.push(RunWarning::for_document(
                    WarningKind::DuplicateDocument,
                    document.id,
                    "document listed more than once; later copy ignored",
                ));
                continue;
            }
            let assignment = match self.assign_for_document(document) {
                Ok(assignment) => assignment,
                Err(err) => {
                    batch.warnings.push(RunWarning::new(
                        WarningKind::InvalidDocument,
                        Some(document.id),
                        err.to_string(),
                    ));
                    continue;
                }
            };

            for coder_id in document.coder_ids() {
                if !self.registry.contains_coder(coder_id) && batch.unregistered_coders.insert(coder_id) {
                    batch.warnings.push(RunWarning::for_document(
                        WarningKind::ExcludedCoder,
                        document.id,
                        format!("coder {coder_id} has data but no configured slot"),
                    ));
                }
            }
            batch.assignments.insert(document.id, assignment);
        }
        batch
    }
}
