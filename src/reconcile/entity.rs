//! Entity reconciliation: merge every slot's findings about a person into one
//! fixed-width comparison row.
//!
//! Rows are keyed by (document, entity, role hint). Each row carries exactly
//! `max_slots` blocks; a slot with no finding for the entity gets the
//! zero block (`detected = 0`, ids 0, codes 0, empty text) rather than a gap.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{
    Annotation, CoderId, Document, DocumentId, EntityId, RoleHint, RunWarning, SlotIndex,
    WarningKind,
};
use crate::slots::{SlotAssignment, DEFAULT_MAX_SLOTS};

/// Number of hex characters kept from the organization content hash.
const ORGANIZATION_HASH_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("document {document_id}: coder {coder_id} annotation has no linkable entity")]
    IdentityUnresolved {
        document_id: DocumentId,
        coder_id: CoderId,
    },
    #[error("document {document_id}: slot {slot_index} exceeds the {max_slots}-slot row width")]
    SlotOutOfRange {
        document_id: DocumentId,
        slot_index: SlotIndex,
        max_slots: SlotIndex,
    },
}

// =============================================================================
// Role type codes
// =============================================================================

/// Code for a detected annotation whose role type has no configured code.
pub const UNKNOWN_ROLE_TYPE_CODE: i64 = -1;

/// Integer encoding for categorical role types. Code 0 is reserved for
/// "not detected"; unknown role types encode to [`UNKNOWN_ROLE_TYPE_CODE`]
/// and raise a warning. Configured codes must be positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleTypeCodes(BTreeMap<String, i64>);

impl Default for RoleTypeCodes {
    fn default() -> Self {
        Self(BTreeMap::from([
            ("author".to_string(), 1),
            ("subject".to_string(), 2),
            ("source".to_string(), 3),
        ]))
    }
}

impl RoleTypeCodes {
    pub fn new(codes: impl IntoIterator<Item = (String, i64)>) -> Self {
        Self(codes.into_iter().collect())
    }

    pub fn code_for(&self, role_type: &str) -> Option<i64> {
        self.0.get(role_type.trim()).copied()
    }

    /// Distinct codes including the reserved "not detected" and unknown codes.
    pub fn value_count(&self) -> usize {
        let mut codes: BTreeSet<i64> = self.0.values().copied().collect();
        codes.insert(0);
        codes.insert(UNKNOWN_ROLE_TYPE_CODE);
        codes.len()
    }

    /// Role types mapped to a non-positive code, which would collide with
    /// the reserved codes.
    pub fn reserved_collisions(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(_, code)| **code <= 0)
            .map(|(role_type, _)| role_type.as_str())
            .collect()
    }
}

/// Stable content hash of a free-text organization field. Blank text hashes
/// to the empty token so it compares equal to a zero-filled slot.
pub fn organization_hash(text: &str) -> String {
    let normalized = text.trim().to_lowercase();
    if normalized.is_empty() {
        return String::new();
    }
    let hex = blake3::hash(normalized.as_bytes()).to_hex();
    hex.as_str()[..ORGANIZATION_HASH_LEN].to_string()
}

// =============================================================================
// Rows
// =============================================================================

/// One slot's view of one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotBlock {
    /// 1 if the slot's coder found the entity, else 0.
    pub detected: u8,
    /// Coder that filled this slot for the document (0 when absent).
    pub coder_id: CoderId,
    /// Entity id as the coder linked it (0 when absent).
    pub entity_id_as_coded: EntityId,
    pub role_type: String,
    pub role_type_code: i64,
    pub first_quote_graf: i64,
    pub first_quote_index: i64,
    pub organization_hash: String,
}

impl SlotBlock {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_detected(&self) -> bool {
        self.detected == 1
    }

    fn from_annotation(
        coder_id: CoderId,
        entity_id: EntityId,
        annotation: &Annotation,
        role_type_code: i64,
    ) -> Self {
        let quote = annotation.quote_position.unwrap_or_default();
        Self {
            detected: 1,
            coder_id,
            entity_id_as_coded: entity_id,
            role_type: annotation.role_type.trim().to_string(),
            role_type_code,
            first_quote_graf: quote.paragraph,
            first_quote_index: quote.index,
            organization_hash: annotation
                .organization_text
                .as_deref()
                .map(organization_hash)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey {
    pub document_id: DocumentId,
    pub role_hint: RoleHint,
    pub entity_id: EntityId,
}

/// Wide comparison row: one entity in one role in one document, with one
/// block per slot index (index 0 of `slots` is slot 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledEntityRow {
    pub document_id: DocumentId,
    pub entity_id: EntityId,
    pub entity_display_name: String,
    pub entity_role_hint: RoleHint,
    pub slots: Vec<SlotBlock>,
}

impl ReconciledEntityRow {
    pub fn key(&self) -> RowKey {
        RowKey {
            document_id: self.document_id,
            role_hint: self.entity_role_hint,
            entity_id: self.entity_id,
        }
    }

    pub fn slot(&self, slot_index: SlotIndex) -> Option<&SlotBlock> {
        slot_index
            .checked_sub(1)
            .and_then(|offset| self.slots.get(offset))
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn detected_count(&self) -> usize {
        self.slots.iter().filter(|block| block.is_detected()).count()
    }
}

/// Row under construction: `None` marks a slot not written yet.
struct RowBuilder {
    display_name: String,
    slots: Vec<Option<SlotBlock>>,
}

impl RowBuilder {
    fn new(max_slots: SlotIndex) -> Self {
        Self {
            display_name: String::new(),
            slots: vec![None; max_slots],
        }
    }

    fn note_name(&mut self, name: Option<&str>) {
        if self.display_name.is_empty() {
            if let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) {
                self.display_name = name.to_string();
            }
        }
    }

    fn finish(self, key: RowKey) -> ReconciledEntityRow {
        ReconciledEntityRow {
            document_id: key.document_id,
            entity_id: key.entity_id,
            entity_display_name: self.display_name,
            entity_role_hint: key.role_hint,
            slots: self
                .slots
                .into_iter()
                .map(|block| block.unwrap_or_else(SlotBlock::zero))
                .collect(),
        }
    }
}

// =============================================================================
// Reconciler
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileOptions {
    pub max_slots: SlotIndex,
    /// Also emit rows for entities only unassigned coders reported, so the
    /// table records which slots missed them.
    pub include_undetected: bool,
    pub role_type_codes: RoleTypeCodes,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            max_slots: DEFAULT_MAX_SLOTS,
            include_undetected: false,
            role_type_codes: RoleTypeCodes::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub rows: Vec<ReconciledEntityRow>,
    pub warnings: Vec<RunWarning>,
}

#[derive(Debug, Clone, Default)]
pub struct EntityReconciler {
    options: ReconcileOptions,
}

impl EntityReconciler {
    pub fn new(options: ReconcileOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Reconcile a batch. Rows come back ordered by document, role, entity.
    ///
    /// Documents without an entry in `assignments` are treated as having no
    /// assigned slots. A repeated document id is reconciled once.
    pub fn reconcile(
        &self,
        documents: &[Document],
        assignments: &BTreeMap<DocumentId, SlotAssignment>,
    ) -> Reconciliation {
        let mut out = Reconciliation::default();
        let mut seen = BTreeSet::new();
        for document in documents {
            if !seen.insert(document.id) {
                continue;
            }
            let empty = SlotAssignment::new(document.id);
            let assignment = assignments.get(&document.id).unwrap_or(&empty);
            let (rows, warnings) = self.reconcile_document(document, assignment);
            out.rows.extend(rows);
            out.warnings.extend(warnings);
        }
        out.rows.sort_by_key(ReconciledEntityRow::key);
        debug!(rows = out.rows.len(), "entity reconciliation finished");
        out
    }

    /// Rows for one document plus any local warnings.
    pub fn reconcile_document(
        &self,
        document: &Document,
        assignment: &SlotAssignment,
    ) -> (Vec<ReconciledEntityRow>, Vec<RunWarning>) {
        let max_slots = self.options.max_slots;
        let mut builders: BTreeMap<RowKey, RowBuilder> = BTreeMap::new();
        let mut warnings = Vec::new();

        for (slot_index, coder_id) in assignment.iter() {
            if slot_index == 0 || slot_index > max_slots {
                let err = ReconcileError::SlotOutOfRange {
                    document_id: document.id,
                    slot_index,
                    max_slots,
                };
                warn!("{err}");
                warnings.push(RunWarning::for_document(
                    WarningKind::SlotOutOfRange,
                    document.id,
                    err.to_string(),
                ));
                continue;
            }

            for annotation in document.annotations_from(coder_id) {
                let Some(entity_id) = annotation.resolved_entity() else {
                    let err = ReconcileError::IdentityUnresolved {
                        document_id: document.id,
                        coder_id,
                    };
                    warn!("{err}");
                    warnings.push(RunWarning::for_document(
                        WarningKind::IdentityUnresolved,
                        document.id,
                        err.to_string(),
                    ));
                    continue;
                };
                let key = RowKey {
                    document_id: document.id,
                    role_hint: annotation.role_hint,
                    entity_id,
                };
                let builder = builders
                    .entry(key)
                    .or_insert_with(|| RowBuilder::new(max_slots));
                builder.note_name(annotation.entity_name.as_deref());

                let block = &mut builder.slots[slot_index - 1];
                if block.is_some() {
                    warnings.push(RunWarning::for_document(
                        WarningKind::DuplicateAnnotation,
                        document.id,
                        format!(
                            "coder {coder_id} annotated entity {entity_id} as {} more than once; first kept",
                            annotation.role_hint
                        ),
                    ));
                    continue;
                }

                let code = match self.options.role_type_codes.code_for(&annotation.role_type) {
                    Some(code) => code,
                    None => {
                        warnings.push(RunWarning::for_document(
                            WarningKind::UnknownRoleType,
                            document.id,
                            format!(
                                "unknown role type {:?}; encoded as {UNKNOWN_ROLE_TYPE_CODE}",
                                annotation.role_type
                            ),
                        ));
                        UNKNOWN_ROLE_TYPE_CODE
                    }
                };
                *block = Some(SlotBlock::from_annotation(coder_id, entity_id, annotation, code));
            }
        }

        if self.options.include_undetected {
            let assigned = assignment.assigned_coders();
            let others = document
                .annotations_by_coder()
                .iter()
                .filter(|a| !assigned.contains(&a.coder_id));
            for annotation in others {
                let Some(entity_id) = annotation.resolved_entity() else {
                    continue;
                };
                let key = RowKey {
                    document_id: document.id,
                    role_hint: annotation.role_hint,
                    entity_id,
                };
                builders
                    .entry(key)
                    .or_insert_with(|| RowBuilder::new(max_slots))
                    .note_name(annotation.entity_name.as_deref());
            }
        }

        let rows = builders
            .into_iter()
            .map(|(key, builder)| builder.finish(key))
            .collect();
        (rows, warnings)
    }
}
