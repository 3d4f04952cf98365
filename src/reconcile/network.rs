//! Relation network aggregation across documents, per slot index.
//!
//! Edges run from an author to each entity the author quoted (a subject whose
//! role type is one of the configured neighbor role types). The aggregator is
//! an explicit accumulator: feed it every document, call
//! [`RelationNetworkAggregator::finalize`], then query. Shared-neighbor data
//! needs the complete neighbor → linkers map, so every derived accessor
//! refuses to answer before finalization.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::{CoderId, Document, DocumentId, EntityId, RoleHint, SlotIndex};
use crate::slots::{SlotAssignment, DEFAULT_RELATION_MAX_SLOTS};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("relation network has not been finalized")]
    NotFinalized,
    #[error("relation network is finalized; no more documents can be added")]
    AlreadyFinalized,
}

/// Directed author → neighbor link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationEdge {
    pub author_id: EntityId,
    pub neighbor_id: EntityId,
}

/// Edges one coder recorded in one document. Self-links are dropped.
pub fn relation_edges(
    document: &Document,
    coder_id: CoderId,
    neighbor_role_types: &BTreeSet<String>,
) -> BTreeSet<RelationEdge> {
    let mut authors = BTreeSet::new();
    let mut neighbors = BTreeSet::new();
    for annotation in document.annotations_from(coder_id) {
        let Some(entity_id) = annotation.resolved_entity() else {
            continue;
        };
        match annotation.role_hint {
            RoleHint::Author => {
                authors.insert(entity_id);
            }
            RoleHint::Subject if neighbor_role_types.contains(annotation.role_type.trim()) => {
                neighbors.insert(entity_id);
            }
            RoleHint::Subject => {}
        }
    }

    let mut edges = BTreeSet::new();
    for &author_id in &authors {
        for &neighbor_id in &neighbors {
            if author_id != neighbor_id {
                edges.insert(RelationEdge {
                    author_id,
                    neighbor_id,
                });
            }
        }
    }
    edges
}

/// Entities this entity shares neighbors with, within one slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedNeighborInfo {
    pub entity_id: EntityId,
    /// neighbor id → the *other* entities linked to that neighbor.
    pub shared_neighbors: BTreeMap<EntityId, BTreeSet<EntityId>>,
}

impl SharedNeighborInfo {
    pub fn related_entities(&self) -> BTreeSet<EntityId> {
        self.shared_neighbors.values().flatten().copied().collect()
    }

    pub fn shared_neighbor_count(&self) -> usize {
        self.shared_neighbors.len()
    }
}

/// Per-entity counts for one slot, derived after finalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityNetworkSummary {
    pub slot_index: SlotIndex,
    pub entity_id: EntityId,
    /// Distinct entities this entity links to.
    pub neighbor_count: usize,
    /// Distinct entities linking to this entity.
    pub linker_count: usize,
    pub shared_neighbor_count: usize,
    pub related_entity_count: usize,
    /// Documents in which the entity took part in at least one edge.
    pub document_count: usize,
}

/// Per-slot block of a tie comparison row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieSlotBlock {
    pub detected: u8,
    /// Other entities linked to the same neighbor in this slot (0 when absent).
    pub shared_count: i64,
}

/// Wide comparison row for one (document, author, neighbor) tie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledTieRow {
    pub document_id: DocumentId,
    pub author_id: EntityId,
    pub neighbor_id: EntityId,
    pub slots: Vec<TieSlotBlock>,
}

impl ReconciledTieRow {
    pub fn slot(&self, slot_index: SlotIndex) -> Option<&TieSlotBlock> {
        slot_index.checked_sub(1).and_then(|i| self.slots.get(i))
    }
}

#[derive(Debug, Clone, Default)]
struct SlotNetwork {
    neighbors: BTreeMap<EntityId, BTreeSet<EntityId>>,
    linkers: BTreeMap<EntityId, BTreeSet<EntityId>>,
    documents: BTreeMap<EntityId, BTreeSet<DocumentId>>,
    ties: BTreeSet<(DocumentId, RelationEdge)>,
    shared: BTreeMap<EntityId, SharedNeighborInfo>,
}

impl SlotNetwork {
    fn add_edge(&mut self, document_id: DocumentId, edge: RelationEdge) -> bool {
        let added = self
            .neighbors
            .entry(edge.author_id)
            .or_default()
            .insert(edge.neighbor_id);
        self.linkers
            .entry(edge.neighbor_id)
            .or_default()
            .insert(edge.author_id);
        for entity_id in [edge.author_id, edge.neighbor_id] {
            self.documents.entry(entity_id).or_default().insert(document_id);
        }
        self.ties.insert((document_id, edge));
        added
    }

    fn compute_shared(&mut self) {
        self.shared.clear();
        for (&neighbor_id, linkers) in &self.linkers {
            if linkers.len() < 2 {
                continue;
            }
            for &entity_id in linkers {
                let others: BTreeSet<EntityId> =
                    linkers.iter().copied().filter(|other| *other != entity_id).collect();
                self.shared
                    .entry(entity_id)
                    .or_insert_with(|| SharedNeighborInfo {
                        entity_id,
                        ..SharedNeighborInfo::default()
                    })
                    .shared_neighbors
                    .insert(neighbor_id, others);
            }
        }
    }

    fn entity_ids(&self) -> BTreeSet<EntityId> {
        self.neighbors
            .keys()
            .chain(self.linkers.keys())
            .copied()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NetworkState {
    Building,
    Finalized,
}

pub struct RelationNetworkAggregator {
    max_slots: SlotIndex,
    neighbor_role_types: BTreeSet<String>,
    slots: BTreeMap<SlotIndex, SlotNetwork>,
    documents_seen: BTreeSet<DocumentId>,
    state: NetworkState,
}

impl Default for RelationNetworkAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_RELATION_MAX_SLOTS, ["source".to_string()])
    }
}

impl RelationNetworkAggregator {
    pub fn new(max_slots: SlotIndex, neighbor_role_types: impl IntoIterator<Item = String>) -> Self {
        Self {
            max_slots,
            neighbor_role_types: neighbor_role_types.into_iter().collect(),
            slots: BTreeMap::new(),
            documents_seen: BTreeSet::new(),
            state: NetworkState::Building,
        }
    }

    pub fn max_slots(&self) -> SlotIndex {
        self.max_slots
    }

    pub fn is_finalized(&self) -> bool {
        self.state == NetworkState::Finalized
    }

    /// Add every edge the assigned coders recorded in `document`. Returns the
    /// number of (slot, author, neighbor) links that were new.
    pub fn process_document(
        &mut self,
        document: &Document,
        assignment: &SlotAssignment,
    ) -> Result<usize, NetworkError> {
        if self.is_finalized() {
            return Err(NetworkError::AlreadyFinalized);
        }
        self.documents_seen.insert(document.id);

        let mut added = 0;
        for (slot_index, coder_id) in assignment.iter() {
            if slot_index == 0 || slot_index > self.max_slots {
                // Entity rows may be wider than tie rows; those slots just
                // do not take part in the network.
                debug!(document_id = document.id, slot_index, "slot outside relation width");
                continue;
            }
            let edges = relation_edges(document, coder_id, &self.neighbor_role_types);
            let network = self.slots.entry(slot_index).or_default();
            for edge in edges {
                if network.add_edge(document.id, edge) {
                    added += 1;
                }
            }
        }
        Ok(added)
    }

    /// Compute shared-neighbor structures. Call after the last document.
    /// Calling it again is a no-op.
    pub fn finalize(&mut self) {
        if self.is_finalized() {
            return;
        }
        for (slot_index, network) in &mut self.slots {
            network.compute_shared();
            debug!(
                slot_index = *slot_index,
                entities = network.entity_ids().len(),
                shared = network.shared.len(),
                "relation network finalized"
            );
        }
        self.state = NetworkState::Finalized;
    }

    fn require_finalized(&self) -> Result<(), NetworkError> {
        if self.is_finalized() {
            Ok(())
        } else {
            Err(NetworkError::NotFinalized)
        }
    }

    pub fn document_count(&self) -> usize {
        self.documents_seen.len()
    }

    pub fn slot_indices(&self) -> impl Iterator<Item = SlotIndex> + '_ {
        self.slots.keys().copied()
    }

    pub fn neighbors(&self, slot_index: SlotIndex, entity_id: EntityId) -> Result<BTreeSet<EntityId>, NetworkError> {
        self.require_finalized()?;
        Ok(self
            .slots
            .get(&slot_index)
            .and_then(|network| network.neighbors.get(&entity_id))
            .cloned()
            .unwrap_or_default())
    }

    pub fn shared_neighbors(
        &self,
        slot_index: SlotIndex,
        entity_id: EntityId,
    ) -> Result<Option<&SharedNeighborInfo>, NetworkError> {
        self.require_finalized()?;
        Ok(self
            .slots
            .get(&slot_index)
            .and_then(|network| network.shared.get(&entity_id)))
    }

    /// Entities sharing at least one neighbor with `entity_id` in `slot_index`.
    pub fn related_entities(
        &self,
        slot_index: SlotIndex,
        entity_id: EntityId,
    ) -> Result<BTreeSet<EntityId>, NetworkError> {
        Ok(self
            .shared_neighbors(slot_index, entity_id)?
            .map(SharedNeighborInfo::related_entities)
            .unwrap_or_default())
    }

    /// Per-slot, per-entity counts, entities ascending.
    pub fn summarize(&self) -> Result<BTreeMap<SlotIndex, Vec<EntityNetworkSummary>>, NetworkError> {
        self.require_finalized()?;
        let mut out = BTreeMap::new();
        for (&slot_index, network) in &self.slots {
            let summaries = network
                .entity_ids()
                .into_iter()
                .map(|entity_id| {
                    let shared = network.shared.get(&entity_id);
                    EntityNetworkSummary {
                        slot_index,
                        entity_id,
                        neighbor_count: network.neighbors.get(&entity_id).map_or(0, BTreeSet::len),
                        linker_count: network.linkers.get(&entity_id).map_or(0, BTreeSet::len),
                        shared_neighbor_count: shared.map_or(0, SharedNeighborInfo::shared_neighbor_count),
                        related_entity_count: shared.map_or(0, |s| s.related_entities().len()),
                        document_count: network.documents.get(&entity_id).map_or(0, BTreeSet::len),
                    }
                })
                .collect();
            out.insert(slot_index, summaries);
        }
        Ok(out)
    }

    /// One zero-filled row per tie any slot observed, ordered by document,
    /// author, neighbor.
    pub fn tie_rows(&self) -> Result<Vec<ReconciledTieRow>, NetworkError> {
        self.require_finalized()?;
        let mut keys: BTreeSet<(DocumentId, RelationEdge)> = BTreeSet::new();
        for network in self.slots.values() {
            keys.extend(network.ties.iter().copied());
        }

        let rows = keys
            .into_iter()
            .map(|(document_id, edge)| {
                let slots = (1..=self.max_slots)
                    .map(|slot_index| match self.slots.get(&slot_index) {
                        Some(network) if network.ties.contains(&(document_id, edge)) => {
                            let linkers = network.linkers.get(&edge.neighbor_id).map_or(0, BTreeSet::len);
                            TieSlotBlock {
                                detected: 1,
                                shared_count: linkers.saturating_sub(1) as i64,
                            }
                        }
                        _ => TieSlotBlock::default(),
                    })
                    .collect();
                ReconciledTieRow {
                    document_id,
                    author_id: edge.author_id,
                    neighbor_id: edge.neighbor_id,
                    slots,
                }
            })
            .collect();
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Annotation;

    fn assignment(document_id: DocumentId, slots: &[(SlotIndex, CoderId)]) -> SlotAssignment {
        SlotAssignment {
            document_id,
            slots: slots.iter().copied().collect(),
        }
    }

    fn sources() -> BTreeSet<String> {
        BTreeSet::from(["source".to_string()])
    }

    #[test]
    fn edges_join_authors_to_quoted_subjects_only() {
        let doc = Document::new(1)
            .with_annotation(Annotation::author(10, 1))
            .with_annotation(Annotation::subject(10, 2, "source"))
            .with_annotation(Annotation::subject(10, 3, "subject"))
            .with_annotation(Annotation::subject(10, 1, "source"))
            .with_annotation(Annotation::subject(11, 4, "source"));
        let edges: Vec<_> = relation_edges(&doc, 10, &sources()).into_iter().collect();
        assert_eq!(
            edges,
            vec![RelationEdge {
                author_id: 1,
                neighbor_id: 2
            }]
        );
    }

    #[test]
    fn accessors_require_finalize() {
        let agg = RelationNetworkAggregator::default();
        assert_eq!(agg.summarize().unwrap_err(), NetworkError::NotFinalized);
        assert_eq!(agg.related_entities(1, 1).unwrap_err(), NetworkError::NotFinalized);
        assert_eq!(agg.tie_rows().unwrap_err(), NetworkError::NotFinalized);
        assert_eq!(agg.neighbors(1, 1).unwrap_err(), NetworkError::NotFinalized);
    }

    #[test]
    fn no_documents_after_finalize() {
        let mut agg = RelationNetworkAggregator::default();
        agg.finalize();
        let err = agg
            .process_document(&Document::new(1), &assignment(1, &[]))
            .unwrap_err();
        assert_eq!(err, NetworkError::AlreadyFinalized);
    }

    #[test]
    fn adding_the_same_edge_twice_is_idempotent() {
        let doc = Document::new(1)
            .with_annotation(Annotation::author(10, 1))
            .with_annotation(Annotation::subject(10, 2, "source"));
        let mut agg = RelationNetworkAggregator::default();
        assert_eq!(agg.process_document(&doc, &assignment(1, &[(1, 10)])).unwrap(), 1);
        assert_eq!(agg.process_document(&doc, &assignment(1, &[(1, 10)])).unwrap(), 0);
        agg.finalize();
        let summary = agg.summarize().unwrap();
        let author = summary[&1].iter().find(|s| s.entity_id == 1).unwrap();
        assert_eq!(author.neighbor_count, 1);
        assert_eq!(author.document_count, 1);
    }

    #[test]
    fn shared_neighbors_are_symmetric_and_slot_local() {
        let doc_a = Document::new(1)
            .with_annotation(Annotation::author(10, 1))
            .with_annotation(Annotation::subject(10, 9, "source"))
            .with_annotation(Annotation::author(20, 3))
            .with_annotation(Annotation::subject(20, 9, "source"));
        let doc_b = Document::new(2)
            .with_annotation(Annotation::author(10, 2))
            .with_annotation(Annotation::subject(10, 9, "source"));

        let mut agg = RelationNetworkAggregator::default();
        agg.process_document(&doc_a, &assignment(1, &[(1, 10), (2, 20)])).unwrap();
        agg.process_document(&doc_b, &assignment(2, &[(1, 10)])).unwrap();
        agg.finalize();
        agg.finalize();

        assert_eq!(agg.related_entities(1, 1).unwrap(), BTreeSet::from([2]));
        assert_eq!(agg.related_entities(1, 2).unwrap(), BTreeSet::from([1]));
        // Author 3 links to neighbor 9 only in slot 2.
        assert!(agg.related_entities(1, 3).unwrap().is_empty());
        assert!(agg.related_entities(2, 3).unwrap().is_empty());

        let info = agg.shared_neighbors(1, 1).unwrap().unwrap();
        assert_eq!(info.shared_neighbors[&9], BTreeSet::from([2]));
        assert_eq!(agg.summarize().unwrap(), agg.summarize().unwrap());
    }

    #[test]
    fn tie_rows_are_zero_filled_across_relation_slots() {
        let doc = Document::new(1)
            .with_annotation(Annotation::author(10, 1))
            .with_annotation(Annotation::subject(10, 9, "source"))
            .with_annotation(Annotation::author(30, 1))
            .with_annotation(Annotation::subject(30, 9, "source"))
            .with_annotation(Annotation::subject(30, 8, "source"));
        let mut agg = RelationNetworkAggregator::default();
        agg.process_document(&doc, &assignment(1, &[(1, 10), (3, 30), (5, 50)]))
            .unwrap();
        agg.finalize();

        let rows = agg.tie_rows().unwrap();
        assert_eq!(rows.len(), 2);
        let tie_9 = rows.iter().find(|r| r.neighbor_id == 9).unwrap();
        assert_eq!(tie_9.slots.len(), 3);
        assert_eq!(tie_9.slot(1).unwrap().detected, 1);
        assert_eq!(tie_9.slot(2).unwrap(), &TieSlotBlock::default());
        assert_eq!(tie_9.slot(3).unwrap().detected, 1);
        let tie_8 = rows.iter().find(|r| r.neighbor_id == 8).unwrap();
        assert_eq!(tie_8.slot(1).unwrap().detected, 0);
        assert_eq!(tie_8.slot(3).unwrap().shared_count, 0);
    }
}
