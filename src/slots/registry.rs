//! Coder eligibility per comparison slot.
//!
//! Each slot index holds a priority-ordered list of coders that may fill it.
//! Ordering: priority descending, unset priority below every set priority,
//! then lowest `coder_id` first. The order is fixed at insertion time so
//! repeated reads within a run always agree.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{CoderId, SlotIndex};

/// Slot count for entity (person) comparison rows.
pub const DEFAULT_MAX_SLOTS: SlotIndex = 10;

/// Slot count for relation (tie) comparison rows.
pub const DEFAULT_RELATION_MAX_SLOTS: SlotIndex = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    #[error("slot index {slot_index} outside 1..={max_slots}")]
    InvalidSlotIndex {
        slot_index: SlotIndex,
        max_slots: SlotIndex,
    },
    #[error("invalid coder id: {0}")]
    InvalidCoderId(CoderId),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Binding of one coder to one comparison slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoderSlot {
    pub coder_id: CoderId,
    pub slot_index: SlotIndex,
    #[serde(default)]
    pub priority: Option<i64>,
}

impl CoderSlot {
    /// Ordering used inside a slot's list: `Less` sorts first.
    fn rank_cmp(&self, other: &Self) -> Ordering {
        let by_priority = match (self.priority, other.priority) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_priority.then_with(|| self.coder_id.cmp(&other.coder_id))
    }
}

#[derive(Debug, Clone)]
pub struct SlotRegistry {
    max_slots: SlotIndex,
    by_slot: BTreeMap<SlotIndex, Vec<CoderSlot>>,
    by_coder: BTreeMap<CoderId, BTreeSet<SlotIndex>>,
}

impl Default for SlotRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SLOTS)
    }
}

impl SlotRegistry {
    pub fn new(max_slots: SlotIndex) -> Self {
        Self {
            max_slots,
            by_slot: BTreeMap::new(),
            by_coder: BTreeMap::new(),
        }
    }

    pub fn max_slots(&self) -> SlotIndex {
        self.max_slots
    }

    /// Register `coder_id` as eligible for `slot_index`.
    ///
    /// Re-adding an existing (coder, slot) binding replaces its priority.
    pub fn add_coder(
        &mut self,
        coder_id: CoderId,
        slot_index: SlotIndex,
        priority: Option<i64>,
    ) -> Result<(), SlotError> {
        if coder_id <= 0 {
            return Err(SlotError::InvalidCoderId(coder_id));
        }
        if slot_index == 0 || slot_index > self.max_slots {
            return Err(SlotError::InvalidSlotIndex {
                slot_index,
                max_slots: self.max_slots,
            });
        }

        let entry = CoderSlot {
            coder_id,
            slot_index,
            priority,
        };
        let coders = self.by_slot.entry(slot_index).or_default();
        coders.retain(|existing| existing.coder_id != coder_id);
        let at = coders.partition_point(|existing| existing.rank_cmp(&entry) == Ordering::Less);
        coders.insert(at, entry);

        self.by_coder.entry(coder_id).or_default().insert(slot_index);
        Ok(())
    }

    /// Same as [`add_coder`](Self::add_coder); name kept for configuration code.
    pub fn add_coder_at_slot(
        &mut self,
        coder_id: CoderId,
        slot_index: SlotIndex,
        priority: Option<i64>,
    ) -> Result<(), SlotError> {
        self.add_coder(coder_id, slot_index, priority)
    }

    /// Coders eligible for `slot_index`, best first. Empty for unknown slots.
    pub fn coders_for_slot(&self, slot_index: SlotIndex) -> &[CoderSlot] {
        self.by_slot
            .get(&slot_index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn primary_coder_for_slot(&self, slot_index: SlotIndex) -> Option<&CoderSlot> {
        self.coders_for_slot(slot_index).first()
    }

    /// Slot indices this coder is eligible for.
    pub fn slots_for_coder(&self, coder_id: CoderId) -> impl Iterator<Item = SlotIndex> + '_ {
        self.by_coder
            .get(&coder_id)
            .into_iter()
            .flat_map(|slots| slots.iter().copied())
    }

    pub fn contains_coder(&self, coder_id: CoderId) -> bool {
        self.by_coder.contains_key(&coder_id)
    }

    /// Slot indices with at least one eligible coder, ascending.
    pub fn slot_indices(&self) -> impl Iterator<Item = SlotIndex> + '_ {
        self.by_slot.keys().copied()
    }

    pub fn coder_ids(&self) -> impl Iterator<Item = CoderId> + '_ {
        self.by_coder.keys().copied()
    }

    /// Number of (coder, slot) bindings.
    pub fn len(&self) -> usize {
        self.by_slot.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_slot.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(slots: &[CoderSlot]) -> Vec<CoderId> {
        slots.iter().map(|c| c.coder_id).collect()
    }

    #[test]
    fn rejects_out_of_range_slots_and_bad_coders() {
        let mut registry = SlotRegistry::new(3);
        assert_eq!(
            registry.add_coder(1, 0, None),
            Err(SlotError::InvalidSlotIndex {
                slot_index: 0,
                max_slots: 3
            })
        );
        assert!(matches!(
            registry.add_coder(1, 4, None),
            Err(SlotError::InvalidSlotIndex { slot_index: 4, .. })
        ));
        assert_eq!(registry.add_coder(0, 1, None), Err(SlotError::InvalidCoderId(0)));
        assert_eq!(registry.add_coder(-5, 1, None), Err(SlotError::InvalidCoderId(-5)));
        assert!(registry.is_empty());
    }

    #[test]
    fn orders_by_priority_then_unset_then_coder_id() {
        let mut registry = SlotRegistry::default();
        registry.add_coder(30, 1, None).unwrap();
        registry.add_coder(12, 1, Some(1)).unwrap();
        registry.add_coder(10, 1, Some(5)).unwrap();
        registry.add_coder(11, 1, Some(1)).unwrap();
        registry.add_coder(29, 1, None).unwrap();

        assert_eq!(ids(registry.coders_for_slot(1)), vec![10, 11, 12, 29, 30]);
        assert_eq!(registry.primary_coder_for_slot(1).unwrap().coder_id, 10);
        assert!(registry.primary_coder_for_slot(2).is_none());
    }

    #[test]
    fn re_adding_updates_priority_without_duplicating() {
        let mut registry = SlotRegistry::default();
        registry.add_coder(10, 1, Some(1)).unwrap();
        registry.add_coder(11, 1, Some(2)).unwrap();
        registry.add_coder(10, 1, Some(3)).unwrap();

        assert_eq!(ids(registry.coders_for_slot(1)), vec![10, 11]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn reverse_mapping_tracks_multi_slot_coders() {
        let mut registry = SlotRegistry::default();
        registry.add_coder(7, 1, None).unwrap();
        registry.add_coder(7, 3, None).unwrap();
        registry.add_coder(8, 2, None).unwrap();

        assert_eq!(registry.slots_for_coder(7).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(registry.slots_for_coder(99).count(), 0);
        assert_eq!(registry.slot_indices().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(registry.contains_coder(8));
    }
}
