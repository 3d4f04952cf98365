//! Comparison slots: which coder fills which position.
//!
//! - [`registry`]: configured eligibility (slot → ranked coders)
//! - [`assign`]: per-document resolution to one concrete coder per slot

pub mod assign;
pub mod registry;

pub use assign::{assign_for_document, AssignmentBatch, SlotAssigner, SlotAssignment};
pub use registry::{
    CoderSlot, SlotError, SlotRegistry, DEFAULT_MAX_SLOTS, DEFAULT_RELATION_MAX_SLOTS,
};
