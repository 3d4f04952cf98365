//! Reconciliation of per-coder findings into fixed-width comparison rows.
//!
//! - [`entity`]: one row per (document, entity, role) with a block per slot
//! - [`network`]: author → quoted-entity ties per slot, shared neighbors, tie rows

pub mod entity;
pub mod network;

pub use entity::{
    organization_hash, EntityReconciler, ReconcileError, ReconcileOptions, ReconciledEntityRow,
    Reconciliation, RoleTypeCodes, RowKey, SlotBlock, UNKNOWN_ROLE_TYPE_CODE,
};
pub use network::{
    relation_edges, EntityNetworkSummary, NetworkError, ReconciledTieRow, RelationEdge,
    RelationNetworkAggregator, SharedNeighborInfo, TieSlotBlock,
};
