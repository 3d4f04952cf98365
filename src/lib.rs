#![forbid(unsafe_code)]

//! # reliability-harness
//!
//! Inter-coder reliability for content-analysis coding.
//!
//! Several coders independently annotate the same documents: who wrote it,
//! who is mentioned, in what role, where they are first quoted. This crate
//! lines those codings up into fixed-width comparison tables (one block per
//! "coder slot") and measures how well the slots agree:
//!
//! 1. a [`SlotRegistry`] says which coders may fill which slot, in priority order
//! 2. the [`SlotAssigner`] picks one coder per slot for each document
//! 3. the [`EntityReconciler`] emits one zero-filled row per (document, entity, role)
//! 4. the [`RelationNetworkAggregator`] builds per-slot author → source networks
//! 5. the [`AgreementEngine`] computes percent agreement, Krippendorff's alpha,
//!    and Potter's Pi for every slot pair and field
//! 6. the [`DisagreementFinder`] flags rows for human review
//!
//! [`pipeline::run_analysis`] runs the whole chain against a [`DocumentStore`].

pub mod agreement;
pub mod config;
pub mod export;
pub mod model;
pub mod pipeline;
pub mod reconcile;
pub mod slots;
pub mod store;

pub use agreement::{
    AgreementEngine, AgreementError, AgreementResult, ComparisonField, DisagreementFinder,
    FieldSpec, KrippendorffAlpha, MeasurementLevel, StatisticsError, StatisticsProvider,
};
pub use config::{AnalysisConfig, ConfigError};
pub use model::{
    Annotation, CoderId, Document, DocumentId, EntityId, QuotePosition, RoleHint, RunWarning,
    SlotIndex, WarningKind,
};
pub use pipeline::{run_analysis, run_on_documents, PipelineError, RunMetadata, RunReport};
pub use reconcile::{
    EntityReconciler, NetworkError, ReconciledEntityRow, ReconciledTieRow,
    RelationNetworkAggregator, SlotBlock,
};
pub use slots::{CoderSlot, SlotAssigner, SlotAssignment, SlotError, SlotRegistry};
pub use store::{DocumentStore, InMemoryDocumentStore, SqliteDocumentStore, StoreError};
