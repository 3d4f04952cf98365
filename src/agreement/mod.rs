//! Inter-coder agreement over reconciled tables.
//!
//! - [`fields`]: comparison fields, field specs, the [`SlotTable`] row abstraction
//! - [`alpha`]: statistics provider trait, in-process Krippendorff's alpha
//! - [`potter`]: Potter's Pi
//! - [`engine`]: per-slot-pair, per-field agreement
//! - [`disagreement`]: rows flagged for human review

pub mod alpha;
pub mod disagreement;
pub mod engine;
pub mod fields;
pub mod potter;

pub use alpha::{
    bootstrap_alpha_interval, krippendorff_alpha, BootstrapConfig, KrippendorffAlpha,
    StatisticsError, StatisticsProvider,
};
pub use disagreement::{find_disagreements, Disagreement, DisagreementFinder};
pub use engine::{
    multi_slot_potters_pi, AgreementEngine, AgreementError, AgreementReport, AgreementResult,
    ComparisonFailure, ComparisonState, ComparisonStatus, MultiSlotPi,
};
pub use fields::{
    default_field_specs, default_tie_field_specs, ComparisonField, FieldSpec, FieldValue,
    MeasurementLevel, SlotTable, DEFAULT_DISAGREEMENT_FIELDS, OPTIONAL_DISAGREEMENT_FIELDS,
};
pub use potter::{potters_pi, potters_pi_for_units};
