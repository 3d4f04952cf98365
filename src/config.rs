//! Analysis configuration, loaded from a JSON file.
//!
//! Every field has a default, so `{}` is a valid (if coder-less) config:
//!
//! ```json
//! {
//!   "tags": ["wave_1"],
//!   "coders": [
//!     {"coder_id": 10, "slot_index": 1, "priority": 2},
//!     {"coder_id": 11, "slot_index": 1, "priority": 1},
//!     {"coder_id": 20, "slot_index": 2}
//!   ],
//!   "bootstrap": {"iterations": 500, "seed": 7, "confidence": 0.9}
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::agreement::{
    default_field_specs, default_tie_field_specs, BootstrapConfig, ComparisonField, FieldSpec,
    DEFAULT_DISAGREEMENT_FIELDS,
};
use crate::reconcile::{ReconcileOptions, RoleTypeCodes};
use crate::slots::{CoderSlot, SlotError, SlotRegistry, DEFAULT_MAX_SLOTS, DEFAULT_RELATION_MAX_SLOTS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("invalid coder binding: {0}")]
    Slot(#[from] SlotError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub max_slots: usize,
    pub relation_max_slots: usize,
    /// Documents carrying any of these tags are analyzed; empty means all.
    pub tags: Vec<String>,
    pub coders: Vec<CoderSlot>,
    /// Entity-row comparisons; `None` uses the default set.
    pub fields: Option<Vec<FieldSpec>>,
    /// Tie-row comparisons; `None` uses the default set.
    pub tie_fields: Option<Vec<FieldSpec>>,
    /// Fields checked by the disagreement report; `None` uses the default set.
    pub disagreement_fields: Option<Vec<ComparisonField>>,
    pub include_undetected: bool,
    pub include_optional_fields: bool,
    pub role_type_codes: RoleTypeCodes,
    pub neighbor_role_types: Vec<String>,
    pub provider_timeout_ms: Option<u64>,
    pub bootstrap: Option<BootstrapConfig>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_slots: DEFAULT_MAX_SLOTS,
            relation_max_slots: DEFAULT_RELATION_MAX_SLOTS,
            tags: Vec::new(),
            coders: Vec::new(),
            fields: None,
            tie_fields: None,
            disagreement_fields: None,
            include_undetected: false,
            include_optional_fields: false,
            role_type_codes: RoleTypeCodes::default(),
            neighbor_role_types: vec!["source".to_string()],
            provider_timeout_ms: None,
            bootstrap: None,
        }
    }
}

impl AnalysisConfig {
    /// Read, parse, and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_slots == 0 {
            return Err(ConfigError::Invalid("max_slots must be at least 1".to_string()));
        }
        if self.relation_max_slots > self.max_slots {
            return Err(ConfigError::Invalid(format!(
                "relation_max_slots ({}) exceeds max_slots ({})",
                self.relation_max_slots, self.max_slots
            )));
        }
        let collisions = self.role_type_codes.reserved_collisions();
        if !collisions.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "role_type_codes must be positive; reserved codes used by {collisions:?}"
            )));
        }
        if self.neighbor_role_types.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "neighbor_role_types entries must be non-empty".to_string(),
            ));
        }
        if let Some(bootstrap) = &self.bootstrap {
            if !(bootstrap.confidence > 0.0 && bootstrap.confidence < 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "bootstrap confidence must be in (0, 1), got {}",
                    bootstrap.confidence
                )));
            }
        }
        for spec in self.field_specs().iter().chain(self.tie_field_specs().iter()) {
            if spec.chance_correction && spec.value_count.map_or(true, |n| n < 2) {
                return Err(ConfigError::Invalid(format!(
                    "field {} requests chance correction without a value_count >= 2",
                    spec.name()
                )));
            }
        }
        let (_, rejected) = self.registry()?;
        for coder in &rejected {
            warn!(
                coder_id = coder.coder_id,
                slot_index = coder.slot_index,
                max_slots = self.max_slots,
                "coder binding outside the row width; coder will be excluded"
            );
        }
        Ok(())
    }

    /// Slot registry built from `coders`, plus the bindings whose slot index
    /// falls outside `1..=max_slots`. Those are left out of the registry; a
    /// non-positive coder id is still an error.
    pub fn registry(&self) -> Result<(SlotRegistry, Vec<CoderSlot>), ConfigError> {
        let mut registry = SlotRegistry::new(self.max_slots);
        let mut rejected = Vec::new();
        for coder in &self.coders {
            match registry.add_coder(coder.coder_id, coder.slot_index, coder.priority) {
                Ok(()) => {}
                Err(SlotError::InvalidSlotIndex { .. }) => rejected.push(*coder),
                Err(err) => return Err(err.into()),
            }
        }
        Ok((registry, rejected))
    }

    /// Highest in-range configured slot index; comparisons run over `1..=` this.
    pub fn slot_count(&self) -> usize {
        self.coders
            .iter()
            .map(|coder| coder.slot_index)
            .filter(|slot_index| *slot_index <= self.max_slots)
            .max()
            .unwrap_or(0)
    }

    pub fn relation_slot_count(&self) -> usize {
        self.slot_count().min(self.relation_max_slots)
    }

    pub fn field_specs(&self) -> Vec<FieldSpec> {
        match &self.fields {
            Some(fields) => fields.clone(),
            None => default_field_specs(self.role_type_codes.value_count()),
        }
    }

    pub fn tie_field_specs(&self) -> Vec<FieldSpec> {
        match &self.tie_fields {
            Some(fields) => fields.clone(),
            None => default_tie_field_specs(),
        }
    }

    pub fn disagreement_fields(&self) -> Vec<ComparisonField> {
        match &self.disagreement_fields {
            Some(fields) => fields.clone(),
            None => DEFAULT_DISAGREEMENT_FIELDS.to_vec(),
        }
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            max_slots: self.max_slots,
            include_undetected: self.include_undetected,
            role_type_codes: self.role_type_codes.clone(),
        }
    }

    pub fn provider_timeout(&self) -> Option<Duration> {
        self.provider_timeout_ms.map(Duration::from_millis)
    }

    /// Content hash of the effective configuration, recorded in run metadata.
    pub fn config_hash(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&canonical).to_hex().to_string()
    }
}
