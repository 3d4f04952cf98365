//! Comparison fields, per-field analysis settings, and the table abstraction
//! the agreement engine reads from.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::SlotIndex;
use crate::reconcile::{ReconciledEntityRow, ReconciledTieRow};

/// A per-slot column of a reconciled table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonField {
    Detected,
    EntityId,
    RoleType,
    RoleTypeCode,
    FirstQuoteGraf,
    FirstQuoteIndex,
    OrganizationHash,
    SharedCount,
}

/// Fields checked for disagreement unless the caller overrides them.
pub const DEFAULT_DISAGREEMENT_FIELDS: [ComparisonField; 3] = [
    ComparisonField::Detected,
    ComparisonField::EntityId,
    ComparisonField::RoleType,
];

/// Extra fields added when optional checks are requested.
pub const OPTIONAL_DISAGREEMENT_FIELDS: [ComparisonField; 3] = [
    ComparisonField::FirstQuoteGraf,
    ComparisonField::FirstQuoteIndex,
    ComparisonField::OrganizationHash,
];

impl ComparisonField {
    /// Column suffix used in exports and result names (`slot{N}_{suffix}`).
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::EntityId => "entity_id",
            Self::RoleType => "role_type",
            Self::RoleTypeCode => "role_type_code",
            Self::FirstQuoteGraf => "first_quote_graf",
            Self::FirstQuoteIndex => "first_quote_index",
            Self::OrganizationHash => "organization_hash",
            Self::SharedCount => "shared_count",
        }
    }

    pub fn all() -> [ComparisonField; 8] {
        [
            Self::Detected,
            Self::EntityId,
            Self::RoleType,
            Self::RoleTypeCode,
            Self::FirstQuoteGraf,
            Self::FirstQuoteIndex,
            Self::OrganizationHash,
            Self::SharedCount,
        ]
    }
}

impl fmt::Display for ComparisonField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

impl FromStr for ComparisonField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|field| field.suffix() == s.trim())
            .ok_or_else(|| format!("unknown comparison field: {s}"))
    }
}

/// A single cell value. Text cells only support nominal comparison.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(i64),
    Text(String),
}

impl FieldValue {
    /// "Looked up / coded" test used by non-zero-only filtering. Only the
    /// zero fill counts as uncoded; negative reserved codes are coded.
    pub fn is_coded(&self) -> bool {
        match self {
            Self::Number(n) => *n != 0,
            Self::Text(s) => !s.is_empty(),
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }
}

/// Row shape the agreement engine and disagreement finder read from.
pub trait SlotTable {
    /// Number of slot blocks in the row.
    fn slot_count(&self) -> usize;

    /// Value of `field` at `slot_index`; `None` if the slot is out of range
    /// or the row type does not carry the field.
    fn slot_value(&self, slot_index: SlotIndex, field: ComparisonField) -> Option<FieldValue>;
}

impl SlotTable for ReconciledEntityRow {
    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn slot_value(&self, slot_index: SlotIndex, field: ComparisonField) -> Option<FieldValue> {
        let block = self.slot(slot_index)?;
        Some(match field {
            ComparisonField::Detected => FieldValue::Number(i64::from(block.detected)),
            ComparisonField::EntityId => FieldValue::Number(block.entity_id_as_coded),
            ComparisonField::RoleType => FieldValue::Text(block.role_type.clone()),
            ComparisonField::RoleTypeCode => FieldValue::Number(block.role_type_code),
            ComparisonField::FirstQuoteGraf => FieldValue::Number(block.first_quote_graf),
            ComparisonField::FirstQuoteIndex => FieldValue::Number(block.first_quote_index),
            ComparisonField::OrganizationHash => FieldValue::Text(block.organization_hash.clone()),
            ComparisonField::SharedCount => return None,
        })
    }
}

impl SlotTable for ReconciledTieRow {
    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn slot_value(&self, slot_index: SlotIndex, field: ComparisonField) -> Option<FieldValue> {
        let block = self.slot(slot_index)?;
        match field {
            ComparisonField::Detected => Some(FieldValue::Number(i64::from(block.detected))),
            ComparisonField::SharedCount => Some(FieldValue::Number(block.shared_count)),
            _ => None,
        }
    }
}

// =============================================================================
// Field specs
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementLevel {
    #[default]
    Nominal,
    Ordinal,
    Interval,
    Ratio,
}

/// How one field is compared between two slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub field: ComparisonField,
    /// Result name; defaults to the field suffix (plus `_non_zero`).
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub measurement_level: MeasurementLevel,
    /// Size of the value space, used by Potter's Pi.
    #[serde(default)]
    pub value_count: Option<usize>,
    /// Compute Potter's Pi (nominal fields with `value_count` only).
    #[serde(default)]
    pub chance_correction: bool,
    /// Only compare cases where both slots recorded a positive value.
    #[serde(default)]
    pub non_zero_only: bool,
}

impl FieldSpec {
    pub fn new(field: ComparisonField) -> Self {
        Self {
            field,
            label: None,
            measurement_level: MeasurementLevel::Nominal,
            value_count: None,
            chance_correction: false,
            non_zero_only: false,
        }
    }

    pub fn with_level(mut self, level: MeasurementLevel) -> Self {
        self.measurement_level = level;
        self
    }

    /// Set the value-space size and turn on Potter's Pi.
    pub fn with_value_count(mut self, value_count: usize) -> Self {
        self.value_count = Some(value_count);
        self.chance_correction = true;
        self
    }

    pub fn non_zero_only(mut self) -> Self {
        self.non_zero_only = true;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn name(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None if self.non_zero_only => format!("{}_non_zero", self.field.suffix()),
            None => self.field.suffix().to_string(),
        }
    }

    /// True when Potter's Pi applies to this spec.
    pub fn wants_potters_pi(&self) -> bool {
        self.chance_correction
            && self.value_count.is_some()
            && self.measurement_level == MeasurementLevel::Nominal
    }
}

/// Default entity-row comparisons: detection, identity (all cases and
/// looked-up cases only), and role code.
pub fn default_field_specs(role_value_count: usize) -> Vec<FieldSpec> {
    vec![
        FieldSpec::new(ComparisonField::Detected).with_value_count(2),
        FieldSpec::new(ComparisonField::EntityId),
        FieldSpec::new(ComparisonField::EntityId).non_zero_only(),
        FieldSpec::new(ComparisonField::RoleTypeCode).with_value_count(role_value_count),
    ]
}

/// Default tie-row comparisons.
pub fn default_tie_field_specs() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new(ComparisonField::Detected).with_value_count(2),
        FieldSpec::new(ComparisonField::SharedCount).with_level(MeasurementLevel::Ratio),
        FieldSpec::new(ComparisonField::SharedCount)
            .with_level(MeasurementLevel::Ratio)
            .non_zero_only(),
    ]
}
