//! Pairwise agreement between two slots of a reconciled table.
//!
//! Each (slot_a, slot_b, field) comparison moves through
//! `Unconfigured → Computing → Computed | Failed`. Undefined statistics
//! (no cases, zero variance) are `None` fields on a computed result; only
//! provider failures and usage errors fail a comparison.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::alpha::{bootstrap_alpha_interval, BootstrapConfig, StatisticsError, StatisticsProvider};
use super::fields::{FieldSpec, FieldValue, MeasurementLevel, SlotTable};
use super::potter::{potters_pi, potters_pi_for_units};
use crate::model::SlotIndex;

/// Pairwise comparisons always involve two coders.
const PAIR_CODER_COUNT: usize = 2;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AgreementError {
    #[error("slot index {slot_index} outside the table's 1..={slot_count} slots")]
    InvalidSlotIndex {
        slot_index: SlotIndex,
        slot_count: usize,
    },
    #[error("cannot compare slot {0} with itself")]
    SameSlot(SlotIndex),
    #[error("field {field} is not carried by this table")]
    UnsupportedField { field: String },
    #[error("field {field} has non-numeric values; {level:?} level needs numbers")]
    NonNumericField {
        field: String,
        level: MeasurementLevel,
    },
    #[error(transparent)]
    Statistics(#[from] StatisticsError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonState {
    Unconfigured,
    Computing,
    Computed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct ComparisonKey {
    slot_a: SlotIndex,
    slot_b: SlotIndex,
    field: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgreementResult {
    pub slot_a: SlotIndex,
    pub slot_b: SlotIndex,
    pub field: String,
    pub measurement_level: MeasurementLevel,
    pub case_count: usize,
    /// `None` when there were no cases to compare.
    pub percent_agreement: Option<f64>,
    /// `None` when the provider reports alpha as undefined.
    pub chance_corrected_alpha: Option<f64>,
    #[serde(default)]
    pub alpha_interval: Option<(f64, f64)>,
    #[serde(default)]
    pub potters_pi: Option<f64>,
}

/// Final state of one (slot_a, slot_b, field) comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonStatus {
    pub slot_a: SlotIndex,
    pub slot_b: SlotIndex,
    pub field: String,
    pub state: ComparisonState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonFailure {
    pub slot_a: SlotIndex,
    pub slot_b: SlotIndex,
    pub field: String,
    pub error: String,
}

/// Potter's Pi across every slot at once (one unit per row).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiSlotPi {
    pub field: String,
    pub slot_count: usize,
    pub case_count: usize,
    pub potters_pi: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgreementReport {
    pub results: Vec<AgreementResult>,
    pub failures: Vec<ComparisonFailure>,
    pub multi_slot: Vec<MultiSlotPi>,
}

pub struct AgreementEngine {
    provider: Arc<dyn StatisticsProvider>,
    timeout: Option<Duration>,
    bootstrap: Option<BootstrapConfig>,
    states: BTreeMap<ComparisonKey, ComparisonState>,
}

impl AgreementEngine {
    pub fn new(provider: Arc<dyn StatisticsProvider>) -> Self {
        Self {
            provider,
            timeout: None,
            bootstrap: None,
            states: BTreeMap::new(),
        }
    }

    /// Timeout handed to the provider on every call.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: Option<BootstrapConfig>) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn state(&self, slot_a: SlotIndex, slot_b: SlotIndex, field: &str) -> ComparisonState {
        let key = ComparisonKey {
            slot_a,
            slot_b,
            field: field.to_string(),
        };
        self.states
            .get(&key)
            .copied()
            .unwrap_or(ComparisonState::Unconfigured)
    }

    /// Every comparison this engine has touched, ordered by slot pair then field.
    pub fn states(&self) -> Vec<ComparisonStatus> {
        self.states
            .iter()
            .map(|(key, state)| ComparisonStatus {
                slot_a: key.slot_a,
                slot_b: key.slot_b,
                field: key.field.clone(),
                state: *state,
            })
            .collect()
    }

    /// Compare `slot_a` with `slot_b` on one field.
    pub fn compute<T: SlotTable>(
        &mut self,
        slot_a: SlotIndex,
        slot_b: SlotIndex,
        rows: &[T],
        spec: &FieldSpec,
    ) -> Result<AgreementResult, AgreementError> {
        let key = ComparisonKey {
            slot_a,
            slot_b,
            field: spec.name(),
        };
        self.states.insert(key.clone(), ComparisonState::Computing);
        let outcome = self.evaluate(slot_a, slot_b, rows, spec);
        let state = if outcome.is_ok() {
            ComparisonState::Computed
        } else {
            ComparisonState::Failed
        };
        self.states.insert(key, state);
        outcome
    }

    /// Every unordered slot pair `a < b` in `1..=slot_count` × every spec.
    /// A failed comparison is recorded and the rest still run.
    pub fn compute_all<T: SlotTable>(
        &mut self,
        rows: &[T],
        slot_count: usize,
        specs: &[FieldSpec],
    ) -> AgreementReport {
        let mut report = AgreementReport::default();
        for slot_a in 1..=slot_count {
            for slot_b in (slot_a + 1)..=slot_count {
                for spec in specs {
                    match self.compute(slot_a, slot_b, rows, spec) {
                        Ok(result) => report.results.push(result),
                        Err(err) => {
                            warn!(slot_a, slot_b, field = %spec.name(), "comparison failed: {err}");
                            report.failures.push(ComparisonFailure {
                                slot_a,
                                slot_b,
                                field: spec.name(),
                                error: err.to_string(),
                            });
                        }
                    }
                }
            }
        }
        for spec in specs.iter().filter(|spec| spec.wants_potters_pi()) {
            if let Some(multi) = multi_slot_potters_pi(rows, slot_count, spec) {
                report.multi_slot.push(multi);
            }
        }
        debug!(
            results = report.results.len(),
            failures = report.failures.len(),
            "agreement batch finished"
        );
        report
    }

    fn evaluate<T: SlotTable>(
        &self,
        slot_a: SlotIndex,
        slot_b: SlotIndex,
        rows: &[T],
        spec: &FieldSpec,
    ) -> Result<AgreementResult, AgreementError> {
        if slot_a == slot_b {
            return Err(AgreementError::SameSlot(slot_a));
        }
        let cases = extract_cases(slot_a, slot_b, rows, spec)?;

        let mut result = AgreementResult {
            slot_a,
            slot_b,
            field: spec.name(),
            measurement_level: spec.measurement_level,
            case_count: cases.len(),
            percent_agreement: None,
            chance_corrected_alpha: None,
            alpha_interval: None,
            potters_pi: None,
        };
        if cases.is_empty() {
            return Ok(result);
        }

        let agreeing = cases.iter().filter(|(a, b)| a == b).count();
        let percent = agreeing as f64 / cases.len() as f64;
        result.percent_agreement = Some(percent);

        if spec.wants_potters_pi() {
            if let Some(value_count) = spec.value_count {
                result.potters_pi = potters_pi(percent, PAIR_CODER_COUNT, value_count);
            }
        }

        let pairs = encode_pairs(&cases, spec)?;
        result.chance_corrected_alpha =
            self.provider
                .compute_alpha(&pairs, spec.measurement_level, self.timeout)?;
        if let (Some(bootstrap), Some(_)) = (&self.bootstrap, result.chance_corrected_alpha) {
            result.alpha_interval = bootstrap_alpha_interval(
                self.provider.as_ref(),
                &pairs,
                spec.measurement_level,
                bootstrap,
                self.timeout,
            )?;
        }
        Ok(result)
    }
}

/// Paired values for `spec.field`, filtered to positive pairs when the spec
/// is non-zero-only.
fn extract_cases<T: SlotTable>(
    slot_a: SlotIndex,
    slot_b: SlotIndex,
    rows: &[T],
    spec: &FieldSpec,
) -> Result<Vec<(FieldValue, FieldValue)>, AgreementError> {
    let mut cases = Vec::with_capacity(rows.len());
    for row in rows {
        for slot_index in [slot_a, slot_b] {
            if slot_index == 0 || slot_index > row.slot_count() {
                return Err(AgreementError::InvalidSlotIndex {
                    slot_index,
                    slot_count: row.slot_count(),
                });
            }
        }
        let (Some(a), Some(b)) = (
            row.slot_value(slot_a, spec.field),
            row.slot_value(slot_b, spec.field),
        ) else {
            return Err(AgreementError::UnsupportedField {
                field: spec.field.suffix().to_string(),
            });
        };
        if spec.non_zero_only && !(a.is_coded() && b.is_coded()) {
            continue;
        }
        cases.push((a, b));
    }
    Ok(cases)
}

/// Numeric encoding for the provider. Nominal fields map each distinct value
/// to a category number; other levels need numeric values.
fn encode_pairs(
    cases: &[(FieldValue, FieldValue)],
    spec: &FieldSpec,
) -> Result<Vec<(f64, f64)>, AgreementError> {
    if spec.measurement_level == MeasurementLevel::Nominal {
        let categories: Vec<&FieldValue> = cases
            .iter()
            .flat_map(|(a, b)| [a, b])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let code = |value: &FieldValue| {
            categories
                .binary_search(&value)
                .map(|i| i as f64)
                .unwrap_or(0.0)
        };
        return Ok(cases.iter().map(|(a, b)| (code(a), code(b))).collect());
    }

    cases
        .iter()
        .map(|(a, b)| match (a.as_number(), b.as_number()) {
            (Some(a), Some(b)) => Ok((a as f64, b as f64)),
            _ => Err(AgreementError::NonNumericField {
                field: spec.field.suffix().to_string(),
                level: spec.measurement_level,
            }),
        })
        .collect()
}

/// Potter's Pi with every slot in `1..=slot_count` as a coder. Rows whose
/// slot values are not all positive are skipped for non-zero-only specs.
pub fn multi_slot_potters_pi<T: SlotTable>(
    rows: &[T],
    slot_count: usize,
    spec: &FieldSpec,
) -> Option<MultiSlotPi> {
    let value_count = spec.value_count?;
    if slot_count < 2 {
        return None;
    }
    let units: Vec<Vec<FieldValue>> = rows
        .iter()
        .filter_map(|row| {
            let unit: Option<Vec<FieldValue>> = (1..=slot_count)
                .map(|slot| row.slot_value(slot, spec.field))
                .collect();
            unit
        })
        .filter(|unit| !spec.non_zero_only || unit.iter().all(FieldValue::is_coded))
        .collect();
    Some(MultiSlotPi {
        field: spec.name(),
        slot_count,
        case_count: units.len(),
        potters_pi: potters_pi_for_units(&units, value_count),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreement::alpha::KrippendorffAlpha;
    use crate::agreement::fields::ComparisonField;
    use crate::model::RoleHint;
    use crate::reconcile::{ReconciledEntityRow, SlotBlock};

    struct Offline;

    impl StatisticsProvider for Offline {
        fn name(&self) -> &str {
            "offline"
        }

        fn compute_alpha(
            &self,
            _pairs: &[(f64, f64)],
            _level: MeasurementLevel,
            _timeout: Option<Duration>,
        ) -> Result<Option<f64>, StatisticsError> {
            Err(StatisticsError::Unavailable("connection refused".to_string()))
        }
    }

    fn row(document_id: i64, values: &[(u8, i64)]) -> ReconciledEntityRow {
        ReconciledEntityRow {
            document_id,
            entity_id: 1,
            entity_display_name: String::new(),
            entity_role_hint: RoleHint::Subject,
            slots: values
                .iter()
                .map(|&(detected, entity)| SlotBlock {
                    detected,
                    entity_id_as_coded: entity,
                    ..SlotBlock::zero()
                })
                .collect(),
        }
    }

    fn engine() -> AgreementEngine {
        AgreementEngine::new(Arc::new(KrippendorffAlpha))
    }

    #[test]
    fn state_moves_from_unconfigured_to_computed() {
        let rows = vec![row(1, &[(1, 5), (1, 5)])];
        let mut engine = engine();
        assert_eq!(engine.state(1, 2, "detected"), ComparisonState::Unconfigured);
        engine
            .compute(1, 2, &rows, &FieldSpec::new(ComparisonField::Detected))
            .unwrap();
        assert_eq!(engine.state(1, 2, "detected"), ComparisonState::Computed);
    }

    #[test]
    fn provider_outage_fails_only_that_comparison() {
        let rows = vec![row(1, &[(1, 5), (0, 0), (1, 5)])];
        let mut engine = AgreementEngine::new(Arc::new(Offline));
        let report = engine.compute_all(&rows, 3, &[FieldSpec::new(ComparisonField::Detected)]);
        assert!(report.results.is_empty());
        assert_eq!(report.failures.len(), 3);
        assert_eq!(engine.state(1, 3, "detected"), ComparisonState::Failed);
        let states = engine.states();
        assert_eq!(states.len(), 3);
        assert!(states.iter().all(|s| s.state == ComparisonState::Failed));
        assert_eq!((states[0].slot_a, states[0].slot_b), (1, 2));
    }

    #[test]
    fn no_cases_after_filtering_is_undefined_not_error() {
        let rows = vec![row(1, &[(1, 5), (0, 0)]), row(2, &[(0, 0), (1, 7)])];
        let spec = FieldSpec::new(ComparisonField::EntityId).non_zero_only();
        let result = engine().compute(1, 2, &rows, &spec).unwrap();
        assert_eq!(result.case_count, 0);
        assert_eq!(result.percent_agreement, None);
        assert_eq!(result.chance_corrected_alpha, None);
    }

    #[test]
    fn usage_errors_are_reported() {
        let rows = vec![row(1, &[(1, 5), (1, 5)])];
        let mut engine = engine();
        let spec = FieldSpec::new(ComparisonField::Detected);
        assert_eq!(
            engine.compute(1, 1, &rows, &spec).unwrap_err(),
            AgreementError::SameSlot(1)
        );
        assert!(matches!(
            engine.compute(1, 3, &rows, &spec).unwrap_err(),
            AgreementError::InvalidSlotIndex { slot_index: 3, .. }
        ));
        assert!(matches!(
            engine
                .compute(1, 2, &rows, &FieldSpec::new(ComparisonField::SharedCount))
                .unwrap_err(),
            AgreementError::UnsupportedField { .. }
        ));
        assert!(matches!(
            engine
                .compute(
                    1,
                    2,
                    &rows,
                    &FieldSpec::new(ComparisonField::RoleType).with_level(MeasurementLevel::Interval)
                )
                .unwrap_err(),
            AgreementError::NonNumericField { .. }
        ));
    }

    #[test]
    fn text_fields_compare_nominally() {
        let mut a = row(1, &[(1, 5), (1, 5)]);
        a.slots[0].role_type = "source".to_string();
        a.slots[1].role_type = "source".to_string();
        let mut b = row(2, &[(1, 6), (1, 6)]);
        b.slots[0].role_type = "subject".to_string();
        b.slots[1].role_type = "source".to_string();
        let result = engine()
            .compute(1, 2, &[a, b], &FieldSpec::new(ComparisonField::RoleType))
            .unwrap();
        assert_eq!(result.percent_agreement, Some(0.5));
    }

    #[test]
    fn multi_slot_pi_uses_every_slot() {
        let rows = vec![
            row(1, &[(1, 5), (1, 5), (1, 5)]),
            row(2, &[(1, 5), (0, 0), (1, 5)]),
        ];
        let spec = FieldSpec::new(ComparisonField::Detected).with_value_count(2);
        let multi = multi_slot_potters_pi(&rows, 3, &spec).unwrap();
        assert_eq!(multi.case_count, 2);
        // P_o = 0.5, P_e = 0.25
        assert!((multi.potters_pi.unwrap() - (0.25 / 0.75)).abs() < 1e-12);
    }
}
