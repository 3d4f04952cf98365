//! One reliability analysis run:
//!
//! 1. **Load**: documents matching the configured tags from a [`DocumentStore`]
//! 2. **Assign**: resolve each document's slots to concrete coders
//! 3. **Reconcile**: one zero-filled row per (document, entity, role)
//! 4. **Aggregate**: per-slot relation networks and tie rows
//! 5. **Agree**: every slot pair × field, for entity rows and tie rows
//! 6. **Audit**: rows where any two slots disagree
//!
//! Data problems never abort a run; they come back as [`RunWarning`]s next to
//! whatever could be computed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agreement::{
    AgreementEngine, AgreementReport, AgreementResult, ComparisonStatus, DisagreementFinder,
    MultiSlotPi, StatisticsProvider,
};
use crate::config::{AnalysisConfig, ConfigError};
use crate::model::{CoderId, Document, DocumentId, RunWarning, SlotIndex, WarningKind};
use crate::reconcile::{
    EntityNetworkSummary, EntityReconciler, NetworkError, ReconciledEntityRow, ReconciledTieRow,
    RelationNetworkAggregator,
};
use crate::slots::SlotAssigner;
use crate::store::{DocumentStore, StoreError};

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// RFC 3339 UTC timestamp of the run start.
    pub started_at: String,
    pub elapsed_ms: u64,
    pub config_hash: String,
    pub provider: String,
    pub document_count: usize,
    pub row_count: usize,
    pub tie_row_count: usize,
    pub slot_count: usize,
    pub relation_slot_count: usize,
    /// Coders left out of the rows: data but no configured slot, or bound
    /// only to a slot index beyond `max_slots`.
    pub excluded_coder_ids: Vec<CoderId>,
    pub excluded_coder_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub rows: Vec<ReconciledEntityRow>,
    pub tie_rows: Vec<ReconciledTieRow>,
    pub results: Vec<AgreementResult>,
    pub tie_results: Vec<AgreementResult>,
    pub multi_slot_pi: Vec<MultiSlotPi>,
    pub tie_multi_slot_pi: Vec<MultiSlotPi>,
    pub comparison_states: Vec<ComparisonStatus>,
    pub tie_comparison_states: Vec<ComparisonStatus>,
    pub network: BTreeMap<SlotIndex, Vec<EntityNetworkSummary>>,
    pub disagreements: Vec<ReconciledEntityRow>,
    pub warnings: Vec<RunWarning>,
    pub metadata: RunMetadata,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("document store failed: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("relation network: {0}")]
    Network(#[from] NetworkError),
}

// =============================================================================
// Run
// =============================================================================

/// Load documents for `config.tags` from `store` and analyze them.
pub fn run_analysis(
    store: &dyn DocumentStore,
    config: &AnalysisConfig,
    provider: Arc<dyn StatisticsProvider>,
) -> Result<RunReport, PipelineError> {
    let documents = store.get_documents_by_tag(&config.tags)?;
    info!(
        documents = documents.len(),
        tags = ?config.tags,
        "loaded documents"
    );
    run_on_documents(&documents, config, provider)
}

/// Analyze an already-loaded batch. Tag filtering is the caller's concern.
pub fn run_on_documents(
    documents: &[Document],
    config: &AnalysisConfig,
    provider: Arc<dyn StatisticsProvider>,
) -> Result<RunReport, PipelineError> {
    let started_at = Utc::now().to_rfc3339();
    let start = Instant::now();
    let (registry, rejected) = config.registry()?;
    let slot_count = config.slot_count();
    let relation_slot_count = config.relation_slot_count();

    let batch = SlotAssigner::new(&registry).assign_all(documents);
    let mut warnings: Vec<RunWarning> = rejected
        .iter()
        .map(|coder| {
            RunWarning::new(
                WarningKind::SlotOutOfRange,
                None,
                format!(
                    "coder {} bound to slot {} beyond max_slots {}; binding ignored",
                    coder.coder_id, coder.slot_index, config.max_slots
                ),
            )
        })
        .collect();
    warnings.extend(batch.warnings);

    // First copy of each id that survived assignment.
    let mut accepted: BTreeMap<DocumentId, &Document> = BTreeMap::new();
    for document in documents {
        if batch.assignments.contains_key(&document.id) {
            accepted.entry(document.id).or_insert(document);
        }
    }
    let accepted_documents: Vec<Document> = accepted.values().map(|d| (*d).clone()).collect();

    let reconciliation =
        EntityReconciler::new(config.reconcile_options()).reconcile(&accepted_documents, &batch.assignments);
    warnings.extend(reconciliation.warnings);
    let rows = reconciliation.rows;

    let mut aggregator = RelationNetworkAggregator::new(
        config.relation_max_slots,
        config.neighbor_role_types.iter().cloned(),
    );
    for document in &accepted_documents {
        if let Some(assignment) = batch.assignments.get(&document.id) {
            aggregator.process_document(document, assignment)?;
        }
    }
    aggregator.finalize();
    let tie_rows = aggregator.tie_rows()?;
    let network = aggregator.summarize()?;

    let engine = || {
        AgreementEngine::new(Arc::clone(&provider))
            .with_timeout(config.provider_timeout())
            .with_bootstrap(config.bootstrap)
    };
    let mut entity_engine = engine();
    let mut tie_engine = engine();
    let provider_name = entity_engine.provider_name().to_string();
    let entity_report = entity_engine.compute_all(&rows, slot_count, &config.field_specs());
    let tie_report = tie_engine.compute_all(&tie_rows, relation_slot_count, &config.tie_field_specs());
    warnings.extend(failure_warnings("entity", &entity_report));
    warnings.extend(failure_warnings("tie", &tie_report));

    let disagreements: Vec<ReconciledEntityRow> = DisagreementFinder::new(slot_count)
        .with_fields(config.disagreement_fields())
        .include_optional(config.include_optional_fields)
        .find(&rows)
        .into_iter()
        .cloned()
        .collect();

    let mut excluded: BTreeSet<CoderId> = batch.unregistered_coders;
    excluded.extend(
        rejected
            .iter()
            .map(|coder| coder.coder_id)
            .filter(|coder_id| !registry.contains_coder(*coder_id)),
    );
    let metadata = RunMetadata {
        started_at,
        elapsed_ms: start.elapsed().as_millis() as u64,
        config_hash: config.config_hash(),
        provider: provider_name,
        document_count: accepted_documents.len(),
        row_count: rows.len(),
        tie_row_count: tie_rows.len(),
        slot_count,
        relation_slot_count,
        excluded_coder_count: excluded.len(),
        excluded_coder_ids: excluded.into_iter().collect(),
    };
    info!(
        documents = metadata.document_count,
        rows = metadata.row_count,
        ties = metadata.tie_row_count,
        results = entity_report.results.len() + tie_report.results.len(),
        disagreements = disagreements.len(),
        warnings = warnings.len(),
        elapsed_ms = metadata.elapsed_ms,
        "analysis finished"
    );
    if metadata.excluded_coder_count > 0 {
        warn!(
            coders = ?metadata.excluded_coder_ids,
            "coders without a usable slot were excluded"
        );
    }

    Ok(RunReport {
        rows,
        tie_rows,
        results: entity_report.results,
        tie_results: tie_report.results,
        multi_slot_pi: entity_report.multi_slot,
        tie_multi_slot_pi: tie_report.multi_slot,
        comparison_states: entity_engine.states(),
        tie_comparison_states: tie_engine.states(),
        network,
        disagreements,
        warnings,
        metadata,
    })
}

fn failure_warnings<'a>(
    table: &'a str,
    report: &'a AgreementReport,
) -> impl Iterator<Item = RunWarning> + 'a {
    report.failures.iter().map(move |failure| {
        RunWarning::new(
            WarningKind::ComparisonFailed,
            None,
            format!(
                "{table} slots {}/{} field {}: {}",
                failure.slot_a, failure.slot_b, failure.field, failure.error
            ),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreement::{ComparisonState, KrippendorffAlpha};
    use crate::model::Annotation;
    use crate::slots::CoderSlot;

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            coders: vec![
                CoderSlot {
                    coder_id: 10,
                    slot_index: 1,
                    priority: None,
                },
                CoderSlot {
                    coder_id: 20,
                    slot_index: 2,
                    priority: None,
                },
            ],
            ..AnalysisConfig::default()
        }
    }

    #[test]
    fn warnings_do_not_abort_the_run() {
        let documents = vec![
            Document::new(1)
                .with_annotation(Annotation::author(10, 5))
                .with_annotation(Annotation::author(20, 5))
                .with_annotation(Annotation::author(99, 5)),
            Document::new(0).with_annotation(Annotation::author(10, 5)),
        ];
        let report = run_on_documents(&documents, &config(), Arc::new(KrippendorffAlpha)).unwrap();
        assert_eq!(report.metadata.document_count, 1);
        assert_eq!(report.metadata.excluded_coder_ids, vec![99]);
        assert_eq!(report.rows.len(), 1);
        let kinds: Vec<WarningKind> = report.warnings.iter().map(|w| w.kind).collect();
        assert!(kinds.contains(&WarningKind::InvalidDocument));
        assert!(kinds.contains(&WarningKind::ExcludedCoder));
    }

    #[test]
    fn coder_beyond_max_slots_is_excluded_not_fatal() {
        let mut config = config();
        config.max_slots = 3;
        config.coders.push(CoderSlot {
            coder_id: 40,
            slot_index: 4,
            priority: None,
        });
        let documents = vec![Document::new(1)
            .with_annotation(Annotation::author(10, 5))
            .with_annotation(Annotation::author(20, 5))
            .with_annotation(Annotation::author(40, 5))];

        let report = run_on_documents(&documents, &config, Arc::new(KrippendorffAlpha)).unwrap();
        assert_eq!(report.metadata.excluded_coder_count, 1);
        assert_eq!(report.metadata.excluded_coder_ids, vec![40]);
        assert_eq!(report.metadata.slot_count, 2);
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].slots.len(), 3);
        assert_eq!(report.rows[0].detected_count(), 2);
        assert!(report
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::SlotOutOfRange && w.message.contains("coder 40")));
    }

    #[test]
    fn comparison_states_are_reported_per_table() {
        let documents = vec![Document::new(1)
            .with_annotation(Annotation::author(10, 5))
            .with_annotation(Annotation::author(20, 5))];
        let report = run_on_documents(&documents, &config(), Arc::new(KrippendorffAlpha)).unwrap();
        assert_eq!(report.comparison_states.len(), report.results.len());
        assert!(report
            .comparison_states
            .iter()
            .all(|s| s.state == ComparisonState::Computed));
        assert_eq!(report.tie_comparison_states.len(), report.tie_results.len());
    }

    #[test]
    fn empty_batch_yields_empty_tables() {
        let report = run_on_documents(&[], &config(), Arc::new(KrippendorffAlpha)).unwrap();
        assert!(report.rows.is_empty());
        assert!(report.tie_rows.is_empty());
        assert!(report.results.iter().all(|r| r.case_count == 0));
        assert!(report.disagreements.is_empty());
    }
}
