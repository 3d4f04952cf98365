//! Rows where any two slots disagree, for human audit.

use serde::{Deserialize, Serialize};

use super::fields::{ComparisonField, SlotTable, DEFAULT_DISAGREEMENT_FIELDS, OPTIONAL_DISAGREEMENT_FIELDS};
use crate::model::{DocumentId, EntityId, RoleHint, SlotIndex};
use crate::reconcile::ReconciledEntityRow;

/// One differing (slot pair, field) cell of a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disagreement {
    pub document_id: DocumentId,
    pub entity_id: EntityId,
    pub role_hint: RoleHint,
    pub slot_a: SlotIndex,
    pub slot_b: SlotIndex,
    pub field: ComparisonField,
}

#[derive(Debug, Clone)]
pub struct DisagreementFinder {
    slot_count: usize,
    fields: Vec<ComparisonField>,
}

impl DisagreementFinder {
    /// Checks the default fields across slots `1..=slot_count`.
    pub fn new(slot_count: usize) -> Self {
        Self {
            slot_count,
            fields: DEFAULT_DISAGREEMENT_FIELDS.to_vec(),
        }
    }

    pub fn with_fields(mut self, fields: impl IntoIterator<Item = ComparisonField>) -> Self {
        self.fields = fields.into_iter().collect();
        self
    }

    /// Add quote-position and organization-hash checks.
    pub fn include_optional(mut self, include: bool) -> Self {
        if include {
            for field in OPTIONAL_DISAGREEMENT_FIELDS {
                if !self.fields.contains(&field) {
                    self.fields.push(field);
                }
            }
        }
        self
    }

    pub fn fields(&self) -> &[ComparisonField] {
        &self.fields
    }

    /// Every differing (slot pair, field) in `row`, slot pairs ascending.
    pub fn explain(&self, row: &ReconciledEntityRow) -> Vec<Disagreement> {
        let slot_count = self.slot_count.min(row.slot_count());
        let mut out = Vec::new();
        for slot_a in 1..=slot_count {
            for slot_b in (slot_a + 1)..=slot_count {
                for &field in &self.fields {
                    let a = row.slot_value(slot_a, field);
                    let b = row.slot_value(slot_b, field);
                    if a.is_some() && b.is_some() && a != b {
                        out.push(Disagreement {
                            document_id: row.document_id,
                            entity_id: row.entity_id,
                            role_hint: row.entity_role_hint,
                            slot_a,
                            slot_b,
                            field,
                        });
                    }
                }
            }
        }
        out
    }

    pub fn disagrees(&self, row: &ReconciledEntityRow) -> bool {
        !self.explain(row).is_empty()
    }

    /// Rows with at least one disagreement, ordered by document, role, entity.
    pub fn find<'a>(&self, rows: &'a [ReconciledEntityRow]) -> Vec<&'a ReconciledEntityRow> {
        let mut found: Vec<&ReconciledEntityRow> =
            rows.iter().filter(|row| self.disagrees(row)).collect();
        found.sort_by_key(|row| row.key());
        found
    }
}

/// Owned-result form of [`DisagreementFinder::find`]. `fields = None` uses
/// the default field set.
pub fn find_disagreements(
    rows: &[ReconciledEntityRow],
    slot_count: usize,
    fields: Option<&[ComparisonField]>,
    include_optional: bool,
) -> Vec<ReconciledEntityRow> {
    let mut finder = DisagreementFinder::new(slot_count);
    if let Some(fields) = fields {
        finder = finder.with_fields(fields.iter().copied());
    }
    finder
        .include_optional(include_optional)
        .find(rows)
        .into_iter()
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::SlotBlock;

    fn block(entity: i64, role_type: &str) -> SlotBlock {
        SlotBlock {
            detected: 1,
            coder_id: 1,
            entity_id_as_coded: entity,
            role_type: role_type.to_string(),
            role_type_code: 3,
            ..SlotBlock::zero()
        }
    }

    fn row(document_id: i64, entity_id: i64, role_hint: RoleHint, slots: Vec<SlotBlock>) -> ReconciledEntityRow {
        ReconciledEntityRow {
            document_id,
            entity_id,
            entity_display_name: String::new(),
            entity_role_hint: role_hint,
            slots,
        }
    }

    #[test]
    fn finds_rows_with_any_pairwise_difference_in_order() {
        let rows = vec![
            row(2, 1, RoleHint::Subject, vec![block(1, "source"), SlotBlock::zero()]),
            row(1, 9, RoleHint::Subject, vec![block(9, "source"), block(9, "subject")]),
            row(1, 4, RoleHint::Subject, vec![block(4, "source"), block(4, "source")]),
            row(1, 9, RoleHint::Author, vec![block(9, "author"), SlotBlock::zero()]),
        ];
        let found = find_disagreements(&rows, 2, None, false);
        let keys: Vec<_> = found
            .iter()
            .map(|r| (r.document_id, r.entity_role_hint, r.entity_id))
            .collect();
        assert_eq!(
            keys,
            vec![
                (1, RoleHint::Author, 9),
                (1, RoleHint::Subject, 9),
                (2, RoleHint::Subject, 1)
            ]
        );
    }

    #[test]
    fn optional_fields_only_checked_on_request() {
        let mut a = block(4, "source");
        a.first_quote_graf = 2;
        let mut b = block(4, "source");
        b.first_quote_graf = 5;
        let rows = vec![row(1, 4, RoleHint::Subject, vec![a, b])];

        assert!(find_disagreements(&rows, 2, None, false).is_empty());
        assert_eq!(find_disagreements(&rows, 2, None, true).len(), 1);
    }

    #[test]
    fn slot_count_limits_the_pairs_checked() {
        let rows = vec![row(
            1,
            4,
            RoleHint::Subject,
            vec![block(4, "source"), block(4, "source"), SlotBlock::zero()],
        )];
        assert!(find_disagreements(&rows, 2, None, false).is_empty());
        let finder = DisagreementFinder::new(3);
        let details = finder.explain(&rows[0]);
        assert_eq!(details.len(), 6);
        assert!(details.iter().all(|d| d.slot_b == 3));
    }

    #[test]
    fn custom_fields_replace_defaults() {
        let rows = vec![row(
            1,
            4,
            RoleHint::Subject,
            vec![block(4, "source"), block(4, "subject")],
        )];
        assert!(find_disagreements(&rows, 2, Some(&[ComparisonField::EntityId]), false).is_empty());
    }
}
