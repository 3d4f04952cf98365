//! Flat-file export of reconciled tables and run results.
//!
//! - JSONL: one serialized record per line, any `Serialize` type
//! - TSV: the wide comparison table, `slot{N}_{suffix}` columns per slot

use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::agreement::{ComparisonField, FieldValue, SlotTable};
use crate::reconcile::{ReconciledEntityRow, ReconciledTieRow};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
}

const ENTITY_SLOT_FIELDS: [ComparisonField; 7] = [
    ComparisonField::Detected,
    ComparisonField::EntityId,
    ComparisonField::RoleType,
    ComparisonField::RoleTypeCode,
    ComparisonField::FirstQuoteGraf,
    ComparisonField::FirstQuoteIndex,
    ComparisonField::OrganizationHash,
];

const TIE_SLOT_FIELDS: [ComparisonField; 2] = [ComparisonField::Detected, ComparisonField::SharedCount];

/// Write each record as one JSON line. Returns the number of lines written.
pub fn write_jsonl<T: Serialize>(writer: impl Write, records: &[T]) -> Result<usize, ExportError> {
    let mut writer = BufWriter::new(writer);
    for record in records {
        let line = serde_json::to_string(record).map_err(|e| ExportError::Serde(e.to_string()))?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(records.len())
}

pub fn write_jsonl_file<T: Serialize>(path: impl AsRef<Path>, records: &[T]) -> Result<usize, ExportError> {
    let file = std::fs::File::create(path)?;
    write_jsonl(file, records)
}

/// Wide table header for entity rows over slots `1..=slot_count`.
pub fn entity_header(slot_count: usize) -> Vec<String> {
    let mut header = vec![
        "document_id".to_string(),
        "entity_id".to_string(),
        "entity_display_name".to_string(),
        "entity_role_hint".to_string(),
    ];
    header.extend(slot_columns(slot_count, &ENTITY_SLOT_FIELDS, true));
    header
}

pub fn tie_header(slot_count: usize) -> Vec<String> {
    let mut header = vec![
        "document_id".to_string(),
        "author_id".to_string(),
        "neighbor_id".to_string(),
    ];
    header.extend(slot_columns(slot_count, &TIE_SLOT_FIELDS, false));
    header
}

fn slot_columns(slot_count: usize, fields: &[ComparisonField], with_coder: bool) -> Vec<String> {
    let mut columns = Vec::new();
    for slot in 1..=slot_count {
        columns.push(format!("slot{slot}_{}", fields[0].suffix()));
        if with_coder {
            columns.push(format!("slot{slot}_coder_id"));
        }
        for field in &fields[1..] {
            columns.push(format!("slot{slot}_{}", field.suffix()));
        }
    }
    columns
}

/// Entity rows as tab-separated values with a header line.
pub fn write_entity_tsv(
    writer: impl Write,
    rows: &[ReconciledEntityRow],
    slot_count: usize,
) -> Result<usize, ExportError> {
    let mut writer = BufWriter::new(writer);
    writeln!(writer, "{}", entity_header(slot_count).join("\t"))?;
    for row in rows {
        let mut cells = vec![
            row.document_id.to_string(),
            row.entity_id.to_string(),
            sanitize(&row.entity_display_name),
            row.entity_role_hint.to_string(),
        ];
        for slot in 1..=slot_count {
            let coder = row.slot(slot).map_or(0, |block| block.coder_id);
            for (idx, field) in ENTITY_SLOT_FIELDS.iter().enumerate() {
                if idx == 1 {
                    cells.push(coder.to_string());
                }
                cells.push(cell(row.slot_value(slot, *field)));
            }
        }
        writeln!(writer, "{}", cells.join("\t"))?;
    }
    writer.flush()?;
    Ok(rows.len())
}

pub fn write_tie_tsv(
    writer: impl Write,
    rows: &[ReconciledTieRow],
    slot_count: usize,
) -> Result<usize, ExportError> {
    let mut writer = BufWriter::new(writer);
    writeln!(writer, "{}", tie_header(slot_count).join("\t"))?;
    for row in rows {
        let mut cells = vec![
            row.document_id.to_string(),
            row.author_id.to_string(),
            row.neighbor_id.to_string(),
        ];
        for slot in 1..=slot_count {
            for field in TIE_SLOT_FIELDS {
                cells.push(cell(row.slot_value(slot, field)));
            }
        }
        writeln!(writer, "{}", cells.join("\t"))?;
    }
    writer.flush()?;
    Ok(rows.len())
}

fn cell(value: Option<FieldValue>) -> String {
    match value {
        Some(FieldValue::Number(n)) => n.to_string(),
        Some(FieldValue::Text(text)) => sanitize(&text),
        None => String::new(),
    }
}

/// Tabs and newlines would break the row structure.
fn sanitize(text: &str) -> String {
    text.replace(['\t', '\n', '\r'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RoleHint;
    use crate::reconcile::{SlotBlock, TieSlotBlock};

    #[test]
    fn entity_header_names_columns_per_slot() {
        let header = entity_header(2);
        assert_eq!(header.len(), 4 + 2 * 8);
        assert_eq!(header[4], "slot1_detected");
        assert_eq!(header[5], "slot1_coder_id");
        assert_eq!(header[6], "slot1_entity_id");
        assert!(header.contains(&"slot2_organization_hash".to_string()));
    }

    #[test]
    fn entity_tsv_zero_fills_missing_slots() {
        let row = ReconciledEntityRow {
            document_id: 3,
            entity_id: 9,
            entity_display_name: "Dana\tDoe".to_string(),
            entity_role_hint: RoleHint::Subject,
            slots: vec![
                SlotBlock {
                    detected: 1,
                    coder_id: 10,
                    entity_id_as_coded: 9,
                    role_type: "source".to_string(),
                    role_type_code: 3,
                    ..SlotBlock::zero()
                },
                SlotBlock::zero(),
            ],
        };
        let mut out = Vec::new();
        write_entity_tsv(&mut out, &[row], 2).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let cells: Vec<&str> = lines[1].split('\t').collect();
        assert_eq!(cells.len(), 20);
        assert_eq!(cells[2], "Dana Doe");
        assert_eq!(&cells[4..8], &["1", "10", "9", "source"]);
        assert_eq!(&cells[12..16], &["0", "0", "0", ""]);
    }

    #[test]
    fn tie_tsv_and_jsonl() {
        let row = ReconciledTieRow {
            document_id: 1,
            author_id: 5,
            neighbor_id: 7,
            slots: vec![
                TieSlotBlock {
                    detected: 1,
                    shared_count: 2,
                },
                TieSlotBlock::default(),
            ],
        };
        let mut out = Vec::new();
        write_tie_tsv(&mut out, std::slice::from_ref(&row), 2).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text.lines().next().unwrap(),
            "document_id\tauthor_id\tneighbor_id\tslot1_detected\tslot1_shared_count\tslot2_detected\tslot2_shared_count"
        );
        assert_eq!(text.lines().nth(1).unwrap(), "1\t5\t7\t1\t2\t0\t0");

        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let path = dir.path().join("ties.jsonl");
        assert_eq!(write_jsonl_file(&path, &[row.clone(), row]).unwrap(), 2);
        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: ReconciledTieRow = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(parsed.neighbor_id, 7);
    }
}
