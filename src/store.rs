//! Read-only document source for reconciliation, plus two implementations:
//! an in-memory store (JSON fixtures, tests) and a SQLite-backed store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{Annotation, Document, DocumentId, QuotePosition, RoleHint};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Source of coded documents. Entity identity is already resolved here.
pub trait DocumentStore: Send + Sync {
    /// Documents carrying any of `tags` (all documents when `tags` is empty),
    /// ordered by id.
    fn get_documents_by_tag(&self, tags: &[String]) -> Result<Vec<Document>, StoreError>;
}

// =============================================================================
// In-memory store
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryDocumentStore {
    documents: BTreeMap<DocumentId, Document>,
}

impl InMemoryDocumentStore {
    pub fn new(documents: impl IntoIterator<Item = Document>) -> Self {
        let mut store = Self::default();
        for document in documents {
            store.insert(document);
        }
        store
    }

    /// Load a JSON array of documents.
    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let documents: Vec<Document> =
            serde_json::from_str(&raw).map_err(|e| StoreError::Serde(e.to_string()))?;
        Ok(Self::new(documents))
    }

    /// Insert or replace by document id.
    pub fn insert(&mut self, document: Document) {
        self.documents.insert(document.id, document);
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn get_documents_by_tag(&self, tags: &[String]) -> Result<Vec<Document>, StoreError> {
        Ok(self
            .documents
            .values()
            .filter(|document| document.has_any_tag(tags))
            .cloned()
            .collect())
    }
}

// =============================================================================
// SQLite store
// =============================================================================

#[derive(Clone)]
pub struct SqliteDocumentStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

const SCHEMA: &str = "PRAGMA journal_mode=WAL;\
     PRAGMA synchronous=NORMAL;\
     CREATE TABLE IF NOT EXISTS documents (\
       id INTEGER PRIMARY KEY\
     );\
     CREATE TABLE IF NOT EXISTS document_tags (\
       document_id INTEGER NOT NULL REFERENCES documents(id),\
       tag TEXT NOT NULL,\
       PRIMARY KEY (document_id, tag)\
     );\
     CREATE TABLE IF NOT EXISTS annotations (\
       id INTEGER PRIMARY KEY AUTOINCREMENT,\
       document_id INTEGER NOT NULL REFERENCES documents(id),\
       coder_id INTEGER NOT NULL,\
       entity_id INTEGER,\
       entity_name TEXT,\
       role_hint TEXT NOT NULL,\
       role_type TEXT NOT NULL,\
       organization_text TEXT,\
       quote_paragraph INTEGER,\
       quote_index INTEGER\
     );\
     CREATE INDEX IF NOT EXISTS idx_annotations_document ON annotations(document_id);\
     CREATE INDEX IF NOT EXISTS idx_document_tags_tag ON document_tags(tag);";

impl SqliteDocumentStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("RELIABILITY_DB") {
            return PathBuf::from(path);
        }
        PathBuf::from("reliability.sqlite")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<R, StoreError>,
    {
        let mut guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut guard)
    }

    /// Insert or replace a document together with its tags and annotations.
    pub fn insert_document(&self, document: &Document) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM annotations WHERE document_id = ?1", params![document.id])?;
            tx.execute("DELETE FROM document_tags WHERE document_id = ?1", params![document.id])?;
            tx.execute(
                "INSERT OR IGNORE INTO documents (id) VALUES (?1)",
                params![document.id],
            )?;
            for tag in &document.tags {
                tx.execute(
                    "INSERT OR IGNORE INTO document_tags (document_id, tag) VALUES (?1, ?2)",
                    params![document.id, tag],
                )?;
            }
            for annotation in &document.annotations {
                let quote = annotation.quote_position;
                tx.execute(
                    "INSERT INTO annotations (\
                        document_id, coder_id, entity_id, entity_name, role_hint, role_type, \
                        organization_text, quote_paragraph, quote_index\
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        document.id,
                        annotation.coder_id,
                        annotation.entity_id,
                        annotation.entity_name,
                        annotation.role_hint.as_str(),
                        annotation.role_type,
                        annotation.organization_text,
                        quote.map(|q| q.paragraph),
                        quote.map(|q| q.index),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn insert_documents<'a>(
        &self,
        documents: impl IntoIterator<Item = &'a Document>,
    ) -> Result<usize, StoreError> {
        let mut count = 0;
        for document in documents {
            self.insert_document(document)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn document_count(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
            Ok(count.max(0) as usize)
        })
    }

    fn load_document(conn: &Connection, id: DocumentId) -> Result<Document, StoreError> {
        let mut tag_stmt =
            conn.prepare("SELECT tag FROM document_tags WHERE document_id = ?1 ORDER BY tag")?;
        let tags = tag_stmt
            .query_map(params![id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT coder_id, entity_id, entity_name, role_hint, role_type, \
                    organization_text, quote_paragraph, quote_index \
             FROM annotations WHERE document_id = ?1 ORDER BY id",
        )?;
        let mut rows = stmt.query(params![id])?;
        let mut annotations = Vec::new();
        while let Some(row) = rows.next()? {
            let role_hint: String = row.get(3)?;
            let role_hint = parse_role_hint(&role_hint)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown role hint {role_hint:?}")))?;
            let quote_paragraph: Option<i64> = row.get(6)?;
            let quote_index: Option<i64> = row.get(7)?;
            let quote_position = match (quote_paragraph, quote_index) {
                (None, None) => None,
                (paragraph, index) => Some(QuotePosition {
                    paragraph: paragraph.unwrap_or_default(),
                    index: index.unwrap_or_default(),
                }),
            };
            annotations.push(Annotation {
                coder_id: row.get(0)?,
                entity_id: row.get(1)?,
                entity_name: row.get(2)?,
                role_hint,
                role_type: row.get(4)?,
                organization_text: row.get(5)?,
                quote_position,
            });
        }
        Ok(Document {
            id,
            tags,
            annotations,
        })
    }
}

fn parse_role_hint(raw: &str) -> Option<RoleHint> {
    match raw {
        "author" => Some(RoleHint::Author),
        "subject" => Some(RoleHint::Subject),
        _ => None,
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn get_documents_by_tag(&self, tags: &[String]) -> Result<Vec<Document>, StoreError> {
        self.with_conn(|conn| {
            let ids: Vec<DocumentId> = if tags.is_empty() {
                let mut stmt = conn.prepare("SELECT id FROM documents ORDER BY id")?;
                let ids = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                ids
            } else {
                let placeholders = vec!["?"; tags.len()].join(", ");
                let sql = format!(
                    "SELECT DISTINCT document_id FROM document_tags \
                     WHERE tag IN ({placeholders}) ORDER BY document_id"
                );
                let mut stmt = conn.prepare(&sql)?;
                let ids = stmt
                    .query_map(rusqlite::params_from_iter(tags.iter()), |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                ids
            };
            debug!(documents = ids.len(), "loading documents from sqlite");
            ids.into_iter()
                .map(|id| Self::load_document(conn, id))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Document> {
        vec![
            Document::new(2)
                .with_tag("wave_2")
                .with_annotation(Annotation::author(10, 5).with_name("Reporter")),
            Document::new(1)
                .with_tag("wave_1")
                .with_annotation(
                    Annotation::subject(10, 7, "source")
                        .with_organization("City Hall")
                        .with_quote(3, 200),
                )
                .with_annotation(Annotation::unresolved(11, RoleHint::Subject, "subject")),
        ]
    }

    #[test]
    fn in_memory_store_filters_and_orders_by_id() {
        let store = InMemoryDocumentStore::new(sample());
        let all = store.get_documents_by_tag(&[]).unwrap();
        assert_eq!(all.iter().map(|d| d.id).collect::<Vec<_>>(), vec![1, 2]);
        let wave_2 = store.get_documents_by_tag(&["wave_2".to_string()]).unwrap();
        assert_eq!(wave_2.len(), 1);
        assert_eq!(wave_2[0].id, 2);
    }

    #[test]
    fn sqlite_store_round_trips_documents() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let store = SqliteDocumentStore::new(dir.path().join("docs.sqlite")).unwrap();
        assert_eq!(store.insert_documents(&sample()).unwrap(), 2);
        assert_eq!(store.document_count().unwrap(), 2);

        let loaded = store.get_documents_by_tag(&["wave_1".to_string()]).unwrap();
        assert_eq!(loaded.len(), 1);
        let expected = &sample()[1];
        assert_eq!(&loaded[0], expected);
    }

    #[test]
    fn sqlite_reinsert_replaces_annotations() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let store = SqliteDocumentStore::new(dir.path().join("docs.sqlite")).unwrap();
        store.insert_document(&sample()[0]).unwrap();
        let replacement = Document::new(2)
            .with_tag("wave_3")
            .with_annotation(Annotation::author(12, 6));
        store.insert_document(&replacement).unwrap();

        let all = store.get_documents_by_tag(&[]).unwrap();
        assert_eq!(all, vec![replacement]);
    }
}
