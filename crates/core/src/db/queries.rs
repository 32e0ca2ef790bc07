//! Typed queries and the [`DocumentStore`] implementation for [`Database`].

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::Database;
use crate::errors::DatabaseError;
use crate::models::{Checkpoint, Document, ParagraphLineage, VersionNode};
use crate::store::DocumentStore;
use crate::version_graph::VersionGraph;

// ---------------------------------------------------------------------------
// Raw rows
// ---------------------------------------------------------------------------

/// A row from the `versions` table before timestamp decoding.
struct VersionRow {
    id: String,
    number: String,
    parent_id: Option<String>,
    content: String,
    prompt: Option<String>,
    note: String,
    timestamp: String,
    is_original: bool,
    is_starred: bool,
    is_archived: bool,
}

/// A row from the `checkpoints` table before timestamp decoding.
struct CheckpointRow {
    id: String,
    content: String,
    content_hash: String,
    created_at: String,
}

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    /// Number of versions stored for a document.
    pub fn count_versions(&self, document_id: &str) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM versions WHERE document_id = ?1",
            params![document_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Versions of a document in creation order, with their checkpoints.
    pub fn list_versions(&self, document_id: &str) -> Result<Vec<VersionNode>, DatabaseError> {
        let conn = self.conn();
        let rows: Vec<VersionRow> = {
            let mut stmt = conn.prepare(
                "SELECT id, number, parent_id, content, prompt, note, timestamp,
                        is_original, is_starred, is_archived
                 FROM versions WHERE document_id = ?1 ORDER BY seq",
            )?;
            let mapped = stmt.query_map(params![document_id], |row| {
                Ok(VersionRow {
                    id: row.get(0)?,
                    number: row.get(1)?,
                    parent_id: row.get(2)?,
                    content: row.get(3)?,
                    prompt: row.get(4)?,
                    note: row.get(5)?,
                    timestamp: row.get(6)?,
                    is_original: row.get(7)?,
                    is_starred: row.get(8)?,
                    is_archived: row.get(9)?,
                })
            })?;
            mapped.collect::<Result<_, _>>()?
        };

        let mut nodes = Vec::with_capacity(rows.len());
        for row in rows {
            let checkpoints = list_checkpoints(&conn, &row.id)?;
            nodes.push(VersionNode {
                timestamp: parse_datetime("versions.timestamp", &row.timestamp)?,
                id: row.id,
                number: row.number,
                parent_id: row.parent_id,
                content: row.content,
                prompt: row.prompt,
                note: row.note,
                is_original: row.is_original,
                is_starred: row.is_starred,
                is_archived: row.is_archived,
                checkpoints,
            });
        }
        Ok(nodes)
    }
}

fn list_checkpoints(conn: &Connection, version_id: &str) -> Result<Vec<Checkpoint>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, content, content_hash, created_at
         FROM checkpoints WHERE version_id = ?1 ORDER BY seq",
    )?;
    let rows = stmt
        .query_map(params![version_id], |row| {
            Ok(CheckpointRow {
                id: row.get(0)?,
                content: row.get(1)?,
                content_hash: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|row| -> Result<Checkpoint, DatabaseError> {
            Ok(Checkpoint {
                created_at: parse_datetime("checkpoints.created_at", &row.created_at)?,
                id: row.id,
                content: row.content,
                content_hash: row.content_hash,
            })
        })
        .collect()
}

impl DocumentStore for Database {
    fn create_document(&self, document: &Document) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO documents (id, title, created_at) VALUES (?1, ?2, ?3)",
            params![document.id, document.title, document.created_at.to_rfc3339()],
        )?;
        info!(document_id = %document.id, title = %document.title, "document created");
        Ok(())
    }

    fn get_document(&self, document_id: &str) -> Result<Option<Document>, DatabaseError> {
        let conn = self.conn();
        let row: Option<(String, String, String)> = conn
            .query_row(
                "SELECT id, title, created_at FROM documents WHERE id = ?1",
                params![document_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        row.map(|(id, title, created_at)| -> Result<Document, DatabaseError> {
            Ok(Document {
                created_at: parse_datetime("documents.created_at", &created_at)?,
                id,
                title,
            })
        })
        .transpose()
    }

    fn list_documents(&self) -> Result<Vec<Document>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, title, created_at FROM documents ORDER BY created_at")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(id, title, created_at)| -> Result<Document, DatabaseError> {
                Ok(Document {
                    created_at: parse_datetime("documents.created_at", &created_at)?,
                    id,
                    title,
                })
            })
            .collect()
    }

    fn save_graph(&self, graph: &VersionGraph) -> Result<(), DatabaseError> {
        let document_id = graph.document_id();
        self.transaction(|conn| {
            for (seq, node) in graph.nodes().iter().enumerate() {
                conn.execute(
                    "INSERT INTO versions (id, document_id, seq, number, parent_id, content, prompt,
                                           note, timestamp, is_original, is_starred, is_archived)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                     ON CONFLICT(id) DO UPDATE SET
                        content = excluded.content,
                        prompt = excluded.prompt,
                        note = excluded.note,
                        timestamp = excluded.timestamp,
                        is_starred = excluded.is_starred,
                        is_archived = excluded.is_archived",
                    params![
                        node.id,
                        document_id,
                        seq as i64,
                        node.number,
                        node.parent_id,
                        node.content,
                        node.prompt,
                        node.note,
                        node.timestamp.to_rfc3339(),
                        node.is_original,
                        node.is_starred,
                        node.is_archived,
                    ],
                )?;
                for (checkpoint_seq, checkpoint) in node.checkpoints.iter().enumerate() {
                    conn.execute(
                        "INSERT OR IGNORE INTO checkpoints (id, version_id, seq, content, content_hash, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            checkpoint.id,
                            node.id,
                            checkpoint_seq as i64,
                            checkpoint.content,
                            checkpoint.content_hash,
                            checkpoint.created_at.to_rfc3339(),
                        ],
                    )?;
                }
            }
            Ok(())
        })?;
        debug!(document_id, versions = graph.len(), "version graph saved");
        Ok(())
    }

    fn load_graph(&self, document_id: &str) -> Result<VersionGraph, DatabaseError> {
        if self.get_document(document_id)?.is_none() {
            return Err(DatabaseError::NotFound {
                entity: "document".into(),
                id: document_id.to_string(),
            });
        }
        let nodes = self.list_versions(document_id)?;
        let graph = VersionGraph::from_nodes(document_id, nodes)?;
        debug!(document_id, versions = graph.len(), "version graph loaded");
        Ok(graph)
    }

    fn save_lineage(&self, document_id: &str, entries: &[ParagraphLineage]) -> Result<(), DatabaseError> {
        self.transaction(|conn| {
            conn.execute(
                "DELETE FROM paragraph_lineage WHERE document_id = ?1",
                params![document_id],
            )?;
            for entry in entries {
                conn.execute(
                    "INSERT INTO paragraph_lineage (paragraph_id, document_id, version_id, paragraph_index,
                                                    origin_version_id, prompt, original_content,
                                                    current_content, is_locked)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        entry.paragraph_id,
                        document_id,
                        entry.version_id,
                        entry.paragraph_index as i64,
                        entry.origin_version_id,
                        entry.prompt,
                        entry.original_content,
                        entry.current_content,
                        entry.is_locked,
                    ],
                )?;
            }
            Ok(())
        })?;
        debug!(document_id, entries = entries.len(), "paragraph lineage saved");
        Ok(())
    }

    fn load_lineage(&self, document_id: &str) -> Result<Vec<ParagraphLineage>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT paragraph_id, version_id, paragraph_index, origin_version_id, prompt,
                    original_content, current_content, is_locked
             FROM paragraph_lineage WHERE document_id = ?1
             ORDER BY version_id, paragraph_index",
        )?;
        let entries = stmt
            .query_map(params![document_id], |row| {
                Ok(ParagraphLineage {
                    paragraph_id: row.get(0)?,
                    version_id: row.get(1)?,
                    paragraph_index: row.get::<_, i64>(2)?.max(0) as usize,
                    origin_version_id: row.get(3)?,
                    prompt: row.get(4)?,
                    original_content: row.get(5)?,
                    current_content: row.get(6)?,
                    is_locked: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn save_setting(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        debug!(key, "setting saved");
        Ok(())
    }

    fn load_setting(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn();
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}

fn parse_datetime(column: &str, s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Decode {
            column: column.to_string(),
            detail: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn stored_graph(db: &Database) -> VersionGraph {
        let document = Document::new("Essay");
        db.create_document(&document).unwrap();
        let mut graph = VersionGraph::for_document(&document.id, "<p>Draft.</p>");
        let one = graph
            .create_version("<p>Draft one.</p>", Some("tighten".into()), None, None)
            .id
            .clone();
        graph.create_version("<p>Draft one, branched.</p>", None, Some(&one), None);
        graph.add_checkpoint(&one, "<p>Draft one!</p>").unwrap();
        db.save_graph(&graph).unwrap();
        graph
    }

    #[test]
    fn test_document_crud() {
        let db = setup_db();
        let document = Document::new("Notes");
        db.create_document(&document).unwrap();
        let loaded = db.get_document(&document.id).unwrap().unwrap();
        assert_eq!(loaded.title, "Notes");
        assert_eq!(db.list_documents().unwrap().len(), 1);
        assert!(db.get_document("missing").unwrap().is_none());
    }

    #[test]
    fn test_graph_round_trip() {
        let db = setup_db();
        let graph = stored_graph(&db);
        let loaded = db.load_graph(graph.document_id()).unwrap();

        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.root().id, graph.root().id);
        let one = loaded.find_by_number("1").unwrap();
        assert_eq!(one.prompt.as_deref(), Some("tighten"));
        assert_eq!(one.checkpoints.len(), 1);
        assert_eq!(loaded.latest().number, "1.1");
        assert_eq!(db.count_versions(graph.document_id()).unwrap(), 3);
    }

    #[test]
    fn test_save_graph_updates_existing_rows() {
        let db = setup_db();
        let mut graph = stored_graph(&db);
        let two = graph.create_version("<p>Two.</p>", None, None, None).id.clone();
        graph.update_version(&two, "<p>Two, edited.</p>").unwrap();
        graph.set_starred(&two, true).unwrap();
        db.save_graph(&graph).unwrap();

        let loaded = db.load_graph(graph.document_id()).unwrap();
        let node = loaded.get(&two).unwrap();
        assert_eq!(node.content, "<p>Two, edited.</p>");
        assert!(node.is_starred);
        assert_eq!(loaded.len(), 4);
    }

    #[test]
    fn test_load_graph_unknown_document() {
        let db = setup_db();
        assert!(matches!(
            db.load_graph("nope"),
            Err(DatabaseError::NotFound { .. })
        ));
    }

    #[test]
    fn test_lineage_round_trip() {
        let db = setup_db();
        let graph = stored_graph(&db);
        let version_id = graph.root().id.clone();
        let mut entry = ParagraphLineage::new(&version_id, 0, &version_id, None, "Draft.", "Draft.");
        entry.is_locked = true;
        db.save_lineage(graph.document_id(), &[entry.clone()]).unwrap();

        let loaded = db.load_lineage(graph.document_id()).unwrap();
        assert_eq!(loaded, vec![entry]);

        db.save_lineage(graph.document_id(), &[]).unwrap();
        assert!(db.load_lineage(graph.document_id()).unwrap().is_empty());
    }

    #[test]
    fn test_settings() {
        let db = setup_db();
        assert!(db.load_setting("foo").unwrap().is_none());
        db.save_setting("foo", "bar").unwrap();
        assert_eq!(db.load_setting("foo").unwrap().as_deref(), Some("bar"));
        db.save_setting("foo", "baz").unwrap();
        assert_eq!(db.load_setting("foo").unwrap().as_deref(), Some("baz"));
    }
}
