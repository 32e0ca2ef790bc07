//! SQLite storage for documents, their version graphs and paragraph lineage.
//!
//! [`Database`] owns one connection. Schema changes live in [`schema`]; the
//! row mapping and the [`DocumentStore`](crate::store::DocumentStore)
//! implementation live in [`queries`].

pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::errors::DatabaseError;

/// Handle to a draftline database file.
///
/// Versions reference their document and lineage rows reference their
/// version, so foreign keys are enforced on every connection and deleting a
/// document cascades to its whole history.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database at `path`. A missing parent directory
    /// (e.g. `.draftline/`) is created first.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening document database");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;

        debug!(path = %path.display(), "document database ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Database that lives only as long as the handle.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Apply pending migrations.
    pub fn initialize(&self) -> Result<(), DatabaseError> {
        let conn = self.conn();
        schema::run_migrations(&conn)
    }

    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("database mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Run `f` in one transaction. A document save writes the version rows,
    /// checkpoints and lineage together, so an error from `f` rolls all of
    /// them back.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    const NOW: &str = "2025-01-01T00:00:00Z";

    fn insert_document(conn: &Connection, id: &str) -> Result<(), DatabaseError> {
        conn.execute(
            "INSERT INTO documents (id, title, created_at) VALUES (?1, ?2, ?3)",
            params![id, "Essay", NOW],
        )?;
        Ok(())
    }

    fn insert_version(conn: &Connection, id: &str, document_id: &str, number: &str) -> Result<(), DatabaseError> {
        conn.execute(
            "INSERT INTO versions (id, document_id, seq, number, content, timestamp)
             VALUES (?1, ?2, 0, ?3, '<p>Draft.</p>', ?4)",
            params![id, document_id, number, NOW],
        )?;
        Ok(())
    }

    fn count(db: &Database, table: &str) -> i64 {
        db.conn()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_file_database_creates_data_dir_in_wal_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".draftline").join("draftline.db");
        let db = Database::new(&path).unwrap();
        db.initialize().unwrap();
        assert!(path.exists());

        let mode: String = db
            .conn()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn test_version_requires_document() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        let result = insert_version(&db.conn(), "v-0", "missing-doc", "0");
        assert!(matches!(result, Err(DatabaseError::SqliteError(_))));
        assert_eq!(count(&db, "versions"), 0);
    }

    #[test]
    fn test_deleting_document_cascades_to_versions() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        {
            let conn = db.conn();
            insert_document(&conn, "doc-1").unwrap();
            insert_version(&conn, "v-0", "doc-1", "0").unwrap();
            insert_version(&conn, "v-1", "doc-1", "1").unwrap();
        }
        assert_eq!(count(&db, "versions"), 2);

        db.conn()
            .execute("DELETE FROM documents WHERE id = ?1", params!["doc-1"])
            .unwrap();
        assert_eq!(count(&db, "versions"), 0);
    }

    #[test]
    fn test_transaction_commits_document_with_versions() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        db.transaction(|conn| {
            insert_document(conn, "doc-1")?;
            insert_version(conn, "v-0", "doc-1", "0")
        })
        .unwrap();

        assert_eq!(count(&db, "documents"), 1);
        assert_eq!(count(&db, "versions"), 1);
    }

    #[test]
    fn test_duplicate_number_rolls_back_whole_save() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        let result = db.transaction(|conn| {
            insert_document(conn, "doc-1")?;
            insert_version(conn, "v-0", "doc-1", "0")?;
            insert_version(conn, "v-dup", "doc-1", "0")
        });
        assert!(result.is_err());
        assert_eq!(count(&db, "documents"), 0);
        assert_eq!(count(&db, "versions"), 0);
    }
}
