//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The `user_version`
//! pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
/// Versions start at 1.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "initial schema",
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id          TEXT PRIMARY KEY,
            title       TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS versions (
            id           TEXT PRIMARY KEY,
            document_id  TEXT    NOT NULL REFERENCES documents (id) ON DELETE CASCADE,
            seq          INTEGER NOT NULL,
            number       TEXT    NOT NULL,
            parent_id    TEXT,
            content      TEXT    NOT NULL,
            prompt       TEXT,
            note         TEXT    NOT NULL DEFAULT '',
            timestamp    TEXT    NOT NULL,
            is_original  INTEGER NOT NULL DEFAULT 0,
            is_starred   INTEGER NOT NULL DEFAULT 0,
            is_archived  INTEGER NOT NULL DEFAULT 0,
            UNIQUE (document_id, number)
        );

        CREATE INDEX IF NOT EXISTS idx_versions_document ON versions (document_id, seq);

        CREATE TABLE IF NOT EXISTS checkpoints (
            id            TEXT PRIMARY KEY,
            version_id    TEXT    NOT NULL REFERENCES versions (id) ON DELETE CASCADE,
            seq           INTEGER NOT NULL,
            content       TEXT    NOT NULL,
            content_hash  TEXT    NOT NULL,
            created_at    TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_checkpoints_version ON checkpoints (version_id, seq);
        "#,
    ),
    (
        2,
        "paragraph lineage",
        r#"
        CREATE TABLE IF NOT EXISTS paragraph_lineage (
            paragraph_id       TEXT PRIMARY KEY,
            document_id        TEXT    NOT NULL REFERENCES documents (id) ON DELETE CASCADE,
            version_id         TEXT    NOT NULL REFERENCES versions (id) ON DELETE CASCADE,
            paragraph_index    INTEGER NOT NULL,
            origin_version_id  TEXT    NOT NULL,
            prompt             TEXT,
            original_content   TEXT    NOT NULL,
            current_content    TEXT    NOT NULL,
            is_locked          INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_lineage_version ON paragraph_lineage (version_id, paragraph_index);
        CREATE INDEX IF NOT EXISTS idx_lineage_document ON paragraph_lineage (document_id);
        "#,
    ),
    (
        3,
        "settings",
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key         TEXT PRIMARY KEY,
            value       TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

/// Read the current schema version from the SQLite `user_version` pragma.
fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_idempotently() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 3);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };

        for table in ["documents", "versions", "checkpoints", "paragraph_lineage", "settings"] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }
}
