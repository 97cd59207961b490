//! Database schema definitions and migration runner.
//!
//! Migrations are plain SQL applied in order; the SQLite `user_version`
//! pragma records the last one applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order, as `(version, description, sql)`.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "initial schema",
        r#"
        CREATE TABLE IF NOT EXISTS column_definitions (
            table_id            TEXT    NOT NULL,
            element_key         TEXT    NOT NULL,
            element_name        TEXT,
            element_type        TEXT    NOT NULL,
            parent_element_key  TEXT,
            ordinal             INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (table_id, element_key)
        );

        CREATE TABLE IF NOT EXISTS row_versions (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            table_id            TEXT NOT NULL,
            row_id              TEXT NOT NULL,
            savepoint_type      TEXT,
            savepoint_timestamp TEXT NOT NULL,
            savepoint_creator   TEXT,
            column_values       TEXT NOT NULL DEFAULT '{}'
        );

        CREATE INDEX IF NOT EXISTS idx_row_versions_row
            ON row_versions (table_id, row_id, savepoint_timestamp);

        CREATE TABLE IF NOT EXISTS key_value_store (
            table_id    TEXT NOT NULL,
            partition   TEXT NOT NULL,
            aspect      TEXT NOT NULL,
            key         TEXT NOT NULL,
            value       TEXT NOT NULL,
            PRIMARY KEY (table_id, partition, aspect, key)
        );

        CREATE TABLE IF NOT EXISTS kv_state (
            key         TEXT PRIMARY KEY,
            value       TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS audit_log (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            action      TEXT NOT NULL,
            table_id    TEXT,
            row_id      TEXT,
            details     TEXT,
            success     INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_log_created_at ON audit_log (created_at);
        "#,
    ),
    (
        2,
        "index checkpoint lookups",
        r#"
        CREATE INDEX IF NOT EXISTS idx_row_versions_checkpoints
            ON row_versions (table_id, savepoint_type);
        CREATE INDEX IF NOT EXISTS idx_audit_log_row ON audit_log (table_id, row_id);
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
            debug!(version, "migration applied");
        }
    }

    Ok(())
}

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
        assert_eq!(get_schema_version(&conn).unwrap(), 2);
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

        for expected in [
            "column_definitions",
            "row_versions",
            "key_value_store",
            "kv_state",
            "audit_log",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }
}
