//! Typed query helpers for every table in the odksync database.
//!
//! Most helpers are methods on [`Database`] that lock the connection
//! themselves. The free functions take a `&Connection` so the resolution
//! executor can run them inside one transaction.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::Database;
use crate::conflict::selection::SelectionSnapshot;
use crate::errors::{DatabaseError, ResolutionError};
use crate::models::{ColumnSpec, ElementType, RowVersion, SavepointType};

/// `key_value_store` partition holding per-column settings.
pub const COLUMN_PARTITION: &str = "Column";
/// `key_value_store` key of a column's display-name override.
pub const DISPLAY_NAME_KEY: &str = "displayName";

// ---------------------------------------------------------------------------
// Domain structs returned by queries
// ---------------------------------------------------------------------------

/// A row from the `row_versions` table, savepoint type still raw.
#[derive(Debug, Clone)]
pub struct StoredVersion {
    pub id: i64,
    pub savepoint_type: Option<String>,
    pub savepoint_timestamp: DateTime<Utc>,
    pub savepoint_creator: Option<String>,
    pub column_values: BTreeMap<String, Option<String>>,
}

impl StoredVersion {
    /// Convert into a domain version. Unknown savepoint strings are
    /// [`ResolutionError::InvalidState`].
    pub fn into_version(self) -> Result<RowVersion, ResolutionError> {
        Ok(RowVersion {
            savepoint_type: SavepointType::from_raw(self.savepoint_type.as_deref())?,
            savepoint_timestamp: self.savepoint_timestamp,
            savepoint_creator: self.savepoint_creator,
            column_values: self.column_values,
        })
    }
}

/// One row with leftover checkpoints, as listed for a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointSummary {
    pub row_id: String,
    pub versions: i64,
    pub checkpoints: i64,
    pub last_saved_at: String,
}

/// A row from the `audit_log` table.
#[derive(Debug, Clone)]
pub struct AuditLogEntry {
    pub id: i64,
    pub action: String,
    pub table_id: Option<String>,
    pub row_id: Option<String>,
    pub details: Option<String>,
    pub success: bool,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- column_definitions -------------------------------------------------

    /// Insert or replace the column specs of `table_id`.
    pub fn insert_columns(
        &self,
        table_id: &str,
        specs: &[ColumnSpec],
    ) -> Result<(), DatabaseError> {
        self.transaction(|conn| {
            for spec in specs {
                upsert_column(conn, table_id, spec)?;
            }
            Ok(())
        })?;
        debug!(table_id, columns = specs.len(), "stored column definitions");
        Ok(())
    }

    /// Column specs of `table_id`, ordered by `(ordinal, element_key)`.
    pub fn list_column_specs(&self, table_id: &str) -> Result<Vec<ColumnSpec>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT element_key, element_name, element_type, parent_element_key, ordinal
             FROM column_definitions WHERE table_id = ?1
             ORDER BY ordinal, element_key",
        )?;
        let specs = stmt
            .query_map(params![table_id], |row| {
                Ok(ColumnSpec {
                    element_key: row.get(0)?,
                    element_name: row.get(1)?,
                    element_type: ElementType::from(row.get::<_, String>(2)?.as_str()),
                    parent_element_key: row.get(3)?,
                    ordinal: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(specs)
    }

    /// Every table id that has a schema.
    pub fn list_tables(&self) -> Result<Vec<String>, DatabaseError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT DISTINCT table_id FROM column_definitions ORDER BY table_id")?;
        let tables = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tables)
    }

    // -- key_value_store ----------------------------------------------------

    /// Persist a display-name override for a column. `value` is stored as
    /// given and may be a localizable JSON object.
    pub fn set_display_name(
        &self,
        table_id: &str,
        element_key: &str,
        value: &str,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        upsert_display_name(&conn, table_id, element_key, value)
    }

    pub fn get_display_name(
        &self,
        table_id: &str,
        element_key: &str,
    ) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn();
        let value = conn
            .query_row(
                "SELECT value FROM key_value_store
                 WHERE table_id = ?1 AND partition = ?2 AND aspect = ?3 AND key = ?4",
                params![table_id, COLUMN_PARTITION, element_key, DISPLAY_NAME_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    // -- row_versions -------------------------------------------------------

    /// Store one version of a row and return its id.
    pub fn insert_row_version(
        &self,
        table_id: &str,
        row_id: &str,
        version: &RowVersion,
    ) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        insert_version(&conn, table_id, row_id, version)
    }

    /// All stored versions of a row, oldest first.
    pub fn row_versions(
        &self,
        table_id: &str,
        row_id: &str,
    ) -> Result<Vec<StoredVersion>, DatabaseError> {
        let conn = self.conn();
        select_row_versions(&conn, table_id, row_id)
    }

    /// Rows of `table_id` that have at least one checkpoint.
    pub fn list_checkpoint_rows(
        &self,
        table_id: &str,
    ) -> Result<Vec<CheckpointSummary>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT row_id,
                    COUNT(*),
                    SUM(CASE WHEN savepoint_type IS NULL OR savepoint_type = '' THEN 1 ELSE 0 END)
                        AS checkpoints,
                    MAX(savepoint_timestamp)
             FROM row_versions WHERE table_id = ?1
             GROUP BY row_id
             HAVING checkpoints > 0
             ORDER BY row_id",
        )?;
        let rows = stmt
            .query_map(params![table_id], |row| {
                Ok(CheckpointSummary {
                    row_id: row.get(0)?,
                    versions: row.get(1)?,
                    checkpoints: row.get(2)?,
                    last_saved_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // -- kv_state -----------------------------------------------------------

    pub fn get_state(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn();
        let value = conn
            .query_row(
                "SELECT value FROM kv_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Set a key-value state entry (upsert).
    pub fn set_state(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO kv_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE
                 SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        debug!(key, "set kv_state");
        Ok(())
    }

    pub fn delete_state(&self, key: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        remove_state(&conn, key)
    }

    // -- saved selections ---------------------------------------------------

    /// Save an in-progress selection so it can be resumed later.
    pub fn save_selection(
        &self,
        table_id: &str,
        row_id: &str,
        snapshot: &SelectionSnapshot,
    ) -> Result<(), DatabaseError> {
        let value = serde_json::to_string(snapshot)?;
        self.set_state(&selection_key(table_id, row_id), &value)
    }

    pub fn load_selection(
        &self,
        table_id: &str,
        row_id: &str,
    ) -> Result<Option<SelectionSnapshot>, DatabaseError> {
        match self.get_state(&selection_key(table_id, row_id))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn clear_selection(&self, table_id: &str, row_id: &str) -> Result<bool, DatabaseError> {
        self.delete_state(&selection_key(table_id, row_id))
    }

    // -- audit_log ----------------------------------------------------------

    /// Insert an audit-log entry.
    pub fn insert_audit_log(
        &self,
        action: &str,
        table_id: Option<&str>,
        row_id: Option<&str>,
        details: Option<&str>,
        success: bool,
    ) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        write_audit(&conn, action, table_id, row_id, details, success)
    }

    /// Most recent audit-log entries first.
    pub fn list_audit_log(&self, limit: u32) -> Result<Vec<AuditLogEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, action, table_id, row_id, details, success, created_at
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit], |row| {
                Ok(AuditLogEntry {
                    id: row.get(0)?,
                    action: row.get(1)?,
                    table_id: row.get(2)?,
                    row_id: row.get(3)?,
                    details: row.get(4)?,
                    success: row.get::<_, i64>(5)? != 0,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn count_audit_log(&self) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count = conn.query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// Connection-level helpers
// ---------------------------------------------------------------------------

/// `kv_state` key of a saved selection.
pub fn selection_key(table_id: &str, row_id: &str) -> String {
    format!("selection:{table_id}:{row_id}")
}

/// Timestamps are stored with fixed nanosecond precision so that text
/// order equals time order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Corrupt {
            entity: "row_versions".into(),
            detail: format!("bad savepoint timestamp '{raw}': {e}"),
        })
}

pub(crate) fn upsert_column(
    conn: &Connection,
    table_id: &str,
    spec: &ColumnSpec,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO column_definitions
             (table_id, element_key, element_name, element_type, parent_element_key, ordinal)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(table_id, element_key) DO UPDATE SET
             element_name = excluded.element_name,
             element_type = excluded.element_type,
             parent_element_key = excluded.parent_element_key,
             ordinal = excluded.ordinal",
        params![
            table_id,
            spec.element_key,
            spec.element_name,
            spec.element_type.to_string(),
            spec.parent_element_key,
            spec.ordinal
        ],
    )?;
    Ok(())
}

pub(crate) fn upsert_display_name(
    conn: &Connection,
    table_id: &str,
    element_key: &str,
    value: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO key_value_store (table_id, partition, aspect, key, value)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(table_id, partition, aspect, key) DO UPDATE SET value = excluded.value",
        params![table_id, COLUMN_PARTITION, element_key, DISPLAY_NAME_KEY, value],
    )?;
    debug!(table_id, element_key, "set display name");
    Ok(())
}

pub(crate) fn insert_version(
    conn: &Connection,
    table_id: &str,
    row_id: &str,
    version: &RowVersion,
) -> Result<i64, DatabaseError> {
    let values = serde_json::to_string(&version.column_values)?;
    conn.execute(
        "INSERT INTO row_versions
             (table_id, row_id, savepoint_type, savepoint_timestamp,
              savepoint_creator, column_values)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            table_id,
            row_id,
            version.savepoint_type.as_raw(),
            format_timestamp(&version.savepoint_timestamp),
            version.savepoint_creator,
            values
        ],
    )?;
    let id = conn.last_insert_rowid();
    debug!(id, table_id, row_id, savepoint = %version.savepoint_type, "inserted row version");
    Ok(id)
}

pub(crate) fn select_row_versions(
    conn: &Connection,
    table_id: &str,
    row_id: &str,
) -> Result<Vec<StoredVersion>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, savepoint_type, savepoint_timestamp, savepoint_creator, column_values
         FROM row_versions WHERE table_id = ?1 AND row_id = ?2
         ORDER BY savepoint_timestamp ASC, id ASC",
    )?;
    let raw = stmt
        .query_map(params![table_id, row_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(id, savepoint_type, timestamp, creator, values)| {
            Ok(StoredVersion {
                id,
                savepoint_type,
                savepoint_timestamp: parse_timestamp(&timestamp)?,
                savepoint_creator: creator,
                column_values: serde_json::from_str(&values)?,
            })
        })
        .collect()
}

/// Rewrite one version in place.
pub(crate) fn rewrite_version(
    conn: &Connection,
    id: i64,
    savepoint_type: SavepointType,
    column_values: &BTreeMap<String, Option<String>>,
) -> Result<(), DatabaseError> {
    let values = serde_json::to_string(column_values)?;
    let changed = conn.execute(
        "UPDATE row_versions SET savepoint_type = ?1, column_values = ?2 WHERE id = ?3",
        params![savepoint_type.as_raw(), values, id],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity: "row version".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Delete every version of a row that has no savepoint type.
pub(crate) fn remove_checkpoint_versions(
    conn: &Connection,
    table_id: &str,
    row_id: &str,
) -> Result<usize, DatabaseError> {
    let removed = conn.execute(
        "DELETE FROM row_versions
         WHERE table_id = ?1 AND row_id = ?2
           AND (savepoint_type IS NULL OR savepoint_type = '')",
        params![table_id, row_id],
    )?;
    Ok(removed)
}

/// Delete every version of a row except `keep_id`.
pub(crate) fn remove_versions_except(
    conn: &Connection,
    table_id: &str,
    row_id: &str,
    keep_id: i64,
) -> Result<usize, DatabaseError> {
    let removed = conn.execute(
        "DELETE FROM row_versions WHERE table_id = ?1 AND row_id = ?2 AND id != ?3",
        params![table_id, row_id, keep_id],
    )?;
    Ok(removed)
}

pub(crate) fn remove_state(conn: &Connection, key: &str) -> Result<bool, DatabaseError> {
    let removed = conn.execute("DELETE FROM kv_state WHERE key = ?1", params![key])?;
    Ok(removed > 0)
}

pub(crate) fn write_audit(
    conn: &Connection,
    action: &str,
    table_id: Option<&str>,
    row_id: Option<&str>,
    details: Option<&str>,
    success: bool,
) -> Result<i64, DatabaseError> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO audit_log (action, table_id, row_id, details, success, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![action, table_id, row_id, details, success as i64, now],
    )?;
    let id = conn.last_insert_rowid();
    debug!(id, action, "inserted audit_log entry");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn setup_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn spec(key: &str, ty: &str, parent: Option<&str>, ordinal: i64) -> ColumnSpec {
        ColumnSpec {
            element_key: key.into(),
            element_name: None,
            element_type: ty.parse().unwrap(),
            parent_element_key: parent.map(str::to_string),
            ordinal,
        }
    }

    #[test]
    fn test_column_specs_round_trip_in_order() {
        let db = setup_db();
        db.insert_columns(
            "census",
            &[
                spec("name", "string", None, 1),
                spec("age", "integer", None, 0),
                spec("loc", "geopoint", None, 2),
                spec("loc_lat", "number", Some("loc"), 3),
            ],
        )
        .unwrap();

        let specs = db.list_column_specs("census").unwrap();
        let keys: Vec<&str> = specs.iter().map(|s| s.element_key.as_str()).collect();
        assert_eq!(keys, vec!["age", "name", "loc", "loc_lat"]);
        assert_eq!(specs[3].parent_element_key.as_deref(), Some("loc"));
        assert_eq!(specs[2].element_type, ElementType::Custom("geopoint".into()));
        assert_eq!(db.list_tables().unwrap(), vec!["census".to_string()]);
    }

    #[test]
    fn test_display_name_crud() {
        let db = setup_db();
        assert!(db.get_display_name("census", "age").unwrap().is_none());
        db.set_display_name("census", "age", "\"Age\"").unwrap();
        db.set_display_name("census", "age", "\"Age (years)\"").unwrap();
        assert_eq!(
            db.get_display_name("census", "age").unwrap().as_deref(),
            Some("\"Age (years)\"")
        );
    }

    #[test]
    fn test_row_versions_ordered_and_typed() {
        let db = setup_db();
        db.insert_row_version(
            "census",
            "uuid:1",
            &RowVersion::new(SavepointType::Unset, ts(10)).with_value("age", Some("31")),
        )
        .unwrap();
        db.insert_row_version(
            "census",
            "uuid:1",
            &RowVersion::new(SavepointType::Complete, ts(0)).with_value("age", Some("30")),
        )
        .unwrap();

        let versions = db.row_versions("census", "uuid:1").unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].savepoint_type.as_deref(), Some("COMPLETE"));
        assert_eq!(versions[1].savepoint_type, None);

        let newest = versions[1].clone().into_version().unwrap();
        assert_eq!(newest.raw_value("age"), Some("31"));
        assert_eq!(newest.savepoint_timestamp, ts(10));
    }

    #[test]
    fn test_unknown_savepoint_is_invalid_state() {
        let db = setup_db();
        db.conn()
            .execute(
                "INSERT INTO row_versions (table_id, row_id, savepoint_type, savepoint_timestamp)
                 VALUES ('census', 'uuid:9', 'BOGUS', '2025-01-01T00:00:00.000000000Z')",
                [],
            )
            .unwrap();
        let stored = db.row_versions("census", "uuid:9").unwrap();
        assert!(matches!(
            stored[0].clone().into_version(),
            Err(ResolutionError::InvalidState(_))
        ));
    }

    #[test]
    fn test_list_checkpoint_rows() {
        let db = setup_db();
        let saved = RowVersion::new(SavepointType::Complete, ts(0));
        let checkpoint = RowVersion::new(SavepointType::Unset, ts(5));
        db.insert_row_version("census", "a", &saved).unwrap();
        db.insert_row_version("census", "a", &checkpoint).unwrap();
        db.insert_row_version("census", "b", &saved).unwrap();
        db.insert_row_version("census", "c", &checkpoint).unwrap();

        let rows = db.list_checkpoint_rows("census").unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.row_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(rows[0].versions, 2);
        assert_eq!(rows[0].checkpoints, 1);
    }

    #[test]
    fn test_kv_state_and_selection() {
        let db = setup_db();
        assert!(db.get_state("foo").unwrap().is_none());
        db.set_state("foo", "bar").unwrap();
        db.set_state("foo", "baz").unwrap();
        assert_eq!(db.get_state("foo").unwrap().as_deref(), Some("baz"));
        assert!(db.delete_state("foo").unwrap());
        assert!(!db.delete_state("foo").unwrap());

        let snap = SelectionSnapshot {
            value_keys: vec!["age".into()],
            chosen_values: vec![Some("30".into())],
            resolution_keys: vec!["age".into()],
            resolution_values: vec!["SERVER".into()],
            confirming: None,
        };
        db.save_selection("census", "uuid:1", &snap).unwrap();
        assert_eq!(db.load_selection("census", "uuid:1").unwrap(), Some(snap));
        assert!(db.clear_selection("census", "uuid:1").unwrap());
        assert!(db.load_selection("census", "uuid:1").unwrap().is_none());
    }

    #[test]
    fn test_audit_log() {
        let db = setup_db();
        db.insert_audit_log("resolve", Some("census"), Some("uuid:1"), Some("delete"), true)
            .unwrap();
        db.insert_audit_log("resolve", Some("census"), Some("uuid:2"), None, false)
            .unwrap();
        let entries = db.list_audit_log(10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].row_id.as_deref(), Some("uuid:2"));
        assert!(!entries[0].success);
        assert_eq!(db.count_audit_log().unwrap(), 2);
    }
}
