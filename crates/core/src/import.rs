//! JSON fixture import.
//!
//! A fixture describes one or more tables: their column schema, display
//! name overrides and row versions. Importing one is a single transaction.
//!
//! ```json
//! {
//!   "tables": [{
//!     "table_id": "census",
//!     "columns": [{ "element_key": "age", "element_type": "integer", "ordinal": 0 }],
//!     "display_names": { "age": "{\"default\":\"Age\",\"fr\":\"Âge\"}" },
//!     "rows": [{
//!       "row_id": "uuid:1",
//!       "versions": [
//!         { "savepoint_type": "COMPLETE", "savepoint_timestamp": "2024-05-01T10:00:00Z",
//!           "column_values": { "age": "30" } },
//!         { "savepoint_type": null, "savepoint_timestamp": "2024-05-01T10:05:00Z",
//!           "column_values": { "age": "31" } }
//!       ]
//!     }]
//!   }]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::conflict::classify;
use crate::db::{queries, Database};
use crate::errors::{CoreError, DatabaseError};
use crate::models::{ColumnDefinition, ColumnSpec, RowHistory, RowVersion};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub tables: Vec<TableFixture>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableFixture {
    pub table_id: String,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
    /// Element key to raw persisted display name.
    #[serde(default)]
    pub display_names: BTreeMap<String, String>,
    #[serde(default)]
    pub rows: Vec<RowFixture>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowFixture {
    pub row_id: String,
    pub versions: Vec<RowVersion>,
}

/// Counts of what an import wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub tables: usize,
    pub columns: usize,
    pub rows: usize,
    pub versions: usize,
}

impl Fixture {
    pub fn from_json(raw: &str) -> Result<Self, DatabaseError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}

impl Database {
    /// Write every table of `fixture`. Column schemas and row histories are
    /// checked before anything is written; nothing is stored if any part
    /// fails.
    pub fn import_fixture(&self, fixture: &Fixture) -> Result<ImportStats, CoreError> {
        for table in &fixture.tables {
            ColumnDefinition::from_specs(table.columns.clone())?;
            for row in table.rows.iter().filter(|r| !r.versions.is_empty()) {
                let history =
                    RowHistory::new(&table.table_id, &row.row_id, row.versions.clone());
                classify(&history)?;
            }
        }

        let stats = self.transaction(|conn| {
            let mut stats = ImportStats::default();
            for table in &fixture.tables {
                for spec in &table.columns {
                    queries::upsert_column(conn, &table.table_id, spec)?;
                }
                for (key, name) in &table.display_names {
                    queries::upsert_display_name(conn, &table.table_id, key, name)?;
                }
                for row in &table.rows {
                    for version in &row.versions {
                        queries::insert_version(conn, &table.table_id, &row.row_id, version)?;
                    }
                    stats.versions += row.versions.len();
                }
                stats.tables += 1;
                stats.columns += table.columns.len();
                stats.rows += table.rows.len();
            }
            Ok(stats)
        })?;

        info!(
            tables = stats.tables,
            rows = stats.rows,
            versions = stats.versions,
            "imported fixture"
        );
        Ok(stats)
    }
}
