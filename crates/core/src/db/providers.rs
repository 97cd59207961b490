//! Provider trait implementations backed by the SQLite store.

use crate::conflict::provider::{ColumnSchemaProvider, DisplayNameProvider, RowHistoryProvider};
use crate::errors::ResolutionError;
use crate::models::{ColumnDefinition, RowHistory};

use super::Database;

impl RowHistoryProvider for Database {
    fn row_history(&self, table_id: &str, row_id: &str) -> Result<RowHistory, ResolutionError> {
        let versions = self
            .row_versions(table_id, row_id)?
            .into_iter()
            .map(|v| v.into_version())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RowHistory::new(table_id, row_id, versions))
    }
}

impl ColumnSchemaProvider for Database {
    fn column_definitions(
        &self,
        table_id: &str,
    ) -> Result<Vec<ColumnDefinition>, ResolutionError> {
        ColumnDefinition::from_specs(self.list_column_specs(table_id)?)
    }
}

impl DisplayNameProvider for Database {
    fn persisted_display_name(
        &self,
        table_id: &str,
        element_key: &str,
    ) -> Result<Option<String>, ResolutionError> {
        Ok(self.get_display_name(table_id, element_key)?)
    }
}
