//! Collaborator traits used by [`ResolutionSession`](super::session::ResolutionSession).
//!
//! The SQLite [`Database`](crate::db::Database) implements all of them; tests
//! can substitute in-memory fakes.

use crate::errors::ResolutionError;
use crate::models::{ColumnDefinition, RowHistory};

/// Source of a row's checkpoint history.
pub trait RowHistoryProvider {
    /// All versions of `row_id`, oldest first. An empty history means the
    /// row no longer exists.
    fn row_history(&self, table_id: &str, row_id: &str) -> Result<RowHistory, ResolutionError>;
}

/// Source of a table's column schema.
pub trait ColumnSchemaProvider {
    /// Column definitions in display order, with retention already derived.
    fn column_definitions(&self, table_id: &str)
        -> Result<Vec<ColumnDefinition>, ResolutionError>;
}

/// Source of persisted display-name overrides.
pub trait DisplayNameProvider {
    fn persisted_display_name(
        &self,
        table_id: &str,
        element_key: &str,
    ) -> Result<Option<String>, ResolutionError>;
}
