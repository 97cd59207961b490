//! Error types for the odksync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them for callers that want a single
//! error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Resolution errors
// ---------------------------------------------------------------------------

/// Errors from checkpoint classification, selection and commit.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// The row has no versions left; another writer removed it. Callers
    /// treat this as a successful no-op.
    #[error("row '{row_id}' in table '{table_id}' no longer exists")]
    EmptyHistory { table_id: String, row_id: String },

    /// The classifier or session was handed history it cannot interpret.
    #[error("invalid row history: {0}")]
    InvalidState(String),

    /// A saved selection snapshot does not line up with itself or with the
    /// row it is being restored onto.
    #[error("saved selection state is inconsistent: {0}")]
    PersistenceMismatch(String),

    /// A selection transition that the current state does not allow.
    #[error("invalid selection transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Another commit for the same row is still running.
    #[error("a resolution for row '{row_id}' is already being committed")]
    CommitInProgress { row_id: String },

    /// The resolution transaction failed and was rolled back.
    #[error("failed to commit resolution for row '{row_id}': {source}")]
    CommitFailure {
        row_id: String,
        #[source]
        source: DatabaseError,
    },

    /// Reading history or schema from the store failed.
    #[error("resolution database error: {0}")]
    DatabaseError(#[from] DatabaseError),
}

impl ResolutionError {
    /// True for the "row already gone" signal that callers absorb.
    pub fn is_empty_history(&self) -> bool {
        matches!(self, Self::EmptyHistory { .. })
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A stored value could not be decoded.
    #[error("corrupt {entity} record: {detail}")]
    Corrupt { entity: String, detail: String },

    /// The stored data changed between reading it and writing it back.
    #[error("stale {entity}: {detail}")]
    Stale { entity: String, detail: String },

    /// JSON encoding or decoding of a stored column failed.
    #[error("database JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
