//! Applying a committed resolution to the store.
//!
//! [`SqliteResolutionExecutor`] runs each commit as one transaction and
//! refuses a second commit for a row while the first is still running.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use super::classifier::{classify, RowAction};
use super::selection::{ColumnResolution, CommitRequest};
use crate::db::queries;
use crate::db::Database;
use crate::errors::{DatabaseError, ResolutionError};
use crate::models::{RowHistory, SavepointType};

/// Audit-log action recorded for every commit attempt.
pub const AUDIT_ACTION: &str = "resolve_checkpoints";

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Applied {
        action: RowAction,
        removed_versions: usize,
        overridden_columns: usize,
    },
    /// The row was gone by the time the commit ran; nothing changed.
    RowAlreadyGone,
}

/// Performs the mutation for a committed selection.
pub trait ResolutionExecutor {
    fn commit_resolution(
        &self,
        table_id: &str,
        row_id: &str,
        request: &CommitRequest,
    ) -> Result<CommitOutcome, ResolutionError>;
}

// ---------------------------------------------------------------------------
// Per-row commit lock
// ---------------------------------------------------------------------------

/// Set of rows with a commit in flight.
#[derive(Debug, Default, Clone)]
struct RowLocks(Arc<Mutex<HashSet<String>>>);

impl RowLocks {
    fn acquire(&self, table_id: &str, row_id: &str) -> Result<RowLockGuard, ResolutionError> {
        let key = format!("{table_id}/{row_id}");
        let mut held = self.0.lock().unwrap_or_else(|poisoned| {
            warn!("row lock set was poisoned, recovering");
            poisoned.into_inner()
        });
        if !held.insert(key.clone()) {
            return Err(ResolutionError::CommitInProgress {
                row_id: row_id.to_string(),
            });
        }
        Ok(RowLockGuard {
            locks: self.0.clone(),
            key,
        })
    }
}

/// Releases the row lock on drop, including on panic.
struct RowLockGuard {
    locks: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for RowLockGuard {
    fn drop(&mut self) {
        let mut held = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        held.remove(&self.key);
    }
}

// ---------------------------------------------------------------------------
// SQLite executor
// ---------------------------------------------------------------------------

/// Executor writing to the local SQLite store.
///
/// Each commit runs in one [`Database::transaction`] while holding a
/// per-row lock; a second commit on the same row while the first is in
/// flight fails with [`ResolutionError::CommitInProgress`]. Clones share
/// the lock set. Rolled back commits are audited with `success = 0`.
#[derive(Clone)]
pub struct SqliteResolutionExecutor {
    db: Arc<Database>,
    locks: RowLocks,
}

impl SqliteResolutionExecutor {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            locks: RowLocks::default(),
        }
    }

    /// Apply `request` to the row on an open transaction.
    ///
    /// The history is re-read and re-classified first, so the action is
    /// checked against the row as it is now rather than as it was when the
    /// session opened:
    ///
    /// - no versions left: [`CommitOutcome::RowAlreadyGone`], nothing written;
    /// - history no longer classifiable: [`DatabaseError::Corrupt`];
    /// - case no longer allows the action: [`DatabaseError::Stale`].
    ///
    /// `Delete` and `PromoteOldest` remove the checkpoint versions.
    /// `PromoteNewest` copies the `Server` choices into the newest version,
    /// marks it incomplete and removes every other version. The saved
    /// selection is dropped and an audit row written in the same
    /// transaction, so any error leaves the row untouched.
    fn apply(
        conn: &rusqlite::Connection,
        table_id: &str,
        row_id: &str,
        request: &CommitRequest,
    ) -> Result<CommitOutcome, DatabaseError> {
        let stored = queries::select_row_versions(conn, table_id, row_id)?;
        let Some(newest) = stored.last().cloned() else {
            return Ok(CommitOutcome::RowAlreadyGone);
        };

        let versions = stored
            .into_iter()
            .map(|v| v.into_version())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DatabaseError::Corrupt {
                entity: "row_versions".into(),
                detail: e.to_string(),
            })?;
        let history = RowHistory::new(table_id, row_id, versions);
        let case = classify(&history)
            .map_err(|e| DatabaseError::Corrupt {
                entity: "row_versions".into(),
                detail: e.to_string(),
            })?
            .case;
        if !case.allows(request.action) {
            return Err(DatabaseError::Stale {
                entity: "row history".into(),
                detail: format!("row is now {case}, which does not allow {}", request.action),
            });
        }

        let (removed_versions, overridden_columns) = match request.action {
            RowAction::Delete | RowAction::PromoteOldest => {
                (queries::remove_checkpoint_versions(conn, table_id, row_id)?, 0)
            }
            RowAction::PromoteNewest => {
                let mut values = newest.column_values;
                let mut overridden = 0;
                for (key, choice) in &request.choices {
                    if choice.resolution == ColumnResolution::Server {
                        values.insert(key.clone(), choice.value.clone());
                        overridden += 1;
                    }
                }
                queries::rewrite_version(conn, newest.id, SavepointType::Incomplete, &values)?;
                (
                    queries::remove_versions_except(conn, table_id, row_id, newest.id)?,
                    overridden,
                )
            }
        };

        queries::remove_state(conn, &queries::selection_key(table_id, row_id))?;
        let details = format!(
            "{}: removed {removed_versions} version(s), kept {overridden_columns} saved value(s)",
            request.action
        );
        queries::write_audit(
            conn,
            AUDIT_ACTION,
            Some(table_id),
            Some(row_id),
            Some(&details),
            true,
        )?;

        Ok(CommitOutcome::Applied {
            action: request.action,
            removed_versions,
            overridden_columns,
        })
    }
}

impl ResolutionExecutor for SqliteResolutionExecutor {
    fn commit_resolution(
        &self,
        table_id: &str,
        row_id: &str,
        request: &CommitRequest,
    ) -> Result<CommitOutcome, ResolutionError> {
        let _guard = self.locks.acquire(table_id, row_id)?;

        match self
            .db
            .transaction(|conn| Self::apply(conn, table_id, row_id, request))
        {
            Ok(outcome) => {
                info!(table_id, row_id, action = %request.action, ?outcome, "resolution committed");
                Ok(outcome)
            }
            Err(source) => {
                warn!(
                    table_id,
                    row_id,
                    action = %request.action,
                    error = %source,
                    "resolution rolled back"
                );
                let details = format!("{}: {source}", request.action);
                if let Err(e) = self.db.insert_audit_log(
                    AUDIT_ACTION,
                    Some(table_id),
                    Some(row_id),
                    Some(&details),
                    false,
                ) {
                    warn!(error = %e, "failed to record rolled back resolution");
                }
                Err(ResolutionError::CommitFailure {
                    row_id: row_id.to_string(),
                    source,
                })
            }
        }
    }
}
