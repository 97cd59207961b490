//! Resolution session: the presentation layer's view of one row.
//!
//! A session loads the row's history and schema, classifies it, computes
//! the column diff and tracks the user's [`Selection`]. When the selection
//! is committed, [`ResolutionSession::submit`] hands it to the executor.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::classifier::{classify, ResolutionCase, RowAction};
use super::diff::{diff_columns, RowDiff};
use super::display::DisplayFormatter;
use super::executor::{CommitOutcome, ResolutionExecutor};
use super::provider::{ColumnSchemaProvider, DisplayNameProvider, RowHistoryProvider};
use super::selection::{ColumnResolution, RowDecision, Selection, SelectionSnapshot};
use crate::errors::ResolutionError;
use crate::models::SavepointType;

/// Everything the presentation layer needs to resolve one row.
#[derive(Debug, Clone)]
pub struct ResolutionSession {
    table_id: String,
    row_id: String,
    case: ResolutionCase,
    restore_target: SavepointType,
    oldest_timestamp: DateTime<Utc>,
    newest_timestamp: DateTime<Utc>,
    version_count: usize,
    diff: RowDiff,
    selection: Selection,
    submitted: bool,
}

impl ResolutionSession {
    /// Load and classify a row.
    ///
    /// Returns [`ResolutionError::EmptyHistory`] when the row no longer
    /// exists; callers treat that as already resolved.
    pub fn open<P>(
        provider: &P,
        table_id: &str,
        row_id: &str,
        formatter: &DisplayFormatter,
    ) -> Result<Self, ResolutionError>
    where
        P: RowHistoryProvider + ColumnSchemaProvider + DisplayNameProvider + ?Sized,
    {
        let history = provider.row_history(table_id, row_id)?;
        if history.is_empty() {
            debug!(table_id, row_id, "row has no versions left");
            return Err(ResolutionError::EmptyHistory {
                table_id: table_id.to_string(),
                row_id: row_id.to_string(),
            });
        }

        let classification = classify(&history)?;
        let case = classification.case;

        // Nothing to compare once the row is back to a single saved version.
        let diff = if case == ResolutionCase::AlreadyResolved {
            RowDiff::default()
        } else {
            let mut columns = provider.column_definitions(table_id)?;
            for column in columns.iter_mut().filter(|c| c.display_name.is_none()) {
                column.display_name =
                    provider.persisted_display_name(table_id, &column.element_key)?;
            }
            diff_columns(
                &columns,
                classification.oldest,
                classification.newest,
                case.treats_all_as_concordant(),
                formatter,
            )
        };

        info!(
            table_id,
            row_id,
            %case,
            versions = history.len(),
            conflicts = diff.conflict_count(),
            "opened resolution session"
        );

        Ok(Self {
            table_id: table_id.to_string(),
            row_id: row_id.to_string(),
            case,
            restore_target: classification.restore_target(),
            oldest_timestamp: classification.oldest.savepoint_timestamp,
            newest_timestamp: classification.newest.savepoint_timestamp,
            version_count: history.len(),
            selection: Selection::new(case, &diff),
            diff,
            submitted: false,
        })
    }

    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    pub fn row_id(&self) -> &str {
        &self.row_id
    }

    pub fn case(&self) -> ResolutionCase {
        self.case
    }

    /// Savepoint type the row returns to if the oldest version is kept.
    pub fn restore_target(&self) -> SavepointType {
        self.restore_target
    }

    pub fn oldest_timestamp(&self) -> DateTime<Utc> {
        self.oldest_timestamp
    }

    pub fn newest_timestamp(&self) -> DateTime<Utc> {
        self.newest_timestamp
    }

    pub fn version_count(&self) -> usize {
        self.version_count
    }

    pub fn diff(&self) -> &RowDiff {
        &self.diff
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn allowed_actions(&self) -> &'static [RowAction] {
        self.case.allowed_actions()
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    // -- transitions --------------------------------------------------------
    //
    // Each one leaves the current selection untouched on error.

    pub fn choose(
        &mut self,
        element_key: &str,
        resolution: ColumnResolution,
    ) -> Result<(), ResolutionError> {
        self.selection = self.selection.clone().choose(element_key, resolution)?;
        Ok(())
    }

    pub fn clear_choice(&mut self, element_key: &str) -> Result<(), ResolutionError> {
        self.selection = self.selection.clone().clear(element_key)?;
        Ok(())
    }

    pub fn request(&mut self, action: RowAction) -> Result<(), ResolutionError> {
        self.selection = self.selection.clone().request(action)?;
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), ResolutionError> {
        self.selection = self.selection.clone().cancel()?;
        Ok(())
    }

    pub fn confirm(&mut self) -> Result<(), ResolutionError> {
        self.selection = self.selection.clone().confirm()?;
        Ok(())
    }

    /// Snapshot of the current selection.
    pub fn snapshot(&self) -> SelectionSnapshot {
        self.selection.snapshot()
    }

    /// Replace the selection with one rebuilt from `snapshot`. On error the
    /// current selection is kept.
    pub fn restore(&mut self, snapshot: &SelectionSnapshot) -> Result<(), ResolutionError> {
        self.selection = Selection::restore(self.case, &self.diff, snapshot)?;
        Ok(())
    }

    /// Send the committed selection to `executor`.
    ///
    /// Valid once, after [`confirm`](Self::confirm). A failed commit leaves
    /// the session committed so the same request can be retried.
    pub fn submit<E>(&mut self, executor: &E) -> Result<CommitOutcome, ResolutionError>
    where
        E: ResolutionExecutor + ?Sized,
    {
        if self.submitted {
            return Err(ResolutionError::InvalidTransition {
                from: "submitted".into(),
                to: "submitted".into(),
            });
        }
        let Some(request) = self.selection.commit_request() else {
            return Err(ResolutionError::InvalidTransition {
                from: self.selection.decision().to_string(),
                to: "submitted".into(),
            });
        };

        let outcome = executor.commit_resolution(&self.table_id, &self.row_id, &request)?;
        self.submitted = true;
        Ok(outcome)
    }

    /// True when the user still has a decision to make.
    pub fn needs_decision(&self) -> bool {
        !self.case.allowed_actions().is_empty()
            && matches!(
                self.selection.decision(),
                RowDecision::Undecided | RowDecision::Confirming(_)
            )
    }
}
