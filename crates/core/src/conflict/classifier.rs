//! Row history classification.
//!
//! Decides which resolution case applies to a row's checkpoint history and
//! picks the two versions the diff engine compares.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ResolutionError;
use crate::models::{RowHistory, RowVersion, SavepointType};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// What the user may do with a row's checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionCase {
    /// The oldest version was never saved: this is a new row. Delete it or
    /// keep the newest checkpoint.
    DeleteOrPromote,
    /// A saved version has checkpoints on top of it. Restore the saved
    /// version or keep the newest checkpoint.
    RestoreOrPromote,
    /// Only a saved version is left; nothing to do.
    AlreadyResolved,
}

impl std::fmt::Display for ResolutionCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeleteOrPromote => write!(f, "delete_or_promote"),
            Self::RestoreOrPromote => write!(f, "restore_or_promote"),
            Self::AlreadyResolved => write!(f, "already_resolved"),
        }
    }
}

/// Whole-row outcome a user can pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowAction {
    /// Keep the newest checkpoint, saved as incomplete.
    PromoteNewest,
    /// Drop the checkpoints and keep the oldest saved version.
    PromoteOldest,
    /// Drop every version of a row that was never saved.
    Delete,
}

impl std::fmt::Display for RowAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PromoteNewest => write!(f, "promote_newest"),
            Self::PromoteOldest => write!(f, "promote_oldest"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

impl ResolutionCase {
    /// The whole-row actions this case offers.
    pub fn allowed_actions(self) -> &'static [RowAction] {
        match self {
            Self::DeleteOrPromote => &[RowAction::PromoteNewest, RowAction::Delete],
            Self::RestoreOrPromote => &[RowAction::PromoteNewest, RowAction::PromoteOldest],
            Self::AlreadyResolved => &[],
        }
    }

    pub fn allows(self, action: RowAction) -> bool {
        self.allowed_actions().contains(&action)
    }

    /// Per-column differences only matter when there is a saved version to
    /// compare against.
    pub fn treats_all_as_concordant(self) -> bool {
        matches!(self, Self::DeleteOrPromote)
    }
}

/// Result of classifying one row history.
#[derive(Debug, Clone, Copy)]
pub struct Classification<'a> {
    pub case: ResolutionCase,
    pub oldest: &'a RowVersion,
    pub newest: &'a RowVersion,
}

impl Classification<'_> {
    /// Savepoint type the row returns to under [`RowAction::PromoteOldest`].
    pub fn restore_target(&self) -> SavepointType {
        self.oldest.savepoint_type
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Classify a non-empty history.
///
/// Callers must treat an empty history as "row already deleted" before
/// getting here; an empty history is an [`ResolutionError::InvalidState`].
pub fn classify(history: &RowHistory) -> Result<Classification<'_>, ResolutionError> {
    let (Some(oldest), Some(newest)) = (history.oldest(), history.newest()) else {
        return Err(ResolutionError::InvalidState(format!(
            "classifier called with empty history for row '{}'",
            history.row_id
        )));
    };

    // Only the oldest version can be a saved one; everything after it is a
    // checkpoint. Delete and restore remove checkpoints only.
    if let Some(late) = history.versions()[1..]
        .iter()
        .find(|v| v.savepoint_type.is_saved())
    {
        return Err(ResolutionError::InvalidState(format!(
            "row '{}' has a {} version at {} after its oldest version",
            history.row_id, late.savepoint_type, late.savepoint_timestamp
        )));
    }

    let case = if !oldest.savepoint_type.is_saved() {
        ResolutionCase::DeleteOrPromote
    } else if history.len() == 1 {
        ResolutionCase::AlreadyResolved
    } else {
        ResolutionCase::RestoreOrPromote
    };

    debug!(
        table_id = %history.table_id,
        row_id = %history.row_id,
        versions = history.len(),
        %case,
        "classified row history"
    );

    Ok(Classification {
        case,
        oldest,
        newest,
    })
}
