//! In-progress resolution choices for one row.
//!
//! [`Selection`] is a value type: every transition consumes the current
//! state and returns the next one, or an error that leaves the caller's
//! previous state untouched. A selection can be flattened into a
//! [`SelectionSnapshot`] and rebuilt from it, so a suspended resolution
//! survives a restart.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::classifier::{ResolutionCase, RowAction};
use super::diff::{DiffKind, RowDiff};
use crate::errors::ResolutionError;

// ---------------------------------------------------------------------------
// Choices
// ---------------------------------------------------------------------------

/// Which side of a conflicting column the user kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnResolution {
    /// The newest checkpoint value.
    Local,
    /// The oldest, saved value.
    Server,
}

impl ColumnResolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "LOCAL",
            Self::Server => "SERVER",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "LOCAL" => Some(Self::Local),
            "SERVER" => Some(Self::Server),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A settled column: the side picked and the raw value it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnChoice {
    pub resolution: ColumnResolution,
    pub value: Option<String>,
}

/// Settled columns keyed by element key.
pub type ColumnChoices = BTreeMap<String, ColumnChoice>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidates {
    oldest: Option<String>,
    newest: Option<String>,
}

impl Candidates {
    fn value_for(&self, resolution: ColumnResolution) -> Option<String> {
        match resolution {
            ColumnResolution::Local => self.newest.clone(),
            ColumnResolution::Server => self.oldest.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Whole-row decision
// ---------------------------------------------------------------------------

/// Whole-row state of the selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowDecision {
    Undecided,
    /// Waiting for the user to confirm `RowAction`.
    Confirming(RowAction),
    /// Terminal. The action has been handed to the executor.
    Committed(RowAction),
}

impl fmt::Display for RowDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undecided => write!(f, "undecided"),
            Self::Confirming(action) => write!(f, "confirming_{action}"),
            Self::Committed(action) => write!(f, "committed_{action}"),
        }
    }
}

/// What the executor is asked to do once a selection is committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    pub action: RowAction,
    pub choices: ColumnChoices,
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// The user's in-progress choices for one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    case: ResolutionCase,
    decision: RowDecision,
    candidates: BTreeMap<String, Candidates>,
    choices: ColumnChoices,
}

impl Selection {
    /// Start an undecided selection over the conflicting columns of `diff`.
    pub fn new(case: ResolutionCase, diff: &RowDiff) -> Self {
        let candidates = diff
            .conflicting()
            .filter_map(|c| match &c.kind {
                DiffKind::Conflicting {
                    oldest_raw,
                    newest_raw,
                    ..
                } => Some((
                    c.element_key.clone(),
                    Candidates {
                        oldest: oldest_raw.clone(),
                        newest: newest_raw.clone(),
                    },
                )),
                DiffKind::Concordant { .. } => None,
            })
            .collect();
        Self {
            case,
            decision: RowDecision::Undecided,
            candidates,
            choices: ColumnChoices::new(),
        }
    }

    pub fn case(&self) -> ResolutionCase {
        self.case
    }

    pub fn decision(&self) -> RowDecision {
        self.decision
    }

    pub fn choices(&self) -> &ColumnChoices {
        &self.choices
    }

    /// `None` means the column is still unresolved.
    pub fn choice(&self, element_key: &str) -> Option<&ColumnChoice> {
        self.choices.get(element_key)
    }

    /// Conflicting columns with no choice yet.
    pub fn unresolved(&self) -> impl Iterator<Item = &str> {
        self.candidates
            .keys()
            .filter(|k| !self.choices.contains_key(k.as_str()))
            .map(String::as_str)
    }

    fn invalid(&self, to: impl Into<String>) -> ResolutionError {
        ResolutionError::InvalidTransition {
            from: self.decision.to_string(),
            to: to.into(),
        }
    }

    /// Settle a conflicting column. Re-choosing replaces the earlier choice.
    pub fn choose(
        mut self,
        element_key: &str,
        resolution: ColumnResolution,
    ) -> Result<Self, ResolutionError> {
        if self.decision != RowDecision::Undecided {
            return Err(self.invalid(format!("{resolution} for '{element_key}'")));
        }
        let Some(candidates) = self.candidates.get(element_key) else {
            return Err(self.invalid(format!(
                "{resolution} for non-conflicting column '{element_key}'"
            )));
        };
        let value = candidates.value_for(resolution);
        self.choices
            .insert(element_key.to_string(), ColumnChoice { resolution, value });
        debug!(element_key, %resolution, "column choice made");
        Ok(self)
    }

    /// Return a column to unresolved.
    pub fn clear(mut self, element_key: &str) -> Result<Self, ResolutionError> {
        if self.decision != RowDecision::Undecided {
            return Err(self.invalid(format!("unresolved for '{element_key}'")));
        }
        self.choices.remove(element_key);
        Ok(self)
    }

    /// Ask for `action`; the selection waits for confirmation.
    pub fn request(mut self, action: RowAction) -> Result<Self, ResolutionError> {
        if self.decision != RowDecision::Undecided || !self.case.allows(action) {
            return Err(self.invalid(RowDecision::Confirming(action).to_string()));
        }
        self.decision = RowDecision::Confirming(action);
        Ok(self)
    }

    /// Back out of a pending confirmation. Column choices are kept.
    pub fn cancel(mut self) -> Result<Self, ResolutionError> {
        match self.decision {
            RowDecision::Confirming(_) | RowDecision::Undecided => {
                self.decision = RowDecision::Undecided;
                Ok(self)
            }
            RowDecision::Committed(_) => Err(self.invalid(RowDecision::Undecided.to_string())),
        }
    }

    /// Confirm the pending action. The returned selection is terminal.
    pub fn confirm(mut self) -> Result<Self, ResolutionError> {
        match self.decision {
            RowDecision::Confirming(action) => {
                self.decision = RowDecision::Committed(action);
                Ok(self)
            }
            other => Err(self.invalid(format!("committed (from {other})"))),
        }
    }

    /// The executor request, once committed.
    pub fn commit_request(&self) -> Option<CommitRequest> {
        match self.decision {
            RowDecision::Committed(action) => Some(CommitRequest {
                action,
                choices: self.choices.clone(),
            }),
            _ => None,
        }
    }

    // -- snapshots ----------------------------------------------------------

    /// Flatten the selection into parallel key/value arrays.
    pub fn snapshot(&self) -> SelectionSnapshot {
        let mut snap = SelectionSnapshot::default();
        for (key, choice) in &self.choices {
            snap.value_keys.push(key.clone());
            snap.chosen_values.push(choice.value.clone());
            snap.resolution_keys.push(key.clone());
            snap.resolution_values
                .push(choice.resolution.as_str().to_string());
        }
        if let RowDecision::Confirming(action) = self.decision {
            snap.confirming = Some(action);
        }
        snap
    }

    /// Rebuild a selection for `case` and `diff` from a snapshot.
    ///
    /// Any inconsistency is a [`ResolutionError::PersistenceMismatch`] and
    /// nothing from the snapshot is applied.
    pub fn restore(
        case: ResolutionCase,
        diff: &RowDiff,
        snapshot: &SelectionSnapshot,
    ) -> Result<Self, ResolutionError> {
        let mismatch = |detail: String| ResolutionError::PersistenceMismatch(detail);

        if snapshot.value_keys.len() != snapshot.chosen_values.len() {
            return Err(mismatch(format!(
                "{} value keys but {} chosen values",
                snapshot.value_keys.len(),
                snapshot.chosen_values.len()
            )));
        }
        if snapshot.resolution_keys.len() != snapshot.resolution_values.len() {
            return Err(mismatch(format!(
                "{} resolution keys but {} resolution values",
                snapshot.resolution_keys.len(),
                snapshot.resolution_values.len()
            )));
        }
        if snapshot.value_keys.len() != snapshot.resolution_keys.len() {
            return Err(mismatch(format!(
                "{} chosen values but {} resolutions",
                snapshot.value_keys.len(),
                snapshot.resolution_keys.len()
            )));
        }

        let values: BTreeMap<&str, &Option<String>> = snapshot
            .value_keys
            .iter()
            .map(String::as_str)
            .zip(&snapshot.chosen_values)
            .collect();
        let value_key_set: BTreeSet<&str> = values.keys().copied().collect();
        let resolution_key_set: BTreeSet<&str> =
            snapshot.resolution_keys.iter().map(String::as_str).collect();
        if value_key_set.len() != snapshot.value_keys.len()
            || value_key_set != resolution_key_set
        {
            return Err(mismatch(
                "chosen value keys and resolution keys differ".to_string(),
            ));
        }

        let mut selection = Self::new(case, diff);
        let mut choices = ColumnChoices::new();
        for (key, raw) in snapshot
            .resolution_keys
            .iter()
            .zip(&snapshot.resolution_values)
        {
            let resolution = ColumnResolution::parse(raw)
                .ok_or_else(|| mismatch(format!("unknown resolution '{raw}' for '{key}'")))?;
            let candidates = selection
                .candidates
                .get(key)
                .ok_or_else(|| mismatch(format!("'{key}' is not a conflicting column")))?;
            let expected = candidates.value_for(resolution);
            let saved = values.get(key.as_str()).copied().cloned().flatten();
            if saved != expected {
                return Err(mismatch(format!(
                    "saved value for '{key}' does not match the {resolution} version"
                )));
            }
            choices.insert(key.clone(), ColumnChoice { resolution, value: saved });
        }

        if let Some(action) = snapshot.confirming {
            if !case.allows(action) {
                return Err(mismatch(format!("{action} is not available for {case}")));
            }
            selection.decision = RowDecision::Confirming(action);
        }
        selection.choices = choices;
        debug!(
            restored = selection.choices.len(),
            decision = %selection.decision,
            "selection restored from snapshot"
        );
        Ok(selection)
    }
}

/// Flat, serializable form of a [`Selection`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionSnapshot {
    pub value_keys: Vec<String>,
    pub chosen_values: Vec<Option<String>>,
    pub resolution_keys: Vec<String>,
    pub resolution_values: Vec<String>,
    #[serde(default)]
    pub confirming: Option<RowAction>,
}
