//! Checkpoint classification, column diffing and resolution.
//!
//! The pieces, in the order a row passes through them:
//! 1. **Classification** ([`classifier`]): which resolution case applies.
//! 2. **Diff** ([`diff`]): which retained columns differ between the oldest
//!    and newest versions.
//! 3. **Selection** ([`selection`]): the user's per-column and whole-row
//!    choices.
//! 4. **Execution** ([`executor`]): the store mutation for a committed
//!    selection.
//!
//! [`session::ResolutionSession`] ties them together for one row.

pub mod classifier;
pub mod diff;
pub mod display;
pub mod executor;
pub mod provider;
pub mod selection;
pub mod session;

pub use classifier::{classify, Classification, ResolutionCase, RowAction};
pub use diff::{diff_columns, ColumnDiff, DiffKind, RowDiff};
pub use display::DisplayFormatter;
pub use executor::{CommitOutcome, ResolutionExecutor, SqliteResolutionExecutor};
pub use provider::{ColumnSchemaProvider, DisplayNameProvider, RowHistoryProvider};
pub use selection::{
    ColumnChoice, ColumnChoices, ColumnResolution, CommitRequest, RowDecision, Selection,
    SelectionSnapshot,
};
pub use session::ResolutionSession;
