//! odksync core library.
//!
//! Decides what to do with an ODK row that still has checkpoints: which
//! resolution case applies, which columns differ between the saved and the
//! newest version, what the user chose, and how the store is updated once
//! the choice is committed.

pub mod config;
pub mod conflict;
pub mod db;
pub mod errors;
pub mod import;
pub mod models;

// Re-exports for convenience.
pub use config::AppConfig;
pub use conflict::{ResolutionSession, SqliteResolutionExecutor};
pub use db::Database;
pub use errors::{CoreError, ResolutionError};
