//! SQLite store for table schemas, row versions and resolution state.
//!
//! [`Database`] opens the file in WAL mode, runs the migrations in
//! [`schema`], and exposes typed helpers (see [`queries`]). It also
//! implements the provider traits the resolution session reads through.

mod providers;
pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::errors::DatabaseError;

/// Handle to the local store.
///
/// One SQLite connection opened in WAL mode with foreign keys enforced. The
/// connection sits behind a `Mutex`, so `Database` is `Send + Sync` and is
/// shared as `Arc<Database>` between the CLI and the resolution executor.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database at `path`.
    ///
    /// Missing parent directories are created first. The connection is
    /// switched to WAL journaling with foreign keys on and a 5 s busy
    /// timeout before it is returned.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;

        debug!("database opened in WAL mode");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Bring the schema up to date.
    pub fn initialize(&self) -> Result<(), DatabaseError> {
        info!("initializing database schema");
        let conn = self.conn();
        schema::run_migrations(&conn)?;
        debug!("database schema is up to date");
        Ok(())
    }

    /// Lock the underlying connection.
    ///
    /// Prefer the typed helpers in [`queries`] over raw SQL. A poisoned
    /// mutex (an earlier holder panicked) is recovered with a warning rather
    /// than propagated as a panic.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("database mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Run `f` inside a SQLite transaction.
    ///
    /// The transaction is committed when `f` returns `Ok` and rolled back
    /// when it returns `Err` (the `Transaction` is dropped uncommitted). The
    /// connection lock is held for the whole call, so `f` must use the
    /// `&Connection` it is given and never call back into `self`.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}
