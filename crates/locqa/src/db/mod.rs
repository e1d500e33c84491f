//! SQLite persistence for the QA pipeline.
//!
//! One [`Database`] handle is shared by the orchestrator, the scoring service
//! and the collaborators. Every repository function takes a `&TenantId` and
//! filters on it; there is no unscoped query in this module tree.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Transaction};

pub mod audit_repo;
pub mod batch_repo;
pub mod cross_file_repo;
pub mod cross_tenant;
pub mod error;
pub mod file_repo;
pub mod finding_repo;
pub mod migrations;
pub mod schedule_repo;
pub mod score_repo;
pub mod screening_repo;
pub mod task_repo;

pub use error::DatabaseError;

/// Waits this long on a locked database file before failing a statement.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared handle over one SQLite connection.
///
/// Clones share the connection. The mutex is not reentrant: closures passed
/// to [`Database::with_conn`] or [`Database::with_tx`] must not call back
/// into the handle.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens the pipeline database at `path`, creating parent directories
    /// and applying pending migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let db = Self::prepare(conn)?;
        log::info!("QA database ready at {}", path.display());
        Ok(db)
    }

    /// Private in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self, DatabaseError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` with the connection locked. Statements run in autocommit mode.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs `f` inside a transaction. Commits on `Ok`, rolls back on `Err`.
    ///
    /// The closure may return any error type that a `DatabaseError` converts
    /// into, so services can abort a transaction with their own errors.
    pub fn with_tx<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
        E: From<DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let tx = conn
            .unchecked_transaction()
            .map_err(DatabaseError::Sqlite)?;
        let value = f(&tx)?;
        tx.commit().map_err(DatabaseError::Sqlite)?;
        Ok(value)
    }
}

/// Where the database lives when the config names no path.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".locqa").join("data").join("locqa.db"))
}

/// Formats a timestamp for storage. Fixed width, so text order is time order.
pub fn to_db_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_db_time() -> String {
    to_db_time(Utc::now())
}

pub(crate) fn parse_db_time(
    column: &'static str,
    value: &str,
) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::InvalidColumn {
            column,
            reason: format!("'{}': {}", value, e),
        })
}

pub(crate) fn parse_opt_db_time(
    column: &'static str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    value.map(|v| parse_db_time(column, &v)).transpose()
}

pub(crate) fn parse_tenant(value: String) -> Result<crate::tenant::TenantId, DatabaseError> {
    crate::tenant::TenantId::new(value).map_err(|e| DatabaseError::InvalidColumn {
        column: "tenant_id",
        reason: e.to_string(),
    })
}

/// Decodes a stored enum value through its `FromStr`.
pub(crate) fn parse_column<T>(column: &'static str, value: &str) -> Result<T, DatabaseError>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse::<T>()
        .map_err(|reason| DatabaseError::InvalidColumn { column, reason })
}
