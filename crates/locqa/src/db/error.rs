use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Creating the database directory failed.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// A thread panicked while holding the connection.
    #[error("Database lock poisoned")]
    LockPoisoned,

    /// Nothing matched under the caller's tenant. Rows of other tenants are
    /// reported the same way.
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// A stored value could not be decoded into its domain type.
    #[error("Invalid value in column '{column}': {reason}")]
    InvalidColumn { column: &'static str, reason: String },
}
