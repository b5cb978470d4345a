//! Error types for the storage layer.

use thiserror::Error;

/// Storage operation result type.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// SQLx error (connection, query, pool timeout, etc.)
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// A row holds a value this build cannot interpret.
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl StorageError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    /// True when retrying the same statement later may succeed: pool
    /// exhaustion, a closed pool, I/O, or a busy/locked database.
    ///
    /// Constraint violations and undecodable rows fail the same way on
    /// every attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sqlx(sqlx::Error::Database(db)) => !(db.is_unique_violation()
                || db.is_foreign_key_violation()
                || db.is_check_violation()),
            Self::Sqlx(
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed,
            ) => true,
            Self::Sqlx(_) | Self::Corrupt(_) => false,
        }
    }

    /// True when the database rejected a write because of a UNIQUE constraint.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Sqlx(err) => err
                .as_database_error()
                .map(|db| db.is_unique_violation())
                .unwrap_or(false),
            Self::Corrupt(_) => false,
        }
    }
}
