//! Error types for the target store.

use thiserror::Error;

/// Result type for target store operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur while talking to a target database.
#[derive(Debug, Error)]
pub enum DbError {
    /// Error from SQLite.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A migration script reported a failure of its own.
    #[error("migration error: {0}")]
    Migration(String),

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking task running the query panicked or was cancelled.
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// A previous panic left the connection lock poisoned.
    #[error("connection lock poisoned")]
    Poisoned,
}

impl DbError {
    /// Convenience constructor for migration scripts.
    pub fn migration(message: impl Into<String>) -> Self {
        DbError::Migration(message.into())
    }
}
