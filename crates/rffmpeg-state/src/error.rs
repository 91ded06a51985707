//! Error types for the inventory store.

use thiserror::Error;

/// Result type alias for inventory store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during inventory store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to connect to database: {0}")]
    Connect(String),

    #[error("migration failed: {0}")]
    Migrate(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("decode error: {0}")]
    Decode(String),
}
