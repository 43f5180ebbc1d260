//! Error types for MultiSQL

use std::time::Duration;
use thiserror::Error;

/// Result type for MultiSQL operations
pub type Result<T> = std::result::Result<T, SqlError>;

/// Every failure a connector or the facade can report.
///
/// Native driver errors are always converted into one of these variants and
/// handed back to the caller.
#[derive(Error, Debug)]
pub enum SqlError {
    /// Driver unavailable, authentication rejected, host unreachable or
    /// malformed connection parameters.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed SQL, constraint violation or type mismatch reported by the
    /// database.
    #[error("Query error: {0}")]
    Query(String),

    /// Mode code that does not correspond to a known backend.
    #[error("Unsupported mode: {0}")]
    UnsupportedMode(i32),

    /// An operation that needs an open connection was called without one.
    #[error("No connection is open")]
    NoConnection,

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SqlError {
    /// Classify an sqlx failure raised while a statement was running.
    ///
    /// Errors reported by the server itself are query errors; transport
    /// level failures and server errors that end the session mean the
    /// connection is gone.
    #[cfg(any(feature = "mysql", feature = "postgres"))]
    pub(crate) fn from_sqlx_statement(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(e) => SqlError::Connection(e.to_string()),
            sqlx::Error::Tls(e) => SqlError::Connection(e.to_string()),
            e @ sqlx::Error::Protocol(_) => SqlError::Connection(e.to_string()),
            sqlx::Error::Database(db)
                if db.code().as_deref().is_some_and(is_connection_sqlstate) =>
            {
                SqlError::Connection(db.to_string())
            }
            e => SqlError::Query(e.to_string()),
        }
    }

    /// True for failures after which the native connection can no longer be
    /// trusted.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            SqlError::Connection(_) | SqlError::Timeout(_) | SqlError::Cancelled
        )
    }
}

/// SQLSTATE class 08 (connection exception) and 57P (operator intervention:
/// terminated backend, shutdown).
#[cfg(any(feature = "mysql", feature = "postgres"))]
fn is_connection_sqlstate(code: &str) -> bool {
    code.starts_with("08") || code.starts_with("57P")
}
