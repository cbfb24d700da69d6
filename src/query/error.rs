use crate::validation::ValidationResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum QueryError {
    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Query timed out after {limit:?}: {message}")]
    Timeout { limit: Duration, message: String },

    #[error("Data quality check failed for {query_id}: {} error(s)", .validation.error_count)]
    DataQuality {
        query_id: String,
        validation: Box<ValidationResult>,
    },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Unexpected error: {message}")]
    Unexpected { message: String },
}

/// How the executor reacts to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    ExponentialBackoff,
    LinearBackoff,
    NonRetryable,
}

/// Stable short name of an error class, used as the second half of
/// failure-pattern keys (`"{query_id}:{kind}"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorKind {
    ConnectionError,
    TimeoutError,
    DataQualityError,
    ValidationError,
    UnexpectedError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConnectionError => "ConnectionError",
            ErrorKind::TimeoutError => "TimeoutError",
            ErrorKind::DataQualityError => "DataQualityError",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::UnexpectedError => "UnexpectedError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl QueryError {
    pub fn connection(message: impl Into<String>) -> Self {
        QueryError::Connection {
            message: message.into(),
        }
    }

    pub fn timeout(limit: Duration, message: impl Into<String>) -> Self {
        QueryError::Timeout {
            limit,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        QueryError::Validation {
            message: message.into(),
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        QueryError::Unexpected {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::Connection { .. } => ErrorKind::ConnectionError,
            QueryError::Timeout { .. } => ErrorKind::TimeoutError,
            QueryError::DataQuality { .. } => ErrorKind::DataQualityError,
            QueryError::Validation { .. } => ErrorKind::ValidationError,
            QueryError::Unexpected { .. } => ErrorKind::UnexpectedError,
        }
    }

    pub fn retry_class(&self) -> RetryClass {
        match self {
            QueryError::Connection { .. } | QueryError::Timeout { .. } => {
                RetryClass::ExponentialBackoff
            }
            QueryError::Unexpected { .. } => RetryClass::LinearBackoff,
            QueryError::DataQuality { .. } | QueryError::Validation { .. } => {
                RetryClass::NonRetryable
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retry_class() != RetryClass::NonRetryable
    }

    /// Validation outcome attached to a data-quality failure.
    pub fn validation_result(&self) -> Option<&ValidationResult> {
        match self {
            QueryError::DataQuality { validation, .. } => Some(validation.as_ref()),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for QueryError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::PoolTimedOut => {
                QueryError::connection("timed out waiting for a pooled connection")
            }
            sqlx::Error::PoolClosed => QueryError::connection("connection pool is closed"),
            sqlx::Error::Io(e) => QueryError::connection(format!("I/O failure: {e}")),
            sqlx::Error::Tls(e) => QueryError::connection(format!("TLS failure: {e}")),
            sqlx::Error::Protocol(e) => QueryError::connection(format!("protocol failure: {e}")),
            sqlx::Error::WorkerCrashed => QueryError::connection("connection worker crashed"),
            sqlx::Error::Database(db) => {
                let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
                classify_sqlstate(&code, db.message())
            }
            other => QueryError::unexpected(other.to_string()),
        }
    }
}

/// Maps a PostgreSQL SQLSTATE onto the executor taxonomy.
fn classify_sqlstate(code: &str, message: &str) -> QueryError {
    if code == "57014" {
        // query_canceled, raised when statement_timeout fires
        return QueryError::timeout(Duration::ZERO, format!("statement timeout: {message}"));
    }
    if code.starts_with("08") || code.starts_with("53") || code.starts_with("57P") {
        return QueryError::connection(format!("[{code}] {message}"));
    }
    QueryError::unexpected(format!("[{code}] {message}"))
}

/// Terminal failure of `QueryExecutor::execute` after the retry loop ended.
#[derive(Error, Debug, Clone)]
#[error("{query_id} for subject {subject_id} failed after {attempts} attempt(s): {error}")]
pub struct ExecutionError {
    pub query_id: String,
    pub subject_id: i64,
    pub attempts: u32,
    #[source]
    pub error: QueryError,
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert_eq!(
            QueryError::connection("reset").retry_class(),
            RetryClass::ExponentialBackoff
        );
        assert_eq!(
            QueryError::timeout(Duration::from_secs(1), "slow").retry_class(),
            RetryClass::ExponentialBackoff
        );
        assert_eq!(
            QueryError::unexpected("boom").retry_class(),
            RetryClass::LinearBackoff
        );
        assert!(!QueryError::validation("bad subject").is_retryable());
    }

    #[test]
    fn test_sqlstate_mapping() {
        assert_eq!(
            classify_sqlstate("57014", "canceling statement").kind(),
            ErrorKind::TimeoutError
        );
        assert_eq!(
            classify_sqlstate("08006", "connection failure").kind(),
            ErrorKind::ConnectionError
        );
        assert_eq!(
            classify_sqlstate("57P01", "admin shutdown").kind(),
            ErrorKind::ConnectionError
        );
        assert_eq!(
            classify_sqlstate("42P01", "relation does not exist").kind(),
            ErrorKind::UnexpectedError
        );
    }

    #[test]
    fn test_pool_timeout_is_connection_error() {
        let error: QueryError = sqlx::Error::PoolTimedOut.into();
        assert_eq!(error.kind(), ErrorKind::ConnectionError);
    }
}
