use thiserror::Error;

#[cfg(feature = "sqlite")]
use rusqlite;
#[cfg(feature = "postgres")]
use tokio_postgres;

/// Errors surfaced by every engine operation.
///
/// Backend drivers keep their native error as a transparent variant when they have one;
/// everything else is folded into the string variants below. `Backend` carries a message
/// already normalised by a driver's `convert_error` hook.
#[derive(Debug, Error)]
pub enum PolyDbError {
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PostgresError(#[from] tokio_postgres::Error),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    #[error("No statement could be derived for {0}")]
    EmptyStatement(String),

    #[error("Pool not found: {0}")]
    PoolNotFound(String),

    #[error("Pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Parameter conversion error: {0}")]
    ParameterError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("{pool}: {message}")]
    Backend { pool: String, message: String },

    #[error("Unimplemented feature: {0}")]
    Unimplemented(String),

    #[error("Other database error: {0}")]
    Other(String),
}

impl PolyDbError {
    /// True for errors that mean "nothing to run" rather than a failure.
    #[must_use]
    pub fn is_empty_statement(&self) -> bool {
        matches!(self, PolyDbError::EmptyStatement(_))
    }

    /// True when a conditional write was rejected because the record already exists
    /// (or, for updates, does not exist).
    #[must_use]
    pub fn is_condition_failed(&self) -> bool {
        match self {
            PolyDbError::Backend { message, .. } => message.contains("ConditionalCheckFailed"),
            #[cfg(feature = "sqlite")]
            PolyDbError::SqliteError(rusqlite::Error::SqliteFailure(err, _)) => {
                err.code == rusqlite::ErrorCode::ConstraintViolation
            }
            #[cfg(feature = "postgres")]
            PolyDbError::PostgresError(err) => {
                err.code() == Some(&tokio_postgres::error::SqlState::UNIQUE_VIOLATION)
            }
            _ => false,
        }
    }
}

impl From<bb8::RunError<PolyDbError>> for PolyDbError {
    fn from(err: bb8::RunError<PolyDbError>) -> Self {
        match err {
            bb8::RunError::User(inner) => inner,
            bb8::RunError::TimedOut => {
                PolyDbError::PoolExhausted("timed out waiting for a connection".to_string())
            }
        }
    }
}

impl From<tokio::task::JoinError> for PolyDbError {
    fn from(err: tokio::task::JoinError) -> Self {
        PolyDbError::ExecutionError(format!("blocking task join error: {err}"))
    }
}
