//! Error types and utilities for database operations.

use std::borrow::Cow;

use deadpool::managed::TimeoutType;
use diesel::ConnectionError;
use diesel::result::Error as DieselError;
use diesel_async::pooled_connection::PoolError as DieselPoolError;
use diesel_async::pooled_connection::deadpool::PoolError as DeadpoolError;
use martex_core::{Error, ErrorKind};
use uuid::Uuid;

/// Type-erased error type for dynamic error handling.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Provides contextual hints for error types to aid in debugging.
pub trait ErrorHint {
    /// Returns an actionable hint about the error.
    fn hint(&self) -> Cow<'static, str>;
}

impl ErrorHint for TimeoutType {
    fn hint(&self) -> Cow<'static, str> {
        match self {
            TimeoutType::Wait => Cow::Borrowed(
                "Connection pool is exhausted, consider increasing pool size or optimizing query performance",
            ),
            TimeoutType::Create => Cow::Borrowed(
                "Unable to establish new database connection, check connection string and database availability",
            ),
            TimeoutType::Recycle => Cow::Borrowed(
                "Failed to recycle database connection, connection may be in invalid state",
            ),
        }
    }
}

/// Error type for all PostgreSQL database operations.
#[derive(Debug, thiserror::Error)]
#[must_use = "database errors should be handled appropriately"]
pub enum PgError {
    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database operation timed out.
    #[error("Database operation timed out")]
    Timeout(TimeoutType),

    /// Failed to establish or maintain a database connection.
    #[error("Database connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Database migration operation failed.
    #[error("Database migration error: {0}")]
    Migration(BoxError),

    /// Database query execution failed.
    #[error("Database query error: {0}")]
    Query(#[from] DieselError),

    /// A version-checked update matched no row.
    ///
    /// Another writer updated the row first, or the row does not exist.
    #[error("{entity} {id} was modified concurrently (expected version {expected})")]
    VersionConflict {
        /// Table-level name of the entity.
        entity: &'static str,
        /// Identifier of the row.
        id: Uuid,
        /// Version the caller expected to overwrite.
        expected: i32,
    },

    /// Unexpected error occurred.
    #[error("Unexpected error: {0}")]
    Unexpected(Cow<'static, str>),
}

impl PgError {
    /// Returns whether this error indicates a transient failure that might succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PgError::Timeout(_) | PgError::Connection(ConnectionError::BadConnection(_))
        )
    }

    /// Returns whether an optimistic-lock write lost the race.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, PgError::VersionConflict { .. })
    }
}

impl From<DeadpoolError> for PgError {
    fn from(value: DeadpoolError) -> Self {
        match value {
            DeadpoolError::Timeout(timeout) => Self::Timeout(timeout),
            DeadpoolError::Backend(DieselPoolError::QueryError(error)) => Self::Query(error),
            DeadpoolError::Backend(DieselPoolError::ConnectionError(error)) => {
                Self::Connection(error)
            }
            DeadpoolError::PostCreateHook(err) => {
                tracing::warn!("Unexpected post-create hook error: {}", err);
                Self::Unexpected(err.to_string().into())
            }
            DeadpoolError::NoRuntimeSpecified => {
                tracing::error!("No tokio runtime specified for connection pool");
                Self::Unexpected("No runtime specified".into())
            }
            DeadpoolError::Closed => Self::Connection(ConnectionError::InvalidConnectionUrl(
                "Connection pool is closed".into(),
            )),
        }
    }
}

impl From<PgError> for Error {
    fn from(error: PgError) -> Self {
        let kind = match &error {
            PgError::VersionConflict { .. } => ErrorKind::VersionConflict,
            PgError::Timeout(_) => ErrorKind::Timeout,
            PgError::Config(_) => ErrorKind::NotConfigured,
            _ => ErrorKind::Database,
        };

        let message = match &error {
            PgError::Timeout(timeout) => timeout.hint().into_owned(),
            other => other.to_string(),
        };

        Error::from_source(kind, error).with_message(message)
    }
}

/// Specialized [`Result`] type for database operations.
pub type PgResult<T, E = PgError> = Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_conflict_maps_to_core_kind() {
        let error = PgError::VersionConflict {
            entity: "report",
            id: Uuid::nil(),
            expected: 3,
        };
        assert!(error.is_version_conflict());
        assert!(!error.is_transient());

        let error = Error::from(error);
        assert_eq!(error.kind, ErrorKind::VersionConflict);
        assert!(error.message.as_deref().unwrap_or_default().contains("expected version 3"));
    }

    #[test]
    fn test_timeout_is_transient() {
        let error = PgError::Timeout(TimeoutType::Wait);
        assert!(error.is_transient());
        assert_eq!(Error::from(error).kind, ErrorKind::Timeout);
    }

    #[test]
    fn test_query_error_maps_to_database() {
        let error = Error::from(PgError::Query(DieselError::NotFound));
        assert_eq!(error.kind, ErrorKind::Database);
    }
}
