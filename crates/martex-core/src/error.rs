//! Structured error handling shared by every martex crate.

use strum::{AsRefStr, Display, EnumString, IntoStaticStr};
use thiserror::Error;

/// Type alias for boxed dynamic errors that can be sent across threads.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Type alias for Results with our custom Error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Categories of errors that can occur while exporting reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[derive(AsRefStr, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Input validation failed.
    InvalidInput,
    /// Resource not found.
    NotFound,
    /// Caller is not allowed to access the resource.
    Unauthorized,
    /// Operation blocked by a domain policy (billing, edition, account state).
    BusinessViolation,
    /// The report already has a run in progress.
    AlreadyRunning,
    /// An optimistic-lock write lost the race against another writer.
    VersionConflict,
    /// The process is draining and refuses new work.
    ShuttingDown,
    /// The operation observed a cancellation signal.
    Cancelled,
    /// No handler is registered (or allowed) for the requested type.
    UnsupportedType,
    /// The stored credential is missing or has the wrong type.
    CredentialsNotFound,
    /// The stored credential cannot be refreshed anymore.
    CredentialsExpired,
    /// The upstream token endpoint rejected a refresh.
    TokenRefreshFailed,
    /// The upstream revocation endpoint rejected a revoke.
    TokenRevokeFailed,
    /// A required integration is not configured.
    NotConfigured,
    /// External service error.
    External,
    /// Network-related error occurred.
    Network,
    /// Timeout occurred.
    Timeout,
    /// Serialization/deserialization error.
    Serialization,
    /// Database operation failed.
    Database,
    /// Internal service error.
    #[default]
    Internal,
}

impl ErrorKind {
    /// Check if this error kind is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::Timeout)
    }

    /// Returns whether the failure comes from an upstream authorization server.
    #[must_use]
    pub const fn is_upstream_auth(&self) -> bool {
        matches!(
            self,
            Self::TokenRefreshFailed | Self::TokenRevokeFailed | Self::NotConfigured
        )
    }

    /// Message returned to callers in place of the internal detail.
    const fn public_text(&self) -> &'static str {
        match self {
            Self::TokenRefreshFailed => "Failed to refresh the access token, please reconnect the account",
            Self::TokenRevokeFailed => "Failed to revoke the access token",
            Self::NotConfigured => "This integration is not configured",
            Self::Database | Self::Internal | Self::Serialization => "An internal error occurred",
            Self::Network | Self::Timeout | Self::External => "An external service is unavailable",
            Self::Cancelled => "Report run was cancelled",
            Self::ShuttingDown => "Application is shutting down, cannot start new reports",
            Self::AlreadyRunning => "Report is already running",
            Self::VersionConflict => "Report was modified concurrently",
            Self::CredentialsNotFound => "Credentials not found",
            Self::CredentialsExpired => "Credentials have expired, please reconnect the account",
            Self::UnsupportedType => "This type is not supported",
            Self::NotFound => "Resource not found",
            Self::Unauthorized => "Access denied",
            Self::InvalidInput => "Invalid input",
            Self::BusinessViolation => "Operation is not allowed",
        }
    }
}

/// Structured error type with classification and context tracking.
#[must_use]
#[derive(Debug, Error)]
#[error("[{kind}]{}", message.as_ref().map(|m| format!(": {m}")).unwrap_or_default())]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Primary error message.
    pub message: Option<String>,
    /// Underlying source error, if any.
    #[source]
    pub source: Option<BoxedError>,
}

impl Error {
    /// Creates a new error with the given kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Creates a new error from a source error.
    pub fn from_source(kind: ErrorKind, source: impl Into<BoxedError>) -> Self {
        Self {
            kind,
            message: None,
            source: Some(source.into()),
        }
    }

    /// Adds a message to this error.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the source of the error.
    pub fn with_source(mut self, source: impl Into<BoxedError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Creates a new cancellation error.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled).with_message("Report run was cancelled")
    }

    /// Creates a new business violation error.
    pub fn business_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BusinessViolation).with_message(message)
    }

    /// Creates a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(message)
    }

    /// Creates a new invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput).with_message(message)
    }

    /// Returns the error kind.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error kind as a string.
    #[inline]
    pub fn kind_str(&self) -> &'static str {
        self.kind.into()
    }

    /// Returns whether this error is a cooperative cancellation.
    #[inline]
    pub fn is_cancellation(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    /// Returns whether this error is an expected domain policy block.
    #[inline]
    pub fn is_business_violation(&self) -> bool {
        self.kind == ErrorKind::BusinessViolation
    }

    /// Check if this error is retryable based on its kind.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns the message recorded on the run, falling back to the kind.
    pub fn message_or_kind(&self) -> String {
        match &self.message {
            Some(message) => message.clone(),
            None => self.kind.to_string(),
        }
    }

    /// Returns the text safe to hand to callers.
    ///
    /// Upstream authorization and infrastructure failures are replaced with a
    /// generic sentence; domain errors keep their own message.
    pub fn public_message(&self) -> String {
        let sanitized = self.kind.is_upstream_auth()
            || matches!(
                self.kind,
                ErrorKind::Database
                    | ErrorKind::Internal
                    | ErrorKind::Serialization
                    | ErrorKind::Network
                    | ErrorKind::Timeout
                    | ErrorKind::External
            );

        match &self.message {
            Some(message) if !sanitized => message.clone(),
            _ => self.kind.public_text().to_owned(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::from_source(ErrorKind::Serialization, error).with_message("Invalid JSON payload")
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::from_source(ErrorKind::Internal, error).with_message("I/O operation failed")
    }
}
