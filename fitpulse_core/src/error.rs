//! Error types for the fitpulse_core library.

use std::io;
use std::time::Duration;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for remote store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Core error type for fitpulse_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Remote store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// State management error
    #[error("State error: {0}")]
    State(String),

    /// Retry budget exhausted for a named operation
    #[error("'{operation}' failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        source: StoreError,
    },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// How the retry executor should treat a failed remote operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryClass {
    /// Transient failure, safe to retry after a delay
    Retryable,
    /// Terminal failure, retrying cannot succeed
    Fatal,
    /// Malformed request produced by caller logic; surfaced loudly, never retried
    Bug,
}

/// Category of remote store failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    /// No network connectivity at all
    NetworkUnavailable,
    /// Request started but the connection failed mid-flight
    NetworkFailure,
    /// Remote service is down or overloaded
    ServiceUnavailable,
    /// Request budget exceeded; server may suggest a retry-after
    RateLimited,
    /// Record or zone is busy (e.g. concurrent write in progress)
    Busy,
    /// Transient server-side error
    Internal,
    /// User is not authenticated with the remote store
    AuthRequired,
    /// Authenticated but not allowed to touch this record
    PermissionDenied,
    /// Server rejected an argument value
    InvalidArgument,
    /// Client and server schema versions are incompatible
    IncompatibleVersion,
    /// Record does not exist
    NotFound,
    /// Request was malformed by our own code
    BadRequest,
}

impl StoreErrorKind {
    /// Stable identifier used in logs and per-kind metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreErrorKind::NetworkUnavailable => "network_unavailable",
            StoreErrorKind::NetworkFailure => "network_failure",
            StoreErrorKind::ServiceUnavailable => "service_unavailable",
            StoreErrorKind::RateLimited => "rate_limited",
            StoreErrorKind::Busy => "busy",
            StoreErrorKind::Internal => "internal",
            StoreErrorKind::AuthRequired => "auth_required",
            StoreErrorKind::PermissionDenied => "permission_denied",
            StoreErrorKind::InvalidArgument => "invalid_argument",
            StoreErrorKind::IncompatibleVersion => "incompatible_version",
            StoreErrorKind::NotFound => "not_found",
            StoreErrorKind::BadRequest => "bad_request",
        }
    }

    /// Classify this kind for the retry executor
    pub fn retry_class(&self) -> RetryClass {
        match self {
            StoreErrorKind::NetworkUnavailable
            | StoreErrorKind::NetworkFailure
            | StoreErrorKind::ServiceUnavailable
            | StoreErrorKind::RateLimited
            | StoreErrorKind::Busy
            | StoreErrorKind::Internal => RetryClass::Retryable,

            StoreErrorKind::AuthRequired
            | StoreErrorKind::PermissionDenied
            | StoreErrorKind::InvalidArgument
            | StoreErrorKind::IncompatibleVersion
            | StoreErrorKind::NotFound => RetryClass::Fatal,

            StoreErrorKind::BadRequest => RetryClass::Bug,
        }
    }
}

impl std::fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error surfaced by the remote record store.
///
/// Carries a retryability classification and an optional server-suggested
/// retry-after delay. Cloneable so the operation queue can report a failure
/// to its stats while still delivering the original to the caller.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    /// A rate-limit error with the server-suggested retry-after delay
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self {
            kind: StoreErrorKind::RateLimited,
            message: format!("rate limited, retry after {:?}", retry_after),
            retry_after: Some(retry_after),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::NotFound, message)
    }

    /// Classification for the retry executor
    pub fn retry_class(&self) -> RetryClass {
        self.kind.retry_class()
    }

    /// True when the retry executor may attempt this operation again
    pub fn is_retryable(&self) -> bool {
        self.retry_class() == RetryClass::Retryable
    }
}
