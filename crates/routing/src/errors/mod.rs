//! Error types and retry classification for the routing crate.
//!
//! This module provides:
//! - [`RoutingError`]: The main error enum for registry and adapter operations
//! - [`ErrorKind`]: Flat error code carried by failure responses
//! - [`RetryClass`]: Classification for breaker bookkeeping during fallback

mod retry;

pub use retry::RetryClass;

use std::any::Any;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during registry and backend operations.
///
/// Adapters return these from `fetch`; the router converts every one of them
/// into a failure [`DataResponse`](crate::models::DataResponse) at the call
/// boundary, so none of them escape a routing call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoutingError {
    /// Malformed registration or request. Rejected before anything is applied.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The adapter factory could not produce a live backend.
    #[error("Adapter init failed: {backend} - {message}")]
    AdapterInit {
        /// The backend whose factory failed
        backend: String,
        /// The factory's error message
        message: String,
    },

    /// The backend could not be reached or returned a transport-level error.
    #[error("Transport error: {backend} - {message}")]
    Transport {
        /// The backend that failed
        backend: String,
        /// The error message from the backend
        message: String,
    },

    /// The backend did not answer within the request timeout.
    #[error("Timeout: {backend}")]
    Timeout {
        /// The backend that timed out
        backend: String,
    },

    /// The backend rejected the call because of its own rate limits.
    #[error("Rate limited: {backend}")]
    RateLimited {
        /// The backend that rate limited the request
        backend: String,
    },

    /// The backend rejected our credentials.
    #[error("Auth failed: {backend}")]
    Auth {
        /// The backend that rejected the credentials
        backend: String,
    },

    /// The backend does not support this particular request shape.
    #[error("Not supported: {operation} by {backend}")]
    NotSupported {
        /// The operation that is not supported
        operation: String,
        /// The backend that doesn't support it
        backend: String,
    },

    /// No registered backend satisfies the request's hard requirements.
    #[error("No backends available")]
    NoBackendsAvailable,

    /// Every candidate backend was tried and all failed.
    #[error("All backends failed")]
    AllBackendsFailed,

    /// The adapter panicked or violated its contract.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RoutingError {
    /// Flat error code for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::AdapterInit { .. } => ErrorKind::AdapterInit,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Auth { .. } => ErrorKind::Auth,
            Self::NotSupported { .. } => ErrorKind::NotSupported,
            Self::NoBackendsAvailable => ErrorKind::NoBackendsAvailable,
            Self::AllBackendsFailed => ErrorKind::AllBackendsFailed,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns the retry classification for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use sourcemesh_routing::errors::{RetryClass, RoutingError};
    ///
    /// let error = RoutingError::Timeout { backend: "COINGECKO".to_string() };
    /// assert_eq!(error.retry_class(), RetryClass::FailoverWithPenalty);
    ///
    /// let error = RoutingError::Validation("empty symbol".to_string());
    /// assert_eq!(error.retry_class(), RetryClass::Never);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        self.kind().retry_class()
    }
}

/// Error code carried by failure responses.
///
/// Rate limit and auth failures keep their own code for observability even
/// though the breaker treats them exactly like transport failures.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    AdapterInit,
    Transport,
    Timeout,
    RateLimited,
    Auth,
    NotSupported,
    NoBackendsAvailable,
    AllBackendsFailed,
    Internal,
}

impl ErrorKind {
    /// Stable string code, e.g. `"ALL_BACKENDS_FAILED"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::AdapterInit => "ADAPTER_INIT_ERROR",
            Self::Transport => "TRANSPORT_ERROR",
            Self::Timeout => "TIMEOUT_ERROR",
            Self::RateLimited => "RATE_LIMIT_ERROR",
            Self::Auth => "AUTH_ERROR",
            Self::NotSupported => "NOT_SUPPORTED",
            Self::NoBackendsAvailable => "NO_BACKENDS_AVAILABLE",
            Self::AllBackendsFailed => "ALL_BACKENDS_FAILED",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// How the router treats a failure of this kind.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            // Per-call failures - penalize the breaker, then fall back
            Self::AdapterInit
            | Self::Transport
            | Self::Timeout
            | Self::RateLimited
            | Self::Auth
            | Self::Internal => RetryClass::FailoverWithPenalty,

            // The backend can't answer this shape; another one might
            Self::NotSupported => RetryClass::NextBackend,

            // Terminal
            Self::Validation | Self::NoBackendsAvailable | Self::AllBackendsFailed => {
                RetryClass::Never
            }
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
