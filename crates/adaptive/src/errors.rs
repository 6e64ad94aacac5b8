//! Error types for the adaptive selection crate.
//!
//! Routing failures never show up here: the router reports those as failure
//! responses and the selector folds them into per-capability outcomes. These
//! errors cover construction and the optional collaborators.

use sourcemesh_routing::RoutingError;
use thiserror::Error;

/// Type alias for Result using the selector error type.
pub type Result<T> = std::result::Result<T, SelectorError>;

#[derive(Error, Debug)]
pub enum SelectorError {
    /// Configuration or capability table rejected at construction.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The decision store failed a read or write.
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// The signal bus failed to publish, poll or acknowledge.
    #[error("Signal bus failed: {0}")]
    SignalBus(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Routing(#[from] RoutingError),
}
