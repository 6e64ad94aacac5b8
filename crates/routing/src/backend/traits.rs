//! Backend adapter trait definitions.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::RoutingError;
use crate::models::{DataRequest, Payload};

/// Successful outcome of an adapter call.
#[derive(Clone, Debug, PartialEq)]
pub struct BackendReply {
    pub payload: Payload,
    /// Adapter's own assessment of the answer's quality in `[0, 1]`.
    pub quality: Option<f64>,
}

impl BackendReply {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            quality: None,
        }
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = Some(quality);
        self
    }
}

/// Trait for data backends.
///
/// Implement this trait to add support for a new data source. Capability
/// metadata is not part of the trait: it is supplied once, as a
/// [`BackendDescriptor`](crate::models::BackendDescriptor), when the backend
/// is registered.
///
/// Ordinary failures (transport, rate limit, auth) are returned as `Err`.
/// Panics are reserved for programmer errors; the router still catches them
/// and reports `INTERNAL_ERROR`.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use sourcemesh_routing::backend::{BackendReply, DataBackend};
///
/// struct MyBackend {
///     api_key: String,
/// }
///
/// #[async_trait]
/// impl DataBackend for MyBackend {
///     fn id(&self) -> &str {
///         "MY_BACKEND"
///     }
///
///     async fn fetch(&self, request: &DataRequest) -> Result<BackendReply, RoutingError> {
///         // ... call the remote API
///     }
///
///     async fn health_check(&self) -> bool {
///         true
///     }
/// }
/// ```
#[async_trait]
pub trait DataBackend: Send + Sync {
    /// Identifier matching the descriptor this backend was registered under.
    fn id(&self) -> &str;

    /// Answer one request.
    async fn fetch(&self, request: &DataRequest) -> Result<BackendReply, RoutingError>;

    /// Cheap liveness probe.
    async fn health_check(&self) -> bool;
}

/// Constructor for a live backend, invoked lazily by the registry.
pub type BackendFactory =
    Arc<dyn Fn() -> Result<Arc<dyn DataBackend>, RoutingError> + Send + Sync>;

/// Factory that always hands out the same, already constructed backend.
pub fn shared_factory(backend: Arc<dyn DataBackend>) -> BackendFactory {
    Arc::new(move || Ok(Arc::clone(&backend)))
}
