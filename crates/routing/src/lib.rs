//! Sourcemesh Routing Crate
//!
//! Routes data requests for financial symbols to one of many heterogeneous
//! backends, picking the best candidate for each request and surviving the
//! failure of any of them.
//!
//! # Overview
//!
//! ```text
//! +------------------+     +--------------------+
//! |   DataRequest    | --> |  ResponseCache     |  (fingerprint -> response)
//! +------------------+     +--------------------+
//!                                  | miss
//!                                  v
//!                          +--------------------+
//!                          | CapabilityRegistry |  (filter + score + rank)
//!                          +--------------------+
//!                                  |
//!                                  v
//!                          +--------------------+
//!                          |   CircuitBreaker   |  (drop tripped backends)
//!                          +--------------------+
//!                                  |
//!                                  v
//!                          +--------------------+
//!                          |  race / fallback   |  (DataBackend adapters)
//!                          +--------------------+
//!                                  |
//!                                  v
//!                          +--------------------+
//!                          |    DataResponse    |
//!                          +--------------------+
//! ```
//!
//! # Core Types
//!
//! - [`BackendDescriptor`] - Static capability metadata for one backend
//! - [`DataRequest`] - What to fetch, with hard and soft feature constraints
//! - [`DataResponse`] - Routed result; failures are values, not errors
//! - [`CapabilityRegistry`] - Backend discovery and ranking
//! - [`Router`] - Cache, breaker, racing and fallback around the registry
//! - [`DataBackend`] - The adapter contract

pub mod backend;
pub mod errors;
pub mod models;
pub mod registry;
pub mod router;

pub use backend::{shared_factory, BackendFactory, BackendReply, DataBackend};
pub use errors::{ErrorKind, RetryClass, RoutingError};
pub use models::{
    BackendDescriptor, BackendId, Candle, CostClass, DataCategory, DataRequest, DataResponse,
    FeatureTag, LatencyClass, MetricReading, OrderBookLevel, OrderBookSnapshot, ParamValue,
    Payload, PricePoint, Priority, RateLimitSpec, ResponseError, Symbol, TimeRange,
};
pub use registry::{validate_descriptor, CapabilityRegistry, RankCriteria};
pub use router::{
    BackendHealth, CacheStats, CircuitBreakerConfig, CircuitMetrics, CircuitState,
    FetchDiagnostics, Router, RouterConfig, SkipReason,
};
