//! Request routing module.
//!
//! This module provides the resilient fetch path, including:
//! - TTL response caching keyed by request fingerprint
//! - Circuit breaker pattern for failing backends
//! - Token bucket limiting for backends that advertise a budget
//! - Racing of top candidates and sequential fallback
//! - Diagnostic tracking for debugging backend selection

mod cache;
mod circuit_breaker;
mod diagnostics;
mod rate_limiter;
#[allow(clippy::module_inception)]
mod router;

pub use cache::{CacheHit, CacheStats, ResponseCache, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, CircuitState};
pub use diagnostics::{BackendAttempt, FetchDiagnostics, SkipReason};
pub use rate_limiter::RateLimiter;
pub use router::{BackendHealth, Router, RouterConfig};
