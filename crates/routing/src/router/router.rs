//! Request router for orchestrating data backends.
//!
//! The router owns everything that changes per call, handling:
//! - Cache lookup and population
//! - Candidate ranking through the capability registry
//! - Circuit breaking and advertised rate limits per backend
//! - Optional racing of the top candidates
//! - Sequential fallback (explicit opt-in)
//! - Diagnostic tracking for debugging backend selection

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use log::{debug, info, warn};

use super::cache::{CacheStats, ResponseCache, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL};
use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, CircuitState};
use super::diagnostics::{FetchDiagnostics, SkipReason};
use super::rate_limiter::RateLimiter;
use crate::backend::BackendReply;
use crate::errors::{panic_message, ErrorKind, RetryClass, RoutingError};
use crate::models::{BackendId, DataRequest, DataResponse, ResponseError};
use crate::registry::CapabilityRegistry;

/// Default number of backends raced concurrently.
const DEFAULT_RACING_WIDTH: usize = 2;

/// Default upper bound for a single health check.
const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default upper bound for one whole fetch, fallback included.
const DEFAULT_FETCH_DEADLINE: Duration = Duration::from_secs(30);

/// Router configuration. Fixed at construction.
#[derive(Clone, Debug, PartialEq)]
pub struct RouterConfig {
    /// Advance to the next candidate after a failure.
    pub enable_fallback: bool,
    /// Issue the top candidates concurrently and take the first success.
    pub enable_racing: bool,
    /// How many candidates to race.
    pub racing_width: usize,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub breaker: CircuitBreakerConfig,
    pub health_check_timeout: Duration,
    /// Wall-clock budget for one fetch across every attempt. Each attempt is
    /// bounded by the smaller of the request timeout and what is left of this.
    pub fetch_deadline: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            enable_fallback: true,
            enable_racing: false,
            racing_width: DEFAULT_RACING_WIDTH,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_max_entries: DEFAULT_CACHE_CAPACITY,
            breaker: CircuitBreakerConfig::default(),
            health_check_timeout: DEFAULT_HEALTH_CHECK_TIMEOUT,
            fetch_deadline: DEFAULT_FETCH_DEADLINE,
        }
    }
}

impl RouterConfig {
    pub fn validate(&self) -> Result<(), RoutingError> {
        if self.enable_racing && self.racing_width < 2 {
            return Err(RoutingError::Validation(format!(
                "Racing width must be at least 2, got {}",
                self.racing_width
            )));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(RoutingError::Validation(
                "Breaker failure threshold must be at least 1".to_string(),
            ));
        }
        if self.cache_max_entries == 0 {
            return Err(RoutingError::Validation(
                "Cache capacity must be at least 1".to_string(),
            ));
        }
        if self.health_check_timeout.is_zero() {
            return Err(RoutingError::Validation(
                "Health check timeout must be greater than zero".to_string(),
            ));
        }
        if self.fetch_deadline.is_zero() {
            return Err(RoutingError::Validation(
                "Fetch deadline must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Health of one registered backend.
#[derive(Clone, Debug)]
pub struct BackendHealth {
    pub backend_id: BackendId,
    pub healthy: bool,
    pub circuit_state: CircuitState,
    pub latency: Duration,
    pub error: Option<String>,
}

/// Outcome of a single backend attempt.
enum Attempt {
    Skipped(SkipReason),
    Succeeded(BackendReply),
    Failed(RoutingError),
}

/// Releases a half-open probe that was claimed but never reported.
///
/// Covers attempts dropped mid-flight when a race is won by another backend.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    backend: &'a str,
    armed: bool,
}

impl<'a> ProbeGuard<'a> {
    fn new(breaker: &'a CircuitBreaker, backend: &'a str) -> Self {
        Self {
            breaker,
            backend,
            armed: true,
        }
    }

    fn success(mut self) {
        self.armed = false;
        self.breaker.record_success(self.backend);
    }

    fn failure(mut self) {
        self.armed = false;
        self.breaker.record_failure(self.backend);
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_probe(self.backend);
        }
    }
}

/// Routes requests to registered backends.
///
/// Explicitly constructed and owned by the composition root; tests build
/// fresh instances instead of resetting shared state.
pub struct Router {
    registry: Arc<CapabilityRegistry>,
    cache: ResponseCache,
    circuit_breaker: CircuitBreaker,
    rate_limiter: RateLimiter,
    config: RouterConfig,
}

impl Router {
    /// Create a router with default configuration.
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        let config = RouterConfig::default();
        Self {
            registry,
            cache: ResponseCache::new(config.cache_ttl, config.cache_max_entries),
            circuit_breaker: CircuitBreaker::with_config(config.breaker.clone()),
            rate_limiter: RateLimiter::new(),
            config,
        }
    }

    /// Create a router with custom configuration.
    pub fn with_config(
        registry: Arc<CapabilityRegistry>,
        config: RouterConfig,
    ) -> Result<Self, RoutingError> {
        config.validate()?;
        Ok(Self {
            registry,
            cache: ResponseCache::new(config.cache_ttl, config.cache_max_entries),
            circuit_breaker: CircuitBreaker::with_config(config.breaker.clone()),
            rate_limiter: RateLimiter::new(),
            config,
        })
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Route one request.
    ///
    /// Never returns `Err`: validation problems, exhausted candidates and
    /// adapter failures all come back as a failure response.
    pub async fn fetch(&self, request: &DataRequest) -> DataResponse {
        self.fetch_with_diagnostics(request).await.0
    }

    /// Route one request and report every backend that was considered.
    ///
    /// Steps:
    /// 1. Validate the request
    /// 2. Serve an unexpired cache entry if caching is enabled
    /// 3. Rank candidates through the registry (preferred backend first)
    /// 4. Drop candidates whose circuit is open
    /// 5. Race the top candidates if racing is enabled and at least two remain
    /// 6. Try the rest sequentially, advancing only if fallback is enabled
    ///
    /// Candidates still untried when `fetch_deadline` runs out are skipped.
    pub async fn fetch_with_diagnostics(
        &self,
        request: &DataRequest,
    ) -> (DataResponse, FetchDiagnostics) {
        let requested_at = Utc::now();
        let started = Instant::now();
        let deadline = started + self.config.fetch_deadline;
        let mut diagnostics = FetchDiagnostics::new();

        if let Err(e) = request.validate() {
            warn!("Router: rejecting invalid request: {}", e);
            return (
                DataResponse::failure(None, e.into(), requested_at, started.elapsed()),
                diagnostics,
            );
        }

        let fingerprint = request.fingerprint();
        if request.use_cache {
            if let Some(hit) = self.cache.get(&fingerprint) {
                debug!(
                    "Router: cache hit for {} {} (age {:?})",
                    request.category, request.symbol, hit.age
                );
                diagnostics.cache_hit = true;
                let response =
                    hit.response
                        .served_from_cache(hit.age, requested_at, started.elapsed());
                return (response, diagnostics);
            }
        }

        let ranked = self.ordered_candidates(request);
        if ranked.is_empty() {
            warn!(
                "Router: no backends available for {} {}",
                request.category, request.symbol
            );
            return (
                DataResponse::failure(
                    None,
                    RoutingError::NoBackendsAvailable.into(),
                    requested_at,
                    started.elapsed(),
                ),
                diagnostics,
            );
        }

        let mut candidates: Vec<BackendId> = Vec::with_capacity(ranked.len());
        for backend_id in ranked {
            if self.circuit_breaker.is_blocked(&backend_id) {
                diagnostics.record_skip(backend_id, SkipReason::CircuitOpen);
            } else {
                candidates.push(backend_id);
            }
        }

        if candidates.is_empty() {
            warn!(
                "Router: every candidate for {} {} has an open circuit. Diagnostics: {}",
                request.category,
                request.symbol,
                diagnostics.summary()
            );
            let error = ResponseError {
                kind: ErrorKind::NoBackendsAvailable,
                message: "All candidate backends have open circuits".to_string(),
            };
            return (
                DataResponse::failure(None, error, requested_at, started.elapsed()),
                diagnostics,
            );
        }

        let mut last_failure: Option<(BackendId, RoutingError)> = None;

        if self.config.enable_racing && candidates.len() >= 2 {
            let width = self.config.racing_width.min(candidates.len());
            let racers: Vec<BackendId> = candidates.drain(..width).collect();

            match self.race(&racers, request, deadline, &mut diagnostics).await {
                Ok((backend_id, reply)) => {
                    let response = self.complete(
                        backend_id,
                        reply,
                        request,
                        fingerprint,
                        requested_at,
                        started,
                    );
                    return (response, diagnostics);
                }
                Err(failure) => {
                    if failure.is_some() {
                        last_failure = failure;
                    }
                    if !self.config.enable_fallback {
                        if let Some((backend_id, error)) = last_failure {
                            for rest in candidates {
                                diagnostics.record_skip(rest, SkipReason::FallbackDisabled);
                            }
                            return (
                                DataResponse::failure(
                                    Some(backend_id),
                                    error.into(),
                                    requested_at,
                                    started.elapsed(),
                                ),
                                diagnostics,
                            );
                        }
                    }
                }
            }
        }

        let mut deadline_exceeded = false;
        let mut remaining = candidates.into_iter();
        while let Some(backend_id) = remaining.next() {
            if Instant::now() >= deadline {
                deadline_exceeded = true;
                diagnostics.record_skip(backend_id, SkipReason::DeadlineExceeded);
                for rest in remaining.by_ref() {
                    diagnostics.record_skip(rest, SkipReason::DeadlineExceeded);
                }
                break;
            }
            match self.attempt(&backend_id, request, deadline).await {
                Attempt::Skipped(reason) => {
                    debug!("Router: skipping '{}' ({:?})", backend_id, reason);
                    diagnostics.record_skip(backend_id, reason);
                }
                Attempt::Succeeded(reply) => {
                    diagnostics.record_success(backend_id.clone(), false);
                    let response = self.complete(
                        backend_id,
                        reply,
                        request,
                        fingerprint,
                        requested_at,
                        started,
                    );
                    return (response, diagnostics);
                }
                Attempt::Failed(error) => {
                    debug!("Router: '{}' failed with {}", backend_id, error);
                    diagnostics.record_error(backend_id.clone(), error.to_string(), false);

                    let terminal = error.retry_class() == RetryClass::Never;
                    if terminal || !self.config.enable_fallback {
                        for rest in remaining.by_ref() {
                            diagnostics.record_skip(rest, SkipReason::FallbackDisabled);
                        }
                        return (
                            DataResponse::failure(
                                Some(backend_id),
                                error.into(),
                                requested_at,
                                started.elapsed(),
                            ),
                            diagnostics,
                        );
                    }

                    last_failure = Some((backend_id, error));
                }
            }
        }

        warn!(
            "Router: all backends failed for {} {}. Diagnostics: {}",
            request.category,
            request.symbol,
            diagnostics.summary()
        );
        let mut message = match &last_failure {
            Some((backend_id, error)) => {
                format!("All backends failed; last error from '{}': {}", backend_id, error)
            }
            None => "All backends failed; none could be attempted".to_string(),
        };
        if deadline_exceeded {
            message.push_str(&format!(
                " (fetch deadline of {:?} exceeded)",
                self.config.fetch_deadline
            ));
        }
        let error = ResponseError {
            kind: ErrorKind::AllBackendsFailed,
            message,
        };
        let last_backend = last_failure.map(|(backend_id, _)| backend_id);
        (
            DataResponse::failure(last_backend, error, requested_at, started.elapsed()),
            diagnostics,
        )
    }

    /// Ranked candidate ids with the preferred backend (if ranked) moved to the front.
    fn ordered_candidates(&self, request: &DataRequest) -> Vec<BackendId> {
        let mut ranked: Vec<BackendId> = self
            .registry
            .rank(request)
            .into_iter()
            .map(|(id, _)| id)
            .collect();

        if let Some(preferred) = &request.preferred_backend {
            if let Some(pos) = ranked.iter().position(|id| id == preferred) {
                let id = ranked.remove(pos);
                ranked.insert(0, id);
            } else {
                debug!(
                    "Router: preferred backend '{}' is not eligible for {}",
                    preferred, request.category
                );
            }
        }
        ranked
    }

    /// Issue every racer concurrently; the first success wins.
    ///
    /// Losing attempts still in flight are dropped with the stream. Returns
    /// the last failure when nobody succeeds.
    async fn race(
        &self,
        racers: &[BackendId],
        request: &DataRequest,
        deadline: Instant,
        diagnostics: &mut FetchDiagnostics,
    ) -> Result<(BackendId, BackendReply), Option<(BackendId, RoutingError)>> {
        debug!("Router: racing {:?}", racers);

        let mut in_flight: FuturesUnordered<_> = racers
            .iter()
            .map(|backend_id| async move { (backend_id, self.attempt(backend_id, request, deadline).await) })
            .collect();

        let mut last_failure = None;
        while let Some((backend_id, attempt)) = in_flight.next().await {
            match attempt {
                Attempt::Skipped(reason) => {
                    diagnostics.record_skip(backend_id.clone(), reason);
                }
                Attempt::Succeeded(reply) => {
                    info!("Router: '{}' won the race", backend_id);
                    diagnostics.record_success(backend_id.clone(), true);
                    return Ok((backend_id.clone(), reply));
                }
                Attempt::Failed(error) => {
                    diagnostics.record_error(backend_id.clone(), error.to_string(), true);
                    last_failure = Some((backend_id.clone(), error));
                }
            }
        }

        Err(last_failure)
    }

    /// Call one backend, honoring its breaker, rate limit and the request timeout.
    async fn attempt(
        &self,
        backend_id: &BackendId,
        request: &DataRequest,
        deadline: Instant,
    ) -> Attempt {
        let id: &str = backend_id;

        let Some(descriptor) = self.registry.get(id) else {
            return Attempt::Skipped(SkipReason::Unregistered);
        };

        if !self.circuit_breaker.try_acquire(id) {
            return Attempt::Skipped(SkipReason::CircuitOpen);
        }
        let guard = ProbeGuard::new(&self.circuit_breaker, id);

        if !self
            .rate_limiter
            .try_acquire(id, descriptor.rate_limit.as_ref())
        {
            return Attempt::Skipped(SkipReason::RateLimited);
        }

        let backend = match self.registry.instantiate(id) {
            Ok(Some(backend)) => backend,
            Ok(None) => return Attempt::Skipped(SkipReason::Unregistered),
            Err(e) => {
                warn!("Router: could not instantiate '{}': {}", id, e);
                guard.failure();
                return Attempt::Failed(e);
            }
        };

        let limit = request
            .timeout
            .min(deadline.saturating_duration_since(Instant::now()));
        let call = AssertUnwindSafe(backend.fetch(request)).catch_unwind();
        let result = match tokio::time::timeout(limit, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(RoutingError::Internal(format!(
                "Backend '{}' panicked: {}",
                id,
                panic_message(panic.as_ref())
            ))),
            Err(_) => Err(RoutingError::Timeout {
                backend: id.to_string(),
            }),
        };

        let result = result.and_then(|reply| {
            if reply.payload.fits(request.category) {
                Ok(reply)
            } else {
                Err(RoutingError::Internal(format!(
                    "Backend '{}' returned a payload that does not fit {}",
                    id, request.category
                )))
            }
        });

        match result {
            Ok(reply) => {
                guard.success();
                Attempt::Succeeded(reply)
            }
            Err(error) => {
                if error.retry_class() == RetryClass::FailoverWithPenalty {
                    guard.failure();
                }
                Attempt::Failed(error)
            }
        }
    }

    /// Build the success response and cache it.
    fn complete(
        &self,
        backend_id: BackendId,
        reply: BackendReply,
        request: &DataRequest,
        fingerprint: String,
        requested_at: chrono::DateTime<Utc>,
        started: Instant,
    ) -> DataResponse {
        let response = DataResponse::success(
            backend_id,
            reply.payload,
            reply.quality,
            requested_at,
            started.elapsed(),
        );
        if request.use_cache {
            self.cache.insert(fingerprint, response.clone());
        }
        response
    }

    /// Run every registered backend's health check concurrently.
    ///
    /// Health checks are observational: they don't move the breaker.
    pub async fn health_check_all(&self) -> Vec<BackendHealth> {
        let ids: Vec<BackendId> = self
            .registry
            .descriptors()
            .iter()
            .map(|d| d.id.clone())
            .collect();

        join_all(ids.into_iter().map(|id| self.check_health(id))).await
    }

    async fn check_health(&self, backend_id: BackendId) -> BackendHealth {
        let started = Instant::now();
        let circuit_state = self.circuit_breaker.state(&backend_id);

        let (healthy, error) = match self.registry.instantiate(&backend_id) {
            Ok(Some(backend)) => {
                let probe = AssertUnwindSafe(backend.health_check()).catch_unwind();
                match tokio::time::timeout(self.config.health_check_timeout, probe).await {
                    Ok(Ok(healthy)) => (healthy, None),
                    Ok(Err(panic)) => (
                        false,
                        Some(format!("Health check panicked: {}", panic_message(panic.as_ref()))),
                    ),
                    Err(_) => (false, Some("Health check timed out".to_string())),
                }
            }
            Ok(None) => (false, Some("Backend is not registered".to_string())),
            Err(e) => (false, Some(e.to_string())),
        };

        if !healthy {
            debug!("Router: health check failed for '{}': {:?}", backend_id, error);
        }

        BackendHealth {
            backend_id,
            healthy,
            circuit_state,
            latency: started.elapsed(),
            error,
        }
    }

    pub fn circuit_state(&self, backend_id: &str) -> CircuitState {
        self.circuit_breaker.state(backend_id)
    }

    pub fn circuit_metrics(&self) -> Vec<CircuitMetrics> {
        self.circuit_breaker.metrics()
    }

    pub fn reset_circuit(&self, backend_id: &str) {
        self.circuit_breaker.reset(backend_id);
    }

    pub fn reset_all_circuits(&self) {
        self.circuit_breaker.reset_all();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop the cached response for a request, if any.
    pub fn invalidate(&self, request: &DataRequest) -> bool {
        self.cache.invalidate(&request.fingerprint())
    }

    pub fn purge_expired_cache(&self) -> usize {
        self.cache.purge_expired()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}
