//! Token bucket rate limiter for backends that advertise a request budget.
//!
//! Each limited backend gets its own bucket sized from its descriptor's
//! [`RateLimitSpec`]. Backends without a spec are never limited. The router
//! only ever calls the non-blocking [`RateLimiter::try_acquire`]: a backend
//! that is out of tokens is skipped for this request rather than waited on,
//! so a request's timeout stays the upper bound on its duration.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::models::RateLimitSpec;

/// Token bucket for a single backend.
#[derive(Debug)]
struct TokenBucket {
    /// Current number of available tokens.
    tokens: f64,
    /// Last time the bucket was updated.
    last_update: Instant,
    /// Token refill rate (tokens per second).
    rate: f64,
    /// Maximum bucket capacity.
    capacity: f64,
    /// Spec the bucket was built from, to detect re-registration.
    spec: RateLimitSpec,
}

impl TokenBucket {
    fn from_spec(spec: &RateLimitSpec) -> Self {
        let capacity = f64::from(spec.burst.max(1));
        Self {
            tokens: capacity,
            last_update: Instant::now(),
            rate: f64::from(spec.requests_per_minute) / 60.0,
            capacity,
            spec: spec.clone(),
        }
    }

    /// Refill tokens based on elapsed time.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_update = now;
    }

    fn try_acquire(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_until_available(&mut self) -> Duration {
        self.refill();

        if self.tokens >= 1.0 || self.rate <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.rate)
        }
    }
}

/// Per-backend token bucket rate limiter.
///
/// Buckets are created lazily the first time a limited backend is asked for,
/// and rebuilt if the backend's spec changes.
#[derive(Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the buckets mutex, recovering from poison if necessary.
    fn lock_buckets(&self) -> MutexGuard<'_, HashMap<String, TokenBucket>> {
        self.buckets.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter buckets mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Try to take a token for the backend without waiting.
    ///
    /// Always succeeds when `spec` is `None`.
    pub fn try_acquire(&self, backend: &str, spec: Option<&RateLimitSpec>) -> bool {
        let Some(spec) = spec else {
            return true;
        };

        let mut buckets = self.lock_buckets();
        let bucket = buckets
            .entry(backend.to_string())
            .or_insert_with(|| TokenBucket::from_spec(spec));

        if bucket.spec != *spec {
            debug!("Rate limiter: spec changed for '{}', rebuilding bucket", backend);
            *bucket = TokenBucket::from_spec(spec);
        }

        let acquired = bucket.try_acquire();
        if !acquired {
            debug!(
                "Rate limiter: '{}' out of tokens, next in {:?}",
                backend,
                bucket.time_until_available()
            );
        }
        acquired
    }

    /// Remaining tokens for a backend, or `None` if it has no bucket yet.
    pub fn remaining_tokens(&self, backend: &str) -> Option<f64> {
        self.lock_buckets().get_mut(backend).map(|bucket| {
            bucket.refill();
            bucket.tokens
        })
    }

    /// Forget the bucket for a backend.
    pub fn reset(&self, backend: &str) {
        self.lock_buckets().remove(backend);
    }
}
