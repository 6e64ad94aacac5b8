//! Per-backend circuit breaker for fault tolerance.
//!
//! Implements the circuit breaker pattern to keep failing backends out of
//! routing. The circuit has three states:
//!
//! - **Closed**: Normal operation, requests are allowed through.
//! - **Open**: Backend tripped, requests are blocked until the cooldown elapses.
//! - **HalfOpen**: Cooldown elapsed; exactly one probe request is allowed.
//!
//! The probe's outcome decides: success fully closes the circuit, failure
//! re-trips it and restarts the cooldown.
//!
//! The circuit breaker is in-memory and resets on restart.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

/// Default number of consecutive failures before tripping the circuit.
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time a tripped circuit stays closed to traffic.
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CircuitState {
    /// Normal operation - requests are allowed.
    Closed,
    /// Backend tripped - requests are blocked.
    Open,
    /// Cooldown elapsed - a single probe is allowed (or is in flight).
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Failure tracking for a single backend.
#[derive(Debug, Default)]
struct BreakerState {
    /// Failures since the last success.
    consecutive_failures: u32,
    /// Failures since the breaker was created or reset.
    total_failures: u64,
    /// When the circuit last tripped. `None` while closed.
    tripped_at: Option<Instant>,
    /// A half-open probe has been handed out and hasn't reported back.
    probe_in_flight: bool,
}

impl BreakerState {
    fn state(&self, cooldown: Duration) -> CircuitState {
        match self.tripped_at {
            None => CircuitState::Closed,
            Some(_) if self.probe_in_flight => CircuitState::HalfOpen,
            Some(tripped_at) if tripped_at.elapsed() >= cooldown => CircuitState::HalfOpen,
            Some(_) => CircuitState::Open,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the circuit.
    pub failure_threshold: u32,
    /// Time a tripped circuit blocks traffic before allowing a probe.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// Per-backend circuit breaker.
///
/// Thread-safe: every transition happens under one lock, so concurrent
/// racing branches can record outcomes for the same backend safely.
pub struct CircuitBreaker {
    states: Mutex<HashMap<String, BreakerState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default settings.
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create a circuit breaker with custom configuration.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Lock the states mutex, recovering from poison if necessary.
    ///
    /// The worst case after recovery is slightly stale failure counts.
    fn lock_states(&self) -> MutexGuard<'_, HashMap<String, BreakerState>> {
        self.states.lock().unwrap_or_else(|poisoned| {
            warn!("Circuit breaker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Whether the backend is currently closed to traffic.
    ///
    /// Read-only: never claims the half-open probe. A backend whose cooldown
    /// has elapsed but whose probe is not yet taken is *not* blocked.
    pub fn is_blocked(&self, backend: &str) -> bool {
        self.lock_states()
            .get(backend)
            .is_some_and(|s| match s.state(self.config.cooldown) {
                CircuitState::Closed => false,
                CircuitState::Open => true,
                CircuitState::HalfOpen => s.probe_in_flight,
            })
    }

    /// Ask permission to send a request to the backend.
    ///
    /// Closed circuits always allow. After the cooldown, the first caller is
    /// handed the single half-open probe; everyone else is refused until the
    /// probe reports back through [`record_success`](Self::record_success),
    /// [`record_failure`](Self::record_failure) or
    /// [`release_probe`](Self::release_probe).
    pub fn try_acquire(&self, backend: &str) -> bool {
        let mut states = self.lock_states();
        let Some(state) = states.get_mut(backend) else {
            return true;
        };

        match state.state(self.config.cooldown) {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen if state.probe_in_flight => false,
            CircuitState::HalfOpen => {
                info!(
                    "Circuit breaker: '{}' cooldown elapsed, allowing half-open probe",
                    backend
                );
                state.probe_in_flight = true;
                true
            }
        }
    }

    /// Record a successful request. Fully closes the circuit.
    pub fn record_success(&self, backend: &str) {
        let mut states = self.lock_states();
        let state = states.entry(backend.to_string()).or_default();

        if state.tripped_at.is_some() {
            info!(
                "Circuit breaker: closing circuit for '{}' after successful probe",
                backend
            );
        } else if state.consecutive_failures > 0 {
            debug!(
                "Circuit breaker: success for '{}', failure count reset",
                backend
            );
        }

        state.consecutive_failures = 0;
        state.tripped_at = None;
        state.probe_in_flight = false;
    }

    /// Record a failed request.
    ///
    /// Trips the circuit once the consecutive count reaches the threshold.
    /// A failed half-open probe re-trips immediately and restarts the cooldown.
    pub fn record_failure(&self, backend: &str) {
        let mut states = self.lock_states();
        let state = states.entry(backend.to_string()).or_default();

        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.total_failures = state.total_failures.saturating_add(1);

        if state.probe_in_flight {
            info!(
                "Circuit breaker: half-open probe for '{}' failed, re-tripping",
                backend
            );
            state.probe_in_flight = false;
            state.tripped_at = Some(Instant::now());
        } else if state.tripped_at.is_some() {
            debug!(
                "Circuit breaker: additional failure for '{}' (already tripped)",
                backend
            );
        } else if state.consecutive_failures >= self.config.failure_threshold {
            info!(
                "Circuit breaker: tripping circuit for '{}' after {} consecutive failures",
                backend, state.consecutive_failures
            );
            state.tripped_at = Some(Instant::now());
        } else {
            debug!(
                "Circuit breaker: failure for '{}' ({}/{})",
                backend, state.consecutive_failures, self.config.failure_threshold
            );
        }
    }

    /// Hand back an unused half-open probe without recording an outcome.
    ///
    /// Used when a probe's call was abandoned or ended in a failure that
    /// doesn't reflect backend health.
    pub fn release_probe(&self, backend: &str) {
        let mut states = self.lock_states();
        if let Some(state) = states.get_mut(backend) {
            if state.probe_in_flight {
                debug!("Circuit breaker: releasing half-open probe for '{}'", backend);
                state.probe_in_flight = false;
            }
        }
    }

    /// Get the current state for a backend.
    pub fn state(&self, backend: &str) -> CircuitState {
        self.lock_states()
            .get(backend)
            .map(|s| s.state(self.config.cooldown))
            .unwrap_or(CircuitState::Closed)
    }

    /// Consecutive failures since the last success.
    pub fn consecutive_failures(&self, backend: &str) -> u32 {
        self.lock_states()
            .get(backend)
            .map(|s| s.consecutive_failures)
            .unwrap_or(0)
    }

    /// Reset the circuit for a backend to Closed state.
    pub fn reset(&self, backend: &str) {
        let mut states = self.lock_states();
        if states.remove(backend).is_some() {
            info!("Circuit breaker: manually resetting circuit for '{}'", backend);
        }
    }

    /// Reset all circuits to their initial state.
    pub fn reset_all(&self) {
        self.lock_states().clear();
        info!("Circuit breaker: all circuits reset");
    }

    /// Get metrics for all tracked backends.
    pub fn metrics(&self) -> Vec<CircuitMetrics> {
        let states = self.lock_states();
        let mut metrics: Vec<_> = states
            .iter()
            .map(|(backend, s)| CircuitMetrics {
                backend: backend.clone(),
                state: s.state(self.config.cooldown),
                consecutive_failures: s.consecutive_failures,
                total_failures: s.total_failures,
                tripped_at: s.tripped_at,
            })
            .collect();
        metrics.sort_by(|a, b| a.backend.cmp(&b.backend));
        metrics
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics for a single circuit.
#[derive(Clone, Debug)]
pub struct CircuitMetrics {
    pub backend: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    /// When the circuit last tripped, if it is not closed.
    pub tripped_at: Option<Instant>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_cooldown() -> CircuitBreaker {
        CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_millis(10),
        })
    }

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::new();
        assert!(cb.try_acquire("TEST"));
        assert!(!cb.is_blocked("TEST"));
        assert_eq!(cb.state("TEST"), CircuitState::Closed);
    }

    #[test]
    fn test_trips_at_exactly_five_failures() {
        let cb = CircuitBreaker::new();

        for _ in 0..4 {
            cb.record_failure("FLAKY");
        }
        assert_eq!(cb.state("FLAKY"), CircuitState::Closed);
        assert!(cb.try_acquire("FLAKY"));

        cb.record_failure("FLAKY");
        assert_eq!(cb.state("FLAKY"), CircuitState::Open);
        assert!(cb.is_blocked("FLAKY"));
        assert!(!cb.try_acquire("FLAKY"));
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let cb = CircuitBreaker::new();
        for _ in 0..5 {
            cb.record_failure("FLAKY");
        }
        assert_eq!(cb.consecutive_failures("FLAKY"), 5);

        cb.record_success("FLAKY");
        assert_eq!(cb.consecutive_failures("FLAKY"), 0);
        assert_eq!(cb.state("FLAKY"), CircuitState::Closed);
    }

    #[test]
    fn test_single_probe_after_cooldown() {
        let cb = fast_cooldown();
        cb.record_failure("RECOVERING");
        assert!(!cb.try_acquire("RECOVERING"));

        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cb.state("RECOVERING"), CircuitState::HalfOpen);
        assert!(!cb.is_blocked("RECOVERING"));
        assert!(cb.try_acquire("RECOVERING"));
        // Probe is out; nobody else gets through
        assert!(cb.is_blocked("RECOVERING"));
        assert!(!cb.try_acquire("RECOVERING"));
    }

    #[test]
    fn test_probe_success_closes() {
        let cb = fast_cooldown();
        cb.record_failure("HEALING");
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.try_acquire("HEALING"));

        cb.record_success("HEALING");
        assert_eq!(cb.state("HEALING"), CircuitState::Closed);
        assert!(cb.try_acquire("HEALING"));
        assert!(cb.try_acquire("HEALING"));
    }

    #[test]
    fn test_probe_failure_retrips_and_restarts_cooldown() {
        let cb = CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_millis(50),
        });
        cb.record_failure("RELAPSING");
        std::thread::sleep(Duration::from_millis(60));
        assert!(cb.try_acquire("RELAPSING"));

        cb.record_failure("RELAPSING");
        assert_eq!(cb.state("RELAPSING"), CircuitState::Open);
        assert!(!cb.try_acquire("RELAPSING"));
    }

    #[test]
    fn test_release_probe_allows_another_probe() {
        let cb = fast_cooldown();
        cb.record_failure("ABANDONED");
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.try_acquire("ABANDONED"));
        assert!(!cb.try_acquire("ABANDONED"));

        cb.release_probe("ABANDONED");
        assert!(cb.try_acquire("ABANDONED"));
    }

    #[test]
    fn test_manual_reset() {
        let cb = fast_cooldown();
        cb.record_failure("RESET");
        assert_eq!(cb.state("RESET"), CircuitState::Open);

        cb.reset("RESET");
        assert_eq!(cb.state("RESET"), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures("RESET"), 0);
    }

    #[test]
    fn test_backend_isolation() {
        let cb = fast_cooldown();
        cb.record_failure("A");
        assert!(!cb.try_acquire("A"));
        assert!(cb.try_acquire("B"));
        assert_eq!(cb.state("B"), CircuitState::Closed);
    }

    #[test]
    fn test_metrics() {
        let cb = CircuitBreaker::new();
        cb.record_failure("METRIC_A");
        cb.record_failure("METRIC_A");
        cb.record_failure("METRIC_B");
        cb.record_success("METRIC_B");

        let metrics = cb.metrics();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].backend, "METRIC_A");
        assert_eq!(metrics[0].consecutive_failures, 2);
        assert_eq!(metrics[1].consecutive_failures, 0);
        assert_eq!(metrics[1].total_failures, 1);
    }
}
