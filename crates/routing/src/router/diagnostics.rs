//! Attempt tracking for routing diagnostics.

use crate::models::BackendId;

/// Why a ranked backend was not called.
#[derive(Clone, Debug, PartialEq)]
pub enum SkipReason {
    /// Circuit breaker is tripped (or its half-open probe is already out).
    CircuitOpen,

    /// The backend's advertised request budget is exhausted.
    RateLimited,

    /// The backend was unregistered between ranking and the attempt.
    Unregistered,

    /// Fallback is disabled and an earlier candidate already failed.
    FallbackDisabled,

    /// The fetch ran out of time before this candidate's turn.
    DeadlineExceeded,
}

/// Record of a single backend during one fetch.
#[derive(Clone, Debug)]
pub struct BackendAttempt {
    pub backend_id: BackendId,
    pub skipped: Option<SkipReason>,
    pub error: Option<String>,
    pub success: bool,
    /// Attempt was part of a concurrent race.
    pub raced: bool,
}

/// Trail of every backend considered for one fetch.
#[derive(Clone, Debug, Default)]
pub struct FetchDiagnostics {
    pub attempts: Vec<BackendAttempt>,
    /// Response came from the cache without touching any backend.
    pub cache_hit: bool,
}

impl FetchDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_skip(&mut self, backend_id: BackendId, reason: SkipReason) {
        self.attempts.push(BackendAttempt {
            backend_id,
            skipped: Some(reason),
            error: None,
            success: false,
            raced: false,
        });
    }

    pub fn record_error(&mut self, backend_id: BackendId, error: String, raced: bool) {
        self.attempts.push(BackendAttempt {
            backend_id,
            skipped: None,
            error: Some(error),
            success: false,
            raced,
        });
    }

    pub fn record_success(&mut self, backend_id: BackendId, raced: bool) {
        self.attempts.push(BackendAttempt {
            backend_id,
            skipped: None,
            error: None,
            success: true,
            raced,
        });
    }

    /// Summary for logging/debugging.
    pub fn summary(&self) -> String {
        if self.cache_hit {
            return "CACHE: HIT".to_string();
        }
        self.attempts
            .iter()
            .map(|a| {
                let prefix = if a.raced { "race:" } else { "" };
                if a.success {
                    format!("{}{}: SUCCESS", prefix, a.backend_id)
                } else if let Some(skip) = &a.skipped {
                    format!("{}{}: SKIPPED ({:?})", prefix, a.backend_id, skip)
                } else if let Some(err) = &a.error {
                    format!("{}{}: ERROR ({})", prefix, a.backend_id, err)
                } else {
                    format!("{}{}: UNKNOWN", prefix, a.backend_id)
                }
            })
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    pub fn has_success(&self) -> bool {
        self.attempts.iter().any(|a| a.success)
    }

    /// Backends that were actually called, in order.
    pub fn called(&self) -> Vec<&BackendId> {
        self.attempts
            .iter()
            .filter(|a| a.skipped.is_none())
            .map(|a| &a.backend_id)
            .collect()
    }

    pub fn skip_reasons(&self) -> Vec<(&BackendId, &SkipReason)> {
        self.attempts
            .iter()
            .filter_map(|a| a.skipped.as_ref().map(|s| (&a.backend_id, s)))
            .collect()
    }

    pub fn errors(&self) -> Vec<(&BackendId, &str)> {
        self.attempts
            .iter()
            .filter_map(|a| a.error.as_deref().map(|e| (&a.backend_id, e)))
            .collect()
    }
}
