//! Learned per-capability performance metrics.
//!
//! Every learned value is an exponential moving average:
//!
//! ```text
//! new = (1 - alpha) * old + alpha * observation
//! ```
//!
//! Observations are always in `[0, 1]`, so the metrics stay there too.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::context::MarketContext;

/// Starting value for every smoothed metric.
pub const INITIAL_SCORE: f64 = 0.5;

/// One EMA step. The result is clamped to `[0, 1]`.
pub fn ema(old: f64, observation: f64, alpha: f64) -> f64 {
    ((1.0 - alpha) * old + alpha * observation).clamp(0.0, 1.0)
}

/// What the selector has learned about one logical capability.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LearnedMetric {
    pub success_rate: f64,
    pub quality_score: f64,
    /// Smoothed outcome per market context. Missing contexts have no history.
    #[serde(default)]
    pub context_scores: BTreeMap<MarketContext, f64>,
    pub cycles_since_last_use: u64,
    pub total_calls: u64,
    pub successful_calls: u64,
}

impl Default for LearnedMetric {
    fn default() -> Self {
        Self {
            success_rate: INITIAL_SCORE,
            quality_score: INITIAL_SCORE,
            context_scores: BTreeMap::new(),
            cycles_since_last_use: 0,
            total_calls: 0,
            successful_calls: 0,
        }
    }
}

impl LearnedMetric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Learned score for a context, or [`INITIAL_SCORE`] without history.
    pub fn context_score(&self, context: MarketContext) -> f64 {
        self.context_scores
            .get(&context)
            .copied()
            .unwrap_or(INITIAL_SCORE)
    }

    /// Fold one fetch outcome into the metric.
    ///
    /// `quality` is the observed quality: the backend's reported value (or
    /// 1.0) on success, 0.0 on failure.
    pub fn record(&mut self, success: bool, quality: f64, context: MarketContext, alpha: f64) {
        let quality = if quality.is_finite() {
            quality.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let hit = if success { 1.0 } else { 0.0 };

        self.success_rate = ema(self.success_rate, hit, alpha);
        self.quality_score = ema(self.quality_score, quality, alpha);

        let context_observation = if success { quality } else { 0.0 };
        let entry = self
            .context_scores
            .entry(context)
            .or_insert(INITIAL_SCORE);
        *entry = ema(*entry, context_observation, alpha);

        self.total_calls += 1;
        if success {
            self.successful_calls += 1;
        }
        self.cycles_since_last_use = 0;
    }

    /// Count one more cycle in which the capability was not selected.
    pub fn mark_idle(&mut self) {
        self.cycles_since_last_use = self.cycles_since_last_use.saturating_add(1);
    }

    /// Lifetime hit ratio from raw counters, as opposed to the smoothed rate.
    pub fn lifetime_success_ratio(&self) -> Option<f64> {
        if self.total_calls == 0 {
            None
        } else {
            Some(self.successful_calls as f64 / self.total_calls as f64)
        }
    }
}
