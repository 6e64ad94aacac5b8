//! Capability scoring for source selection.
//!
//! ```text
//! combined = (technical_weight * best_backend_quality + agent_weight * context_score)
//!            * importance * context_boost
//! total    = combined + recency_bonus + exploration_bonus
//! ```

use rand::Rng;

use crate::capability::LogicalCapability;
use crate::config::SelectorConfig;
use crate::context::MarketContext;
use crate::metrics::LearnedMetric;
use crate::outcome::ScoreBreakdown;

/// Weighted quality of a capability before bonuses.
pub fn combined_score(
    config: &SelectorConfig,
    best_backend_quality: f64,
    context_score: f64,
    importance: f64,
    context_boost: f64,
) -> f64 {
    (config.technical_weight * best_backend_quality + config.agent_weight * context_score)
        * importance
        * context_boost
}

/// Bonus that grows with idle cycles, bounded by `recency_cap`.
pub fn recency_bonus(config: &SelectorConfig, cycles_since_last_use: u64) -> f64 {
    (cycles_since_last_use as f64 * config.recency_step).min(config.recency_cap)
}

/// Whether a capability has been called less than its peers.
///
/// Never-called capabilities are always under-used.
pub fn is_underused(metric: &LearnedMetric, mean_calls: f64) -> bool {
    metric.total_calls == 0 || (metric.total_calls as f64) < mean_calls
}

/// Exploration bonus for one capability, drawn with probability epsilon.
pub fn exploration_bonus<R: Rng + ?Sized>(
    config: &SelectorConfig,
    underused: bool,
    rng: &mut R,
) -> f64 {
    if underused && config.exploration_rate > 0.0 && rng.gen::<f64>() < config.exploration_rate {
        config.exploration_bonus
    } else {
        0.0
    }
}

/// Full breakdown for one fulfillable capability.
pub fn score_capability<R: Rng + ?Sized>(
    config: &SelectorConfig,
    capability: &LogicalCapability,
    best_backend_quality: f64,
    metric: &LearnedMetric,
    mean_calls: f64,
    context: MarketContext,
    rng: &mut R,
) -> ScoreBreakdown {
    let combined = combined_score(
        config,
        best_backend_quality,
        metric.context_score(context),
        capability.importance,
        config.importance_boost(context, &capability.id),
    );
    ScoreBreakdown {
        combined,
        recency_bonus: recency_bonus(config, metric.cycles_since_last_use),
        exploration_bonus: exploration_bonus(config, is_underused(metric, mean_calls), rng),
        forced: false,
    }
}
