//! Selector configuration.
//!
//! Static for the lifetime of a selector. Every field has a default, so a
//! partial JSON document is a valid configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::{ContextThresholds, MarketContext};
use crate::errors::{Result, SelectorError};
use crate::signals::TriggerRule;

/// How many capabilities a cycle selects, by context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesPerContext {
    pub high_volatility: usize,
    pub low_volatility: usize,
    /// Bullish, bearish and neutral.
    pub default: usize,
}

impl Default for SourcesPerContext {
    fn default() -> Self {
        Self {
            high_volatility: 5,
            low_volatility: 2,
            default: 3,
        }
    }
}

impl SourcesPerContext {
    pub fn for_context(&self, context: MarketContext) -> usize {
        match context {
            MarketContext::HighVolatility => self.high_volatility,
            MarketContext::LowVolatility => self.low_volatility,
            _ => self.default,
        }
    }
}

/// Context → capability id → importance multiplier. Missing entries are 1.0.
pub type ImportanceBoosts = BTreeMap<MarketContext, BTreeMap<String, f64>>;

fn default_importance_boosts() -> ImportanceBoosts {
    let table: [(MarketContext, &[(&str, f64)]); 4] = [
        (
            MarketContext::HighVolatility,
            &[
                ("order_book_depth", 1.3),
                ("liquidations", 1.4),
                ("funding_rates", 1.2),
                ("recent_trades", 1.2),
            ],
        ),
        (
            MarketContext::LowVolatility,
            &[("on_chain_activity", 1.2), ("macro_backdrop", 1.1)],
        ),
        (
            MarketContext::Bullish,
            &[("market_sentiment", 1.2), ("open_interest", 1.1)],
        ),
        (
            MarketContext::Bearish,
            &[("liquidations", 1.3), ("news_flow", 1.2)],
        ),
    ];

    table
        .into_iter()
        .map(|(context, boosts)| {
            let boosts = boosts
                .iter()
                .map(|(id, boost)| (id.to_string(), *boost))
                .collect();
            (context, boosts)
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Identity used for signals and persistence keys.
    pub agent_id: String,
    /// EMA smoothing factor (alpha).
    pub learning_rate: f64,
    /// Probability (epsilon) that an under-used capability gets the exploration bonus.
    pub exploration_rate: f64,
    pub exploration_bonus: f64,
    /// Weight of the best matching backend's registry quality.
    pub technical_weight: f64,
    /// Weight of the learned context score.
    pub agent_weight: f64,
    /// Recency bonus per idle cycle.
    pub recency_step: f64,
    pub recency_cap: f64,
    pub thresholds: ContextThresholds,
    pub sources_per_context: SourcesPerContext,
    pub importance_boosts: ImportanceBoosts,
    /// Upper bound on concurrent fetches within a cycle.
    pub max_concurrency: usize,
    pub request_timeout_ms: u64,
    /// Seed for exploration draws. Entropy-seeded when absent.
    pub rng_seed: Option<u64>,
    pub trigger_rules: Vec<TriggerRule>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            agent_id: "default-agent".to_string(),
            learning_rate: 0.1,
            exploration_rate: 0.2,
            exploration_bonus: 1.0,
            technical_weight: 0.6,
            agent_weight: 0.4,
            recency_step: 0.02,
            recency_cap: 0.2,
            thresholds: ContextThresholds::default(),
            sources_per_context: SourcesPerContext::default(),
            importance_boosts: default_importance_boosts(),
            max_concurrency: 4,
            request_timeout_ms: 10_000,
            rng_seed: None,
            trigger_rules: Vec::new(),
        }
    }
}

impl SelectorConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn with_trigger_rule(mut self, rule: TriggerRule) -> Self {
        self.trigger_rules.push(rule);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Importance multiplier for a capability in a context.
    pub fn importance_boost(&self, context: MarketContext, capability_id: &str) -> f64 {
        self.importance_boosts
            .get(&context)
            .and_then(|boosts| boosts.get(capability_id))
            .copied()
            .unwrap_or(1.0)
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent_id.trim().is_empty() {
            return Err(config_error("agent_id cannot be empty"));
        }
        for (name, value) in [
            ("learning_rate", self.learning_rate),
            ("exploration_rate", self.exploration_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(config_error(format!("{} must be within [0, 1], got {}", name, value)));
            }
        }
        for (name, value) in [
            ("exploration_bonus", self.exploration_bonus),
            ("technical_weight", self.technical_weight),
            ("agent_weight", self.agent_weight),
            ("recency_step", self.recency_step),
            ("recency_cap", self.recency_cap),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(config_error(format!("{} must be a non-negative number", name)));
            }
        }
        if self.max_concurrency == 0 {
            return Err(config_error("max_concurrency must be at least 1"));
        }
        for (name, value) in [
            ("high_volatility", self.sources_per_context.high_volatility),
            ("low_volatility", self.sources_per_context.low_volatility),
            ("default", self.sources_per_context.default),
        ] {
            if value == 0 {
                return Err(config_error(format!(
                    "sources_per_context.{} must be at least 1",
                    name
                )));
            }
        }
        if self.request_timeout_ms == 0 {
            return Err(config_error("request_timeout_ms must be greater than zero"));
        }
        self.thresholds.validate().map_err(config_error)?;

        for boosts in self.importance_boosts.values() {
            if let Some((id, boost)) = boosts.iter().find(|(_, b)| !b.is_finite() || **b < 0.0) {
                return Err(config_error(format!(
                    "importance boost for '{}' must be a non-negative number, got {}",
                    id, boost
                )));
            }
        }
        for rule in &self.trigger_rules {
            if rule.name.trim().is_empty() {
                return Err(config_error("trigger rule name cannot be empty"));
            }
        }
        Ok(())
    }
}

fn config_error(message: impl Into<String>) -> SelectorError {
    SelectorError::Config(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::TriggerCondition;

    #[test]
    fn test_defaults_are_valid() {
        let config = SelectorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.learning_rate, 0.1);
        assert_eq!(config.exploration_rate, 0.2);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = SelectorConfig::from_json_str(
            r#"{
                "agent_id": "trader-1",
                "learning_rate": 0.25,
                "sources_per_context": { "high_volatility": 6 },
                "trigger_rules": [
                    { "name": "failures", "condition": { "when": "on_failure" } }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.agent_id, "trader-1");
        assert_eq!(config.learning_rate, 0.25);
        assert_eq!(config.exploration_rate, 0.2);
        assert_eq!(config.sources_per_context.for_context(MarketContext::HighVolatility), 6);
        assert_eq!(config.sources_per_context.for_context(MarketContext::Bullish), 3);
        assert_eq!(config.trigger_rules[0].condition, TriggerCondition::OnFailure);
    }

    #[test]
    fn test_out_of_range_rates_rejected() {
        assert!(SelectorConfig::from_json_str(r#"{ "learning_rate": 1.5 }"#).is_err());
        assert!(SelectorConfig::from_json_str(r#"{ "exploration_rate": -0.1 }"#).is_err());
        assert!(SelectorConfig::from_json_str(r#"{ "max_concurrency": 0 }"#).is_err());
        assert!(SelectorConfig::from_json_str(r#"{ "agent_weight": -1.0 }"#).is_err());
    }

    #[test]
    fn test_zero_sources_per_context_rejected() {
        for json in [
            r#"{ "sources_per_context": { "high_volatility": 0 } }"#,
            r#"{ "sources_per_context": { "low_volatility": 0 } }"#,
            r#"{ "sources_per_context": { "default": 0 } }"#,
        ] {
            assert!(
                matches!(SelectorConfig::from_json_str(json), Err(SelectorError::Config(_))),
                "accepted {}",
                json
            );
        }
    }

    #[test]
    fn test_malformed_json_is_serialization_error() {
        assert!(matches!(
            SelectorConfig::from_json_str("{ not json"),
            Err(SelectorError::Serialization(_))
        ));
    }

    #[test]
    fn test_importance_boost_lookup() {
        let config = SelectorConfig::default();
        assert_eq!(config.importance_boost(MarketContext::HighVolatility, "liquidations"), 1.4);
        assert_eq!(config.importance_boost(MarketContext::Neutral, "liquidations"), 1.0);
        assert_eq!(config.importance_boost(MarketContext::Bullish, "unknown"), 1.0);
    }

    #[test]
    fn test_boosts_keyed_by_context_name() {
        let config = SelectorConfig::from_json_str(
            r#"{ "importance_boosts": { "NEUTRAL": { "spot_price": 2.0 } } }"#,
        )
        .unwrap();
        assert_eq!(config.importance_boost(MarketContext::Neutral, "spot_price"), 2.0);
        assert_eq!(config.importance_boost(MarketContext::HighVolatility, "liquidations"), 1.0);
    }
}
