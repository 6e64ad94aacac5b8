//! Logical capabilities: abstract data needs, independent of any backend.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use sourcemesh_routing::{
    DataCategory, DataRequest, FeatureTag, ParamValue, Priority, RankCriteria, Symbol,
};

use crate::errors::{Result, SelectorError};

/// An abstract need the selector wants satisfied each cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogicalCapability {
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// Every backend used for this capability must serve all of these.
    pub categories: Vec<DataCategory>,
    #[serde(default)]
    pub required_features: Vec<FeatureTag>,
    #[serde(default)]
    pub optional_features: Vec<FeatureTag>,
    /// Static weight applied to the combined score.
    #[serde(default = "default_importance")]
    pub importance: f64,
    /// Parameters sent with every request for this capability.
    #[serde(default)]
    pub default_params: BTreeMap<String, ParamValue>,
}

fn default_importance() -> f64 {
    1.0
}

impl LogicalCapability {
    pub fn new(id: impl Into<String>, categories: impl IntoIterator<Item = DataCategory>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            categories: categories.into_iter().collect(),
            required_features: Vec::new(),
            optional_features: Vec::new(),
            importance: default_importance(),
            default_params: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_required_features(mut self, features: impl IntoIterator<Item = FeatureTag>) -> Self {
        self.required_features = features.into_iter().collect();
        self
    }

    pub fn with_optional_features(mut self, features: impl IntoIterator<Item = FeatureTag>) -> Self {
        self.optional_features = features.into_iter().collect();
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.default_params.insert(key.into(), value.into());
        self
    }

    /// Registry query for backends able to serve this capability.
    pub fn rank_criteria(&self, priority: Priority) -> RankCriteria {
        RankCriteria::new(self.categories.clone())
            .with_required_features(self.required_features.clone())
            .with_optional_features(self.optional_features.clone())
            .with_priority(priority)
    }

    /// Build the routed requests for one cycle, one per category.
    ///
    /// Each request names the capability's other categories as companions,
    /// so fallback can only land on a backend that serves all of them.
    pub fn to_requests(&self, symbol: &Symbol, priority: Priority) -> Vec<DataRequest> {
        let mut seen = HashSet::new();
        self.categories
            .iter()
            .copied()
            .filter(|category| seen.insert(*category))
            .map(|category| {
                let mut request = DataRequest::new(category, symbol.clone())
                    .with_companion_categories(self.categories.iter().copied())
                    .with_required_features(self.required_features.clone())
                    .with_optional_features(self.optional_features.clone())
                    .with_priority(priority);
                for (key, value) in &self.default_params {
                    request = request.with_param(key.clone(), value.clone());
                }
                request
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(SelectorError::Config(
                "Capability id cannot be empty".to_string(),
            ));
        }
        if self.categories.is_empty() {
            return Err(SelectorError::Config(format!(
                "Capability '{}' must name at least one category",
                self.id
            )));
        }
        if !self.importance.is_finite() || self.importance < 0.0 {
            return Err(SelectorError::Config(format!(
                "Capability '{}' importance must be a non-negative number",
                self.id
            )));
        }
        // Default params must survive request validation
        for request in self.to_requests(&"VALIDATION".into(), Priority::Normal) {
            request.validate()?;
        }
        Ok(())
    }
}

/// Validate a capability table: every entry valid, ids unique.
pub fn validate_capabilities(capabilities: &[LogicalCapability]) -> Result<()> {
    let mut seen = HashSet::new();
    for capability in capabilities {
        capability.validate()?;
        if !seen.insert(capability.id.as_str()) {
            return Err(SelectorError::Config(format!(
                "Duplicate capability id '{}'",
                capability.id
            )));
        }
    }
    Ok(())
}

/// Built-in catalogue of logical capabilities for a crypto trading agent.
pub fn default_capabilities() -> Vec<LogicalCapability> {
    vec![
        LogicalCapability::new("spot_price", [DataCategory::Price])
            .with_description("Current spot price")
            .with_required_features([FeatureTag::Realtime])
            .with_optional_features([FeatureTag::MultiExchange, FeatureTag::Normalized])
            .with_importance(1.2),
        LogicalCapability::new("price_history", [DataCategory::Ohlcv])
            .with_description("Recent OHLCV bars")
            .with_required_features([FeatureTag::Historical])
            .with_param("interval", "1h")
            .with_param("limit", 48i64),
        LogicalCapability::new("order_book_depth", [DataCategory::OrderBook])
            .with_description("Top of book liquidity")
            .with_required_features([FeatureTag::Realtime])
            .with_param("depth", 20i64),
        LogicalCapability::new("recent_trades", [DataCategory::Trades])
            .with_description("Recent prints")
            .with_optional_features([FeatureTag::Streaming]),
        LogicalCapability::new("funding_rates", [DataCategory::FundingRate])
            .with_description("Perpetual funding")
            .with_required_features([FeatureTag::Derivatives]),
        LogicalCapability::new("open_interest", [DataCategory::OpenInterest])
            .with_description("Aggregate open interest")
            .with_required_features([FeatureTag::Derivatives])
            .with_optional_features([FeatureTag::Aggregated]),
        LogicalCapability::new("liquidations", [DataCategory::Liquidations])
            .with_description("Forced liquidation flow")
            .with_required_features([FeatureTag::Derivatives]),
        LogicalCapability::new("market_sentiment", [DataCategory::Sentiment])
            .with_description("Crowd sentiment indicators")
            .with_importance(0.8),
        LogicalCapability::new("news_flow", [DataCategory::News])
            .with_description("Headlines")
            .with_importance(0.8),
        LogicalCapability::new("on_chain_activity", [DataCategory::OnChain])
            .with_description("Network activity metrics")
            .with_importance(0.9),
        LogicalCapability::new("macro_backdrop", [DataCategory::Macro])
            .with_description("Macro indicators")
            .with_importance(0.7),
    ]
}
