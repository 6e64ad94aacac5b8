use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::types::BackendId;

/// Kind of data a backend can serve.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataCategory {
    Price,
    Ohlcv,
    OrderBook,
    Trades,
    FundingRate,
    OpenInterest,
    Liquidations,
    Sentiment,
    News,
    OnChain,
    Fundamentals,
    Macro,
}

impl DataCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Price => "PRICE",
            Self::Ohlcv => "OHLCV",
            Self::OrderBook => "ORDER_BOOK",
            Self::Trades => "TRADES",
            Self::FundingRate => "FUNDING_RATE",
            Self::OpenInterest => "OPEN_INTEREST",
            Self::Liquidations => "LIQUIDATIONS",
            Self::Sentiment => "SENTIMENT",
            Self::News => "NEWS",
            Self::OnChain => "ON_CHAIN",
            Self::Fundamentals => "FUNDAMENTALS",
            Self::Macro => "MACRO",
        }
    }
}

impl std::fmt::Display for DataCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Qualitative feature a backend advertises.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureTag {
    Realtime,
    Historical,
    Streaming,
    Aggregated,
    Derivatives,
    Spot,
    MultiExchange,
    Normalized,
}

/// Ordinal latency class. Declaration order is fastest first.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LatencyClass {
    Realtime,
    Fast,
    Moderate,
    Slow,
}

impl LatencyClass {
    /// Position in `[0, 1]`, 0 being the fastest class.
    pub fn normalized(&self) -> f64 {
        match self {
            Self::Realtime => 0.0,
            Self::Fast => 1.0 / 3.0,
            Self::Moderate => 2.0 / 3.0,
            Self::Slow => 1.0,
        }
    }
}

/// Ordinal cost class. Declaration order is cheapest first.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CostClass {
    Free,
    Low,
    Medium,
    High,
}

impl CostClass {
    /// Position in `[0, 1]`, 0 being free.
    pub fn normalized(&self) -> f64 {
        match self {
            Self::Free => 0.0,
            Self::Low => 1.0 / 3.0,
            Self::Medium => 2.0 / 3.0,
            Self::High => 1.0,
        }
    }
}

/// Advertised request budget of a backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSpec {
    /// Maximum requests allowed per minute.
    pub requests_per_minute: u32,
    /// Requests that may be issued back to back before the rate applies.
    pub burst: u32,
}

/// Immutable capability and metadata record for one backend.
///
/// Once registered the descriptor is shared behind an `Arc` and never
/// mutated; registering the same id again replaces it wholesale.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Unique identifier, e.g. "BINANCE_SPOT"
    pub id: BackendId,

    /// Human-facing provider name, e.g. "Binance"
    pub provider: String,

    /// Data categories this backend can answer.
    pub categories: BTreeSet<DataCategory>,

    /// Feature tags (realtime, historical, ...).
    pub features: BTreeSet<FeatureTag>,

    /// Observed or declared reliability in `[0, 1]`.
    pub reliability: f64,

    pub latency: LatencyClass,

    pub cost: CostClass,

    /// Optional request budget. `None` means unlimited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitSpec>,
}

impl BackendDescriptor {
    /// Create a descriptor with no categories, no features, full reliability,
    /// moderate latency and free cost.
    pub fn new(id: impl Into<BackendId>, provider: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            categories: BTreeSet::new(),
            features: BTreeSet::new(),
            reliability: 1.0,
            latency: LatencyClass::Moderate,
            cost: CostClass::Free,
            rate_limit: None,
        }
    }

    pub fn with_categories(mut self, categories: impl IntoIterator<Item = DataCategory>) -> Self {
        self.categories.extend(categories);
        self
    }

    pub fn with_features(mut self, features: impl IntoIterator<Item = FeatureTag>) -> Self {
        self.features.extend(features);
        self
    }

    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.reliability = reliability;
        self
    }

    pub fn with_latency(mut self, latency: LatencyClass) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_cost(mut self, cost: CostClass) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_rate_limit(mut self, requests_per_minute: u32, burst: u32) -> Self {
        self.rate_limit = Some(RateLimitSpec {
            requests_per_minute,
            burst,
        });
        self
    }

    pub fn supports_category(&self, category: DataCategory) -> bool {
        self.categories.contains(&category)
    }

    pub fn has_feature(&self, feature: FeatureTag) -> bool {
        self.features.contains(&feature)
    }
}
