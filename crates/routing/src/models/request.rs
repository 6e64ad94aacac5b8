use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::descriptor::{DataCategory, FeatureTag};
use super::types::{BackendId, Symbol};
use crate::errors::RoutingError;

/// Timeout applied when a request doesn't set its own.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Request priority. Higher priorities weigh latency more and cost less.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Inclusive time window for historical requests.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Value in a request's parameter bag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "b:{}", v),
            Self::Int(v) => write!(f, "i:{}", v),
            Self::Float(v) => write!(f, "f:{}", v),
            Self::Text(v) => write!(f, "s:{}", v),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// A single data request routed to one of the registered backends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataRequest {
    pub category: DataCategory,

    /// Further categories the serving backend must also support. Only
    /// `category` is fetched; these narrow the candidate set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub companion_categories: Vec<DataCategory>,

    /// Target symbol, e.g. "BTC-USD"
    pub symbol: Symbol,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,

    /// Free-form parameters. Sorted, so the fingerprint is order independent.
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,

    #[serde(default)]
    pub priority: Priority,

    /// Read from and write to the response cache.
    pub use_cache: bool,

    pub timeout: Duration,

    /// Features a backend must advertise to be considered at all.
    #[serde(default)]
    pub required_features: Vec<FeatureTag>,

    /// Features that improve a backend's rank when present.
    #[serde(default)]
    pub optional_features: Vec<FeatureTag>,

    /// Backend to try first when it is eligible.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_backend: Option<BackendId>,
}

impl DataRequest {
    /// Create a normal-priority, cache-enabled request with the default timeout.
    pub fn new(category: DataCategory, symbol: impl Into<Symbol>) -> Self {
        Self {
            category,
            companion_categories: Vec::new(),
            symbol: symbol.into(),
            time_range: None,
            params: BTreeMap::new(),
            priority: Priority::Normal,
            use_cache: true,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            required_features: Vec::new(),
            optional_features: Vec::new(),
            preferred_backend: None,
        }
    }

    pub fn with_companion_categories(
        mut self,
        categories: impl IntoIterator<Item = DataCategory>,
    ) -> Self {
        for category in categories {
            if category != self.category && !self.companion_categories.contains(&category) {
                self.companion_categories.push(category);
            }
        }
        self
    }

    /// Every category a candidate must support, `category` first.
    pub fn required_categories(&self) -> Vec<DataCategory> {
        let mut categories = Vec::with_capacity(1 + self.companion_categories.len());
        categories.push(self.category);
        categories.extend(
            self.companion_categories
                .iter()
                .copied()
                .filter(|c| *c != self.category),
        );
        categories
    }

    pub fn with_time_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.time_range = Some(TimeRange { start, end });
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_required_features(mut self, features: impl IntoIterator<Item = FeatureTag>) -> Self {
        self.required_features.extend(features);
        self
    }

    pub fn with_optional_features(mut self, features: impl IntoIterator<Item = FeatureTag>) -> Self {
        self.optional_features.extend(features);
        self
    }

    pub fn with_preferred_backend(mut self, backend: impl Into<BackendId>) -> Self {
        self.preferred_backend = Some(backend.into());
        self
    }

    /// Required features including the implicit `Historical` tag for ranged requests.
    pub fn effective_required_features(&self) -> Vec<FeatureTag> {
        let mut features = self.required_features.clone();
        if self.time_range.is_some() && !features.contains(&FeatureTag::Historical) {
            features.push(FeatureTag::Historical);
        }
        features
    }

    /// Deterministic cache key over category, symbol, time range and sorted params.
    ///
    /// Companion categories are part of the key since they restrict which
    /// backend may answer. Priority, timeout, feature constraints and the
    /// preferred backend are not.
    pub fn fingerprint(&self) -> String {
        let mut canonical = format!("{}|{}|", self.category.as_str(), self.symbol);
        if !self.companion_categories.is_empty() {
            let mut companions: Vec<&str> =
                self.companion_categories.iter().map(|c| c.as_str()).collect();
            companions.sort_unstable();
            companions.dedup();
            canonical.push_str(&format!("+{}|", companions.join(",")));
        }
        if let Some(range) = &self.time_range {
            canonical.push_str(&format!(
                "{}..{}",
                range.start.timestamp_millis(),
                range.end.timestamp_millis()
            ));
        }
        canonical.push('|');
        let params = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        canonical.push_str(&params);

        hex::encode(Sha256::digest(canonical.as_bytes()))
    }

    /// Reject malformed requests before any backend is touched.
    pub fn validate(&self) -> Result<(), RoutingError> {
        if self.symbol.trim().is_empty() {
            return Err(RoutingError::Validation(
                "Request symbol must not be empty".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(RoutingError::Validation(
                "Request timeout must be greater than zero".to_string(),
            ));
        }
        if let Some(range) = &self.time_range {
            if range.start > range.end {
                return Err(RoutingError::Validation(format!(
                    "Time range start {} is after end {}",
                    range.start, range.end
                )));
            }
        }
        if self
            .params
            .values()
            .any(|v| matches!(v, ParamValue::Float(f) if !f.is_finite()))
        {
            return Err(RoutingError::Validation(
                "Float parameters must be finite".to_string(),
            ));
        }
        Ok(())
    }
}
