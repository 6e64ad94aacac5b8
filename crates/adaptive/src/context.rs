//! Market context assessment.
//!
//! Classifies the current market into one of five contexts from a 24h price
//! move and a volume ratio. The thresholds are static configuration and are
//! never learned.

use serde::{Deserialize, Serialize};
use sourcemesh_routing::Symbol;

use log::warn;

/// Coarse market regime used to key learned scores and importance boosts.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketContext {
    HighVolatility,
    LowVolatility,
    Bullish,
    Bearish,
    Neutral,
}

impl MarketContext {
    pub const ALL: [MarketContext; 5] = [
        MarketContext::HighVolatility,
        MarketContext::LowVolatility,
        MarketContext::Bullish,
        MarketContext::Bearish,
        MarketContext::Neutral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighVolatility => "HIGH_VOLATILITY",
            Self::LowVolatility => "LOW_VOLATILITY",
            Self::Bullish => "BULLISH",
            Self::Bearish => "BEARISH",
            Self::Neutral => "NEUTRAL",
        }
    }
}

impl std::fmt::Display for MarketContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification thresholds. Percentages are absolute 24h moves.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextThresholds {
    /// Moves larger than this are high volatility, regardless of trend.
    pub high_volatility_pct: f64,
    /// Moves smaller than this (on thin volume) are low volatility.
    pub low_volatility_pct: f64,
    /// Volume ratio below which a small move counts as low volatility.
    pub low_volume_ratio: f64,
    /// Minimum move for a bullish or bearish trend.
    pub trend_pct: f64,
    /// Volume ratio above which an upward move counts as bullish.
    pub bullish_volume_ratio: f64,
}

impl Default for ContextThresholds {
    fn default() -> Self {
        Self {
            high_volatility_pct: 5.0,
            low_volatility_pct: 2.0,
            low_volume_ratio: 0.8,
            trend_pct: 2.0,
            bullish_volume_ratio: 1.2,
        }
    }
}

impl ContextThresholds {
    pub(crate) fn validate(&self) -> Result<(), String> {
        let values = [
            ("high_volatility_pct", self.high_volatility_pct),
            ("low_volatility_pct", self.low_volatility_pct),
            ("low_volume_ratio", self.low_volume_ratio),
            ("trend_pct", self.trend_pct),
            ("bullish_volume_ratio", self.bullish_volume_ratio),
        ];
        for (name, value) in values {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("threshold {} must be a non-negative number", name));
            }
        }
        if self.low_volatility_pct > self.high_volatility_pct {
            return Err("low_volatility_pct cannot exceed high_volatility_pct".to_string());
        }
        Ok(())
    }
}

/// Market observation a cycle is run against.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: Symbol,
    pub price_now: f64,
    pub price_24h_ago: f64,
    pub volume_24h: f64,
    pub avg_volume: f64,
}

impl MarketSnapshot {
    pub fn new(
        symbol: impl Into<Symbol>,
        price_now: f64,
        price_24h_ago: f64,
        volume_24h: f64,
        avg_volume: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            price_now,
            price_24h_ago,
            volume_24h,
            avg_volume,
        }
    }

    /// 24h price change in percent, or `None` without a usable baseline.
    pub fn change_pct(&self) -> Option<f64> {
        if !self.price_24h_ago.is_finite() || self.price_24h_ago <= 0.0 || !self.price_now.is_finite()
        {
            return None;
        }
        Some((self.price_now - self.price_24h_ago) / self.price_24h_ago * 100.0)
    }

    /// Current volume over average volume. 1.0 when the average is unknown.
    pub fn volume_ratio(&self) -> f64 {
        if !self.avg_volume.is_finite() || self.avg_volume <= 0.0 || !self.volume_24h.is_finite() {
            return 1.0;
        }
        self.volume_24h / self.avg_volume
    }
}

/// Classify a snapshot.
///
/// Rules, first match wins:
/// 1. `|change| > high_volatility_pct` is high volatility
/// 2. `|change| < low_volatility_pct` with volume ratio below `low_volume_ratio` is low volatility
/// 3. `change > trend_pct` with volume ratio above `bullish_volume_ratio` is bullish
/// 4. `change < -trend_pct` is bearish
/// 5. otherwise neutral
pub fn assess_context(snapshot: &MarketSnapshot, thresholds: &ContextThresholds) -> MarketContext {
    let Some(change) = snapshot.change_pct() else {
        warn!(
            "Context: no usable 24h baseline for {} ({}), assuming neutral",
            snapshot.symbol, snapshot.price_24h_ago
        );
        return MarketContext::Neutral;
    };
    let volume_ratio = snapshot.volume_ratio();

    if change.abs() > thresholds.high_volatility_pct {
        MarketContext::HighVolatility
    } else if change.abs() < thresholds.low_volatility_pct
        && volume_ratio < thresholds.low_volume_ratio
    {
        MarketContext::LowVolatility
    } else if change > thresholds.trend_pct && volume_ratio > thresholds.bullish_volume_ratio {
        MarketContext::Bullish
    } else if change < -thresholds.trend_pct {
        MarketContext::Bearish
    } else {
        MarketContext::Neutral
    }
}
