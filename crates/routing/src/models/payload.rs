use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::descriptor::DataCategory;

/// Spot price observation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    /// 24h traded volume, when the backend reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_24h: Option<Decimal>,
    pub currency: String,
}

/// One OHLCV bar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub timestamp: DateTime<Utc>,
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
}

/// Scalar reading such as a funding rate, open interest or sentiment index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricReading {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Opaque typed payload of a successful response.
///
/// Well-known categories get a concrete shape; anything else travels as
/// JSON so new backends can be added without touching this enum.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Price(PricePoint),
    Candles(Vec<Candle>),
    OrderBook(OrderBookSnapshot),
    Metric(MetricReading),
    Json(serde_json::Value),
    Empty,
}

impl Payload {
    /// Whether this payload shape is a natural answer for `category`.
    ///
    /// `Json` and `Empty` fit every category.
    pub fn fits(&self, category: DataCategory) -> bool {
        match self {
            Self::Price(_) => category == DataCategory::Price,
            Self::Candles(_) => category == DataCategory::Ohlcv,
            Self::OrderBook(_) => category == DataCategory::OrderBook,
            Self::Metric(_) => matches!(
                category,
                DataCategory::FundingRate
                    | DataCategory::OpenInterest
                    | DataCategory::Liquidations
                    | DataCategory::Sentiment
                    | DataCategory::OnChain
                    | DataCategory::Macro
            ),
            Self::Json(_) | Self::Empty => true,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Candles(candles) => candles.is_empty(),
            Self::Json(value) => value.is_null(),
            _ => false,
        }
    }
}
