//! Routing data models
//!
//! This module contains the core data types for routing operations:
//! - `types` - Type aliases for common identifiers (BackendId, Symbol)
//! - `descriptor` - Backend capability metadata (BackendDescriptor and its enums)
//! - `request` - Request shape, priority and cache fingerprint (DataRequest)
//! - `payload` - Typed per-category payloads (Payload)
//! - `response` - Routed results including cache and error metadata (DataResponse)

mod descriptor;
mod payload;
mod request;
mod response;
mod types;

pub use descriptor::{
    BackendDescriptor, CostClass, DataCategory, FeatureTag, LatencyClass, RateLimitSpec,
};
pub use payload::{Candle, MetricReading, OrderBookLevel, OrderBookSnapshot, Payload, PricePoint};
pub use request::{DataRequest, ParamValue, Priority, TimeRange, DEFAULT_REQUEST_TIMEOUT};
pub use response::{DataResponse, ResponseError};
pub use types::{BackendId, Symbol};
