use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::payload::Payload;
use super::types::BackendId;
use crate::errors::{ErrorKind, RoutingError};

/// Error details of a failed response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&RoutingError> for ResponseError {
    fn from(error: &RoutingError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl From<RoutingError> for ResponseError {
    fn from(error: RoutingError) -> Self {
        Self::from(&error)
    }
}

/// Result of one routed request.
///
/// Terminal routing failures (`NO_BACKENDS_AVAILABLE`, `ALL_BACKENDS_FAILED`)
/// are reported through this type too, never as `Err`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataResponse {
    pub success: bool,

    /// Backend that produced the data (or the last failure), if any was tried.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_id: Option<BackendId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,

    /// Quality in `[0, 1]` reported by the backend for this answer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,

    pub requested_at: DateTime<Utc>,
    pub responded_at: DateTime<Utc>,

    pub from_cache: bool,

    /// Age of the cached entry when served from cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_age: Option<Duration>,

    pub latency: Duration,
}

impl DataResponse {
    /// Successful response from a live backend call.
    pub fn success(
        backend_id: BackendId,
        payload: Payload,
        quality: Option<f64>,
        requested_at: DateTime<Utc>,
        latency: Duration,
    ) -> Self {
        Self {
            success: true,
            backend_id: Some(backend_id),
            payload: Some(payload),
            error: None,
            quality: quality.map(|q| q.clamp(0.0, 1.0)),
            requested_at,
            responded_at: Utc::now(),
            from_cache: false,
            cache_age: None,
            latency,
        }
    }

    /// Failed response, optionally attributed to the backend that failed.
    pub fn failure(
        backend_id: Option<BackendId>,
        error: ResponseError,
        requested_at: DateTime<Utc>,
        latency: Duration,
    ) -> Self {
        Self {
            success: false,
            backend_id,
            payload: None,
            error: Some(error),
            quality: None,
            requested_at,
            responded_at: Utc::now(),
            from_cache: false,
            cache_age: None,
            latency,
        }
    }

    /// Copy of a cached response re-stamped for the current request.
    pub fn served_from_cache(
        &self,
        age: Duration,
        requested_at: DateTime<Utc>,
        latency: Duration,
    ) -> Self {
        Self {
            from_cache: true,
            cache_age: Some(age),
            requested_at,
            responded_at: Utc::now(),
            latency,
            ..self.clone()
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
