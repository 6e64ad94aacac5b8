//! Per-cycle results reported by the selector.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sourcemesh_routing::{BackendId, DataCategory, ErrorKind, Payload};

use crate::context::MarketContext;

/// How a capability ranked when the cycle chose its sources.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Weighted backend quality and learned context score, times importance.
    pub combined: f64,
    pub recency_bonus: f64,
    /// Zero unless exploration fired this cycle.
    pub exploration_bonus: f64,
    /// Selected because another agent asked for it.
    pub forced: bool,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.combined + self.recency_bonus + self.exploration_bonus
    }

    pub fn explored(&self) -> bool {
        self.exploration_bonus > 0.0
    }
}

/// What happened to one selected capability in one cycle.
///
/// Always reported, even when the payload is empty or the fetch failed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilityOutcome {
    pub capability_id: String,
    /// Backend that served the capability, or the one that failed it.
    pub backend_id: Option<BackendId>,
    pub success: bool,
    /// Quality the backend reported, if any.
    pub reported_quality: Option<f64>,
    /// Value fed to the quality EMA.
    pub observed_quality: f64,
    pub latency: Duration,
    pub from_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub score: ScoreBreakdown,
    /// Routed data per category. Not persisted with cycle records.
    #[serde(skip)]
    pub payloads: BTreeMap<DataCategory, Payload>,
}

impl CapabilityOutcome {
    pub fn payload(&self, category: DataCategory) -> Option<&Payload> {
        self.payloads.get(&category)
    }
}

/// Result of one selection cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CycleResult {
    pub cycle: u64,
    pub context: MarketContext,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// In selection order.
    pub outcomes: Vec<CapabilityOutcome>,
    /// Capabilities with no matching backend this cycle.
    pub unfulfillable: Vec<String>,
    pub signals_emitted: usize,
}

impl CycleResult {
    pub fn outcome(&self, capability_id: &str) -> Option<&CapabilityOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.capability_id == capability_id)
    }

    pub fn selected_ids(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .map(|o| o.capability_id.as_str())
            .collect()
    }

    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }
}
