//! Cross-agent signals.
//!
//! This module contains:
//! - `Signal` and its payloads
//! - `TriggerRule`, which decides when a cycle outcome is worth broadcasting
//! - The `SignalBus` collaborator trait and an in-memory implementation
//!
//! # Delivery
//!
//! The bus is at-least-once: a signal may be handed out again until it is
//! marked processed, and the same signal id may even be published twice.
//! Consumers track the ids they have seen, within a bounded window.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::MarketContext;
use crate::errors::{Result, SelectorError};
use crate::outcome::CapabilityOutcome;

/// Processing state of a signal.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Pending,
    Processed,
    Ignored,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalPayload {
    /// A cycle outcome matched a trigger rule.
    CapabilityResult {
        rule: String,
        capability_id: String,
        backend_id: Option<String>,
        success: bool,
        quality: f64,
        latency_ms: u64,
        context: MarketContext,
    },
    /// Ask the target agent to query a capability in its next cycle.
    RequestCapability { capability_id: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub source: String,
    /// Addressed agent; `None` is a broadcast.
    pub target: Option<String>,
    pub payload: SignalPayload,
    pub status: SignalStatus,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    pub fn new(source: impl Into<String>, target: Option<String>, payload: SignalPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            target,
            payload,
            status: SignalStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Ask `target` to select `capability_id` next cycle.
    pub fn request_capability(
        source: impl Into<String>,
        target: impl Into<String>,
        capability_id: impl Into<String>,
    ) -> Self {
        Self::new(
            source,
            Some(target.into()),
            SignalPayload::RequestCapability {
                capability_id: capability_id.into(),
            },
        )
    }
}

/// When a trigger rule fires.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "when", content = "value", rename_all = "snake_case")]
pub enum TriggerCondition {
    OnFailure,
    OnSuccess,
    /// Observed quality strictly below the value.
    QualityBelow(f64),
    QualityAtLeast(f64),
    LatencyAboveMs(u64),
    ContextIs(MarketContext),
}

/// Configured rule turning a cycle outcome into an outgoing signal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TriggerRule {
    pub name: String,
    pub condition: TriggerCondition,
    /// Only outcomes for this capability. `None` matches all.
    #[serde(default)]
    pub capability: Option<String>,
    /// Agent to address. `None` broadcasts.
    #[serde(default)]
    pub target: Option<String>,
}

impl TriggerRule {
    pub fn new(name: impl Into<String>, condition: TriggerCondition) -> Self {
        Self {
            name: name.into(),
            condition,
            capability: None,
            target: None,
        }
    }

    pub fn for_capability(mut self, capability_id: impl Into<String>) -> Self {
        self.capability = Some(capability_id.into());
        self
    }

    pub fn to_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn matches(&self, outcome: &CapabilityOutcome, context: MarketContext) -> bool {
        if let Some(capability) = &self.capability {
            if capability != &outcome.capability_id {
                return false;
            }
        }
        match &self.condition {
            TriggerCondition::OnFailure => !outcome.success,
            TriggerCondition::OnSuccess => outcome.success,
            TriggerCondition::QualityBelow(threshold) => outcome.observed_quality < *threshold,
            TriggerCondition::QualityAtLeast(threshold) => outcome.observed_quality >= *threshold,
            TriggerCondition::LatencyAboveMs(ms) => outcome.latency.as_millis() > u128::from(*ms),
            TriggerCondition::ContextIs(expected) => *expected == context,
        }
    }

    /// Build the signal this rule emits for an outcome.
    pub fn signal_for(
        &self,
        source: &str,
        outcome: &CapabilityOutcome,
        context: MarketContext,
    ) -> Signal {
        Signal::new(
            source,
            self.target.clone(),
            SignalPayload::CapabilityResult {
                rule: self.name.clone(),
                capability_id: outcome.capability_id.clone(),
                backend_id: outcome.backend_id.as_ref().map(|id| id.to_string()),
                success: outcome.success,
                quality: outcome.observed_quality,
                latency_ms: u64::try_from(outcome.latency.as_millis()).unwrap_or(u64::MAX),
                context,
            },
        )
    }
}

/// Cross-agent signal bus collaborator.
#[async_trait]
pub trait SignalBus: Send + Sync {
    async fn publish(&self, signal: Signal) -> Result<()>;

    /// Pending signals addressed to `target_id`. May repeat signals.
    async fn poll_pending(&self, target_id: &str) -> Result<Vec<Signal>>;

    async fn mark_processed(&self, signal_id: Uuid, status: SignalStatus) -> Result<()>;
}

/// Signals an in-memory bus retains before evicting the oldest.
pub const DEFAULT_SIGNAL_CAPACITY: usize = 10_000;

/// Signal ids a consumer remembers for redelivery checks.
pub const DEFAULT_SEEN_SIGNAL_CAPACITY: usize = 4_096;

/// Process-local signal bus holding at most `capacity` signals.
///
/// When full, settled signals are evicted first (oldest first), then the
/// oldest pending ones.
pub struct InMemorySignalBus {
    signals: Mutex<Vec<Signal>>,
    capacity: usize,
}

impl Default for InMemorySignalBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SIGNAL_CAPACITY)
    }
}

impl InMemorySignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            signals: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.lock_signals().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_signals().is_empty()
    }

    fn lock_signals(&self) -> MutexGuard<'_, Vec<Signal>> {
        self.signals.lock().unwrap_or_else(|poisoned| {
            warn!("Signal bus mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Retained signals, in publish order.
    pub fn published(&self) -> Vec<Signal> {
        self.lock_signals().clone()
    }

    pub fn status_of(&self, signal_id: Uuid) -> Option<SignalStatus> {
        self.lock_signals()
            .iter()
            .find(|s| s.id == signal_id)
            .map(|s| s.status)
    }
}

#[async_trait]
impl SignalBus for InMemorySignalBus {
    async fn publish(&self, signal: Signal) -> Result<()> {
        let mut signals = self.lock_signals();
        signals.push(signal);
        evict_overflow(&mut signals, self.capacity);
        Ok(())
    }

    async fn poll_pending(&self, target_id: &str) -> Result<Vec<Signal>> {
        Ok(self
            .lock_signals()
            .iter()
            .filter(|s| s.status == SignalStatus::Pending && s.target.as_deref() == Some(target_id))
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, signal_id: Uuid, status: SignalStatus) -> Result<()> {
        let mut signals = self.lock_signals();
        let mut found = false;
        for signal in signals.iter_mut().filter(|s| s.id == signal_id) {
            signal.status = status;
            found = true;
        }
        if found {
            Ok(())
        } else {
            Err(SelectorError::SignalBus(format!(
                "Unknown signal {}",
                signal_id
            )))
        }
    }
}

fn evict_overflow(signals: &mut Vec<Signal>, capacity: usize) {
    let mut excess = signals.len().saturating_sub(capacity);
    if excess == 0 {
        return;
    }
    signals.retain(|s| {
        if excess > 0 && s.status != SignalStatus::Pending {
            excess -= 1;
            false
        } else {
            true
        }
    });
    if excess > 0 {
        warn!("Signal bus full, dropping {} pending signal(s)", excess);
        signals.drain(..excess);
    }
}

/// Recently seen signal ids, forgetting the oldest past `capacity`.
#[derive(Debug)]
pub(crate) struct SeenSignals {
    ids: HashSet<Uuid>,
    order: VecDeque<Uuid>,
    capacity: usize,
}

impl SeenSignals {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record `id`. Returns `false` if it was already in the window.
    pub(crate) fn insert(&mut self, id: Uuid) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }
}
