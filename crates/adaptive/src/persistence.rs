//! Decision persistence.
//!
//! The selector writes one [`CycleRecord`] per cycle and a snapshot of its
//! learned metrics through the [`DecisionStore`] collaborator. The store is
//! a plain partition/sort key-value store; no cross-key transactions are
//! assumed.
//!
//! Key layout:
//! - `cycles#<agent_id>` / zero-padded cycle number: one record per cycle
//! - `metrics#<agent_id>` / `latest`: the current metrics snapshot

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::context::MarketContext;
use crate::errors::Result;
use crate::metrics::LearnedMetric;
use crate::outcome::{CapabilityOutcome, CycleResult};

/// Sort key of the metrics snapshot item.
pub const LATEST_SORT_KEY: &str = "latest";

/// Composite item key.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct StoreKey {
    pub partition: String,
    pub sort: String,
}

impl StoreKey {
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }

    pub fn cycle(agent_id: &str, cycle: u64) -> Self {
        Self::new(cycles_partition(agent_id), cycle_sort_key(cycle))
    }

    pub fn metrics(agent_id: &str) -> Self {
        Self::new(format!("metrics#{}", agent_id), LATEST_SORT_KEY)
    }
}

pub fn cycles_partition(agent_id: &str) -> String {
    format!("cycles#{}", agent_id)
}

/// Zero-padded so lexical order matches numeric order.
pub fn cycle_sort_key(cycle: u64) -> String {
    format!("{:020}", cycle)
}

/// Inclusive sort-key range. Open on a side left as `None`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SortRange {
    pub from: Option<String>,
    pub to: Option<String>,
}

impl SortRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: Some(from.into()),
            to: Some(to.into()),
        }
    }

    pub fn contains(&self, sort: &str) -> bool {
        self.from.as_deref().map_or(true, |from| sort >= from)
            && self.to.as_deref().map_or(true, |to| sort <= to)
    }
}

/// Persistence collaborator.
#[async_trait]
pub trait DecisionStore: Send + Sync {
    async fn put(&self, key: StoreKey, item: serde_json::Value) -> Result<()>;

    async fn get(&self, key: &StoreKey) -> Result<Option<serde_json::Value>>;

    /// Items in one partition whose sort key falls in `range`, ascending.
    async fn query(&self, partition: &str, range: &SortRange) -> Result<Vec<serde_json::Value>>;
}

/// Persisted summary of one cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub agent_id: String,
    pub cycle: u64,
    pub context: MarketContext,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub outcomes: Vec<CapabilityOutcome>,
}

impl CycleRecord {
    pub fn from_result(agent_id: &str, result: &CycleResult) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            cycle: result.cycle,
            context: result.context,
            started_at: result.started_at,
            completed_at: result.completed_at,
            outcomes: result.outcomes.clone(),
        }
    }
}

/// Persisted learned metrics, keyed by capability id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub agent_id: String,
    pub cycle: u64,
    pub saved_at: DateTime<Utc>,
    pub metrics: BTreeMap<String, LearnedMetric>,
}

/// Process-local store, for tests and single-process agents.
#[derive(Default)]
pub struct InMemoryDecisionStore {
    partitions: Mutex<BTreeMap<String, BTreeMap<String, serde_json::Value>>>,
}

impl InMemoryDecisionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_partitions(&self) -> MutexGuard<'_, BTreeMap<String, BTreeMap<String, serde_json::Value>>> {
        self.partitions.lock().unwrap_or_else(|poisoned| {
            warn!("Decision store mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Number of items across all partitions.
    pub fn len(&self) -> usize {
        self.lock_partitions().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DecisionStore for InMemoryDecisionStore {
    async fn put(&self, key: StoreKey, item: serde_json::Value) -> Result<()> {
        self.lock_partitions()
            .entry(key.partition)
            .or_default()
            .insert(key.sort, item);
        Ok(())
    }

    async fn get(&self, key: &StoreKey) -> Result<Option<serde_json::Value>> {
        Ok(self
            .lock_partitions()
            .get(&key.partition)
            .and_then(|items| items.get(&key.sort))
            .cloned())
    }

    async fn query(&self, partition: &str, range: &SortRange) -> Result<Vec<serde_json::Value>> {
        Ok(self
            .lock_partitions()
            .get(partition)
            .map(|items| {
                items
                    .iter()
                    .filter(|(sort, _)| range.contains(sort))
                    .map(|(_, item)| item.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}
