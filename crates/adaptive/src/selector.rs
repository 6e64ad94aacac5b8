//! Adaptive source selector.
//!
//! One [`AdaptiveSourceSelector::run_cycle`] call:
//! 1. Consumes capability requests addressed to this agent
//! 2. Classifies the market context
//! 3. Resolves every logical capability against the registry
//! 4. Scores fulfillable capabilities and selects the top N for the context
//! 5. Fetches each selection through the router, bounded by `max_concurrency`
//! 6. Folds every outcome into the learned metrics
//! 7. Emits signals for outcomes matching a trigger rule
//! 8. Persists the cycle record and a metrics snapshot
//!
//! Nothing in a cycle is fire-and-forget: the result is returned only once
//! every fetch has settled and the metrics are updated. One capability's
//! failure never aborts the cycle.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sourcemesh_routing::{
    BackendId, DataRequest, DataResponse, ErrorKind, Priority, Router, Symbol,
};

use crate::capability::{validate_capabilities, LogicalCapability};
use crate::config::SelectorConfig;
use crate::context::{assess_context, MarketContext, MarketSnapshot};
use crate::errors::Result;
use crate::metrics::LearnedMetric;
use crate::outcome::{CapabilityOutcome, CycleResult, ScoreBreakdown};
use crate::persistence::{
    cycle_sort_key, cycles_partition, CycleRecord, DecisionStore, MetricsSnapshot, SortRange,
    StoreKey,
};
use crate::scoring;
use crate::signals::{
    SeenSignals, SignalBus, SignalPayload, SignalStatus, DEFAULT_SEEN_SIGNAL_CAPACITY,
};

/// Backends able to serve one logical capability, best first.
#[derive(Clone, Debug, PartialEq)]
pub struct CapabilityResolution {
    pub capability_id: String,
    pub backends: Vec<(BackendId, f64)>,
}

impl CapabilityResolution {
    pub fn is_fulfillable(&self) -> bool {
        !self.backends.is_empty()
    }

    pub fn best_backend(&self) -> Option<&BackendId> {
        self.backends.first().map(|(id, _)| id)
    }

    /// Registry quality of the best backend, 0.0 if none.
    pub fn best_quality(&self) -> f64 {
        self.backends.first().map_or(0.0, |(_, score)| *score)
    }
}

/// A capability chosen for this cycle.
#[derive(Clone, Debug)]
struct Selection {
    capability_id: String,
    backend_id: BackendId,
    score: ScoreBreakdown,
}

/// Agent loop mapping logical capabilities to concrete backends.
pub struct AdaptiveSourceSelector {
    config: SelectorConfig,
    capabilities: Vec<LogicalCapability>,
    router: Arc<Router>,
    store: Option<Arc<dyn DecisionStore>>,
    signal_bus: Option<Arc<dyn SignalBus>>,
    metrics: BTreeMap<String, LearnedMetric>,
    cycle: u64,
    rng: StdRng,
    seen_signals: SeenSignals,
    forced: BTreeSet<String>,
}

impl AdaptiveSourceSelector {
    /// Validate configuration and capability table and start with fresh metrics.
    pub fn new(
        config: SelectorConfig,
        capabilities: Vec<LogicalCapability>,
        router: Arc<Router>,
    ) -> Result<Self> {
        config.validate()?;
        validate_capabilities(&capabilities)?;

        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let metrics = capabilities
            .iter()
            .map(|c| (c.id.clone(), LearnedMetric::new()))
            .collect();

        Ok(Self {
            config,
            capabilities,
            router,
            store: None,
            signal_bus: None,
            metrics,
            cycle: 0,
            rng,
            seen_signals: SeenSignals::new(DEFAULT_SEEN_SIGNAL_CAPACITY),
            forced: BTreeSet::new(),
        })
    }

    pub fn with_store(mut self, store: Arc<dyn DecisionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_signal_bus(mut self, bus: Arc<dyn SignalBus>) -> Self {
        self.signal_bus = Some(bus);
        self
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &[LogicalCapability] {
        &self.capabilities
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn metrics(&self) -> &BTreeMap<String, LearnedMetric> {
        &self.metrics
    }

    pub fn metric(&self, capability_id: &str) -> Option<&LearnedMetric> {
        self.metrics.get(capability_id)
    }

    /// Number of cycles run (or restored).
    pub fn cycle_count(&self) -> u64 {
        self.cycle
    }

    /// Capabilities queued by incoming signals for the next cycle.
    pub fn pending_requests(&self) -> Vec<&str> {
        self.forced.iter().map(String::as_str).collect()
    }

    fn capability(&self, id: &str) -> Option<&LogicalCapability> {
        self.capabilities.iter().find(|c| c.id == id)
    }

    fn resolve(&self, capability: &LogicalCapability, priority: Priority) -> CapabilityResolution {
        CapabilityResolution {
            capability_id: capability.id.clone(),
            backends: self
                .router
                .registry()
                .rank_criteria(&capability.rank_criteria(priority)),
        }
    }

    /// Every capability with at least one matching backend, in table order.
    pub fn fulfillable_capabilities(&self) -> Vec<CapabilityResolution> {
        self.capabilities
            .iter()
            .map(|c| self.resolve(c, Priority::Normal))
            .filter(CapabilityResolution::is_fulfillable)
            .collect()
    }

    /// Run one selection cycle against a market snapshot.
    pub async fn run_cycle(&mut self, snapshot: &MarketSnapshot) -> CycleResult {
        let started_at = Utc::now();
        self.cycle += 1;
        let cycle = self.cycle;

        self.consume_signals().await;

        let context = assess_context(snapshot, &self.config.thresholds);
        let priority = priority_for(context);

        let (fulfillable, unfulfillable): (Vec<_>, Vec<_>) = self
            .capabilities
            .iter()
            .map(|c| self.resolve(c, priority))
            .partition(CapabilityResolution::is_fulfillable);
        let unfulfillable: Vec<String> = unfulfillable
            .into_iter()
            .map(|r| r.capability_id)
            .collect();

        let selections = self.select(context, &fulfillable);
        info!(
            "Selector[{}]: cycle {} in {} selected {:?}",
            self.config.agent_id,
            cycle,
            context,
            selections
                .iter()
                .map(|s| s.capability_id.as_str())
                .collect::<Vec<_>>()
        );

        let outcomes = self.execute(selections, &snapshot.symbol, priority).await;
        self.learn(&outcomes, context);
        let signals_emitted = self.emit_signals(&outcomes, context).await;

        let result = CycleResult {
            cycle,
            context,
            started_at,
            completed_at: Utc::now(),
            outcomes,
            unfulfillable,
            signals_emitted,
        };
        self.persist(&result).await;

        debug!(
            "Selector[{}]: cycle {} finished, {}/{} succeeded",
            self.config.agent_id,
            cycle,
            result.success_count(),
            result.outcomes.len()
        );
        result
    }

    /// Pick this cycle's capabilities. Clears the forced set.
    fn select(
        &mut self,
        context: MarketContext,
        fulfillable: &[CapabilityResolution],
    ) -> Vec<Selection> {
        let mean_calls = if fulfillable.is_empty() {
            0.0
        } else {
            fulfillable
                .iter()
                .map(|r| self.metrics.get(&r.capability_id).map_or(0, |m| m.total_calls) as f64)
                .sum::<f64>()
                / fulfillable.len() as f64
        };

        let default_metric = LearnedMetric::new();
        let mut scored = Vec::with_capacity(fulfillable.len());
        for resolution in fulfillable {
            let Some(backend_id) = resolution.best_backend() else {
                continue;
            };
            let Some(capability) = self
                .capabilities
                .iter()
                .find(|c| c.id == resolution.capability_id)
            else {
                continue;
            };
            let metric = self
                .metrics
                .get(&capability.id)
                .unwrap_or(&default_metric);

            let mut score = scoring::score_capability(
                &self.config,
                capability,
                resolution.best_quality(),
                metric,
                mean_calls,
                context,
                &mut self.rng,
            );
            score.forced = self.forced.contains(&capability.id);
            if score.explored() {
                debug!("Selector: exploring '{}'", capability.id);
            }

            scored.push(Selection {
                capability_id: capability.id.clone(),
                backend_id: backend_id.clone(),
                score,
            });
        }

        scored.sort_by(|a, b| {
            b.score
                .forced
                .cmp(&a.score.forced)
                .then_with(|| b.score.total().total_cmp(&a.score.total()))
                .then_with(|| a.capability_id.cmp(&b.capability_id))
        });

        let forced_count = scored.iter().filter(|s| s.score.forced).count();
        let limit = self
            .config
            .sources_per_context
            .for_context(context)
            .max(forced_count);
        scored.truncate(limit);

        for id in &self.forced {
            if !scored.iter().any(|s| &s.capability_id == id) {
                warn!(
                    "Selector: requested capability '{}' has no matching backend, dropping request",
                    id
                );
            }
        }
        self.forced.clear();

        scored
    }

    /// Fetch every selection, at most `max_concurrency` at a time.
    async fn execute(
        &self,
        selections: Vec<Selection>,
        symbol: &Symbol,
        priority: Priority,
    ) -> Vec<CapabilityOutcome> {
        stream::iter(selections)
            .map(|selection| self.fetch_capability(selection, symbol, priority))
            .buffered(self.config.max_concurrency)
            .collect()
            .await
    }

    async fn fetch_capability(
        &self,
        selection: Selection,
        symbol: &Symbol,
        priority: Priority,
    ) -> CapabilityOutcome {
        let requests: Vec<DataRequest> = self
            .capability(&selection.capability_id)
            .map(|c| c.to_requests(symbol, priority))
            .unwrap_or_default()
            .into_iter()
            .map(|request| {
                request
                    .with_timeout(self.config.request_timeout())
                    .with_preferred_backend(selection.backend_id.clone())
            })
            .collect();
        if requests.is_empty() {
            return CapabilityOutcome {
                capability_id: selection.capability_id,
                backend_id: None,
                success: false,
                reported_quality: None,
                observed_quality: 0.0,
                latency: Duration::ZERO,
                from_cache: false,
                error_kind: Some(ErrorKind::Validation),
                error_message: Some("Capability has no category".to_string()),
                score: selection.score,
                payloads: BTreeMap::new(),
            };
        }

        let responses = join_all(requests.iter().map(|r| self.router.fetch(r))).await;
        let outcome = merge_responses(selection, &requests, responses);
        if !outcome.success {
            debug!(
                "Selector: '{}' failed via {:?}: {:?}",
                outcome.capability_id, outcome.backend_id, outcome.error_message
            );
        }
        outcome
    }

    /// EMA update for selected capabilities; idle tick for the rest.
    fn learn(&mut self, outcomes: &[CapabilityOutcome], context: MarketContext) {
        let alpha = self.config.learning_rate;
        let selected: HashSet<&str> = outcomes
            .iter()
            .map(|o| o.capability_id.as_str())
            .collect();

        for outcome in outcomes {
            self.metrics
                .entry(outcome.capability_id.clone())
                .or_default()
                .record(outcome.success, outcome.observed_quality, context, alpha);
        }
        for (id, metric) in self.metrics.iter_mut() {
            if !selected.contains(id.as_str()) {
                metric.mark_idle();
            }
        }
    }

    /// Read capability requests addressed to this agent.
    ///
    /// Each signal id is acted on at most once while it is among the most
    /// recent `DEFAULT_SEEN_SIGNAL_CAPACITY` ids; redeliveries are skipped.
    async fn consume_signals(&mut self) {
        let Some(bus) = self.signal_bus.clone() else {
            return;
        };

        let pending = match bus.poll_pending(&self.config.agent_id).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!("Selector[{}]: failed to poll signals: {}", self.config.agent_id, e);
                return;
            }
        };

        for signal in pending {
            if !self.seen_signals.insert(signal.id) {
                debug!("Selector: skipping redelivered signal {}", signal.id);
                continue;
            }

            let status = match &signal.payload {
                SignalPayload::RequestCapability { capability_id }
                    if self.capability(capability_id).is_some() =>
                {
                    info!(
                        "Selector[{}]: '{}' requested '{}'",
                        self.config.agent_id, signal.source, capability_id
                    );
                    self.forced.insert(capability_id.clone());
                    SignalStatus::Processed
                }
                _ => SignalStatus::Ignored,
            };

            if let Err(e) = bus.mark_processed(signal.id, status).await {
                warn!("Selector: failed to acknowledge signal {}: {}", signal.id, e);
            }
        }
    }

    /// Publish a signal per (outcome, matching rule). Returns how many went out.
    async fn emit_signals(&self, outcomes: &[CapabilityOutcome], context: MarketContext) -> usize {
        let Some(bus) = &self.signal_bus else {
            return 0;
        };

        let mut emitted = 0;
        for outcome in outcomes {
            for rule in &self.config.trigger_rules {
                if !rule.matches(outcome, context) {
                    continue;
                }
                let signal = rule.signal_for(&self.config.agent_id, outcome, context);
                match bus.publish(signal).await {
                    Ok(()) => {
                        debug!(
                            "Selector: rule '{}' fired for '{}'",
                            rule.name, outcome.capability_id
                        );
                        emitted += 1;
                    }
                    Err(e) => warn!("Selector: failed to publish signal for rule '{}': {}", rule.name, e),
                }
            }
        }
        emitted
    }

    /// Write the cycle record and metrics snapshot. Failures are logged only.
    async fn persist(&self, result: &CycleResult) {
        let Some(store) = &self.store else {
            return;
        };
        let agent_id = &self.config.agent_id;

        let record = CycleRecord::from_result(agent_id, result);
        match serde_json::to_value(&record) {
            Ok(item) => {
                if let Err(e) = store.put(StoreKey::cycle(agent_id, result.cycle), item).await {
                    warn!("Selector[{}]: failed to persist cycle {}: {}", agent_id, result.cycle, e);
                }
            }
            Err(e) => warn!("Selector[{}]: failed to serialize cycle {}: {}", agent_id, result.cycle, e),
        }

        let snapshot = MetricsSnapshot {
            agent_id: agent_id.clone(),
            cycle: result.cycle,
            saved_at: Utc::now(),
            metrics: self.metrics.clone(),
        };
        match serde_json::to_value(&snapshot) {
            Ok(item) => {
                if let Err(e) = store.put(StoreKey::metrics(agent_id), item).await {
                    warn!("Selector[{}]: failed to persist metrics: {}", agent_id, e);
                }
            }
            Err(e) => warn!("Selector[{}]: failed to serialize metrics: {}", agent_id, e),
        }
    }

    /// Load the last metrics snapshot, if the store has one.
    ///
    /// Metrics for capabilities no longer in the table are dropped. Returns
    /// whether a snapshot was found.
    pub async fn restore_metrics(&mut self) -> Result<bool> {
        let Some(store) = self.store.clone() else {
            return Ok(false);
        };
        let Some(item) = store.get(&StoreKey::metrics(&self.config.agent_id)).await? else {
            return Ok(false);
        };
        let snapshot: MetricsSnapshot = serde_json::from_value(item)?;

        let mut restored = 0;
        for (id, metric) in snapshot.metrics {
            match self.metrics.get_mut(&id) {
                Some(current) => {
                    *current = metric;
                    restored += 1;
                }
                None => debug!("Selector: dropping stored metric for unknown capability '{}'", id),
            }
        }
        self.cycle = self.cycle.max(snapshot.cycle);
        info!(
            "Selector[{}]: restored {} metrics from cycle {}",
            self.config.agent_id, restored, snapshot.cycle
        );
        Ok(true)
    }

    /// Persisted cycle records with `from <= cycle <= to`, oldest first.
    pub async fn recent_cycles(&self, from: u64, to: u64) -> Result<Vec<CycleRecord>> {
        let Some(store) = &self.store else {
            return Ok(Vec::new());
        };
        let range = SortRange::between(cycle_sort_key(from), cycle_sort_key(to));
        store
            .query(&cycles_partition(&self.config.agent_id), &range)
            .await?
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(Into::into))
            .collect()
    }

    /// Forget everything learned. The cycle counter keeps counting.
    pub fn reset(&mut self) {
        info!("Selector[{}]: resetting learned metrics", self.config.agent_id);
        for metric in self.metrics.values_mut() {
            *metric = LearnedMetric::new();
        }
        self.forced.clear();
    }
}

/// Request priority for a context.
fn priority_for(context: MarketContext) -> Priority {
    match context {
        MarketContext::HighVolatility => Priority::High,
        _ => Priority::Normal,
    }
}

/// Fold the per-category responses of one capability into a single outcome.
///
/// The capability succeeds only when every category did. The first failure
/// names the backend and error; otherwise the first category's backend is
/// reported.
fn merge_responses(
    selection: Selection,
    requests: &[DataRequest],
    responses: Vec<DataResponse>,
) -> CapabilityOutcome {
    let success = responses.iter().all(|r| r.success);
    let failure = responses.iter().find(|r| !r.success);
    let backend_id = failure
        .or_else(|| responses.first())
        .and_then(|r| r.backend_id.clone());
    let error = failure.and_then(|r| r.error.as_ref());

    let reported_quality = responses
        .iter()
        .filter_map(|r| r.quality)
        .reduce(f64::min);
    let observed_quality = if success {
        reported_quality.unwrap_or(1.0)
    } else {
        0.0
    };
    let latency = responses
        .iter()
        .map(|r| r.latency)
        .max()
        .unwrap_or_default();
    let from_cache = !responses.is_empty() && responses.iter().all(|r| r.from_cache);

    let payloads = requests
        .iter()
        .zip(responses.iter())
        .filter_map(|(request, response)| {
            response
                .payload
                .clone()
                .map(|payload| (request.category, payload))
        })
        .collect();

    CapabilityOutcome {
        capability_id: selection.capability_id,
        backend_id,
        success,
        reported_quality,
        observed_quality,
        latency,
        from_cache,
        error_kind: error.map(|e| e.kind),
        error_message: error.map(|e| e.message.clone()),
        score: selection.score,
        payloads,
    }
}
