//! Sourcemesh Adaptive Crate
//!
//! Learns, cycle by cycle, which abstract data needs ("logical capabilities")
//! are worth querying under which market conditions, and drives the
//! `sourcemesh-routing` router to fetch them.
//!
//! # Overview
//!
//! ```text
//! MarketSnapshot --> assess_context --> MarketContext
//!                                           |
//!          LogicalCapability table          v
//!                  |              +---------------------+
//!                  +------------> |  score + select N   | <-- LearnedMetric (EMA)
//!                                 +---------------------+
//!                                           |
//!                                           v
//!                                 Router::fetch per selection
//!                                           |
//!                                           v
//!                        learn --> signals --> DecisionStore
//! ```
//!
//! # Core Types
//!
//! - [`AdaptiveSourceSelector`] - The per-cycle agent loop
//! - [`LogicalCapability`] - An abstract data need
//! - [`LearnedMetric`] - Smoothed success, quality and per-context scores
//! - [`SelectorConfig`] - Static configuration, loadable from JSON
//! - [`DecisionStore`] / [`SignalBus`] - Optional collaborators

pub mod capability;
pub mod config;
pub mod context;
pub mod errors;
pub mod metrics;
pub mod outcome;
pub mod persistence;
pub mod scoring;
pub mod selector;
pub mod signals;

pub use capability::{default_capabilities, validate_capabilities, LogicalCapability};
pub use config::{ImportanceBoosts, SelectorConfig, SourcesPerContext};
pub use context::{assess_context, ContextThresholds, MarketContext, MarketSnapshot};
pub use errors::{Result, SelectorError};
pub use metrics::{ema, LearnedMetric, INITIAL_SCORE};
pub use outcome::{CapabilityOutcome, CycleResult, ScoreBreakdown};
pub use persistence::{
    CycleRecord, DecisionStore, InMemoryDecisionStore, MetricsSnapshot, SortRange, StoreKey,
};
pub use selector::{AdaptiveSourceSelector, CapabilityResolution};
pub use signals::{
    InMemorySignalBus, Signal, SignalBus, SignalPayload, SignalStatus, TriggerCondition,
    TriggerRule, DEFAULT_SEEN_SIGNAL_CAPACITY, DEFAULT_SIGNAL_CAPACITY,
};
