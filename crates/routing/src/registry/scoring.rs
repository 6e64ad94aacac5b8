//! Backend quality scoring.
//!
//! A backend's score for a request is
//!
//! ```text
//! score = reliability * (0.4 * match + 0.2 * latency_fit + 0.2 * cost_fit + 0.2 * optional_overlap)
//! ```
//!
//! where `match` is 1.0 when every required category and feature is present
//! and 0.0 otherwise. A 0.0 match short-circuits the whole score to zero and
//! the backend is excluded from ranking.

use crate::models::{BackendDescriptor, DataCategory, DataRequest, FeatureTag, Priority};

pub const MATCH_WEIGHT: f64 = 0.4;
pub const LATENCY_WEIGHT: f64 = 0.2;
pub const COST_WEIGHT: f64 = 0.2;
pub const OPTIONAL_WEIGHT: f64 = 0.2;

/// What a backend is scored against.
///
/// Built from a [`DataRequest`] for routing, or directly from an abstract
/// need when several categories must be served by the same backend.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RankCriteria {
    pub categories: Vec<DataCategory>,
    pub required_features: Vec<FeatureTag>,
    pub optional_features: Vec<FeatureTag>,
    pub priority: Priority,
}

impl RankCriteria {
    pub fn new(categories: impl IntoIterator<Item = DataCategory>) -> Self {
        Self {
            categories: categories.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn with_required_features(mut self, features: impl IntoIterator<Item = FeatureTag>) -> Self {
        self.required_features.extend(features);
        self
    }

    pub fn with_optional_features(mut self, features: impl IntoIterator<Item = FeatureTag>) -> Self {
        self.optional_features.extend(features);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

impl From<&DataRequest> for RankCriteria {
    fn from(request: &DataRequest) -> Self {
        Self {
            categories: request.required_categories(),
            required_features: request.effective_required_features(),
            optional_features: request.optional_features.clone(),
            priority: request.priority,
        }
    }
}

/// True when the descriptor has every required category and feature.
pub fn meets_requirements(descriptor: &BackendDescriptor, criteria: &RankCriteria) -> bool {
    criteria
        .categories
        .iter()
        .all(|c| descriptor.supports_category(*c))
        && criteria
            .required_features
            .iter()
            .all(|f| descriptor.has_feature(*f))
}

/// 1.0 on a full hard-requirement match, 0.0 otherwise.
pub fn category_feature_match(descriptor: &BackendDescriptor, criteria: &RankCriteria) -> f64 {
    if meets_requirements(descriptor, criteria) {
        1.0
    } else {
        0.0
    }
}

/// How much latency matters at each priority.
fn latency_sensitivity(priority: Priority) -> f64 {
    match priority {
        Priority::Low => 0.25,
        Priority::Normal => 0.5,
        Priority::High => 0.75,
        Priority::Critical => 1.0,
    }
}

/// How much cost matters at each priority. Urgent requests tolerate paid backends.
fn cost_sensitivity(priority: Priority) -> f64 {
    match priority {
        Priority::Low => 1.0,
        Priority::Normal => 0.75,
        Priority::High => 0.5,
        Priority::Critical => 0.25,
    }
}

pub fn latency_fit(descriptor: &BackendDescriptor, priority: Priority) -> f64 {
    1.0 - descriptor.latency.normalized() * latency_sensitivity(priority)
}

pub fn cost_fit(descriptor: &BackendDescriptor, priority: Priority) -> f64 {
    1.0 - descriptor.cost.normalized() * cost_sensitivity(priority)
}

/// Share of the requested optional features the backend has. 1.0 when none are requested.
pub fn optional_overlap(descriptor: &BackendDescriptor, optional: &[FeatureTag]) -> f64 {
    if optional.is_empty() {
        return 1.0;
    }
    let present = optional.iter().filter(|f| descriptor.has_feature(**f)).count();
    present as f64 / optional.len() as f64
}

/// Full score in `[0, 1]`. Zero on any hard-requirement miss.
pub fn score(descriptor: &BackendDescriptor, criteria: &RankCriteria) -> f64 {
    let matched = category_feature_match(descriptor, criteria);
    if matched == 0.0 {
        return 0.0;
    }

    let raw = MATCH_WEIGHT * matched
        + LATENCY_WEIGHT * latency_fit(descriptor, criteria.priority)
        + COST_WEIGHT * cost_fit(descriptor, criteria.priority)
        + OPTIONAL_WEIGHT * optional_overlap(descriptor, &criteria.optional_features);

    (raw * descriptor.reliability.clamp(0.0, 1.0)).clamp(0.0, 1.0)
}
