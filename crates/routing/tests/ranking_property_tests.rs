//! Property-based tests for registry ranking.
//!
//! Uses `proptest` to check that ranking never admits a backend missing a
//! hard requirement and always returns scores in `[0, 1]`, sorted.

use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;
use sourcemesh_routing::{
    shared_factory, BackendDescriptor, BackendReply, CapabilityRegistry, CostClass, DataBackend,
    DataCategory, DataRequest, FeatureTag, LatencyClass, Payload, Priority, RoutingError,
};

struct NoopBackend;

#[async_trait]
impl DataBackend for NoopBackend {
    fn id(&self) -> &str {
        "NOOP"
    }

    async fn fetch(&self, _request: &DataRequest) -> Result<BackendReply, RoutingError> {
        Ok(BackendReply::new(Payload::Empty))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

// =============================================================================
// Generators
// =============================================================================

fn arb_category() -> impl Strategy<Value = DataCategory> {
    prop_oneof![
        Just(DataCategory::Price),
        Just(DataCategory::Ohlcv),
        Just(DataCategory::OrderBook),
        Just(DataCategory::FundingRate),
        Just(DataCategory::Sentiment),
    ]
}

fn arb_feature() -> impl Strategy<Value = FeatureTag> {
    prop_oneof![
        Just(FeatureTag::Realtime),
        Just(FeatureTag::Historical),
        Just(FeatureTag::Streaming),
        Just(FeatureTag::Derivatives),
        Just(FeatureTag::Spot),
    ]
}

fn arb_latency() -> impl Strategy<Value = LatencyClass> {
    prop_oneof![
        Just(LatencyClass::Realtime),
        Just(LatencyClass::Fast),
        Just(LatencyClass::Moderate),
        Just(LatencyClass::Slow),
    ]
}

fn arb_cost() -> impl Strategy<Value = CostClass> {
    prop_oneof![
        Just(CostClass::Free),
        Just(CostClass::Low),
        Just(CostClass::Medium),
        Just(CostClass::High),
    ]
}

fn arb_priority() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Low),
        Just(Priority::Normal),
        Just(Priority::High),
        Just(Priority::Critical),
    ]
}

/// Generates a valid descriptor with a unique id suffix.
fn arb_descriptor(index: usize) -> impl Strategy<Value = BackendDescriptor> {
    (
        proptest::collection::btree_set(arb_category(), 1..4),
        proptest::collection::btree_set(arb_feature(), 0..5),
        0.0f64..=1.0,
        arb_latency(),
        arb_cost(),
    )
        .prop_map(move |(categories, features, reliability, latency, cost)| {
            BackendDescriptor::new(format!("B{}", index), "prop")
                .with_categories(categories)
                .with_features(features)
                .with_reliability(reliability)
                .with_latency(latency)
                .with_cost(cost)
        })
}

fn arb_descriptors() -> impl Strategy<Value = Vec<BackendDescriptor>> {
    (1usize..8).prop_flat_map(|n| (0..n).map(arb_descriptor).collect::<Vec<_>>())
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_rank_only_admits_backends_meeting_hard_requirements(
        descriptors in arb_descriptors(),
        category in arb_category(),
        required in proptest::collection::vec(arb_feature(), 0..3),
        optional in proptest::collection::vec(arb_feature(), 0..3),
        priority in arb_priority(),
    ) {
        let registry = CapabilityRegistry::new();
        for descriptor in &descriptors {
            registry
                .register(descriptor.clone(), shared_factory(Arc::new(NoopBackend)))
                .unwrap();
        }

        let request = DataRequest::new(category, "BTC-USD")
            .with_required_features(required.clone())
            .with_optional_features(optional)
            .with_priority(priority);
        let ranked = registry.rank(&request);

        for (id, score) in &ranked {
            let descriptor = registry.get(id).unwrap();
            prop_assert!(descriptor.supports_category(category));
            for feature in &required {
                prop_assert!(descriptor.has_feature(*feature));
            }
            prop_assert!((0.0..=1.0).contains(score));
        }

        let eligible = descriptors
            .iter()
            .filter(|d| d.supports_category(category) && required.iter().all(|f| d.has_feature(*f)))
            .count();
        prop_assert_eq!(ranked.len(), eligible);

        for pair in ranked.windows(2) {
            prop_assert!(pair[0].1 >= pair[1].1);
            if pair[0].1 == pair[1].1 {
                prop_assert!(pair[0].0 < pair[1].0);
            }
        }
    }

    #[test]
    fn prop_fingerprint_ignores_param_insertion_order(
        params in proptest::collection::btree_map("[a-z]{1,8}", 0i64..1000, 0..6),
    ) {
        let forward = params
            .iter()
            .fold(DataRequest::new(DataCategory::Price, "ETH-USD"), |r, (k, v)| {
                r.with_param(k.clone(), *v)
            });
        let reverse = params
            .iter()
            .rev()
            .fold(DataRequest::new(DataCategory::Price, "ETH-USD"), |r, (k, v)| {
                r.with_param(k.clone(), *v)
            });

        prop_assert_eq!(forward.fingerprint(), reverse.fingerprint());
    }
}
