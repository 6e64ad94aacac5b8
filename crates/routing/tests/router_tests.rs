//! Integration tests for the router's fetch path.
//!
//! Backends here are in-process mocks that count their calls, so every test
//! can assert exactly which adapters were touched.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal_macros::dec;
use sourcemesh_routing::{
    shared_factory, BackendDescriptor, BackendId, BackendReply, CapabilityRegistry, CircuitBreakerConfig,
    CircuitState, DataBackend, DataCategory, DataRequest, ErrorKind, FeatureTag, LatencyClass,
    Payload, PricePoint, Router, RouterConfig, RoutingError, SkipReason,
};

// =============================================================================
// Mocks
// =============================================================================

#[derive(Clone)]
enum Behavior {
    Succeed { quality: Option<f64> },
    Fail(RoutingError),
    Delay(Duration),
    Panic,
}

struct MockBackend {
    id: &'static str,
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl DataBackend for MockBackend {
    fn id(&self) -> &str {
        self.id
    }

    async fn fetch(&self, request: &DataRequest) -> Result<BackendReply, RoutingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = || {
            BackendReply::new(Payload::Price(PricePoint {
                timestamp: chrono::Utc::now(),
                price: dec!(64250.5),
                volume_24h: None,
                currency: "USD".to_string(),
            }))
        };
        match &self.behavior {
            Behavior::Succeed { quality } => {
                let mut r = reply();
                r.quality = *quality;
                Ok(r)
            }
            Behavior::Fail(error) => Err(error.clone()),
            Behavior::Delay(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(reply())
            }
            Behavior::Panic => panic!("mock backend blew up on {}", request.symbol),
        }
    }

    async fn health_check(&self) -> bool {
        !matches!(self.behavior, Behavior::Fail(_) | Behavior::Panic)
    }
}

fn register(
    registry: &CapabilityRegistry,
    descriptor: BackendDescriptor,
    behavior: Behavior,
) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    let id: &'static str = match descriptor.id.clone() {
        std::borrow::Cow::Borrowed(id) => id,
        std::borrow::Cow::Owned(id) => Box::leak(id.into_boxed_str()),
    };
    let backend = Arc::new(MockBackend {
        id,
        behavior,
        calls: calls.clone(),
    });
    registry
        .register(descriptor, shared_factory(backend))
        .unwrap();
    calls
}

fn price_backend(id: &'static str, reliability: f64) -> BackendDescriptor {
    BackendDescriptor::new(id, "mock")
        .with_categories([DataCategory::Price])
        .with_features([FeatureTag::Realtime, FeatureTag::Spot])
        .with_reliability(reliability)
        .with_latency(LatencyClass::Fast)
}

fn transport_error(backend: &str) -> RoutingError {
    RoutingError::Transport {
        backend: backend.to_string(),
        message: "connection reset".to_string(),
    }
}

fn router_with(registry: Arc<CapabilityRegistry>, config: RouterConfig) -> Router {
    Router::with_config(registry, config).unwrap()
}

// =============================================================================
// Cache
// =============================================================================

#[tokio::test]
async fn test_cached_fetch_calls_backend_once() {
    let registry = Arc::new(CapabilityRegistry::new());
    let calls = register(&registry, price_backend("A", 0.9), Behavior::Succeed { quality: None });
    let router = Router::new(registry);

    let request = DataRequest::new(DataCategory::Price, "BTC-USD");
    let first = router.fetch(&request).await;
    let second = router.fetch(&request).await;

    assert!(first.success);
    assert!(!first.from_cache);
    assert!(second.success);
    assert!(second.from_cache);
    assert!(second.cache_age.is_some());
    assert_eq!(second.backend_id.as_deref(), Some("A"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cache_disabled_bypasses_read_and_write() {
    let registry = Arc::new(CapabilityRegistry::new());
    let calls = register(&registry, price_backend("A", 0.9), Behavior::Succeed { quality: None });
    let router = Router::new(registry);

    let request = DataRequest::new(DataCategory::Price, "ETH-USD").with_cache(false);
    router.fetch(&request).await;
    router.fetch(&request).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(router.cache_stats().entries, 0);
}

#[tokio::test]
async fn test_param_order_shares_cache_entry() {
    let registry = Arc::new(CapabilityRegistry::new());
    let calls = register(&registry, price_backend("A", 0.9), Behavior::Succeed { quality: None });
    let router = Router::new(registry);

    let first = DataRequest::new(DataCategory::Price, "SOL-USD")
        .with_param("interval", "1m")
        .with_param("limit", 10i64);
    let second = DataRequest::new(DataCategory::Price, "SOL-USD")
        .with_param("limit", 10i64)
        .with_param("interval", "1m");

    router.fetch(&first).await;
    let response = router.fetch(&second).await;

    assert!(response.from_cache);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failures_are_not_cached() {
    let registry = Arc::new(CapabilityRegistry::new());
    let calls = register(&registry, price_backend("A", 0.9), Behavior::Fail(transport_error("A")));
    let router = Router::new(registry);

    let request = DataRequest::new(DataCategory::Price, "BTC-USD");
    assert!(!router.fetch(&request).await.success);
    assert!(!router.fetch(&request).await.success);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Candidate selection
// =============================================================================

#[tokio::test]
async fn test_invalid_request_is_a_validation_failure() {
    let registry = Arc::new(CapabilityRegistry::new());
    let calls = register(&registry, price_backend("A", 0.9), Behavior::Succeed { quality: None });
    let router = Router::new(registry);

    let response = router.fetch(&DataRequest::new(DataCategory::Price, "")).await;

    assert!(!response.success);
    assert_eq!(response.error_kind(), Some(ErrorKind::Validation));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_no_backend_for_category() {
    let registry = Arc::new(CapabilityRegistry::new());
    register(&registry, price_backend("A", 0.9), Behavior::Succeed { quality: None });
    let router = Router::new(registry);

    let response = router
        .fetch(&DataRequest::new(DataCategory::FundingRate, "BTC-PERP"))
        .await;

    assert!(!response.success);
    assert_eq!(response.error_kind(), Some(ErrorKind::NoBackendsAvailable));
    assert!(response.backend_id.is_none());
}

#[tokio::test]
async fn test_time_range_requires_historical_backend() {
    let registry = Arc::new(CapabilityRegistry::new());
    let realtime = register(&registry, price_backend("LIVE", 0.99), Behavior::Succeed { quality: None });
    let historical = register(
        &registry,
        price_backend("ARCHIVE", 0.7).with_features([FeatureTag::Historical]),
        Behavior::Succeed { quality: None },
    );
    let router = Router::new(registry);

    let end = chrono::Utc::now();
    let start = end - chrono::Duration::days(7);
    let response = router
        .fetch(&DataRequest::new(DataCategory::Price, "BTC-USD").with_time_range(start, end))
        .await;

    assert_eq!(response.backend_id.as_deref(), Some("ARCHIVE"));
    assert_eq!(realtime.load(Ordering::SeqCst), 0);
    assert_eq!(historical.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_preferred_backend_goes_first() {
    let registry = Arc::new(CapabilityRegistry::new());
    let best = register(&registry, price_backend("BEST", 0.99), Behavior::Succeed { quality: None });
    let other = register(&registry, price_backend("OTHER", 0.5), Behavior::Succeed { quality: None });
    let router = Router::new(registry);

    let response = router
        .fetch(&DataRequest::new(DataCategory::Price, "BTC-USD").with_preferred_backend("OTHER"))
        .await;

    assert_eq!(response.backend_id.as_deref(), Some("OTHER"));
    assert_eq!(best.load(Ordering::SeqCst), 0);
    assert_eq!(other.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_ineligible_preferred_backend_is_ignored() {
    let registry = Arc::new(CapabilityRegistry::new());
    register(&registry, price_backend("A", 0.9), Behavior::Succeed { quality: None });
    let router = Router::new(registry);

    let response = router
        .fetch(&DataRequest::new(DataCategory::Price, "BTC-USD").with_preferred_backend("MISSING"))
        .await;

    assert!(response.success);
    assert_eq!(response.backend_id.as_deref(), Some("A"));
}

// =============================================================================
// Fallback
// =============================================================================

#[tokio::test]
async fn test_fallback_to_next_candidate() {
    let registry = Arc::new(CapabilityRegistry::new());
    let a = register(&registry, price_backend("A", 0.95), Behavior::Fail(transport_error("A")));
    let b = register(&registry, price_backend("B", 0.80), Behavior::Succeed { quality: Some(0.7) });
    let router = Router::new(registry);

    let (response, diagnostics) = router
        .fetch_with_diagnostics(&DataRequest::new(DataCategory::Price, "BTC-USD"))
        .await;

    assert!(response.success);
    assert_eq!(response.backend_id.as_deref(), Some("B"));
    assert_eq!(response.quality, Some(0.7));
    assert_eq!(a.load(Ordering::SeqCst), 1);
    assert_eq!(b.load(Ordering::SeqCst), 1);
    assert_eq!(diagnostics.summary(), "A: ERROR (Transport error: A - connection reset) -> B: SUCCESS");
}

#[tokio::test]
async fn test_fallback_disabled_returns_first_failure() {
    let registry = Arc::new(CapabilityRegistry::new());
    let a = register(&registry, price_backend("A", 0.95), Behavior::Fail(transport_error("A")));
    let b = register(&registry, price_backend("B", 0.80), Behavior::Succeed { quality: None });
    let config = RouterConfig {
        enable_fallback: false,
        ..RouterConfig::default()
    };
    let router = router_with(registry, config);

    let (response, diagnostics) = router
        .fetch_with_diagnostics(&DataRequest::new(DataCategory::Price, "BTC-USD"))
        .await;

    assert!(!response.success);
    assert_eq!(response.backend_id.as_deref(), Some("A"));
    assert_eq!(response.error_kind(), Some(ErrorKind::Transport));
    assert_eq!(a.load(Ordering::SeqCst), 1);
    assert_eq!(b.load(Ordering::SeqCst), 0);
    assert_eq!(
        diagnostics.skip_reasons(),
        vec![(&BackendId::from("B"), &SkipReason::FallbackDisabled)]
    );
}

#[tokio::test]
async fn test_all_backends_failed() {
    let registry = Arc::new(CapabilityRegistry::new());
    register(&registry, price_backend("A", 0.95), Behavior::Fail(transport_error("A")));
    register(&registry, price_backend("B", 0.80), Behavior::Fail(transport_error("B")));
    let router = Router::new(registry);

    let response = router
        .fetch(&DataRequest::new(DataCategory::Price, "BTC-USD"))
        .await;

    assert!(!response.success);
    assert_eq!(response.error_kind(), Some(ErrorKind::AllBackendsFailed));
    assert_eq!(response.backend_id.as_deref(), Some("B"));
    let message = &response.error.as_ref().unwrap().message;
    assert!(message.contains("'B'"), "unexpected message: {}", message);
}

#[tokio::test]
async fn test_fallback_never_leaves_companion_categories() {
    let registry = Arc::new(CapabilityRegistry::new());
    let full = register(
        &registry,
        BackendDescriptor::new("FULL", "mock")
            .with_categories([DataCategory::Ohlcv, DataCategory::Price])
            .with_reliability(0.9),
        Behavior::Fail(transport_error("FULL")),
    );
    let partial = register(
        &registry,
        BackendDescriptor::new("PARTIAL", "mock")
            .with_categories([DataCategory::Ohlcv])
            .with_reliability(0.99),
        Behavior::Succeed { quality: None },
    );
    let router = Router::new(registry);

    let request = DataRequest::new(DataCategory::Ohlcv, "BTC-USD")
        .with_companion_categories([DataCategory::Price]);
    let response = router.fetch(&request).await;

    assert!(!response.success);
    assert_eq!(response.backend_id.as_deref(), Some("FULL"));
    assert_eq!(full.load(Ordering::SeqCst), 1);
    assert_eq!(partial.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_panic_becomes_internal_error_and_falls_back() {
    let registry = Arc::new(CapabilityRegistry::new());
    register(&registry, price_backend("BOOM", 0.95), Behavior::Panic);
    register(&registry, price_backend("SAFE", 0.80), Behavior::Succeed { quality: None });
    let router = Router::new(registry);

    let (response, diagnostics) = router
        .fetch_with_diagnostics(&DataRequest::new(DataCategory::Price, "BTC-USD"))
        .await;

    assert!(response.success);
    assert_eq!(response.backend_id.as_deref(), Some("SAFE"));
    let errors = diagnostics.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].1.contains("panicked"));
    assert_eq!(router.circuit_metrics()[0].consecutive_failures, 1);
}

#[tokio::test]
async fn test_timeout_is_reported_per_backend() {
    let registry = Arc::new(CapabilityRegistry::new());
    let calls = register(
        &registry,
        price_backend("SLOW", 0.95),
        Behavior::Delay(Duration::from_millis(500)),
    );
    let config = RouterConfig {
        enable_fallback: false,
        ..RouterConfig::default()
    };
    let router = router_with(registry, config);

    let request = DataRequest::new(DataCategory::Price, "BTC-USD")
        .with_timeout(Duration::from_millis(30));
    let response = router.fetch(&request).await;

    assert!(!response.success);
    assert_eq!(response.error_kind(), Some(ErrorKind::Timeout));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(response.latency < Duration::from_millis(500));
}

#[tokio::test]
async fn test_not_supported_skips_without_penalty() {
    let registry = Arc::new(CapabilityRegistry::new());
    register(
        &registry,
        price_backend("PARTIAL", 0.95),
        Behavior::Fail(RoutingError::NotSupported {
            operation: "price for this symbol".to_string(),
            backend: "PARTIAL".to_string(),
        }),
    );
    register(&registry, price_backend("FULL", 0.80), Behavior::Succeed { quality: None });
    let router = Router::new(registry);

    let response = router
        .fetch(&DataRequest::new(DataCategory::Price, "BTC-USD"))
        .await;

    assert_eq!(response.backend_id.as_deref(), Some("FULL"));
    assert!(router
        .circuit_metrics()
        .iter()
        .all(|m| m.consecutive_failures == 0));
}

#[tokio::test]
async fn test_adapter_factory_failure_is_penalized() {
    let registry = Arc::new(CapabilityRegistry::new());
    registry
        .register(
            price_backend("BROKEN", 0.95),
            Arc::new(|| -> Result<Arc<dyn DataBackend>, RoutingError> {
                Err(RoutingError::Internal("missing API key".to_string()))
            }),
        )
        .unwrap();
    register(&registry, price_backend("OK", 0.80), Behavior::Succeed { quality: None });
    let router = Router::new(registry);

    let (response, diagnostics) = router
        .fetch_with_diagnostics(&DataRequest::new(DataCategory::Price, "BTC-USD"))
        .await;

    assert_eq!(response.backend_id.as_deref(), Some("OK"));
    assert!(diagnostics.errors()[0].1.contains("missing API key"));
}

#[tokio::test]
async fn test_panicking_factory_becomes_failure_response() {
    let registry = Arc::new(CapabilityRegistry::new());
    registry
        .register(
            price_backend("BROKEN", 0.95),
            Arc::new(|| -> Result<Arc<dyn DataBackend>, RoutingError> {
                panic!("missing api key")
            }),
        )
        .unwrap();
    let router = Router::new(registry.clone());
    let request = DataRequest::new(DataCategory::Price, "BTC-USD");

    let (response, diagnostics) = router.fetch_with_diagnostics(&request).await;

    assert!(!response.success);
    assert_eq!(response.error_kind(), Some(ErrorKind::AllBackendsFailed));
    assert_eq!(response.backend_id.as_deref(), Some("BROKEN"));
    assert!(diagnostics.errors()[0].1.contains("missing api key"));
    assert_eq!(router.circuit_metrics()[0].consecutive_failures, 1);

    register(&registry, price_backend("OK", 0.80), Behavior::Succeed { quality: None });
    let response = router.fetch(&request).await;
    assert_eq!(response.backend_id.as_deref(), Some("OK"));
}

#[tokio::test]
async fn test_timed_out_backend_falls_back_within_deadline() {
    let registry = Arc::new(CapabilityRegistry::new());
    register(
        &registry,
        price_backend("SLOW", 0.99),
        Behavior::Delay(Duration::from_millis(500)),
    );
    register(&registry, price_backend("FAST", 0.70), Behavior::Succeed { quality: None });
    let router = Router::new(registry);

    let request = DataRequest::new(DataCategory::Price, "BTC-USD")
        .with_timeout(Duration::from_millis(30));
    let response = router.fetch(&request).await;

    assert!(response.success);
    assert_eq!(response.backend_id.as_deref(), Some("FAST"));
}

#[tokio::test]
async fn test_fetch_deadline_bounds_sequential_fallback() {
    let registry = Arc::new(CapabilityRegistry::new());
    let first = register(
        &registry,
        price_backend("SLOW1", 0.99),
        Behavior::Delay(Duration::from_millis(400)),
    );
    let second = register(
        &registry,
        price_backend("SLOW2", 0.95),
        Behavior::Delay(Duration::from_millis(400)),
    );
    let third = register(&registry, price_backend("FAST", 0.50), Behavior::Succeed { quality: None });
    let config = RouterConfig {
        fetch_deadline: Duration::from_millis(60),
        ..RouterConfig::default()
    };
    let router = router_with(registry, config);

    let started = std::time::Instant::now();
    let (response, diagnostics) = router
        .fetch_with_diagnostics(&DataRequest::new(DataCategory::Price, "BTC-USD"))
        .await;

    assert!(started.elapsed() < Duration::from_millis(400));
    assert!(!response.success);
    assert_eq!(response.error_kind(), Some(ErrorKind::AllBackendsFailed));
    assert_eq!(response.backend_id.as_deref(), Some("SLOW1"));
    let message = &response.error.as_ref().unwrap().message;
    assert!(message.contains("deadline"), "unexpected message: {}", message);

    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 0);
    assert_eq!(third.load(Ordering::SeqCst), 0);
    assert_eq!(
        diagnostics.skip_reasons(),
        vec![
            (&BackendId::from("SLOW2"), &SkipReason::DeadlineExceeded),
            (&BackendId::from("FAST"), &SkipReason::DeadlineExceeded),
        ]
    );
}

// =============================================================================
// Circuit breaking
// =============================================================================

#[tokio::test]
async fn test_breaker_trips_after_threshold() {
    let registry = Arc::new(CapabilityRegistry::new());
    let calls = register(&registry, price_backend("FLAKY", 0.9), Behavior::Fail(transport_error("FLAKY")));
    let router = Router::new(registry);
    let request = DataRequest::new(DataCategory::Price, "BTC-USD");

    for _ in 0..5 {
        let response = router.fetch(&request).await;
        assert_eq!(response.error_kind(), Some(ErrorKind::AllBackendsFailed));
    }
    assert_eq!(router.circuit_state("FLAKY"), CircuitState::Open);

    let (response, diagnostics) = router.fetch_with_diagnostics(&request).await;
    assert_eq!(response.error_kind(), Some(ErrorKind::NoBackendsAvailable));
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(
        diagnostics.skip_reasons(),
        vec![(&BackendId::from("FLAKY"), &SkipReason::CircuitOpen)]
    );
}

#[tokio::test]
async fn test_tripped_backend_is_skipped_for_healthy_one() {
    let registry = Arc::new(CapabilityRegistry::new());
    let flaky = register(&registry, price_backend("FLAKY", 0.99), Behavior::Fail(transport_error("FLAKY")));
    let steady = register(&registry, price_backend("STEADY", 0.6), Behavior::Succeed { quality: None });
    let config = RouterConfig {
        breaker: CircuitBreakerConfig {
            failure_threshold: 2,
            cooldown: Duration::from_secs(60),
        },
        ..RouterConfig::default()
    };
    let router = router_with(registry, config);
    let request = DataRequest::new(DataCategory::Price, "BTC-USD").with_cache(false);

    for _ in 0..4 {
        assert!(router.fetch(&request).await.success);
    }

    assert_eq!(flaky.load(Ordering::SeqCst), 2);
    assert_eq!(steady.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_half_open_probe_closes_on_success() {
    let registry = Arc::new(CapabilityRegistry::new());
    register(&registry, price_backend("FLAKY", 0.9), Behavior::Fail(transport_error("FLAKY")));
    let config = RouterConfig {
        breaker: CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_millis(20),
        },
        ..RouterConfig::default()
    };
    let router = router_with(registry.clone(), config);
    let request = DataRequest::new(DataCategory::Price, "BTC-USD");

    router.fetch(&request).await;
    assert_eq!(router.circuit_state("FLAKY"), CircuitState::Open);

    // Recovered adapter under the same id
    register(&registry, price_backend("FLAKY", 0.9), Behavior::Succeed { quality: None });
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(router.circuit_state("FLAKY"), CircuitState::HalfOpen);

    assert!(router.fetch(&request).await.success);
    assert_eq!(router.circuit_state("FLAKY"), CircuitState::Closed);
}

// =============================================================================
// Rate limits
// =============================================================================

#[tokio::test]
async fn test_rate_limited_backend_is_skipped() {
    let registry = Arc::new(CapabilityRegistry::new());
    let limited = register(
        &registry,
        price_backend("LIMITED", 0.99).with_rate_limit(1, 1),
        Behavior::Succeed { quality: None },
    );
    let open = register(&registry, price_backend("OPEN", 0.5), Behavior::Succeed { quality: None });
    let router = Router::new(registry);
    let request = DataRequest::new(DataCategory::Price, "BTC-USD").with_cache(false);

    assert_eq!(router.fetch(&request).await.backend_id.as_deref(), Some("LIMITED"));
    let (response, diagnostics) = router.fetch_with_diagnostics(&request).await;

    assert_eq!(response.backend_id.as_deref(), Some("OPEN"));
    assert_eq!(limited.load(Ordering::SeqCst), 1);
    assert_eq!(open.load(Ordering::SeqCst), 1);
    assert_eq!(
        diagnostics.skip_reasons(),
        vec![(&BackendId::from("LIMITED"), &SkipReason::RateLimited)]
    );
}

// =============================================================================
// Racing
// =============================================================================

#[tokio::test]
async fn test_race_takes_first_success() {
    let registry = Arc::new(CapabilityRegistry::new());
    register(
        &registry,
        price_backend("SLOW", 0.99),
        Behavior::Delay(Duration::from_millis(300)),
    );
    register(&registry, price_backend("QUICK", 0.7), Behavior::Succeed { quality: None });
    let config = RouterConfig {
        enable_racing: true,
        ..RouterConfig::default()
    };
    let router = router_with(registry, config);

    let started = std::time::Instant::now();
    let (response, diagnostics) = router
        .fetch_with_diagnostics(&DataRequest::new(DataCategory::Price, "BTC-USD"))
        .await;

    assert!(response.success);
    assert_eq!(response.backend_id.as_deref(), Some("QUICK"));
    assert!(started.elapsed() < Duration::from_millis(300));
    assert!(diagnostics.attempts.iter().all(|a| a.raced));
}

#[tokio::test]
async fn test_race_falls_back_when_racers_fail() {
    let registry = Arc::new(CapabilityRegistry::new());
    register(&registry, price_backend("A", 0.99), Behavior::Fail(transport_error("A")));
    register(&registry, price_backend("B", 0.95), Behavior::Fail(transport_error("B")));
    let c = register(&registry, price_backend("C", 0.5), Behavior::Succeed { quality: None });
    let config = RouterConfig {
        enable_racing: true,
        ..RouterConfig::default()
    };
    let router = router_with(registry, config);

    let response = router
        .fetch(&DataRequest::new(DataCategory::Price, "BTC-USD"))
        .await;

    assert_eq!(response.backend_id.as_deref(), Some("C"));
    assert_eq!(c.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_race_without_fallback_returns_failure() {
    let registry = Arc::new(CapabilityRegistry::new());
    register(&registry, price_backend("A", 0.99), Behavior::Fail(transport_error("A")));
    register(&registry, price_backend("B", 0.95), Behavior::Fail(transport_error("B")));
    let c = register(&registry, price_backend("C", 0.5), Behavior::Succeed { quality: None });
    let config = RouterConfig {
        enable_racing: true,
        enable_fallback: false,
        ..RouterConfig::default()
    };
    let router = router_with(registry, config);

    let response = router
        .fetch(&DataRequest::new(DataCategory::Price, "BTC-USD"))
        .await;

    assert!(!response.success);
    assert_eq!(response.error_kind(), Some(ErrorKind::Transport));
    assert_eq!(c.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_single_candidate_is_not_raced() {
    let registry = Arc::new(CapabilityRegistry::new());
    register(&registry, price_backend("ONLY", 0.9), Behavior::Succeed { quality: None });
    let config = RouterConfig {
        enable_racing: true,
        ..RouterConfig::default()
    };
    let router = router_with(registry, config);

    let (response, diagnostics) = router
        .fetch_with_diagnostics(&DataRequest::new(DataCategory::Price, "BTC-USD"))
        .await;

    assert!(response.success);
    assert!(!diagnostics.attempts[0].raced);
}

// =============================================================================
// Config and health
// =============================================================================

#[test]
fn test_invalid_config_is_rejected() {
    let registry = Arc::new(CapabilityRegistry::new());
    let config = RouterConfig {
        enable_racing: true,
        racing_width: 1,
        ..RouterConfig::default()
    };
    assert!(matches!(
        Router::with_config(registry.clone(), config),
        Err(RoutingError::Validation(_))
    ));

    let config = RouterConfig {
        fetch_deadline: Duration::ZERO,
        ..RouterConfig::default()
    };
    assert!(matches!(
        Router::with_config(registry, config),
        Err(RoutingError::Validation(_))
    ));
}

#[tokio::test]
async fn test_health_check_all() {
    let registry = Arc::new(CapabilityRegistry::new());
    register(&registry, price_backend("UP", 0.9), Behavior::Succeed { quality: None });
    register(&registry, price_backend("DOWN", 0.9), Behavior::Fail(transport_error("DOWN")));
    let router = Router::new(registry);

    let mut report = router.health_check_all().await;
    report.sort_by(|a, b| a.backend_id.cmp(&b.backend_id));

    assert_eq!(report.len(), 2);
    assert_eq!(report[0].backend_id, "DOWN");
    assert!(!report[0].healthy);
    assert_eq!(report[1].backend_id, "UP");
    assert!(report[1].healthy);
    assert!(report.iter().all(|h| h.circuit_state == CircuitState::Closed));
}
