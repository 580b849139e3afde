//! Retry, dedup and pacing behaviour of the graph walk, on a paused clock

mod common;

use common::MockApi;
use pokedex_sync::config::RunConfig;
use pokedex_sync::error::FetchError;
use pokedex_sync::etl::Extractor;
use pokedex_sync::model::{ResourceKey, ResourceKind};
use pokedex_sync::pokeapi::GraphExtractor;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn extractor(api: &Arc<MockApi>, config: &RunConfig) -> GraphExtractor<MockApi> {
    GraphExtractor::new(Arc::clone(api), config)
}

fn retrying_config() -> RunConfig {
    RunConfig {
        max_retries: 2,
        initial_backoff: Duration::from_millis(100),
        max_backoff: Duration::from_secs(1),
        ..common::config(10)
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_retried_up_to_bound() {
    let key = ResourceKey::creature(3);
    let api = Arc::new(MockApi::new(10).unavailable(key.clone()));
    let extractor = extractor(&api, &retrying_config());
    let session = extractor.start_session();

    let start = Instant::now();
    let extraction = extractor
        .extract(&session, vec![key.clone()], &CancellationToken::new())
        .await
        .unwrap();

    assert!(extraction.items.is_empty());
    assert_eq!(api.calls(&key), 3);
    let outcome = extraction.report.outcome(&key).unwrap();
    assert_eq!(outcome.attempts, 3);
    assert!(matches!(outcome.error, Some(FetchError::Transient { status: Some(503), .. })));
    // Two jittered waits of at least 50ms and 100ms
    assert!(start.elapsed() >= Duration::from_millis(150));
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_not_retried() {
    let key = ResourceKey::creature(4);
    let api = Arc::new(MockApi::new(10).missing(key.clone()));
    let extractor = extractor(&api, &retrying_config());
    let session = extractor.start_session();

    let extraction = extractor
        .extract(&session, vec![key.clone()], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(api.calls(&key), 1);
    assert_eq!(extraction.report.outcome(&key).unwrap().attempts, 1);
    assert_eq!(extraction.report.failed(), 1);
    assert_eq!(api.total_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_flaky_resource_recovers() {
    let key = ResourceKey::creature(5);
    let api = Arc::new(MockApi::new(10).flaky(key.clone(), 2));
    let extractor = extractor(&api, &retrying_config());
    let session = extractor.start_session();

    let extraction = extractor
        .extract(&session, vec![key.clone()], &CancellationToken::new())
        .await
        .unwrap();

    let outcome = extraction.report.outcome(&key).unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.attempts, 3);
    assert!(extraction.items.iter().any(|payload| payload.key == key));
    assert_eq!(extraction.report.failed(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shared_resources_fetched_once_per_session() {
    let api = Arc::new(MockApi::new(10));
    let extractor = extractor(&api, &common::config(10));
    let session = extractor.start_session();
    let cancel = CancellationToken::new();

    let roots: Vec<_> = (1..=6).map(ResourceKey::creature).collect();
    let first = extractor.extract(&session, roots.clone(), &cancel).await.unwrap();
    let calls_after_first = api.total_calls();
    let second = extractor.extract(&session, roots, &cancel).await.unwrap();

    assert_eq!(first.report.failed(), 0);
    assert!(api.calls(&ResourceKey::new(ResourceKind::Type, "type-1")) == 1);
    assert!(api.calls(&ResourceKey::new(ResourceKind::Move, "move-3")) == 1);
    assert!(second.items.is_empty());
    assert_eq!(api.total_calls(), calls_after_first);
    // Every fetched payload is distinct
    let mut keys: Vec<_> = first.items.iter().map(|p| p.key.clone()).collect();
    keys.dedup();
    assert_eq!(keys.len(), first.items.len());
}

#[tokio::test(start_paused = true)]
async fn test_new_session_fetches_again() {
    let api = Arc::new(MockApi::new(10));
    let extractor = extractor(&api, &common::config(10));
    let cancel = CancellationToken::new();
    let roots = vec![ResourceKey::creature(1)];

    extractor.extract(&extractor.start_session(), roots.clone(), &cancel).await.unwrap();
    extractor.extract(&extractor.start_session(), roots, &cancel).await.unwrap();

    assert_eq!(api.calls(&ResourceKey::creature(1)), 2);
}

#[tokio::test(start_paused = true)]
async fn test_request_rate_stays_within_bound() {
    let api = Arc::new(MockApi::new(12).with_latency(Duration::from_millis(30)));
    let config = RunConfig {
        concurrency: 8,
        rate_limit_rps: 5.0,
        rate_limit_burst: 2,
        ..common::config(12)
    };
    let extractor = extractor(&api, &config);
    let session = extractor.start_session();

    let roots: Vec<_> = (1..=12).map(ResourceKey::creature).collect();
    let extraction = extractor
        .extract(&session, roots, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(extraction.report.failed(), 0);
    assert!(api.request_count() > 20);
    assert!(api.max_per_second() <= 5 + 2 - 1, "{} in one second", api.max_per_second());
}

#[tokio::test(start_paused = true)]
async fn test_retries_share_the_rate_limit() {
    let api = Arc::new(
        MockApi::new(10)
            .unavailable(ResourceKey::creature(1))
            .unavailable(ResourceKey::creature(2)),
    );
    let config = RunConfig {
        max_retries: 4,
        rate_limit_rps: 2.0,
        rate_limit_burst: 1,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
        ..common::config(10)
    };
    let extractor = extractor(&api, &config);
    let session = extractor.start_session();

    extractor
        .extract(
            &session,
            vec![ResourceKey::creature(1), ResourceKey::creature(2)],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(api.total_calls(), 10);
    assert!(api.max_per_second() <= 2);
}

#[tokio::test(start_paused = true)]
async fn test_listing_pages_until_limit() {
    let api = Arc::new(MockApi::new(250));
    let extractor = extractor(&api, &common::config(10));
    let session = extractor.start_session();

    let roots = extractor.discover_roots(&session, 40, 150).await.unwrap();

    assert_eq!(roots.len(), 150);
    assert_eq!(roots.first(), Some(&ResourceKey::creature(41)));
    assert_eq!(roots.last(), Some(&ResourceKey::creature(190)));

    let tail = extractor.discover_roots(&session, 240, 50).await.unwrap();
    assert_eq!(tail.len(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_walk() {
    let api = Arc::new(MockApi::new(10).with_latency(Duration::from_secs(5)));
    let extractor = extractor(&api, &common::config(10));
    let session = extractor.start_session();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });
    let start = Instant::now();
    let result = extractor
        .extract(&session, (1..=4).map(ResourceKey::creature).collect(), &cancel)
        .await;

    assert!(result.is_err());
    assert!(start.elapsed() < Duration::from_secs(5));
}
