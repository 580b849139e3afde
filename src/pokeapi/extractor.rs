//! Bounded-concurrency walk of the resource graph

use super::{RateLimiter, RelatedPolicy, RetryPolicy, SeenSet};
use crate::client::ResourceSource;
use crate::config::RunConfig;
use crate::error::{Cancelled, FetchError};
use crate::etl::{Extraction, Extractor, FetchReport};
use crate::model::{RawPayload, ResourceKey, ResourceKind};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const LISTING_PAGE_SIZE: usize = 100;

/// State shared by every batch of one run.
#[derive(Debug, Clone)]
pub struct FetchSession {
    seen: Arc<SeenSet>,
    limiter: Arc<RateLimiter>,
}

impl FetchSession {
    pub fn new(limiter: RateLimiter) -> Self {
        Self {
            seen: Arc::new(SeenSet::new()),
            limiter: Arc::new(limiter),
        }
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

/// Extractor that walks from root creatures to their related resources.
///
/// At most `concurrency` fetches are in flight at once. A resource is fetched
/// at most once per session, however many payloads reference it.
pub struct GraphExtractor<S> {
    source: Arc<S>,
    retry: RetryPolicy,
    policy: RelatedPolicy,
    concurrency: usize,
    rate_limit_rps: f64,
    rate_limit_burst: u32,
}

impl<S: ResourceSource> GraphExtractor<S> {
    pub fn new(source: Arc<S>, config: &RunConfig) -> Self {
        Self {
            source,
            retry: config.retry_policy(),
            policy: config.related_policy(),
            concurrency: config.concurrency.max(1),
            rate_limit_rps: config.rate_limit_rps,
            rate_limit_burst: config.rate_limit_burst,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn policy(&self) -> &RelatedPolicy {
        &self.policy
    }

    /// Fetch `roots` and, transitively, the sub-resources `policy` selects.
    ///
    /// Roots already claimed earlier in the session are skipped. Payloads are
    /// returned ordered by key. Failures are recorded in the report and do not
    /// stop the walk; a failed payload contributes no children.
    ///
    /// # Errors
    /// Returns [`Cancelled`] when `cancel` fires. Outstanding fetches are
    /// aborted and nothing fetched so far is returned.
    pub async fn fetch_graph(
        &self,
        session: &FetchSession,
        roots: Vec<ResourceKey>,
        policy: &RelatedPolicy,
        cancel: &CancellationToken,
    ) -> Result<(Vec<RawPayload>, FetchReport), Cancelled> {
        let worker = Worker {
            source: self.source.clone(),
            limiter: session.limiter.clone(),
            seen: session.seen.clone(),
            retry: self.retry,
            policy: Arc::new(policy.clone()),
        };

        let mut queue: VecDeque<ResourceKey> = roots
            .into_iter()
            .filter(|key| session.seen.claim(key))
            .collect();
        let mut tasks = JoinSet::new();
        let mut in_flight = HashMap::new();
        let mut payloads = Vec::new();
        let mut report = FetchReport::default();

        loop {
            while in_flight.len() < self.concurrency {
                let Some(key) = queue.pop_front() else {
                    break;
                };
                let handle = tasks.spawn(fetch_one(worker.clone(), key.clone()));
                in_flight.insert(handle.id(), key);
            }
            if in_flight.is_empty() {
                break;
            }

            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::debug!("Cancelling {} in-flight fetch(es)", in_flight.len());
                    tasks.abort_all();
                    return Err(Cancelled);
                }
                joined = tasks.join_next_with_id() => joined,
            };

            match joined {
                Some(Ok((id, fetched))) => {
                    in_flight.remove(&id);
                    match fetched.result {
                        Ok(body) => {
                            log::trace!(
                                "Fetched {} ({} new reference(s))",
                                fetched.key,
                                fetched.children.len()
                            );
                            report.record_success(fetched.key.clone(), fetched.attempts);
                            queue.extend(fetched.children);
                            payloads.push(RawPayload::new(fetched.key, body));
                        }
                        Err(err) => {
                            log::warn!(
                                "Failed to fetch {} after {} attempt(s): {}",
                                fetched.key,
                                fetched.attempts,
                                err
                            );
                            report.record_failure(fetched.key, fetched.attempts, err);
                        }
                    }
                }
                Some(Err(err)) => {
                    if let Some(key) = in_flight.remove(&err.id()) {
                        log::error!("Fetch worker for {} failed: {}", key, err);
                        report.record_failure(
                            key,
                            1,
                            FetchError::permanent(format!("fetch worker failed: {}", err)),
                        );
                    }
                }
                None => break,
            }
        }

        payloads.sort_by(|a, b| a.key.cmp(&b.key));
        Ok((payloads, report))
    }
}

impl<S: ResourceSource> Extractor for GraphExtractor<S> {
    type Item = RawPayload;
    type Session = FetchSession;

    fn start_session(&self) -> FetchSession {
        FetchSession::new(RateLimiter::new(self.rate_limit_rps, self.rate_limit_burst))
    }

    async fn discover_roots(
        &self,
        session: &FetchSession,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ResourceKey>, FetchError> {
        let mut roots = Vec::with_capacity(limit);
        let mut cursor = offset;

        while roots.len() < limit {
            let page_size = (limit - roots.len()).min(LISTING_PAGE_SIZE);
            let label = format!("{} listing at offset {}", ResourceKind::Creature, cursor);
            let source = self.source.as_ref();
            let (_, page) = self
                .retry
                .run(session.limiter(), &label, move || {
                    source.list(ResourceKind::Creature, cursor, page_size)
                })
                .await;
            let page = page?;

            if page.results.is_empty() {
                break;
            }
            cursor += page.results.len();

            for entry in page.results {
                match ResourceKey::from_url(ResourceKind::Creature, &entry.url)
                    .filter(|key| key.numeric_id().is_some())
                {
                    Some(key) => roots.push(key),
                    None => log::warn!(
                        "Skipping listing entry '{}' with unusable URL '{}'",
                        entry.name,
                        entry.url
                    ),
                }
            }

            if page.next.is_none() {
                break;
            }
        }

        roots.truncate(limit);
        log::debug!("Discovered {} root(s) from offset {}", roots.len(), offset);
        Ok(roots)
    }

    async fn extract(
        &self,
        session: &FetchSession,
        roots: Vec<ResourceKey>,
        cancel: &CancellationToken,
    ) -> Result<Extraction<RawPayload>, Cancelled> {
        let root_count = roots.len();
        let (payloads, report) = self.fetch_graph(session, roots, &self.policy, cancel).await?;
        log::info!(
            "Fetched {} resource(s) for {} root(s), {} failed",
            report.fetched(),
            root_count,
            report.failed()
        );
        Ok(Extraction::new(payloads, report))
    }

    fn release(&self, session: &FetchSession, keys: &[ResourceKey]) {
        let released = session.seen.release(keys);
        log::debug!("Released {} of {} key(s) for refetching", released, keys.len());
    }
}

struct Worker<S> {
    source: Arc<S>,
    limiter: Arc<RateLimiter>,
    seen: Arc<SeenSet>,
    retry: RetryPolicy,
    policy: Arc<RelatedPolicy>,
}

impl<S> Clone for Worker<S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            limiter: self.limiter.clone(),
            seen: self.seen.clone(),
            retry: self.retry,
            policy: self.policy.clone(),
        }
    }
}

struct Fetched {
    key: ResourceKey,
    attempts: u32,
    result: Result<Value, FetchError>,
    /// Newly claimed references, empty on failure
    children: Vec<ResourceKey>,
}

async fn fetch_one<S: ResourceSource>(worker: Worker<S>, key: ResourceKey) -> Fetched {
    let source = worker.source.as_ref();
    let target = &key;
    let (attempts, result) = worker
        .retry
        .run(&worker.limiter, target, move || source.fetch(target))
        .await;

    let children = match &result {
        Ok(body) => worker.seen.claim_new(worker.policy.children_of(&key, body)),
        Err(_) => Vec::new(),
    };

    Fetched {
        key,
        attempts,
        result,
        children,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{NamedResource, ResourcePage};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Two creatures sharing a type, plus whatever they reference.
    #[derive(Default)]
    struct TinyGraph {
        calls: Mutex<Vec<ResourceKey>>,
        active: AtomicUsize,
        peak: AtomicUsize,
        missing: HashSet<ResourceKey>,
    }

    impl TinyGraph {
        fn body(key: &ResourceKey) -> Value {
            match key.kind {
                ResourceKind::Creature => json!({
                    "id": key.numeric_id(),
                    "species": {"name": format!("species-{}", key.id)},
                    "types": [{"slot": 1, "type": {"name": "grass"}}],
                    "abilities": [],
                    "moves": [{"move": {"name": "tackle"}}, {"move": {"name": format!("move-{}", key.id)}}]
                }),
                ResourceKind::Move => json!({"type": {"name": "normal"}}),
                _ => json!({}),
            }
        }
    }

    impl ResourceSource for TinyGraph {
        async fn fetch(&self, key: &ResourceKey) -> Result<Value, FetchError> {
            self.calls.lock().unwrap().push(key.clone());
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.missing.contains(key) {
                return Err(FetchError::Permanent {
                    status: Some(404),
                    message: "not found".into(),
                });
            }
            Ok(Self::body(key))
        }

        async fn list(
            &self,
            _kind: ResourceKind,
            offset: usize,
            limit: usize,
        ) -> Result<ResourcePage, FetchError> {
            let total = 5;
            let results = (offset..total.min(offset + limit))
                .map(|i| NamedResource {
                    name: format!("creature-{}", i + 1),
                    url: format!("https://pokeapi.co/api/v2/pokemon/{}/", i + 1),
                })
                .collect();
            Ok(ResourcePage {
                count: total as u64,
                next: (offset + limit < total).then(|| "more".to_string()),
                results,
            })
        }
    }

    fn config() -> RunConfig {
        RunConfig {
            concurrency: 2,
            rate_limit_rps: 1000.0,
            ..RunConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_walk_fetches_each_resource_once() {
        let source = Arc::new(TinyGraph::default());
        let extractor = GraphExtractor::new(source.clone(), &config());
        let session = extractor.start_session();

        let extraction = extractor
            .extract(
                &session,
                vec![ResourceKey::creature(1), ResourceKey::creature(2)],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let calls = source.calls.lock().unwrap().clone();
        let unique: HashSet<_> = calls.iter().cloned().collect();
        assert_eq!(calls.len(), unique.len(), "duplicate fetches: {:?}", calls);
        // 2 creatures, 2 species, grass, normal, tackle, move-1, move-2
        assert_eq!(calls.len(), 9);
        assert_eq!(extraction.items.len(), 9);
        assert_eq!(extraction.report.failed(), 0);
        assert!(source.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seen_set_spans_batches_of_a_session() {
        let source = Arc::new(TinyGraph::default());
        let extractor = GraphExtractor::new(source.clone(), &config());
        let session = extractor.start_session();
        let cancel = CancellationToken::new();

        extractor
            .extract(&session, vec![ResourceKey::creature(1)], &cancel)
            .await
            .unwrap();
        let second = extractor
            .extract(&session, vec![ResourceKey::creature(2)], &cancel)
            .await
            .unwrap();

        // grass, normal and tackle were fetched by the first batch
        let keys: Vec<String> = second.items.iter().map(|p| p.key.to_string()).collect();
        assert_eq!(
            keys,
            vec!["pokemon/2", "pokemon-species/species-2", "move/move-2"]
        );

        // A fresh session starts from scratch
        let fresh = extractor.start_session();
        let third = extractor
            .extract(&fresh, vec![ResourceKey::creature(2)], &cancel)
            .await
            .unwrap();
        assert_eq!(third.items.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_keys_are_fetched_again() {
        let source = Arc::new(TinyGraph::default());
        let extractor = GraphExtractor::new(source.clone(), &config());
        let session = extractor.start_session();
        let cancel = CancellationToken::new();

        let first = extractor
            .extract(&session, vec![ResourceKey::creature(1)], &cancel)
            .await
            .unwrap();
        let fetched: Vec<ResourceKey> = first.report.fetched_keys().cloned().collect();
        extractor.release(&session, &fetched);

        let second = extractor
            .extract(&session, vec![ResourceKey::creature(2)], &cancel)
            .await
            .unwrap();
        let keys: Vec<String> = second.items.iter().map(|p| p.key.to_string()).collect();
        assert!(keys.contains(&"move/tackle".to_string()));
        assert!(keys.contains(&"type/grass".to_string()));
        assert_eq!(second.items.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_root_recorded_without_children() {
        let mut graph = TinyGraph::default();
        graph.missing.insert(ResourceKey::creature(2));
        let source = Arc::new(graph);
        let extractor = GraphExtractor::new(source.clone(), &config());
        let session = extractor.start_session();

        let extraction = extractor
            .extract(
                &session,
                vec![ResourceKey::creature(1), ResourceKey::creature(2)],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let outcome = extraction
            .report
            .outcome(&ResourceKey::creature(2))
            .unwrap();
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.error.as_ref().and_then(|e| e.status()), Some(404));
        assert_eq!(extraction.report.failed(), 1);
        assert!(
            !extraction
                .items
                .iter()
                .any(|p| p.key.id == "species-2")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_abandons_batch() {
        let source = Arc::new(TinyGraph::default());
        let extractor = GraphExtractor::new(source.clone(), &config());
        let session = extractor.start_session();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            trigger.cancel();
        });

        let result = extractor
            .extract(&session, vec![ResourceKey::creature(1)], &cancel)
            .await;
        assert_eq!(result.unwrap_err(), Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discover_roots_pages_through_listing() {
        let source = Arc::new(TinyGraph::default());
        let extractor = GraphExtractor::new(source, &config());
        let session = extractor.start_session();

        let roots = extractor.discover_roots(&session, 1, 3).await.unwrap();
        assert_eq!(
            roots,
            vec![
                ResourceKey::creature(2),
                ResourceKey::creature(3),
                ResourceKey::creature(4)
            ]
        );

        // Asking past the end returns what exists
        let roots = extractor.discover_roots(&session, 3, 10).await.unwrap();
        assert_eq!(roots.len(), 2);
    }
}
