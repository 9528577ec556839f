//! The caller-facing client.

use crate::config::{ClientConfig, StoreConfig};
use crate::dispatcher::{
    self, ClientStats, MutationHandle, MutationOptions, MutationState, MutationStatus,
    StatsCounters,
};
use crate::error::{ClientError, ClientResult};
use crate::queue::{DrainLoop, OperationQueue};
use crate::reachability::ReachabilityMonitor;
use crate::transport::{send_with_timeout, GraphQLError, GraphQLRequest, Transport};
use gqlsync_cache::{CacheStore, GraphQLOperation, MutationId, Transaction, WriteMode};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prefix of client-generated IDs for objects the server has not seen yet.
pub const TEMPORARY_ID_PREFIX: &str = "TEMPORARY-";

/// Returns a fresh `TEMPORARY-<uuid>` ID for optimistic objects.
pub fn temporary_id() -> String {
    format!("{TEMPORARY_ID_PREFIX}{}", Uuid::new_v4())
}

/// Returns true if `id` was produced by [`temporary_id`].
pub fn is_temporary_id(id: &str) -> bool {
    id.starts_with(TEMPORARY_ID_PREFIX)
}

/// Where a query result may come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Only the cache; a miss is an error.
    CacheOnly,
    /// Only the network; the result is written to the cache.
    NetworkOnly,
    /// The cache if it has the data, else the network.
    #[default]
    CacheFirst,
    /// The cache if it has the data, then the network.
    CacheThenNetwork,
}

/// Where a query result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Materialized from the cache, overlays included.
    Cache,
    /// Returned by the server.
    Network,
}

/// A query result.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse<D> {
    /// Typed data.
    pub data: D,
    /// Errors the server reported alongside the data.
    pub errors: Vec<GraphQLError>,
    /// Where the data came from.
    pub source: ResponseSource,
}

/// A GraphQL client with a normalized cache, optimistic updates and an
/// offline-aware mutation queue.
///
/// The client must be created inside a Tokio runtime; it spawns one task
/// that drains the mutation queue.
pub struct Client<T: Transport> {
    store: Arc<CacheStore>,
    transport: Arc<T>,
    queue: Arc<OperationQueue>,
    reachability: ReachabilityMonitor,
    config: ClientConfig,
    stats: Arc<StatsCounters>,
    next_mutation: AtomicU64,
    shutdown: watch::Sender<bool>,
    drain_task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> Client<T> {
    /// Creates a client and starts its queue.
    ///
    /// # Errors
    ///
    /// Fails if called outside a Tokio runtime or if the configured store
    /// cannot be opened.
    pub fn new(
        config: ClientConfig,
        transport: T,
        reachability: ReachabilityMonitor,
    ) -> ClientResult<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ClientError::NoRuntime(e.to_string()))?;

        let mut store = match &config.store {
            StoreConfig::InMemory => CacheStore::in_memory(),
            StoreConfig::File { path } => CacheStore::open_file(path)?,
        };
        if let Some(resolver) = &config.key_resolver {
            store = store.with_key_resolver(Arc::clone(resolver));
        }

        let store = Arc::new(store);
        let transport = Arc::new(transport);
        let queue = Arc::new(OperationQueue::new());
        let stats = Arc::new(StatsCounters::default());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let drain = DrainLoop {
            transport: Arc::clone(&transport),
            queue: Arc::clone(&queue),
            reachability: reachability.clone(),
            retry: config.retry.clone(),
            offline_timeout: config.offline_timeout,
            request_timeout: config.request_timeout,
            stats: Arc::clone(&stats),
            shutdown: shutdown_rx,
        };
        let task = runtime.spawn(drain.run());

        info!(
            store = ?config.store,
            reachable = reachability.is_reachable(),
            "client started"
        );

        Ok(Self {
            store,
            transport,
            queue,
            reachability,
            config,
            stats,
            next_mutation: AtomicU64::new(1),
            shutdown,
            drain_task: Mutex::new(Some(task)),
        })
    }

    /// Performs `mutation`.
    ///
    /// The optimistic update in `options`, if any, is applied before this
    /// returns, so any read issued afterwards sees it. The mutation is then
    /// queued; the returned handle resolves once the server's response has
    /// been reconciled into the cache, or with the error that ended it.
    ///
    /// # Errors
    ///
    /// Returns the cache error if the optimistic update fails (nothing is
    /// queued and nothing stays in the cache), or [`ClientError::Shutdown`]
    /// after [`Client::shutdown`].
    pub fn perform<M>(
        &self,
        mutation: M,
        options: MutationOptions<M>,
    ) -> ClientResult<MutationHandle<M::Data>>
    where
        M: GraphQLOperation + 'static,
    {
        if self.queue.is_closed() {
            return Err(ClientError::Shutdown);
        }

        let id = MutationId::new(self.next_mutation.fetch_add(1, Ordering::SeqCst));
        let status = Arc::new(MutationStatus::new(id));
        let MutationOptions {
            optimistic_update,
            authoritative_update,
            rollback_update,
        } = options;

        if let Some(update) = optimistic_update {
            if let Err(e) = self.store.apply_optimistic(id, update) {
                warn!(mutation = %id, error = %e, "optimistic update failed, mutation not queued");
                return Err(e.into());
            }
            status.transition(MutationState::OptimisticApplied);
        }

        let operation = mutation.operation_name().to_string();
        let (pending, handle) = dispatcher::prepare(
            id,
            mutation,
            authoritative_update,
            rollback_update,
            Arc::clone(&status),
            Arc::clone(&self.store),
            Arc::clone(&self.queue),
            Arc::clone(&self.stats),
        );

        status.transition(MutationState::Queued);
        if let Err(rejected) = self.queue.push(pending) {
            drop(rejected);
            return Err(ClientError::Shutdown);
        }
        self.stats.record_performed();
        debug!(mutation = %id, %operation, "mutation queued");
        Ok(handle)
    }

    /// Fetches `query` under `policy`, passing each result to `handler`.
    ///
    /// `handler` runs once, except under [`CachePolicy::CacheThenNetwork`]
    /// with a cache hit, where it runs for the cached and then the network
    /// result. Network results are written to the cache before `handler`
    /// sees them.
    pub async fn fetch<Q, H>(&self, query: &Q, policy: CachePolicy, mut handler: H)
    where
        Q: GraphQLOperation,
        H: FnMut(ClientResult<QueryResponse<Q::Data>>),
    {
        match policy {
            CachePolicy::CacheOnly => handler(self.fetch_cached(query)),
            CachePolicy::NetworkOnly => handler(self.fetch_network(query).await),
            CachePolicy::CacheFirst => match self.fetch_cached(query) {
                Err(e) if e.is_cache_miss() => handler(self.fetch_network(query).await),
                cached => handler(cached),
            },
            CachePolicy::CacheThenNetwork => {
                match self.fetch_cached(query) {
                    Err(e) if e.is_cache_miss() => {}
                    cached => handler(cached),
                }
                handler(self.fetch_network(query).await);
            }
        }
    }

    /// Fetches `query` under `policy` and returns the last result.
    pub async fn fetch_one<Q>(
        &self,
        query: &Q,
        policy: CachePolicy,
    ) -> ClientResult<QueryResponse<Q::Data>>
    where
        Q: GraphQLOperation,
    {
        let mut last = None;
        self.fetch(query, policy, |result| last = Some(result)).await;
        last.unwrap_or_else(|| Err(ClientError::transport_fatal("fetch produced no result")))
    }

    /// Reads `query` from the cache, overlays included.
    pub fn read_query<Q: GraphQLOperation>(&self, query: &Q) -> ClientResult<Q::Data> {
        Ok(self.store.materialize(query)?)
    }

    /// Runs `f` in an authoritative cache transaction.
    pub fn transaction<R>(&self, f: impl FnOnce(&mut Transaction<'_>) -> R) -> R {
        self.store.transaction(WriteMode::Authoritative, f)
    }

    /// Returns the cache store.
    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Returns the reachability monitor.
    pub fn reachability(&self) -> &ReachabilityMonitor {
        &self.reachability
    }

    /// Returns the transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns mutation statistics.
    pub fn stats(&self) -> ClientStats {
        self.stats.snapshot()
    }

    /// Returns the number of mutations waiting to be sent.
    pub fn queued_mutations(&self) -> usize {
        self.queue.len()
    }

    /// Stops the queue.
    ///
    /// Every mutation not yet completed resolves with
    /// [`ClientError::Shutdown`] and its overlay is dropped; later calls to
    /// [`Client::perform`] fail the same way. The cache backend is then
    /// compacted and flushed.
    pub async fn shutdown(&self) {
        info!(queued = self.queue.len(), "client shutting down");
        self.shutdown.send_replace(true);
        drop(self.queue.close());

        let task = self.drain_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "drain task ended abnormally");
            }
        }
        if let Err(e) = self.store.compact() {
            warn!(error = %e, "failed to compact cache on shutdown");
        }
        if let Err(e) = self.store.flush() {
            warn!(error = %e, "failed to flush cache on shutdown");
        }
    }

    fn fetch_cached<Q: GraphQLOperation>(&self, query: &Q) -> ClientResult<QueryResponse<Q::Data>> {
        let data = self.store.materialize(query)?;
        Ok(QueryResponse {
            data,
            errors: Vec::new(),
            source: ResponseSource::Cache,
        })
    }

    async fn fetch_network<Q: GraphQLOperation>(
        &self,
        query: &Q,
    ) -> ClientResult<QueryResponse<Q::Data>> {
        if !self.reachability.is_reachable() {
            return Err(ClientError::Unreachable {
                waited: Duration::ZERO,
            });
        }

        let request = GraphQLRequest::from_operation(query);
        let retry = &self.config.retry;
        let mut failures = 0u32;
        let response = loop {
            debug!(operation = %request.operation_name, attempt = failures + 1, "fetching query");
            match send_with_timeout(
                self.transport.as_ref(),
                request.clone(),
                self.config.request_timeout,
            )
            .await
            {
                Err(e) if e.is_retryable() && retry.allows_retry(failures + 1) => {
                    failures += 1;
                    let delay = retry.delay_for_attempt(failures);
                    warn!(operation = %request.operation_name, attempt = failures, ?delay, error = %e, "query fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                outcome => break outcome?,
            }
        };

        let (data, errors) = response.into_parts()?;
        let typed: Q::Data = serde_json::from_value(data.clone())?;
        let changed = self.store.write_result(query, &data)?;
        debug!(operation = %request.operation_name, changed = changed.len(), "query result cached");

        Ok(QueryResponse {
            data: typed,
            errors,
            source: ResponseSource::Network,
        })
    }
}

impl<T: Transport> Drop for Client<T> {
    fn drop(&mut self) {
        // Wake the drain loop and settle anything still queued.
        self.shutdown.send_replace(true);
        drop(self.queue.close());
    }
}

impl<T: Transport> fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("reachable", &self.reachability.is_reachable())
            .field("queued", &self.queue.len())
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{GraphQLResponse, MockTransport};
    use gqlsync_testkit::{list_posts_json, ListPostsQuery, Post};

    #[test]
    fn temporary_ids_are_unique_and_tagged() {
        let a = temporary_id();
        let b = temporary_id();
        assert_ne!(a, b);
        assert!(is_temporary_id(&a));
        assert!(!is_temporary_id("42"));
    }

    #[test]
    fn new_outside_runtime_fails() {
        let result = Client::new(
            ClientConfig::default(),
            MockTransport::new(),
            ReachabilityMonitor::default(),
        );
        assert!(matches!(result, Err(ClientError::NoRuntime(_))));
    }

    #[tokio::test]
    async fn cache_first_falls_back_to_network() {
        let transport = MockTransport::new();
        transport.push_response(GraphQLResponse::ok(list_posts_json(&[Post::new("1", "one")])));
        let client = Client::new(ClientConfig::default(), transport, ReachabilityMonitor::default()).unwrap();

        let first = client.fetch_one(&ListPostsQuery, CachePolicy::CacheFirst).await.unwrap();
        assert_eq!(first.source, ResponseSource::Network);

        let second = client.fetch_one(&ListPostsQuery, CachePolicy::CacheFirst).await.unwrap();
        assert_eq!(second.source, ResponseSource::Cache);
        assert_eq!(second.data, first.data);
        assert_eq!(client.transport().send_count(), 1);
    }

    #[tokio::test]
    async fn cache_then_network_delivers_twice() {
        let transport = MockTransport::new();
        transport.push_response(GraphQLResponse::ok(list_posts_json(&[Post::new("1", "fresh")])));
        let client = Client::new(ClientConfig::default(), transport, ReachabilityMonitor::default()).unwrap();
        client
            .store()
            .write_result(&ListPostsQuery, &list_posts_json(&[Post::new("1", "stale")]))
            .unwrap();

        let mut seen = Vec::new();
        client
            .fetch(&ListPostsQuery, CachePolicy::CacheThenNetwork, |result| {
                let response = result.unwrap();
                seen.push((response.source, response.data.posts[0].title.clone()));
            })
            .await;

        assert_eq!(
            seen,
            vec![
                (ResponseSource::Cache, "stale".to_string()),
                (ResponseSource::Network, "fresh".to_string()),
            ]
        );
        assert_eq!(client.read_query(&ListPostsQuery).unwrap().posts[0].title, "fresh");
    }

    #[tokio::test]
    async fn network_fetch_fails_fast_when_unreachable() {
        let client = Client::new(
            ClientConfig::default(),
            MockTransport::new(),
            ReachabilityMonitor::unreachable(),
        )
        .unwrap();
        let err = client.fetch_one(&ListPostsQuery, CachePolicy::NetworkOnly).await.unwrap_err();
        assert!(matches!(err, ClientError::Unreachable { .. }));
        assert_eq!(client.transport().send_count(), 0);
    }
}
