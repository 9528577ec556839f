//! Operation queue and its drain loop.
//!
//! Mutations leave the queue in the order they entered it. The drain loop
//! takes the head only while the network is reachable, sends it, retries
//! retryable failures with backoff, and only then moves on to the next
//! entry. While the network is down the head stays in the queue, so it can
//! still be cancelled.

use crate::config::RetryConfig;
use crate::dispatcher::{MutationState, MutationStatus, PendingMutation, StatsCounters};
use crate::error::{ClientError, ClientResult};
use crate::reachability::ReachabilityMonitor;
use crate::transport::{send_with_timeout, GraphQLRequest, GraphQLResponse, Transport};
use gqlsync_cache::MutationId;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<PendingMutation>,
    closed: bool,
}

/// FIFO of mutations waiting to be sent.
#[derive(Debug, Default)]
pub(crate) struct OperationQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl OperationQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends `pending`, or hands it back if the queue is closed.
    pub(crate) fn push(&self, pending: PendingMutation) -> Result<(), PendingMutation> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(pending);
            }
            state.items.push_back(pending);
        }
        self.notify.notify_one();
        Ok(())
    }

    pub(crate) fn pop_front(&self) -> Option<PendingMutation> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        state.items.pop_front()
    }

    /// Removes the entry for `id` if it has not been taken yet.
    pub(crate) fn remove(&self, id: MutationId) -> Option<PendingMutation> {
        let mut state = self.state.lock();
        let position = state.items.iter().position(|p| p.id == id)?;
        state.items.remove(position)
    }

    /// Returns the head's ID and enqueue time.
    pub(crate) fn head(&self) -> Option<(MutationId, Instant)> {
        self.state
            .lock()
            .items
            .front()
            .map(|p| (p.id, p.enqueued_at))
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Closes the queue and returns everything still in it.
    ///
    /// Callers should drop the returned entries after releasing any locks;
    /// dropping resolves them with [`ClientError::Shutdown`].
    pub(crate) fn close(&self) -> Vec<PendingMutation> {
        let drained = {
            let mut state = self.state.lock();
            state.closed = true;
            state.items.drain(..).collect()
        };
        self.notify.notify_one();
        drained
    }

    async fn changed(&self) {
        self.notify.notified().await;
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender means the client is gone, which is a shutdown too.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

/// The background task that sends queued mutations.
pub(crate) struct DrainLoop<T: Transport> {
    pub(crate) transport: Arc<T>,
    pub(crate) queue: Arc<OperationQueue>,
    pub(crate) reachability: ReachabilityMonitor,
    pub(crate) retry: RetryConfig,
    pub(crate) offline_timeout: Option<Duration>,
    pub(crate) request_timeout: Duration,
    pub(crate) stats: Arc<StatsCounters>,
    pub(crate) shutdown: watch::Receiver<bool>,
}

impl<T: Transport> DrainLoop<T> {
    pub(crate) async fn run(self) {
        debug!("operation queue drain loop started");
        while let Some(pending) = self.next_operation().await {
            let request = pending.request.clone();
            let status = Arc::clone(&pending.status);
            let mut shutdown = self.shutdown.clone();

            let outcome = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => Err(ClientError::Shutdown),
                outcome = self.dispatch(pending.id, request, &status) => outcome,
            };
            pending.complete(outcome);
        }
        debug!("operation queue drain loop stopped");
    }

    /// Waits for a head entry and a reachable network, then takes the head.
    ///
    /// Entries that waited past the offline timeout fail with
    /// [`ClientError::Unreachable`]. Returns `None` on shutdown.
    async fn next_operation(&self) -> Option<PendingMutation> {
        let mut reachable = self.reachability.subscribe();
        let mut shutdown = self.shutdown.clone();
        let mut offline_since: Option<Instant> = None;

        loop {
            if self.queue.is_closed() || *shutdown.borrow() {
                return None;
            }

            let Some((head, enqueued_at)) = self.queue.head() else {
                tokio::select! {
                    _ = self.queue.changed() => {}
                    _ = shutdown_requested(&mut shutdown) => return None,
                }
                continue;
            };

            if *reachable.borrow_and_update() {
                offline_since = None;
                if let Some(pending) = self.queue.pop_front() {
                    return Some(pending);
                }
                continue;
            }

            // The offline clock starts when the entry was queued or when the
            // network was first seen down, whichever is later, so time spent
            // behind a slow reachable head does not count.
            let down_since = *offline_since.get_or_insert_with(Instant::now);
            let waiting_since = enqueued_at.max(down_since);
            let deadline = self
                .offline_timeout
                .and_then(|timeout| waiting_since.checked_add(timeout));
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                if let Some(expired) = self.queue.remove(head) {
                    warn!(mutation = %head, "network unreachable past offline timeout");
                    expired.complete(Err(ClientError::Unreachable {
                        waited: waiting_since.elapsed(),
                    }));
                }
                continue;
            }

            debug!(mutation = %head, queued = self.queue.len(), "network unreachable, holding queue");
            tokio::select! {
                _ = reachable.changed() => {}
                _ = self.queue.changed() => {}
                _ = sleep_until(deadline) => {}
                _ = shutdown_requested(&mut shutdown) => return None,
            }
        }
    }

    /// Sends one mutation, retrying retryable failures.
    async fn dispatch(
        &self,
        id: MutationId,
        request: GraphQLRequest,
        status: &MutationStatus,
    ) -> ClientResult<GraphQLResponse> {
        let mut failures = 0u32;
        loop {
            if failures > 0 && !self.reachability.is_reachable() {
                debug!(mutation = %id, "network unreachable, holding retry");
                let started = Instant::now();
                if !self.reachability.wait_reachable(self.offline_timeout).await {
                    warn!(mutation = %id, "network unreachable past offline timeout during retry");
                    return Err(ClientError::Unreachable {
                        waited: started.elapsed(),
                    });
                }
            }

            status.transition(MutationState::Sent);
            self.stats.record_sent();
            debug!(
                mutation = %id,
                operation = %request.operation_name,
                attempt = failures + 1,
                "sending mutation"
            );

            match send_with_timeout(self.transport.as_ref(), request.clone(), self.request_timeout)
                .await
            {
                Err(e) if e.is_retryable() && self.retry.allows_retry(failures + 1) => {
                    failures += 1;
                    self.stats.record_retry();
                    let delay = self.retry.delay_for_attempt(failures);
                    warn!(mutation = %id, attempt = failures, ?delay, error = %e, "mutation send failed, retrying");
                    status.transition(MutationState::Queued);
                    tokio::time::sleep(delay).await;
                }
                outcome => {
                    debug!(mutation = %id, ok = outcome.is_ok(), "mutation response received");
                    return outcome;
                }
            }
        }
    }
}
