//! Mutation lifecycle: state machine, handles and reconciliation.

use crate::error::{ClientError, ClientResult};
use crate::queue::OperationQueue;
use crate::transport::{GraphQLError, GraphQLRequest, GraphQLResponse};
use gqlsync_cache::{CacheResult, CacheStore, GraphQLOperation, MutationId, Transaction};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// The lifecycle state of one mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    /// Accepted by `perform`, nothing applied yet.
    Created,
    /// The optimistic update is in the overlay layer.
    OptimisticApplied,
    /// Waiting in the operation queue (or for a retry).
    Queued,
    /// Handed to the transport.
    Sent,
    /// The server answered.
    ResponseReceived,
    /// Server data is in the cache and the overlay is gone.
    Reconciled,
    /// Delivered to the caller successfully.
    Completed,
    /// Delivered to the caller as an error.
    Failed,
    /// Cancelled before it was sent.
    Cancelled,
}

impl MutationState {
    /// Returns true once the caller's handle has been resolved.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MutationState::Completed | MutationState::Failed | MutationState::Cancelled
        )
    }

    /// Returns true while the mutation can still be cancelled.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            MutationState::Created | MutationState::OptimisticApplied | MutationState::Queued
        )
    }
}

/// Shared, observable state of one mutation.
#[derive(Debug)]
pub(crate) struct MutationStatus {
    id: MutationId,
    state: Mutex<MutationState>,
}

impl MutationStatus {
    pub(crate) fn new(id: MutationId) -> Self {
        Self {
            id,
            state: Mutex::new(MutationState::Created),
        }
    }

    pub(crate) fn get(&self) -> MutationState {
        *self.state.lock()
    }

    /// Moves to `to` unless the mutation is already terminal.
    pub(crate) fn transition(&self, to: MutationState) -> bool {
        let mut state = self.state.lock();
        if state.is_terminal() {
            return false;
        }
        debug!(mutation = %self.id, from = ?*state, to = ?to, "mutation state transition");
        *state = to;
        true
    }
}

/// Statistics about mutations performed by a client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Mutations accepted by `perform`.
    pub performed: u64,
    /// Send attempts, retries included.
    pub sent: u64,
    /// Mutations that completed successfully.
    pub succeeded: u64,
    /// Mutations that failed.
    pub failed: u64,
    /// Retries after retryable transport errors.
    pub retries: u64,
    /// Mutations cancelled before they were sent.
    pub cancelled: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    performed: AtomicU64,
    sent: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    cancelled: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_performed(&self) {
        self.performed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    fn record_outcome<T>(&self, outcome: &ClientResult<T>) {
        let counter = match outcome {
            Ok(_) => &self.succeeded,
            Err(ClientError::Cancelled) => &self.cancelled,
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ClientStats {
        ClientStats {
            performed: self.performed.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

type OptimisticUpdate = Box<dyn FnOnce(&mut Transaction<'_>) -> CacheResult<()>>;
type AuthoritativeUpdate<D> = Box<dyn FnOnce(&mut Transaction<'_>, &D) -> CacheResult<()> + Send>;
pub(crate) type RollbackUpdate =
    Box<dyn FnOnce(&mut Transaction<'_>, &ClientError) -> CacheResult<()> + Send>;

/// Cache updates to run around a mutation.
pub struct MutationOptions<M: GraphQLOperation> {
    pub(crate) optimistic_update: Option<OptimisticUpdate>,
    pub(crate) authoritative_update: Option<AuthoritativeUpdate<M::Data>>,
    pub(crate) rollback_update: Option<RollbackUpdate>,
}

impl<M: GraphQLOperation> MutationOptions<M> {
    /// Options with no cache updates beyond storing the server's data.
    pub fn new() -> Self {
        Self {
            optimistic_update: None,
            authoritative_update: None,
            rollback_update: None,
        }
    }

    /// Runs `update` in an optimistic transaction before the mutation is
    /// queued. Its writes are visible until the mutation reconciles or fails.
    pub fn optimistic(
        mut self,
        update: impl FnOnce(&mut Transaction<'_>) -> CacheResult<()> + 'static,
    ) -> Self {
        self.optimistic_update = Some(Box::new(update));
        self
    }

    /// Runs `update` with the server's data in the authoritative transaction
    /// that reconciles the mutation.
    pub fn on_response(
        mut self,
        update: impl FnOnce(&mut Transaction<'_>, &M::Data) -> CacheResult<()> + Send + 'static,
    ) -> Self {
        self.authoritative_update = Some(Box::new(update));
        self
    }

    /// Runs `update` when the mutation fails or is cancelled, in the
    /// authoritative transaction that drops its overlay.
    ///
    /// Use it to persist compensating state, such as a failure marker on a
    /// record the optimistic update created. The handle still resolves with
    /// the original error, whatever `update` returns.
    pub fn on_failure(
        mut self,
        update: impl FnOnce(&mut Transaction<'_>, &ClientError) -> CacheResult<()> + Send + 'static,
    ) -> Self {
        self.rollback_update = Some(Box::new(update));
        self
    }
}

impl<M: GraphQLOperation> Default for MutationOptions<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: GraphQLOperation> fmt::Debug for MutationOptions<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationOptions")
            .field("optimistic_update", &self.optimistic_update.is_some())
            .field("authoritative_update", &self.authoritative_update.is_some())
            .field("rollback_update", &self.rollback_update.is_some())
            .finish()
    }
}

/// The successful result of a mutation or query.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResponse<D> {
    /// Typed data.
    pub data: D,
    /// Errors the server reported alongside the data.
    pub errors: Vec<GraphQLError>,
}

impl<D> OperationResponse<D> {
    /// Returns true if the server reported errors alongside the data.
    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty()
    }
}

type Completion = Box<dyn FnOnce(ClientResult<GraphQLResponse>) + Send>;

/// A mutation waiting in, or taken from, the operation queue.
///
/// Resolves its handle exactly once: through [`PendingMutation::complete`],
/// or with [`ClientError::Shutdown`] if it is dropped first.
pub(crate) struct PendingMutation {
    pub(crate) id: MutationId,
    pub(crate) request: GraphQLRequest,
    pub(crate) enqueued_at: Instant,
    pub(crate) status: Arc<MutationStatus>,
    completion: Option<Completion>,
}

impl PendingMutation {
    pub(crate) fn complete(mut self, outcome: ClientResult<GraphQLResponse>) {
        if let Some(completion) = self.completion.take() {
            completion(outcome);
        }
    }
}

impl Drop for PendingMutation {
    fn drop(&mut self) {
        if let Some(completion) = self.completion.take() {
            completion(Err(ClientError::Shutdown));
        }
    }
}

impl fmt::Debug for PendingMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingMutation")
            .field("id", &self.id)
            .field("operation", &self.request.operation_name)
            .field("state", &self.status.get())
            .finish_non_exhaustive()
    }
}

/// Builds the queue entry for `mutation` and the handle that observes it.
///
/// The optimistic update must already be applied.
#[allow(clippy::too_many_arguments)]
pub(crate) fn prepare<M>(
    id: MutationId,
    mutation: M,
    authoritative_update: Option<AuthoritativeUpdate<M::Data>>,
    rollback_update: Option<RollbackUpdate>,
    status: Arc<MutationStatus>,
    store: Arc<CacheStore>,
    queue: Arc<OperationQueue>,
    stats: Arc<StatsCounters>,
) -> (PendingMutation, MutationHandle<M::Data>)
where
    M: GraphQLOperation + 'static,
{
    let (sender, receiver) = oneshot::channel();
    let request = GraphQLRequest::from_operation(&mutation);
    let completion_status = Arc::clone(&status);

    let completion: Completion = Box::new(move |outcome| {
        let result = outcome.and_then(|response| {
            completion_status.transition(MutationState::ResponseReceived);
            reconcile(id, &mutation, response, authoritative_update, &store)
        });
        match &result {
            Ok(_) => {
                completion_status.transition(MutationState::Reconciled);
            }
            Err(e) => roll_back(id, e, rollback_update, &store),
        }

        let final_state = match &result {
            Ok(_) => MutationState::Completed,
            Err(ClientError::Cancelled) => MutationState::Cancelled,
            Err(e) => {
                warn!(mutation = %id, error = %e, "mutation failed");
                MutationState::Failed
            }
        };
        completion_status.transition(final_state);
        stats.record_outcome(&result);

        // The caller may have dropped the handle; the cache is settled either way.
        let _ = sender.send(result);
    });

    let pending = PendingMutation {
        id,
        request,
        enqueued_at: Instant::now(),
        status: Arc::clone(&status),
        completion: Some(completion),
    };
    let handle = MutationHandle {
        id,
        status,
        queue,
        receiver,
    };
    (pending, handle)
}

/// Writes the server's data and drops the overlay in one store transaction.
fn reconcile<M: GraphQLOperation>(
    id: MutationId,
    mutation: &M,
    response: GraphQLResponse,
    authoritative_update: Option<AuthoritativeUpdate<M::Data>>,
    store: &CacheStore,
) -> ClientResult<OperationResponse<M::Data>> {
    let (data, errors) = response.into_parts()?;
    let typed: M::Data = serde_json::from_value(data.clone())?;

    store.reconcile(id, |tx| {
        tx.write_value(
            &mutation.selections(),
            &mutation.root_key(),
            &mutation.variables(),
            &data,
        )?;
        match authoritative_update {
            Some(update) => update(tx, &typed),
            None => Ok(()),
        }
    })?;

    if !errors.is_empty() {
        warn!(mutation = %id, errors = errors.len(), "mutation reconciled with partial errors");
    }
    Ok(OperationResponse {
        data: typed,
        errors,
    })
}

/// Drops a failed mutation's overlay, running its rollback update in the
/// same store transaction.
fn roll_back(
    id: MutationId,
    error: &ClientError,
    rollback_update: Option<RollbackUpdate>,
    store: &CacheStore,
) {
    match rollback_update {
        Some(update) => {
            if let Err(e) = store.reconcile(id, |tx| update(tx, error)) {
                warn!(mutation = %id, error = %e, "rollback update failed");
            }
        }
        None => {
            store.discard_overlay(id);
        }
    }
}

/// Resolves to the mutation's result once it is reconciled, failed or
/// cancelled.
///
/// Dropping the handle does not cancel the mutation.
pub struct MutationHandle<D> {
    id: MutationId,
    status: Arc<MutationStatus>,
    queue: Arc<OperationQueue>,
    receiver: oneshot::Receiver<ClientResult<OperationResponse<D>>>,
}

impl<D> MutationHandle<D> {
    /// Returns the mutation ID.
    pub fn id(&self) -> MutationId {
        self.id
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> MutationState {
        self.status.get()
    }

    /// Cancels the mutation if it has not been sent yet.
    ///
    /// Returns true if the mutation was removed from the queue; its overlay
    /// is dropped and the handle resolves with [`ClientError::Cancelled`].
    /// Once sent, cancellation is a no-op and the response still reconciles.
    pub fn cancel(&self) -> bool {
        match self.queue.remove(self.id) {
            Some(pending) => {
                debug!(mutation = %self.id, "cancelling queued mutation");
                pending.complete(Err(ClientError::Cancelled));
                true
            }
            None => false,
        }
    }
}

impl<D> Future for MutationHandle<D> {
    type Output = ClientResult<OperationResponse<D>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let receiver = &mut self.get_mut().receiver;
        match Pin::new(receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ClientError::Shutdown)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<D> fmt::Debug for MutationHandle<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
