//! # gqlsync Client
//!
//! Offline-aware GraphQL client on top of the normalized cache.
//!
//! This crate provides:
//! - Mutations with optimistic cache updates ([`Client::perform`])
//! - A FIFO operation queue that holds mutations while the network is down
//!   and retries transport failures with backoff
//! - Reconciliation of server responses into the cache, atomically with
//!   removal of the mutation's optimistic overlay
//! - Failure hooks ([`MutationOptions::on_failure`]) that persist compensating
//!   state in the transaction that drops a failed mutation's overlay
//! - Query fetches under a [`CachePolicy`]
//! - A pluggable [`Transport`], with [`MockTransport`] for tests
//!
//! ## Mutation Lifecycle
//!
//! ```text
//! Created -> OptimisticApplied -> Queued -> Sent -> ResponseReceived
//!         -> Reconciled -> Completed
//! ```
//!
//! Any state before `Sent` may end in `Cancelled`; any state may end in
//! `Failed`. On every terminal path the mutation's overlay is gone from the
//! cache.
//!
//! ## Example
//!
//! ```rust,no_run
//! use gqlsync_client::{Client, ClientConfig, MockTransport, MutationOptions, ReachabilityMonitor};
//! use gqlsync_testkit::{CreatePostMutation, ListPostsQuery, Post};
//!
//! # async fn example() -> gqlsync_client::ClientResult<()> {
//! let client = Client::new(ClientConfig::default(), MockTransport::new(), ReachabilityMonitor::default())?;
//!
//! let temp = Post::new(gqlsync_client::temporary_id(), "Draft");
//! let handle = client.perform(
//!     CreatePostMutation::new("Draft"),
//!     MutationOptions::new().optimistic(move |tx| {
//!         tx.update_or_init(&ListPostsQuery, Default::default, |data| data.posts.push(temp))
//!     }),
//! )?;
//!
//! let saved = handle.await?;
//! println!("created {}", saved.data.create_post.id);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod dispatcher;
mod error;
mod queue;
mod reachability;
mod transport;

pub use client::{
    is_temporary_id, temporary_id, CachePolicy, Client, QueryResponse, ResponseSource,
    TEMPORARY_ID_PREFIX,
};
pub use config::{ClientConfig, RetryConfig, StoreConfig};
pub use dispatcher::{ClientStats, MutationHandle, MutationOptions, MutationState, OperationResponse};
pub use error::{ClientError, ClientResult};
pub use reachability::ReachabilityMonitor;
pub use transport::{
    GraphQLError, GraphQLRequest, GraphQLResponse, MockReply, MockTransport, Transport,
};

pub use gqlsync_cache::{
    CacheError, CacheKey, CacheKeyResolver, CacheResult, CacheStore, Field, FieldValue,
    GraphQLOperation, MutationId, OperationType, Record, Transaction, Variables, WriteMode,
};
