//! # gqlsync Cache
//!
//! Normalized record cache for GraphQL results.
//!
//! This crate provides:
//! - Records keyed by entity identity ([`CacheKey`], [`Record`])
//! - Selection sets describing operation shapes ([`Field`], [`GraphQLOperation`])
//! - Materialization of a selection against the cache, and decomposition of
//!   a result back into records ([`normalize`])
//! - Optimistic overlays tagged by mutation ([`MutationId`])
//! - Read-modify-write transactions over query shapes ([`Transaction`])
//!
//! ## Layers
//!
//! The store has two layers. The **base** layer holds authoritative records
//! and lives in a [`gqlsync_storage::StorageBackend`]. The **overlay** layer
//! holds speculative writes, one ordered list per key, each entry tagged with
//! the mutation that produced it. Reads see base plus overlays; reconciling a
//! mutation removes its overlay entries and nothing else.
//!
//! ## Key Invariants
//!
//! - One record per cache key; every result referencing it sees updates
//! - Materialization never returns partial data (it fails with a cache miss)
//! - A transaction update writes all of its records or none
//! - Overlay removal never touches another mutation's entries

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod key;
pub mod normalize;
mod overlay;
mod record;
mod selection;
mod store;
mod transaction;

pub use error::{CacheError, CacheResult};
pub use key::CacheKey;
pub use normalize::{CacheKeyResolver, RecordSource, TypenameIdResolver};
pub use overlay::{MutationId, OverlayTable};
pub use record::{FieldValue, Record, RecordSet};
pub use selection::{Field, FieldKind, GraphQLOperation, InputValue, OperationType, Variables};
pub use store::CacheStore;
pub use transaction::{Transaction, WriteMode};
