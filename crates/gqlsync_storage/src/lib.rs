//! # gqlsync Storage
//!
//! Storage backend trait and implementations for the gqlsync record cache.
//!
//! Backends are **opaque keyed byte stores**: they map a string key (a
//! normalized cache key) to a byte payload and never interpret the payload.
//! Record encoding belongs to `gqlsync_cache`.
//!
//! ## Design Principles
//!
//! - Backends expose get / put / delete by key plus an atomic batch write
//! - A batch is applied entirely or not at all
//! - Must be `Send + Sync` so the cache can share them behind a lock
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and ephemeral caches
//! - [`FileBackend`] - Append-only, checksummed log that survives restarts
//!
//! ## Example
//!
//! ```rust
//! use gqlsync_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.put("Post:1", b"payload").unwrap();
//! assert_eq!(backend.get("Post:1").unwrap().as_deref(), Some(&b"payload"[..]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{BatchOp, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use file::{FileBackend, LOG_MAGIC, LOG_VERSION};
pub use memory::InMemoryBackend;
