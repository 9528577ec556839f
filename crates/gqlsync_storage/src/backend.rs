//! Storage backend trait definition.

use crate::error::StorageResult;

/// A single write inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or replace the payload stored under `key`.
    Put {
        /// Record key.
        key: String,
        /// Opaque payload.
        value: Vec<u8>,
    },
    /// Remove `key` if present.
    Delete {
        /// Record key.
        key: String,
    },
}

impl BatchOp {
    /// Creates a put operation.
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Creates a delete operation.
    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }

    /// Returns the key this operation targets.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// A keyed storage backend for cache records.
///
/// Storage backends are **opaque byte stores** addressed by string keys. The
/// cache layer owns the record encoding; backends never look inside payloads.
///
/// # Invariants
///
/// - `get` returns exactly the bytes most recently written under a key
/// - `apply_batch` is all-or-nothing, including across a crash for durable
///   backends
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing and ephemeral caches
/// - [`super::FileBackend`] - For persistent caches
pub trait StorageBackend: Send + Sync {
    /// Reads the payload stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Applies every operation in `ops` atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be made durable. In that case
    /// none of the operations are visible.
    fn apply_batch(&mut self, ops: &[BatchOp]) -> StorageResult<()>;

    /// Returns every key currently stored, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn keys(&self) -> StorageResult<Vec<String>>;

    /// Removes every entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reset.
    fn clear(&mut self) -> StorageResult<()>;

    /// Flushes pending writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Reclaims space held by overwritten and deleted entries.
    ///
    /// Backends without such overhead keep the default no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the compacted data cannot be written.
    fn compact(&mut self) -> StorageResult<()> {
        Ok(())
    }

    /// Stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn put(&mut self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.apply_batch(&[BatchOp::put(key, value)])
    }

    /// Removes `key`, returning whether it was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn delete(&mut self, key: &str) -> StorageResult<bool> {
        if self.get(key)?.is_none() {
            return Ok(false);
        }
        self.apply_batch(&[BatchOp::delete(key)])?;
        Ok(true)
    }

    /// Returns the number of stored entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn len(&self) -> StorageResult<usize> {
        Ok(self.keys()?.len())
    }

    /// Returns true if nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}
