//! In-memory storage backend for tests and ephemeral caches.

use crate::backend::{BatchOp, StorageBackend};
use crate::error::StorageResult;
use std::collections::BTreeMap;

/// An in-memory storage backend.
///
/// This backend stores all entries in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Caches that don't need to survive a restart
///
/// # Example
///
/// ```rust
/// use gqlsync_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// backend.put("QUERY_ROOT", b"{}").unwrap();
/// assert_eq!(backend.len().unwrap(), 1);
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    entries: BTreeMap<String, Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend pre-populated with `entries`.
    ///
    /// Useful for seeding a cache in tests.
    #[must_use]
    pub fn with_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<u8>)>,
        K: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl StorageBackend for InMemoryBackend {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn apply_batch(&mut self, ops: &[BatchOp]) -> StorageResult<()> {
        // Nothing here can fail halfway, so applying in order is atomic.
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    self.entries.insert(key.clone(), value.clone());
                }
                BatchOp::Delete { key } => {
                    self.entries.remove(key);
                }
            }
        }
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.keys().cloned().collect())
    }

    fn clear(&mut self) -> StorageResult<()> {
        self.entries.clear();
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn len(&self) -> StorageResult<usize> {
        Ok(self.entries.len())
    }
}
