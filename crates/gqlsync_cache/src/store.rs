//! The normalized cache store.

use crate::error::{CacheError, CacheResult};
use crate::key::CacheKey;
use crate::normalize::{self, CacheKeyResolver, RecordSource, TypenameIdResolver};
use crate::overlay::{MutationId, OverlayTable};
use crate::record::{Record, RecordSet};
use crate::selection::{Field, GraphQLOperation, Variables};
use crate::transaction::{Transaction, WriteMode};
use gqlsync_storage::{BatchOp, FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Store state guarded by the store lock.
pub(crate) struct StoreInner {
    backend: Box<dyn StorageBackend>,
    overlays: OverlayTable,
}

impl StoreInner {
    pub(crate) fn base_record(&self, key: &CacheKey) -> CacheResult<Option<Record>> {
        self.backend
            .get(key.as_str())?
            .map(|bytes| Record::decode(key.clone(), &bytes))
            .transpose()
    }

    pub(crate) fn visible_record(&self, key: &CacheKey) -> CacheResult<Option<Record>> {
        let base = self.base_record(key)?;
        if !self.overlays.covers(key) {
            return Ok(base);
        }
        Ok(self.overlays.apply(key, base))
    }

    /// Merges `records` field by field into the base layer as one batch.
    ///
    /// Returns the keys whose stored record changed.
    pub(crate) fn merge_base(&mut self, records: RecordSet) -> CacheResult<BTreeSet<CacheKey>> {
        let mut ops = Vec::with_capacity(records.len());
        let mut changed = BTreeSet::new();
        for record in records {
            let merged = match self.base_record(record.key())? {
                Some(mut existing) => {
                    if !existing.merge(&record) {
                        continue;
                    }
                    existing
                }
                None => record,
            };
            ops.push(BatchOp::put(merged.key().as_str(), merged.encode()?));
            changed.insert(merged.key().clone());
        }
        self.backend.apply_batch(&ops)?;
        Ok(changed)
    }

    pub(crate) fn replace_base(&mut self, record: &Record) -> CacheResult<()> {
        self.backend.put(record.key().as_str(), &record.encode()?)?;
        Ok(())
    }

    pub(crate) fn delete_base(&mut self, key: &CacheKey) -> CacheResult<bool> {
        Ok(self.backend.delete(key.as_str())?)
    }

    pub(crate) fn overlays_mut(&mut self) -> &mut OverlayTable {
        &mut self.overlays
    }
}

/// Which layers a read sees.
pub(crate) enum StoreView<'a> {
    /// Authoritative records only.
    Base(&'a StoreInner),
    /// Authoritative records with optimistic overlays applied.
    Visible(&'a StoreInner),
}

impl RecordSource for StoreView<'_> {
    fn record(&self, key: &CacheKey) -> CacheResult<Option<Record>> {
        match self {
            Self::Base(inner) => inner.base_record(key),
            Self::Visible(inner) => inner.visible_record(key),
        }
    }
}

/// A normalized record cache with an optimistic overlay layer.
///
/// All access goes through a readers-writer lock: reads run concurrently,
/// while writes and transactions hold the lock exclusively, so nobody
/// observes a batch half-applied. No lock is held across an `await`; every
/// method here is synchronous.
///
/// # Example
///
/// ```rust
/// use gqlsync_cache::{CacheKey, CacheStore, FieldValue, Record};
/// use serde_json::json;
///
/// let store = CacheStore::in_memory();
/// store
///     .write(Record::with_fields("Post:1", [("title", FieldValue::from(json!("Hi")))]))
///     .unwrap();
/// assert!(store.read(&CacheKey::new("Post:1")).unwrap().is_some());
/// ```
pub struct CacheStore {
    inner: RwLock<StoreInner>,
    resolver: Arc<dyn CacheKeyResolver>,
}

impl CacheStore {
    /// Creates a store over `backend`.
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                backend: Box::new(backend),
                overlays: OverlayTable::new(),
            }),
            resolver: Arc::new(TypenameIdResolver),
        }
    }

    /// Creates an ephemeral in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(InMemoryBackend::new())
    }

    /// Opens a durable store backed by a log file, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be opened or replayed.
    pub fn open_file(path: &Path) -> CacheResult<Self> {
        Ok(Self::new(FileBackend::open_with_create_dirs(path)?))
    }

    /// Replaces the cache key resolver used when decomposing results.
    #[must_use]
    pub fn with_key_resolver(mut self, resolver: Arc<dyn CacheKeyResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Returns the cache key resolver.
    #[must_use]
    pub fn key_resolver(&self) -> &dyn CacheKeyResolver {
        self.resolver.as_ref()
    }

    /// Reads the visible record for `key` (base plus overlays).
    pub fn read(&self, key: &CacheKey) -> CacheResult<Option<Record>> {
        self.inner.read().visible_record(key)
    }

    /// Reads the authoritative record for `key`, ignoring overlays.
    pub fn read_base(&self, key: &CacheKey) -> CacheResult<Option<Record>> {
        self.inner.read().base_record(key)
    }

    /// Replaces the authoritative record stored under the record's key.
    pub fn write(&self, record: Record) -> CacheResult<()> {
        self.inner.write().replace_base(&record)
    }

    /// Merges `records` into the authoritative layer as one atomic batch.
    ///
    /// Returns the keys whose stored record changed.
    pub fn merge(&self, records: RecordSet) -> CacheResult<BTreeSet<CacheKey>> {
        self.inner.write().merge_base(records)
    }

    /// Deletes the authoritative record for `key`.
    pub fn delete(&self, key: &CacheKey) -> CacheResult<bool> {
        self.inner.write().delete_base(key)
    }

    /// Materializes `operation` from the visible layer into typed data.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::CacheMiss`] if anything the operation selects is
    /// not cached.
    pub fn materialize<Q: GraphQLOperation>(&self, operation: &Q) -> CacheResult<Q::Data> {
        let value = self.materialize_value(
            &operation.selections(),
            &operation.root_key(),
            &operation.variables(),
        )?;
        Ok(serde_json::from_value(value)?)
    }

    /// Materializes a selection set from the visible layer as JSON.
    pub fn materialize_value(
        &self,
        selections: &[Field],
        root: &CacheKey,
        variables: &Variables,
    ) -> CacheResult<serde_json::Value> {
        let inner = self.inner.read();
        normalize::materialize(selections, root, variables, &StoreView::Visible(&inner))
    }

    /// Writes a server result for `operation` into the authoritative layer.
    ///
    /// Returns the keys whose stored record changed.
    pub fn write_result<Q: GraphQLOperation>(
        &self,
        operation: &Q,
        data: &serde_json::Value,
    ) -> CacheResult<BTreeSet<CacheKey>> {
        let records = normalize::decompose(
            &operation.selections(),
            &operation.root_key(),
            &operation.variables(),
            data,
            self.resolver.as_ref(),
        )?;
        self.merge(records)
    }

    /// Runs `f` with a transaction holding the store lock exclusively.
    ///
    /// Every update made through the transaction is visible to readers once
    /// that update returns; the lock makes the whole closure atomic with
    /// respect to other transactions. `f` must not call back into this store.
    pub fn transaction<R>(&self, mode: WriteMode, f: impl FnOnce(&mut Transaction<'_>) -> R) -> R {
        let mut inner = self.inner.write();
        let mut tx = Transaction::new(&mut inner, self.resolver.as_ref(), mode);
        f(&mut tx)
    }

    /// Runs `f` as `mutation`'s optimistic update.
    ///
    /// If `f` fails, everything it wrote to the overlay is dropped before the
    /// lock is released, so readers never observe a failed update.
    pub fn apply_optimistic<T, E>(
        &self,
        mutation: MutationId,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut inner = self.inner.write();
        let result = {
            let mut tx = Transaction::new(&mut inner, self.resolver.as_ref(), WriteMode::Optimistic(mutation));
            f(&mut tx)
        };
        if result.is_err() {
            let keys = inner.overlays_mut().discard(mutation);
            debug!(%mutation, overlay_keys = keys.len(), "optimistic update failed; overlay dropped");
        }
        result
    }

    /// Applies authoritative writes for `mutation` and drops its overlay in
    /// one atomic step.
    ///
    /// The overlay is dropped whatever `f` returns.
    pub fn reconcile<R>(
        &self,
        mutation: MutationId,
        f: impl FnOnce(&mut Transaction<'_>) -> R,
    ) -> R {
        let mut inner = self.inner.write();
        let result = {
            let mut tx = Transaction::new(&mut inner, self.resolver.as_ref(), WriteMode::Authoritative);
            f(&mut tx)
        };
        let keys = inner.overlays_mut().discard(mutation);
        debug!(%mutation, overlay_keys = keys.len(), "reconciled mutation");
        result
    }

    /// Drops every overlay entry written by `mutation`.
    ///
    /// Returns the keys the overlay covered. Idempotent.
    pub fn discard_overlay(&self, mutation: MutationId) -> BTreeSet<CacheKey> {
        let keys = self.inner.write().overlays_mut().discard(mutation);
        debug!(%mutation, overlay_keys = keys.len(), "discarded optimistic overlay");
        keys
    }

    /// Returns true if `mutation` still has overlay entries.
    #[must_use]
    pub fn has_overlay(&self, mutation: MutationId) -> bool {
        self.inner.read().overlays.contains(mutation)
    }

    /// Returns the keys `mutation`'s overlay covers.
    #[must_use]
    pub fn overlay_keys(&self, mutation: MutationId) -> BTreeSet<CacheKey> {
        self.inner.read().overlays.keys_for(mutation)
    }

    /// Returns the mutations with live overlays, oldest first.
    #[must_use]
    pub fn pending_mutations(&self) -> Vec<MutationId> {
        self.inner.read().overlays.mutations().collect()
    }

    /// Returns every visible record.
    pub fn snapshot(&self) -> CacheResult<RecordSet> {
        let inner = self.inner.read();
        let mut keys: BTreeSet<CacheKey> = inner
            .backend
            .keys()?
            .into_iter()
            .map(CacheKey::from)
            .collect();
        keys.extend(inner.overlays.keys().cloned());

        let mut records = RecordSet::new();
        for key in keys {
            if let Some(record) = inner.visible_record(&key)? {
                records.insert(record);
            }
        }
        Ok(records)
    }

    /// Returns the keys of every visible record.
    pub fn keys(&self) -> CacheResult<Vec<CacheKey>> {
        Ok(self.snapshot()?.keys().cloned().collect())
    }

    /// Removes every record and overlay.
    pub fn clear(&self) -> CacheResult<()> {
        let mut inner = self.inner.write();
        inner.backend.clear()?;
        inner.overlays.clear();
        Ok(())
    }

    /// Flushes the backend.
    pub fn flush(&self) -> CacheResult<()> {
        self.inner.write().backend.flush().map_err(CacheError::from)
    }

    /// Rewrites the backend to drop superseded and deleted records.
    pub fn compact(&self) -> CacheResult<()> {
        self.inner.write().backend.compact()?;
        debug!("compacted cache backend");
        Ok(())
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::in_memory()
    }
}
