//! Read-modify-write transactions over query shapes.

use crate::error::{CacheError, CacheResult};
use crate::key::CacheKey;
use crate::normalize::{self, CacheKeyResolver};
use crate::overlay::MutationId;
use crate::record::{Record, RecordSet};
use crate::selection::{Field, GraphQLOperation, Variables};
use crate::store::{StoreInner, StoreView};
use std::collections::BTreeSet;
use std::fmt;
use tracing::trace;

/// Where a transaction's writes land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Writes go to the base layer. Reads ignore overlays.
    Authoritative,
    /// Writes go to the overlay of the given mutation. Reads see overlays.
    Optimistic(MutationId),
}

/// A scoped handle for reading and updating the cache.
///
/// Obtained from [`crate::CacheStore::transaction`] or
/// [`crate::CacheStore::reconcile`]. Each update commits as one batch when it
/// returns successfully; a failed update leaves the cache as it was.
pub struct Transaction<'a> {
    inner: &'a mut StoreInner,
    resolver: &'a dyn CacheKeyResolver,
    mode: WriteMode,
    written: BTreeSet<CacheKey>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(
        inner: &'a mut StoreInner,
        resolver: &'a dyn CacheKeyResolver,
        mode: WriteMode,
    ) -> Self {
        Self {
            inner,
            resolver,
            mode,
            written: BTreeSet::new(),
        }
    }

    /// Returns where this transaction writes.
    #[must_use]
    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// Returns every key written so far.
    #[must_use]
    pub fn written_keys(&self) -> &BTreeSet<CacheKey> {
        &self.written
    }

    fn view(&self) -> StoreView<'_> {
        match self.mode {
            WriteMode::Authoritative => StoreView::Base(&*self.inner),
            WriteMode::Optimistic(_) => StoreView::Visible(&*self.inner),
        }
    }

    /// Materializes `operation` into typed data.
    pub fn read<Q: GraphQLOperation>(&self, operation: &Q) -> CacheResult<Q::Data> {
        let value = normalize::materialize(
            &operation.selections(),
            &operation.root_key(),
            &operation.variables(),
            &self.view(),
        )?;
        Ok(serde_json::from_value(value)?)
    }

    /// Reads one record.
    pub fn read_record(&self, key: &CacheKey) -> CacheResult<Option<Record>> {
        match self.mode {
            WriteMode::Authoritative => self.inner.base_record(key),
            WriteMode::Optimistic(_) => self.inner.visible_record(key),
        }
    }

    /// Reads `operation`, applies `f` to the data and writes the result back.
    ///
    /// # Errors
    ///
    /// Fails with [`CacheError::Transaction`] if the operation cannot be
    /// materialized (for instance on a cache miss), or if the modified data
    /// cannot be written back. Nothing is written in that case.
    pub fn update<Q, F>(&mut self, operation: &Q, f: F) -> CacheResult<()>
    where
        Q: GraphQLOperation,
        F: FnOnce(&mut Q::Data),
    {
        self.try_update(operation, |data| {
            f(data);
            Ok::<(), std::convert::Infallible>(())
        })
    }

    /// Like [`Transaction::update`], but `f` may fail, aborting the update.
    pub fn try_update<Q, F, E>(&mut self, operation: &Q, f: F) -> CacheResult<()>
    where
        Q: GraphQLOperation,
        F: FnOnce(&mut Q::Data) -> Result<(), E>,
        E: fmt::Display,
    {
        let mut data = self.read(operation).map_err(CacheError::aborted_by)?;
        f(&mut data).map_err(|e| CacheError::transaction(e.to_string()))?;
        self.write(operation, &data).map_err(CacheError::aborted_by)
    }

    /// Like [`Transaction::update`], but starts from `init()` when the
    /// operation is not cached yet.
    ///
    /// Errors other than a cache miss still abort the update.
    pub fn update_or_init<Q, I, F>(&mut self, operation: &Q, init: I, f: F) -> CacheResult<()>
    where
        Q: GraphQLOperation,
        I: FnOnce() -> Q::Data,
        F: FnOnce(&mut Q::Data),
    {
        let mut data = match self.read(operation) {
            Ok(data) => data,
            Err(e) if e.is_cache_miss() => init(),
            Err(e) => return Err(CacheError::aborted_by(e)),
        };
        f(&mut data);
        self.write(operation, &data).map_err(CacheError::aborted_by)
    }

    /// Writes typed data for `operation`.
    pub fn write<Q: GraphQLOperation>(&mut self, operation: &Q, data: &Q::Data) -> CacheResult<()> {
        let value = serde_json::to_value(data)?;
        self.write_value(
            &operation.selections(),
            &operation.root_key(),
            &operation.variables(),
            &value,
        )
    }

    /// Decomposes a JSON result graph and writes its records.
    pub fn write_value(
        &mut self,
        selections: &[Field],
        root: &CacheKey,
        variables: &Variables,
        data: &serde_json::Value,
    ) -> CacheResult<()> {
        let records = normalize::decompose(selections, root, variables, data, self.resolver)?;
        self.commit(records)
    }

    /// Merges one record.
    pub fn write_record(&mut self, record: Record) -> CacheResult<()> {
        self.commit(std::iter::once(record).collect())
    }

    /// Removes the record for `key`.
    ///
    /// An optimistic removal hides the record until the mutation's overlay is
    /// dropped.
    pub fn remove(&mut self, key: &CacheKey) -> CacheResult<()> {
        match self.mode {
            WriteMode::Authoritative => {
                self.inner.delete_base(key)?;
            }
            WriteMode::Optimistic(mutation) => {
                self.inner.overlays_mut().remove_record(mutation, key);
            }
        }
        self.written.insert(key.clone());
        Ok(())
    }

    fn commit(&mut self, records: RecordSet) -> CacheResult<()> {
        let keys: Vec<CacheKey> = records.keys().cloned().collect();
        match self.mode {
            WriteMode::Authoritative => {
                self.inner.merge_base(records)?;
            }
            WriteMode::Optimistic(mutation) => {
                let overlays = self.inner.overlays_mut();
                for record in records {
                    overlays.write(mutation, record);
                }
            }
        }
        trace!(mode = ?self.mode, records = keys.len(), "committed transaction update");
        self.written.extend(keys);
        Ok(())
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("mode", &self.mode)
            .field("written", &self.written)
            .finish_non_exhaustive()
    }
}
