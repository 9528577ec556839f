//! Optimistic overlays.
//!
//! Each key holds a short list of overlay entries ordered by mutation
//! sequence number. Reads apply the entries over the base record in order,
//! so the latest remaining mutation wins. Reconciling or rolling back a
//! mutation removes its entries and nothing else.

use crate::key::CacheKey;
use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Identifies a mutation; doubles as the overlay sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MutationId(u64);

impl MutationId {
    /// Creates a mutation ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw sequence number.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mutation#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum OverlayWrite {
    Fields(Record),
    Tombstone,
}

#[derive(Debug, Clone, PartialEq)]
struct OverlayEntry {
    mutation: MutationId,
    write: OverlayWrite,
}

/// Speculative writes layered over the base records.
#[derive(Debug, Default, Clone)]
pub struct OverlayTable {
    by_key: HashMap<CacheKey, Vec<OverlayEntry>>,
    by_mutation: BTreeMap<MutationId, BTreeSet<CacheKey>>,
}

impl OverlayTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `record` as written by `mutation`.
    ///
    /// A second write by the same mutation to the same key merges into its
    /// existing entry.
    pub fn write(&mut self, mutation: MutationId, record: Record) {
        let key = record.key().clone();
        let entries = self.by_key.entry(key.clone()).or_default();
        match entries.binary_search_by_key(&mutation, |e| e.mutation) {
            Ok(pos) => {
                if let OverlayWrite::Fields(existing) = &mut entries[pos].write {
                    existing.merge(&record);
                } else {
                    entries[pos].write = OverlayWrite::Fields(record);
                }
            }
            Err(pos) => entries.insert(
                pos,
                OverlayEntry {
                    mutation,
                    write: OverlayWrite::Fields(record),
                },
            ),
        }
        self.by_mutation.entry(mutation).or_default().insert(key);
    }

    /// Records that `mutation` removed `key`.
    pub fn remove_record(&mut self, mutation: MutationId, key: &CacheKey) {
        let entries = self.by_key.entry(key.clone()).or_default();
        let entry = OverlayEntry {
            mutation,
            write: OverlayWrite::Tombstone,
        };
        match entries.binary_search_by_key(&mutation, |e| e.mutation) {
            Ok(pos) => entries[pos] = entry,
            Err(pos) => entries.insert(pos, entry),
        }
        self.by_mutation
            .entry(mutation)
            .or_default()
            .insert(key.clone());
    }

    /// Drops every entry written by `mutation`, returning the keys it touched.
    pub fn discard(&mut self, mutation: MutationId) -> BTreeSet<CacheKey> {
        let keys = self.by_mutation.remove(&mutation).unwrap_or_default();
        for key in &keys {
            if let Some(entries) = self.by_key.get_mut(key) {
                entries.retain(|e| e.mutation != mutation);
                if entries.is_empty() {
                    self.by_key.remove(key);
                }
            }
        }
        keys
    }

    /// Applies the overlay entries for `key` over `base`.
    #[must_use]
    pub fn apply(&self, key: &CacheKey, base: Option<Record>) -> Option<Record> {
        let Some(entries) = self.by_key.get(key) else {
            return base;
        };
        let mut current = base;
        for entry in entries {
            match &entry.write {
                OverlayWrite::Fields(fields) => match current.as_mut() {
                    Some(record) => {
                        record.merge(fields);
                    }
                    None => current = Some(fields.clone()),
                },
                OverlayWrite::Tombstone => current = None,
            }
        }
        current
    }

    /// Returns true if `key` has overlay entries.
    #[must_use]
    pub fn covers(&self, key: &CacheKey) -> bool {
        self.by_key.contains_key(key)
    }

    /// Returns the keys `mutation` has entries for.
    #[must_use]
    pub fn keys_for(&self, mutation: MutationId) -> BTreeSet<CacheKey> {
        self.by_mutation.get(&mutation).cloned().unwrap_or_default()
    }

    /// Returns true if `mutation` has any entries.
    #[must_use]
    pub fn contains(&self, mutation: MutationId) -> bool {
        self.by_mutation.contains_key(&mutation)
    }

    /// Returns the mutations with entries, oldest first.
    pub fn mutations(&self) -> impl Iterator<Item = MutationId> + '_ {
        self.by_mutation.keys().copied()
    }

    /// Returns every key with overlay entries.
    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.by_key.keys()
    }

    /// Returns true if there are no overlays.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_mutation.is_empty()
    }

    /// Drops all overlays.
    pub fn clear(&mut self) {
        self.by_key.clear();
        self.by_mutation.clear();
    }
}
