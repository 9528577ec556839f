//! Normalized records.

use crate::error::{CacheError, CacheResult};
use crate::key::CacheKey;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};

/// The value of one field in a normalized record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// A leaf value, including `null` and custom JSON scalars.
    Scalar(serde_json::Value),
    /// A reference to another record.
    Reference(CacheKey),
    /// A list of values.
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Returns the `null` scalar.
    #[must_use]
    pub fn null() -> Self {
        Self::Scalar(serde_json::Value::Null)
    }

    /// Returns the referenced key if this is a reference.
    #[must_use]
    pub fn as_reference(&self) -> Option<&CacheKey> {
        match self {
            Self::Reference(key) => Some(key),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Scalar(value)
    }
}

/// A normalized record: the fields cached for one key.
///
/// Field names are field cache keys, i.e. the field name plus its arguments
/// (`post({"id":"1"})`), never aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    key: CacheKey,
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Creates an empty record.
    pub fn new(key: impl Into<CacheKey>) -> Self {
        Self {
            key: key.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Creates a record with fields.
    pub fn with_fields<I, S>(key: impl Into<CacheKey>, fields: I) -> Self
    where
        I: IntoIterator<Item = (S, FieldValue)>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Returns the record key.
    #[must_use]
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Sets a field value, returning the previous one.
    pub fn set(&mut self, field: impl Into<String>, value: FieldValue) -> Option<FieldValue> {
        self.fields.insert(field.into(), value)
    }

    /// Removes a field.
    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.fields.remove(field)
    }

    /// Iterates over the fields in name order.
    pub fn fields(&self) -> btree_map::Iter<'_, String, FieldValue> {
        self.fields.iter()
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Copies every field of `other` over this record.
    ///
    /// Returns true if any field changed.
    pub fn merge(&mut self, other: &Record) -> bool {
        let mut changed = false;
        for (name, value) in &other.fields {
            if self.fields.get(name) != Some(value) {
                self.fields.insert(name.clone(), value.clone());
                changed = true;
            }
        }
        changed
    }

    /// Encodes the record's fields as CBOR for a storage backend.
    pub fn encode(&self) -> CacheResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(&self.fields, &mut bytes)
            .map_err(|e| CacheError::Codec(format!("failed to encode {}: {e}", self.key)))?;
        Ok(bytes)
    }

    /// Decodes a record previously produced by [`Record::encode`].
    pub fn decode(key: CacheKey, bytes: &[u8]) -> CacheResult<Self> {
        let fields = ciborium::from_reader(bytes)
            .map_err(|e| CacheError::Codec(format!("failed to decode {key}: {e}")))?;
        Ok(Self { key, fields })
    }
}

/// A batch of records keyed by cache key.
///
/// Produced by decomposing a result graph; adding a record whose key is
/// already present merges the fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordSet {
    records: BTreeMap<CacheKey, Record>,
}

impl RecordSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record, merging with any record already held for its key.
    pub fn insert(&mut self, record: Record) {
        match self.records.entry(record.key.clone()) {
            btree_map::Entry::Occupied(mut existing) => {
                existing.get_mut().merge(&record);
            }
            btree_map::Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }
    }

    /// Sets one field on the record for `key`, creating it if needed.
    pub fn set_field(&mut self, key: &CacheKey, field: impl Into<String>, value: FieldValue) {
        self.records
            .entry(key.clone())
            .or_insert_with(|| Record::new(key.clone()))
            .set(field, value);
    }

    /// Returns the record for `key`.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<&Record> {
        self.records.get(key)
    }

    /// Iterates over the records in key order.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Returns the keys in the set.
    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.records.keys()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl IntoIterator for RecordSet {
    type Item = Record;
    type IntoIter = btree_map::IntoValues<CacheKey, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_values()
    }
}

impl FromIterator<Record> for RecordSet {
    fn from_iter<T: IntoIterator<Item = Record>>(iter: T) -> Self {
        let mut set = Self::new();
        for record in iter {
            set.insert(record);
        }
        set
    }
}
