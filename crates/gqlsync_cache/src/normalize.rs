//! Materialization and decomposition of result graphs.
//!
//! [`materialize`] walks a selection set over normalized records and builds
//! the JSON result graph a server would have returned. [`decompose`] does the
//! inverse: it splits a result graph into normalized records. Both are pure
//! functions of their inputs.

use crate::error::{CacheError, CacheResult};
use crate::key::CacheKey;
use crate::record::{FieldValue, Record, RecordSet};
use crate::selection::{Field, FieldKind, Variables};
use serde_json::{Map, Value};

/// Read access to records for materialization.
pub trait RecordSource {
    /// Returns the record stored under `key`, if any.
    fn record(&self, key: &CacheKey) -> CacheResult<Option<Record>>;
}

impl RecordSource for RecordSet {
    fn record(&self, key: &CacheKey) -> CacheResult<Option<Record>> {
        Ok(self.get(key).cloned())
    }
}

/// Derives an identity key for a result object.
///
/// Returning `None` makes the object's key path-derived, which means it is
/// only shared by results that reach it through the same path.
pub trait CacheKeyResolver: Send + Sync {
    /// Returns the identity of `object`, if it has one.
    fn cache_key_for(&self, object: &Map<String, Value>) -> Option<CacheKey>;
}

impl<F> CacheKeyResolver for F
where
    F: Fn(&Map<String, Value>) -> Option<CacheKey> + Send + Sync,
{
    fn cache_key_for(&self, object: &Map<String, Value>) -> Option<CacheKey> {
        self(object)
    }
}

/// Default resolver: `"<__typename>:<id>"` when both fields are present.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypenameIdResolver;

impl CacheKeyResolver for TypenameIdResolver {
    fn cache_key_for(&self, object: &Map<String, Value>) -> Option<CacheKey> {
        let typename = object.get("__typename")?.as_str()?;
        let id = match object.get("id")? {
            Value::String(id) => id.clone(),
            Value::Number(id) => id.to_string(),
            _ => return None,
        };
        Some(CacheKey::entity(typename, &id))
    }
}

/// Resolves `selections` starting at the record `root`.
///
/// Fails with [`CacheError::CacheMiss`] if any selected field, or any record
/// a selected field references, is absent. Partial results are never returned.
pub fn materialize(
    selections: &[Field],
    root: &CacheKey,
    variables: &Variables,
    source: &dyn RecordSource,
) -> CacheResult<Value> {
    let record = source
        .record(root)?
        .ok_or_else(|| CacheError::missing_record(root.clone()))?;
    materialize_object(selections, &record, variables, source, root.as_str())
}

fn materialize_object(
    selections: &[Field],
    record: &Record,
    variables: &Variables,
    source: &dyn RecordSource,
    path: &str,
) -> CacheResult<Value> {
    let mut object = Map::with_capacity(selections.len());
    for field in selections {
        let field_key = field.cache_key(variables);
        let value = record
            .get(&field_key)
            .ok_or_else(|| CacheError::missing_field(record.key().clone(), field_key.clone()))?;
        let child_path = format!("{path}.{}", field.response_key());
        let resolved = materialize_value(field, value, variables, source, &child_path)?;
        object.insert(field.response_key().to_string(), resolved);
    }
    Ok(Value::Object(object))
}

fn materialize_value(
    field: &Field,
    value: &FieldValue,
    variables: &Variables,
    source: &dyn RecordSource,
    path: &str,
) -> CacheResult<Value> {
    match (value, field.kind()) {
        (FieldValue::Scalar(Value::Null), _) => Ok(Value::Null),
        (FieldValue::Scalar(scalar), FieldKind::Scalar) => Ok(scalar.clone()),
        (FieldValue::Scalar(scalar), FieldKind::Object(_)) => Err(CacheError::shape_mismatch(
            path,
            format!("expected an object reference, found scalar {scalar}"),
        )),
        (FieldValue::Reference(key), FieldKind::Object(selections)) => {
            let record = source
                .record(key)?
                .ok_or_else(|| CacheError::missing_record(key.clone()))?;
            materialize_object(selections, &record, variables, source, path)
        }
        (FieldValue::Reference(key), FieldKind::Scalar) => Err(CacheError::shape_mismatch(
            path,
            format!("expected a scalar, found reference to {key}"),
        )),
        (FieldValue::List(items), _) => items
            .iter()
            .enumerate()
            .map(|(i, item)| materialize_value(field, item, variables, source, &format!("{path}.{i}")))
            .collect::<CacheResult<Vec<_>>>()
            .map(Value::Array),
    }
}

/// Splits `data` into normalized records rooted at `root`.
///
/// Objects with an identity from `resolver` are stored under it; the rest
/// are keyed by path (`<parent key>.<field cache key>`, plus `.<index>` for
/// list items). Fails with [`CacheError::MissingValue`] if `data` lacks a
/// selected field.
pub fn decompose(
    selections: &[Field],
    root: &CacheKey,
    variables: &Variables,
    data: &Value,
    resolver: &dyn CacheKeyResolver,
) -> CacheResult<RecordSet> {
    let object = data.as_object().ok_or_else(|| {
        CacheError::shape_mismatch(root.as_str(), "result data must be an object")
    })?;
    let mut records = RecordSet::new();
    let mut walker = Decomposer {
        variables,
        resolver,
        records: &mut records,
    };
    walker.object(selections, root, object, root.as_str())?;
    Ok(records)
}

struct Decomposer<'a> {
    variables: &'a Variables,
    resolver: &'a dyn CacheKeyResolver,
    records: &'a mut RecordSet,
}

impl Decomposer<'_> {
    fn object(
        &mut self,
        selections: &[Field],
        key: &CacheKey,
        object: &Map<String, Value>,
        path: &str,
    ) -> CacheResult<()> {
        let mut record = Record::new(key.clone());
        for field in selections {
            let child_path = format!("{path}.{}", field.response_key());
            let value = object
                .get(field.response_key())
                .ok_or_else(|| CacheError::MissingValue {
                    path: child_path.clone(),
                })?;
            let field_key = field.cache_key(self.variables);
            let default_key = key.child(&field_key);
            let normalized = self.value(field, value, default_key, &child_path)?;
            record.set(field_key, normalized);
        }
        self.records.insert(record);
        Ok(())
    }

    fn value(
        &mut self,
        field: &Field,
        value: &Value,
        default_key: CacheKey,
        path: &str,
    ) -> CacheResult<FieldValue> {
        match (field.kind(), value) {
            (_, Value::Null) => Ok(FieldValue::null()),
            (FieldKind::Scalar, scalar) => Ok(FieldValue::Scalar(scalar.clone())),
            (FieldKind::Object(_), Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let index = i.to_string();
                    self.value(field, item, default_key.child(&index), &format!("{path}.{i}"))
                })
                .collect::<CacheResult<Vec<_>>>()
                .map(FieldValue::List),
            (FieldKind::Object(selections), Value::Object(object)) => {
                let key = self
                    .resolver
                    .cache_key_for(object)
                    .unwrap_or(default_key);
                self.object(selections, &key, object, path)?;
                Ok(FieldValue::Reference(key))
            }
            (FieldKind::Object(_), other) => Err(CacheError::shape_mismatch(
                path,
                format!("expected an object, found {other}"),
            )),
        }
    }
}
