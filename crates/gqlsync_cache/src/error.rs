//! Error types for cache operations.

use crate::key::CacheKey;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur while reading or writing the cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A record or a field selected by the operation is not cached.
    #[error("cache miss: {}", describe_miss(.key, .field.as_deref()))]
    CacheMiss {
        /// Record that was missing, or that lacked the field.
        key: CacheKey,
        /// Missing field cache key, if the record itself exists.
        field: Option<String>,
    },

    /// A result graph lacks a value for a selected field.
    #[error("missing value for {path}")]
    MissingValue {
        /// Dotted response path.
        path: String,
    },

    /// Cached data or result data does not fit the selection shape.
    #[error("shape mismatch at {path}: {message}")]
    ShapeMismatch {
        /// Dotted response path.
        path: String,
        /// What was found instead.
        message: String,
    },

    /// A transaction update was aborted. The cache is unchanged for that update.
    #[error("transaction aborted: {reason}")]
    Transaction {
        /// Why the update was aborted.
        reason: String,
        /// The cache error behind the abort, if any.
        #[source]
        cause: Option<Box<CacheError>>,
    },

    /// Typed data could not be converted to or from a result graph.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored record could not be encoded or decoded.
    #[error("record codec error: {0}")]
    Codec(String),

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] gqlsync_storage::StorageError),
}

fn describe_miss(key: &CacheKey, field: Option<&str>) -> String {
    match field {
        Some(field) => format!("no field `{field}` on record {key}"),
        None => format!("no record {key}"),
    }
}

impl CacheError {
    /// Creates a cache miss for a whole record.
    pub fn missing_record(key: CacheKey) -> Self {
        Self::CacheMiss { key, field: None }
    }

    /// Creates a cache miss for one field of a record.
    pub fn missing_field(key: CacheKey, field: impl Into<String>) -> Self {
        Self::CacheMiss {
            key,
            field: Some(field.into()),
        }
    }

    /// Creates a shape mismatch error.
    pub fn shape_mismatch(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a transaction error raised by caller logic.
    pub fn transaction(reason: impl Into<String>) -> Self {
        Self::Transaction {
            reason: reason.into(),
            cause: None,
        }
    }

    /// Wraps a cache error that aborted a transaction update.
    pub fn aborted_by(cause: CacheError) -> Self {
        match cause {
            already @ Self::Transaction { .. } => already,
            other => Self::Transaction {
                reason: other.to_string(),
                cause: Some(Box::new(other)),
            },
        }
    }

    /// Returns true if this error is, or was caused by, a cache miss.
    #[must_use]
    pub fn is_cache_miss(&self) -> bool {
        match self {
            Self::CacheMiss { .. } => true,
            Self::Transaction {
                cause: Some(cause), ..
            } => cause.is_cache_miss(),
            _ => false,
        }
    }
}
