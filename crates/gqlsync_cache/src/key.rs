//! Cache keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one normalized record in the cache.
///
/// Entity records use `"<__typename>:<id>"` by default; objects without an
/// identity get a key derived from their response path, such as
/// `QUERY_ROOT.viewer`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key of the root record for queries.
    pub const QUERY_ROOT: &'static str = "QUERY_ROOT";
    /// Key of the root record for mutations.
    pub const MUTATION_ROOT: &'static str = "MUTATION_ROOT";
    /// Key of the root record for subscriptions.
    pub const SUBSCRIPTION_ROOT: &'static str = "SUBSCRIPTION_ROOT";

    /// Creates a key from any string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The query root key.
    #[must_use]
    pub fn query_root() -> Self {
        Self::new(Self::QUERY_ROOT)
    }

    /// The mutation root key.
    #[must_use]
    pub fn mutation_root() -> Self {
        Self::new(Self::MUTATION_ROOT)
    }

    /// Builds the key of an entity from its type name and id.
    #[must_use]
    pub fn entity(typename: &str, id: &str) -> Self {
        Self(format!("{typename}:{id}"))
    }

    /// Builds a path-derived child key: `<self>.<segment>`.
    #[must_use]
    pub fn child(&self, segment: &str) -> Self {
        Self(format!("{}.{segment}", self.0))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}
