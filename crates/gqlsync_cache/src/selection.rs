//! Selection sets and operation descriptions.
//!
//! GraphQL documents are parsed elsewhere; this crate only needs the shape of
//! an operation, which generated code describes with [`Field`] trees.

use crate::key::CacheKey;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Operation variables, keyed by variable name.
pub type Variables = serde_json::Map<String, serde_json::Value>;

/// The kind of GraphQL operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    /// A read.
    Query,
    /// A write.
    Mutation,
    /// A stream of results.
    Subscription,
}

impl OperationType {
    /// Returns the key of the root record results of this type hang off.
    #[must_use]
    pub fn root_key(self) -> CacheKey {
        match self {
            Self::Query => CacheKey::query_root(),
            Self::Mutation => CacheKey::mutation_root(),
            Self::Subscription => CacheKey::new(CacheKey::SUBSCRIPTION_ROOT),
        }
    }
}

/// An argument value in a selection.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    /// A literal JSON value.
    Literal(serde_json::Value),
    /// A reference to an operation variable.
    Variable(String),
    /// A list of input values.
    List(Vec<InputValue>),
    /// An input object.
    Object(Vec<(String, InputValue)>),
}

impl InputValue {
    /// Creates a variable reference.
    pub fn variable(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }

    /// Resolves variables, yielding a plain JSON value.
    ///
    /// Variables missing from `variables` resolve to `null`.
    #[must_use]
    pub fn resolve(&self, variables: &Variables) -> serde_json::Value {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Variable(name) => variables
                .get(name)
                .cloned()
                .unwrap_or(serde_json::Value::Null),
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(|i| i.resolve(variables)).collect())
            }
            Self::Object(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.resolve(variables)))
                    .collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for InputValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Literal(value)
    }
}

/// Whether a field is a leaf or has a sub-selection.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// A scalar or enum leaf (custom JSON scalars included).
    Scalar,
    /// An object, or list of objects, with the given sub-selection.
    Object(Vec<Field>),
}

/// One field in a selection set.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: String,
    alias: Option<String>,
    arguments: Vec<(String, InputValue)>,
    kind: FieldKind,
}

impl Field {
    /// Creates a leaf field.
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            arguments: Vec::new(),
            kind: FieldKind::Scalar,
        }
    }

    /// Creates an object field with a sub-selection.
    pub fn object(name: impl Into<String>, selections: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            arguments: Vec::new(),
            kind: FieldKind::Object(selections),
        }
    }

    /// Sets the response alias.
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Adds an argument.
    #[must_use]
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<InputValue>) -> Self {
        self.arguments.push((name.into(), value.into()));
        self
    }

    /// Returns the schema field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the key the field appears under in a response.
    #[must_use]
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Returns the field kind.
    #[must_use]
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Returns the key the field is stored under in its record.
    ///
    /// Fields without arguments use their name. Fields with arguments append
    /// the resolved arguments as a JSON object with sorted keys, so
    /// `post(id: $id)` with `id = "1"` becomes `post({"id":"1"})`.
    #[must_use]
    pub fn cache_key(&self, variables: &Variables) -> String {
        if self.arguments.is_empty() {
            return self.name.clone();
        }
        let args: std::collections::BTreeMap<&str, serde_json::Value> = self
            .arguments
            .iter()
            .map(|(name, value)| (name.as_str(), value.resolve(variables)))
            .collect();
        // BTreeMap keys keep the encoding stable across argument order.
        let encoded = serde_json::to_string(&args).unwrap_or_default();
        format!("{}({encoded})", self.name)
    }
}

/// A GraphQL operation as seen by the cache and the client.
///
/// Implementations are usually generated from `.graphql` documents.
pub trait GraphQLOperation: Send + Sync {
    /// Typed response data.
    type Data: Serialize + DeserializeOwned + Send + 'static;

    /// Query, mutation or subscription.
    const OPERATION_TYPE: OperationType;

    /// Operation name, used for logging and by transports.
    fn operation_name(&self) -> &str;

    /// The operation document sent to the server.
    fn document(&self) -> &str;

    /// Operation variables.
    fn variables(&self) -> Variables {
        Variables::new()
    }

    /// Root selection set.
    fn selections(&self) -> Vec<Field>;

    /// Key of the root record the operation's data hangs off.
    fn root_key(&self) -> CacheKey {
        Self::OPERATION_TYPE.root_key()
    }
}
