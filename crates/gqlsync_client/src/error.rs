//! Error types for the client.

use crate::transport::GraphQLError;
use gqlsync_cache::CacheError;
use std::time::Duration;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur while performing or fetching operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server answered with GraphQL errors and no data.
    #[error("server error: {}", join_messages(.0))]
    Server(Vec<GraphQLError>),

    /// The network stayed unreachable past the configured offline timeout.
    #[error("network unreachable for {waited:?}")]
    Unreachable {
        /// How long the operation waited for the network.
        waited: Duration,
    },

    /// The operation was cancelled before it was sent.
    #[error("operation cancelled")]
    Cancelled,

    /// The client shut down before the operation completed.
    #[error("client shut down")]
    Shutdown,

    /// The client was created outside a Tokio runtime.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),

    /// Cache error, including cache misses and aborted transactions.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Response data did not match the operation's data type.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn join_messages(errors: &[GraphQLError]) -> String {
    if errors.is_empty() {
        return "no data and no errors in response".into();
    }
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ClientError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transport { retryable: true, .. })
    }

    /// Returns true if this error is a cache miss.
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, ClientError::Cache(e) if e.is_cache_miss())
    }
}
