//! Transport layer abstraction for GraphQL requests.

use crate::error::{ClientError, ClientResult};
use gqlsync_cache::{GraphQLOperation, Variables};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// A GraphQL request as sent over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLRequest {
    /// Operation name.
    pub operation_name: String,
    /// Operation document.
    pub query: String,
    /// Operation variables.
    pub variables: Variables,
}

impl GraphQLRequest {
    /// Builds the request for `operation`.
    pub fn from_operation<Q: GraphQLOperation>(operation: &Q) -> Self {
        Self {
            operation_name: operation.operation_name().to_string(),
            query: operation.document().to_string(),
            variables: operation.variables(),
        }
    }
}

/// One entry of a GraphQL response's `errors` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    /// Error message.
    pub message: String,
    /// Response path the error applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<serde_json::Value>>,
    /// Server-specific details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

impl GraphQLError {
    /// Creates an error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }
}

impl fmt::Display for GraphQLError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// A GraphQL response: data, errors, or both.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphQLResponse {
    /// Result data.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    /// Errors reported alongside or instead of data.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
}

impl GraphQLResponse {
    /// Creates a successful response.
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    /// Creates an error-only response.
    pub fn errors(errors: Vec<GraphQLError>) -> Self {
        Self { data: None, errors }
    }

    /// Adds errors to the response.
    pub fn with_errors(mut self, errors: Vec<GraphQLError>) -> Self {
        self.errors.extend(errors);
        self
    }

    /// Splits the response into data and errors.
    ///
    /// A response without data (or with `null` data) is a server error.
    pub fn into_parts(self) -> ClientResult<(serde_json::Value, Vec<GraphQLError>)> {
        match self.data {
            Some(data) if !data.is_null() => Ok((data, self.errors)),
            _ => Err(ClientError::Server(self.errors)),
        }
    }
}

/// A transport sends GraphQL requests to the server.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, WebSocket, mock for testing, etc.).
pub trait Transport: Send + Sync + 'static {
    /// Sends `request` and waits for the response.
    ///
    /// Network failures should be reported as
    /// [`ClientError::Transport`], with `retryable` set when resending the
    /// same request may succeed.
    fn send(
        &self,
        request: GraphQLRequest,
    ) -> impl Future<Output = ClientResult<GraphQLResponse>> + Send;
}

/// Sends `request` once, turning an elapsed timeout into a retryable error.
pub(crate) async fn send_with_timeout<T: Transport>(
    transport: &T,
    request: GraphQLRequest,
    timeout: Duration,
) -> ClientResult<GraphQLResponse> {
    match tokio::time::timeout(timeout, transport.send(request)).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::transport_retryable(format!(
            "request timed out after {timeout:?}"
        ))),
    }
}

/// A scripted reply for [`MockTransport`].
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Respond with this response.
    Respond(GraphQLResponse),
    /// Fail with a transport error.
    Fail {
        /// Error message.
        message: String,
        /// Whether the error is retryable.
        retryable: bool,
    },
}

type Responder = Box<dyn Fn(&GraphQLRequest) -> GraphQLResponse + Send + Sync>;

/// A mock transport for testing.
///
/// Replies come from a script, then from an optional responder closure.
/// Every request is logged before the pause gate, so a paused transport
/// still shows a request as sent.
pub struct MockTransport {
    script: Mutex<VecDeque<MockReply>>,
    responder: Mutex<Option<Responder>>,
    sent: Mutex<Vec<GraphQLRequest>>,
    sent_count: watch::Sender<usize>,
    open: watch::Sender<bool>,
}

impl MockTransport {
    /// Creates a mock transport with an empty script.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            responder: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            sent_count: watch::channel(0).0,
            open: watch::channel(true).0,
        }
    }

    /// Queues a reply.
    pub fn push_reply(&self, reply: MockReply) {
        self.script.lock().push_back(reply);
    }

    /// Queues a response.
    pub fn push_response(&self, response: GraphQLResponse) {
        self.push_reply(MockReply::Respond(response));
    }

    /// Queues a transport failure.
    pub fn push_failure(&self, message: impl Into<String>, retryable: bool) {
        self.push_reply(MockReply::Fail {
            message: message.into(),
            retryable,
        });
    }

    /// Answers requests with `responder` once the script is exhausted.
    pub fn set_responder(
        &self,
        responder: impl Fn(&GraphQLRequest) -> GraphQLResponse + Send + Sync + 'static,
    ) {
        *self.responder.lock() = Some(Box::new(responder));
    }

    /// Holds every request at the gate until [`MockTransport::resume`].
    pub fn pause(&self) {
        self.open.send_replace(false);
    }

    /// Releases held requests.
    pub fn resume(&self) {
        self.open.send_replace(true);
    }

    /// Returns every request received so far.
    pub fn sent_requests(&self) -> Vec<GraphQLRequest> {
        self.sent.lock().clone()
    }

    /// Returns the operation names of every request received so far.
    pub fn sent_operations(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|r| r.operation_name.clone())
            .collect()
    }

    /// Returns the number of requests received so far.
    pub fn send_count(&self) -> usize {
        *self.sent_count.borrow()
    }

    /// Waits until at least `count` requests have been received.
    pub async fn wait_for_sends(&self, count: usize) {
        let mut rx = self.sent_count.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|sent| *sent >= count).await;
    }

    fn next_reply(&self, request: &GraphQLRequest) -> MockReply {
        if let Some(reply) = self.script.lock().pop_front() {
            return reply;
        }
        match self.responder.lock().as_ref() {
            Some(responder) => MockReply::Respond(responder(request)),
            None => MockReply::Fail {
                message: format!("no scripted reply for {}", request.operation_name),
                retryable: false,
            },
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("scripted", &self.script.lock().len())
            .field("sent", &self.send_count())
            .field("open", &*self.open.borrow())
            .finish_non_exhaustive()
    }
}

impl Transport for MockTransport {
    async fn send(&self, request: GraphQLRequest) -> ClientResult<GraphQLResponse> {
        self.sent.lock().push(request.clone());
        self.sent_count.send_modify(|count| *count += 1);

        let mut gate = self.open.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        match self.next_reply(&request) {
            MockReply::Respond(response) => Ok(response),
            MockReply::Fail { message, retryable } => Err(ClientError::Transport { message, retryable }),
        }
    }
}
