//! JSON-RPC 2.0 messages exchanged with the Vue Language Server.
//!
//! Outgoing messages are built from these types; incoming frames are
//! classified by [`JsonRpcMessage::from_bytes`].

use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error code answered to server-initiated requests the host does not handle.
pub const METHOD_NOT_FOUND: i64 = -32601;

const PROTOCOL_VERSION: &str = "2.0";

static REQUEST_ID: AtomicI64 = AtomicI64::new(1);

/// Allocates the id for the next outgoing request.
///
/// Shared by every connection in the process, so ids never repeat even
/// across restarts.
#[must_use]
pub fn next_request_id() -> i64 {
    REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// Outgoing request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Id the response will echo.
    pub id: i64,
    /// Method name, such as `textDocument/definition`.
    pub method: String,
    /// Parameters; omitted from the wire when `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Builds a request carrying the next id from [`next_request_id`].
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: PROTOCOL_VERSION,
            id: next_request_id(),
            method: method.into(),
            params,
        }
    }
}

/// Message without an id, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Protocol version; filled in when a server leaves it out.
    #[serde(default = "protocol_version")]
    pub jsonrpc: String,
    /// Method name, such as `window/logMessage`.
    pub method: String,
    /// Parameters, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Builds an outgoing notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: protocol_version(),
            method: method.into(),
            params,
        }
    }
}

fn protocol_version() -> String {
    String::from(PROTOCOL_VERSION)
}

/// Server reply to one of our requests.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    /// Id of the request being answered; `null` for unattributable errors.
    pub id: Option<i64>,
    /// Payload of a successful reply.
    #[serde(default)]
    pub result: Option<Value>,
    /// Payload of a failed reply.
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// Error member of a failed reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric code, e.g. [`METHOD_NOT_FOUND`].
    pub code: i64,
    /// Description from the sender.
    pub message: String,
    /// Extra detail the sender attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A request initiated by the server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerRequest {
    /// Identifier to echo in the reply; servers may use numbers or strings.
    pub id: Value,
    /// Requested method.
    pub method: String,
}

/// Reply sent back to a server-initiated request.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReply {
    jsonrpc: &'static str,
    id: Value,
    error: JsonRpcError,
}

impl ErrorReply {
    /// Builds the "method not found" reply for an unhandled server request.
    #[must_use]
    pub fn method_not_found(request: &ServerRequest) -> Self {
        Self {
            jsonrpc: PROTOCOL_VERSION,
            id: request.id.clone(),
            error: JsonRpcError {
                code: METHOD_NOT_FOUND,
                message: format!("Method not found: {}", request.method),
                data: None,
            },
        }
    }
}

/// Any message read from the server.
#[derive(Debug, Clone)]
pub enum JsonRpcMessage {
    /// Reply to one of our requests.
    Response(JsonRpcResponse),
    /// Request the server expects us to answer.
    ServerRequest(ServerRequest),
    /// Unsolicited notification.
    Notification(JsonRpcNotification),
}

impl JsonRpcMessage {
    /// Classifies a raw frame payload.
    ///
    /// # Errors
    ///
    /// Returns the JSON error when the payload is not a JSON-RPC object.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_slice(bytes)?;
        let has_id = value.get("id").is_some_and(|id| !id.is_null());
        let has_method = value.get("method").is_some();

        match (has_id, has_method) {
            (true, true) => serde_json::from_value(value).map(Self::ServerRequest),
            (_, true) => serde_json::from_value(value).map(Self::Notification),
            (_, false) => serde_json::from_value(value).map(Self::Response),
        }
    }
}
