//! JSON-RPC 2.0 message types exchanged with the locator.

use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-channel request ID generator.
///
/// IDs are monotonically increasing and thread-safe. Each channel owns its
/// own generator so a restarted locator starts again from 1.
#[derive(Debug)]
pub(crate) struct RequestIds(AtomicI64);

impl RequestIds {
    pub(crate) const fn new() -> Self {
        Self(AtomicI64::new(1))
    }

    pub(crate) fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

/// A JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    pub(crate) id: i64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

impl<'a> JsonRpcRequest<'a> {
    pub(crate) const fn new(id: i64, method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification (no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct JsonRpcNotification {
    #[serde(default = "protocol_version")]
    jsonrpc: String,
    pub(crate) method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) params: Option<Value>,
}

impl JsonRpcNotification {
    pub(crate) fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: protocol_version(),
            method: method.into(),
            params,
        }
    }
}

fn protocol_version() -> String {
    String::from("2.0")
}

/// A JSON-RPC 2.0 response message.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct JsonRpcResponse {
    pub(crate) id: Option<i64>,
    #[serde(default)]
    pub(crate) result: Option<Value>,
    #[serde(default)]
    pub(crate) error: Option<JsonRpcError>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct JsonRpcError {
    pub(crate) code: i64,
    pub(crate) message: String,
    #[serde(default)]
    pub(crate) data: Option<Value>,
}

/// Request initiated by the locator itself.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct JsonRpcServerRequest {
    pub(crate) id: Value,
    pub(crate) method: String,
}

/// Any message read from the locator's stdout.
#[derive(Debug)]
pub(crate) enum JsonRpcMessage {
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
    ServerRequest(JsonRpcServerRequest),
}

impl JsonRpcMessage {
    /// Classifies a raw frame by the presence of `id` and `method`.
    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
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
