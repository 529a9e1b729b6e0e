//! JSON-RPC 2.0 message shapes exchanged with the LSP child process.
//!
//! Request (method + id), response (id + result|error) and notification
//! (method, no id) are distinguished structurally, per `spec.md` §4.3.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct OutgoingRequest {
    pub jsonrpc: &'static str,
    pub id: i64,
    pub method: String,
    pub params: Value,
}

impl OutgoingRequest {
    pub fn new(id: i64, method: impl Into<String>, params: Value) -> Self {
        Self { jsonrpc: "2.0", id, method: method.into(), params }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutgoingNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Value,
}

impl OutgoingNotification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self { jsonrpc: "2.0", method: method.into(), params }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutgoingResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// An inbound message, classified by the presence of `id`/`method`
/// rather than a tag, matching the untagged shape of real JSON-RPC
/// traffic.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    Response { id: Value, result: Option<Value>, error: Option<JsonRpcError> },
    Request { id: Value, method: String, params: Value },
    Notification { method: String, params: Value },
}

impl IncomingMessage {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let value: Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;
        let id = value.get("id").cloned();
        let method = value.get("method").and_then(Value::as_str).map(str::to_string);
        let params = value.get("params").cloned().unwrap_or(Value::Null);

        match (id, method) {
            (Some(id), Some(method)) => Ok(IncomingMessage::Request { id, method, params }),
            (Some(id), None) => {
                let result = value.get("result").cloned();
                let error = value
                    .get("error")
                    .cloned()
                    .map(|e| serde_json::from_value(e).map_err(|err| err.to_string()))
                    .transpose()?;
                Ok(IncomingMessage::Response { id, result, error })
            }
            (None, Some(method)) => Ok(IncomingMessage::Notification { method, params }),
            (None, None) => Err("message lacks both `id` and `method`".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_request() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"method":"workspace/configuration","params":{}}"#;
        match IncomingMessage::parse(raw).unwrap() {
            IncomingMessage::Request { method, .. } => assert_eq!(method, "workspace/configuration"),
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn classifies_response() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#;
        match IncomingMessage::parse(raw).unwrap() {
            IncomingMessage::Response { result, .. } => assert!(result.is_some()),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn classifies_notification() {
        let raw = r#"{"jsonrpc":"2.0","method":"textDocument/publishDiagnostics","params":{}}"#;
        match IncomingMessage::parse(raw).unwrap() {
            IncomingMessage::Notification { method, .. } => {
                assert_eq!(method, "textDocument/publishDiagnostics")
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }
}
