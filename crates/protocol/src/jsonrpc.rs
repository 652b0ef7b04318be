//! JSON-RPC 2.0 frame types shared by both transports.

use serde::{Deserialize, Serialize};

use crate::taxonomy::GatewayError;

/// JSON-RPC error codes used by the gateway.
pub mod rpc_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Application-level tool failure carried in the `error` envelope.
    pub const TOOL_ERROR: i64 = -32000;
}

/// A request id: numbers and strings per the JSON-RPC spec, plus the `null`
/// id used when answering unparseable frames.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
    Null,
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// Client → gateway tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id: id.into(),
            method: method.into(),
            params: None,
        }
    }

    /// Returns `true` when the frame declares the supported protocol version.
    #[must_use]
    pub fn is_supported_version(&self) -> bool {
        self.jsonrpc == "2.0"
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// Gateway → client result or error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn ok(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: RequestId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// The `error` member of a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Build a full error envelope from a structured gateway error; the
    /// taxonomy payload rides in `data` per the wire contract.
    #[must_use]
    pub fn from_gateway_error(code: i64, err: &GatewayError) -> Self {
        Self {
            code,
            message: err.message.clone(),
            data: Some(err.to_wire()),
        }
    }
}

/// Gateway → client server-push (no id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params: Some(params),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrip() {
        let raw = r#"{"jsonrpc":"2.0","id":7,"method":"browser.goto","params":{"url":"https://example.com"}}"#;
        let req: JsonRpcRequest = serde_json::from_str(raw).unwrap();
        assert!(req.is_supported_version());
        assert_eq!(req.id, RequestId::Number(7));
        assert_eq!(req.method, "browser.goto");
        assert!(req.params.is_some());
    }

    #[test]
    fn string_ids_accepted() {
        let raw = r#"{"jsonrpc":"2.0","id":"abc-1","method":"browser.newContext"}"#;
        let req: JsonRpcRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.id, RequestId::String("abc-1".into()));
    }

    #[test]
    fn response_omits_empty_members() {
        let resp = JsonRpcResponse::ok(RequestId::Number(1), serde_json::json!({"ok": true}));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("\"error\""));

        let resp = JsonRpcResponse::err(
            RequestId::Number(2),
            JsonRpcError::new(rpc_codes::METHOD_NOT_FOUND, "no such tool"),
        );
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("\"result\""));
        assert!(json.contains("-32601"));
    }

    #[test]
    fn null_id_serializes_as_json_null() {
        let resp = JsonRpcResponse::err(
            RequestId::Null,
            JsonRpcError::new(rpc_codes::PARSE_ERROR, "bad frame"),
        );
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json["id"].is_null());
    }

    #[test]
    fn notification_has_no_id() {
        let n = JsonRpcNotification::new("console.log", serde_json::json!({"level": "info"}));
        let json = serde_json::to_value(&n).unwrap();
        assert!(json.get("id").is_none());
    }
}
