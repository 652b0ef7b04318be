//! Gateway wire protocol and error vocabulary.
//!
//! All communication uses JSON-RPC 2.0 frames, one JSON object per line on
//! stdio and one per text frame on WebSocket:
//! - [`JsonRpcRequest`]      — client → gateway tool call
//! - [`JsonRpcResponse`]     — gateway → client result or error
//! - [`JsonRpcNotification`] — gateway → client server-push (no id)
//!
//! The [`taxonomy`] module defines the closed error vocabulary every
//! subsystem speaks; string codes exist only at the serialization edge.

pub mod jsonrpc;
pub mod ops;
pub mod taxonomy;

pub use {
    jsonrpc::{
        JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId, rpc_codes,
    },
    ops::OperationClass,
    taxonomy::{ErrorCategory, ErrorCode, GatewayError},
};

// ── Constants ────────────────────────────────────────────────────────────────

/// Largest accepted inbound frame, either transport.
pub const MAX_PAYLOAD_BYTES: usize = 1_048_576; // 1 MiB

/// WebSocket endpoint path.
pub const MCP_PATH: &str = "/mcp";

// ── Notification names ───────────────────────────────────────────────────────

pub mod notifications {
    pub const TOOL_REGISTERED: &str = "tool.registered";
    pub const TOOL_UNREGISTERED: &str = "tool.unregistered";
    pub const CONSOLE_LOG: &str = "console.log";
    pub const PERMISSION_REQUESTED: &str = "permission.requested";
}
