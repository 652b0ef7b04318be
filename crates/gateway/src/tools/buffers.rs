//! `browser.network.getRecent` and `browser.console.getRecent`: reads over
//! the session ring buffers.

use std::sync::Arc;

use {
    serde::Deserialize,
    serde_json::{Value, json},
};

use {
    webgate_protocol::{ErrorCode, GatewayError, ops::tools},
    webgate_sessions::ConsoleLevel,
};

use crate::{
    dispatcher::{Tool, ToolCall, ToolRegistry},
    state::GatewayState,
    tools::{handler, parse_args, require_session},
};

#[derive(Debug, Deserialize)]
struct NetworkArgs {
    #[serde(rename = "sessionId")]
    session_id: String,
    limit: Option<usize>,
    #[serde(rename = "includeBody", default)]
    include_body: bool,
}

#[derive(Debug, Deserialize)]
struct ConsoleArgs {
    #[serde(rename = "sessionId")]
    session_id: String,
    limit: Option<usize>,
    level: Option<ConsoleLevel>,
    #[serde(rename = "includeLocation", default = "default_true")]
    include_location: bool,
}

fn default_true() -> bool {
    true
}

pub fn register(registry: &mut ToolRegistry) {
    registry.register(Tool {
        name: tools::NETWORK_GET_RECENT,
        schema: json!({
            "type": "object",
            "properties": {
                "sessionId": { "type": "string" },
                "limit": { "type": "integer", "minimum": 1 },
                "includeBody": { "type": "boolean" }
            },
            "required": ["sessionId"]
        }),
        session_scoped: true,
        url_bearing: false,
        unscheduled: false,
        handler: handler(network_recent),
        fallback: None,
    });

    registry.register(Tool {
        name: tools::CONSOLE_GET_RECENT,
        schema: json!({
            "type": "object",
            "properties": {
                "sessionId": { "type": "string" },
                "limit": { "type": "integer", "minimum": 1 },
                "level": { "enum": ["debug", "info", "warn", "error"] },
                "includeLocation": { "type": "boolean" }
            },
            "required": ["sessionId"]
        }),
        session_scoped: true,
        url_bearing: false,
        unscheduled: false,
        handler: handler(console_recent),
        fallback: None,
    });
}

async fn network_recent(state: Arc<GatewayState>, call: ToolCall) -> Result<Value, GatewayError> {
    let args: NetworkArgs = parse_args(&call.params)?;
    let session = require_session(&state, &args.session_id)?;
    session.touch();

    let entries = session.recent_network(args.limit.unwrap_or(50), args.include_body);
    let count = entries.len();
    let entries = serde_json::to_value(entries)
        .map_err(|e| GatewayError::new(ErrorCode::InternalError, e.to_string()))?;
    Ok(json!({ "entries": entries, "count": count }))
}

async fn console_recent(state: Arc<GatewayState>, call: ToolCall) -> Result<Value, GatewayError> {
    let args: ConsoleArgs = parse_args(&call.params)?;
    let session = require_session(&state, &args.session_id)?;
    session.touch();

    let mut entries = session.recent_console(args.limit.unwrap_or(100), args.level);
    if !args.include_location {
        for entry in &mut entries {
            entry.location = None;
        }
    }
    let count = entries.len();
    let entries = serde_json::to_value(entries)
        .map_err(|e| GatewayError::new(ErrorCode::InternalError, e.to_string()))?;
    Ok(json!({ "entries": entries, "count": count }))
}
