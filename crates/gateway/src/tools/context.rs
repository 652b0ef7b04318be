//! `browser.newContext` and `browser.close`: session creation and teardown.

use std::sync::Arc;

use {
    serde::Deserialize,
    serde_json::{Value, json},
};

use {
    webgate_browser::Viewport,
    webgate_protocol::{GatewayError, ops::tools},
    webgate_sessions::SessionOptions,
};

use crate::{
    dispatcher::{Tool, ToolCall, ToolRegistry},
    state::GatewayState,
    tools::{handler, parse_args},
};

#[derive(Debug, Deserialize)]
struct NewContextArgs {
    viewport: Option<Viewport>,
    #[serde(rename = "userAgent")]
    user_agent: Option<String>,
    #[serde(rename = "allowedDomains", default)]
    allowed_domains: Vec<String>,
    timeout: Option<u64>,
    /// Accepted for compatibility; headless is a process-wide setting.
    #[serde(rename = "headless")]
    _headless: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct CloseArgs {
    #[serde(rename = "sessionId")]
    session_id: String,
}

pub fn register(registry: &mut ToolRegistry) {
    registry.register(Tool {
        name: tools::NEW_CONTEXT,
        schema: json!({
            "type": "object",
            "properties": {
                "viewport": {
                    "type": "object",
                    "properties": {
                        "width": { "type": "integer", "minimum": 100, "maximum": 3840 },
                        "height": { "type": "integer", "minimum": 100, "maximum": 2160 }
                    }
                },
                "userAgent": { "type": "string", "maxLength": 500 },
                "allowedDomains": { "type": "array", "items": { "type": "string" } },
                "timeout": { "type": "integer", "minimum": 1000, "maximum": 300000 },
                "headless": { "type": "boolean" }
            }
        }),
        session_scoped: false,
        url_bearing: false,
        unscheduled: false,
        handler: handler(new_context),
        fallback: None,
    });

    registry.register(Tool {
        name: tools::CLOSE,
        schema: json!({
            "type": "object",
            "properties": { "sessionId": { "type": "string" } },
            "required": ["sessionId"]
        }),
        // Not session-scoped: closing a session that is already gone must
        // report `closed: false`, not a lookup failure.
        session_scoped: false,
        url_bearing: false,
        unscheduled: false,
        handler: handler(close),
        fallback: None,
    });
}

async fn new_context(state: Arc<GatewayState>, call: ToolCall) -> Result<Value, GatewayError> {
    let args: NewContextArgs = parse_args(&call.params)?;
    let options = SessionOptions {
        viewport: args.viewport,
        user_agent: args.user_agent,
        allowed_domains: args.allowed_domains,
        timeout_ms: args.timeout,
    };

    let session = state
        .sessions
        .create_session(options, &call.client_id)
        .await?;

    let viewport = session.options.viewport.unwrap_or(Viewport {
        width: state.config.browser.viewport_width,
        height: state.config.browser.viewport_height,
    });

    Ok(json!({
        "sessionId": &session.id,
        "createdAt": session.created_at.to_rfc3339(),
        "viewport": viewport,
    }))
}

async fn close(state: Arc<GatewayState>, call: ToolCall) -> Result<Value, GatewayError> {
    let args: CloseArgs = parse_args(&call.params)?;
    let closed = state.sessions.destroy_session(&args.session_id).await;
    if closed {
        state.macros.discard_recording(&args.session_id);
        state.reports.cleanup(&args.session_id);
        if let Some(dispatcher) = state.dispatcher() {
            dispatcher.forget_session(&args.session_id);
        }
    }
    Ok(json!({ "closed": closed }))
}
