//! `browser.goto`: navigation with wait semantics.

use std::sync::Arc;

use {
    serde::Deserialize,
    serde_json::{Value, json},
};

use webgate_protocol::{GatewayError, ops::tools};

use crate::{
    dispatcher::{Tool, ToolCall, ToolRegistry},
    state::GatewayState,
    tools::{handler, parse_args, require_session},
};

#[derive(Debug, Deserialize)]
struct GotoArgs {
    #[serde(rename = "sessionId")]
    session_id: String,
    url: String,
    #[serde(rename = "waitUntil", default)]
    wait_until: webgate_browser::ops::WaitUntil,
}

pub fn register(registry: &mut ToolRegistry) {
    registry.register(Tool {
        name: tools::GOTO,
        schema: json!({
            "type": "object",
            "properties": {
                "sessionId": { "type": "string" },
                "url": { "type": "string" },
                "waitUntil": { "enum": ["domcontentloaded", "load", "networkidle"] },
                "timeout": { "type": "integer" }
            },
            "required": ["sessionId", "url"]
        }),
        session_scoped: true,
        url_bearing: true,
        unscheduled: false,
        handler: handler(goto),
        fallback: None,
    });
}

async fn goto(state: Arc<GatewayState>, call: ToolCall) -> Result<Value, GatewayError> {
    let args: GotoArgs = parse_args(&call.params)?;
    let session = require_session(&state, &args.session_id)?;

    let _guard = session.op_lock.lock().await;
    let page = session.page()?;
    let nav = webgate_browser::ops::navigate(&page, &args.url, args.wait_until)
        .await
        .map_err(|e| e.into_gateway())?;
    session.touch();

    Ok(json!({
        "url": nav.url,
        "title": nav.title,
        "status": nav.status,
    }))
}
