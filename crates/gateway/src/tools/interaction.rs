//! `browser.click`, `browser.type`, `browser.select`: trusted input paths
//! with a DOM-level fallback for clicks.

use std::{sync::Arc, time::Duration};

use {
    serde::Deserialize,
    serde_json::{Value, json},
};

use {
    webgate_browser::ops::{self, ClickPosition},
    webgate_protocol::{GatewayError, ops::tools},
};

use crate::{
    dispatcher::{Tool, ToolCall, ToolRegistry},
    state::GatewayState,
    tools::{handler, parse_args, require_session},
};

#[derive(Debug, Deserialize)]
struct ClickArgs {
    #[serde(rename = "sessionId")]
    session_id: String,
    selector: String,
    #[serde(default)]
    force: bool,
    position: Option<ClickPosition>,
}

#[derive(Debug, Deserialize)]
struct TypeArgs {
    #[serde(rename = "sessionId")]
    session_id: String,
    selector: String,
    text: String,
    /// Inter-key delay in milliseconds.
    delay: Option<u64>,
    #[serde(default)]
    clear: bool,
}

#[derive(Debug, Deserialize)]
struct SelectArgs {
    #[serde(rename = "sessionId")]
    session_id: String,
    selector: String,
    value: String,
}

pub fn register(registry: &mut ToolRegistry) {
    registry.register(Tool {
        name: tools::CLICK,
        schema: json!({
            "type": "object",
            "properties": {
                "sessionId": { "type": "string" },
                "selector": { "type": "string" },
                "timeout": { "type": "integer" },
                "force": { "type": "boolean" },
                "position": {
                    "type": "object",
                    "properties": {
                        "x": { "type": "number" },
                        "y": { "type": "number" }
                    }
                }
            },
            "required": ["sessionId", "selector"]
        }),
        session_scoped: true,
        url_bearing: false,
        unscheduled: false,
        handler: handler(click),
        fallback: Some(handler(click_fallback)),
    });

    registry.register(Tool {
        name: tools::TYPE,
        schema: json!({
            "type": "object",
            "properties": {
                "sessionId": { "type": "string" },
                "selector": { "type": "string" },
                "text": { "type": "string" },
                "timeout": { "type": "integer" },
                "delay": { "type": "integer" },
                "clear": { "type": "boolean" }
            },
            "required": ["sessionId", "selector", "text"]
        }),
        session_scoped: true,
        url_bearing: false,
        unscheduled: false,
        handler: handler(type_text),
        fallback: None,
    });

    registry.register(Tool {
        name: tools::SELECT,
        schema: json!({
            "type": "object",
            "properties": {
                "sessionId": { "type": "string" },
                "selector": { "type": "string" },
                "value": { "type": "string" },
                "timeout": { "type": "integer" }
            },
            "required": ["sessionId", "selector", "value"]
        }),
        session_scoped: true,
        url_bearing: false,
        unscheduled: false,
        handler: handler(select),
        fallback: None,
    });
}

async fn click(state: Arc<GatewayState>, call: ToolCall) -> Result<Value, GatewayError> {
    let args: ClickArgs = parse_args(&call.params)?;
    let session = require_session(&state, &args.session_id)?;

    let _guard = session.op_lock.lock().await;
    let page = session.page()?;
    ops::click(&page, &args.selector, args.force, args.position)
        .await
        .map_err(|e| e.into_gateway())?;
    session.touch();

    Ok(json!({ "selector": args.selector }))
}

/// Alternative interaction path: a DOM-level click dispatched in the page.
async fn click_fallback(state: Arc<GatewayState>, call: ToolCall) -> Result<Value, GatewayError> {
    let args: ClickArgs = parse_args(&call.params)?;
    let session = require_session(&state, &args.session_id)?;

    let _guard = session.op_lock.lock().await;
    let page = session.page()?;
    ops::click_via_dom(&page, &args.selector)
        .await
        .map_err(|e| e.into_gateway())?;
    session.touch();

    Ok(json!({ "selector": args.selector, "path": "dom" }))
}

async fn type_text(state: Arc<GatewayState>, call: ToolCall) -> Result<Value, GatewayError> {
    let args: TypeArgs = parse_args(&call.params)?;
    let session = require_session(&state, &args.session_id)?;

    let _guard = session.op_lock.lock().await;
    let page = session.page()?;
    ops::type_text(
        &page,
        &args.selector,
        &args.text,
        args.delay.map(Duration::from_millis),
        args.clear,
    )
    .await
    .map_err(|e| e.into_gateway())?;
    session.touch();

    Ok(json!({ "selector": args.selector, "chars": args.text.chars().count() }))
}

async fn select(state: Arc<GatewayState>, call: ToolCall) -> Result<Value, GatewayError> {
    let args: SelectArgs = parse_args(&call.params)?;
    let session = require_session(&state, &args.session_id)?;

    let _guard = session.op_lock.lock().await;
    let page = session.page()?;
    ops::select_option(&page, &args.selector, &args.value)
        .await
        .map_err(|e| e.into_gateway())?;
    session.touch();

    Ok(json!({ "selector": args.selector, "value": args.value }))
}
