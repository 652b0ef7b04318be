//! `browser.screenshot` and `browser.domSnapshot`.

use std::sync::Arc;

use {
    serde::Deserialize,
    serde_json::{Value, json},
};

use {
    webgate_browser::{
        ops::{self, ClipRect, ScreenshotRequest},
        snapshot::{SnapshotRequest, extract_snapshot},
    },
    webgate_protocol::{ErrorCode, GatewayError, ops::tools},
};

use crate::{
    dispatcher::{Tool, ToolCall, ToolRegistry},
    state::GatewayState,
    tools::{handler, parse_args, require_session},
};

#[derive(Debug, Deserialize)]
struct ScreenshotArgs {
    #[serde(rename = "sessionId")]
    session_id: String,
    #[serde(rename = "fullPage", default)]
    full_page: bool,
    selector: Option<String>,
    format: Option<String>,
    quality: Option<u32>,
    clip: Option<ClipRect>,
    #[serde(rename = "omitBackground", default)]
    omit_background: bool,
}

#[derive(Debug, Deserialize)]
struct DomSnapshotArgs {
    #[serde(rename = "sessionId")]
    session_id: String,
    #[serde(rename = "maxNodes")]
    max_nodes: Option<usize>,
    selector: Option<String>,
    #[serde(rename = "includeStyles", default)]
    include_styles: bool,
    #[serde(rename = "includeAttributes", default)]
    include_attributes: bool,
}

pub fn register(registry: &mut ToolRegistry) {
    registry.register(Tool {
        name: tools::SCREENSHOT,
        schema: json!({
            "type": "object",
            "properties": {
                "sessionId": { "type": "string" },
                "fullPage": { "type": "boolean" },
                "selector": { "type": "string" },
                "format": { "enum": ["png", "jpeg"] },
                "quality": { "type": "integer", "minimum": 0, "maximum": 100 },
                "clip": {
                    "type": "object",
                    "properties": {
                        "x": { "type": "number" },
                        "y": { "type": "number" },
                        "width": { "type": "number" },
                        "height": { "type": "number" }
                    }
                },
                "omitBackground": { "type": "boolean" },
                "timeout": { "type": "integer" }
            },
            "required": ["sessionId"]
        }),
        session_scoped: true,
        url_bearing: false,
        unscheduled: false,
        handler: handler(screenshot),
        fallback: None,
    });

    registry.register(Tool {
        name: tools::DOM_SNAPSHOT,
        schema: json!({
            "type": "object",
            "properties": {
                "sessionId": { "type": "string" },
                "maxNodes": { "type": "integer", "minimum": 1 },
                "selector": { "type": "string" },
                "includeStyles": { "type": "boolean" },
                "includeAttributes": { "type": "boolean" },
                "timeout": { "type": "integer" }
            },
            "required": ["sessionId"]
        }),
        session_scoped: true,
        url_bearing: false,
        unscheduled: false,
        handler: handler(dom_snapshot),
        fallback: None,
    });
}

async fn screenshot(state: Arc<GatewayState>, call: ToolCall) -> Result<Value, GatewayError> {
    let args: ScreenshotArgs = parse_args(&call.params)?;
    if let Some(quality) = args.quality
        && quality > 100
    {
        return Err(GatewayError::new(
            ErrorCode::InvalidParams,
            "quality must be within [0, 100]",
        ));
    }
    let session = require_session(&state, &args.session_id)?;

    let _guard = session.op_lock.lock().await;
    let page = session.page()?;
    let request = ScreenshotRequest {
        full_page: args.full_page,
        selector: args.selector,
        format: args.format,
        quality: args.quality,
        clip: args.clip,
        omit_background: args.omit_background,
    };
    let (data, format) = ops::screenshot(&page, &request)
        .await
        .map_err(|e| e.into_gateway())?;
    session.touch();

    Ok(json!({ "data": data, "format": format }))
}

async fn dom_snapshot(state: Arc<GatewayState>, call: ToolCall) -> Result<Value, GatewayError> {
    let args: DomSnapshotArgs = parse_args(&call.params)?;
    let session = require_session(&state, &args.session_id)?;

    let _guard = session.op_lock.lock().await;
    let page = session.page()?;
    let request = SnapshotRequest {
        max_nodes: args.max_nodes.unwrap_or(200),
        selector: args.selector,
        include_attributes: args.include_attributes,
        include_styles: args.include_styles,
    };
    let snapshot = extract_snapshot(&page, &request)
        .await
        .map_err(|e| e.into_gateway())?;
    session.touch();

    serde_json::to_value(&snapshot)
        .map_err(|e| GatewayError::new(ErrorCode::InternalError, e.to_string()))
}
