//! `browser.trace.start` / `browser.trace.stop`: per-session performance
//! telemetry collection.

use std::sync::Arc;

use {
    serde::Deserialize,
    serde_json::{Value, json},
};

use webgate_protocol::{ErrorCode, GatewayError, ops::tools};

use crate::{
    dispatcher::{Tool, ToolCall, ToolRegistry},
    state::GatewayState,
    tools::{handler, parse_args, require_session},
};

#[derive(Debug, Deserialize)]
struct TraceArgs {
    #[serde(rename = "sessionId")]
    session_id: String,
}

pub fn register(registry: &mut ToolRegistry) {
    let session_schema = json!({
        "type": "object",
        "properties": { "sessionId": { "type": "string" } },
        "required": ["sessionId"]
    });

    registry.register(Tool {
        name: tools::TRACE_START,
        schema: session_schema.clone(),
        session_scoped: true,
        url_bearing: false,
        unscheduled: false,
        handler: handler(trace_start),
        fallback: None,
    });

    registry.register(Tool {
        name: tools::TRACE_STOP,
        schema: session_schema,
        session_scoped: true,
        url_bearing: false,
        unscheduled: false,
        handler: handler(trace_stop),
        fallback: None,
    });
}

async fn trace_start(state: Arc<GatewayState>, call: ToolCall) -> Result<Value, GatewayError> {
    let args: TraceArgs = parse_args(&call.params)?;
    let session = require_session(&state, &args.session_id)?;

    if !session.set_trace_active(true) {
        return Err(GatewayError::new(
            ErrorCode::InvalidParams,
            "a trace is already active for this session",
        ));
    }

    let _guard = session.op_lock.lock().await;
    let page = session.page()?;
    if let Err(e) = webgate_browser::ops::trace_start(&page).await {
        session.set_trace_active(false);
        return Err(e.into_gateway());
    }
    session.touch();

    Ok(json!({ "tracing": true }))
}

async fn trace_stop(state: Arc<GatewayState>, call: ToolCall) -> Result<Value, GatewayError> {
    let args: TraceArgs = parse_args(&call.params)?;
    let session = require_session(&state, &args.session_id)?;

    if !session.set_trace_active(false) {
        return Err(GatewayError::new(
            ErrorCode::InvalidParams,
            "no active trace for this session",
        ));
    }

    let _guard = session.op_lock.lock().await;
    let page = session.page()?;
    let metrics = webgate_browser::ops::trace_stop(&page)
        .await
        .map_err(|e| e.into_gateway())?;
    session.touch();

    Ok(json!({ "tracing": false, "metrics": metrics }))
}
