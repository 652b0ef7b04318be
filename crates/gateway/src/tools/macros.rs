//! `browser.macro.*`: record and replay tool sequences.

use std::sync::Arc;

use {
    serde::Deserialize,
    serde_json::{Value, json},
    tracing::info,
};

use webgate_protocol::{
    ErrorCode, GatewayError, JsonRpcRequest, RequestId, ops::tools,
};

use crate::{
    dispatcher::{Tool, ToolCall, ToolRegistry},
    state::GatewayState,
    tools::{handler, parse_args, require_session},
};

#[derive(Debug, Deserialize)]
struct SessionArgs {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct StopArgs {
    #[serde(rename = "sessionId")]
    session_id: String,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlayArgs {
    #[serde(rename = "macroId")]
    macro_id: String,
    /// Session to replay into; defaults to the one the macro was recorded on.
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteArgs {
    #[serde(rename = "macroId")]
    macro_id: String,
}

pub fn register(registry: &mut ToolRegistry) {
    let session_schema = json!({
        "type": "object",
        "properties": { "sessionId": { "type": "string" } },
        "required": ["sessionId"]
    });

    registry.register(Tool {
        name: tools::MACRO_START_RECORDING,
        schema: session_schema.clone(),
        session_scoped: false,
        url_bearing: false,
        unscheduled: false,
        handler: handler(start_recording),
        fallback: None,
    });

    registry.register(Tool {
        name: tools::MACRO_STOP_RECORDING,
        schema: json!({
            "type": "object",
            "properties": {
                "sessionId": { "type": "string" },
                "name": { "type": "string" }
            },
            "required": ["sessionId"]
        }),
        session_scoped: false,
        url_bearing: false,
        unscheduled: false,
        handler: handler(stop_recording),
        fallback: None,
    });

    registry.register(Tool {
        name: tools::MACRO_LIST,
        schema: json!({ "type": "object", "properties": {} }),
        session_scoped: false,
        url_bearing: false,
        unscheduled: false,
        handler: handler(list),
        fallback: None,
    });

    registry.register(Tool {
        name: tools::MACRO_PLAY,
        schema: json!({
            "type": "object",
            "properties": {
                "macroId": { "type": "string" },
                "sessionId": { "type": "string" }
            },
            "required": ["macroId"]
        }),
        session_scoped: false,
        url_bearing: false,
        // Replay re-enters the dispatcher; holding an execution slot here
        // would starve the steps of one.
        unscheduled: true,
        handler: handler(play),
        fallback: None,
    });

    registry.register(Tool {
        name: tools::MACRO_DELETE,
        schema: json!({
            "type": "object",
            "properties": { "macroId": { "type": "string" } },
            "required": ["macroId"]
        }),
        session_scoped: false,
        url_bearing: false,
        unscheduled: false,
        handler: handler(delete),
        fallback: None,
    });
}

async fn start_recording(state: Arc<GatewayState>, call: ToolCall) -> Result<Value, GatewayError> {
    let args: SessionArgs = parse_args(&call.params)?;
    require_session(&state, &args.session_id)?;

    if !state.macros.start(&args.session_id) {
        return Err(GatewayError::new(
            ErrorCode::InvalidParams,
            "a recording is already active for this session",
        ));
    }
    Ok(json!({ "recording": true }))
}

async fn stop_recording(state: Arc<GatewayState>, call: ToolCall) -> Result<Value, GatewayError> {
    let args: StopArgs = parse_args(&call.params)?;
    let Some(macro_) = state.macros.stop(&args.session_id, args.name) else {
        return Err(GatewayError::new(
            ErrorCode::InvalidParams,
            "no active recording for this session",
        ));
    };
    info!(macro_id = %macro_.id, steps = macro_.steps.len(), "macro recorded");
    Ok(json!({
        "macroId": &macro_.id,
        "steps": macro_.steps.len(),
        "macro": macro_,
    }))
}

async fn list(state: Arc<GatewayState>, _call: ToolCall) -> Result<Value, GatewayError> {
    let macros = state.macros.list();
    Ok(json!({ "macros": macros, "count": macros.len() }))
}

async fn play(state: Arc<GatewayState>, call: ToolCall) -> Result<Value, GatewayError> {
    let args: PlayArgs = parse_args(&call.params)?;
    let Some(macro_) = state.macros.get(&args.macro_id) else {
        return Err(GatewayError::new(
            ErrorCode::InvalidParams,
            format!("no macro with id {}", args.macro_id),
        ));
    };
    let target_session = args.session_id.unwrap_or_else(|| macro_.recorded_from.clone());
    require_session(&state, &target_session)?;

    let Some(dispatcher) = state.dispatcher() else {
        return Err(GatewayError::new(
            ErrorCode::InternalError,
            "dispatcher is not wired",
        ));
    };

    // Replay each step through the full dispatch path so the pre-flight chain
    // (rate limit, domain gate) applies to playback too.
    let mut results = Vec::with_capacity(macro_.steps.len());
    let mut replayed = 0usize;
    for (index, step) in macro_.steps.iter().enumerate() {
        let mut params = step.params.clone();
        if let Some(obj) = params.as_object_mut() {
            obj.insert("sessionId".into(), json!(&target_session));
        }
        let request = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: RequestId::Number(index as i64),
            method: step.tool.clone(),
            params: Some(params),
        };
        let response = dispatcher.dispatch(request, &call.client_id).await;

        let succeeded = response
            .result
            .as_ref()
            .and_then(|r| r["success"].as_bool())
            .unwrap_or(false);
        results.push(json!({
            "step": index,
            "tool": &step.tool,
            "success": succeeded,
            "error": response
                .result
                .as_ref()
                .and_then(|r| r.get("error").cloned())
                .or_else(|| response.error.as_ref().map(|e| json!(e.message))),
        }));
        if succeeded {
            replayed += 1;
        } else {
            break;
        }
    }

    Ok(json!({
        "macroId": args.macro_id,
        "sessionId": target_session,
        "played": replayed,
        "total": macro_.steps.len(),
        "results": results,
    }))
}

async fn delete(state: Arc<GatewayState>, call: ToolCall) -> Result<Value, GatewayError> {
    let args: DeleteArgs = parse_args(&call.params)?;
    Ok(json!({ "deleted": state.macros.delete(&args.macro_id) }))
}
