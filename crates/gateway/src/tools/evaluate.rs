//! `browser.eval`: JavaScript evaluation in the page context.

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
struct EvalArgs {
    #[serde(rename = "sessionId")]
    session_id: String,
    code: String,
}

pub fn register(registry: &mut ToolRegistry) {
    registry.register(Tool {
        name: tools::EVAL,
        schema: json!({
            "type": "object",
            "properties": {
                "sessionId": { "type": "string" },
                "code": { "type": "string" },
                "timeout": { "type": "integer" }
            },
            "required": ["sessionId", "code"]
        }),
        session_scoped: true,
        url_bearing: false,
        unscheduled: false,
        handler: handler(eval),
        fallback: None,
    });
}

async fn eval(state: Arc<GatewayState>, call: ToolCall) -> Result<Value, GatewayError> {
    let args: EvalArgs = parse_args(&call.params)?;
    let session = require_session(&state, &args.session_id)?;

    let _guard = session.op_lock.lock().await;
    let page = session.page()?;
    let result = webgate_browser::ops::evaluate(&page, &args.code)
        .await
        .map_err(|e| e.into_gateway())?;
    session.touch();

    Ok(json!({ "result": result }))
}
