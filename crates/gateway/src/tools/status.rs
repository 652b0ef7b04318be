//! `gateway.status`: pool, session, quota, and breaker visibility. The same
//! payload backs the `/health` route.

use std::sync::Arc;

use serde_json::{Value, json};

use webgate_protocol::{GatewayError, ops::tools};

use crate::{
    dispatcher::{Tool, ToolCall, ToolRegistry},
    state::GatewayState,
    tools::handler,
};

pub fn register(registry: &mut ToolRegistry) {
    registry.register(Tool {
        name: tools::STATUS,
        schema: json!({ "type": "object", "properties": {} }),
        session_scoped: false,
        url_bearing: false,
        unscheduled: false,
        handler: handler(status),
        fallback: None,
    });
}

async fn status(state: Arc<GatewayState>, _call: ToolCall) -> Result<Value, GatewayError> {
    Ok(status_payload(&state).await)
}

/// Shared between the status tool and the health route.
pub async fn status_payload(state: &GatewayState) -> Value {
    let breakers: Vec<Value> = state
        .breakers
        .snapshots()
        .into_iter()
        .map(|(class, snapshot)| {
            json!({
                "operationClass": class.as_str(),
                "state": snapshot.state,
                "successes": snapshot.successes,
                "failures": snapshot.failures,
            })
        })
        .collect();

    json!({
        "sessions": state.sessions.stats(),
        "pool": state.pool.stats().await,
        "resources": state.accountants.snapshot(),
        "breakers": breakers,
        "clients": state.client_count(),
        "pendingPermissions": state.gate.pending_requests().await.len(),
    })
}
