//! Tool implementations. Each tool is a record of `{name, schema, handler}`;
//! argument maps are parsed into typed structs once, at the handler boundary.

use std::{future::Future, sync::Arc};

use serde_json::Value;

use {
    webgate_protocol::{ErrorCode, GatewayError},
    webgate_sessions::Session,
};

use crate::{
    dispatcher::{BoxedToolFuture, HandlerFn, ToolCall, ToolRegistry},
    state::GatewayState,
};

pub mod buffers;
pub mod capture;
pub mod context;
pub mod evaluate;
pub mod export;
pub mod interaction;
pub mod macros;
pub mod navigation;
pub mod status;
pub mod trace;

/// Build the full tool surface.
#[must_use]
pub fn build_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    context::register(&mut registry);
    navigation::register(&mut registry);
    interaction::register(&mut registry);
    capture::register(&mut registry);
    evaluate::register(&mut registry);
    buffers::register(&mut registry);
    trace::register(&mut registry);
    export::register(&mut registry);
    macros::register(&mut registry);
    status::register(&mut registry);
    registry
}

/// Lift an async fn into a boxed handler.
pub(crate) fn handler<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(Arc<GatewayState>, ToolCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, GatewayError>> + Send + 'static,
{
    Box::new(move |state, call| -> BoxedToolFuture { Box::pin(f(state, call)) })
}

/// Parse the request's argument map into the tool's typed shape.
pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(
    params: &Value,
) -> Result<T, GatewayError> {
    serde_json::from_value(params.clone())
        .map_err(|e| GatewayError::new(ErrorCode::InvalidParams, e.to_string()))
}

/// Session lookup inside handlers (the dispatcher pre-flight already ran, but
/// retries re-enter after recreation).
pub(crate) fn require_session(
    state: &GatewayState,
    session_id: &str,
) -> Result<Arc<Session>, GatewayError> {
    state.sessions.get_session(session_id).ok_or_else(|| {
        GatewayError::new(
            ErrorCode::ContextCrashed,
            format!("session {session_id} not found or destroyed"),
        )
        .with_context("sessionId", session_id)
    })
}
