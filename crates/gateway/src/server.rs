//! HTTP server: the `/mcp` WebSocket upgrade plus the monitoring surface.

use std::sync::Arc;

use {
    axum::{
        Router,
        extract::{State, WebSocketUpgrade},
        http::StatusCode,
        response::{IntoResponse, Json, Response},
        routing::get,
    },
    tracing::{info, warn},
};

use webgate_protocol::MCP_PATH;

use crate::{dispatcher::Dispatcher, tools::status::status_payload, ws};

#[derive(Clone)]
struct AppState {
    dispatcher: Arc<Dispatcher>,
}

/// Bind and serve until the listener dies.
pub async fn run_server(dispatcher: Arc<Dispatcher>) -> std::io::Result<()> {
    let config = dispatcher.state().config.clone();
    let app_state = AppState {
        dispatcher: dispatcher.clone(),
    };

    let mut router = Router::new().route(MCP_PATH, get(ws_upgrade));
    if config.monitoring.enable_health_check {
        router = router.route(config.monitoring.health_path.as_str(), get(health));
    }
    if config.monitoring.enable_metrics {
        router = router.route(config.monitoring.metrics_path.as_str(), get(metrics));
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %listener.local_addr()?, path = MCP_PATH, "gateway listening");

    axum::serve(listener, router.with_state(app_state)).await
}

async fn ws_upgrade(State(app): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    let state = app.dispatcher.state();
    let max = state.config.server.max_connections;
    if state.client_count() >= max {
        warn!(max, "refusing connection: at capacity");
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    }

    let dispatcher = app.dispatcher.clone();
    upgrade.on_upgrade(move |socket| ws::handle_connection(socket, dispatcher))
}

async fn health(State(app): State<AppState>) -> Json<serde_json::Value> {
    let mut payload = status_payload(app.dispatcher.state()).await;
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("status".into(), serde_json::json!("ok"));
    }
    Json(payload)
}

/// Plain-text exposition of the hot counters.
async fn metrics(State(app): State<AppState>) -> String {
    let state = app.dispatcher.state();
    let sessions = state.sessions.stats();
    let pool = state.pool.stats().await;
    let resources = state.accountants.snapshot();
    format!(
        "webgate_sessions_active {}\n\
         webgate_sessions_max {}\n\
         webgate_pool_available {}\n\
         webgate_pool_active {}\n\
         webgate_pool_created_total {}\n\
         webgate_pool_reused_total {}\n\
         webgate_memory_reserved_mb {}\n\
         webgate_clients_connected {}\n",
        sessions.active,
        sessions.max,
        pool.available,
        pool.active,
        pool.created_total,
        pool.reused_total,
        resources.memory_reserved_mb,
        state.client_count(),
    )
}
