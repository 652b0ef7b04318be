//! WebSocket transport: one JSON-RPC frame per text message on `/mcp`.

use std::sync::Arc;

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{SinkExt, stream::StreamExt},
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use webgate_protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId, notifications, rpc_codes,
};

use crate::{dispatcher::Dispatcher, state::ConnectedClient};

/// Handle a single WebSocket connection through its full lifecycle:
/// registration → message loop → cleanup.
pub async fn handle_connection(socket: WebSocket, dispatcher: Arc<Dispatcher>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let state = dispatcher.state().clone();
    info!(conn_id = %conn_id, "ws: new connection");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<String>();

    // Write loop: forwards frames from the channel to the socket. A single
    // channel per connection keeps notifications strictly ordered.
    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(msg) = client_rx.recv().await {
            if ws_tx.send(Message::Text(msg.into())).await.is_err() {
                debug!(conn_id = %write_conn_id, "ws: write loop closed");
                break;
            }
        }
    });

    state.register_client(ConnectedClient {
        client_id: conn_id.clone(),
        sender: client_tx.clone(),
        connected_at: std::time::Instant::now(),
    });

    for descriptor in dispatcher.registry().descriptors() {
        state.notify(&conn_id, notifications::TOOL_REGISTERED, descriptor);
    }

    // ── Read loop ────────────────────────────────────────────────────────────
    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "ws: read error");
                break;
            },
        };

        if text.len() > webgate_protocol::MAX_PAYLOAD_BYTES {
            send_response(
                &client_tx,
                JsonRpcResponse::err(
                    RequestId::Null,
                    JsonRpcError::new(rpc_codes::INVALID_REQUEST, "frame too large"),
                ),
            );
            continue;
        }

        match serde_json::from_str::<JsonRpcRequest>(&text) {
            Ok(request) => {
                debug!(conn_id = %conn_id, method = %request.method, id = %request.id, "ws request");
                let rx = dispatcher.submit(request, &conn_id);
                let client_tx = client_tx.clone();
                tokio::spawn(async move {
                    if let Ok(response) = rx.await
                        && let Ok(json) = serde_json::to_string(&response)
                    {
                        let _ = client_tx.send(json);
                    }
                });
            },
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "ws: unparseable frame");
                send_response(
                    &client_tx,
                    JsonRpcResponse::err(
                        RequestId::Null,
                        JsonRpcError::new(rpc_codes::PARSE_ERROR, format!("parse error: {e}")),
                    ),
                );
            },
        }
    }

    // ── Cleanup ──────────────────────────────────────────────────────────────
    // Unregistering cancels this client's queued and in-flight operations.
    state.unregister_client(&conn_id);
    drop(client_tx);
    write_handle.abort();
    info!(conn_id = %conn_id, "ws: connection closed");
}

fn send_response(tx: &mpsc::UnboundedSender<String>, response: JsonRpcResponse) {
    if let Ok(json) = serde_json::to_string(&response) {
        let _ = tx.send(json);
    }
}
