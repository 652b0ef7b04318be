//! Stdio transport: newline-framed JSON-RPC on stdin/stdout. Stderr carries
//! logs only, so stdout stays clean for frames.

use std::sync::Arc;

use {
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        sync::mpsc,
    },
    tracing::{debug, info, warn},
};

use webgate_protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId, notifications, rpc_codes,
};

use crate::{dispatcher::Dispatcher, state::ConnectedClient};

/// The fixed client id of the stdio peer.
pub const STDIO_CLIENT_ID: &str = "stdio";

/// Run the stdio transport until stdin closes.
pub async fn run_stdio(dispatcher: Arc<Dispatcher>) -> std::io::Result<()> {
    let state = dispatcher.state().clone();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(frame) = rx.recv().await {
            if stdout.write_all(frame.as_bytes()).await.is_err() {
                break;
            }
            if stdout.write_all(b"\n").await.is_err() {
                break;
            }
            if stdout.flush().await.is_err() {
                break;
            }
        }
    });

    state.register_client(ConnectedClient {
        client_id: STDIO_CLIENT_ID.to_string(),
        sender: tx.clone(),
        connected_at: std::time::Instant::now(),
    });

    for descriptor in dispatcher.registry().descriptors() {
        state.notify(STDIO_CLIENT_ID, notifications::TOOL_REGISTERED, descriptor);
    }

    info!("stdio transport ready");

    let mut reader = BufReader::new(tokio::io::stdin());
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("stdin closed");
                break;
            },
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if trimmed.len() > webgate_protocol::MAX_PAYLOAD_BYTES {
                    respond_now(
                        &tx,
                        JsonRpcResponse::err(
                            RequestId::Null,
                            JsonRpcError::new(rpc_codes::INVALID_REQUEST, "frame too large"),
                        ),
                    );
                    continue;
                }

                match serde_json::from_str::<JsonRpcRequest>(trimmed) {
                    Ok(request) => {
                        debug!(method = %request.method, id = %request.id, "stdio request");
                        let rx = dispatcher.submit(request, STDIO_CLIENT_ID);
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            if let Ok(response) = rx.await
                                && let Ok(json) = serde_json::to_string(&response)
                            {
                                let _ = tx.send(json);
                            }
                        });
                    },
                    Err(e) => {
                        warn!(error = %e, "unparseable stdio frame");
                        respond_now(
                            &tx,
                            JsonRpcResponse::err(
                                RequestId::Null,
                                JsonRpcError::new(
                                    rpc_codes::PARSE_ERROR,
                                    format!("parse error: {e}"),
                                ),
                            ),
                        );
                    },
                }
            },
            Err(e) => {
                warn!(error = %e, "stdin read error");
                break;
            },
        }
    }

    state.unregister_client(STDIO_CLIENT_ID);
    drop(tx);
    let _ = writer.await;
    Ok(())
}

fn respond_now(tx: &mpsc::UnboundedSender<String>, response: JsonRpcResponse) {
    if let Ok(json) = serde_json::to_string(&response) {
        let _ = tx.send(json);
    }
}
