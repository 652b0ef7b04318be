//! Tool dispatch: exact-name resolution, argument parsing at the boundary,
//! the pre-flight chain (rate limit → session lookup → domain gate), and
//! execution under the scheduler, circuit breaker, and recovery engine.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration};

use {
    dashmap::DashMap,
    serde_json::{Value, json},
    tokio::sync::{mpsc, oneshot},
    tracing::{debug, warn},
};

use {
    webgate_protocol::{
        ErrorCode, GatewayError, JsonRpcError, JsonRpcRequest, JsonRpcResponse, OperationClass,
        RequestId, rpc_codes,
    },
    webgate_security::DomainDecision,
    webgate_security::gate::domain_of,
    webgate_sessions::Session,
};

use crate::{
    scheduler::{OpTag, SchedTimings},
    state::GatewayState,
};

/// A parsed tool invocation handed to a handler.
#[derive(Clone)]
pub struct ToolCall {
    pub params: Value,
    pub client_id: String,
}

pub type BoxedToolFuture = Pin<Box<dyn Future<Output = Result<Value, GatewayError>> + Send>>;

/// Tool handlers are records of functions, not trait objects with state.
pub type HandlerFn = Box<dyn Fn(Arc<GatewayState>, ToolCall) -> BoxedToolFuture + Send + Sync>;

/// One registered tool.
pub struct Tool {
    pub name: &'static str,
    /// Declared parameter schema, served to clients on registration.
    pub schema: Value,
    /// Requires a `sessionId` argument and routes through the session's FIFO.
    pub session_scoped: bool,
    /// Carries a `url` argument and passes the domain gate pre-flight.
    pub url_bearing: bool,
    /// Runs outside the execution semaphore. Only for tools that re-enter the
    /// dispatcher (macro replay), which would otherwise hold a slot while
    /// their steps wait for one.
    pub unscheduled: bool,
    pub handler: HandlerFn,
    /// Alternative execution path for FALLBACK-class recovery.
    pub fallback: Option<HandlerFn>,
}

/// All tools, keyed by exact name.
pub struct ToolRegistry {
    tools: HashMap<&'static str, Tool>,
    order: Vec<&'static str>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn register(&mut self, tool: Tool) {
        self.order.push(tool.name);
        self.tools.insert(tool.name, tool);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    /// `{name, schema}` descriptors in registration order, for the
    /// `tool.registered` notifications.
    #[must_use]
    pub fn descriptors(&self) -> Vec<Value> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| json!({ "name": tool.name, "schema": &tool.schema }))
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

type Job = (JsonRpcRequest, String, oneshot::Sender<JsonRpcResponse>);

/// The dispatcher: one per process, shared by every transport.
pub struct Dispatcher {
    state: Arc<GatewayState>,
    registry: Arc<ToolRegistry>,
    /// Per-session FIFO queues enforcing arrival-order execution.
    session_queues: DashMap<String, mpsc::UnboundedSender<Job>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(state: Arc<GatewayState>, registry: Arc<ToolRegistry>) -> Arc<Self> {
        let dispatcher = Arc::new(Self {
            state,
            registry,
            session_queues: DashMap::new(),
        });
        dispatcher.state.set_dispatcher(&dispatcher);
        dispatcher
    }

    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    #[must_use]
    pub fn state(&self) -> &Arc<GatewayState> {
        &self.state
    }

    /// Submit a request, completing routing synchronously so that per-session
    /// arrival order is fixed at call time. Transports call this from their
    /// read loops; the returned receiver resolves with the response frame.
    pub fn submit(
        self: &Arc<Self>,
        request: JsonRpcRequest,
        client_id: &str,
    ) -> oneshot::Receiver<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();

        if !request.is_supported_version() {
            let _ = tx.send(JsonRpcResponse::err(
                request.id,
                JsonRpcError::new(rpc_codes::INVALID_REQUEST, "jsonrpc must be \"2.0\""),
            ));
            return rx;
        }

        let session_scoped = self
            .registry
            .get(&request.method)
            .is_some_and(|tool| tool.session_scoped);

        if session_scoped {
            let Some(session_id) = request
                .params
                .as_ref()
                .and_then(|p| p["sessionId"].as_str())
                .map(String::from)
            else {
                let _ = tx.send(JsonRpcResponse::err(
                    request.id,
                    JsonRpcError::new(rpc_codes::INVALID_PARAMS, "sessionId is required"),
                ));
                return rx;
            };

            // Enqueue before returning: two submits for one session keep
            // their relative order.
            let sender = self
                .session_queues
                .entry(session_id.clone())
                .or_insert_with(|| self.spawn_session_worker(&session_id))
                .clone();
            if let Err(mpsc::error::SendError((request, client, reply))) =
                sender.send((request, client_id.to_string(), tx))
            {
                self.session_queues.remove(&session_id);
                let fresh = self
                    .session_queues
                    .entry(session_id.clone())
                    .or_insert_with(|| self.spawn_session_worker(&session_id))
                    .clone();
                let _ = fresh.send((request, client, reply));
            }
            return rx;
        }

        let dispatcher = Arc::clone(self);
        let client_id = client_id.to_string();
        tokio::spawn(async move {
            let response = dispatcher.dispatch(request, &client_id).await;
            let _ = tx.send(response);
        });
        rx
    }

    /// Dispatch one decoded request. Always produces a response frame.
    pub async fn dispatch(
        self: &Arc<Self>,
        request: JsonRpcRequest,
        client_id: &str,
    ) -> JsonRpcResponse {
        if !request.is_supported_version() {
            return JsonRpcResponse::err(
                request.id,
                JsonRpcError::new(rpc_codes::INVALID_REQUEST, "jsonrpc must be \"2.0\""),
            );
        }

        // Gateway-level methods outside the tool registry.
        if request.method == "permission.resolve" {
            return self.resolve_permission(request).await;
        }

        let Some(tool) = self.registry.get(&request.method) else {
            return JsonRpcResponse::err(
                request.id,
                JsonRpcError::new(
                    rpc_codes::METHOD_NOT_FOUND,
                    format!("unknown tool: {}", request.method),
                ),
            );
        };

        if tool.session_scoped {
            let Some(session_id) = request
                .params
                .as_ref()
                .and_then(|p| p["sessionId"].as_str())
                .map(String::from)
            else {
                return JsonRpcResponse::err(
                    request.id,
                    JsonRpcError::new(rpc_codes::INVALID_PARAMS, "sessionId is required"),
                );
            };
            return self.enqueue_for_session(&session_id, request, client_id).await;
        }

        self.handle(request, client_id).await
    }

    /// Route a session-scoped request through that session's FIFO worker so
    /// arrival order equals execution order equals completion order.
    async fn enqueue_for_session(
        self: &Arc<Self>,
        session_id: &str,
        request: JsonRpcRequest,
        client_id: &str,
    ) -> JsonRpcResponse {
        let request_id = request.id.clone();
        let (tx, rx) = oneshot::channel();

        let sender = self
            .session_queues
            .entry(session_id.to_string())
            .or_insert_with(|| self.spawn_session_worker(session_id))
            .clone();

        let send_result = sender.send((request, client_id.to_string(), tx));
        if let Err(mpsc::error::SendError(job)) = send_result {
            // Worker exited between lookup and send; retry once on a fresh one.
            self.session_queues.remove(session_id);
            let fresh = self
                .session_queues
                .entry(session_id.to_string())
                .or_insert_with(|| self.spawn_session_worker(session_id))
                .clone();
            if fresh.send(job).is_err() {
                return JsonRpcResponse::err(
                    request_id,
                    JsonRpcError::new(rpc_codes::INTERNAL_ERROR, "session worker unavailable"),
                );
            }
        }

        match rx.await {
            Ok(response) => response,
            Err(_) => JsonRpcResponse::err(
                request_id,
                JsonRpcError::new(rpc_codes::INTERNAL_ERROR, "session worker dropped request"),
            ),
        }
    }

    fn spawn_session_worker(self: &Arc<Self>, session_id: &str) -> mpsc::UnboundedSender<Job> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let weak = Arc::downgrade(self);
        let session_id = session_id.to_string();

        tokio::spawn(async move {
            loop {
                let job = tokio::time::timeout(Duration::from_secs(300), rx.recv()).await;
                let Some(dispatcher) = weak.upgrade() else {
                    break;
                };
                match job {
                    Ok(Some((request, client_id, reply))) => {
                        let response = dispatcher.handle(request, &client_id).await;
                        let _ = reply.send(response);
                    },
                    Ok(None) => break,
                    Err(_) => {
                        // Idle worker: exit once the session itself is gone.
                        if dispatcher.state.sessions.get_session(&session_id).is_none() {
                            dispatcher.session_queues.remove(&session_id);
                            break;
                        }
                    },
                }
            }
            debug!(session_id, "session worker exited");
        });

        tx
    }

    async fn resolve_permission(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let params = request.params.unwrap_or_else(|| json!({}));
        let (Some(id), Some(granted)) = (params["id"].as_str(), params["granted"].as_bool())
        else {
            return JsonRpcResponse::err(
                request.id,
                JsonRpcError::new(
                    rpc_codes::INVALID_PARAMS,
                    "id (string) and granted (bool) are required",
                ),
            );
        };
        let resolved = self.state.gate.resolve(id, granted).await;
        JsonRpcResponse::ok(request.id, json!({ "success": true, "resolved": resolved }))
    }

    /// Validate, pre-flight, schedule, execute, shape.
    async fn handle(self: &Arc<Self>, request: JsonRpcRequest, client_id: &str) -> JsonRpcResponse {
        let Some(tool) = self.registry.get(&request.method) else {
            return JsonRpcResponse::err(
                request.id,
                JsonRpcError::new(rpc_codes::METHOD_NOT_FOUND, "unknown tool"),
            );
        };
        let params = request.params.clone().unwrap_or_else(|| json!({}));
        let class = OperationClass::from_tool(tool.name);

        // ── Pre-flight: rate limit ──────────────────────────────────────────
        if !self.state.limiter.check(client_id, class) {
            let err = GatewayError::new(
                ErrorCode::RateLimitExceeded,
                format!("rate limit exceeded for {class} operations"),
            )
            .with_context("operationClass", class.as_str());
            return tool_error_response(request.id, err, None);
        }

        // ── Pre-flight: session lookup ──────────────────────────────────────
        let session: Option<Arc<Session>> = if tool.session_scoped {
            let Some(sid) = params["sessionId"].as_str() else {
                return JsonRpcResponse::err(
                    request.id,
                    JsonRpcError::new(rpc_codes::INVALID_PARAMS, "sessionId is required"),
                );
            };
            match self.state.sessions.get_session(sid) {
                Some(session) => {
                    session.touch();
                    Some(session)
                },
                None => {
                    let err = GatewayError::new(
                        ErrorCode::ContextCrashed,
                        format!("session {sid} not found or destroyed"),
                    )
                    .with_context("sessionId", sid);
                    return tool_error_response(request.id, err, None);
                },
            }
        } else {
            None
        };

        // ── Pre-flight: domain gate ─────────────────────────────────────────
        if tool.url_bearing
            && let Some(url) = params["url"].as_str()
            && let Some(domain) = domain_of(url)
        {
            let session_id = session.as_ref().map(|s| s.id.as_str()).unwrap_or_default();
            let approved = session
                .as_ref()
                .map(|s| {
                    s.approved_domains
                        .read()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .clone()
                })
                .unwrap_or_default();

            match self
                .state
                .gate
                .check_domain_access(&domain, session_id, &approved)
                .await
            {
                DomainDecision::Granted => {
                    if let Some(ref session) = session {
                        session
                            .approved_domains
                            .write()
                            .unwrap_or_else(std::sync::PoisonError::into_inner)
                            .insert(domain);
                    }
                },
                DomainDecision::Denied => {
                    let err = GatewayError::new(
                        ErrorCode::DomainDenied,
                        format!("access to {domain} was denied"),
                    )
                    .with_context("domain", domain);
                    return tool_error_response(request.id, err, None);
                },
                DomainDecision::TimedOut => {
                    let err = GatewayError::new(
                        ErrorCode::PermissionTimeout,
                        format!("permission request for {domain} timed out"),
                    )
                    .with_context("domain", domain);
                    return tool_error_response(request.id, err, None);
                },
            }
        }

        // ── Circuit breaker ─────────────────────────────────────────────────
        let breaker = self.state.breakers.get(class);
        if !breaker.allow() {
            let err = GatewayError::new(
                ErrorCode::CircuitOpen,
                format!("{class} operations are circuit-broken, retry later"),
            )
            .with_context("operationClass", class.as_str());
            return tool_error_response(request.id, err, None);
        }

        // ── Schedule + recover + execute ────────────────────────────────────
        let timeout = params["timeout"]
            .as_u64()
            .or_else(|| session.as_ref().and_then(|s| s.options.timeout_ms))
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.state.scheduler.default_timeout());

        if tool.unscheduled {
            let call = ToolCall {
                params: params.clone(),
                client_id: client_id.to_string(),
            };
            let result = tokio::time::timeout(timeout, (tool.handler)(self.state.clone(), call))
                .await
                .unwrap_or_else(|_| {
                    Err(GatewayError::new(
                        ErrorCode::Timeout,
                        format!("operation timed out after {}ms", timeout.as_millis()),
                    ))
                });
            return match result {
                Ok(value) => {
                    breaker.record_success();
                    let mut body = json!({ "success": true });
                    merge(&mut body, value);
                    JsonRpcResponse::ok(request.id, body)
                },
                Err(err)
                    if matches!(
                        err.code,
                        ErrorCode::InvalidParams | ErrorCode::InvalidRequest
                    ) =>
                {
                    JsonRpcResponse::err(
                        request.id,
                        JsonRpcError::from_gateway_error(rpc_codes::INVALID_PARAMS, &err),
                    )
                },
                Err(err) => {
                    breaker.record_failure();
                    tool_error_response(request.id, err, None)
                },
            };
        }

        let session_id = session.as_ref().map(|s| s.id.clone());
        let tag = OpTag {
            client_id: client_id.to_string(),
            session_id: session_id.clone(),
            class,
            priority: default_priority(class),
            timeout,
        };

        let state = self.state.clone();
        let call = ToolCall {
            params: params.clone(),
            client_id: client_id.to_string(),
        };
        let op = {
            let state = state.clone();
            let call = call.clone();
            let handler = &tool.handler;
            move || handler(state.clone(), call.clone())
        };

        let recovery = self.state.recovery.clone();
        let sid_for_recovery = session_id.clone();
        let outcome_future = async {
            let outcome = match &tool.fallback {
                Some(fallback) => {
                    let state = state.clone();
                    let call = call.clone();
                    recovery
                        .run(
                            class,
                            sid_for_recovery.as_deref(),
                            op,
                            Some(move || fallback(state.clone(), call.clone())),
                        )
                        .await
                },
                None => {
                    recovery
                        .run(
                            class,
                            sid_for_recovery.as_deref(),
                            op,
                            None::<fn() -> BoxedToolFuture>,
                        )
                        .await
                },
            };
            Ok(outcome)
        };

        let (scheduled, timings) = self.state.scheduler.run(tag, outcome_future).await;

        let response = match scheduled {
            Err(err) => {
                // Deadline expiry or disconnect cancellation.
                breaker.record_failure();
                tool_error_response(request.id, err, Some(timings))
            },
            Ok(outcome) => match outcome.result {
                Ok(value) => {
                    breaker.record_success();
                    self.record_macro_step(tool, &session_id, &params);
                    let mut body = json!({ "success": true });
                    merge(&mut body, value);
                    if outcome.recovered {
                        body["recovered"] = json!(true);
                        if let Some(strategy) = outcome.strategy {
                            body["strategy"] = json!(strategy.as_str());
                        }
                    }
                    if outcome.attempts > 1 {
                        body["attempts"] = json!(outcome.attempts);
                    }
                    body["timing"] = json!(timings);
                    JsonRpcResponse::ok(request.id, body)
                },
                Err(err) => {
                    breaker.record_failure();
                    if matches!(
                        err.code,
                        ErrorCode::InvalidParams | ErrorCode::InvalidRequest
                    ) {
                        JsonRpcResponse::err(
                            request.id,
                            JsonRpcError::from_gateway_error(rpc_codes::INVALID_PARAMS, &err),
                        )
                    } else {
                        let mut response = tool_error_response(request.id, err, Some(timings));
                        if let Some(result) = response.result.as_mut() {
                            if let Some(strategy) = outcome.strategy {
                                result["strategy"] = json!(strategy.as_str());
                            }
                            result["attempts"] = json!(outcome.attempts);
                        }
                        response
                    }
                },
            },
        };

        response
    }

    /// Record action tools into an active macro recording.
    fn record_macro_step(&self, tool: &Tool, session_id: &Option<String>, params: &Value) {
        const RECORDABLE: &[&str] = &[
            "browser.goto",
            "browser.click",
            "browser.type",
            "browser.select",
            "browser.eval",
            "browser.screenshot",
        ];
        if !RECORDABLE.contains(&tool.name) {
            return;
        }
        if let Some(sid) = session_id
            && self.state.macros.is_recording(sid)
        {
            self.state.macros.record(sid, tool.name, params.clone());
        }
    }

    /// Forget a session's FIFO queue (after explicit destruction).
    pub fn forget_session(&self, session_id: &str) {
        self.session_queues.remove(session_id);
    }
}

fn default_priority(class: OperationClass) -> u8 {
    match class {
        OperationClass::Session => 7,
        OperationClass::Interaction => 6,
        OperationClass::Navigation | OperationClass::Evaluation => 5,
        OperationClass::Capture => 4,
        OperationClass::Inspection => 3,
    }
}

/// Shape a failed tool call: `{success:false, error:{...}}` in the result,
/// per the tool-layer contract. Low-level protocol errors use the JSON-RPC
/// error envelope instead (handled at the call sites).
fn tool_error_response(
    id: RequestId,
    err: GatewayError,
    timings: Option<SchedTimings>,
) -> JsonRpcResponse {
    warn!(code = %err.code, message = %err.message, "tool call failed");
    let mut body = json!({
        "success": false,
        "error": err.to_wire(),
    });
    if let Some(timings) = timings {
        body["timing"] = json!(timings);
    }
    JsonRpcResponse::ok(id, body)
}

/// Merge an object payload into the response body.
fn merge(body: &mut Value, payload: Value) {
    if let (Some(body_map), Value::Object(payload_map)) = (body.as_object_mut(), payload) {
        for (key, value) in payload_map {
            body_map.insert(key, value);
        }
    }
}
