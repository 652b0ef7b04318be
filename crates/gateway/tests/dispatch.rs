//! Dispatch pipeline tests against a stub context factory: routing, the
//! pre-flight chain, and response shaping, without a live browser.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    serde_json::{Value, json},
};

use {
    webgate_browser::{
        BrowserError, ContextFingerprint,
        factory::{ContextFactory, ContextHandle},
    },
    webgate_config::WebgateConfig,
    webgate_gateway::{Dispatcher, GatewayState, build_state, tools::build_registry},
    webgate_protocol::{JsonRpcRequest, RequestId},
};

struct StubFactory;

#[async_trait]
impl ContextFactory for StubFactory {
    async fn create(&self, _fingerprint: &ContextFingerprint) -> Result<ContextHandle, BrowserError> {
        Ok(ContextHandle::detached())
    }

    async fn reset(&self, _handle: &ContextHandle) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn destroy(&self, _handle: ContextHandle) {}
}

async fn runtime(mutate: impl FnOnce(&mut WebgateConfig)) -> (Arc<GatewayState>, Arc<Dispatcher>) {
    let mut config = WebgateConfig::default();
    config.performance.context_pool.min = 0;
    config.performance.context_pool.warmup_on_start = false;
    mutate(&mut config);
    let state = build_state(config, Arc::new(StubFactory)).await;
    let registry = Arc::new(build_registry());
    let dispatcher = Dispatcher::new(state.clone(), registry);
    (state, dispatcher)
}

fn request(id: i64, method: &str, params: Value) -> JsonRpcRequest {
    JsonRpcRequest {
        jsonrpc: "2.0".into(),
        id: RequestId::Number(id),
        method: method.into(),
        params: Some(params),
    }
}

async fn call(dispatcher: &Arc<Dispatcher>, method: &str, params: Value) -> Value {
    let response = dispatcher
        .dispatch(request(1, method, params), "test-client")
        .await;
    if let Some(error) = response.error {
        json!({ "rpcError": { "code": error.code, "message": error.message } })
    } else {
        response.result.unwrap_or(Value::Null)
    }
}

fn error_code(result: &Value) -> &str {
    result["error"]["code"].as_str().unwrap_or_default()
}

#[tokio::test]
async fn new_context_close_lifecycle() {
    let (state, dispatcher) = runtime(|_| {}).await;

    let created = call(
        &dispatcher,
        "browser.newContext",
        json!({ "viewport": { "width": 1280, "height": 720 } }),
    )
    .await;
    assert_eq!(created["success"], true, "{created}");
    let session_id = created["sessionId"].as_str().unwrap().to_string();
    assert_eq!(state.sessions.stats().active, 1);

    let closed = call(&dispatcher, "browser.close", json!({ "sessionId": session_id })).await;
    assert_eq!(closed["closed"], true);
    assert_eq!(state.sessions.stats().active, 0);

    // Second destroy returns false, not an error.
    let again = call(&dispatcher, "browser.close", json!({ "sessionId": session_id })).await;
    assert_eq!(again["success"], true);
    assert_eq!(again["closed"], false);
}

#[tokio::test]
async fn viewport_bounds_rejected_at_create() {
    let (_state, dispatcher) = runtime(|_| {}).await;
    let response = dispatcher
        .dispatch(
            request(
                1,
                "browser.newContext",
                json!({ "viewport": { "width": 99, "height": 100 } }),
            ),
            "c",
        )
        .await;
    let error = response.error.expect("invalid viewport is a params error");
    assert_eq!(error.code, -32602);
}

#[tokio::test]
async fn unknown_tool_is_method_not_found() {
    let (_state, dispatcher) = runtime(|_| {}).await;
    let response = dispatcher
        .dispatch(request(1, "browser.teleport", json!({})), "c")
        .await;
    let error = response.error.expect("unknown tool is an rpc error");
    assert_eq!(error.code, -32601);
}

#[tokio::test]
async fn missing_session_id_is_invalid_params() {
    let (_state, dispatcher) = runtime(|_| {}).await;
    let response = dispatcher
        .dispatch(request(1, "browser.goto", json!({ "url": "https://example.com" })), "c")
        .await;
    let error = response.error.expect("missing sessionId is a params error");
    assert_eq!(error.code, -32602);
}

#[tokio::test]
async fn operations_on_unknown_session_fail_with_crash_code() {
    let (_state, dispatcher) = runtime(|c| {
        c.security.allowed_domains = vec!["example.com".into()];
    })
    .await;
    let result = call(
        &dispatcher,
        "browser.goto",
        json!({ "sessionId": "ghost", "url": "https://example.com" }),
    )
    .await;
    assert_eq!(result["success"], false);
    assert_eq!(error_code(&result), "CONTEXT_CRASHED");
}

#[tokio::test]
async fn wrong_jsonrpc_version_rejected() {
    let (_state, dispatcher) = runtime(|_| {}).await;
    let mut req = request(1, "gateway.status", json!({}));
    req.jsonrpc = "1.0".into();
    let response = dispatcher.dispatch(req, "c").await;
    assert_eq!(response.error.unwrap().code, -32600);
}

#[tokio::test]
async fn rate_limit_binds_per_class_not_per_tool() {
    let (state, dispatcher) = runtime(|c| {
        c.security.rate_limit.requests = 5;
        c.security.allowed_domains = vec!["example.com".into()];
    })
    .await;

    let created = call(&dispatcher, "browser.newContext", json!({})).await;
    let sid = created["sessionId"].as_str().unwrap().to_string();

    // Five navigations consume the navigation window (they fail on the stub
    // page, but allowed requests count).
    for _ in 0..5 {
        let result = call(
            &dispatcher,
            "browser.goto",
            json!({ "sessionId": sid, "url": "https://example.com" }),
        )
        .await;
        assert_ne!(error_code(&result), "RATE_LIMIT_EXCEEDED");
    }

    let sixth = call(
        &dispatcher,
        "browser.goto",
        json!({ "sessionId": sid, "url": "https://example.com" }),
    )
    .await;
    assert_eq!(sixth["success"], false);
    assert_eq!(error_code(&sixth), "RATE_LIMIT_EXCEEDED");

    // A click on the same session in the same window is a different
    // operation class and passes the limiter.
    let click = call(
        &dispatcher,
        "browser.click",
        json!({ "sessionId": sid, "selector": "#go" }),
    )
    .await;
    assert_ne!(error_code(&click), "RATE_LIMIT_EXCEEDED");

    let _ = state;
}

#[tokio::test]
async fn unlisted_domain_times_out_then_grant_allows() {
    let (state, dispatcher) = runtime(|c| {
        c.security.allowed_domains.clear();
        c.security.auto_approve_localhost = false;
        c.security.permission_timeout_secs = 1;
    })
    .await;

    let created = call(&dispatcher, "browser.newContext", json!({})).await;
    let sid = created["sessionId"].as_str().unwrap().to_string();

    // No resolver: the permission request auto-denies at the deadline.
    let denied = call(
        &dispatcher,
        "browser.goto",
        json!({ "sessionId": sid, "url": "https://blocked.test/" }),
    )
    .await;
    assert_eq!(denied["success"], false);
    assert_eq!(error_code(&denied), "PERMISSION_TIMEOUT");

    // With an operator denying explicitly, the code is DOMAIN_DENIED.
    let gate = state.gate.clone();
    let denier = tokio::spawn(async move {
        loop {
            let pending = gate.pending_requests().await;
            if let Some(req) = pending.first() {
                gate.resolve(&req.id, false).await;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });
    let denied = call(
        &dispatcher,
        "browser.goto",
        json!({ "sessionId": sid, "url": "https://blocked.test/" }),
    )
    .await;
    denier.await.unwrap();
    assert_eq!(error_code(&denied), "DOMAIN_DENIED");

    // With a grant, the gate passes; the stub page then fails the drive, but
    // the domain is cached on the session.
    let gate = state.gate.clone();
    let granter = tokio::spawn(async move {
        loop {
            let pending = gate.pending_requests().await;
            if let Some(req) = pending.first() {
                gate.resolve(&req.id, true).await;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });
    let granted = call(
        &dispatcher,
        "browser.goto",
        json!({ "sessionId": sid, "url": "https://blocked.test/" }),
    )
    .await;
    granter.await.unwrap();
    assert_ne!(error_code(&granted), "DOMAIN_DENIED");
    assert_ne!(error_code(&granted), "PERMISSION_TIMEOUT");

    let session = state.sessions.get_session(&sid).unwrap();
    assert!(
        session
            .approved_domains
            .read()
            .unwrap()
            .contains("blocked.test")
    );

    // The cached grant short-circuits the prompt entirely now.
    let after = call(
        &dispatcher,
        "browser.goto",
        json!({ "sessionId": sid, "url": "https://blocked.test/again" }),
    )
    .await;
    assert_ne!(error_code(&after), "PERMISSION_TIMEOUT");
}

#[tokio::test]
async fn session_cap_rejects_with_resource_exhausted() {
    let (_state, dispatcher) = runtime(|c| {
        c.browser.max_sessions = 1;
    })
    .await;

    let first = call(&dispatcher, "browser.newContext", json!({})).await;
    assert_eq!(first["success"], true);

    let second = call(&dispatcher, "browser.newContext", json!({})).await;
    assert_eq!(second["success"], false);
    assert_eq!(error_code(&second), "RESOURCE_EXHAUSTED");
}

#[tokio::test]
async fn status_reports_runtime_shape() {
    let (_state, dispatcher) = runtime(|_| {}).await;
    let created = call(&dispatcher, "browser.newContext", json!({})).await;
    assert_eq!(created["success"], true);

    let status = call(&dispatcher, "gateway.status", json!({})).await;
    assert_eq!(status["success"], true);
    assert_eq!(status["sessions"]["active"], 1);
    assert!(status["pool"]["created_total"].as_u64().unwrap() >= 1);
    assert!(status.get("resources").is_some());
}

#[tokio::test]
async fn buffer_reads_work_without_a_live_page() {
    let (state, dispatcher) = runtime(|_| {}).await;
    let created = call(&dispatcher, "browser.newContext", json!({})).await;
    let sid = created["sessionId"].as_str().unwrap().to_string();

    // Seed an entry directly; listener wiring needs a live page.
    let session = state.sessions.get_session(&sid).unwrap();
    session.push_console(webgate_sessions::ConsoleEntry {
        timestamp: chrono::Utc::now(),
        level: webgate_sessions::ConsoleLevel::Error,
        message: "boom".into(),
        location: None,
    });

    let console = call(
        &dispatcher,
        "browser.console.getRecent",
        json!({ "sessionId": sid, "level": "error" }),
    )
    .await;
    assert_eq!(console["success"], true);
    assert_eq!(console["count"], 1);
    assert_eq!(console["entries"][0]["message"], "boom");

    let network = call(
        &dispatcher,
        "browser.network.getRecent",
        json!({ "sessionId": sid }),
    )
    .await;
    assert_eq!(network["success"], true);
    assert_eq!(network["count"], 0);
}

#[tokio::test]
async fn har_export_and_reports() {
    let (state, dispatcher) = runtime(|_| {}).await;
    let created = call(&dispatcher, "browser.newContext", json!({})).await;
    let sid = created["sessionId"].as_str().unwrap().to_string();

    let session = state.sessions.get_session(&sid).unwrap();
    session.push_network(webgate_sessions::NetworkEntry::redacted(
        chrono::Utc::now(),
        "GET".into(),
        "https://example.com/".into(),
        503,
        Default::default(),
        Default::default(),
        None,
        None,
        10,
    ));

    let har = call(&dispatcher, "browser.harExport", json!({ "sessionId": sid })).await;
    assert_eq!(har["success"], true);
    assert_eq!(har["har"]["log"]["version"], "1.2");
    assert_eq!(har["har"]["log"]["entries"][0]["response"]["status"], 503);

    let templates = call(&dispatcher, "browser.report.templates", json!({})).await;
    assert!(templates["templates"].as_array().unwrap().len() >= 3);

    let report = call(
        &dispatcher,
        "browser.report.generate",
        json!({ "sessionId": sid }),
    )
    .await;
    assert_eq!(report["success"], true);
    assert_eq!(report["report"]["network"]["requests"], 1);
    assert_eq!(report["report"]["network"]["failures"], 1);

    let cleanup = call(
        &dispatcher,
        "browser.report.cleanup",
        json!({ "sessionId": sid }),
    )
    .await;
    assert_eq!(cleanup["removed"], 1);
}

#[tokio::test]
async fn macro_recording_lifecycle() {
    let (_state, dispatcher) = runtime(|c| {
        c.security.allowed_domains = vec!["example.com".into()];
    })
    .await;
    let created = call(&dispatcher, "browser.newContext", json!({})).await;
    let sid = created["sessionId"].as_str().unwrap().to_string();

    let started = call(
        &dispatcher,
        "browser.macro.startRecording",
        json!({ "sessionId": sid }),
    )
    .await;
    assert_eq!(started["success"], true);

    // The goto fails on the stub page, so it is not recorded; only
    // successful actions become steps.
    let _ = call(
        &dispatcher,
        "browser.goto",
        json!({ "sessionId": sid, "url": "https://example.com" }),
    )
    .await;

    let stopped = call(
        &dispatcher,
        "browser.macro.stopRecording",
        json!({ "sessionId": sid, "name": "demo" }),
    )
    .await;
    assert_eq!(stopped["success"], true);
    assert_eq!(stopped["steps"], 0);
    let macro_id = stopped["macroId"].as_str().unwrap().to_string();

    let listed = call(&dispatcher, "browser.macro.list", json!({})).await;
    assert_eq!(listed["count"], 1);

    let deleted = call(
        &dispatcher,
        "browser.macro.delete",
        json!({ "macroId": macro_id }),
    )
    .await;
    assert_eq!(deleted["deleted"], true);
}

#[tokio::test]
async fn permission_resolve_unknown_id_reports_false() {
    let (_state, dispatcher) = runtime(|_| {}).await;
    let result = call(
        &dispatcher,
        "permission.resolve",
        json!({ "id": "nope", "granted": true }),
    )
    .await;
    assert_eq!(result["success"], true);
    assert_eq!(result["resolved"], false);
}

#[tokio::test]
async fn failed_tool_calls_carry_the_structured_error() {
    let (_state, dispatcher) = runtime(|_| {}).await;
    let result = call(
        &dispatcher,
        "browser.click",
        json!({ "sessionId": "ghost", "selector": "#x" }),
    )
    .await;
    assert_eq!(result["success"], false);
    let error = &result["error"];
    assert_eq!(error["category"], "browser");
    assert_eq!(error["code"], "CONTEXT_CRASHED");
    assert!(error["timestamp"].as_str().is_some());
    assert!(error["recoverable"].is_boolean());
    assert!(error["retryable"].is_boolean());
}
