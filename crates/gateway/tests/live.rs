//! End-to-end scenarios against a real Chromium. Ignored by default; run
//! with `cargo test -- --ignored` on a machine with a local browser.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{sync::Arc, time::Duration};

use serde_json::{Value, json};

use {
    webgate_browser::{BrowserHandle, ChromiumFactory, LaunchSettings},
    webgate_config::WebgateConfig,
    webgate_gateway::{Dispatcher, build_state, tools::build_registry},
    webgate_protocol::{JsonRpcRequest, RequestId},
};

async fn live_runtime() -> (Arc<BrowserHandle>, Arc<Dispatcher>) {
    let browser = Arc::new(
        BrowserHandle::launch(&LaunchSettings::default())
            .await
            .expect("local Chromium required"),
    );
    let mut config = WebgateConfig::default();
    config.performance.context_pool.min = 0;
    let state = build_state(config, Arc::new(ChromiumFactory::new(browser.clone()))).await;
    let dispatcher = Dispatcher::new(state, Arc::new(build_registry()));
    (browser, dispatcher)
}

async fn call(dispatcher: &Arc<Dispatcher>, method: &str, params: Value) -> Value {
    dispatcher
        .dispatch(
            JsonRpcRequest {
                jsonrpc: "2.0".into(),
                id: RequestId::Number(1),
                method: method.into(),
                params: Some(params),
            },
            "live-test",
        )
        .await
        .result
        .expect("tool calls return a result object")
}

#[tokio::test]
#[ignore = "requires a local Chromium"]
async fn happy_path_navigate_screenshot_destroy() {
    let (browser, dispatcher) = live_runtime().await;

    let created = call(
        &dispatcher,
        "browser.newContext",
        json!({ "viewport": { "width": 1280, "height": 720 } }),
    )
    .await;
    assert_eq!(created["success"], true, "{created}");
    let sid = created["sessionId"].as_str().unwrap().to_string();

    let nav = call(
        &dispatcher,
        "browser.goto",
        json!({ "sessionId": sid, "url": "data:text/html,<h1>x</h1>" }),
    )
    .await;
    assert_eq!(nav["success"], true, "{nav}");
    assert_eq!(nav["status"], 200);

    let shot = call(&dispatcher, "browser.screenshot", json!({ "sessionId": sid })).await;
    assert_eq!(shot["success"], true, "{shot}");
    let bytes = {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(shot["data"].as_str().unwrap())
            .unwrap()
    };
    assert_eq!(&bytes[..4], &[0x89, 0x50, 0x4E, 0x47], "PNG magic header");

    let closed = call(&dispatcher, "browser.close", json!({ "sessionId": sid })).await;
    assert_eq!(closed["closed"], true);
    let again = call(&dispatcher, "browser.close", json!({ "sessionId": sid })).await;
    assert_eq!(again["closed"], false);

    let status = call(&dispatcher, "gateway.status", json!({})).await;
    assert_eq!(status["sessions"]["active"], 0);

    browser.close().await;
}

#[tokio::test]
#[ignore = "requires a local Chromium"]
async fn console_isolation_between_sessions() {
    let (browser, dispatcher) = live_runtime().await;

    let a = call(&dispatcher, "browser.newContext", json!({})).await["sessionId"]
        .as_str()
        .unwrap()
        .to_string();
    let b = call(&dispatcher, "browser.newContext", json!({})).await["sessionId"]
        .as_str()
        .unwrap()
        .to_string();

    call(
        &dispatcher,
        "browser.goto",
        json!({ "sessionId": a, "url": "data:text/html,<script>console.log('A-msg')</script>" }),
    )
    .await;
    call(
        &dispatcher,
        "browser.goto",
        json!({ "sessionId": b, "url": "data:text/html,<script>console.log('B-msg')</script>" }),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let a_console = call(
        &dispatcher,
        "browser.console.getRecent",
        json!({ "sessionId": a }),
    )
    .await;
    let b_console = call(
        &dispatcher,
        "browser.console.getRecent",
        json!({ "sessionId": b }),
    )
    .await;

    let messages = |v: &Value| -> Vec<String> {
        v["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["message"].as_str().unwrap_or_default().to_string())
            .collect()
    };
    let a_msgs = messages(&a_console);
    let b_msgs = messages(&b_console);
    assert!(a_msgs.iter().any(|m| m.contains("A-msg")), "{a_msgs:?}");
    assert!(!a_msgs.iter().any(|m| m.contains("B-msg")), "{a_msgs:?}");
    assert!(b_msgs.iter().any(|m| m.contains("B-msg")), "{b_msgs:?}");
    assert!(!b_msgs.iter().any(|m| m.contains("A-msg")), "{b_msgs:?}");

    browser.close().await;
}

#[tokio::test]
#[ignore = "requires a local Chromium"]
async fn pool_reuses_contexts_across_sessions() {
    let (browser, dispatcher) = live_runtime().await;
    let state = dispatcher.state().clone();

    let first = call(
        &dispatcher,
        "browser.newContext",
        json!({ "viewport": { "width": 1920, "height": 1080 } }),
    )
    .await;
    let sid = first["sessionId"].as_str().unwrap().to_string();
    call(&dispatcher, "browser.close", json!({ "sessionId": sid })).await;

    let cold_created = state.pool.stats().await.created_total;

    let second = call(
        &dispatcher,
        "browser.newContext",
        json!({ "viewport": { "width": 1920, "height": 1080 } }),
    )
    .await;
    assert_eq!(second["success"], true);

    let stats = state.pool.stats().await;
    assert_eq!(
        stats.created_total, cold_created,
        "identical fingerprint must reuse the pooled context"
    );
    assert!(stats.reused_total >= 1);

    browser.close().await;
}
