//! `browser.harExport` and `browser.report.*`: shaping captured traffic into
//! HAR documents and session reports. Nothing is written to disk.

use std::sync::Arc;

use {
    chrono::Utc,
    dashmap::DashMap,
    serde::Deserialize,
    serde_json::{Value, json},
};

use webgate_protocol::{ErrorCode, GatewayError, ops::tools};

use crate::{
    dispatcher::{Tool, ToolCall, ToolRegistry},
    har,
    state::GatewayState,
    tools::{handler, parse_args, require_session},
};

/// The built-in report templates.
const TEMPLATES: &[&str] = &["summary", "network", "console"];

/// Generated reports, kept per session until cleaned up.
pub struct ReportStore {
    generated: DashMap<String, Vec<Value>>,
}

impl ReportStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            generated: DashMap::new(),
        }
    }

    pub fn push(&self, session_id: &str, report: Value) {
        self.generated
            .entry(session_id.to_string())
            .or_default()
            .push(report);
    }

    /// Drop a session's accumulated reports; returns how many were removed.
    pub fn cleanup(&self, session_id: &str) -> usize {
        self.generated
            .remove(session_id)
            .map_or(0, |(_, reports)| reports.len())
    }
}

impl Default for ReportStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct SessionArgs {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct GenerateArgs {
    #[serde(rename = "sessionId")]
    session_id: String,
    template: Option<String>,
}

pub fn register(registry: &mut ToolRegistry) {
    registry.register(Tool {
        name: tools::HAR_EXPORT,
        schema: json!({
            "type": "object",
            "properties": { "sessionId": { "type": "string" } },
            "required": ["sessionId"]
        }),
        session_scoped: true,
        url_bearing: false,
        unscheduled: false,
        handler: handler(har_export),
        fallback: None,
    });

    registry.register(Tool {
        name: tools::REPORT_GENERATE,
        schema: json!({
            "type": "object",
            "properties": {
                "sessionId": { "type": "string" },
                "template": { "enum": TEMPLATES }
            },
            "required": ["sessionId"]
        }),
        session_scoped: true,
        url_bearing: false,
        unscheduled: false,
        handler: handler(report_generate),
        fallback: None,
    });

    registry.register(Tool {
        name: tools::REPORT_TEMPLATES,
        schema: json!({ "type": "object", "properties": {} }),
        session_scoped: false,
        url_bearing: false,
        unscheduled: false,
        handler: handler(report_templates),
        fallback: None,
    });

    registry.register(Tool {
        name: tools::REPORT_CLEANUP,
        schema: json!({
            "type": "object",
            "properties": { "sessionId": { "type": "string" } },
            "required": ["sessionId"]
        }),
        session_scoped: false,
        url_bearing: false,
        unscheduled: false,
        handler: handler(report_cleanup),
        fallback: None,
    });
}

async fn har_export(state: Arc<GatewayState>, call: ToolCall) -> Result<Value, GatewayError> {
    let args: SessionArgs = parse_args(&call.params)?;
    let session = require_session(&state, &args.session_id)?;
    session.touch();

    let entries = session.all_network();
    Ok(json!({ "har": har::to_har(&args.session_id, &entries) }))
}

async fn report_generate(state: Arc<GatewayState>, call: ToolCall) -> Result<Value, GatewayError> {
    let args: GenerateArgs = parse_args(&call.params)?;
    let template = args.template.as_deref().unwrap_or("summary");
    if !TEMPLATES.contains(&template) {
        return Err(GatewayError::new(
            ErrorCode::InvalidParams,
            format!("unknown template \"{template}\", expected one of: {}", TEMPLATES.join(", ")),
        ));
    }
    let session = require_session(&state, &args.session_id)?;
    session.touch();

    let report = match template {
        "network" => {
            let entries = session.recent_network(usize::MAX, false);
            json!({
                "template": "network",
                "sessionId": &args.session_id,
                "generatedAt": Utc::now().to_rfc3339(),
                "entries": entries,
            })
        },
        "console" => {
            let entries = session.recent_console(usize::MAX, None);
            json!({
                "template": "console",
                "sessionId": &args.session_id,
                "generatedAt": Utc::now().to_rfc3339(),
                "entries": entries,
            })
        },
        _ => {
            let (console_errors, console_total) = session.console_stats();
            let network = session.all_network();
            let failures = network.iter().filter(|e| e.status >= 400).count();
            let total_ms: u64 = network.iter().map(|e| e.duration_ms).sum();
            let avg_ms = if network.is_empty() {
                0
            } else {
                total_ms / network.len() as u64
            };
            json!({
                "template": "summary",
                "sessionId": &args.session_id,
                "generatedAt": Utc::now().to_rfc3339(),
                "console": { "errors": console_errors, "total": console_total },
                "network": {
                    "requests": network.len(),
                    "failures": failures,
                    "avgDurationMs": avg_ms,
                },
            })
        },
    };

    state.reports.push(&args.session_id, report.clone());
    Ok(json!({ "report": report }))
}

async fn report_templates(_state: Arc<GatewayState>, _call: ToolCall) -> Result<Value, GatewayError> {
    Ok(json!({ "templates": TEMPLATES }))
}

async fn report_cleanup(state: Arc<GatewayState>, call: ToolCall) -> Result<Value, GatewayError> {
    let args: SessionArgs = parse_args(&call.params)?;
    let removed = state.reports.cleanup(&args.session_id);
    Ok(json!({ "removed": removed }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_store_cleanup_counts() {
        let store = ReportStore::new();
        store.push("s1", json!({"a": 1}));
        store.push("s1", json!({"a": 2}));
        store.push("s2", json!({"b": 1}));
        assert_eq!(store.cleanup("s1"), 2);
        assert_eq!(store.cleanup("s1"), 0);
        assert_eq!(store.cleanup("s2"), 1);
    }
}
