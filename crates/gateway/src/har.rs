//! Shape a session's network ring buffer into HAR 1.2 JSON. The caller
//! persists or presents the result; nothing is written here.

use serde_json::{Value, json};

use webgate_sessions::NetworkEntry;

const HAR_VERSION: &str = "1.2";
const CREATOR: &str = "webgate";

/// Build a HAR document from captured entries.
#[must_use]
pub fn to_har(session_id: &str, entries: &[NetworkEntry]) -> Value {
    let har_entries: Vec<Value> = entries.iter().map(entry_to_har).collect();
    json!({
        "log": {
            "version": HAR_VERSION,
            "creator": {
                "name": CREATOR,
                "version": env!("CARGO_PKG_VERSION"),
            },
            "comment": format!("session {session_id}"),
            "entries": har_entries,
        }
    })
}

fn entry_to_har(entry: &NetworkEntry) -> Value {
    let request_headers: Vec<Value> = entry
        .request_headers
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();
    let response_headers: Vec<Value> = entry
        .response_headers
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();

    json!({
        "startedDateTime": entry.timestamp.to_rfc3339(),
        "time": entry.duration_ms,
        "request": {
            "method": &entry.method,
            "url": &entry.url,
            "httpVersion": "HTTP/1.1",
            "headers": request_headers,
            "queryString": [],
            "postData": entry.request_body.as_ref().map(|body| json!({
                "mimeType": "application/octet-stream",
                "text": body,
            })),
            "headersSize": -1,
            "bodySize": entry.request_body.as_ref().map_or(0, |b| b.len()),
        },
        "response": {
            "status": entry.status,
            "statusText": "",
            "httpVersion": "HTTP/1.1",
            "headers": response_headers,
            "content": {
                "size": entry.response_body.as_ref().map_or(0, |b| b.len()),
                "mimeType": "application/octet-stream",
                "text": &entry.response_body,
            },
            "redirectURL": "",
            "headersSize": -1,
            "bodySize": -1,
        },
        "cache": {},
        "timings": {
            "send": 0,
            "wait": entry.duration_ms,
            "receive": 0,
        },
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;

    use super::*;

    #[test]
    fn har_document_shape() {
        let entries = vec![NetworkEntry::redacted(
            Utc::now(),
            "GET".into(),
            "https://example.com/a".into(),
            200,
            HashMap::from([("accept".to_string(), "text/html".to_string())]),
            HashMap::new(),
            None,
            None,
            12,
        )];
        let har = to_har("sess-1", &entries);
        assert_eq!(har["log"]["version"], "1.2");
        let first = &har["log"]["entries"][0];
        assert_eq!(first["request"]["method"], "GET");
        assert_eq!(first["response"]["status"], 200);
        assert_eq!(first["time"], 12);
        assert_eq!(first["request"]["headers"][0]["name"], "accept");
    }

    #[test]
    fn empty_sessions_export_empty_logs() {
        let har = to_har("sess-1", &[]);
        assert_eq!(har["log"]["entries"].as_array().unwrap().len(), 0);
    }
}
