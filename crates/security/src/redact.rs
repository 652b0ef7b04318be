//! Sensitive-data redaction for captured network traffic.
//!
//! Redaction replaces values only; keys and structure are preserved, so
//! `redact(redact(x)) == redact(x)` holds for every input.

use std::{collections::HashMap, sync::LazyLock};

use {regex::RegexSet, serde_json::Value};

/// Fixed string substituted for any value classified as sensitive.
pub const REDACTION_SENTINEL: &str = "[REDACTED]";

/// Header names whose values are always redacted (compared case-insensitively).
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-auth-token",
    "x-csrf-token",
];

/// Body keys whose values are redacted wherever they appear in a structured
/// payload.
static SENSITIVE_KEYS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)^password$",
        r"(?i)^passwd$",
        r"(?i)^pass$",
        r"(?i)^token$",
        r"(?i)^access_token$",
        r"(?i)^refresh_token$",
        r"(?i)^id_token$",
        r"(?i)^api_key$",
        r"(?i)^apikey$",
        r"(?i)^secret",
        r"(?i)^session_id$",
        r"(?i)^sessionid$",
        r"(?i)^auth$",
        r"(?i)^credentials?$",
        r"(?i)^private_key$",
    ])
    .unwrap_or_else(|e| panic!("built-in sensitive-key patterns must be valid regex: {e}"))
});

/// Whether a header name is in the sensitive set.
#[must_use]
pub fn is_sensitive_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SENSITIVE_HEADERS.contains(&lower.as_str())
}

/// Whether a structured-body key is in the sensitive set.
#[must_use]
pub fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_KEYS.is_match(key)
}

/// Replace the values of sensitive headers in place.
pub fn redact_headers(headers: &mut HashMap<String, String>) {
    for (name, value) in headers.iter_mut() {
        if is_sensitive_header(name) {
            *value = REDACTION_SENTINEL.to_string();
        }
    }
}

/// Walk a JSON value and replace every sensitive field's value in place.
pub fn redact_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if is_sensitive_key(key) {
                    *child = Value::String(REDACTION_SENTINEL.to_string());
                } else {
                    redact_value(child);
                }
            }
        },
        Value::Array(items) => {
            for item in items.iter_mut() {
                redact_value(item);
            }
        },
        _ => {},
    }
}

/// Redact a body string. Bodies that parse as JSON are walked structurally;
/// anything else passes through unchanged.
#[must_use]
pub fn redact_body(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(mut value) => {
            redact_value(&mut value);
            serde_json::to_string(&value).unwrap_or_else(|_| body.to_string())
        },
        Err(_) => body.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn sensitive_headers_matched_case_insensitively() {
        assert!(is_sensitive_header("Authorization"));
        assert!(is_sensitive_header("COOKIE"));
        assert!(is_sensitive_header("Set-Cookie"));
        assert!(!is_sensitive_header("content-type"));
    }

    #[test]
    fn redact_headers_replaces_values_only() {
        let mut headers = HashMap::from([
            ("Authorization".to_string(), "Bearer abc123".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ]);
        redact_headers(&mut headers);
        assert_eq!(headers["Authorization"], REDACTION_SENTINEL);
        assert_eq!(headers["Content-Type"], "application/json");
    }

    #[test]
    fn nested_body_keys_redacted() {
        let body = r#"{"user":{"name":"amy","password":"hunter2"},"items":[{"api_key":"k"}]}"#;
        let redacted: Value = serde_json::from_str(&redact_body(body)).unwrap();
        assert_eq!(redacted["user"]["password"], REDACTION_SENTINEL);
        assert_eq!(redacted["items"][0]["api_key"], REDACTION_SENTINEL);
        // Non-sensitive fields untouched.
        assert_eq!(redacted["user"]["name"], "amy");
    }

    #[test]
    fn secret_prefix_keys_redacted() {
        let body = r#"{"secret_sauce":"x","secrets":["a"],"session_id":"s"}"#;
        let redacted: Value = serde_json::from_str(&redact_body(body)).unwrap();
        assert_eq!(redacted["secret_sauce"], REDACTION_SENTINEL);
        assert_eq!(redacted["secrets"], REDACTION_SENTINEL);
        assert_eq!(redacted["session_id"], REDACTION_SENTINEL);
    }

    #[test]
    fn unparseable_body_passes_through() {
        assert_eq!(redact_body("not json at all"), "not json at all");
        assert_eq!(redact_body(""), "");
    }

    #[test]
    fn structure_preserved() {
        let body = r#"{"a":{"b":[1,2,{"c":true}]},"password":"x"}"#;
        let redacted: Value = serde_json::from_str(&redact_body(body)).unwrap();
        assert_eq!(redacted["a"]["b"][2]["c"], true);
        assert_eq!(redacted["a"]["b"][0], 1);
    }

    #[test]
    fn redaction_is_idempotent() {
        let body = r#"{"password":"hunter2","nested":{"token":"t","ok":"v"}}"#;
        let once = redact_body(body);
        let twice = redact_body(&once);
        assert_eq!(once, twice);

        let mut headers = HashMap::from([("cookie".to_string(), "a=b".to_string())]);
        redact_headers(&mut headers);
        let after_once = headers.clone();
        redact_headers(&mut headers);
        assert_eq!(headers, after_once);
    }
}
