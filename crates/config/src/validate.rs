//! Configuration validation engine.
//!
//! Validates TOML configuration against the known schema, detects
//! unknown/misspelled fields, and reports every out-of-range value with its
//! dotted path so a bad file fails loudly at load time.

use std::{collections::HashMap, path::Path};

use crate::schema::WebgateConfig;

/// Bounds shared with session-option validation: what a viewport may be.
pub const VIEWPORT_MIN: u32 = 100;
pub const VIEWPORT_MAX_WIDTH: u32 = 3840;
pub const VIEWPORT_MAX_HEIGHT: u32 = 2160;

/// Bounds on any configured timeout, in seconds.
pub const TIMEOUT_MIN_SECS: u64 = 1;
pub const TIMEOUT_MAX_SECS: u64 = 300;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "range", "type-error", "security"
    pub category: &'static str,
    /// Dotted path, e.g. "browser.viewport_width"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<std::path::PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

/// Represents the expected shape of the configuration schema.
enum KnownKeys {
    /// A struct with fixed field names.
    Struct(HashMap<&'static str, KnownKeys>),
    /// Scalar value — stop recursion.
    Leaf,
}

/// Build the full schema map mirroring every field in `schema.rs`.
fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Struct};

    Struct(HashMap::from([
        (
            "server",
            Struct(HashMap::from([
                ("host", Leaf),
                ("port", Leaf),
                ("timeout_secs", Leaf),
                ("max_connections", Leaf),
            ])),
        ),
        (
            "browser",
            Struct(HashMap::from([
                ("chrome_path", Leaf),
                ("headless", Leaf),
                ("max_sessions", Leaf),
                ("session_timeout_secs", Leaf),
                ("viewport_width", Leaf),
                ("viewport_height", Leaf),
                ("navigation_timeout_ms", Leaf),
                ("user_agent", Leaf),
                ("chrome_args", Leaf),
            ])),
        ),
        (
            "security",
            Struct(HashMap::from([
                ("allowed_domains", Leaf),
                ("auto_approve_localhost", Leaf),
                ("permission_timeout_secs", Leaf),
                (
                    "rate_limit",
                    Struct(HashMap::from([
                        ("requests", Leaf),
                        ("window_secs", Leaf),
                        ("hourly_requests", Leaf),
                    ])),
                ),
            ])),
        ),
        (
            "performance",
            Struct(HashMap::from([
                ("memory_limit_mb", Leaf),
                ("session_memory_mb", Leaf),
                ("session_disk_mb", Leaf),
                ("max_concurrency", Leaf),
                ("per_client_concurrency", Leaf),
                ("enable_context_pooling", Leaf),
                (
                    "context_pool",
                    Struct(HashMap::from([
                        ("min", Leaf),
                        ("max", Leaf),
                        ("max_idle_secs", Leaf),
                        ("cleanup_interval_secs", Leaf),
                        ("warmup_on_start", Leaf),
                        ("reuse_threshold", Leaf),
                    ])),
                ),
            ])),
        ),
        (
            "monitoring",
            Struct(HashMap::from([
                ("enable_health_check", Leaf),
                ("enable_metrics", Leaf),
                ("health_path", Leaf),
                ("metrics_path", Leaf),
            ])),
        ),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a_len = a.len();
    let b_len = b.len();
    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = if ca == cb {
                0
            } else {
                1
            };
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_len]
}

/// Find the best match for `needle` among `candidates` using Levenshtein
/// distance. Returns `Some(best)` if the distance is <= `max_distance`.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    let mut best: Option<(&'a str, usize)> = None;
    for &candidate in candidates {
        let d = levenshtein(needle, candidate);
        if d > 0 && d <= max_distance && best.as_ref().is_none_or(|(_, bd)| d < *bd) {
            best = Some((candidate, d));
        }
    }
    best.map(|(s, _)| s)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or discover the default config
/// file location if `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = if let Some(p) = path {
        Some(p.to_path_buf())
    } else {
        crate::loader::find_config_file()
    };

    let Some(ref actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Info,
                category: "syntax",
                path: String::new(),
                message: "no config file found; using defaults".into(),
            }],
            config_path: None,
        };
    };

    match std::fs::read_to_string(actual_path) {
        Ok(content) => {
            let mut result = validate_toml_str(&content);
            result.config_path = Some(actual_path.clone());
            result
        },
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("failed to read config file: {e}"),
            }],
            config_path: Some(actual_path.clone()),
        },
    }
}

/// Validate a TOML string without file-system side effects (useful for tests
/// and the gateway).
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    // 1. Syntax — parse raw TOML
    let toml_value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("TOML syntax error: {e}"),
            });
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    // 2. Unknown fields — walk the TOML tree against KnownKeys
    let schema = build_schema_map();
    check_unknown_fields(&toml_value, &schema, "", &mut diagnostics);

    // 3. Type check — attempt full deserialization
    match toml::from_str::<WebgateConfig>(toml_str) {
        Ok(config) => {
            check_ranges(&config, &mut diagnostics);
            check_semantic_warnings(&config, &mut diagnostics);
        },
        Err(e) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "type-error",
                path: String::new(),
                message: format!("type error: {e}"),
            });
        },
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Walk the TOML value tree against the schema tree and flag unknown keys.
fn check_unknown_fields(
    value: &toml::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if let (toml::Value::Table(table), KnownKeys::Struct(fields)) = (value, schema) {
        let known_keys: Vec<&str> = fields.keys().copied().collect();
        for (key, child_value) in table {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            if let Some(child_schema) = fields.get(key.as_str()) {
                check_unknown_fields(child_value, child_schema, &path, diagnostics);
            } else {
                let suggestion = suggest(key, &known_keys, 3);
                let msg = if let Some(s) = suggestion {
                    format!("unknown field (did you mean \"{s}\"?)")
                } else {
                    "unknown field".to_string()
                };
                diagnostics.push(Diagnostic {
                    severity: Severity::Error,
                    category: "unknown-field",
                    path,
                    message: msg,
                });
            }
        }
    }
}

/// Range checks: every violation is reported, not just the first.
fn check_ranges(config: &WebgateConfig, diagnostics: &mut Vec<Diagnostic>) {
    let mut range_error = |path: &str, message: String| {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "range",
            path: path.into(),
            message,
        });
    };

    let b = &config.browser;
    if !(VIEWPORT_MIN..=VIEWPORT_MAX_WIDTH).contains(&b.viewport_width) {
        range_error(
            "browser.viewport_width",
            format!(
                "viewport width {} outside [{VIEWPORT_MIN}, {VIEWPORT_MAX_WIDTH}]",
                b.viewport_width
            ),
        );
    }
    if !(VIEWPORT_MIN..=VIEWPORT_MAX_HEIGHT).contains(&b.viewport_height) {
        range_error(
            "browser.viewport_height",
            format!(
                "viewport height {} outside [{VIEWPORT_MIN}, {VIEWPORT_MAX_HEIGHT}]",
                b.viewport_height
            ),
        );
    }
    if b.max_sessions == 0 {
        range_error("browser.max_sessions", "max_sessions must be >= 1".into());
    }
    if b.session_timeout_secs == 0 {
        range_error(
            "browser.session_timeout_secs",
            "session_timeout_secs must be >= 1".into(),
        );
    }
    let nav_secs = b.navigation_timeout_ms / 1000;
    if !(TIMEOUT_MIN_SECS..=TIMEOUT_MAX_SECS).contains(&nav_secs) {
        range_error(
            "browser.navigation_timeout_ms",
            format!(
                "navigation timeout {}ms outside [{}s, {}s]",
                b.navigation_timeout_ms, TIMEOUT_MIN_SECS, TIMEOUT_MAX_SECS
            ),
        );
    }

    let s = &config.server;
    if !(TIMEOUT_MIN_SECS..=TIMEOUT_MAX_SECS).contains(&s.timeout_secs) {
        range_error(
            "server.timeout_secs",
            format!(
                "request timeout {}s outside [{TIMEOUT_MIN_SECS}, {TIMEOUT_MAX_SECS}]",
                s.timeout_secs
            ),
        );
    }
    if s.max_connections == 0 {
        range_error(
            "server.max_connections",
            "max_connections must be >= 1".into(),
        );
    }

    let sec = &config.security;
    if sec.rate_limit.requests == 0 {
        range_error(
            "security.rate_limit.requests",
            "rate_limit.requests must be >= 1".into(),
        );
    }
    if !(1..=3600).contains(&sec.rate_limit.window_secs) {
        range_error(
            "security.rate_limit.window_secs",
            format!(
                "rate_limit window {}s outside [1, 3600]",
                sec.rate_limit.window_secs
            ),
        );
    }
    if !(TIMEOUT_MIN_SECS..=TIMEOUT_MAX_SECS).contains(&sec.permission_timeout_secs) {
        range_error(
            "security.permission_timeout_secs",
            format!(
                "permission timeout {}s outside [{TIMEOUT_MIN_SECS}, {TIMEOUT_MAX_SECS}]",
                sec.permission_timeout_secs
            ),
        );
    }

    let p = &config.performance;
    if p.memory_limit_mb < 64 {
        range_error(
            "performance.memory_limit_mb",
            format!("memory limit {} MiB below minimum 64 MiB", p.memory_limit_mb),
        );
    }
    if p.max_concurrency == 0 {
        range_error(
            "performance.max_concurrency",
            "max_concurrency must be >= 1".into(),
        );
    }
    if p.per_client_concurrency == 0 {
        range_error(
            "performance.per_client_concurrency",
            "per_client_concurrency must be >= 1".into(),
        );
    }

    let pool = &p.context_pool;
    if pool.max == 0 {
        range_error("performance.context_pool.max", "pool max must be >= 1".into());
    }
    if pool.min > pool.max {
        range_error(
            "performance.context_pool.min",
            format!("pool min {} exceeds max {}", pool.min, pool.max),
        );
    }
    if pool.reuse_threshold == 0 {
        range_error(
            "performance.context_pool.reuse_threshold",
            "reuse_threshold must be >= 1".into(),
        );
    }
}

/// Run semantic checks on a successfully parsed config.
fn check_semantic_warnings(config: &WebgateConfig, diagnostics: &mut Vec<Diagnostic>) {
    let is_localhost = config.server.host == "127.0.0.1"
        || config.server.host == "localhost"
        || config.server.host == "::1";

    if !is_localhost {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "security",
            path: "server.host".into(),
            message: format!(
                "gateway binds to {} without transport authentication",
                config.server.host
            ),
        });
    }

    if config.server.port == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Info,
            category: "security",
            path: "server.port".into(),
            message: "port is 0; a random port will be assigned at startup".into(),
        });
    }

    for (idx, domain) in config.security.allowed_domains.iter().enumerate() {
        if domain.contains("://") || domain.contains('/') {
            diagnostics.push(Diagnostic {
                severity: Severity::Warning,
                category: "security",
                path: format!("security.allowed_domains[{idx}]"),
                message: format!("\"{domain}\" looks like a URL; expected a bare domain"),
            });
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levenshtein_identical() {
        assert_eq!(levenshtein("hello", "hello"), 0);
    }

    #[test]
    fn levenshtein_single_edit() {
        assert_eq!(levenshtein("server", "sever"), 1);
        assert_eq!(levenshtein("port", "prt"), 1);
    }

    #[test]
    fn unknown_top_level_key_with_suggestion() {
        let result = validate_toml_str("[sever]\nport = 42\n");
        let unknown = result
            .diagnostics
            .iter()
            .find(|d| d.category == "unknown-field" && d.path == "sever");
        assert!(unknown.is_some(), "expected unknown-field for 'sever'");
        assert!(unknown.unwrap().message.contains("server"));
    }

    #[test]
    fn unknown_nested_key_with_suggestion() {
        let toml = r#"
[browser]
viewportwidth = 1280
"#;
        let result = validate_toml_str(toml);
        let unknown = result
            .diagnostics
            .iter()
            .find(|d| d.category == "unknown-field" && d.path == "browser.viewportwidth");
        assert!(
            unknown.is_some(),
            "expected unknown-field, got: {:?}",
            result.diagnostics
        );
        assert!(unknown.unwrap().message.contains("viewport_width"));
    }

    #[test]
    fn empty_config_is_valid() {
        let result = validate_toml_str("");
        assert!(
            !result.has_errors(),
            "empty config should be valid, got: {:?}",
            result.diagnostics
        );
    }

    #[test]
    fn syntax_error_detected() {
        let result = validate_toml_str("this is not valid toml [[[");
        assert!(result.has_errors());
        assert!(result.diagnostics.iter().any(|d| d.category == "syntax"));
    }

    #[test]
    fn viewport_boundaries() {
        // 100x100 and 3840x2160 are the accepted extremes.
        let ok = validate_toml_str("[browser]\nviewport_width = 100\nviewport_height = 100\n");
        assert!(!ok.has_errors(), "{:?}", ok.diagnostics);
        let ok = validate_toml_str("[browser]\nviewport_width = 3840\nviewport_height = 2160\n");
        assert!(!ok.has_errors(), "{:?}", ok.diagnostics);

        let bad = validate_toml_str("[browser]\nviewport_width = 99\n");
        assert!(
            bad.diagnostics
                .iter()
                .any(|d| d.category == "range" && d.path == "browser.viewport_width")
        );
        let bad = validate_toml_str("[browser]\nviewport_height = 2161\n");
        assert!(
            bad.diagnostics
                .iter()
                .any(|d| d.category == "range" && d.path == "browser.viewport_height")
        );
    }

    #[test]
    fn timeout_boundaries() {
        let ok = validate_toml_str("[server]\ntimeout_secs = 1\n");
        assert!(!ok.has_errors());
        let ok = validate_toml_str("[server]\ntimeout_secs = 300\n");
        assert!(!ok.has_errors());
        let bad = validate_toml_str("[server]\ntimeout_secs = 301\n");
        assert!(bad.has_errors());
        let bad = validate_toml_str("[server]\ntimeout_secs = 0\n");
        assert!(bad.has_errors());
    }

    #[test]
    fn all_range_violations_reported_together() {
        let toml = r#"
[browser]
viewport_width = 10
viewport_height = 9999

[server]
timeout_secs = 0
"#;
        let result = validate_toml_str(toml);
        assert_eq!(
            result
                .diagnostics
                .iter()
                .filter(|d| d.category == "range")
                .count(),
            3,
            "{:?}",
            result.diagnostics
        );
    }

    #[test]
    fn pool_min_above_max_is_error() {
        let toml = r#"
[performance.context_pool]
min = 9
max = 4
"#;
        let result = validate_toml_str(toml);
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "performance.context_pool.min")
        );
    }

    #[test]
    fn non_localhost_bind_warned() {
        let result = validate_toml_str("[server]\nhost = \"0.0.0.0\"\n");
        let warning = result
            .diagnostics
            .iter()
            .find(|d| d.category == "security" && d.path == "server.host");
        assert!(warning.is_some());
        assert!(!result.has_errors());
    }

    #[test]
    fn url_in_allowed_domains_warned() {
        let result =
            validate_toml_str("[security]\nallowed_domains = [\"https://example.com\"]\n");
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "security.allowed_domains[0]")
        );
    }

    /// Schema drift guard: verify every key from `WebgateConfig::default()` is
    /// represented in `build_schema_map()`.
    #[test]
    fn schema_drift_guard() {
        let config = WebgateConfig::default();
        let toml_value = toml::Value::try_from(&config).expect("serialize default config");
        let schema = build_schema_map();
        let mut missing = Vec::new();
        collect_missing_keys(&toml_value, &schema, "", &mut missing);
        assert!(
            missing.is_empty(),
            "schema map is missing keys present in WebgateConfig::default(): {missing:?}\n\
             Update build_schema_map() in validate.rs to include these fields."
        );
    }

    fn collect_missing_keys(
        value: &toml::Value,
        schema: &KnownKeys,
        prefix: &str,
        missing: &mut Vec<String>,
    ) {
        if let (toml::Value::Table(table), KnownKeys::Struct(fields)) = (value, schema) {
            for (key, child_value) in table {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                if let Some(child_schema) = fields.get(key.as_str()) {
                    collect_missing_keys(child_value, child_schema, &path, missing);
                } else {
                    missing.push(path);
                }
            }
        }
    }

    #[test]
    fn suggest_finds_close_match() {
        let candidates = &["server", "browser", "security", "performance"];
        assert_eq!(suggest("sever", candidates, 3), Some("server"));
        assert_eq!(suggest("secruity", candidates, 3), Some("security"));
    }

    #[test]
    fn suggest_returns_none_for_distant() {
        let candidates = &["server", "browser"];
        assert_eq!(suggest("xxxxxxxxx", candidates, 3), None);
    }
}
