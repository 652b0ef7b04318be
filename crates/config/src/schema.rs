/// Config schema types (server, browser, security, performance, monitoring).
/// Every field has a default so a missing or empty config file is valid.
use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebgateConfig {
    pub server: ServerConfig,
    pub browser: BrowserConfig,
    pub security: SecurityConfig,
    pub performance: PerformanceConfig,
    pub monitoring: MonitoringConfig,
}

/// WebSocket server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the WebSocket listener to.
    pub host: String,
    /// Port for the WebSocket listener.
    pub port: u16,
    /// Default per-request timeout in seconds, overridable per call.
    pub timeout_secs: u64,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8719,
            timeout_secs: 30,
            max_connections: 64,
        }
    }
}

/// Browser and session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Path to Chrome/Chromium binary (auto-detected if not set).
    pub chrome_path: Option<String>,
    /// Whether to run in headless mode.
    pub headless: bool,
    /// Maximum concurrent sessions across all clients.
    pub max_sessions: usize,
    /// Idle time in seconds after which a session is reaped.
    pub session_timeout_secs: u64,
    /// Default viewport width for new sessions.
    pub viewport_width: u32,
    /// Default viewport height for new sessions.
    pub viewport_height: u32,
    /// Default navigation timeout in milliseconds.
    pub navigation_timeout_ms: u64,
    /// Default user agent (driver default if not set).
    pub user_agent: Option<String>,
    /// Additional Chrome arguments.
    #[serde(default)]
    pub chrome_args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            max_sessions: 20,
            session_timeout_secs: 1800,
            viewport_width: 1280,
            viewport_height: 720,
            navigation_timeout_ms: 30_000,
            user_agent: None,
            chrome_args: Vec::new(),
        }
    }
}

/// Security gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Domains every session may navigate to without a prompt.
    pub allowed_domains: Vec<String>,
    /// Auto-approve `localhost` / `127.0.0.1` without prompting.
    pub auto_approve_localhost: bool,
    /// Seconds before a pending permission request auto-denies.
    pub permission_timeout_secs: u64,
    pub rate_limit: RateLimitConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_domains: Vec::new(),
            auto_approve_localhost: true,
            permission_timeout_secs: 30,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Dual-window rate limits per (client, operation class).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed within the short window.
    pub requests: usize,
    /// Short window length in seconds.
    pub window_secs: u64,
    /// Requests allowed within the rolling hour.
    pub hourly_requests: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 60,
            window_secs: 60,
            hourly_requests: 1000,
        }
    }
}

/// Resource and concurrency settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Process-wide memory budget in MiB enforced by the memory accountant.
    pub memory_limit_mb: u64,
    /// Per-session memory quota in MiB.
    pub session_memory_mb: u64,
    /// Per-session scratch disk quota in MiB.
    pub session_disk_mb: u64,
    /// Global in-flight operation cap.
    pub max_concurrency: usize,
    /// Per-client in-flight operation cap.
    pub per_client_concurrency: usize,
    /// Whether contexts are pooled at all; when false every session gets a
    /// fresh context that is destroyed on release.
    pub enable_context_pooling: bool,
    pub context_pool: ContextPoolConfig,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: 2048,
            session_memory_mb: 256,
            session_disk_mb: 512,
            max_concurrency: 8,
            per_client_concurrency: 4,
            enable_context_pooling: true,
            context_pool: ContextPoolConfig::default(),
        }
    }
}

/// Warm context pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextPoolConfig {
    /// Floor the maintainer warms back up to.
    pub min: usize,
    /// Ceiling on pooled (available + active) contexts.
    pub max: usize,
    /// Idle seconds before an available context is evicted.
    pub max_idle_secs: u64,
    /// Maintainer timer period in seconds.
    pub cleanup_interval_secs: u64,
    /// Pre-warm `min` contexts at startup.
    pub warmup_on_start: bool,
    /// Use count after which a released context is destroyed, not reused.
    pub reuse_threshold: u32,
}

impl Default for ContextPoolConfig {
    fn default() -> Self {
        Self {
            min: 1,
            max: 8,
            max_idle_secs: 300,
            cleanup_interval_secs: 60,
            warmup_on_start: false,
            reuse_threshold: 25,
        }
    }
}

/// Health/metrics surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enable_health_check: bool,
    pub enable_metrics: bool,
    pub health_path: String,
    pub metrics_path: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_health_check: true,
            enable_metrics: false,
            health_path: "/health".into(),
            metrics_path: "/metrics".into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let config = WebgateConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: WebgateConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
        assert_eq!(parsed.performance.context_pool.max, 8);
        assert_eq!(parsed.security.rate_limit.requests, 60);
    }

    #[test]
    fn empty_file_yields_defaults() {
        let parsed: WebgateConfig = toml::from_str("").unwrap();
        assert!(parsed.browser.headless);
        assert_eq!(parsed.browser.max_sessions, 20);
        assert!(parsed.security.auto_approve_localhost);
    }

    #[test]
    fn partial_section_keeps_sibling_defaults() {
        let parsed: WebgateConfig = toml::from_str("[server]\nport = 9000\n").unwrap();
        assert_eq!(parsed.server.port, 9000);
        assert_eq!(parsed.server.host, "127.0.0.1");
    }
}
