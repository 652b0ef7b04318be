//! The session record: one client workspace bound to one browser context.

use std::{
    collections::HashSet,
    sync::{
        Mutex as StdMutex, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use {
    chromiumoxide::Page,
    chrono::{DateTime, Utc},
    serde::Deserialize,
    tokio::{sync::Mutex, task::JoinHandle},
};

use {
    webgate_browser::{ContextFingerprint, PooledContext, Viewport},
    webgate_config::validate::{
        TIMEOUT_MAX_SECS, TIMEOUT_MIN_SECS, VIEWPORT_MAX_HEIGHT, VIEWPORT_MAX_WIDTH, VIEWPORT_MIN,
    },
    webgate_protocol::{ErrorCode, GatewayError},
    webgate_security::gate::is_valid_domain,
};

use crate::ring::{
    CONSOLE_CAPACITY, ConsoleEntry, ConsoleLevel, NETWORK_CAPACITY, NetworkEntry, RingBuffer,
};

/// Maximum accepted user-agent length.
const USER_AGENT_MAX_CHARS: usize = 500;

/// Options a client may set when creating a session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionOptions {
    pub viewport: Option<Viewport>,
    #[serde(rename = "userAgent")]
    pub user_agent: Option<String>,
    #[serde(rename = "allowedDomains", default)]
    pub allowed_domains: Vec<String>,
    /// Default per-operation timeout in milliseconds.
    #[serde(rename = "timeout")]
    pub timeout_ms: Option<u64>,
}

impl SessionOptions {
    /// Validate every field, reporting all violations at once.
    pub fn validate(&self) -> Result<(), GatewayError> {
        let mut problems = Vec::new();

        if let Some(viewport) = self.viewport {
            if !(VIEWPORT_MIN..=VIEWPORT_MAX_WIDTH).contains(&viewport.width) {
                problems.push(format!(
                    "viewport width {} outside [{VIEWPORT_MIN}, {VIEWPORT_MAX_WIDTH}]",
                    viewport.width
                ));
            }
            if !(VIEWPORT_MIN..=VIEWPORT_MAX_HEIGHT).contains(&viewport.height) {
                problems.push(format!(
                    "viewport height {} outside [{VIEWPORT_MIN}, {VIEWPORT_MAX_HEIGHT}]",
                    viewport.height
                ));
            }
        }

        if let Some(ref ua) = self.user_agent
            && ua.chars().count() > USER_AGENT_MAX_CHARS
        {
            problems.push(format!(
                "user agent exceeds {USER_AGENT_MAX_CHARS} characters"
            ));
        }

        for domain in &self.allowed_domains {
            if !is_valid_domain(domain) {
                problems.push(format!("invalid domain \"{domain}\""));
            }
        }

        if let Some(timeout_ms) = self.timeout_ms {
            let secs = timeout_ms / 1000;
            if !(TIMEOUT_MIN_SECS..=TIMEOUT_MAX_SECS).contains(&secs) {
                problems.push(format!(
                    "timeout {timeout_ms}ms outside [{TIMEOUT_MIN_SECS}s, {TIMEOUT_MAX_SECS}s]"
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(
                GatewayError::new(ErrorCode::InvalidParams, problems.join("; "))
                    .with_context("problems", serde_json::json!(problems)),
            )
        }
    }

    /// The pool fingerprint these options resolve to.
    #[must_use]
    pub fn fingerprint(&self, default_viewport: Viewport) -> ContextFingerprint {
        ContextFingerprint {
            viewport: self.viewport.unwrap_or(default_viewport),
            user_agent: self.user_agent.clone(),
        }
    }
}

/// One logical client workspace.
pub struct Session {
    pub id: String,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
    created_mono: Instant,
    last_activity: StdMutex<Instant>,
    pub options: SessionOptions,

    /// The checked-out context; `None` briefly during recreation and after
    /// destruction.
    pub(crate) context: Mutex<Option<PooledContext>>,
    /// Clone of the context's primary page for cheap access.
    page: RwLock<Option<Page>>,

    pub approved_domains: RwLock<HashSet<String>>,
    console: StdMutex<RingBuffer<ConsoleEntry>>,
    network: StdMutex<RingBuffer<NetworkEntry>>,

    /// Serializes operations targeting this session.
    pub op_lock: Mutex<()>,
    pub(crate) listener_tasks: StdMutex<Vec<JoinHandle<()>>>,
    trace_active: AtomicBool,
    destroyed: AtomicBool,
}

impl Session {
    pub(crate) fn new(id: String, client_id: String, options: SessionOptions) -> Self {
        let now = Instant::now();
        let approved: HashSet<String> = options.allowed_domains.iter().cloned().collect();
        Self {
            id,
            client_id,
            created_at: Utc::now(),
            created_mono: now,
            last_activity: StdMutex::new(now),
            options,
            context: Mutex::new(None),
            page: RwLock::new(None),
            approved_domains: RwLock::new(approved),
            console: StdMutex::new(RingBuffer::new(CONSOLE_CAPACITY)),
            network: StdMutex::new(RingBuffer::new(NETWORK_CAPACITY)),
            op_lock: Mutex::new(()),
            listener_tasks: StdMutex::new(Vec::new()),
            trace_active: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Touch the activity timestamp.
    pub fn touch(&self) {
        let mut last = self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *last = Instant::now().max(self.created_mono);
    }

    #[must_use]
    pub fn idle_for(&self) -> Duration {
        let last = self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        last.elapsed()
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Flip the destroyed flag; returns `false` when it was already set.
    pub(crate) fn mark_destroyed(&self) -> bool {
        !self.destroyed.swap(true, Ordering::SeqCst)
    }

    /// The session's primary page. Destroyed or context-less sessions fail
    /// with the crash code so callers surface a recoverable browser error.
    pub fn page(&self) -> Result<Page, GatewayError> {
        if self.is_destroyed() {
            return Err(GatewayError::new(
                ErrorCode::ContextCrashed,
                format!("session {} is destroyed", self.id),
            ));
        }
        self.page
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| {
                GatewayError::new(
                    ErrorCode::ContextCrashed,
                    format!("session {} has no live page", self.id),
                )
            })
    }

    pub(crate) fn set_page(&self, page: Option<Page>) {
        *self.page.write().unwrap_or_else(PoisonError::into_inner) = page;
    }

    pub fn trace_active(&self) -> bool {
        self.trace_active.load(Ordering::SeqCst)
    }

    /// Returns `false` when the trace flag was already in the desired state.
    pub fn set_trace_active(&self, active: bool) -> bool {
        self.trace_active.swap(active, Ordering::SeqCst) != active
    }

    // ── Ring buffers ────────────────────────────────────────────────────────

    pub fn push_console(&self, entry: ConsoleEntry) {
        self.console
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    pub fn push_network(&self, entry: NetworkEntry) {
        self.network
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// Most recent console entries, optionally filtered by level.
    #[must_use]
    pub fn recent_console(&self, limit: usize, level: Option<ConsoleLevel>) -> Vec<ConsoleEntry> {
        let console = self
            .console
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match level {
            Some(level) => console
                .iter()
                .filter(|e| e.level == level)
                .cloned()
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .take(limit)
                .rev()
                .collect(),
            None => console.recent(limit).cloned().collect(),
        }
    }

    /// Most recent network entries, with bodies stripped unless asked for.
    #[must_use]
    pub fn recent_network(&self, limit: usize, include_body: bool) -> Vec<NetworkEntry> {
        let network = self
            .network
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        network
            .recent(limit)
            .map(|e| {
                if include_body {
                    e.clone()
                } else {
                    e.without_bodies()
                }
            })
            .collect()
    }

    /// Every captured network entry, for HAR export and reports.
    #[must_use]
    pub fn all_network(&self) -> Vec<NetworkEntry> {
        self.network
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Console error count and total, for reports.
    #[must_use]
    pub fn console_stats(&self) -> (usize, usize) {
        let console = self
            .console
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let errors = console
            .iter()
            .filter(|e| e.level == ConsoleLevel::Error)
            .count();
        (errors, console.len())
    }

    pub(crate) fn clear_buffers(&self) {
        self.console
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.network
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub(crate) fn abort_listeners(&self) {
        let mut tasks = self
            .listener_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}
