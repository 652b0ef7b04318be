//! Process-wide state: every collaborator constructed once at startup and
//! passed by reference, so tests can instantiate independent runtimes.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
    time::{Duration, Instant},
};

use {
    tokio::sync::mpsc,
    tracing::{debug, warn},
};

use {
    webgate_browser::{ContextFactory, ContextPool, PoolSettings, Viewport},
    webgate_config::WebgateConfig,
    webgate_protocol::{JsonRpcNotification, notifications},
    webgate_recovery::{
        BreakerRegistry, BreakerSettings, RecoveryEngine, RetryPolicy,
    },
    webgate_security::{
        DomainGate, PermissionNotifier, PermissionRequest, RateLimitSettings, RateLimiter,
    },
    webgate_sessions::{
        AccountantSettings, ManagerSettings, ResourceAccountants, SessionManager,
        SessionManagerRebuilder,
    },
};

use crate::{
    dispatcher::Dispatcher,
    macros::MacroStore,
    scheduler::{ExecutionScheduler, SchedulerSettings},
    tools::export::ReportStore,
};

// ── Connected client ─────────────────────────────────────────────────────────

/// A transport connection able to receive frames.
#[derive(Debug)]
pub struct ConnectedClient {
    pub client_id: String,
    /// Channel into the connection's write loop.
    pub sender: mpsc::UnboundedSender<String>,
    pub connected_at: Instant,
}

impl ConnectedClient {
    /// Send a serialized frame; returns `false` when the write loop is gone.
    pub fn send(&self, frame: &str) -> bool {
        self.sender.send(frame.to_string()).is_ok()
    }
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Everything the dispatcher and transports share.
pub struct GatewayState {
    pub config: WebgateConfig,
    pub pool: Arc<ContextPool>,
    pub sessions: Arc<SessionManager>,
    pub accountants: Arc<ResourceAccountants>,
    pub gate: Arc<DomainGate>,
    pub limiter: Arc<RateLimiter>,
    pub breakers: Arc<BreakerRegistry>,
    pub recovery: Arc<RecoveryEngine>,
    pub scheduler: Arc<ExecutionScheduler>,
    pub macros: Arc<MacroStore>,
    pub reports: Arc<ReportStore>,
    clients: RwLock<HashMap<String, ConnectedClient>>,
    dispatcher: RwLock<std::sync::Weak<Dispatcher>>,
}

impl GatewayState {
    /// Register a transport connection for notification delivery.
    pub fn register_client(&self, client: ConnectedClient) {
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(client.client_id.clone(), client);
    }

    /// Remove a connection and cancel its in-flight operations.
    pub fn unregister_client(&self, client_id: &str) {
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(client_id);
        self.scheduler.cancel_client(client_id);
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Wire the dispatcher back-reference. Called once by [`Dispatcher::new`].
    pub(crate) fn set_dispatcher(&self, dispatcher: &Arc<Dispatcher>) {
        *self
            .dispatcher
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::downgrade(dispatcher);
    }

    /// The dispatcher, for handlers that re-enter (macro replay, cleanup).
    #[must_use]
    pub fn dispatcher(&self) -> Option<Arc<Dispatcher>> {
        self.dispatcher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
    }

    /// Broadcast a notification to every connected client. Notifications on a
    /// connection stay ordered because each write loop is a single channel.
    pub fn broadcast(&self, method: &str, params: serde_json::Value) {
        let frame = JsonRpcNotification::new(method, params);
        let json = match serde_json::to_string(&frame) {
            Ok(j) => j,
            Err(e) => {
                warn!(error = %e, "failed to serialize notification");
                return;
            },
        };
        let clients = self
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        debug!(method, clients = clients.len(), "broadcasting notification");
        for client in clients.values() {
            client.send(&json);
        }
    }

    /// Send a notification to one client.
    pub fn notify(&self, client_id: &str, method: &str, params: serde_json::Value) {
        let frame = JsonRpcNotification::new(method, params);
        let Ok(json) = serde_json::to_string(&frame) else {
            return;
        };
        let clients = self
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(client_id) {
            client.send(&json);
        }
    }
}

/// Permission prompts go out as `permission.requested` broadcasts.
struct BroadcastNotifier(std::sync::Weak<GatewayState>);

impl PermissionNotifier for BroadcastNotifier {
    fn permission_requested(&self, request: &PermissionRequest) {
        if let Some(state) = self.0.upgrade() {
            state.broadcast(
                notifications::PERMISSION_REQUESTED,
                serde_json::to_value(request).unwrap_or_default(),
            );
        }
    }
}

/// Build the full runtime from configuration and a context factory.
///
/// The factory is a parameter so tests wire a stub while the binary passes
/// [`webgate_browser::ChromiumFactory`].
pub async fn build_state(
    config: WebgateConfig,
    factory: Arc<dyn ContextFactory>,
) -> Arc<GatewayState> {
    let default_viewport = Viewport {
        width: config.browser.viewport_width,
        height: config.browser.viewport_height,
    };

    let pool = ContextPool::new(
        PoolSettings {
            min: config.performance.context_pool.min,
            max: config.performance.context_pool.max,
            max_idle: Duration::from_secs(config.performance.context_pool.max_idle_secs),
            cleanup_interval: Duration::from_secs(
                config.performance.context_pool.cleanup_interval_secs,
            ),
            warmup_on_start: config.performance.context_pool.warmup_on_start,
            reuse_threshold: config.performance.context_pool.reuse_threshold,
            pooling_enabled: config.performance.enable_context_pooling,
            warm_fingerprint: webgate_browser::ContextFingerprint {
                viewport: default_viewport,
                user_agent: config.browser.user_agent.clone(),
            },
        },
        factory,
    );

    let accountants = Arc::new(ResourceAccountants::new(AccountantSettings {
        memory_limit_mb: config.performance.memory_limit_mb,
        session_memory_mb: config.performance.session_memory_mb,
        session_disk_mb: config.performance.session_disk_mb,
        enforce_system_ceiling: true,
    }));

    let sessions = SessionManager::new(
        ManagerSettings {
            max_sessions: config.browser.max_sessions,
            session_timeout: Duration::from_secs(config.browser.session_timeout_secs),
            default_viewport,
            default_timeout_ms: config.server.timeout_secs * 1000,
        },
        pool.clone(),
        accountants.clone(),
    );

    let gate = Arc::new(DomainGate::new(
        config.security.allowed_domains.clone(),
        config.security.auto_approve_localhost,
        Duration::from_secs(config.security.permission_timeout_secs),
    ));

    let limiter = Arc::new(RateLimiter::new(RateLimitSettings {
        requests: config.security.rate_limit.requests,
        window: Duration::from_secs(config.security.rate_limit.window_secs),
        hourly_requests: config.security.rate_limit.hourly_requests,
    }));

    let breakers = Arc::new(BreakerRegistry::new(BreakerSettings::default()));
    let recovery = Arc::new(RecoveryEngine::new(RetryPolicy::default(), breakers.clone()));
    recovery
        .set_rebuilder(Arc::new(SessionManagerRebuilder(sessions.clone())))
        .await;

    let scheduler = Arc::new(ExecutionScheduler::new(SchedulerSettings {
        max_concurrency: config.performance.max_concurrency,
        per_client_concurrency: config.performance.per_client_concurrency,
        default_timeout: Duration::from_secs(config.server.timeout_secs),
    }));

    let state = Arc::new(GatewayState {
        config,
        pool,
        sessions,
        accountants,
        gate,
        limiter,
        breakers,
        recovery,
        scheduler,
        macros: Arc::new(MacroStore::new()),
        reports: Arc::new(ReportStore::new()),
        clients: RwLock::new(HashMap::new()),
        dispatcher: RwLock::new(std::sync::Weak::new()),
    });

    state
        .gate
        .set_notifier(Arc::new(BroadcastNotifier(Arc::downgrade(&state))))
        .await;

    let weak = Arc::downgrade(&state);
    state.sessions.set_console_hook(Arc::new(move |session_id, entry| {
        if let Some(state) = weak.upgrade() {
            let mut params = serde_json::to_value(entry).unwrap_or_default();
            if let Some(obj) = params.as_object_mut() {
                obj.insert("sessionId".into(), session_id.into());
            }
            state.broadcast(notifications::CONSOLE_LOG, params);
        }
    }));

    state
}
