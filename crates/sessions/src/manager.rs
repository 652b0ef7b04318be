//! Session lifecycle, isolation, and reaping.

use std::{
    collections::HashMap,
    sync::{
        Arc, PoisonError, RwLock as StdRwLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    chromiumoxide::cdp::{
        browser_protocol::network::{EventRequestWillBeSent, EventResponseReceived},
        js_protocol::runtime::EventConsoleApiCalled,
    },
    chrono::Utc,
    dashmap::DashMap,
    futures::StreamExt,
    serde::Serialize,
    tokio::{sync::Mutex, task::JoinHandle},
    tracing::{debug, info, warn},
};

use {
    webgate_browser::{ContextPool, Viewport},
    webgate_protocol::{ErrorCode, GatewayError},
    webgate_recovery::ContextRebuilder,
};

use crate::{
    accounting::ResourceAccountants,
    ring::{ConsoleEntry, ConsoleLevel, NetworkEntry, SourceLocation},
    session::{Session, SessionOptions},
};

/// Invoked for every captured console event; the gateway broadcasts these as
/// `console.log` notifications.
pub type ConsoleHook = Arc<dyn Fn(&str, &ConsoleEntry) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub max_sessions: usize,
    /// Idle time after which the reaper destroys a session.
    pub session_timeout: Duration,
    pub default_viewport: Viewport,
    /// Default per-operation timeout when the session sets none.
    pub default_timeout_ms: u64,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            max_sessions: 20,
            session_timeout: Duration::from_secs(1800),
            default_viewport: Viewport::default(),
            default_timeout_ms: 30_000,
        }
    }
}

/// Counters for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub active: usize,
    pub max: usize,
}

/// Exclusive owner of all sessions.
pub struct SessionManager {
    settings: ManagerSettings,
    pool: Arc<ContextPool>,
    accountants: Arc<ResourceAccountants>,
    sessions: DashMap<String, Arc<Session>>,
    /// Slot counter; reserved before the expensive context acquisition.
    active: AtomicUsize,
    console_hook: StdRwLock<Option<ConsoleHook>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
    shutdown: AtomicBool,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        settings: ManagerSettings,
        pool: Arc<ContextPool>,
        accountants: Arc<ResourceAccountants>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            pool,
            accountants,
            sessions: DashMap::new(),
            active: AtomicUsize::new(0),
            console_hook: StdRwLock::new(None),
            reaper: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Wire the console broadcast hook. Called once at startup.
    pub fn set_console_hook(&self, hook: ConsoleHook) {
        *self
            .console_hook
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    /// Create a session: validate, reserve a slot, register quotas, acquire a
    /// context, wire listeners, store.
    pub async fn create_session(
        self: &Arc<Self>,
        options: SessionOptions,
        client_id: &str,
    ) -> Result<Arc<Session>, GatewayError> {
        options.validate()?;

        let max = self.settings.max_sessions;
        if self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| {
                (active < max).then_some(active + 1)
            })
            .is_err()
        {
            return Err(GatewayError::new(
                ErrorCode::ResourceExhausted,
                format!("session cap of {max} reached"),
            )
            .with_context("max_sessions", max));
        }

        if let Err(e) = self.accountants.register() {
            self.active.fetch_sub(1, Ordering::SeqCst);
            return Err(e);
        }

        let fingerprint = options.fingerprint(self.settings.default_viewport);
        let context = match self.pool.acquire(&fingerprint).await {
            Ok(ctx) => ctx,
            Err(e) => {
                self.accountants.unregister();
                self.active.fetch_sub(1, Ordering::SeqCst);
                return Err(e.into_gateway());
            },
        };

        let session = Arc::new(Session::new(
            uuid::Uuid::new_v4().to_string(),
            client_id.to_string(),
            options,
        ));
        session.set_page(context.handle.page.clone());
        *session.context.lock().await = Some(context);

        self.wire_listeners(&session).await;
        self.sessions.insert(session.id.clone(), session.clone());

        info!(
            session_id = %session.id,
            client_id,
            active = self.active.load(Ordering::Relaxed),
            "session created"
        );
        Ok(session)
    }

    /// Look up a live session.
    #[must_use]
    pub fn get_session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .filter(|s| !s.is_destroyed())
    }

    /// Destroy a session. Idempotent: the second call returns `false` with no
    /// side effects.
    pub async fn destroy_session(&self, id: &str) -> bool {
        let Some(session) = self.sessions.get(id).map(|e| e.value().clone()) else {
            return false;
        };
        if !session.mark_destroyed() {
            return false;
        }

        session.abort_listeners();
        session.set_page(None);
        if let Some(context) = session.context.lock().await.take() {
            self.pool.release(context).await;
        }
        self.accountants.unregister();
        self.sessions.remove(id);
        self.active.fetch_sub(1, Ordering::SeqCst);

        info!(session_id = id, "session destroyed");
        true
    }

    /// Destroy every session owned by a client; returns how many went away.
    pub async fn destroy_sessions_for_client(&self, client_id: &str) -> usize {
        let ids: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().client_id == client_id)
            .map(|entry| entry.key().clone())
            .collect();

        let mut destroyed = 0;
        for id in ids {
            if self.destroy_session(&id).await {
                destroyed += 1;
            }
        }
        destroyed
    }

    /// Rebuild a session's context in place: same identity, fresh context,
    /// empty ring buffers. Takes the per-session operation lock, so in-flight
    /// operations drain first.
    pub async fn recreate_session(self: &Arc<Self>, id: &str) -> Result<(), GatewayError> {
        let session = self.get_session(id).ok_or_else(|| {
            GatewayError::new(
                ErrorCode::ContextCrashed,
                format!("session {id} not found or destroyed"),
            )
        })?;

        let _guard = session.op_lock.lock().await;
        if session.is_destroyed() {
            return Err(GatewayError::new(
                ErrorCode::ContextCrashed,
                format!("session {id} was destroyed during recreation"),
            ));
        }

        session.abort_listeners();
        session.set_page(None);
        if let Some(old) = session.context.lock().await.take() {
            // The old context is suspect; never return it to the pool.
            self.pool.discard(old).await;
        }

        let fingerprint = session.options.fingerprint(self.settings.default_viewport);
        let context = self
            .pool
            .acquire(&fingerprint)
            .await
            .map_err(|e| e.into_gateway())?;
        session.set_page(context.handle.page.clone());
        *session.context.lock().await = Some(context);
        session.clear_buffers();
        self.wire_listeners(&session).await;
        session.touch();

        info!(session_id = id, "session context recreated");
        Ok(())
    }

    /// Start the idle reaper. Period is a fraction of the session timeout so
    /// an idle session outlives its deadline only briefly.
    pub async fn start_reaper(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let period = (self.settings.session_timeout / 4).max(Duration::from_secs(1));
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            timer.tick().await;
            while !manager.shutdown.load(Ordering::Relaxed) {
                timer.tick().await;
                manager.reap_idle().await;
            }
        });
        *self.reaper.lock().await = Some(handle);
    }

    /// One reaper pass over a snapshot of session ids. Each destroy is
    /// serialized on its own session; no global lock is held.
    pub async fn reap_idle(&self) {
        let timeout = self.settings.session_timeout;
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            let Some(session) = self.get_session(&id) else {
                continue;
            };
            let idle = session.idle_for();
            if idle > timeout {
                debug!(session_id = %id, idle_secs = idle.as_secs(), "reaping idle session");
                self.destroy_session(&id).await;
            }
        }
    }

    /// Destroy everything and stop the reaper.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.reaper.lock().await.take() {
            handle.abort();
        }
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.destroy_session(&id).await;
        }
        info!("session manager shut down");
    }

    #[must_use]
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            active: self.active.load(Ordering::Relaxed),
            max: self.settings.max_sessions,
        }
    }

    #[must_use]
    pub fn default_timeout_ms(&self) -> u64 {
        self.settings.default_timeout_ms
    }

    // ── Event listeners ─────────────────────────────────────────────────────

    /// Subscribe the session's page events into its ring buffers. A session
    /// whose handle has no live page (tests) gets no listeners.
    async fn wire_listeners(&self, session: &Arc<Session>) {
        let Ok(page) = session.page() else {
            return;
        };
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        match page.event_listener::<EventConsoleApiCalled>().await {
            Ok(stream) => {
                let mut stream = stream.boxed();
                let weak = Arc::downgrade(session);
                let hook = self
                    .console_hook
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                tasks.push(tokio::spawn(async move {
                    while let Some(event) = stream.next().await {
                        let Some(session) = weak.upgrade() else {
                            break;
                        };
                        if session.is_destroyed() {
                            break;
                        }
                        let entry = console_entry_from(&event);
                        if let Some(ref hook) = hook {
                            hook(&session.id, &entry);
                        }
                        session.push_console(entry);
                    }
                }));
            },
            Err(e) => warn!(session_id = %session.id, error = %e, "console listener failed"),
        }

        let requests = page.event_listener::<EventRequestWillBeSent>().await;
        let responses = page.event_listener::<EventResponseReceived>().await;
        match (requests, responses) {
            (Ok(requests), Ok(responses)) => {
                let weak = Arc::downgrade(session);
                tasks.push(tokio::spawn(capture_network(
                    weak,
                    requests.boxed(),
                    responses.boxed(),
                )));
            },
            (Err(e), _) | (_, Err(e)) => {
                warn!(session_id = %session.id, error = %e, "network listener failed");
            },
        }

        session
            .listener_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(tasks);
    }
}

/// `ContextRebuilder` adapter owning an `Arc<SessionManager>`
/// (`recreate_session` needs the `Arc` receiver).
pub struct SessionManagerRebuilder(pub Arc<SessionManager>);

#[async_trait]
impl ContextRebuilder for SessionManagerRebuilder {
    async fn rebuild(&self, session_id: &str) -> Result<(), GatewayError> {
        self.0.recreate_session(session_id).await
    }
}

// ── Event conversion ────────────────────────────────────────────────────────

/// Serde-roundtrip accessors keep us off the CDP types' inherent methods,
/// which differ between driver releases.
fn json_of<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

fn headers_map<T: Serialize>(headers: &T) -> HashMap<String, String> {
    json_of(headers)
        .as_object()
        .map(|obj| {
            obj.iter()
                .map(|(k, v)| {
                    let value = v.as_str().map_or_else(|| v.to_string(), String::from);
                    (k.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn console_entry_from(event: &EventConsoleApiCalled) -> ConsoleEntry {
    let api_type = json_of(&event.r#type);
    let level = ConsoleLevel::from_api_type(api_type.as_str().unwrap_or("log"));

    let message = event
        .args
        .iter()
        .map(|arg| {
            let value = json_of(arg);
            value["value"]
                .as_str()
                .map(String::from)
                .or_else(|| {
                    value
                        .get("value")
                        .filter(|v| !v.is_null())
                        .map(|v| v.to_string())
                })
                .or_else(|| value["description"].as_str().map(String::from))
                .unwrap_or_default()
        })
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    let location = event.stack_trace.as_ref().and_then(|trace| {
        trace.call_frames.first().map(|frame| SourceLocation {
            url: frame.url.clone(),
            line: frame.line_number.max(0) as u32,
            column: frame.column_number.max(0) as u32,
        })
    });

    ConsoleEntry {
        timestamp: Utc::now(),
        level,
        message,
        location,
    }
}

struct PendingRequest {
    method: String,
    url: String,
    headers: HashMap<String, String>,
    body: Option<String>,
    sent_at: f64,
}

/// Pair request/response events by request id and append completed exchanges
/// to the session's network ring buffer.
async fn capture_network(
    weak: std::sync::Weak<Session>,
    mut requests: impl futures::Stream<Item = Arc<EventRequestWillBeSent>> + Unpin,
    mut responses: impl futures::Stream<Item = Arc<EventResponseReceived>> + Unpin,
) {
    let mut pending: HashMap<String, PendingRequest> = HashMap::new();

    loop {
        tokio::select! {
            event = requests.next() => {
                let Some(event) = event else { break };
                let key = json_of(&event.request_id).as_str().unwrap_or_default().to_string();
                pending.insert(key, PendingRequest {
                    method: event.request.method.clone(),
                    url: event.request.url.clone(),
                    headers: headers_map(&event.request.headers),
                    body: event.request.post_data.clone(),
                    sent_at: json_of(&event.timestamp).as_f64().unwrap_or(0.0),
                });
                // Lost responses must not grow the map without bound.
                if pending.len() > 512 {
                    pending.clear();
                }
            },
            event = responses.next() => {
                let Some(event) = event else { break };
                let Some(session) = weak.upgrade() else { break };
                if session.is_destroyed() {
                    break;
                }
                let key = json_of(&event.request_id).as_str().unwrap_or_default().to_string();
                let Some(request) = pending.remove(&key) else { continue };

                let finished_at = json_of(&event.timestamp).as_f64().unwrap_or(request.sent_at);
                let duration_ms = ((finished_at - request.sent_at).max(0.0) * 1000.0) as u64;

                session.push_network(NetworkEntry::redacted(
                    Utc::now(),
                    request.method,
                    request.url,
                    event.response.status.clamp(0, u16::MAX as i64) as u16,
                    request.headers,
                    headers_map(&event.response.headers),
                    request.body,
                    None,
                    duration_ms,
                ));
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;
    use {
        crate::accounting::AccountantSettings,
        webgate_browser::{
            BrowserError, ContextFingerprint, PoolSettings,
            factory::{ContextFactory, ContextHandle},
        },
    };

    struct StubFactory {
        created: AtomicUsize,
    }

    #[async_trait]
    impl ContextFactory for StubFactory {
        async fn create(
            &self,
            _fingerprint: &ContextFingerprint,
        ) -> Result<ContextHandle, BrowserError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(ContextHandle::detached())
        }

        async fn reset(&self, _handle: &ContextHandle) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn destroy(&self, _handle: ContextHandle) {}
    }

    fn manager(max_sessions: usize, timeout: Duration) -> Arc<SessionManager> {
        let factory = Arc::new(StubFactory {
            created: AtomicUsize::new(0),
        });
        let pool = ContextPool::new(
            PoolSettings {
                min: 0,
                max: 8,
                cleanup_interval: Duration::from_secs(3600),
                ..PoolSettings::default()
            },
            factory,
        );
        let accountants = Arc::new(ResourceAccountants::new(AccountantSettings {
            enforce_system_ceiling: false,
            ..AccountantSettings::default()
        }));
        SessionManager::new(
            ManagerSettings {
                max_sessions,
                session_timeout: timeout,
                ..ManagerSettings::default()
            },
            pool,
            accountants,
        )
    }

    #[tokio::test]
    async fn create_get_destroy_roundtrip() {
        let manager = manager(4, Duration::from_secs(60));
        let session = manager
            .create_session(SessionOptions::default(), "client-a")
            .await
            .unwrap();
        let id = session.id.clone();

        assert!(manager.get_session(&id).is_some());
        assert_eq!(manager.stats().active, 1);

        assert!(manager.destroy_session(&id).await);
        assert!(manager.get_session(&id).is_none());
        assert_eq!(manager.stats().active, 0);

        // Double destroy returns false without side effects.
        assert!(!manager.destroy_session(&id).await);
        assert_eq!(manager.stats().active, 0);
    }

    #[tokio::test]
    async fn session_cap_rejects_with_resource_exhausted() {
        let manager = manager(1, Duration::from_secs(60));
        manager
            .create_session(SessionOptions::default(), "client-a")
            .await
            .unwrap();

        let err = manager
            .create_session(SessionOptions::default(), "client-b")
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ResourceExhausted);

        // Destroying a session frees the slot again.
        let ids: Vec<String> = manager.sessions.iter().map(|e| e.key().clone()).collect();
        manager.destroy_session(&ids[0]).await;
        assert!(
            manager
                .create_session(SessionOptions::default(), "client-b")
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn invalid_options_rejected_before_slot_reserved() {
        let manager = manager(4, Duration::from_secs(60));
        let options = SessionOptions {
            viewport: Some(Viewport {
                width: 10,
                height: 10,
            }),
            ..SessionOptions::default()
        };
        let err = manager.create_session(options, "c").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams);
        assert_eq!(manager.stats().active, 0);
    }

    #[tokio::test]
    async fn destroy_for_client_only_hits_that_client() {
        let manager = manager(8, Duration::from_secs(60));
        let a1 = manager
            .create_session(SessionOptions::default(), "client-a")
            .await
            .unwrap();
        let _a2 = manager
            .create_session(SessionOptions::default(), "client-a")
            .await
            .unwrap();
        let b = manager
            .create_session(SessionOptions::default(), "client-b")
            .await
            .unwrap();

        assert_eq!(manager.destroy_sessions_for_client("client-a").await, 2);
        assert!(manager.get_session(&a1.id).is_none());
        assert!(manager.get_session(&b.id).is_some());
    }

    #[tokio::test]
    async fn ring_buffers_are_isolated_between_sessions() {
        let manager = manager(4, Duration::from_secs(60));
        let a = manager
            .create_session(SessionOptions::default(), "client-a")
            .await
            .unwrap();
        let b = manager
            .create_session(SessionOptions::default(), "client-b")
            .await
            .unwrap();

        a.push_console(ConsoleEntry {
            timestamp: Utc::now(),
            level: ConsoleLevel::Info,
            message: "A-msg".into(),
            location: None,
        });
        b.push_console(ConsoleEntry {
            timestamp: Utc::now(),
            level: ConsoleLevel::Info,
            message: "B-msg".into(),
            location: None,
        });

        let a_msgs: Vec<String> = a
            .recent_console(10, None)
            .into_iter()
            .map(|e| e.message)
            .collect();
        let b_msgs: Vec<String> = b
            .recent_console(10, None)
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert!(a_msgs.contains(&"A-msg".to_string()));
        assert!(!a_msgs.contains(&"B-msg".to_string()));
        assert!(b_msgs.contains(&"B-msg".to_string()));
        assert!(!b_msgs.contains(&"A-msg".to_string()));
    }

    #[tokio::test]
    async fn recreate_preserves_identity_and_drops_buffers() {
        let manager = manager(4, Duration::from_secs(60));
        let session = manager
            .create_session(SessionOptions::default(), "client-a")
            .await
            .unwrap();
        session.push_console(ConsoleEntry {
            timestamp: Utc::now(),
            level: ConsoleLevel::Info,
            message: "before".into(),
            location: None,
        });

        manager.recreate_session(&session.id).await.unwrap();

        let again = manager.get_session(&session.id).unwrap();
        assert_eq!(again.id, session.id);
        assert!(again.recent_console(10, None).is_empty());
        assert_eq!(manager.stats().active, 1);
    }

    #[tokio::test]
    async fn recreate_unknown_session_fails_with_crash_code() {
        let manager = manager(4, Duration::from_secs(60));
        let err = manager.recreate_session("nope").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ContextCrashed);
    }

    #[tokio::test]
    async fn reaper_destroys_idle_sessions() {
        let manager = manager(4, Duration::from_millis(10));
        let session = manager
            .create_session(SessionOptions::default(), "client-a")
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        manager.reap_idle().await;
        assert!(manager.get_session(&session.id).is_none());
        assert_eq!(manager.stats().active, 0);
    }

    #[tokio::test]
    async fn touched_session_survives_the_reaper() {
        let manager = manager(4, Duration::from_millis(50));
        let session = manager
            .create_session(SessionOptions::default(), "client-a")
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        session.touch();
        manager.reap_idle().await;
        assert!(manager.get_session(&session.id).is_some());
    }

    #[tokio::test]
    async fn shutdown_destroys_everything() {
        let manager = manager(4, Duration::from_secs(60));
        manager
            .create_session(SessionOptions::default(), "a")
            .await
            .unwrap();
        manager
            .create_session(SessionOptions::default(), "b")
            .await
            .unwrap();
        manager.shutdown().await;
        assert_eq!(manager.stats().active, 0);
    }

    #[tokio::test]
    async fn rebuilder_adapter_recreates() {
        let manager = manager(4, Duration::from_secs(60));
        let session = manager
            .create_session(SessionOptions::default(), "a")
            .await
            .unwrap();
        let rebuilder = SessionManagerRebuilder(manager.clone());
        rebuilder.rebuild(&session.id).await.unwrap();
        assert!(manager.get_session(&session.id).is_some());
    }
}
