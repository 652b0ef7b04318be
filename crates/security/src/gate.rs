//! Domain access gate with interactive permission prompts.
//!
//! A domain already allowlisted (process-wide or for the session) is granted
//! immediately. Loopback hosts auto-approve when configured. Anything else
//! raises a permission request: a notification goes out on the controlling
//! transport and the calling request waits on its own oneshot (never a
//! global lock) until an operator resolves it or the deadline auto-denies.

use std::{collections::HashMap, collections::HashSet, sync::Arc, time::Duration};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    tokio::sync::{RwLock, oneshot},
    tracing::{debug, info, warn},
};

/// Hosts treated as loopback for auto-approval.
const LOOPBACK_DOMAINS: &[&str] = &["localhost", "127.0.0.1", "::1"];

/// Outcome of a domain access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainDecision {
    Granted,
    Denied,
    TimedOut,
}

/// Lifecycle state of a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Pending,
    Granted,
    Denied,
}

/// A permission request as broadcast to clients and listed for operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: String,
    pub domain: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub state: PermissionState,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// Receives permission requests for delivery to the controlling transport.
pub trait PermissionNotifier: Send + Sync {
    fn permission_requested(&self, request: &PermissionRequest);
}

struct PendingPermission {
    request: PermissionRequest,
    tx: oneshot::Sender<bool>,
}

/// Process-wide domain gate.
pub struct DomainGate {
    allowed_domains: Vec<String>,
    auto_approve_localhost: bool,
    timeout: Duration,
    pending: RwLock<HashMap<String, PendingPermission>>,
    notifier: RwLock<Option<Arc<dyn PermissionNotifier>>>,
}

impl DomainGate {
    #[must_use]
    pub fn new(
        allowed_domains: Vec<String>,
        auto_approve_localhost: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            allowed_domains,
            auto_approve_localhost,
            timeout,
            pending: RwLock::new(HashMap::new()),
            notifier: RwLock::new(None),
        }
    }

    /// Wire the transport-side notifier. Called once at startup.
    pub async fn set_notifier(&self, notifier: Arc<dyn PermissionNotifier>) {
        *self.notifier.write().await = Some(notifier);
    }

    /// Check whether `domain` may be accessed by `session_id`, prompting the
    /// operator when no allowlist covers it. The caller caches a grant in the
    /// session's approved set.
    pub async fn check_domain_access(
        &self,
        domain: &str,
        session_id: &str,
        session_allowed: &HashSet<String>,
    ) -> DomainDecision {
        if self.allowed_statically(domain, session_allowed) {
            return DomainDecision::Granted;
        }

        if self.auto_approve_localhost && LOOPBACK_DOMAINS.contains(&domain) {
            debug!(domain, session_id, "auto-approving loopback domain");
            return DomainDecision::Granted;
        }

        let (id, rx) = self.raise(domain, session_id).await;
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(true)) => {
                info!(domain, session_id, "domain access granted");
                DomainDecision::Granted
            },
            Ok(Ok(false)) => {
                info!(domain, session_id, "domain access denied");
                DomainDecision::Denied
            },
            Ok(Err(_)) => {
                warn!(domain, session_id, "permission channel closed");
                self.expire(&id).await;
                DomainDecision::Denied
            },
            Err(_) => {
                warn!(domain, session_id, "permission request timed out, auto-denying");
                self.expire(&id).await;
                DomainDecision::TimedOut
            },
        }
    }

    /// Allowlist-only check (no prompting).
    #[must_use]
    pub fn allowed_statically(&self, domain: &str, session_allowed: &HashSet<String>) -> bool {
        session_allowed.contains(domain)
            || self
                .allowed_domains
                .iter()
                .any(|pattern| domain_matches(domain, pattern))
            || session_allowed
                .iter()
                .any(|pattern| domain_matches(domain, pattern))
    }

    /// Resolve a pending request. Returns `false` when the id is unknown
    /// (already resolved or expired).
    pub async fn resolve(&self, id: &str, granted: bool) -> bool {
        let Some(pending) = self.pending.write().await.remove(id) else {
            warn!(id, "permission resolve: no pending request");
            return false;
        };
        let _ = pending.tx.send(granted);
        debug!(id, granted, "permission resolved");
        true
    }

    /// Snapshot of requests still awaiting resolution.
    pub async fn pending_requests(&self) -> Vec<PermissionRequest> {
        self.pending
            .read()
            .await
            .values()
            .map(|p| p.request.clone())
            .collect()
    }

    async fn raise(&self, domain: &str, session_id: &str) -> (String, oneshot::Receiver<bool>) {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let request = PermissionRequest {
            id: id.clone(),
            domain: domain.to_string(),
            session_id: session_id.to_string(),
            state: PermissionState::Pending,
            created_at: now,
            deadline: now
                + chrono::Duration::from_std(self.timeout).unwrap_or(chrono::Duration::seconds(30)),
        };

        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(id.clone(), PendingPermission {
            request: request.clone(),
            tx,
        });

        if let Some(notifier) = self.notifier.read().await.as_ref() {
            notifier.permission_requested(&request);
        } else {
            warn!(domain, "permission requested but no notifier is wired");
        }

        (id, rx)
    }

    async fn expire(&self, id: &str) {
        self.pending.write().await.remove(id);
    }
}

/// Match a domain against an allowlist pattern. `*.example.com` matches any
/// subdomain and the bare domain itself.
fn domain_matches(domain: &str, pattern: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix("*.") {
        domain == suffix || domain.ends_with(&format!(".{suffix}"))
    } else {
        domain == pattern
    }
}

/// Extract the host of a URL, lowercased.
#[must_use]
pub fn domain_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

/// Domain syntax accepted by session options: `label.tld` (any depth) or a
/// loopback name, optionally with a leading `*.` wildcard.
#[must_use]
pub fn is_valid_domain(domain: &str) -> bool {
    let bare = domain.strip_prefix("*.").unwrap_or(domain);
    if LOOPBACK_DOMAINS.contains(&bare) {
        return true;
    }
    let mut labels = bare.split('.');
    let Some(_first) = labels.next() else {
        return false;
    };
    let rest: Vec<&str> = labels.collect();
    if rest.is_empty() {
        return false;
    }
    let valid_label = |label: &str| {
        !label.is_empty()
            && label.len() <= 63
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    };
    let tld_ok = rest
        .last()
        .is_some_and(|tld| tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic()));
    bare.split('.').all(valid_label) && tld_ok
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn gate(allowed: &[&str], auto_localhost: bool, timeout: Duration) -> DomainGate {
        DomainGate::new(
            allowed.iter().map(|s| s.to_string()).collect(),
            auto_localhost,
            timeout,
        )
    }

    #[tokio::test]
    async fn allowlisted_domain_granted_immediately() {
        let gate = gate(&["example.com"], false, Duration::from_millis(10));
        let decision = gate
            .check_domain_access("example.com", "s1", &HashSet::new())
            .await;
        assert_eq!(decision, DomainDecision::Granted);
    }

    #[tokio::test]
    async fn session_approved_domain_granted() {
        let gate = gate(&[], false, Duration::from_millis(10));
        let approved = HashSet::from(["blocked.test".to_string()]);
        let decision = gate.check_domain_access("blocked.test", "s1", &approved).await;
        assert_eq!(decision, DomainDecision::Granted);
    }

    #[tokio::test]
    async fn wildcard_pattern_matches_subdomains() {
        let gate = gate(&["*.example.com"], false, Duration::from_millis(10));
        let empty = HashSet::new();
        assert_eq!(
            gate.check_domain_access("sub.example.com", "s1", &empty).await,
            DomainDecision::Granted
        );
        assert_eq!(
            gate.check_domain_access("example.com", "s1", &empty).await,
            DomainDecision::Granted
        );
        assert_eq!(
            gate.check_domain_access("notexample.com", "s1", &empty).await,
            DomainDecision::TimedOut
        );
    }

    #[tokio::test]
    async fn loopback_auto_approval_respects_flag() {
        let on = gate(&[], true, Duration::from_millis(10));
        assert_eq!(
            on.check_domain_access("localhost", "s1", &HashSet::new()).await,
            DomainDecision::Granted
        );

        let off = gate(&[], false, Duration::from_millis(10));
        assert_eq!(
            off.check_domain_access("localhost", "s1", &HashSet::new()).await,
            DomainDecision::TimedOut
        );
    }

    #[tokio::test]
    async fn unlisted_domain_times_out_and_clears_pending() {
        let gate = gate(&[], false, Duration::from_millis(20));
        let decision = gate
            .check_domain_access("blocked.test", "s1", &HashSet::new())
            .await;
        assert_eq!(decision, DomainDecision::TimedOut);
        assert!(gate.pending_requests().await.is_empty());
    }

    #[tokio::test]
    async fn resolve_grants_a_waiting_request() {
        let gate = Arc::new(gate(&[], false, Duration::from_secs(5)));

        let resolver = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                // Wait until the request is visible, then grant it.
                loop {
                    let pending = gate.pending_requests().await;
                    if let Some(req) = pending.first() {
                        assert_eq!(req.domain, "blocked.test");
                        assert_eq!(req.state, PermissionState::Pending);
                        assert!(gate.resolve(&req.id, true).await);
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };

        let decision = gate
            .check_domain_access("blocked.test", "s1", &HashSet::new())
            .await;
        assert_eq!(decision, DomainDecision::Granted);
        resolver.await.unwrap();
    }

    #[tokio::test]
    async fn resolve_denies_a_waiting_request() {
        let gate = Arc::new(gate(&[], false, Duration::from_secs(5)));
        let resolver = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                loop {
                    let pending = gate.pending_requests().await;
                    if let Some(req) = pending.first() {
                        assert!(gate.resolve(&req.id, false).await);
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };
        let decision = gate
            .check_domain_access("blocked.test", "s1", &HashSet::new())
            .await;
        assert_eq!(decision, DomainDecision::Denied);
        resolver.await.unwrap();
    }

    #[tokio::test]
    async fn resolve_unknown_id_is_noop() {
        let gate = gate(&[], false, Duration::from_millis(10));
        assert!(!gate.resolve("no-such-id", true).await);
    }

    #[test]
    fn domain_of_extracts_host() {
        assert_eq!(domain_of("https://Example.COM/path"), Some("example.com".into()));
        assert_eq!(domain_of("http://localhost:3000/"), Some("localhost".into()));
        assert_eq!(domain_of("not a url"), None);
    }

    #[test]
    fn domain_syntax_validation() {
        assert!(is_valid_domain("example.com"));
        assert!(is_valid_domain("sub.example.co"));
        assert!(is_valid_domain("localhost"));
        assert!(is_valid_domain("*.example.com"));
        assert!(!is_valid_domain("example"));
        assert!(!is_valid_domain("exa mple.com"));
        assert!(!is_valid_domain("example.c0m"));
        assert!(!is_valid_domain("-bad.com"));
        assert!(!is_valid_domain(""));
    }
}
