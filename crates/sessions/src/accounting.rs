//! Admission-time resource accounting.
//!
//! Accountants are read-mostly: registration reserves a per-session quota
//! against the process budget and rejects at admission; snapshots are cheap
//! atomic reads. Nothing is metered mid-flight.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use {serde::Serialize, sysinfo::System, tracing::warn};

use webgate_protocol::{ErrorCode, GatewayError};

/// System memory usage percent above which admissions are refused outright.
const SYSTEM_MEMORY_CEILING_PERCENT: u8 = 90;

/// Budgets, in MiB.
#[derive(Debug, Clone, Copy)]
pub struct AccountantSettings {
    pub memory_limit_mb: u64,
    pub session_memory_mb: u64,
    pub session_disk_mb: u64,
    /// Also refuse admissions under host memory pressure. Off in tests so
    /// results do not depend on the machine running them.
    pub enforce_system_ceiling: bool,
}

impl Default for AccountantSettings {
    fn default() -> Self {
        Self {
            memory_limit_mb: 2048,
            session_memory_mb: 256,
            session_disk_mb: 512,
            enforce_system_ceiling: true,
        }
    }
}

/// Cheap snapshot for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct AccountantSnapshot {
    pub sessions: usize,
    pub memory_reserved_mb: u64,
    pub memory_limit_mb: u64,
    pub disk_reserved_mb: u64,
}

/// Memory, CPU, and disk ledgers behind one admission call.
pub struct ResourceAccountants {
    settings: AccountantSettings,
    sessions: AtomicUsize,
    memory_reserved_mb: AtomicU64,
    disk_reserved_mb: AtomicU64,
}

impl ResourceAccountants {
    #[must_use]
    pub fn new(settings: AccountantSettings) -> Self {
        Self {
            settings,
            sessions: AtomicUsize::new(0),
            memory_reserved_mb: AtomicU64::new(0),
            disk_reserved_mb: AtomicU64::new(0),
        }
    }

    /// Reserve one session's quotas. Fails with `RESOURCE_EXHAUSTED` when the
    /// budget is spent or the host is under memory pressure.
    pub fn register(&self) -> Result<(), GatewayError> {
        let quota = self.settings.session_memory_mb;
        let limit = self.settings.memory_limit_mb;

        let reserve = self
            .memory_reserved_mb
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |reserved| {
                (reserved + quota <= limit).then_some(reserved + quota)
            });
        if reserve.is_err() {
            warn!(limit_mb = limit, "memory budget exhausted, rejecting session");
            return Err(GatewayError::new(
                ErrorCode::ResourceExhausted,
                "memory budget exhausted",
            )
            .with_context("memory_limit_mb", limit));
        }

        if self.settings.enforce_system_ceiling
            && let Some(percent) = system_memory_percent()
            && percent >= SYSTEM_MEMORY_CEILING_PERCENT
        {
            self.memory_reserved_mb.fetch_sub(quota, Ordering::SeqCst);
            warn!(percent, "host memory pressure, rejecting session");
            return Err(GatewayError::new(
                ErrorCode::ResourceExhausted,
                "host memory usage too high",
            )
            .with_context("system_memory_percent", percent));
        }

        self.disk_reserved_mb
            .fetch_add(self.settings.session_disk_mb, Ordering::SeqCst);
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Release a session's quotas. Safe to call exactly once per successful
    /// `register`.
    pub fn unregister(&self) {
        self.sessions.fetch_sub(1, Ordering::SeqCst);
        self.memory_reserved_mb
            .fetch_sub(self.settings.session_memory_mb, Ordering::SeqCst);
        self.disk_reserved_mb
            .fetch_sub(self.settings.session_disk_mb, Ordering::SeqCst);
    }

    #[must_use]
    pub fn snapshot(&self) -> AccountantSnapshot {
        AccountantSnapshot {
            sessions: self.sessions.load(Ordering::Relaxed),
            memory_reserved_mb: self.memory_reserved_mb.load(Ordering::Relaxed),
            memory_limit_mb: self.settings.memory_limit_mb,
            disk_reserved_mb: self.disk_reserved_mb.load(Ordering::Relaxed),
        }
    }
}

/// Current system memory usage as a percentage, `None` when unreadable.
fn system_memory_percent() -> Option<u8> {
    let mut sys = System::new();
    sys.refresh_memory();
    let total = sys.total_memory();
    if total == 0 {
        return None;
    }
    let percent = (sys.used_memory() as f64 / total as f64 * 100.0) as u8;
    Some(percent.min(100))
}
