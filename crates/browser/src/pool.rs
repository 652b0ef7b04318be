//! Warm pool of reusable browser contexts keyed by fingerprint.
//!
//! Acquire scans the free list in insertion order for a fingerprint match,
//! creates a pooled context while under the ceiling, and hands out a
//! *temporary* context (never returned to the pool) once saturated. Release
//! resets the context before returning it; a context that fails reset, hits
//! its reuse threshold, or is temporary gets destroyed instead.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use {
    serde::Serialize,
    tokio::{sync::Mutex, task::JoinHandle},
    tracing::{debug, info, warn},
};

use crate::{
    error::BrowserError,
    factory::{ContextFactory, ContextHandle},
    types::ContextFingerprint,
};

/// Pool sizing and reuse policy.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Floor the maintainer warms back up to.
    pub min: usize,
    /// Ceiling on pooled (available + active) contexts.
    pub max: usize,
    /// Idle time after which an available context is evicted.
    pub max_idle: Duration,
    /// Maintainer timer period.
    pub cleanup_interval: Duration,
    /// Pre-warm `min` contexts at startup.
    pub warmup_on_start: bool,
    /// Use count after which a released context is destroyed.
    pub reuse_threshold: u32,
    /// When false every release destroys the context.
    pub pooling_enabled: bool,
    /// Fingerprint used for warmed contexts.
    pub warm_fingerprint: ContextFingerprint,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min: 1,
            max: 8,
            max_idle: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
            warmup_on_start: false,
            reuse_threshold: 25,
            pooling_enabled: true,
            warm_fingerprint: ContextFingerprint::default(),
        }
    }
}

/// A checked-out (or pooled) context with its bookkeeping.
pub struct PooledContext {
    pub pool_id: String,
    pub created_at: Instant,
    pub last_used: Instant,
    pub use_count: u32,
    pub fingerprint: ContextFingerprint,
    /// Created because the pool was saturated; destroyed on release.
    pub temporary: bool,
    pub handle: ContextHandle,
}

/// Counters for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub available: usize,
    pub active: usize,
    pub created_total: u64,
    pub reused_total: u64,
    pub destroyed_total: u64,
}

/// The pool. One per process; shared by the session manager.
pub struct ContextPool {
    settings: PoolSettings,
    factory: Arc<dyn ContextFactory>,
    available: Mutex<VecDeque<PooledContext>>,
    active: AtomicUsize,
    created_total: AtomicU64,
    reused_total: AtomicU64,
    destroyed_total: AtomicU64,
    shutdown: AtomicBool,
    maintainer: Mutex<Option<JoinHandle<()>>>,
}

impl ContextPool {
    #[must_use]
    pub fn new(settings: PoolSettings, factory: Arc<dyn ContextFactory>) -> Arc<Self> {
        Arc::new(Self {
            settings,
            factory,
            available: Mutex::new(VecDeque::new()),
            active: AtomicUsize::new(0),
            created_total: AtomicU64::new(0),
            reused_total: AtomicU64::new(0),
            destroyed_total: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            maintainer: Mutex::new(None),
        })
    }

    /// Warm up (when configured) and start the maintainer timer.
    pub async fn start(self: &Arc<Self>) -> Result<(), BrowserError> {
        if self.settings.warmup_on_start {
            self.warm_to_min().await;
        }

        let pool = Arc::clone(self);
        let interval = self.settings.cleanup_interval;
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.tick().await; // immediate first tick
            while !pool.shutdown.load(Ordering::Relaxed) {
                timer.tick().await;
                pool.maintain().await;
            }
        });
        *self.maintainer.lock().await = Some(handle);

        info!(
            min = self.settings.min,
            max = self.settings.max,
            warmed = self.settings.warmup_on_start,
            "context pool started"
        );
        Ok(())
    }

    /// Check a context out of the pool.
    pub async fn acquire(
        self: &Arc<Self>,
        fingerprint: &ContextFingerprint,
    ) -> Result<PooledContext, BrowserError> {
        {
            let mut available = self.available.lock().await;
            // Insertion order: the least recently released compatible context
            // wins.
            if let Some(idx) = available
                .iter()
                .position(|ctx| &ctx.fingerprint == fingerprint)
            {
                let mut ctx = available
                    .remove(idx)
                    .ok_or_else(|| BrowserError::Cdp("free list index vanished".into()))?;
                ctx.use_count += 1;
                ctx.last_used = Instant::now();
                self.active.fetch_add(1, Ordering::Relaxed);
                self.reused_total.fetch_add(1, Ordering::Relaxed);
                debug!(pool_id = %ctx.pool_id, use_count = ctx.use_count, "reusing pooled context");
                return Ok(ctx);
            }
        }

        let total = self.active.load(Ordering::Relaxed) + self.available.lock().await.len();
        let temporary = total >= self.settings.max;
        if temporary {
            warn!(
                max = self.settings.max,
                "pool saturated, creating temporary context"
            );
        }

        let ctx = self.create(fingerprint, temporary).await?;
        self.active.fetch_add(1, Ordering::Relaxed);
        Ok(ctx)
    }

    /// Return a context. Reset-and-pool when it is still reusable, destroy
    /// otherwise, then let the maintainer rebalance.
    pub async fn release(self: &Arc<Self>, mut ctx: PooledContext) {
        self.active.fetch_sub(1, Ordering::Relaxed);

        let destroy_reason = if ctx.temporary {
            Some("temporary")
        } else if ctx.use_count >= self.settings.reuse_threshold {
            Some("reuse threshold reached")
        } else if !self.settings.pooling_enabled {
            Some("pooling disabled")
        } else {
            None
        };

        if let Some(reason) = destroy_reason {
            debug!(pool_id = %ctx.pool_id, reason, "destroying context on release");
            self.destroy(ctx).await;
        } else if let Err(e) = self.factory.reset(&ctx.handle).await {
            warn!(pool_id = %ctx.pool_id, error = %e, "context reset failed, destroying");
            self.destroy(ctx).await;
        } else {
            ctx.last_used = Instant::now();
            self.available.lock().await.push_back(ctx);
        }

        self.maintain().await;
    }

    /// Evict idle contexts above the floor and warm back up to it.
    pub async fn maintain(self: &Arc<Self>) {
        let now = Instant::now();
        let mut evicted = Vec::new();
        {
            let mut available = self.available.lock().await;
            // Front holds the oldest-idle contexts.
            while available.len() > self.settings.min {
                let idle_expired = available
                    .front()
                    .is_some_and(|ctx| now.duration_since(ctx.last_used) > self.settings.max_idle);
                if !idle_expired {
                    break;
                }
                if let Some(ctx) = available.pop_front() {
                    evicted.push(ctx);
                }
            }
        }
        for ctx in evicted {
            debug!(pool_id = %ctx.pool_id, "evicting idle context");
            self.destroy(ctx).await;
        }

        if !self.shutdown.load(Ordering::Relaxed) {
            self.warm_to_min().await;
        }
    }

    /// Destroy everything and stop the maintainer. Active contexts are closed
    /// by their owning sessions.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.maintainer.lock().await.take() {
            handle.abort();
        }
        let mut available = self.available.lock().await;
        while let Some(ctx) = available.pop_front() {
            self.factory.destroy(ctx.handle).await;
            self.destroyed_total.fetch_add(1, Ordering::Relaxed);
        }
        info!("context pool shut down");
    }

    /// Destroy a checked-out context without pooling it (crashed contexts,
    /// session teardown during saturation).
    pub async fn discard(&self, ctx: PooledContext) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.destroy_inner(ctx).await;
    }

    #[must_use]
    pub async fn stats(&self) -> PoolStats {
        PoolStats {
            available: self.available.lock().await.len(),
            active: self.active.load(Ordering::Relaxed),
            created_total: self.created_total.load(Ordering::Relaxed),
            reused_total: self.reused_total.load(Ordering::Relaxed),
            destroyed_total: self.destroyed_total.load(Ordering::Relaxed),
        }
    }

    async fn create(
        &self,
        fingerprint: &ContextFingerprint,
        temporary: bool,
    ) -> Result<PooledContext, BrowserError> {
        let handle = self.factory.create(fingerprint).await?;
        self.created_total.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        Ok(PooledContext {
            pool_id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            last_used: now,
            use_count: 1,
            fingerprint: fingerprint.clone(),
            temporary,
            handle,
        })
    }

    async fn warm_to_min(self: &Arc<Self>) {
        loop {
            {
                let available = self.available.lock().await;
                if available.len() + self.active.load(Ordering::Relaxed) >= self.settings.min {
                    return;
                }
            }
            match self.create(&self.settings.warm_fingerprint.clone(), false).await {
                Ok(mut ctx) => {
                    // Warmed contexts have not been used yet.
                    ctx.use_count = 0;
                    self.available.lock().await.push_back(ctx);
                },
                Err(e) => {
                    warn!(error = %e, "failed to warm context");
                    return;
                },
            }
        }
    }

    async fn destroy(&self, ctx: PooledContext) {
        self.destroy_inner(ctx).await;
    }

    async fn destroy_inner(&self, ctx: PooledContext) {
        self.factory.destroy(ctx.handle).await;
        self.destroyed_total.fetch_add(1, Ordering::Relaxed);
    }
}
