//! Dual sliding-window rate limiter keyed by (client, operation class).

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use {dashmap::DashMap, tracing::debug};

use webgate_protocol::OperationClass;

const HOUR_WINDOW: Duration = Duration::from_secs(3600);
const CLEANUP_EVERY_CHECKS: u64 = 512;

/// Limits applied to every (client, class) bucket.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitSettings {
    /// Requests allowed within the short window.
    pub requests: usize,
    /// Short window length.
    pub window: Duration,
    /// Requests allowed within the rolling hour.
    pub hourly_requests: usize,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests: 60,
            window: Duration::from_secs(60),
            hourly_requests: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    client: String,
    class: OperationClass,
}

/// Timestamps of allowed requests. Denied requests are not recorded, so the
/// window counts equal the number of allowed requests inside each window.
#[derive(Debug, Default)]
struct Bucket {
    minute: VecDeque<Instant>,
    hour: VecDeque<Instant>,
}

impl Bucket {
    fn prune(&mut self, now: Instant, window: Duration) {
        while self
            .minute
            .front()
            .is_some_and(|t| now.duration_since(*t) >= window)
        {
            self.minute.pop_front();
        }
        while self
            .hour
            .front()
            .is_some_and(|t| now.duration_since(*t) >= HOUR_WINDOW)
        {
            self.hour.pop_front();
        }
    }
}

/// Process-wide limiter; buckets are created lazily and swept periodically.
pub struct RateLimiter {
    settings: RateLimitSettings,
    buckets: DashMap<BucketKey, Bucket>,
    checks_seen: AtomicU64,
}

impl RateLimiter {
    #[must_use]
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            buckets: DashMap::new(),
            checks_seen: AtomicU64::new(0),
        }
    }

    /// Returns `true` when the request is allowed. An allowed request is
    /// recorded in both windows; a denied one leaves them untouched.
    pub fn check(&self, client: &str, class: OperationClass) -> bool {
        self.check_at(client, class, Instant::now())
    }

    pub(crate) fn check_at(&self, client: &str, class: OperationClass, now: Instant) -> bool {
        let key = BucketKey {
            client: client.to_string(),
            class,
        };
        let allowed = {
            let mut bucket = self.buckets.entry(key).or_default();
            bucket.prune(now, self.settings.window);

            let allowed = bucket.minute.len() < self.settings.requests
                && bucket.hour.len() < self.settings.hourly_requests;
            if allowed {
                bucket.minute.push_back(now);
                bucket.hour.push_back(now);
            }
            allowed
        };

        if !allowed {
            debug!(client, class = %class, "rate limit exceeded");
        }
        self.cleanup_if_needed(now);
        allowed
    }

    /// Current (short-window, hour-window) counts for a key.
    #[must_use]
    pub fn counts(&self, client: &str, class: OperationClass) -> (usize, usize) {
        self.counts_at(client, class, Instant::now())
    }

    fn counts_at(&self, client: &str, class: OperationClass, now: Instant) -> (usize, usize) {
        let key = BucketKey {
            client: client.to_string(),
            class,
        };
        match self.buckets.get_mut(&key) {
            Some(mut bucket) => {
                bucket.prune(now, self.settings.window);
                (bucket.minute.len(), bucket.hour.len())
            },
            None => (0, 0),
        }
    }

    /// Drop all state for a client (used when a client disconnects for good).
    pub fn forget_client(&self, client: &str) {
        self.buckets.retain(|key, _| key.client != client);
    }

    fn cleanup_if_needed(&self, now: Instant) {
        let seen = self.checks_seen.fetch_add(1, Ordering::Relaxed) + 1;
        if !seen.is_multiple_of(CLEANUP_EVERY_CHECKS) {
            return;
        }
        self.buckets.retain(|_, bucket| {
            bucket
                .hour
                .back()
                .is_some_and(|t| now.duration_since(*t) < HOUR_WINDOW)
        });
    }
}
