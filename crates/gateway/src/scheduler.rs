//! Execution scheduling: a global concurrency cap with priority queueing,
//! per-client caps, deadlines, and disconnect cancellation.

use std::{
    cmp::Ordering as CmpOrdering,
    collections::BinaryHeap,
    future::Future,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    dashmap::DashMap,
    serde::Serialize,
    tokio::sync::{Semaphore, oneshot},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use webgate_protocol::{ErrorCode, GatewayError, OperationClass};

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub max_concurrency: usize,
    pub per_client_concurrency: usize,
    pub default_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            per_client_concurrency: 4,
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// What a submitted operation is tagged with.
#[derive(Debug, Clone)]
pub struct OpTag {
    pub client_id: String,
    pub session_id: Option<String>,
    pub class: OperationClass,
    pub priority: u8,
    pub timeout: Duration,
}

/// Scheduling overhead reported back to the caller.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SchedTimings {
    #[serde(rename = "queueMs")]
    pub queue_ms: u64,
    #[serde(rename = "execMs")]
    pub exec_ms: u64,
}

struct Waiter {
    priority: u8,
    seq: u64,
    tx: oneshot::Sender<()>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for Waiter {}
impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: higher priority first, then earlier submission.
        self.priority
            .cmp(&other.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

struct SlotState {
    available: usize,
    queue: BinaryHeap<Waiter>,
}

/// Bounds global in-flight operations; excess submissions queue in priority
/// order with submission-order ties.
pub struct ExecutionScheduler {
    settings: SchedulerSettings,
    slots: Mutex<SlotState>,
    submit_seq: AtomicU64,
    per_client: DashMap<String, Arc<Semaphore>>,
    cancel_tokens: DashMap<String, CancellationToken>,
    shutting_down: AtomicBool,
}

impl ExecutionScheduler {
    #[must_use]
    pub fn new(settings: SchedulerSettings) -> Self {
        Self {
            settings,
            slots: Mutex::new(SlotState {
                available: settings.max_concurrency,
                queue: BinaryHeap::new(),
            }),
            submit_seq: AtomicU64::new(0),
            per_client: DashMap::new(),
            cancel_tokens: DashMap::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.settings.default_timeout
    }

    /// Stop admitting work and drain what is already queued or running.
    /// Operations get `grace` to finish; anything still in flight afterwards
    /// is cancelled through its client token.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutting_down.store(true, Ordering::SeqCst);

        let deadline = Instant::now() + grace;
        loop {
            let drained = {
                let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
                slots.queue.is_empty() && slots.available == self.settings.max_concurrency
            };
            if drained {
                debug!("scheduler drained");
                return;
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        warn!(
            grace_ms = grace.as_millis() as u64,
            "scheduler drain grace expired, cancelling remaining operations"
        );
        for entry in self.cancel_tokens.iter() {
            entry.value().cancel();
        }
    }

    /// Cancel every queued and in-flight operation for a client.
    pub fn cancel_client(&self, client_id: &str) {
        if let Some((_, token)) = self.cancel_tokens.remove(client_id) {
            debug!(client_id, "cancelling client operations");
            token.cancel();
        }
        self.per_client.remove(client_id);
    }

    fn client_token(&self, client_id: &str) -> CancellationToken {
        self.cancel_tokens
            .entry(client_id.to_string())
            .or_default()
            .clone()
    }

    fn client_semaphore(&self, client_id: &str) -> Arc<Semaphore> {
        self.per_client
            .entry(client_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.settings.per_client_concurrency)))
            .clone()
    }

    /// Run an operation under the concurrency budget with a deadline.
    ///
    /// Deadline expiry cancels the in-flight driver call (the future is
    /// dropped) and fails with `TIMEOUT`; the session stays usable.
    pub async fn run<T, Fut>(
        self: &Arc<Self>,
        tag: OpTag,
        op: Fut,
    ) -> (Result<T, GatewayError>, SchedTimings)
    where
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let enqueued = Instant::now();

        if self.shutting_down.load(Ordering::SeqCst) {
            return (
                Err(GatewayError::new(
                    ErrorCode::ServiceUnavailable,
                    "gateway is shutting down",
                )
                .with_context("operationClass", tag.class.as_str())),
                queue_only(enqueued),
            );
        }

        let token = self.client_token(&tag.client_id);

        // Per-client cap first: one client saturating its own budget never
        // consumes global slots while blocked.
        let client_sem = self.client_semaphore(&tag.client_id);
        let client_permit = tokio::select! {
            permit = client_sem.acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => {
                    return (Err(cancelled_error(&tag)), queue_only(enqueued));
                },
            },
            () = token.cancelled() => {
                return (Err(cancelled_error(&tag)), queue_only(enqueued));
            },
        };

        let slot = tokio::select! {
            slot = self.acquire_slot(tag.priority) => slot,
            () = token.cancelled() => {
                drop(client_permit);
                return (Err(cancelled_error(&tag)), queue_only(enqueued));
            },
        };

        let queue_wait = enqueued.elapsed();
        let exec_start = Instant::now();

        let result = tokio::select! {
            result = tokio::time::timeout(tag.timeout, op) => match result {
                Ok(inner) => inner,
                Err(_) => {
                    warn!(
                        class = %tag.class,
                        timeout_ms = tag.timeout.as_millis() as u64,
                        "operation deadline expired"
                    );
                    Err(GatewayError::new(
                        ErrorCode::Timeout,
                        format!("operation timed out after {}ms", tag.timeout.as_millis()),
                    )
                    .with_context("operationClass", tag.class.as_str()))
                },
            },
            () = token.cancelled() => Err(cancelled_error(&tag)),
        };

        drop(slot);
        drop(client_permit);

        let exec = exec_start.elapsed();
        (
            result,
            SchedTimings {
                queue_ms: queue_wait.as_millis() as u64,
                exec_ms: exec.as_millis() as u64,
            },
        )
    }

    async fn acquire_slot(self: &Arc<Self>, priority: u8) -> SlotGuard {
        let rx = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            if slots.available > 0 {
                slots.available -= 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                slots.queue.push(Waiter {
                    priority,
                    seq: self.submit_seq.fetch_add(1, Ordering::SeqCst),
                    tx,
                });
                Some(rx)
            }
        };

        if let Some(rx) = rx {
            // A dropped sender means the scheduler is gone; treat as granted
            // so shutdown never deadlocks.
            let _ = rx.await;
        }

        SlotGuard {
            scheduler: Arc::clone(self),
        }
    }

    fn release_slot(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // Hand the slot straight to the best waiter, if any.
        while let Some(waiter) = slots.queue.pop() {
            if waiter.tx.send(()).is_ok() {
                return;
            }
            // Waiter vanished (cancelled); try the next one.
        }
        slots.available += 1;
    }
}

struct SlotGuard {
    scheduler: Arc<ExecutionScheduler>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.scheduler.release_slot();
    }
}

fn cancelled_error(tag: &OpTag) -> GatewayError {
    GatewayError::new(
        ErrorCode::InternalError,
        "operation cancelled by client disconnect",
    )
    .with_context("operationClass", tag.class.as_str())
    .non_recoverable()
}

fn queue_only(enqueued: Instant) -> SchedTimings {
    SchedTimings {
        queue_ms: enqueued.elapsed().as_millis() as u64,
        exec_ms: 0,
    }
}
