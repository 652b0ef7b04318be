//! Per-operation-class circuit breaker.
//!
//! State machine: CLOSED → OPEN when the failure fraction inside the rolling
//! monitoring window crosses the threshold (with a minimum request count),
//! OPEN → HALF_OPEN after the cool-down, HALF_OPEN → CLOSED on a successful
//! probe and back to OPEN on a failed one.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use {
    dashmap::DashMap,
    serde::{Deserialize, Serialize},
    tracing::{debug, info, warn},
};

use webgate_protocol::OperationClass;

/// Tuning for every breaker cell.
#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    /// Failure fraction at which the breaker opens.
    pub failure_threshold: f64,
    /// Outcomes required inside the window before the threshold applies.
    pub min_requests: usize,
    /// Rolling monitoring window.
    pub window: Duration,
    /// Time in OPEN before a probe is let through.
    pub cooldown: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 0.5,
            min_requests: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Read-only view for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub successes: usize,
    pub failures: usize,
}

struct Cell {
    state: BreakerState,
    /// (when, succeeded) outcomes inside the monitoring window.
    outcomes: VecDeque<(Instant, bool)>,
    last_transition: Instant,
    /// A HALF_OPEN probe is in flight; hold further calls until its outcome.
    probe_in_flight: bool,
}

/// One breaker, keyed externally by operation class.
pub struct CircuitBreaker {
    settings: BreakerSettings,
    cell: Mutex<Cell>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            cell: Mutex::new(Cell {
                state: BreakerState::Closed,
                outcomes: VecDeque::new(),
                last_transition: Instant::now(),
                probe_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Cell> {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a call may proceed right now. The first allowed call after the
    /// cool-down is the HALF_OPEN probe.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    pub(crate) fn allow_at(&self, now: Instant) -> bool {
        let mut cell = self.lock();
        match cell.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                if now.duration_since(cell.last_transition) >= self.settings.cooldown {
                    cell.state = BreakerState::HalfOpen;
                    cell.last_transition = now;
                    cell.probe_in_flight = true;
                    debug!("circuit breaker half-open, allowing probe");
                    true
                } else {
                    false
                }
            },
            BreakerState::HalfOpen => {
                if cell.probe_in_flight {
                    false
                } else {
                    cell.probe_in_flight = true;
                    true
                }
            },
        }
    }

    pub fn record_success(&self) {
        self.record_at(true, Instant::now());
    }

    pub fn record_failure(&self) {
        self.record_at(false, Instant::now());
    }

    pub(crate) fn record_at(&self, success: bool, now: Instant) {
        let mut cell = self.lock();
        prune(&mut cell.outcomes, now, self.settings.window);
        cell.outcomes.push_back((now, success));

        match cell.state {
            BreakerState::HalfOpen => {
                cell.probe_in_flight = false;
                if success {
                    cell.state = BreakerState::Closed;
                    cell.last_transition = now;
                    cell.outcomes.clear();
                    info!("circuit breaker closed after successful probe");
                } else {
                    cell.state = BreakerState::Open;
                    cell.last_transition = now;
                    warn!("circuit breaker re-opened after failed probe");
                }
            },
            BreakerState::Closed => {
                let total = cell.outcomes.len();
                let failures = cell.outcomes.iter().filter(|(_, ok)| !ok).count();
                if total >= self.settings.min_requests
                    && (failures as f64 / total as f64) >= self.settings.failure_threshold
                {
                    cell.state = BreakerState::Open;
                    cell.last_transition = now;
                    warn!(failures, total, "circuit breaker opened");
                }
            },
            BreakerState::Open => {},
        }
    }

    /// Operator control: trip the breaker immediately.
    pub fn force_open(&self) {
        let mut cell = self.lock();
        cell.state = BreakerState::Open;
        cell.last_transition = Instant::now();
        cell.probe_in_flight = false;
        warn!("circuit breaker forced open");
    }

    /// Operator control: close the breaker and clear its window.
    pub fn force_close(&self) {
        let mut cell = self.lock();
        cell.state = BreakerState::Closed;
        cell.last_transition = Instant::now();
        cell.outcomes.clear();
        cell.probe_in_flight = false;
        info!("circuit breaker forced closed");
    }

    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let cell = self.lock();
        let successes = cell.outcomes.iter().filter(|(_, ok)| *ok).count();
        BreakerSnapshot {
            state: cell.state,
            successes,
            failures: cell.outcomes.len() - successes,
        }
    }
}

fn prune(outcomes: &mut VecDeque<(Instant, bool)>, now: Instant, window: Duration) {
    while outcomes
        .front()
        .is_some_and(|(t, _)| now.duration_since(*t) >= window)
    {
        outcomes.pop_front();
    }
}

/// Process-wide registry, one cell per operation class.
pub struct BreakerRegistry {
    settings: BreakerSettings,
    cells: DashMap<OperationClass, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    #[must_use]
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            cells: DashMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, class: OperationClass) -> Arc<CircuitBreaker> {
        self.cells
            .entry(class)
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.settings)))
            .clone()
    }

    /// Snapshot of every instantiated cell, for the status surface.
    #[must_use]
    pub fn snapshots(&self) -> Vec<(OperationClass, BreakerSnapshot)> {
        self.cells
            .iter()
            .map(|entry| (*entry.key(), entry.value().snapshot()))
            .collect()
    }
}
