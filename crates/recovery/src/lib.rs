//! Error recovery: per-operation-class circuit breakers and the strategy
//! engine that retries, rebuilds contexts, falls back, or breaks the circuit.

pub mod breaker;
pub mod engine;

pub use {
    breaker::{BreakerRegistry, BreakerSettings, BreakerSnapshot, BreakerState, CircuitBreaker},
    engine::{ContextRebuilder, RecoveryEngine, RecoveryOutcome, RecoveryStrategy, RetryPolicy},
};
