//! Strategy selection and execution for caught errors.
//!
//! The policy table maps taxonomy codes to strategies; the engine runs the
//! chosen strategy against the operation closure and reports what happened so
//! callers can surface `recovered`/`strategy`/`attempts` alongside the result.

use std::{future::Future, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tracing::{debug, info, warn},
};

use {
    webgate_protocol::{ErrorCode, GatewayError, OperationClass},
};

use crate::breaker::BreakerRegistry;

/// What the engine does about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryStrategy {
    Retry,
    RecreateContext,
    Fallback,
    CircuitBreak,
    None,
}

impl RecoveryStrategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Retry => "RETRY",
            Self::RecreateContext => "RECREATE_CONTEXT",
            Self::Fallback => "FALLBACK",
            Self::CircuitBreak => "CIRCUIT_BREAK",
            Self::None => "NONE",
        }
    }

    /// The policy table.
    #[must_use]
    pub fn for_code(code: ErrorCode) -> Self {
        use ErrorCode::*;
        match code {
            Timeout | NavigationFailed | ElementNotFound | EvaluationFailed => Self::Retry,
            ContextCrashed | PageCrashed => Self::RecreateContext,
            InteractionFailed => Self::Fallback,
            RateLimitExceeded | PermissionTimeout => Self::Retry,
            NetworkError | ServiceUnavailable => Self::Retry,
            ResourceExhausted => Self::CircuitBreak,
            InternalError => Self::Retry,
            _ => Self::None,
        }
    }
}

/// Retry pacing. Attempt counting includes the first try.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (attempt 2 sleeps the initial delay).
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(2);
        let factor = self.multiplier.powi(exponent as i32);
        let delay = self.initial_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }
}

/// Rebuilds a session's browser context in place; implemented by the session
/// manager and injected so this crate stays driver-free.
#[async_trait]
pub trait ContextRebuilder: Send + Sync {
    async fn rebuild(&self, session_id: &str) -> Result<(), GatewayError>;
}

/// What came out of a recovered (or unrecovered) operation.
#[derive(Debug)]
pub struct RecoveryOutcome<T> {
    pub result: Result<T, GatewayError>,
    pub recovered: bool,
    pub strategy: Option<RecoveryStrategy>,
    pub attempts: u32,
}

impl<T> RecoveryOutcome<T> {
    fn first_try(result: Result<T, GatewayError>) -> Self {
        Self {
            result,
            recovered: false,
            strategy: None,
            attempts: 1,
        }
    }
}

/// The engine. One per process, shared by the dispatcher.
pub struct RecoveryEngine {
    retry: RetryPolicy,
    rebuilder: tokio::sync::RwLock<Option<Arc<dyn ContextRebuilder>>>,
    breakers: Arc<BreakerRegistry>,
}

impl RecoveryEngine {
    #[must_use]
    pub fn new(retry: RetryPolicy, breakers: Arc<BreakerRegistry>) -> Self {
        Self {
            retry,
            rebuilder: tokio::sync::RwLock::new(None),
            breakers,
        }
    }

    /// Wire the session manager's rebuilder. Called once at startup.
    pub async fn set_rebuilder(&self, rebuilder: Arc<dyn ContextRebuilder>) {
        *self.rebuilder.write().await = Some(rebuilder);
    }

    /// Run `op`, applying the recovery policy to the first error. `fallback`
    /// is the alternative path for FALLBACK-class failures; operations without
    /// one surface the original error.
    pub async fn run<T, F, Fut, G, GFut>(
        &self,
        class: OperationClass,
        session_id: Option<&str>,
        op: F,
        fallback: Option<G>,
    ) -> RecoveryOutcome<T>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, GatewayError>> + Send,
        G: Fn() -> GFut + Send + Sync,
        GFut: Future<Output = Result<T, GatewayError>> + Send,
    {
        let first = op().await;
        let err = match first {
            Ok(value) => return RecoveryOutcome::first_try(Ok(value)),
            Err(e) => e,
        };

        if !err.recoverable {
            debug!(code = %err.code, "error marked non-recoverable, bypassing recovery");
            return RecoveryOutcome::first_try(Err(err));
        }

        let strategy = RecoveryStrategy::for_code(err.code);
        debug!(code = %err.code, strategy = strategy.as_str(), "selecting recovery strategy");

        match strategy {
            RecoveryStrategy::Retry => self.retry_loop(err, &op).await,
            RecoveryStrategy::RecreateContext => {
                self.recreate_and_retry(err, session_id, &op).await
            },
            RecoveryStrategy::Fallback => match fallback {
                Some(alt) => match alt().await {
                    Ok(value) => {
                        info!(class = %class, "fallback path recovered the operation");
                        RecoveryOutcome {
                            result: Ok(value),
                            recovered: true,
                            strategy: Some(RecoveryStrategy::Fallback),
                            attempts: 2,
                        }
                    },
                    Err(alt_err) => RecoveryOutcome {
                        result: Err(alt_err),
                        recovered: false,
                        strategy: Some(RecoveryStrategy::Fallback),
                        attempts: 2,
                    },
                },
                None => RecoveryOutcome {
                    result: Err(err),
                    recovered: false,
                    strategy: Some(RecoveryStrategy::Fallback),
                    attempts: 1,
                },
            },
            RecoveryStrategy::CircuitBreak => {
                warn!(class = %class, code = %err.code, "forcing circuit open to prevent cascade");
                self.breakers.get(class).force_open();
                RecoveryOutcome {
                    result: Err(err),
                    recovered: false,
                    strategy: Some(RecoveryStrategy::CircuitBreak),
                    attempts: 1,
                }
            },
            RecoveryStrategy::None => RecoveryOutcome {
                result: Err(err),
                recovered: false,
                strategy: Some(RecoveryStrategy::None),
                attempts: 1,
            },
        }
    }

    async fn retry_loop<T, F, Fut>(&self, first_err: GatewayError, op: &F) -> RecoveryOutcome<T>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, GatewayError>> + Send,
    {
        let mut last_err = first_err;
        let mut attempts = 1;
        while attempts < self.retry.max_attempts {
            attempts += 1;
            tokio::time::sleep(self.retry.delay_before(attempts)).await;
            debug!(attempt = attempts, "retrying operation");
            match op().await {
                Ok(value) => {
                    return RecoveryOutcome {
                        result: Ok(value),
                        recovered: true,
                        strategy: Some(RecoveryStrategy::Retry),
                        attempts,
                    };
                },
                Err(e) => last_err = e,
            }
        }
        RecoveryOutcome {
            result: Err(last_err),
            recovered: false,
            strategy: Some(RecoveryStrategy::Retry),
            attempts,
        }
    }

    async fn recreate_and_retry<T, F, Fut>(
        &self,
        first_err: GatewayError,
        session_id: Option<&str>,
        op: &F,
    ) -> RecoveryOutcome<T>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, GatewayError>> + Send,
    {
        let Some(session_id) = session_id else {
            return RecoveryOutcome {
                result: Err(GatewayError::new(
                    ErrorCode::InternalError,
                    "context recreation requires a session id",
                )
                .with_context("cause", first_err.code.as_str())),
                recovered: false,
                strategy: Some(RecoveryStrategy::RecreateContext),
                attempts: 1,
            };
        };

        let rebuilder = self.rebuilder.read().await.clone();
        let Some(rebuilder) = rebuilder else {
            return RecoveryOutcome {
                result: Err(GatewayError::new(
                    ErrorCode::InternalError,
                    "no context rebuilder is wired",
                )),
                recovered: false,
                strategy: Some(RecoveryStrategy::RecreateContext),
                attempts: 1,
            };
        };

        info!(session_id, "recreating browser context after crash");
        if let Err(rebuild_err) = rebuilder.rebuild(session_id).await {
            return RecoveryOutcome {
                result: Err(rebuild_err),
                recovered: false,
                strategy: Some(RecoveryStrategy::RecreateContext),
                attempts: 1,
            };
        }

        match op().await {
            Ok(value) => RecoveryOutcome {
                result: Ok(value),
                recovered: true,
                strategy: Some(RecoveryStrategy::RecreateContext),
                attempts: 2,
            },
            Err(e) => RecoveryOutcome {
                result: Err(e),
                recovered: false,
                strategy: Some(RecoveryStrategy::RecreateContext),
                attempts: 2,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::breaker::{BreakerSettings, BreakerState};

    fn engine() -> RecoveryEngine {
        RecoveryEngine::new(
            RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                multiplier: 2.0,
                max_delay: Duration::from_millis(4),
            },
            Arc::new(BreakerRegistry::new(BreakerSettings::default())),
        )
    }

    fn no_fallback<T: Send + 'static>()
    -> Option<fn() -> std::pin::Pin<Box<dyn Future<Output = Result<T, GatewayError>> + Send>>>
    {
        None
    }

    #[test]
    fn policy_table_matches_the_taxonomy() {
        use ErrorCode::*;
        assert_eq!(RecoveryStrategy::for_code(Timeout), RecoveryStrategy::Retry);
        assert_eq!(
            RecoveryStrategy::for_code(NavigationFailed),
            RecoveryStrategy::Retry
        );
        assert_eq!(
            RecoveryStrategy::for_code(ContextCrashed),
            RecoveryStrategy::RecreateContext
        );
        assert_eq!(
            RecoveryStrategy::for_code(PageCrashed),
            RecoveryStrategy::RecreateContext
        );
        assert_eq!(
            RecoveryStrategy::for_code(InteractionFailed),
            RecoveryStrategy::Fallback
        );
        assert_eq!(
            RecoveryStrategy::for_code(ResourceExhausted),
            RecoveryStrategy::CircuitBreak
        );
        assert_eq!(
            RecoveryStrategy::for_code(DomainDenied),
            RecoveryStrategy::None
        );
        assert_eq!(
            RecoveryStrategy::for_code(OutOfMemory),
            RecoveryStrategy::None
        );
        assert_eq!(
            RecoveryStrategy::for_code(InternalError),
            RecoveryStrategy::Retry
        );
        assert_eq!(
            RecoveryStrategy::for_code(MethodNotFound),
            RecoveryStrategy::None
        );
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(300),
        };
        assert_eq!(policy.delay_before(2), Duration::from_millis(100));
        assert_eq!(policy.delay_before(3), Duration::from_millis(200));
        assert_eq!(policy.delay_before(4), Duration::from_millis(300)); // capped
        assert_eq!(policy.delay_before(5), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn success_on_first_try_reports_one_attempt() {
        let engine = engine();
        let outcome = engine
            .run(
                OperationClass::Navigation,
                None,
                || async { Ok::<_, GatewayError>(42) },
                no_fallback(),
            )
            .await;
        assert_eq!(outcome.result.unwrap(), 42);
        assert!(!outcome.recovered);
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.strategy.is_none());
    }

    #[tokio::test]
    async fn retry_recovers_transient_timeout() {
        let engine = engine();
        let calls = AtomicU32::new(0);
        let outcome = engine
            .run(
                OperationClass::Navigation,
                None,
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(GatewayError::new(ErrorCode::Timeout, "slow page"))
                        } else {
                            Ok("loaded")
                        }
                    }
                },
                no_fallback(),
            )
            .await;
        assert_eq!(outcome.result.unwrap(), "loaded");
        assert!(outcome.recovered);
        assert_eq!(outcome.strategy, Some(RecoveryStrategy::Retry));
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn retry_exhaustion_surfaces_last_error() {
        let engine = engine();
        let outcome = engine
            .run(
                OperationClass::Navigation,
                None,
                || async { Err::<(), _>(GatewayError::new(ErrorCode::Timeout, "still slow")) },
                no_fallback(),
            )
            .await;
        let err = outcome.result.unwrap_err();
        assert_eq!(err.code, ErrorCode::Timeout);
        assert!(!outcome.recovered);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn non_recoverable_error_bypasses_recovery() {
        let engine = engine();
        let calls = AtomicU32::new(0);
        let outcome = engine
            .run(
                OperationClass::Navigation,
                None,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        Err::<(), _>(
                            GatewayError::new(ErrorCode::Timeout, "gave up").non_recoverable(),
                        )
                    }
                },
                no_fallback(),
            )
            .await;
        assert!(outcome.result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.attempts, 1);
    }

    struct RecordingRebuilder {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ContextRebuilder for RecordingRebuilder {
        async fn rebuild(&self, _session_id: &str) -> Result<(), GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn context_crash_recreates_and_retries_once() {
        let engine = engine();
        let rebuilder = Arc::new(RecordingRebuilder {
            calls: AtomicU32::new(0),
        });
        engine.set_rebuilder(rebuilder.clone()).await;

        let calls = AtomicU32::new(0);
        let outcome = engine
            .run(
                OperationClass::Navigation,
                Some("sess-1"),
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err(GatewayError::new(ErrorCode::ContextCrashed, "target crashed"))
                        } else {
                            Ok("ok")
                        }
                    }
                },
                no_fallback(),
            )
            .await;
        assert_eq!(outcome.result.unwrap(), "ok");
        assert!(outcome.recovered);
        assert_eq!(outcome.strategy, Some(RecoveryStrategy::RecreateContext));
        assert_eq!(outcome.attempts, 2);
        assert_eq!(rebuilder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recreate_without_session_id_fails_cleanly() {
        let engine = engine();
        let outcome = engine
            .run(
                OperationClass::Navigation,
                None,
                || async { Err::<(), _>(GatewayError::new(ErrorCode::PageCrashed, "boom")) },
                no_fallback(),
            )
            .await;
        let err = outcome.result.unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalError);
        assert_eq!(err.context["cause"], "PAGE_CRASHED");
        assert!(!outcome.recovered);
    }

    #[tokio::test]
    async fn fallback_path_taken_for_interaction_failures() {
        let engine = engine();
        let outcome = engine
            .run(
                OperationClass::Interaction,
                None,
                || async {
                    Err::<&str, _>(GatewayError::new(ErrorCode::InteractionFailed, "no hit"))
                },
                Some(|| async { Ok("clicked via js") }),
            )
            .await;
        assert_eq!(outcome.result.unwrap(), "clicked via js");
        assert!(outcome.recovered);
        assert_eq!(outcome.strategy, Some(RecoveryStrategy::Fallback));
    }

    #[tokio::test]
    async fn resource_exhaustion_forces_circuit_open() {
        let breakers = Arc::new(BreakerRegistry::new(BreakerSettings::default()));
        let engine = RecoveryEngine::new(RetryPolicy::default(), breakers.clone());
        let outcome = engine
            .run(
                OperationClass::Capture,
                None,
                || async {
                    Err::<(), _>(GatewayError::new(ErrorCode::ResourceExhausted, "no memory"))
                },
                no_fallback(),
            )
            .await;
        assert!(outcome.result.is_err());
        assert_eq!(outcome.strategy, Some(RecoveryStrategy::CircuitBreak));
        assert_eq!(
            breakers.get(OperationClass::Capture).state(),
            BreakerState::Open
        );
    }
}
