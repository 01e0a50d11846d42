//! Retry policy: configurable backoff, jitter, retry conditions, and
//! cooperative cancellation via an abort signal.

use crate::backoff::Backoff;
use crate::clock::{Clock, MonotonicClock};
use crate::error::GatewayError;
use crate::jitter::Jitter;
use crate::sleeper::{Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Cap on the number of failures recorded inside `RetryExhausted`.
const MAX_RETRY_FAILURES: usize = 10;

/// Predicate layer deciding whether a given failure is worth retrying.
#[derive(Clone)]
pub enum RetryCondition<E> {
    /// Always retry (subject to `max_attempts`).
    Always,
    /// Retry any `Inner(E)` failure, never the core's own error kinds.
    OnError,
    /// Retry only timeouts.
    OnTimeout,
    /// Retry only connection-family failures.
    OnNetworkError,
    /// Caller-supplied predicate over the error.
    Custom(Arc<dyn Fn(&GatewayError<E>) -> bool + Send + Sync>),
}

impl<E> std::fmt::Debug for RetryCondition<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Always => f.write_str("Always"),
            Self::OnError => f.write_str("OnError"),
            Self::OnTimeout => f.write_str("OnTimeout"),
            Self::OnNetworkError => f.write_str("OnNetworkError"),
            Self::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

impl<E> RetryCondition<E> {
    fn allows(&self, err: &GatewayError<E>) -> bool {
        match self {
            Self::Always => true,
            Self::OnError => matches!(err, GatewayError::Inner(_)),
            Self::OnTimeout => err.is_timeout(),
            Self::OnNetworkError => err.is_connection(),
            Self::Custom(pred) => pred(err),
        }
    }
}

/// Outcome of a single attempt, kept for the caller's observability needs.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub attempt: usize,
    pub started_at: Duration,
    pub duration: Duration,
    pub succeeded: bool,
    pub error_kind: Option<&'static str>,
}

/// Full detail of a retry run: every attempt plus the final result.
#[derive(Debug, Clone)]
pub struct RetryOutcome<T, E> {
    pub ok: bool,
    pub result: Option<T>,
    pub error: Option<GatewayError<E>>,
    pub attempts: Vec<AttemptRecord>,
    pub total_duration: Duration,
}

impl<T: Clone, E: Clone> RetryOutcome<T, E> {
    pub fn final_attempt(&self) -> Option<&AttemptRecord> {
        self.attempts.last()
    }
}

#[derive(Clone)]
pub struct RetryPolicy<E> {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    condition: RetryCondition<E>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
    abort: Option<watch::Receiver<bool>>,
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("condition", &self.condition)
            .finish()
    }
}

impl<E> RetryPolicy<E>
where
    E: std::fmt::Debug + std::fmt::Display + Send + Sync + 'static,
{
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    /// Run `operation` under this policy, returning only the final result.
    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<T, GatewayError<E>>
    where
        T: Send + Clone,
        Fut: Future<Output = Result<T, GatewayError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let outcome = self.execute_detailed(operation).await;
        match outcome.result {
            Some(value) => Ok(value),
            None => Err(outcome.error.expect("failed retry outcome always carries an error")),
        }
    }

    /// Run `operation`, returning the full per-attempt history alongside the
    /// final result.
    pub async fn execute_detailed<T, Fut, Op>(&self, mut operation: Op) -> RetryOutcome<T, E>
    where
        T: Send + Clone,
        Fut: Future<Output = Result<T, GatewayError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let run_start = self.clock.now_millis();
        let mut attempts = Vec::new();
        let mut failures = Vec::new();

        for attempt in 0..self.max_attempts {
            if self.is_aborted() {
                return RetryOutcome {
                    ok: false,
                    result: None,
                    error: Some(GatewayError::Aborted),
                    attempts,
                    total_duration: self.elapsed_since(run_start),
                };
            }

            let attempt_start = self.clock.now_millis();
            let outcome = operation().await;
            let attempt_duration = Duration::from_millis(self.clock.now_millis().saturating_sub(attempt_start));

            match outcome {
                Ok(value) => {
                    attempts.push(AttemptRecord {
                        attempt: attempt + 1,
                        started_at: Duration::from_millis(attempt_start.saturating_sub(run_start)),
                        duration: attempt_duration,
                        succeeded: true,
                        error_kind: None,
                    });
                    return RetryOutcome {
                        ok: true,
                        result: Some(value),
                        error: None,
                        attempts,
                        total_duration: self.elapsed_since(run_start),
                    };
                }
                Err(err) => {
                    attempts.push(AttemptRecord {
                        attempt: attempt + 1,
                        started_at: Duration::from_millis(attempt_start.saturating_sub(run_start)),
                        duration: attempt_duration,
                        succeeded: false,
                        error_kind: Some(err.kind()),
                    });

                    if !self.condition.allows(&err) {
                        return RetryOutcome {
                            ok: false,
                            result: None,
                            error: Some(err),
                            attempts,
                            total_duration: self.elapsed_since(run_start),
                        };
                    }

                    failures.push(err);
                    if failures.len() > MAX_RETRY_FAILURES {
                        let excess = failures.len() - MAX_RETRY_FAILURES;
                        failures.drain(0..excess);
                    }

                    if attempt + 1 >= self.max_attempts {
                        return RetryOutcome {
                            ok: false,
                            result: None,
                            error: Some(GatewayError::RetryExhausted {
                                attempts: self.max_attempts,
                                failures,
                            }),
                            attempts,
                            total_duration: self.elapsed_since(run_start),
                        };
                    }

                    let mut delay = self.backoff.delay(attempt + 1);
                    delay = self.jitter.apply(delay);

                    if !self.sleep_or_abort(delay).await {
                        return RetryOutcome {
                            ok: false,
                            result: None,
                            error: Some(GatewayError::Aborted),
                            attempts,
                            total_duration: self.elapsed_since(run_start),
                        };
                    }
                }
            }
        }

        unreachable!("retry loop always returns within max_attempts iterations")
    }

    fn elapsed_since(&self, start_millis: u64) -> Duration {
        Duration::from_millis(self.clock.now_millis().saturating_sub(start_millis))
    }

    fn is_aborted(&self) -> bool {
        self.abort.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Sleep for `delay`, racing an abort signal if one is configured.
    /// Returns `false` if the abort fired first.
    async fn sleep_or_abort(&self, delay: Duration) -> bool {
        match &self.abort {
            None => {
                self.sleeper.sleep(delay).await;
                true
            }
            Some(rx) => {
                let mut rx = rx.clone();
                tokio::select! {
                    _ = self.sleeper.sleep(delay) => true,
                    _ = rx.changed() => !*rx.borrow(),
                }
            }
        }
    }
}

pub struct RetryPolicyBuilder<E> {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    condition: RetryCondition<E>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
    abort: Option<watch::Receiver<bool>>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum BuildError {
    InvalidMaxAttempts(usize),
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::InvalidMaxAttempts(n) => write!(f, "max_attempts must be > 0 (got {n})"),
        }
    }
}

impl std::error::Error for BuildError {}

impl<E> RetryPolicyBuilder<E>
where
    E: std::fmt::Debug + std::fmt::Display + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::exponential(Duration::from_secs(1)),
            jitter: Jitter::full(),
            condition: RetryCondition::OnError,
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(MonotonicClock::default()),
            abort: None,
        }
    }

    pub fn max_attempts(mut self, attempts: usize) -> Result<Self, BuildError> {
        if attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(attempts));
        }
        self.max_attempts = attempts;
        Ok(self)
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn retry_condition(mut self, condition: RetryCondition<E>) -> Self {
        self.condition = condition;
        self
    }

    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&GatewayError<E>) -> bool + Send + Sync + 'static,
    {
        self.condition = RetryCondition::Custom(Arc::new(predicate));
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn abort_signal(mut self, signal: watch::Receiver<bool>) -> Self {
        self.abort = Some(signal);
        self
    }

    pub fn build(self) -> RetryPolicy<E> {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            condition: self.condition,
            sleeper: self.sleeper,
            clock: self.clock,
            abort: self.abort,
        }
    }
}

impl<E> Default for RetryPolicyBuilder<E>
where
    E: std::fmt::Debug + std::fmt::Display + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
