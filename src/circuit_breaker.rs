//! Circuit breaker: lock-free Closed/Open/HalfOpen state machine guarding a
//! downstream call. Trips on the *ratio* of failures across a trailing
//! window of call outcomes (a `callRing`) once that window has filled past
//! `volume_threshold`, not on a raw consecutive-failure count — a single
//! success sprinkled among failures doesn't reset the picture, only ages the
//! oldest sample out of the ring.

use crate::clock::{Clock, MonotonicClock};
use crate::error::GatewayError;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// EWMA smoothing factor applied to each observed call duration.
const RESPONSE_TIME_ALPHA: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Transition/rejection events a breaker emits, for telemetry sinks.
#[derive(Debug, Clone)]
pub enum BreakerEvent {
    Opened { failure_count: usize },
    HalfOpened,
    Closed,
    Rejected { state: CircuitState },
}

#[derive(Clone)]
pub struct CircuitBreakerConfig {
    /// Minimum number of calls the trailing ring must hold before the
    /// failure ratio is evaluated at all; below this, the breaker stays
    /// closed regardless of how bad the ratio looks.
    pub volume_threshold: usize,
    /// Percentage (0-100) of failures within the ring at or above which the
    /// breaker trips.
    pub error_threshold_percent: f64,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: usize,
    /// When `false`, the breaker never opens; calls always execute.
    pub enabled: bool,
}

impl CircuitBreakerConfig {
    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::default() }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            volume_threshold: 10,
            error_threshold_percent: 50.0,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
            enabled: true,
        }
    }
}

/// A trailing, fixed-capacity ring of call outcomes (`true` = success), used
/// to compute the failure ratio the breaker trips on.
struct CallRing {
    outcomes: VecDeque<bool>,
    capacity: usize,
    failures: usize,
}

impl CallRing {
    fn new(capacity: usize) -> Self {
        Self { outcomes: VecDeque::with_capacity(capacity.max(1)), capacity: capacity.max(1), failures: 0 }
    }

    fn record(&mut self, success: bool) {
        if self.outcomes.len() == self.capacity {
            if let Some(evicted) = self.outcomes.pop_front() {
                if !evicted {
                    self.failures -= 1;
                }
            }
        }
        self.outcomes.push_back(success);
        if !success {
            self.failures += 1;
        }
    }

    fn clear(&mut self) {
        self.outcomes.clear();
        self.failures = 0;
    }

    fn volume(&self) -> usize {
        self.outcomes.len()
    }

    fn failure_ratio_percent(&self) -> f64 {
        if self.outcomes.is_empty() {
            0.0
        } else {
            (self.failures as f64 / self.outcomes.len() as f64) * 100.0
        }
    }
}

/// Cumulative counters for observability; unlike the call ring, these never
/// shrink or reset on a state transition.
#[derive(Debug, Clone, Copy, Default)]
pub struct BreakerStats {
    pub total_calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub rejected: u64,
    pub transitions: u64,
}

struct CircuitBreakerState {
    state: AtomicU8,
    call_ring: Mutex<CallRing>,
    opened_at_millis: AtomicU64,
    half_open_calls: AtomicUsize,
    avg_response_time_micros: AtomicU64,
    total_calls: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejected: AtomicU64,
    transitions: AtomicU64,
}

#[derive(Clone)]
pub struct CircuitBreakerPolicy {
    state: Arc<CircuitBreakerState>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    on_event: Option<Arc<dyn Fn(BreakerEvent) + Send + Sync>>,
}

impl CircuitBreakerPolicy {
    /// Convenience constructor: trip once `volume_threshold` calls have been
    /// observed and `error_threshold_percent` of them failed.
    pub fn new(volume_threshold: usize, error_threshold_percent: f64, recovery_timeout: Duration) -> Self {
        Self::with_config(CircuitBreakerConfig {
            volume_threshold,
            error_threshold_percent,
            recovery_timeout,
            ..CircuitBreakerConfig::default()
        })
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Arc::new(CircuitBreakerState {
                state: AtomicU8::new(STATE_CLOSED),
                call_ring: Mutex::new(CallRing::new(config.volume_threshold)),
                opened_at_millis: AtomicU64::new(0),
                half_open_calls: AtomicUsize::new(0),
                avg_response_time_micros: AtomicU64::new(0),
                total_calls: AtomicU64::new(0),
                successes: AtomicU64::new(0),
                failures: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                transitions: AtomicU64::new(0),
            }),
            config,
            clock: Arc::new(MonotonicClock::default()),
            on_event: None,
        }
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_half_open_limit(mut self, limit: usize) -> Self {
        self.config.half_open_max_calls = limit;
        self
    }

    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(BreakerEvent) + Send + Sync + 'static,
    {
        self.on_event = Some(Arc::new(callback));
        self
    }

    pub fn state(&self) -> CircuitState {
        match self.state.state.load(Ordering::Acquire) {
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    /// EWMA estimate of call duration, in microseconds, across all executions.
    pub fn avg_response_time(&self) -> Duration {
        Duration::from_micros(self.state.avg_response_time_micros.load(Ordering::Relaxed))
    }

    /// Current failure count within the trailing call ring (not cumulative).
    pub fn failure_count(&self) -> usize {
        self.state.call_ring.lock().unwrap_or_else(|p| p.into_inner()).failures
    }

    pub fn stats(&self) -> BreakerStats {
        BreakerStats {
            total_calls: self.state.total_calls.load(Ordering::Relaxed),
            successes: self.state.successes.load(Ordering::Relaxed),
            failures: self.state.failures.load(Ordering::Relaxed),
            rejected: self.state.rejected.load(Ordering::Relaxed),
            transitions: self.state.transitions.load(Ordering::Relaxed),
        }
    }

    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, GatewayError<E>>
    where
        T: Send,
        E: std::fmt::Debug + std::fmt::Display + Send + Sync + 'static,
        Fut: Future<Output = Result<T, GatewayError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        self.execute_with_fallback(operation, None::<fn() -> T>).await
    }

    /// Execute `operation`; if the breaker rejects the call, invoke `fallback`
    /// (if provided) instead of surfacing `CircuitOpen`.
    pub async fn execute_with_fallback<T, E, Fut, Op, F>(
        &self,
        mut operation: Op,
        fallback: Option<F>,
    ) -> Result<T, GatewayError<E>>
    where
        T: Send,
        E: std::fmt::Debug + std::fmt::Display + Send + Sync + 'static,
        Fut: Future<Output = Result<T, GatewayError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
        F: FnOnce() -> T,
    {
        loop {
            let current_state = self.state.state.load(Ordering::Acquire);

            match current_state {
                STATE_OPEN => {
                    let opened_at = self.state.opened_at_millis.load(Ordering::Acquire);
                    let now = self.clock.now_millis();
                    let elapsed = now.saturating_sub(opened_at);

                    if elapsed >= self.config.recovery_timeout.as_millis() as u64 {
                        match self.state.state.compare_exchange(
                            STATE_OPEN,
                            STATE_HALF_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        ) {
                            Ok(_) => {
                                tracing::info!("circuit breaker -> half-open");
                                self.state.half_open_calls.store(1, Ordering::Release);
                                self.state.transitions.fetch_add(1, Ordering::Relaxed);
                                self.emit(BreakerEvent::HalfOpened);
                                break;
                            }
                            Err(STATE_HALF_OPEN) => continue,
                            Err(STATE_CLOSED) => break,
                            Err(_) => unreachable!("invalid breaker state transition"),
                        }
                    } else {
                        self.state.rejected.fetch_add(1, Ordering::Relaxed);
                        self.emit(BreakerEvent::Rejected { state: CircuitState::Open });
                        return self.rejected_or_fallback(fallback, elapsed);
                    }
                }
                STATE_HALF_OPEN => {
                    let current = self.state.half_open_calls.fetch_add(1, Ordering::AcqRel);
                    if current >= self.config.half_open_max_calls {
                        self.state.half_open_calls.fetch_sub(1, Ordering::Release);
                        self.state.rejected.fetch_add(1, Ordering::Relaxed);
                        self.emit(BreakerEvent::Rejected { state: CircuitState::HalfOpen });
                        return self.rejected_or_fallback(fallback, Duration::from_millis(0));
                    }
                    tracing::debug!(
                        in_flight = current + 1,
                        max = self.config.half_open_max_calls,
                        "circuit breaker: half-open probe"
                    );
                    break;
                }
                STATE_CLOSED => break,
                _ => unreachable!("invalid breaker state"),
            }
        }

        let was_half_open = self.state.state.load(Ordering::Acquire) == STATE_HALF_OPEN;
        let call_start = Instant::now();
        let result = operation().await;
        self.record_response_time(call_start.elapsed());
        self.state.total_calls.fetch_add(1, Ordering::Relaxed);

        if was_half_open {
            self.state.half_open_calls.fetch_sub(1, Ordering::Release);
        }

        match &result {
            Ok(_) => {
                self.state.successes.fetch_add(1, Ordering::Relaxed);
                self.on_success();
            }
            Err(_) => {
                self.state.failures.fetch_add(1, Ordering::Relaxed);
                self.on_failure();
            }
        }

        result
    }

    fn rejected_or_fallback<T, E, F>(&self, fallback: Option<F>, open_duration: Duration) -> Result<T, GatewayError<E>>
    where
        F: FnOnce() -> T,
    {
        match fallback {
            Some(f) => Ok(f()),
            None => Err(GatewayError::CircuitOpen { failure_count: self.failure_count(), open_duration }),
        }
    }

    fn record_response_time(&self, sample: Duration) {
        let sample_micros = sample.as_micros() as u64;
        let prev = self.state.avg_response_time_micros.load(Ordering::Relaxed);
        let updated = if prev == 0 {
            sample_micros
        } else {
            ((1.0 - RESPONSE_TIME_ALPHA) * prev as f64 + RESPONSE_TIME_ALPHA * sample_micros as f64) as u64
        };
        self.state.avg_response_time_micros.store(updated, Ordering::Relaxed);
    }

    fn on_success(&self) {
        let current = self.state.state.load(Ordering::Acquire);
        if !self.config.enabled {
            return;
        }

        match current {
            STATE_HALF_OPEN => {
                if self
                    .state
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.state.call_ring.lock().unwrap_or_else(|p| p.into_inner()).clear();
                    self.state.opened_at_millis.store(0, Ordering::Release);
                    self.state.transitions.fetch_add(1, Ordering::Relaxed);
                    tracing::info!("circuit breaker -> closed");
                    self.emit(BreakerEvent::Closed);
                }
            }
            STATE_CLOSED => {
                self.state.call_ring.lock().unwrap_or_else(|p| p.into_inner()).record(true);
            }
            _ => {}
        }
    }

    fn on_failure(&self) {
        let current = self.state.state.load(Ordering::Acquire);

        match current {
            STATE_HALF_OPEN => {
                if self
                    .state
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.state.opened_at_millis.store(self.clock.now_millis(), Ordering::Release);
                    self.state.transitions.fetch_add(1, Ordering::Relaxed);
                    let failures = self.failure_count();
                    tracing::warn!(failures, "circuit breaker: probe failed -> open");
                    self.emit(BreakerEvent::Opened { failure_count: failures });
                }
            }
            STATE_CLOSED => {
                if !self.config.enabled {
                    return;
                }
                let (volume, ratio, failures) = {
                    let mut ring = self.state.call_ring.lock().unwrap_or_else(|p| p.into_inner());
                    ring.record(false);
                    (ring.volume(), ring.failure_ratio_percent(), ring.failures)
                };

                if volume >= self.config.volume_threshold
                    && ratio >= self.config.error_threshold_percent
                    && self
                        .state
                        .state
                        .compare_exchange(STATE_CLOSED, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    self.state.opened_at_millis.store(self.clock.now_millis(), Ordering::Release);
                    self.state.transitions.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        failures,
                        volume,
                        ratio,
                        threshold = self.config.error_threshold_percent,
                        "circuit breaker -> open"
                    );
                    self.emit(BreakerEvent::Opened { failure_count: failures });
                }
            }
            _ => {}
        }
    }

    fn emit(&self, event: BreakerEvent) {
        if let Some(cb) = &self.on_event {
            cb(event);
        }
    }
}
