//! Structured events emitted by every gateway component for observability.

use crate::circuit_breaker::CircuitState;
use std::time::Duration;

/// A single observability event. Every component emits one of these on a
/// state transition, admission decision, or terminal outcome.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Retry(RetryEvent),
    CircuitBreaker(CircuitBreakerEvent),
    RateLimit(RateLimitEvent),
    Transport(TransportEvent),
    Router(RouterEvent),
    Supervisor(SupervisorEvent),
    Session(SessionEvent),
}

#[derive(Debug, Clone)]
pub enum RetryEvent {
    Attempt { attempt: usize, delay: Duration },
    Exhausted { total_attempts: usize, total_duration: Duration },
    Aborted { attempt: usize },
}

#[derive(Debug, Clone)]
pub enum CircuitBreakerEvent {
    Opened { id: String, failure_count: usize },
    HalfOpened { id: String },
    Closed { id: String },
    Rejected { id: String, state: CircuitState },
}

#[derive(Debug, Clone)]
pub enum RateLimitEvent {
    Allowed { rule: String, key: String, remaining: u32 },
    Denied { rule: String, key: String, wait: Duration },
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    Sent { channel: &'static str, id: String },
    Received { channel: &'static str, id: String },
    PendingTimedOut { id: String },
    ConnectionLost { details: String },
}

#[derive(Debug, Clone)]
pub enum RouterEvent {
    Dispatched { event_type: String, handler_count: usize },
    QueueOverflow { event_type: String, total_dropped: u64 },
    HandlerFailed { event_type: String, subscription_id: u64, error: String },
}

#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    StateChanged { from: &'static str, to: &'static str },
    HeartbeatMissed { consecutive_misses: u32 },
    ReconnectScheduled { attempt: usize, delay: Duration },
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Authenticated { principal: String, provider: &'static str },
    AuthenticationFailed { reason: String },
    PermissionDenied { principal: String, action: String },
    SessionExpired { session_id: String },
}

impl std::fmt::Display for GatewayEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
