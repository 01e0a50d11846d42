//! Structured telemetry for the gateway's resilience and connection layers.
//!
//! Every component emits a [`events::GatewayEvent`] on state transitions and
//! admission decisions. A [`sinks::TelemetrySink`] consumes them — logging,
//! aggregating in memory, or fanning out to multiple sinks. Emission is
//! always best-effort and never blocks or fails the call being observed.

pub mod events;
pub mod sinks;

pub use events::{
    CircuitBreakerEvent, GatewayEvent, RateLimitEvent, RetryEvent, RouterEvent, SessionEvent,
    SupervisorEvent, TransportEvent,
};
pub use sinks::{emit_best_effort, FallbackSink, LogSink, MemorySink, MulticastSink, NullSink, StreamingSink, TelemetrySink};
