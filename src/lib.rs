#![forbid(unsafe_code)]

//! # MT5 Gateway Core
//!
//! Client-side connection core for an MT5-compatible broker gateway:
//! request/response multiplexing over a single wire connection, pub/sub
//! event routing, connection supervision with automatic reconnection,
//! a retry/circuit-breaker/rate-limit fault shell, session authorization,
//! and pure translators between broker payloads and typed trading entities.
//!
//! ## Call path
//!
//! A caller goes through the [`agent::AgentFacade`]: session validation and
//! permission check ([`session`]), rate limiting ([`rate_limit`]), circuit
//! breaking ([`circuit_breaker`]), retry ([`retry`]), and finally the
//! [`transport::TransportMultiplexer`]. Connection lifecycle and automatic
//! reconnection are owned separately by [`supervisor::ConnectionSupervisor`].
//! Server-pushed events are fanned out by [`router::EventRouter`]. Wire
//! payloads are translated to and from typed entities by [`domain`].
//!
//! ## Quick start
//!
//! ```
//! use mt5_gateway_core::{Backoff, Jitter, RetryPolicy};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! async fn flaky(attempts: Arc<AtomicUsize>) -> Result<(), mt5_gateway_core::GatewayError<std::io::Error>> {
//!     let n = attempts.fetch_add(1, Ordering::Relaxed);
//!     if n < 2 {
//!         Err(mt5_gateway_core::GatewayError::Inner(std::io::Error::new(
//!             std::io::ErrorKind::Other,
//!             "transient failure",
//!         )))
//!     } else {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let attempts = Arc::new(AtomicUsize::new(0));
//!     let retry = RetryPolicy::builder()
//!         .max_attempts(3)
//!         .unwrap()
//!         .backoff(Backoff::exponential(Duration::from_millis(200)))
//!         .with_jitter(Jitter::full())
//!         .build();
//!
//!     retry.execute(|| flaky(attempts.clone())).await.unwrap();
//! }
//! ```

mod adaptive;
mod backoff;
mod circuit_breaker;
mod circuit_breaker_registry;
mod clock;
mod error;
mod jitter;
mod retry;
mod sleeper;
mod timeout;

pub mod agent;
pub mod config;
pub mod domain;
pub mod rate_limit;
pub mod router;
pub mod session;
pub mod supervisor;
pub mod telemetry;
pub mod transport;

// Re-exports: the fault-shell primitives (C1/C2), shared across every
// higher-level module above.
pub use adaptive::Adaptive;
pub use backoff::Backoff;
pub use circuit_breaker::{BreakerEvent, BreakerStats, CircuitBreakerConfig, CircuitBreakerPolicy, CircuitState};
pub use circuit_breaker_registry::CircuitBreakerRegistry;
pub use clock::{Clock, MonotonicClock};
pub use error::{codes, ErrorCode, GatewayError, WireError};
pub use jitter::Jitter;
pub use retry::{AttemptRecord, BuildError, RetryCondition, RetryOutcome, RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use timeout::{TimeoutError, TimeoutPolicy, MAX_TIMEOUT};

pub mod prelude;
