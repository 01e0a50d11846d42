//! Convenient re-exports covering the full gateway call path.
pub use crate::{
    agent::AgentFacade,
    backoff::Backoff,
    circuit_breaker::{BreakerStats, CircuitBreakerConfig, CircuitBreakerPolicy, CircuitState},
    config::GatewayConfig,
    domain::{
        Account, Candle, Order, OrderSide, OrderStatus, OrderType, Position, TimeInForce, Tick, Timeframe, Trade,
    },
    error::GatewayError,
    jitter::Jitter,
    rate_limit::{Decision, RateRule, RuleSet},
    retry::{BuildError, RetryPolicy, RetryPolicyBuilder},
    router::{EventRouter, EventRouterConfig, RoutedEvent, SubscriptionSpec},
    session::{AuthMode, AuthPayload, PeerInfo, RiskLevel, SessionManager, PERMISSION_WILDCARD},
    supervisor::{ConnectionState, ConnectionSupervisor, SupervisorConfig},
    telemetry::{GatewayEvent, LogSink, MemorySink, NullSink, TelemetrySink},
    transport::{ChannelKind, Frame, TransportMultiplexer},
};
