//! End-to-end coverage of the agent call path from outside the crate:
//! session auth -> rate limit -> circuit breaker -> retry -> transport.

use std::sync::Arc;
use std::time::Duration;

use mt5_gateway_core::agent::AgentFacade;
use mt5_gateway_core::domain::cache::SymbolCache;
use mt5_gateway_core::rate_limit::strategies::TokenBucket;
use mt5_gateway_core::rate_limit::store::InMemoryTokenStore;
use mt5_gateway_core::rate_limit::{RateRule, RuleSet};
use mt5_gateway_core::session::{AuthMode, AuthPayload, PassthroughAuth, SessionManager};
use mt5_gateway_core::transport::{ChannelKind, Frame, TransportMultiplexer};
use mt5_gateway_core::{Backoff, CircuitBreakerConfig, CircuitBreakerPolicy, InstantSleeper, RetryPolicy};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

struct LoopbackTransport {
    inbox: AsyncMutex<mpsc::Receiver<Frame>>,
    echo_tx: mpsc::Sender<Frame>,
}

impl LoopbackTransport {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self { inbox: AsyncMutex::new(rx), echo_tx: tx }
    }
}

#[async_trait::async_trait]
impl mt5_gateway_core::transport::WireTransport for LoopbackTransport {
    async fn send(&self, frame: Frame) -> Result<(), mt5_gateway_core::transport::TransportError> {
        let echo_tx = self.echo_tx.clone();
        let response = Frame::response(frame.id.clone(), frame.payload.clone());
        tokio::spawn(async move {
            let _ = echo_tx.send(response).await;
        });
        Ok(())
    }

    async fn recv(&self) -> Result<Frame, mt5_gateway_core::transport::TransportError> {
        self.inbox.lock().await.recv().await.ok_or(mt5_gateway_core::transport::TransportError::ConnectionClosed)
    }
}

#[tokio::test]
async fn a_caller_round_trips_through_the_full_call_path() {
    let mut sessions = SessionManager::new(AuthMode::First, Duration::from_secs(60));
    sessions.register_provider(Arc::new(PassthroughAuth));
    let sessions = Arc::new(sessions);
    let session_id = sessions.authenticate(&AuthPayload::Opaque(vec![]), None).await.unwrap();

    let mut rate_limit = RuleSet::new();
    rate_limit.add_rule(RateRule::new("burst", 1, Arc::new(TokenBucket::new(InMemoryTokenStore::new(), 100.0, 100.0))));

    let breaker = CircuitBreakerPolicy::with_config(CircuitBreakerConfig::default());
    let retry = RetryPolicy::builder()
        .max_attempts(3)
        .unwrap()
        .backoff(Backoff::constant(Duration::from_millis(1)))
        .with_sleeper(InstantSleeper)
        .build();
    let transport = Arc::new(TransportMultiplexer::spawn(LoopbackTransport::new()));
    let cache = Arc::new(SymbolCache::new(16));

    let facade = AgentFacade::new(sessions, rate_limit, breaker, retry, transport, cache, Duration::from_secs(1));

    let reply = facade.call(&session_id, "market.subscribe", serde_json::json!({"symbol": "GBPUSD"})).await.unwrap();
    assert_eq!(reply["symbol"], "GBPUSD");
}

#[tokio::test]
async fn frame_channel_kind_round_trips_through_serde() {
    let frame = Frame::event("quotes", serde_json::json!({"bid": 1.1}));
    assert_eq!(frame.channel, ChannelKind::Sub);
    let raw = serde_json::to_string(&frame).unwrap();
    let back: Frame = serde_json::from_str(&raw).unwrap();
    assert_eq!(back.topic.as_deref(), Some("quotes"));
}
