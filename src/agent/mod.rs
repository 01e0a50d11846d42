//! Agent Facade: the single call path every outbound request goes through —
//! `validate session -> check permission -> rate limit -> circuit breaker ->
//! retry -> transport -> translate`. Composes C1 (retry), C2 (circuit
//! breaker), C3 (rate limit), C4 (transport), C6's symbol cache, C7
//! (session), and C9 (domain translators) without reimplementing any of
//! their logic.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;

use crate::circuit_breaker::CircuitBreakerPolicy;
use crate::domain::cache::SymbolCache;
use crate::domain::types::{Account, Candle, Order, Position, Trade};
use crate::error::GatewayError;
use crate::rate_limit::RuleSet;
use crate::retry::RetryPolicy;
use crate::session::{AuthContext, SessionManager};
use crate::transport::multiplexer::TransportError;
use crate::transport::TransportMultiplexer;

/// Maps a transport-layer failure onto the gateway's unified error taxonomy.
fn map_transport_error(err: TransportError) -> GatewayError<String> {
    match err {
        TransportError::ConnectionClosed => GatewayError::Connection { details: "transport connection closed".into() },
        TransportError::ResponseLost => GatewayError::Connection { details: "response lost before delivery".into() },
        TransportError::TimedOut => GatewayError::Timeout { elapsed: Duration::default(), timeout: Duration::default() },
        TransportError::Wire(details) => GatewayError::Internal { details },
    }
}

fn validation(details: impl Into<String>) -> GatewayError<String> {
    GatewayError::Validation { details: details.into() }
}

fn translate_array<T>(
    data: &JsonValue,
    field: &str,
    translate_one: impl Fn(&JsonValue) -> Result<T, GatewayError<String>>,
) -> Result<Vec<T>, GatewayError<String>> {
    data.get(field)
        .and_then(JsonValue::as_array)
        .ok_or_else(|| validation(format!("missing or non-array field '{field}'")))?
        .iter()
        .map(translate_one)
        .collect()
}

/// The fixed, non-generic pipeline every agent call rides through.
pub struct AgentFacade {
    sessions: Arc<SessionManager>,
    rate_limit: RuleSet,
    breaker: CircuitBreakerPolicy,
    retry: RetryPolicy<String>,
    transport: Arc<TransportMultiplexer>,
    cache: Arc<SymbolCache>,
    default_timeout: Duration,
}

impl AgentFacade {
    pub fn new(
        sessions: Arc<SessionManager>,
        rate_limit: RuleSet,
        breaker: CircuitBreakerPolicy,
        retry: RetryPolicy<String>,
        transport: Arc<TransportMultiplexer>,
        cache: Arc<SymbolCache>,
        default_timeout: Duration,
    ) -> Self {
        Self { sessions, rate_limit, breaker, retry, transport, cache, default_timeout }
    }

    /// Run one call through the full pipeline, returning the raw reply
    /// payload untranslated. Kept for actions with no dedicated typed
    /// operation below.
    pub async fn call(
        &self,
        session_id: &str,
        action: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError<String>> {
        let ctx = self.validated_context(session_id, action).await?;
        self.admit(&ctx, action).await?;
        self.dispatch_raw(action, payload).await
    }

    pub async fn execute_trade(&self, session_id: &str, order: JsonValue) -> Result<Trade, GatewayError<String>> {
        self.run(session_id, "trade.execute", order, |data| Trade::from_payload(data)).await
    }

    pub async fn close_position(&self, session_id: &str, position_id: &str) -> Result<Trade, GatewayError<String>> {
        let payload = serde_json::json!({"position_id": position_id});
        self.run(session_id, "position.close", payload, |data| Trade::from_payload(data)).await
    }

    pub async fn cancel_order(&self, session_id: &str, order_id: &str) -> Result<Order, GatewayError<String>> {
        let payload = serde_json::json!({"order_id": order_id});
        self.run(session_id, "order.cancel", payload, |data| Order::from_payload(data)).await
    }

    pub async fn modify_order(&self, session_id: &str, order_id: &str, changes: JsonValue) -> Result<Order, GatewayError<String>> {
        let mut payload = changes;
        payload["order_id"] = serde_json::json!(order_id);
        self.run(session_id, "order.modify", payload, |data| Order::from_payload(data)).await
    }

    pub async fn get_positions(&self, session_id: &str) -> Result<Vec<Position>, GatewayError<String>> {
        self.run(session_id, "positions.get", serde_json::json!({}), |data| {
            translate_array(data, "positions", Position::from_payload)
        })
        .await
    }

    pub async fn get_orders(&self, session_id: &str) -> Result<Vec<Order>, GatewayError<String>> {
        self.run(session_id, "orders.get", serde_json::json!({}), |data| {
            translate_array(data, "orders", Order::from_payload)
        })
        .await
    }

    pub async fn get_account_info(&self, session_id: &str) -> Result<Account, GatewayError<String>> {
        self.run(session_id, "account.get", serde_json::json!({}), |data| Account::from_payload(data)).await
    }

    pub async fn get_symbol_info(&self, session_id: &str, symbol: &str) -> Result<crate::domain::cache::SymbolInfo, GatewayError<String>> {
        if let Some(cached) = self.cache.symbol_info(symbol) {
            return Ok(cached);
        }
        let payload = serde_json::json!({"symbol": symbol});
        let info = self
            .run(session_id, "symbol.get", payload, |data| {
                Ok(crate::domain::cache::SymbolInfo {
                    symbol: data
                        .get("symbol")
                        .and_then(JsonValue::as_str)
                        .ok_or_else(|| validation("missing or non-string field 'symbol'"))?
                        .to_string(),
                    digits: data
                        .get("digits")
                        .and_then(JsonValue::as_u64)
                        .ok_or_else(|| validation("missing or non-numeric field 'digits'"))? as u32,
                    point: data.get("point").and_then(JsonValue::as_f64).ok_or_else(|| validation("missing or non-numeric field 'point'"))?,
                })
            })
            .await?;
        self.cache.set_symbol_info(info.clone());
        Ok(info)
    }

    pub async fn get_ohlc(&self, session_id: &str, symbol: &str, timeframe: &str) -> Result<Vec<Candle>, GatewayError<String>> {
        let payload = serde_json::json!({"symbol": symbol, "timeframe": timeframe});
        self.run(session_id, "ohlc.get", payload, |data| translate_array(data, "candles", Candle::from_payload)).await
    }

    /// Subscribe to live tick/candle updates for `symbol`. Establishes the
    /// cache entry before the wire round-trip completes, so an in-flight
    /// push that races the reply still lands somewhere.
    pub async fn subscribe_to_market_data(&self, session_id: &str, symbol: &str) -> Result<(), GatewayError<String>> {
        let ctx = self.validated_context(session_id, "market.subscribe").await?;
        self.admit(&ctx, "market.subscribe").await?;
        self.cache.on_subscribed(symbol);
        let payload = serde_json::json!({"symbol": symbol});
        self.dispatch_raw("market.subscribe", payload).await?;
        Ok(())
    }

    pub async fn unsubscribe_from_market_data(&self, session_id: &str, symbol: &str) -> Result<(), GatewayError<String>> {
        let ctx = self.validated_context(session_id, "market.unsubscribe").await?;
        self.admit(&ctx, "market.unsubscribe").await?;
        let payload = serde_json::json!({"symbol": symbol});
        self.dispatch_raw("market.unsubscribe", payload).await?;
        self.cache.on_unsubscribed(symbol);
        Ok(())
    }

    async fn validated_context(&self, session_id: &str, action: &str) -> Result<AuthContext, GatewayError<String>> {
        let ctx = self.sessions.validate_active(session_id).await?;
        self.sessions.check_permission(&ctx, action).await?;
        Ok(ctx)
    }

    async fn admit(&self, ctx: &AuthContext, action: &str) -> Result<(), GatewayError<String>> {
        let key = format!("{}:{}", ctx.principal, action);
        match self.rate_limit.check(&key, 1).await {
            crate::rate_limit::Decision::Allowed { .. } => Ok(()),
            crate::rate_limit::Decision::Denied { wait, reason } => {
                Err(GatewayError::RateLimited { retry_after: wait, rule: reason })
            }
        }
    }

    /// The full named-operation pipeline:
    /// `validateActive -> checkPermission -> limiter.check -> breaker.execute(() -> transport -> translator)`.
    async fn run<T>(
        &self,
        session_id: &str,
        action: &str,
        payload: JsonValue,
        translate: impl Fn(&JsonValue) -> Result<T, GatewayError<String>>,
    ) -> Result<T, GatewayError<String>> {
        let ctx = self.validated_context(session_id, action).await?;
        self.admit(&ctx, action).await?;
        let reply = self.dispatch_raw(action, payload).await?;
        translate(&reply)
    }

    async fn dispatch_raw(&self, action: &str, payload: serde_json::Value) -> Result<serde_json::Value, GatewayError<String>> {
        let transport = self.transport.clone();
        let timeout = self.default_timeout;
        let mut request_body = payload;
        request_body["action"] = serde_json::json!(action);

        let result = self
            .breaker
            .execute(|| {
                let transport = transport.clone();
                let payload = request_body.clone();
                let retry = &self.retry;
                async move {
                    retry
                        .execute(|| {
                            let transport = transport.clone();
                            let payload = payload.clone();
                            async move { transport.request(payload, timeout).await.map_err(map_transport_error) }
                        })
                        .await
                }
            })
            .await?;

        Ok(result.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::Backoff;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::rate_limit::{store::InMemoryTokenStore, strategies::TokenBucket, RateRule};
    use crate::session::{AuthMode, PassthroughAuth};
    use crate::sleeper::InstantSleeper;
    use crate::transport::frame::Frame;
    use crate::transport::multiplexer::WireTransport;
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
    impl WireTransport for LoopbackTransport {
        async fn send(&self, frame: Frame) -> Result<(), TransportError> {
            let echo_tx = self.echo_tx.clone();
            let response = Frame::response(frame.id.clone(), frame.payload.clone());
            tokio::spawn(async move {
                let _ = echo_tx.send(response).await;
            });
            Ok(())
        }

        async fn recv(&self) -> Result<Frame, TransportError> {
            self.inbox.lock().await.recv().await.ok_or(TransportError::ConnectionClosed)
        }
    }

    /// Echoes whatever payload it's sent, but nests it under `response_field`
    /// so the round trip exercises a translator rather than the raw echo.
    struct TranslatingTransport {
        inbox: AsyncMutex<mpsc::Receiver<Frame>>,
        echo_tx: mpsc::Sender<Frame>,
        response: serde_json::Value,
    }

    impl TranslatingTransport {
        fn new(response: serde_json::Value) -> Self {
            let (tx, rx) = mpsc::channel(64);
            Self { inbox: AsyncMutex::new(rx), echo_tx: tx, response }
        }
    }

    #[async_trait::async_trait]
    impl WireTransport for TranslatingTransport {
        async fn send(&self, frame: Frame) -> Result<(), TransportError> {
            let echo_tx = self.echo_tx.clone();
            let response = Frame::response(frame.id.clone(), self.response.clone());
            tokio::spawn(async move {
                let _ = echo_tx.send(response).await;
            });
            Ok(())
        }

        async fn recv(&self) -> Result<Frame, TransportError> {
            self.inbox.lock().await.recv().await.ok_or(TransportError::ConnectionClosed)
        }
    }

    async fn build_facade() -> (AgentFacade, String) {
        build_facade_with_transport(LoopbackTransport::new()).await
    }

    async fn build_facade_with_transport<T: WireTransport>(transport: T) -> (AgentFacade, String) {
        let mut sessions = SessionManager::new(AuthMode::First, Duration::from_secs(60));
        sessions.register_provider(Arc::new(PassthroughAuth));
        let sessions = Arc::new(sessions);
        let session_id = sessions.authenticate(&crate::session::AuthPayload::Opaque(vec![]), None).await.unwrap();

        let mut rate_limit = RuleSet::new();
        rate_limit.add_rule(RateRule::new("burst", 1, Arc::new(TokenBucket::new(InMemoryTokenStore::new(), 100.0, 100.0))));

        let breaker = CircuitBreakerPolicy::with_config(CircuitBreakerConfig::default());
        let retry = RetryPolicy::builder()
            .max_attempts(3)
            .unwrap()
            .backoff(Backoff::constant(Duration::from_millis(1)))
            .with_sleeper(InstantSleeper)
            .build();
        let transport = Arc::new(TransportMultiplexer::spawn(transport));
        let cache = Arc::new(SymbolCache::new(16));

        let facade = AgentFacade::new(sessions, rate_limit, breaker, retry, transport, cache, Duration::from_secs(1));
        (facade, session_id)
    }

    #[tokio::test]
    async fn call_round_trips_through_the_full_pipeline() {
        let (facade, session_id) = build_facade().await;
        let reply = facade.call(&session_id, "market.subscribe", serde_json::json!({"symbol": "EURUSD"})).await.unwrap();
        assert_eq!(reply["symbol"], "EURUSD");
    }

    #[tokio::test]
    async fn unknown_session_is_rejected_before_dispatch() {
        let (facade, _session_id) = build_facade().await;
        let result = facade.call("bogus", "market.subscribe", serde_json::json!({})).await;
        assert!(matches!(result, Err(GatewayError::Authentication { .. })));
    }

    #[tokio::test]
    async fn rate_limit_denial_short_circuits_dispatch() {
        let mut sessions = SessionManager::new(AuthMode::First, Duration::from_secs(60));
        sessions.register_provider(Arc::new(PassthroughAuth));
        let sessions = Arc::new(sessions);
        let session_id = sessions.authenticate(&crate::session::AuthPayload::Opaque(vec![]), None).await.unwrap();

        let mut rate_limit = RuleSet::new();
        rate_limit.add_rule(RateRule::new("tight", 1, Arc::new(TokenBucket::new(InMemoryTokenStore::new(), 0.0, 1.0))));

        let breaker = CircuitBreakerPolicy::with_config(CircuitBreakerConfig::default());
        let retry = RetryPolicy::builder().max_attempts(1).unwrap().with_sleeper(InstantSleeper).build();
        let transport = Arc::new(TransportMultiplexer::spawn(LoopbackTransport::new()));
        let cache = Arc::new(SymbolCache::new(16));
        let facade = AgentFacade::new(sessions, rate_limit, breaker, retry, transport, cache, Duration::from_secs(1));

        facade.call(&session_id, "trade.open", serde_json::json!({})).await.unwrap();
        let second = facade.call(&session_id, "trade.open", serde_json::json!({})).await;
        assert!(matches!(second, Err(GatewayError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn execute_trade_translates_the_reply_into_a_typed_trade() {
        let response = serde_json::json!({
            "order_id": "o-1", "symbol": "EURUSD", "side": "buy", "volume": 1.0, "price": 1.0950, "timestamp": 1_700_000_000_000i64
        });
        let (facade, session_id) = build_facade_with_transport(TranslatingTransport::new(response)).await;
        let trade = facade.execute_trade(&session_id, serde_json::json!({"symbol": "EURUSD", "side": "buy", "volume": 1.0})).await.unwrap();
        assert_eq!(trade.symbol, "EURUSD");
        assert_eq!(trade.order_id, "o-1");
    }

    #[tokio::test]
    async fn execute_trade_surfaces_a_validation_error_for_a_malformed_reply() {
        let response = serde_json::json!({"symbol": "EURUSD"});
        let (facade, session_id) = build_facade_with_transport(TranslatingTransport::new(response)).await;
        let result = facade.execute_trade(&session_id, serde_json::json!({"symbol": "EURUSD"})).await;
        assert!(matches!(result, Err(GatewayError::Validation { .. })));
    }

    #[tokio::test]
    async fn get_positions_translates_an_array_of_positions() {
        let response = serde_json::json!({"positions": [
            {"symbol": "EURUSD", "side": "buy", "volume": 1.0, "open_price": 1.09, "current_price": 1.10, "profit": 100.0}
        ]});
        let (facade, session_id) = build_facade_with_transport(TranslatingTransport::new(response)).await;
        let positions = facade.get_positions(&session_id).await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].symbol, "EURUSD");
    }

    #[tokio::test]
    async fn subscribe_to_market_data_populates_the_symbol_cache() {
        let (facade, session_id) = build_facade().await;
        facade.subscribe_to_market_data(&session_id, "EURUSD").await.unwrap();
        assert_eq!(facade.cache.tracked_symbol_count(), 1);

        facade.unsubscribe_from_market_data(&session_id, "EURUSD").await.unwrap();
        assert_eq!(facade.cache.tracked_symbol_count(), 0);
    }
}
