//! Connection supervision: owns the connection lifecycle state machine and
//! drives reconnection through the retry policy rather than reimplementing
//! backoff math here.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use crate::backoff::Backoff;
use crate::error::GatewayError;
use crate::retry::RetryPolicy;
use crate::telemetry::{events::SupervisorEvent, GatewayEvent, TelemetrySink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Uninitialized = 0,
    Connecting = 1,
    Connected = 2,
    Reconnecting = 3,
    Disconnected = 4,
    Shutdown = 5,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Reconnecting,
            4 => ConnectionState::Disconnected,
            5 => ConnectionState::Shutdown,
            _ => ConnectionState::Uninitialized,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ConnectionState::Uninitialized => "uninitialized",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Shutdown => "shutdown",
        }
    }
}

/// Connect/heartbeat hooks the supervisor drives; the transport multiplexer
/// (or a test double) implements this.
#[async_trait::async_trait]
pub trait ConnectionHandle: Send + Sync {
    async fn connect(&self) -> Result<(), String>;
    async fn heartbeat(&self) -> Result<(), String>;
    async fn disconnect(&self);

    /// Fail every request awaiting a reply, called the instant the
    /// supervisor decides the connection is gone (before it starts
    /// reconnecting), so callers don't wait out a transport-level timeout.
    async fn fail_pending(&self) {}

    /// Re-establish server-side subscriptions for `topics` after a
    /// reconnection. The supervisor tracks which topics were subscribed via
    /// [`ConnectionSupervisor::track_subscription`] and replays them here.
    async fn resubscribe(&self, _topics: &[String]) -> Result<(), String> {
        Ok(())
    }
}

pub struct SupervisorConfig {
    pub heartbeat_interval: Duration,
    pub max_missed_heartbeats: u32,
    /// Upper bound on consecutive reconnect attempts before giving up and
    /// settling into `Disconnected`. `None` retries forever.
    pub max_reconnect_attempts: Option<usize>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self { heartbeat_interval: Duration::from_secs(15), max_missed_heartbeats: 3, max_reconnect_attempts: Some(10) }
    }
}

/// Drives a [`ConnectionHandle`] through its lifecycle, reconnecting via a
/// [`RetryPolicy`] on connection loss and tracking consecutive missed
/// heartbeats to detect silent failure.
pub struct ConnectionSupervisor<H: ConnectionHandle> {
    handle: Arc<H>,
    state: Arc<AtomicU8>,
    missed_heartbeats: Arc<AtomicU32>,
    config: SupervisorConfig,
    retry: RetryPolicy<String>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    subscribed_topics: Mutex<HashSet<String>>,
}

impl<H: ConnectionHandle + 'static> ConnectionSupervisor<H> {
    pub fn new(handle: H, config: SupervisorConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let max_attempts = config.max_reconnect_attempts.unwrap_or(usize::MAX).max(1);
        Self {
            handle: Arc::new(handle),
            state: Arc::new(AtomicU8::new(ConnectionState::Uninitialized as u8)),
            missed_heartbeats: Arc::new(AtomicU32::new(0)),
            config,
            retry: RetryPolicy::builder()
                .max_attempts(max_attempts)
                .expect("bounded above by .max(1)")
                .backoff(Backoff::exponential(Duration::from_millis(500)).with_max(Duration::from_secs(30)))
                .build(),
            telemetry: None,
            shutdown_tx,
            shutdown_rx,
            subscribed_topics: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn missed_heartbeats(&self) -> u32 {
        self.missed_heartbeats.load(Ordering::Relaxed)
    }

    /// Record that `topic` is subscribed, so it's replayed via
    /// [`ConnectionHandle::resubscribe`] after the next reconnection.
    pub fn track_subscription(&self, topic: impl Into<String>) {
        self.subscribed_topics.lock().unwrap_or_else(|p| p.into_inner()).insert(topic.into());
    }

    /// Stop tracking `topic`; it will not be replayed on future reconnects.
    pub fn untrack_subscription(&self, topic: &str) {
        self.subscribed_topics.lock().unwrap_or_else(|p| p.into_inner()).remove(topic);
    }

    fn tracked_topics(&self) -> Vec<String> {
        self.subscribed_topics.lock().unwrap_or_else(|p| p.into_inner()).iter().cloned().collect()
    }

    async fn transition(&self, to: ConnectionState) {
        let from = self.state();
        self.state.store(to as u8, Ordering::Release);
        if from != to {
            if let Some(sink) = &self.telemetry {
                sink.emit(GatewayEvent::Supervisor(SupervisorEvent::StateChanged { from: from.label(), to: to.label() })).await;
            }
        }
    }

    /// Connect once, retrying internally until success or shutdown.
    pub async fn connect(&self) -> Result<(), GatewayError<String>> {
        self.transition(ConnectionState::Connecting).await;
        let handle = self.handle.clone();
        let result = self
            .retry
            .execute(|| {
                let handle = handle.clone();
                async move { handle.connect().await.map_err(GatewayError::Inner) }
            })
            .await;

        match result {
            Ok(()) => {
                let topics = self.tracked_topics();
                if !topics.is_empty() {
                    let _ = self.handle.resubscribe(&topics).await;
                }
                self.transition(ConnectionState::Connected).await;
                Ok(())
            }
            Err(e) => {
                self.transition(ConnectionState::Disconnected).await;
                Err(e)
            }
        }
    }

    /// Send one heartbeat; on failure, increments the miss counter and, past
    /// the threshold, marks the connection for reconnection.
    pub async fn beat(&self) {
        match self.handle.heartbeat().await {
            Ok(()) => {
                self.missed_heartbeats.store(0, Ordering::Relaxed);
            }
            Err(_) => {
                let misses = self.missed_heartbeats.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(sink) = &self.telemetry {
                    sink.emit(GatewayEvent::Supervisor(SupervisorEvent::HeartbeatMissed { consecutive_misses: misses })).await;
                }
                if misses >= self.config.max_missed_heartbeats {
                    self.handle.fail_pending().await;
                    self.transition(ConnectionState::Reconnecting).await;
                }
            }
        }
    }

    /// Run the heartbeat loop until shutdown; reconnects automatically when
    /// too many heartbeats are missed.
    pub async fn run(&self) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        self.handle.disconnect().await;
                        self.transition(ConnectionState::Shutdown).await;
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if self.state() == ConnectionState::Reconnecting {
                        let _ = self.connect().await;
                    } else if self.state() == ConnectionState::Connected {
                        self.beat().await;
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct FlakyHandle {
        connect_failures_left: AtomicUsize,
        heartbeat_should_fail: Arc<Mutex<bool>>,
        pending_failed: Arc<AtomicUsize>,
        resubscribed: Arc<Mutex<Vec<String>>>,
    }

    impl FlakyHandle {
        fn new(connect_failures_left: usize, heartbeat_should_fail: Arc<Mutex<bool>>) -> Self {
            Self {
                connect_failures_left: AtomicUsize::new(connect_failures_left),
                heartbeat_should_fail,
                pending_failed: Arc::new(AtomicUsize::new(0)),
                resubscribed: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait::async_trait]
    impl ConnectionHandle for FlakyHandle {
        async fn connect(&self) -> Result<(), String> {
            if self.connect_failures_left.load(Ordering::Relaxed) > 0 {
                self.connect_failures_left.fetch_sub(1, Ordering::Relaxed);
                return Err("connection refused".into());
            }
            Ok(())
        }

        async fn heartbeat(&self) -> Result<(), String> {
            if *self.heartbeat_should_fail.lock().unwrap() {
                Err("no pong".into())
            } else {
                Ok(())
            }
        }

        async fn disconnect(&self) {}

        async fn fail_pending(&self) {
            self.pending_failed.fetch_add(1, Ordering::Relaxed);
        }

        async fn resubscribe(&self, topics: &[String]) -> Result<(), String> {
            self.resubscribed.lock().unwrap().extend_from_slice(topics);
            Ok(())
        }
    }

    #[tokio::test]
    async fn connect_retries_past_transient_failures() {
        let handle = FlakyHandle::new(2, Arc::new(Mutex::new(false)));
        let supervisor = ConnectionSupervisor::new(handle, SupervisorConfig::default());
        supervisor.connect().await.unwrap();
        assert_eq!(supervisor.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn missed_heartbeats_trigger_reconnecting_state() {
        let heartbeat_should_fail = Arc::new(Mutex::new(true));
        let handle = FlakyHandle::new(0, heartbeat_should_fail.clone());
        let supervisor = ConnectionSupervisor::new(
            handle,
            SupervisorConfig { heartbeat_interval: Duration::from_millis(10), max_missed_heartbeats: 2, max_reconnect_attempts: Some(10) },
        );
        supervisor.connect().await.unwrap();

        supervisor.beat().await;
        assert_eq!(supervisor.state(), ConnectionState::Connected);
        supervisor.beat().await;
        assert_eq!(supervisor.state(), ConnectionState::Reconnecting);
    }

    #[tokio::test]
    async fn missed_heartbeats_fail_pending_requests_before_reconnecting() {
        let heartbeat_should_fail = Arc::new(Mutex::new(true));
        let handle = FlakyHandle::new(0, heartbeat_should_fail.clone());
        let pending_failed = handle.pending_failed.clone();
        let supervisor = ConnectionSupervisor::new(
            handle,
            SupervisorConfig { heartbeat_interval: Duration::from_millis(10), max_missed_heartbeats: 1, max_reconnect_attempts: Some(10) },
        );
        supervisor.connect().await.unwrap();

        supervisor.beat().await;
        assert_eq!(supervisor.state(), ConnectionState::Reconnecting);
        assert_eq!(pending_failed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn reconnecting_replays_tracked_subscriptions() {
        let handle = FlakyHandle::new(1, Arc::new(Mutex::new(false)));
        let resubscribed = handle.resubscribed.clone();
        let supervisor = ConnectionSupervisor::new(handle, SupervisorConfig::default());
        supervisor.track_subscription("EURUSD");
        supervisor.track_subscription("GBPUSD");

        supervisor.connect().await.unwrap();

        let mut topics = resubscribed.lock().unwrap().clone();
        topics.sort();
        assert_eq!(topics, vec!["EURUSD".to_string(), "GBPUSD".to_string()]);
    }

    #[tokio::test]
    async fn reconnect_attempts_are_bounded() {
        let handle = FlakyHandle::new(usize::MAX, Arc::new(Mutex::new(false)));
        let supervisor = ConnectionSupervisor::new(
            handle,
            SupervisorConfig { heartbeat_interval: Duration::from_millis(10), max_missed_heartbeats: 1, max_reconnect_attempts: Some(2) },
        );
        let result = supervisor.connect().await;
        assert!(result.is_err());
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }
}
