//! Reactor-task multiplexer: a single task owns the underlying connection,
//! dispatching outbound frames and correlating inbound replies to pending
//! requests via a `correlation_id -> oneshot::Sender` table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::telemetry::{events::TransportEvent, GatewayEvent, TelemetrySink};
use crate::transport::frame::{ChannelKind, Frame};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport connection closed")]
    ConnectionClosed,
    #[error("response lost before delivery")]
    ResponseLost,
    #[error("request timed out waiting for a reply")]
    TimedOut,
    #[error("underlying wire error: {0}")]
    Wire(String),
}

/// Abstraction over the underlying socket/connection. A production
/// implementation wraps a TCP or websocket stream encoding/decoding
/// [`Frame`]s; tests use an in-memory pair.
#[async_trait::async_trait]
pub trait WireTransport: Send + Sync + 'static {
    async fn send(&self, frame: Frame) -> Result<(), TransportError>;
    async fn recv(&self) -> Result<Frame, TransportError>;
}

struct PendingEntry {
    tx: oneshot::Sender<Result<Frame, TransportError>>,
    deadline: Instant,
}

enum Outbound {
    Req { frame: Frame, reply: oneshot::Sender<Result<Frame, TransportError>>, timeout: Duration },
    Push { frame: Frame },
}

/// Multiplexes request/response, subscription, and push traffic over one
/// [`WireTransport`], running its own reactor task.
pub struct TransportMultiplexer {
    outbound_tx: mpsc::Sender<Outbound>,
    shutdown_tx: watch::Sender<bool>,
    events_tx: tokio::sync::broadcast::Sender<Frame>,
    worker: Arc<tokio::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl TransportMultiplexer {
    pub fn spawn<T: WireTransport>(transport: T) -> Self {
        Self::with_capacity(transport, 256, None)
    }

    /// Spawn with a telemetry sink observing sends, receives, timeouts, and
    /// connection loss.
    pub fn spawn_with_telemetry<T: WireTransport>(transport: T, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self::with_capacity(transport, 256, Some(telemetry))
    }

    pub fn with_capacity<T: WireTransport>(transport: T, capacity: usize, telemetry: Option<Arc<dyn TelemetrySink>>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, _) = tokio::sync::broadcast::channel(capacity);

        let pending: Arc<Mutex<HashMap<String, PendingEntry>>> = Arc::new(Mutex::new(HashMap::new()));
        let transport = Arc::new(transport);

        let handle = tokio::spawn(run_reactor(transport, outbound_rx, shutdown_rx, pending, events_tx.clone(), telemetry));

        Self { outbound_tx, shutdown_tx, events_tx, worker: Arc::new(tokio::sync::Mutex::new(Some(handle))) }
    }

    /// Send a request and await its correlated reply, or time out.
    pub async fn request(&self, payload: serde_json::Value, timeout: Duration) -> Result<Frame, TransportError> {
        let id = uuid::Uuid::new_v4().to_string();
        let frame = Frame::request(id, payload);
        let (tx, rx) = oneshot::channel();

        self.outbound_tx
            .send(Outbound::Req { frame, reply: tx, timeout })
            .await
            .map_err(|_| TransportError::ConnectionClosed)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::ResponseLost),
            Err(_) => Err(TransportError::TimedOut),
        }
    }

    /// Fire-and-forget send; no reply is awaited.
    pub async fn push(&self, payload: serde_json::Value) -> Result<(), TransportError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.outbound_tx
            .send(Outbound::Push { frame: Frame::push(id, payload) })
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Subscribe to inbound `Sub`-channel events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Frame> {
        self.events_tx.subscribe()
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.await;
        }
    }
}

async fn run_reactor<T: WireTransport>(
    transport: Arc<T>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    mut shutdown_rx: watch::Receiver<bool>,
    pending: Arc<Mutex<HashMap<String, PendingEntry>>>,
    events_tx: tokio::sync::broadcast::Sender<Frame>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
) {
    let recv_transport = transport.clone();
    let recv_pending = pending.clone();
    let mut recv_shutdown = shutdown_rx.clone();
    let recv_telemetry = telemetry.clone();

    let recv_loop = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = recv_shutdown.changed() => {
                    if *recv_shutdown.borrow() {
                        break;
                    }
                }
                result = recv_transport.recv() => {
                    match result {
                        Ok(frame) => dispatch_inbound(frame, &recv_pending, &events_tx, &recv_telemetry).await,
                        Err(e) => {
                            fail_all_pending(&recv_pending).await;
                            emit(&recv_telemetry, TransportEvent::ConnectionLost { details: e.to_string() }).await;
                            break;
                        }
                    }
                }
            }
        }
    });

    let mut sweep = tokio::time::interval(Duration::from_millis(200));

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = sweep.tick() => {
                sweep_expired(&pending, &telemetry).await;
            }
            maybe_outbound = outbound_rx.recv() => {
                match maybe_outbound {
                    Some(Outbound::Req { frame, reply, timeout }) => {
                        let deadline = Instant::now() + timeout;
                        let id = frame.id.clone();
                        pending.lock().unwrap_or_else(|p| p.into_inner()).insert(id.clone(), PendingEntry { tx: reply, deadline });
                        if let Err(e) = transport.send(frame).await {
                            if let Some(entry) = pending.lock().unwrap_or_else(|p| p.into_inner()).remove(&id) {
                                let _ = entry.tx.send(Err(e));
                            }
                        } else {
                            emit(&telemetry, TransportEvent::Sent { channel: "req", id }).await;
                        }
                    }
                    Some(Outbound::Push { frame }) => {
                        let id = frame.id.clone();
                        if transport.send(frame).await.is_ok() {
                            emit(&telemetry, TransportEvent::Sent { channel: "push", id }).await;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    recv_loop.abort();
}

async fn dispatch_inbound(
    frame: Frame,
    pending: &Arc<Mutex<HashMap<String, PendingEntry>>>,
    events_tx: &tokio::sync::broadcast::Sender<Frame>,
    telemetry: &Option<Arc<dyn TelemetrySink>>,
) {
    match frame.channel {
        ChannelKind::Req => {
            if let Some(correlation_id) = &frame.correlation_id {
                let entry = pending.lock().unwrap_or_else(|p| p.into_inner()).remove(correlation_id);
                if let Some(entry) = entry {
                    emit(telemetry, TransportEvent::Received { channel: "req", id: correlation_id.clone() }).await;
                    let _ = entry.tx.send(Ok(frame));
                }
            }
        }
        ChannelKind::Sub => {
            emit(telemetry, TransportEvent::Received { channel: "sub", id: frame.id.clone() }).await;
            let _ = events_tx.send(frame);
        }
        ChannelKind::Push => {
            emit(telemetry, TransportEvent::Received { channel: "push", id: frame.id.clone() }).await;
        }
    }
}

/// Drains every outstanding request and fails it with `ConnectionClosed`.
/// Called as soon as the reactor's receive side observes the transport is
/// gone, so callers don't wait out the sweep timer to learn the connection
/// is down.
async fn fail_all_pending(pending: &Arc<Mutex<HashMap<String, PendingEntry>>>) {
    let entries: Vec<PendingEntry> = {
        let mut guard = pending.lock().unwrap_or_else(|p| p.into_inner());
        guard.drain().map(|(_, entry)| entry).collect()
    };
    for entry in entries {
        let _ = entry.tx.send(Err(TransportError::ConnectionClosed));
    }
}

async fn sweep_expired(pending: &Arc<Mutex<HashMap<String, PendingEntry>>>, telemetry: &Option<Arc<dyn TelemetrySink>>) {
    let now = Instant::now();
    let expired: Vec<(String, PendingEntry)> = {
        let mut guard = pending.lock().unwrap_or_else(|p| p.into_inner());
        let expired_ids: Vec<String> = guard.iter().filter(|(_, e)| e.deadline <= now).map(|(k, _)| k.clone()).collect();
        expired_ids.into_iter().filter_map(|id| guard.remove(&id).map(|e| (id, e))).collect()
    };
    for (id, entry) in expired {
        emit(telemetry, TransportEvent::PendingTimedOut { id }).await;
        let _ = entry.tx.send(Err(TransportError::TimedOut));
    }
}

async fn emit(telemetry: &Option<Arc<dyn TelemetrySink>>, event: TransportEvent) {
    if let Some(sink) = telemetry {
        sink.emit(GatewayEvent::Transport(event)).await;
    }
}
