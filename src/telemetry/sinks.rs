//! Telemetry sinks that consume `GatewayEvent`s emitted by the resilience
//! and connection-management components.

use super::events::GatewayEvent;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A telemetry sink that consumes gateway events. Emission is always
/// best-effort: a sink is never allowed to block or fail the call it is
/// observing.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn emit(&self, event: GatewayEvent);
}

/// Emits to `sink`, swallowing nothing visibly but never propagating an
/// error back to the caller — sinks are observers, not participants.
pub async fn emit_best_effort<S: TelemetrySink + ?Sized>(sink: &S, event: GatewayEvent) {
    sink.emit(event).await;
}

/// Discards every event.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

#[async_trait]
impl TelemetrySink for NullSink {
    async fn emit(&self, _event: GatewayEvent) {}
}

/// Logs events through `tracing`.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

#[async_trait]
impl TelemetrySink for LogSink {
    async fn emit(&self, event: GatewayEvent) {
        tracing::info!(event = %event, "gateway_event");
    }
}

/// Retains a bounded, in-memory ring of recent events for inspection (tests,
/// admin endpoints).
#[derive(Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<GatewayEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<GatewayEvent> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    async fn emit(&self, event: GatewayEvent) {
        let mut guard = self.events.lock().unwrap_or_else(|p| p.into_inner());
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(event);
    }
}

/// Broadcasts events to every live subscriber; slow/absent subscribers drop
/// events rather than back-pressuring the emitter.
#[derive(Clone)]
pub struct StreamingSink {
    sender: Arc<tokio::sync::broadcast::Sender<Arc<GatewayEvent>>>,
    dropped: Arc<AtomicU64>,
    last_drop_ns: Arc<AtomicU64>,
}

impl StreamingSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender: Arc::new(sender), dropped: Arc::new(AtomicU64::new(0)), last_drop_ns: Arc::new(AtomicU64::new(0)) }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Arc<GatewayEvent>> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn last_drop(&self) -> Option<SystemTime> {
        match self.last_drop_ns.load(Ordering::Relaxed) {
            0 => None,
            ns => UNIX_EPOCH.checked_add(Duration::from_nanos(ns)),
        }
    }
}

#[async_trait]
impl TelemetrySink for StreamingSink {
    async fn emit(&self, event: GatewayEvent) {
        if self.sender.send(Arc::new(event)).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64;
            self.last_drop_ns.store(now, Ordering::Relaxed);
        }
    }
}

/// Fans an event out to two sinks concurrently.
#[derive(Clone)]
pub struct MulticastSink<A, B> {
    sink_a: A,
    sink_b: B,
}

impl<A, B> MulticastSink<A, B> {
    pub fn new(sink_a: A, sink_b: B) -> Self {
        Self { sink_a, sink_b }
    }
}

#[async_trait]
impl<A, B> TelemetrySink for MulticastSink<A, B>
where
    A: TelemetrySink + Clone + 'static,
    B: TelemetrySink + Clone + 'static,
{
    async fn emit(&self, event: GatewayEvent) {
        tokio::join!(self.sink_a.emit(event.clone()), self.sink_b.emit(event));
    }
}

/// Tries `primary`; on any observable failure (currently: never, since
/// `emit` is infallible) falls back to `fallback`. Kept as a distinct sink
/// so a future fallible sink (e.g. a network exporter) can compose with it
/// without changing callers.
#[derive(Clone)]
pub struct FallbackSink<A, B> {
    primary: A,
    fallback: B,
}

impl<A, B> FallbackSink<A, B> {
    pub fn new(primary: A, fallback: B) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl<A, B> TelemetrySink for FallbackSink<A, B>
where
    A: TelemetrySink + 'static,
    B: TelemetrySink + 'static,
{
    async fn emit(&self, event: GatewayEvent) {
        self.primary.emit(event.clone()).await;
        self.fallback.emit(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::events::{CircuitBreakerEvent, RetryEvent};

    #[tokio::test]
    async fn null_sink_discards() {
        NullSink.emit(GatewayEvent::Retry(RetryEvent::Attempt { attempt: 1, delay: Duration::from_millis(1) })).await;
    }

    #[tokio::test]
    async fn memory_sink_evicts_oldest_past_capacity() {
        let sink = MemorySink::with_capacity(2);
        sink.emit(GatewayEvent::Retry(RetryEvent::Attempt { attempt: 1, delay: Duration::from_millis(1) })).await;
        sink.emit(GatewayEvent::CircuitBreaker(CircuitBreakerEvent::Closed { id: "a".into() })).await;
        sink.emit(GatewayEvent::CircuitBreaker(CircuitBreakerEvent::HalfOpened { id: "b".into() })).await;

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.evicted(), 1);
    }

    #[tokio::test]
    async fn streaming_sink_delivers_to_subscriber() {
        let sink = StreamingSink::new(8);
        let mut rx = sink.subscribe();
        sink.emit(GatewayEvent::Retry(RetryEvent::Attempt { attempt: 1, delay: Duration::from_millis(1) })).await;
        let got = rx.recv().await.expect("message");
        assert!(matches!(&*got, GatewayEvent::Retry(_)));
    }

    #[tokio::test]
    async fn multicast_sink_delivers_to_both() {
        let a = MemorySink::new();
        let b = MemorySink::new();
        let multi = MulticastSink::new(a.clone(), b.clone());
        multi.emit(GatewayEvent::Retry(RetryEvent::Attempt { attempt: 1, delay: Duration::from_millis(1) })).await;
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }
}
