//! Event routing (C5): a bounded FIFO of inbound events, drained by a
//! scheduler that applies filter chains before fanning out to
//! priority-ordered subscriptions, rather than a direct per-subscriber
//! mpsc pub/sub.
//!
//! Mirrors the shape of the rest of the fault shell: a `Mutex`-guarded
//! structure for the bookkeeping (subscriptions, queue), atomics for the
//! hot counters (overflow, pause flag), and a `TelemetrySink` for every
//! state change worth observing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::future::{join_all, BoxFuture};
use tokio::sync::watch;

use crate::config::PerformanceConfig;
use crate::telemetry::{events::RouterEvent, GatewayEvent, TelemetrySink};

/// Topic this router treats as a liveness ping; dropped by the default
/// filter installed at construction.
pub const HEARTBEAT_EVENT_TYPE: &str = "heartbeat";

/// Events older than this are dropped by the default filter installed at
/// construction.
pub const DEFAULT_MAX_EVENT_AGE: Duration = Duration::from_secs(5 * 60);

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// One event flowing through the router: a type, an optional source, and
/// a JSON payload, stamped with the instant it was produced.
#[derive(Debug, Clone)]
pub struct RoutedEvent {
    pub event_type: String,
    pub source: Option<String>,
    pub data: serde_json::Value,
    pub created_at_millis: u64,
}

impl RoutedEvent {
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self { event_type: event_type.into(), source: None, data, created_at_millis: now_millis() }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    fn age(&self) -> Duration {
        Duration::from_millis(now_millis().saturating_sub(self.created_at_millis))
    }
}

/// A predicate over a [`RoutedEvent`], used both as a filter-chain entry
/// and as a subscription's custom matcher.
pub type EventFilter = Arc<dyn Fn(&RoutedEvent) -> bool + Send + Sync>;

/// An async handler invoked for every event a subscription matches.
pub type Handler = Arc<dyn Fn(RoutedEvent) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// What a subscription matches on, beyond its custom `predicate`.
#[derive(Default, Clone)]
pub struct SubscriptionSpec {
    pub event_type: Option<String>,
    pub source: Option<String>,
    /// Key/value pairs that must be present and equal in the event's data.
    pub data_match: Vec<(String, serde_json::Value)>,
    pub predicate: Option<EventFilter>,
    pub priority: i32,
}

impl SubscriptionSpec {
    pub fn for_type(event_type: impl Into<String>) -> Self {
        Self { event_type: Some(event_type.into()), ..Self::default() }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_data_match(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data_match.push((key.into(), value));
        self
    }

    pub fn with_predicate(mut self, predicate: EventFilter) -> Self {
        self.predicate = Some(predicate);
        self
    }

    fn matches(&self, event: &RoutedEvent) -> bool {
        if let Some(t) = &self.event_type {
            if t != &event.event_type {
                return false;
            }
        }
        if let Some(s) = &self.source {
            if event.source.as_deref() != Some(s.as_str()) {
                return false;
            }
        }
        for (key, value) in &self.data_match {
            if event.data.get(key) != Some(value) {
                return false;
            }
        }
        if let Some(predicate) = &self.predicate {
            if !predicate(event) {
                return false;
            }
        }
        true
    }
}

struct Subscription {
    id: u64,
    spec: SubscriptionSpec,
    handler: Handler,
    created_at_millis: u64,
    last_fired_millis: AtomicU64,
    fire_count: AtomicU64,
}

/// Point-in-time snapshot of a subscription's activity, for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionStats {
    pub id: u64,
    pub priority: i32,
    pub created_at_millis: u64,
    pub last_fired_millis: Option<u64>,
    pub fire_count: u64,
}

/// Router-wide counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouterStats {
    pub queued: usize,
    pub subscriptions: usize,
    pub overflow_dropped: u64,
    pub filtered_dropped: u64,
}

pub struct EventRouterConfig {
    /// Upper bound on the pending-event FIFO; further publishes are
    /// dropped once it's full.
    pub max_queue_size: usize,
    /// Events drained per scheduler tick.
    pub batch_size: usize,
    /// Interval between scheduler ticks.
    pub processing_interval: Duration,
}

impl Default for EventRouterConfig {
    fn default() -> Self {
        Self { max_queue_size: 4_096, batch_size: 64, processing_interval: Duration::from_millis(50) }
    }
}

impl From<&PerformanceConfig> for EventRouterConfig {
    fn from(perf: &PerformanceConfig) -> Self {
        Self {
            max_queue_size: perf.max_event_queue_size,
            batch_size: perf.event_batch_size,
            processing_interval: Duration::from_millis(perf.event_processing_interval_ms),
        }
    }
}

struct RouterState {
    queue: std::collections::VecDeque<RoutedEvent>,
    subscriptions: Vec<Arc<Subscription>>,
}

/// Routes events from the transport layer to priority-ordered, filtered
/// subscriptions via a bounded FIFO drained on a fixed schedule.
pub struct EventRouter {
    state: Mutex<RouterState>,
    config: EventRouterConfig,
    global_filters: Mutex<Vec<EventFilter>>,
    type_filters: Mutex<HashMap<String, Vec<EventFilter>>>,
    next_sub_id: AtomicU64,
    overflow_dropped: AtomicU64,
    filtered_dropped: AtomicU64,
    paused: AtomicBool,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl EventRouter {
    pub fn new(config: EventRouterConfig) -> Self {
        let router = Self {
            state: Mutex::new(RouterState { queue: std::collections::VecDeque::new(), subscriptions: Vec::new() }),
            config,
            global_filters: Mutex::new(Vec::new()),
            type_filters: Mutex::new(HashMap::new()),
            next_sub_id: AtomicU64::new(1),
            overflow_dropped: AtomicU64::new(0),
            filtered_dropped: AtomicU64::new(0),
            paused: AtomicBool::new(false),
            telemetry: None,
        };
        router.install_default_filters();
        router
    }

    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    fn install_default_filters(&self) {
        self.add_global_filter(Arc::new(|event: &RoutedEvent| event.event_type != HEARTBEAT_EVENT_TYPE));
        self.add_global_filter(Arc::new(|event: &RoutedEvent| event.age() <= DEFAULT_MAX_EVENT_AGE));
    }

    pub fn add_global_filter(&self, filter: EventFilter) {
        self.global_filters.lock().unwrap_or_else(|p| p.into_inner()).push(filter);
    }

    pub fn add_type_filter(&self, event_type: impl Into<String>, filter: EventFilter) {
        self.type_filters.lock().unwrap_or_else(|p| p.into_inner()).entry(event_type.into()).or_default().push(filter);
    }

    /// Enqueue `event`. Drops it and bumps the overflow counter if the
    /// queue is at `max_queue_size`.
    pub async fn publish(&self, event: RoutedEvent) {
        let dropped = {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if state.queue.len() >= self.config.max_queue_size {
                true
            } else {
                state.queue.push_back(event.clone());
                false
            }
        };

        if dropped {
            let total = self.overflow_dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(target: "gateway::router", event_type = %event.event_type, total_dropped = total, "event queue full, dropping event");
            if let Some(sink) = &self.telemetry {
                sink.emit(GatewayEvent::Router(RouterEvent::QueueOverflow { event_type: event.event_type, total_dropped: total })).await;
            }
        }
    }

    /// Register a subscription; returns an id usable with [`Self::unsubscribe`].
    pub fn subscribe(&self, spec: SubscriptionSpec, handler: Handler) -> u64 {
        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        let sub = Arc::new(Subscription {
            id,
            spec,
            handler,
            created_at_millis: now_millis(),
            last_fired_millis: AtomicU64::new(0),
            fire_count: AtomicU64::new(0),
        });
        self.state.lock().unwrap_or_else(|p| p.into_inner()).subscriptions.push(sub);
        id
    }

    /// Remove a subscription. Returns `false` if no such id was registered.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let before = state.subscriptions.len();
        state.subscriptions.retain(|s| s.id != id);
        state.subscriptions.len() != before
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Drop every pending event without processing it.
    pub fn clear(&self) {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).queue.clear();
    }

    pub fn stats(&self) -> RouterStats {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        RouterStats {
            queued: state.queue.len(),
            subscriptions: state.subscriptions.len(),
            overflow_dropped: self.overflow_dropped.load(Ordering::Relaxed),
            filtered_dropped: self.filtered_dropped.load(Ordering::Relaxed),
        }
    }

    pub fn subscription_stats(&self) -> Vec<SubscriptionStats> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state
            .subscriptions
            .iter()
            .map(|s| SubscriptionStats {
                id: s.id,
                priority: s.spec.priority,
                created_at_millis: s.created_at_millis,
                last_fired_millis: match s.last_fired_millis.load(Ordering::Relaxed) {
                    0 => None,
                    v => Some(v),
                },
                fire_count: s.fire_count.load(Ordering::Relaxed),
            })
            .collect()
    }

    fn passes_filters(&self, event: &RoutedEvent) -> bool {
        let globals = self.global_filters.lock().unwrap_or_else(|p| p.into_inner());
        if globals.iter().any(|f| !f(event)) {
            return false;
        }
        drop(globals);

        let type_filters = self.type_filters.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(filters) = type_filters.get(&event.event_type) {
            if filters.iter().any(|f| !f(event)) {
                return false;
            }
        }
        true
    }

    /// Subscriptions matching `event`, sorted by priority desc then
    /// registration time asc.
    fn matching_subscriptions(&self, event: &RoutedEvent) -> Vec<Arc<Subscription>> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let mut matches: Vec<Arc<Subscription>> =
            state.subscriptions.iter().filter(|s| s.spec.matches(event)).cloned().collect();
        matches.sort_by(|a, b| b.spec.priority.cmp(&a.spec.priority).then(a.created_at_millis.cmp(&b.created_at_millis)));
        matches
    }

    async fn process_event(&self, event: RoutedEvent) {
        if !self.passes_filters(&event) {
            self.filtered_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let matches = self.matching_subscriptions(&event);
        if matches.is_empty() {
            return;
        }

        for sub in &matches {
            sub.last_fired_millis.store(now_millis(), Ordering::Relaxed);
            sub.fire_count.fetch_add(1, Ordering::Relaxed);
            if let Err(error) = (sub.handler)(event.clone()).await {
                tracing::warn!(target: "gateway::router", subscription_id = sub.id, event_type = %event.event_type, %error, "event handler failed");
                if let Some(sink) = &self.telemetry {
                    sink.emit(GatewayEvent::Router(RouterEvent::HandlerFailed {
                        event_type: event.event_type.clone(),
                        subscription_id: sub.id,
                        error: error.clone(),
                    }))
                    .await;
                }
            }
        }

        if let Some(sink) = &self.telemetry {
            sink.emit(GatewayEvent::Router(RouterEvent::Dispatched { event_type: event.event_type.clone(), handler_count: matches.len() })).await;
        }
    }

    /// Drain up to `batch_size` queued events and dispatch them. Events are
    /// processed concurrently with each other; a single event's matched
    /// handlers still run in priority order, one at a time. Returns the
    /// number of events processed (`0` while paused or with an empty queue).
    pub async fn tick(&self) -> usize {
        if self.is_paused() {
            return 0;
        }

        let batch: Vec<RoutedEvent> = {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            let n = self.config.batch_size.min(state.queue.len());
            state.queue.drain(..n).collect()
        };

        let processed = batch.len();
        if processed == 0 {
            return 0;
        }

        join_all(batch.into_iter().map(|event| self.process_event(event))).await;
        processed
    }

    /// Run the scheduler until `shutdown` fires, ticking every
    /// `processing_interval`. On shutdown, drains whatever remains in the
    /// queue exactly once before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.processing_interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        while self.tick().await > 0 {}
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }
}
