//! The three rate-limiting algorithms backing a `RateRule`.

use crate::adaptive::Adaptive;
use crate::rate_limit::store::TokenStore;
use crate::rate_limit::Decision;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Per-key rate-limit check, independent of how state is stored.
#[async_trait]
pub trait RateAlgorithm: Send + Sync {
    async fn acquire(&self, key: &str, permits: u32) -> Decision;

    /// Purge all state held for `key` (and any sub-keys it prefixes).
    /// Called by [`crate::rate_limit::RuleSet::reset`] to clear a single
    /// client's admission history across every rule.
    async fn reset(&self, key: &str);
}

fn now_nanos() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64
}

/// Replenishes tokens at a fixed `rate` per second, up to `capacity`, using
/// an optimistic compare-and-set loop against the backing `TokenStore`.
pub struct TokenBucket<S> {
    store: Arc<S>,
    rate: Adaptive<f64>,
    capacity: Adaptive<f64>,
}

impl<S> TokenBucket<S>
where
    S: TokenStore + Send + Sync + 'static,
{
    pub fn new(store: S, rate: f64, capacity: f64) -> Self {
        Self { store: Arc::new(store), rate: Adaptive::new(rate), capacity: Adaptive::new(capacity) }
    }

    pub fn set_rate(&self, rate: f64) {
        self.rate.set(rate);
    }
}

#[async_trait]
impl<S> RateAlgorithm for TokenBucket<S>
where
    S: TokenStore + Send + Sync + 'static,
{
    async fn acquire(&self, key: &str, permits: u32) -> Decision {
        let now = now_nanos();
        let cost = permits as f64;
        let rate = *self.rate.get();
        let capacity = *self.capacity.get();

        for _ in 0..3 {
            let (current_tokens, last_updated) = match self.store.get_state(key).await {
                Ok(Some((t, u))) => (t, u),
                Ok(None) => (capacity, now),
                Err(_) => return Decision::Denied { wait: Duration::from_millis(50), reason: "store_error".into() },
            };

            let elapsed_secs = (now.saturating_sub(last_updated) as f64) / 1_000_000_000.0;
            let new_tokens = (current_tokens + elapsed_secs * rate).min(capacity);

            if new_tokens >= cost {
                let final_tokens = new_tokens - cost;
                if matches!(self.store.set_state(key, final_tokens, now, Some(last_updated)).await, Ok(true)) {
                    return Decision::Allowed { remaining: final_tokens as u32, metadata: Default::default() };
                }
                continue;
            }

            let missing = cost - new_tokens;
            let wait_secs = if rate > 0.0 { missing / rate } else { 1.0 };
            return Decision::Denied {
                wait: Duration::from_secs_f64(wait_secs),
                reason: "token_bucket_empty".into(),
            };
        }

        Decision::Denied { wait: Duration::from_millis(100), reason: "store_contention".into() }
    }

    async fn reset(&self, key: &str) {
        let _ = self.store.remove_prefix(key).await;
    }
}

/// Counts weighted events in a rolling window; each admitted call is
/// recorded as `(timestamp_nanos, weight)` so differently-weighted calls
/// (e.g. a bulk quote request costing more than a single order) are
/// accounted for precisely rather than as a flat per-call increment.
pub struct SlidingWindow {
    window: Duration,
    max_weight: u32,
    entries: Mutex<HashMap<String, Vec<(u64, u32)>>>,
}

impl SlidingWindow {
    pub fn new(window: Duration, max_weight: u32) -> Self {
        Self { window, max_weight, entries: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl RateAlgorithm for SlidingWindow {
    async fn acquire(&self, key: &str, permits: u32) -> Decision {
        let now = now_nanos();
        let window_nanos = self.window.as_nanos() as u64;
        let mut guard = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let entry = guard.entry(key.to_string()).or_default();
        entry.retain(|(ts, _)| now.saturating_sub(*ts) <= window_nanos);

        let current_weight: u32 = entry.iter().map(|(_, w)| *w).sum();
        if current_weight + permits <= self.max_weight {
            entry.push((now, permits));
            Decision::Allowed { remaining: self.max_weight - current_weight - permits, metadata: Default::default() }
        } else {
            let oldest = entry.iter().map(|(ts, _)| *ts).min().unwrap_or(now);
            let retry_in_nanos = window_nanos.saturating_sub(now.saturating_sub(oldest));
            Decision::Denied {
                wait: Duration::from_nanos(retry_in_nanos),
                reason: "sliding_window_exceeded".into(),
            }
        }
    }

    async fn reset(&self, key: &str) {
        let mut guard = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        guard.retain(|k, _| !k.starts_with(key));
    }
}

/// Counts events in a fixed, aligned window (e.g. per calendar second); the
/// counter resets the instant a new window begins rather than decaying.
pub struct FixedWindow {
    window: Duration,
    max_count: u32,
    entries: Mutex<HashMap<String, (u64, u32)>>,
}

impl FixedWindow {
    pub fn new(window: Duration, max_count: u32) -> Self {
        Self { window, max_count, entries: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl RateAlgorithm for FixedWindow {
    async fn acquire(&self, key: &str, permits: u32) -> Decision {
        let now = now_nanos();
        let window_nanos = self.window.as_nanos() as u64;
        let window_start = (now / window_nanos) * window_nanos;

        let mut guard = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let entry = guard.entry(key.to_string()).or_insert((window_start, 0));

        if entry.0 != window_start {
            *entry = (window_start, 0);
        }

        if entry.1 + permits <= self.max_count {
            entry.1 += permits;
            Decision::Allowed { remaining: self.max_count - entry.1, metadata: Default::default() }
        } else {
            let retry_in_nanos = (window_start + window_nanos).saturating_sub(now);
            Decision::Denied { wait: Duration::from_nanos(retry_in_nanos), reason: "fixed_window_exceeded".into() }
        }
    }

    async fn reset(&self, key: &str) {
        let mut guard = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        guard.retain(|k, _| !k.starts_with(key));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::store::InMemoryTokenStore;

    #[tokio::test]
    async fn token_bucket_denies_when_empty() {
        let bucket = TokenBucket::new(InMemoryTokenStore::new(), 1.0, 2.0);
        assert!(bucket.acquire("k", 1).await.is_allowed());
        assert!(bucket.acquire("k", 1).await.is_allowed());
        assert!(!bucket.acquire("k", 1).await.is_allowed());
    }

    #[tokio::test]
    async fn sliding_window_tracks_weight_not_just_count() {
        let window = SlidingWindow::new(Duration::from_secs(60), 10);
        assert!(window.acquire("k", 6).await.is_allowed());
        assert!(!window.acquire("k", 6).await.is_allowed());
        assert!(window.acquire("k", 4).await.is_allowed());
    }

    #[tokio::test]
    async fn fixed_window_resets_count_between_windows() {
        let limiter = FixedWindow::new(Duration::from_nanos(1), 1);
        assert!(limiter.acquire("k", 1).await.is_allowed());
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(limiter.acquire("k", 1).await.is_allowed());
    }

    #[tokio::test]
    async fn reset_clears_a_clients_state_in_each_algorithm() {
        let bucket = TokenBucket::new(InMemoryTokenStore::new(), 1.0, 1.0);
        assert!(bucket.acquire("k", 1).await.is_allowed());
        assert!(!bucket.acquire("k", 1).await.is_allowed());
        bucket.reset("k").await;
        assert!(bucket.acquire("k", 1).await.is_allowed());

        let window = FixedWindow::new(Duration::from_secs(60), 1);
        assert!(window.acquire("k", 1).await.is_allowed());
        assert!(!window.acquire("k", 1).await.is_allowed());
        window.reset("k").await;
        assert!(window.acquire("k", 1).await.is_allowed());
    }
}
