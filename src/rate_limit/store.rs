//! Abstract storage interface for rate limit state, shared by the
//! token-bucket algorithm so its state can later move to a distributed
//! backend without touching the algorithm itself.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Abstract storage interface for rate limit state (tokens, keyed by bucket).
#[async_trait]
pub trait TokenStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch the current state for a key: `(tokens, last_updated_nanos)`.
    async fn get_state(&self, key: &str) -> Result<Option<(f64, u64)>, Self::Error>;

    /// Compare-and-set update. `prev_updated_at` is the timestamp last read
    /// by the caller; `None` means "first write, key must not yet exist."
    /// Returns `Ok(false)` if a race was detected (caller should retry).
    async fn set_state(
        &self,
        key: &str,
        tokens: f64,
        updated_at: u64,
        prev_updated_at: Option<u64>,
    ) -> Result<bool, Self::Error>;

    /// Drop every key starting with `prefix`. Used to purge a single
    /// client's state (`reset(client_id)`) or an entire rule's state on
    /// removal, without the caller needing to enumerate live keys.
    async fn remove_prefix(&self, prefix: &str) -> Result<(), Self::Error>;
}

/// In-memory token store, sufficient for a single gateway process.
#[derive(Default, Clone, Debug)]
pub struct InMemoryTokenStore {
    data: Arc<Mutex<HashMap<String, (f64, u64)>>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    type Error = std::convert::Infallible;

    async fn get_state(&self, key: &str) -> Result<Option<(f64, u64)>, Self::Error> {
        let guard = self.data.lock().unwrap_or_else(|p| p.into_inner());
        Ok(guard.get(key).cloned())
    }

    async fn set_state(
        &self,
        key: &str,
        tokens: f64,
        updated_at: u64,
        prev_updated_at: Option<u64>,
    ) -> Result<bool, Self::Error> {
        let mut guard = self.data.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(prev) = prev_updated_at {
            if let Some(&(_, current_ts)) = guard.get(key) {
                if current_ts != prev {
                    return Ok(false);
                }
            } else if guard.contains_key(key) {
                return Ok(false);
            }
        }

        guard.insert(key.to_string(), (tokens, updated_at));
        Ok(true)
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<(), Self::Error> {
        let mut guard = self.data.lock().unwrap_or_else(|p| p.into_inner());
        guard.retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_state_detects_concurrent_write_race() {
        let store = InMemoryTokenStore::new();
        store.set_state("k", 10.0, 100, None).await.unwrap();

        let ok = store.set_state("k", 9.0, 101, Some(999)).await.unwrap();
        assert!(!ok, "stale prev_updated_at should be rejected");

        let ok = store.set_state("k", 9.0, 101, Some(100)).await.unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn remove_prefix_drops_only_matching_keys() {
        let store = InMemoryTokenStore::new();
        store.set_state("client-a", 1.0, 1, None).await.unwrap();
        store.set_state("client-a:burst", 1.0, 1, None).await.unwrap();
        store.set_state("client-b", 1.0, 1, None).await.unwrap();

        store.remove_prefix("client-a").await.unwrap();

        assert!(store.get_state("client-a").await.unwrap().is_none());
        assert!(store.get_state("client-a:burst").await.unwrap().is_none());
        assert!(store.get_state("client-b").await.unwrap().is_some());
    }
}
