//! Registry for managing named circuit breakers.
//!
//! Lets the Agent Facade and Connection Supervisor register one breaker per
//! peer/agent and look it up by id for inspection or reset (e.g. an operator
//! command to force-close a breaker).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerPolicy, CircuitState};

/// Registry keyed by breaker id.
#[derive(Default, Clone)]
pub struct CircuitBreakerRegistry {
    inner: Arc<Mutex<HashMap<String, CircuitBreakerPolicy>>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing breaker under `id`, overwriting any prior entry.
    pub fn register(&self, id: impl Into<String>, breaker: CircuitBreakerPolicy) {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).insert(id.into(), breaker);
    }

    /// Create and register a fresh breaker with the given config.
    pub fn register_new(&self, id: impl Into<String>, config: CircuitBreakerConfig) -> CircuitBreakerPolicy {
        let breaker = CircuitBreakerPolicy::with_config(config);
        self.register(id, breaker.clone());
        breaker
    }

    pub fn get(&self, id: &str) -> Option<CircuitBreakerPolicy> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).get(id).cloned()
    }

    /// Remove a breaker from the registry.
    pub fn remove(&self, id: &str) -> Option<CircuitBreakerPolicy> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).remove(id)
    }

    /// Snapshot of all breaker states (id -> state), sorted by id.
    pub fn snapshot(&self) -> Vec<(String, CircuitState)> {
        let map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let mut entries: Vec<(String, CircuitState)> = map.iter().map(|(k, v)| (k.clone(), v.state())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn register_and_fetch_by_id() {
        let registry = CircuitBreakerRegistry::new();
        registry.register_new("peer-a".to_string(), CircuitBreakerConfig::default());
        assert!(registry.get("peer-a").is_some());
        assert!(registry.get("peer-b").is_none());
    }

    #[test]
    fn snapshot_is_sorted_by_id() {
        let registry = CircuitBreakerRegistry::new();
        registry.register_new("zeta", CircuitBreakerConfig::disabled());
        registry.register_new("alpha", CircuitBreakerConfig::disabled());
        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].0, "alpha");
        assert_eq!(snapshot[1].0, "zeta");
    }

    #[test]
    fn remove_drops_entry() {
        let registry = CircuitBreakerRegistry::new();
        registry.register_new(
            "peer-a",
            CircuitBreakerConfig {
                volume_threshold: 3,
                error_threshold_percent: 50.0,
                recovery_timeout: Duration::from_secs(1),
                half_open_max_calls: 1,
                enabled: true,
            },
        );
        assert!(registry.remove("peer-a").is_some());
        assert!(registry.get("peer-a").is_none());
    }
}
