//! Rate limiting: a priority-ordered rule set, each rule independently
//! backed by one of the three algorithms in `strategies`.

pub mod store;
pub mod strategies;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use strategies::RateAlgorithm;

/// The decision returned by a rate limiter.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allowed { remaining: u32, metadata: HashMap<String, String> },
    Denied { wait: Duration, reason: String },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// One named, prioritized rate rule.
pub struct RateRule {
    pub name: String,
    pub priority: i32,
    algorithm: Arc<dyn RateAlgorithm>,
}

impl RateRule {
    pub fn new(name: impl Into<String>, priority: i32, algorithm: Arc<dyn RateAlgorithm>) -> Self {
        Self { name: name.into(), priority, algorithm }
    }

    async fn check(&self, key: &str, permits: u32) -> Decision {
        self.algorithm.acquire(key, permits).await
    }
}

/// Ordered collection of rules; admission requires every rule to allow the
/// call. Rules are evaluated in descending priority order and the first
/// denial short-circuits the rest.
#[derive(Default)]
pub struct RuleSet {
    rules: Vec<RateRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: RateRule) -> Self {
        self.rules.push(rule);
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        self
    }

    pub fn add_rule(&mut self, rule: RateRule) {
        self.rules.push(rule);
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Remove the rule named `name`, if present. Its per-client state is
    /// reclaimed automatically once the rule's `Arc<dyn RateAlgorithm>` is
    /// dropped, so no separate purge step is needed.
    pub fn remove_rule(&mut self, name: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.name != name);
        self.rules.len() != before
    }

    /// Replace the rule named `name` with `rule`, preserving sort order.
    /// Returns `false` if no rule with that name existed.
    pub fn update_rule(&mut self, name: &str, rule: RateRule) -> bool {
        if !self.remove_rule(name) {
            return false;
        }
        self.add_rule(rule);
        true
    }

    /// Purge `client_id`'s state across every rule, so its next call is
    /// admitted as if it had never been seen.
    pub async fn reset(&self, client_id: &str) {
        for rule in &self.rules {
            rule.algorithm.reset(client_id).await;
        }
    }

    /// Check all rules for `key`; returns the first denial encountered, or
    /// an `Allowed` decision carrying the smallest remaining count across
    /// every rule that was checked.
    pub async fn check(&self, key: &str, permits: u32) -> Decision {
        let mut min_remaining = u32::MAX;
        for rule in &self.rules {
            match rule.check(key, permits).await {
                Decision::Denied { wait, reason } => {
                    return Decision::Denied { wait, reason: format!("{}:{reason}", rule.name) };
                }
                Decision::Allowed { remaining, .. } => {
                    min_remaining = min_remaining.min(remaining);
                }
            }
        }
        if self.rules.is_empty() {
            min_remaining = 0;
        }
        Decision::Allowed { remaining: min_remaining, metadata: Default::default() }
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name.as_str()).collect()
    }
}
