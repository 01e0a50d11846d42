//! Backoff strategies for the retry policy.

use std::sync::Arc;
use std::time::Duration;

/// Backoff strategy for retries.
#[derive(Clone)]
pub enum Backoff {
    /// Fixed delay between retries.
    Constant { delay: Duration },
    /// Linearly increasing delay.
    Linear { base: Duration },
    /// Exponentially increasing delay with optional cap.
    Exponential { base: Duration, max: Option<Duration> },
    /// Delay grows along the Fibonacci sequence, scaled by `unit`.
    Fibonacci { unit: Duration, max: Option<Duration> },
    /// Caller-supplied delay function, keyed by 1-indexed attempt number.
    Custom(Arc<dyn Fn(usize) -> Duration + Send + Sync>),
}

impl std::fmt::Debug for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Constant { delay } => f.debug_struct("Constant").field("delay", delay).finish(),
            Self::Linear { base } => f.debug_struct("Linear").field("base", base).finish(),
            Self::Exponential { base, max } => {
                f.debug_struct("Exponential").field("base", base).field("max", max).finish()
            }
            Self::Fibonacci { unit, max } => {
                f.debug_struct("Fibonacci").field("unit", unit).field("max", max).finish()
            }
            Self::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

impl Backoff {
    pub fn constant(delay: Duration) -> Self {
        Backoff::Constant { delay }
    }

    pub fn linear(base: Duration) -> Self {
        Backoff::Linear { base }
    }

    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential { base, max: None }
    }

    pub fn fibonacci(unit: Duration) -> Self {
        Backoff::Fibonacci { unit, max: None }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(usize) -> Duration + Send + Sync + 'static,
    {
        Backoff::Custom(Arc::new(f))
    }

    /// Set a maximum delay. Applies to `Exponential` and `Fibonacci`; ignored
    /// for the other variants.
    pub fn with_max(mut self, max: Duration) -> Self {
        match &mut self {
            Backoff::Exponential { max: m, .. } => *m = Some(max),
            Backoff::Fibonacci { max: m, .. } => *m = Some(max),
            _ => {}
        }
        self
    }

    /// Calculate the delay for a given attempt number (1-indexed).
    pub fn delay(&self, attempt: usize) -> Duration {
        match self {
            Backoff::Constant { delay } => *delay,
            Backoff::Linear { base } => {
                base.checked_mul(attempt as u32).unwrap_or(Duration::from_secs(u64::MAX))
            }
            Backoff::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1) as u32;
                let multiplier = 2u32.saturating_pow(exponent);
                let exp_delay = base.checked_mul(multiplier).unwrap_or(Duration::from_secs(u64::MAX));
                match max {
                    Some(max) => exp_delay.min(*max),
                    None => exp_delay,
                }
            }
            Backoff::Fibonacci { unit, max } => {
                let fib = fibonacci(attempt);
                let delay = unit.checked_mul(fib).unwrap_or(Duration::from_secs(u64::MAX));
                match max {
                    Some(max) => delay.min(*max),
                    None => delay,
                }
            }
            Backoff::Custom(f) => f(attempt),
        }
    }
}

/// 1-indexed Fibonacci sequence (1, 1, 2, 3, 5, 8, ...), saturating at u32::MAX.
fn fibonacci(n: usize) -> u32 {
    if n == 0 {
        return 0;
    }
    let (mut a, mut b) = (1u32, 1u32);
    for _ in 1..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_backoff_returns_same_delay() {
        let backoff = Backoff::constant(Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(100), Duration::from_secs(1));
    }

    #[test]
    fn linear_backoff_increases_linearly() {
        let backoff = Backoff::linear(Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(3), Duration::from_millis(300));
    }

    #[test]
    fn exponential_backoff_doubles_each_time() {
        let backoff = Backoff::exponential(Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(4), Duration::from_millis(800));
    }

    #[test]
    fn exponential_backoff_respects_max() {
        let backoff = Backoff::exponential(Duration::from_millis(100)).with_max(Duration::from_secs(1));
        assert_eq!(backoff.delay(5), Duration::from_secs(1));
        assert_eq!(backoff.delay(10), Duration::from_secs(1));
    }

    #[test]
    fn fibonacci_backoff_follows_sequence() {
        let backoff = Backoff::fibonacci(Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(100));
        assert_eq!(backoff.delay(3), Duration::from_millis(200));
        assert_eq!(backoff.delay(4), Duration::from_millis(300));
        assert_eq!(backoff.delay(5), Duration::from_millis(500));
        assert_eq!(backoff.delay(6), Duration::from_millis(800));
    }

    #[test]
    fn fibonacci_backoff_respects_max() {
        let backoff = Backoff::fibonacci(Duration::from_millis(100)).with_max(Duration::from_millis(250));
        assert_eq!(backoff.delay(4), Duration::from_millis(250));
    }

    #[test]
    fn custom_backoff_calls_provided_function() {
        let backoff = Backoff::custom(|attempt| Duration::from_millis((attempt * 17) as u64));
        assert_eq!(backoff.delay(3), Duration::from_millis(51));
    }

    #[test]
    fn exponential_backoff_handles_overflow() {
        let backoff = Backoff::exponential(Duration::from_secs(1));
        let delay = backoff.delay(64);
        assert!(delay > Duration::from_secs(1_000_000));
    }

    #[test]
    fn with_max_only_affects_exponential_and_fibonacci() {
        let constant = Backoff::constant(Duration::from_secs(5)).with_max(Duration::from_secs(1));
        assert_eq!(constant.delay(1), Duration::from_secs(5));
        let linear = Backoff::linear(Duration::from_secs(5)).with_max(Duration::from_secs(1));
        assert_eq!(linear.delay(2), Duration::from_secs(10));
    }
}
