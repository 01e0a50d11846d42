//! Error taxonomy shared by every component of the gateway core.
//!
//! One generic enum carries a variant per failure kind named in the error
//! handling design, plus an `Inner(E)` escape hatch for translator/transport
//! errors that don't originate in the core itself.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Stable, externally-visible error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorCode(pub &'static str);

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable error codes keyed by failure family.
pub mod codes {
    use super::ErrorCode;

    pub const CONNECTION_LOST: ErrorCode = ErrorCode("E001");
    pub const CONNECTION_TIMEOUT: ErrorCode = ErrorCode("E002");
    pub const CONNECTION_UNREACHABLE: ErrorCode = ErrorCode("E003");
    pub const CONNECTION_REFUSED: ErrorCode = ErrorCode("E004");

    pub const TRADE_REJECTED: ErrorCode = ErrorCode("E101");
    pub const TRADE_INVALID_VOLUME: ErrorCode = ErrorCode("E102");
    pub const TRADE_INVALID_PRICE: ErrorCode = ErrorCode("E103");
    pub const TRADE_MARKET_CLOSED: ErrorCode = ErrorCode("E104");
    pub const TRADE_INSUFFICIENT_MARGIN: ErrorCode = ErrorCode("E105");
    pub const TRADE_POSITION_NOT_FOUND: ErrorCode = ErrorCode("E106");
    pub const TRADE_ORDER_NOT_FOUND: ErrorCode = ErrorCode("E107");
    pub const TRADE_TIMEOUT: ErrorCode = ErrorCode("E108");

    pub const MARKET_SYMBOL_UNKNOWN: ErrorCode = ErrorCode("E201");
    pub const MARKET_NO_DATA: ErrorCode = ErrorCode("E202");
    pub const MARKET_INVALID_TIMEFRAME: ErrorCode = ErrorCode("E203");
    pub const MARKET_SUBSCRIPTION_FAILED: ErrorCode = ErrorCode("E204");

    pub const ACCOUNT_NOT_FOUND: ErrorCode = ErrorCode("E301");
    pub const ACCOUNT_ACCESS_DENIED: ErrorCode = ErrorCode("E302");
    pub const ACCOUNT_STALE: ErrorCode = ErrorCode("E303");

    pub const SYSTEM_INTERNAL: ErrorCode = ErrorCode("E901");
    pub const SYSTEM_RATE_LIMITED: ErrorCode = ErrorCode("E902");
    pub const SYSTEM_CIRCUIT_OPEN: ErrorCode = ErrorCode("E903");
    pub const SYSTEM_UNAUTHORIZED: ErrorCode = ErrorCode("E904");
    pub const SYSTEM_VALIDATION: ErrorCode = ErrorCode("E905");
}

/// Unified error type for the whole gateway core.
///
/// `E` is the domain-level inner error type a translator or transport codec
/// may surface; every other variant is produced by the core itself and
/// carries no domain payload.
#[derive(Debug)]
pub enum GatewayError<E> {
    /// A translator rejected a malformed or out-of-range payload.
    Validation { details: String },
    /// Session expired, was never established, or credentials were rejected.
    Authentication { details: String },
    /// Session is valid but lacks the permission the call requires.
    Authorization { details: String },
    /// The socket/connection is down; pending work was or will be failed.
    Connection { details: String },
    /// A request's deadline elapsed before a reply arrived.
    Timeout { elapsed: Duration, timeout: Duration },
    /// The caller cancelled a pending request before it resolved.
    Cancelled,
    /// A rate-limit rule denied the call.
    RateLimited { retry_after: Duration, rule: String },
    /// The circuit breaker is open (or half-open and saturated).
    CircuitOpen { failure_count: usize, open_duration: Duration },
    /// All retry attempts were exhausted.
    RetryExhausted { attempts: usize, failures: Vec<GatewayError<E>> },
    /// The retry policy was aborted via its cancellation signal.
    Aborted,
    /// A trading-side call failed.
    Trade { code: ErrorCode, details: String },
    /// A market-data call failed.
    MarketData { code: ErrorCode, details: String },
    /// An account call failed.
    Account { code: ErrorCode, details: String },
    /// Encryption/decryption of an envelope failed.
    Security { details: String },
    /// Anything else: serialization failures, poisoned locks, bugs.
    Internal { details: String },
    /// A domain-level error produced outside the core (translator input).
    Inner(E),
}

impl<E: Clone> Clone for GatewayError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Validation { details } => Self::Validation { details: details.clone() },
            Self::Authentication { details } => Self::Authentication { details: details.clone() },
            Self::Authorization { details } => Self::Authorization { details: details.clone() },
            Self::Connection { details } => Self::Connection { details: details.clone() },
            Self::Timeout { elapsed, timeout } => Self::Timeout { elapsed: *elapsed, timeout: *timeout },
            Self::Cancelled => Self::Cancelled,
            Self::RateLimited { retry_after, rule } => {
                Self::RateLimited { retry_after: *retry_after, rule: rule.clone() }
            }
            Self::CircuitOpen { failure_count, open_duration } => {
                Self::CircuitOpen { failure_count: *failure_count, open_duration: *open_duration }
            }
            Self::RetryExhausted { attempts, failures } => {
                Self::RetryExhausted { attempts: *attempts, failures: failures.clone() }
            }
            Self::Aborted => Self::Aborted,
            Self::Trade { code, details } => Self::Trade { code: *code, details: details.clone() },
            Self::MarketData { code, details } => Self::MarketData { code: *code, details: details.clone() },
            Self::Account { code, details } => Self::Account { code: *code, details: details.clone() },
            Self::Security { details } => Self::Security { details: details.clone() },
            Self::Internal { details } => Self::Internal { details: details.clone() },
            Self::Inner(e) => Self::Inner(e.clone()),
        }
    }
}

impl<E: fmt::Display> fmt::Display for GatewayError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { details } => write!(f, "validation failed: {details}"),
            Self::Authentication { details } => write!(f, "authentication failed: {details}"),
            Self::Authorization { details } => write!(f, "authorization denied: {details}"),
            Self::Connection { details } => write!(f, "connection error: {details}"),
            Self::Timeout { elapsed, timeout } => {
                write!(f, "operation timed out after {elapsed:?} (limit: {timeout:?})")
            }
            Self::Cancelled => write!(f, "request cancelled"),
            Self::RateLimited { retry_after, rule } => {
                write!(f, "rate limited by rule '{rule}', retry after {retry_after:?}")
            }
            Self::CircuitOpen { failure_count, open_duration } => {
                write!(f, "circuit breaker open ({failure_count} failures, open for {open_duration:?})")
            }
            Self::RetryExhausted { attempts, failures } => {
                let last = failures.last().map(|e| e.to_string()).unwrap_or_default();
                write!(
                    f,
                    "retry exhausted after {attempts} attempts ({} failures), last error: {last}",
                    failures.len()
                )
            }
            Self::Aborted => write!(f, "retry aborted"),
            Self::Trade { code, details } => write!(f, "trade error {code}: {details}"),
            Self::MarketData { code, details } => write!(f, "market data error {code}: {details}"),
            Self::Account { code, details } => write!(f, "account error {code}: {details}"),
            Self::Security { details } => write!(f, "security error: {details}"),
            Self::Internal { details } => write!(f, "internal error: {details}"),
            Self::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for GatewayError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> GatewayError<E> {
    /// The error kind as a stable tag, independent of any attached details.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "Validation",
            Self::Authentication { .. } => "Authentication",
            Self::Authorization { .. } => "Authorization",
            Self::Connection { .. } => "Connection",
            Self::Timeout { .. } => "Timeout",
            Self::Cancelled => "Cancelled",
            Self::RateLimited { .. } => "RateLimited",
            Self::CircuitOpen { .. } => "CircuitOpen",
            Self::RetryExhausted { .. } => "RetryExhausted",
            Self::Aborted => "Aborted",
            Self::Trade { .. } => "Trade",
            Self::MarketData { .. } => "MarketData",
            Self::Account { .. } => "Account",
            Self::Security { .. } => "Security",
            Self::Internal { .. } => "Internal",
            Self::Inner(_) => "Inner",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

/// Wire-safe rendering of a `GatewayError`, used when a failure needs to
/// cross a process boundary (serializable to and from a canonical shape).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireError {
    pub kind: String,
    pub code: Option<&'static str>,
    pub details: String,
    pub timestamp_millis: u128,
}

impl<E: fmt::Display> From<&GatewayError<E>> for WireError {
    fn from(err: &GatewayError<E>) -> Self {
        let code = match err {
            GatewayError::Connection { .. } => Some(codes::CONNECTION_LOST.0),
            GatewayError::Timeout { .. } => Some(codes::CONNECTION_TIMEOUT.0),
            GatewayError::RateLimited { .. } => Some(codes::SYSTEM_RATE_LIMITED.0),
            GatewayError::CircuitOpen { .. } => Some(codes::SYSTEM_CIRCUIT_OPEN.0),
            GatewayError::Authorization { .. } => Some(codes::SYSTEM_UNAUTHORIZED.0),
            GatewayError::Validation { .. } => Some(codes::SYSTEM_VALIDATION.0),
            GatewayError::Trade { code, .. } => Some(code.0),
            GatewayError::MarketData { code, .. } => Some(code.0),
            GatewayError::Account { code, .. } => Some(code.0),
            GatewayError::Internal { .. } => Some(codes::SYSTEM_INTERNAL.0),
            _ => None,
        };
        Self {
            kind: err.kind().to_string(),
            code,
            details: err.to_string(),
            timestamp_millis: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn timeout_display_includes_durations() {
        let err: GatewayError<io::Error> =
            GatewayError::Timeout { elapsed: Duration::from_millis(120), timeout: Duration::from_millis(50) };
        let msg = err.to_string();
        assert!(msg.contains("120ms"));
        assert!(msg.contains("50ms"));
        assert!(err.is_timeout());
    }

    #[test]
    fn wire_error_carries_stable_code() {
        let err: GatewayError<io::Error> = GatewayError::RateLimited {
            retry_after: Duration::from_millis(10),
            rule: "auth:peer".into(),
        };
        let wire = WireError::from(&err);
        assert_eq!(wire.code, Some("E902"));
        assert_eq!(wire.kind, "RateLimited");
    }

    #[test]
    fn retry_exhausted_keeps_failure_list() {
        let failures: Vec<GatewayError<io::Error>> = (0..3)
            .map(|i| GatewayError::Internal { details: format!("attempt {i}") })
            .collect();
        let err: GatewayError<io::Error> = GatewayError::RetryExhausted { attempts: 3, failures };
        assert!(err.is_retry_exhausted());
        assert!(err.to_string().contains("attempt 2"));
    }

    #[test]
    fn circuit_open_display() {
        let err: GatewayError<io::Error> =
            GatewayError::CircuitOpen { failure_count: 10, open_duration: Duration::from_secs(30) };
        let msg = err.to_string();
        assert!(msg.contains("circuit breaker"));
        assert!(msg.contains("10"));
    }

    #[test]
    fn into_inner_extracts_error() {
        let io_err = io::Error::new(io::ErrorKind::Other, "test");
        let err: GatewayError<io::Error> = GatewayError::Inner(io_err);
        let extracted = err.into_inner().unwrap();
        assert_eq!(extracted.to_string(), "test");
    }
}
