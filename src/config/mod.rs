//! Gateway configuration: connection, security, rate limiting, performance,
//! and logging settings, composed into one [`GatewayConfig`].
//!
//! Every section has a sane [`Default`]; deployments override only what they
//! need. Field names and nesting mirror the configuration document this
//! gateway is driven by rather than this crate's own module layout.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::rate_limit::RateRule;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    pub reconnect_interval_ms: u64,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 443,
            timeout: Duration::from_secs(10),
            reconnect_interval_ms: 2_000,
            max_reconnect_attempts: 10,
            heartbeat_interval_ms: 15_000,
        }
    }
}

impl ConnectionConfig {
    /// Build the [`crate::supervisor::SupervisorConfig`] this connection
    /// section describes.
    pub fn supervisor_config(&self) -> crate::supervisor::SupervisorConfig {
        crate::supervisor::SupervisorConfig {
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            max_missed_heartbeats: 3,
            max_reconnect_attempts: Some(self.max_reconnect_attempts as usize),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Password,
    ApiKey,
    Token,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityConfig {
    pub encryption_enabled: bool,
    pub server_key: Option<String>,
    pub client_key: Option<String>,
    pub auth_enabled: bool,
    pub method: AuthMethod,
    pub token_expiration_secs: u64,
    pub session_timeout_secs: u64,
    pub max_login_attempts: u32,
    pub lockout_duration_ms: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            encryption_enabled: true,
            server_key: None,
            client_key: None,
            auth_enabled: true,
            method: AuthMethod::Token,
            token_expiration_secs: 3_600,
            session_timeout_secs: 1_800,
            max_login_attempts: 5,
            lockout_duration_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitRuleConfig {
    pub name: String,
    pub capacity: f64,
    pub refill_per_sec: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitingConfig {
    pub enabled: bool,
    pub rules: Vec<RateLimitRuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PerformanceConfig {
    pub request_timeout_ms: u64,
    pub max_connections: u32,
    pub heartbeat_interval_ms: u64,
    pub event_batch_size: usize,
    pub event_processing_interval_ms: u64,
    pub max_event_queue_size: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5_000,
            max_connections: 8,
            heartbeat_interval_ms: 15_000,
            event_batch_size: 64,
            event_processing_interval_ms: 50,
            max_event_queue_size: 4_096,
        }
    }
}

impl PerformanceConfig {
    /// Build the [`crate::router::EventRouterConfig`] this performance
    /// section describes.
    pub fn router_config(&self) -> crate::router::EventRouterConfig {
        crate::router::EventRouterConfig::from(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutput {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub outputs: Vec<LogOutput>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: LogLevel::Info, format: LogFormat::Json, outputs: vec![LogOutput::Stdout] }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    pub connection: ConnectionConfig,
    pub security: SecurityConfig,
    pub rate_limiting: RateLimitingConfig,
    pub performance: PerformanceConfig,
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Parse configuration from a JSON document, rejecting unknown fields
    /// and out-of-range values.
    pub fn from_json(data: &str) -> Result<Self, GatewayError<String>> {
        let config: GatewayConfig = serde_json::from_str(data)
            .map_err(|e| GatewayError::Validation { details: format!("invalid configuration: {e}") })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GatewayError<String>> {
        if self.connection.host.is_empty() {
            return Err(GatewayError::Validation { details: "connection.host must not be empty".into() });
        }
        if self.connection.port == 0 {
            return Err(GatewayError::Validation { details: "connection.port must be nonzero".into() });
        }
        if self.performance.max_connections == 0 {
            return Err(GatewayError::Validation { details: "performance.max_connections must be nonzero".into() });
        }
        if self.security.auth_enabled && self.security.session_timeout_secs == 0 {
            return Err(GatewayError::Validation { details: "security.session_timeout_secs must be nonzero when auth is enabled".into() });
        }
        for rule in &self.rate_limiting.rules {
            if rule.capacity <= 0.0 {
                return Err(GatewayError::Validation { details: format!("rate rule '{}' must have positive capacity", rule.name) });
            }
        }
        Ok(())
    }

    /// Builds a [`RateRule`] set from the configured rules using a token
    /// bucket algorithm, the default strategy for this gateway.
    pub fn rate_rules(&self) -> Vec<RateRule> {
        use crate::rate_limit::store::InMemoryTokenStore;
        use crate::rate_limit::strategies::TokenBucket;
        use std::sync::Arc;

        self.rate_limiting
            .rules
            .iter()
            .map(|r| {
                RateRule::new(
                    r.name.clone(),
                    1,
                    Arc::new(TokenBucket::new(InMemoryTokenStore::new(), r.refill_per_sec, r.capacity)),
                )
            })
            .collect()
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        GatewayConfig::default().validate().unwrap();
    }

    #[test]
    fn empty_host_is_rejected() {
        let mut config = GatewayConfig::default();
        config.connection.host.clear();
        assert!(matches!(config.validate(), Err(GatewayError::Validation { .. })));
    }

    #[test]
    fn parses_a_full_json_document() {
        let json = serde_json::json!({
            "connection": {"host": "mt5.broker.example", "port": 443, "timeout": 10000, "reconnect_interval_ms": 2000, "max_reconnect_attempts": 10, "heartbeat_interval_ms": 15000},
            "security": {"encryption_enabled": true, "server_key": null, "client_key": null, "auth_enabled": true, "method": "token", "token_expiration_secs": 3600, "session_timeout_secs": 1800, "max_login_attempts": 5, "lockout_duration_ms": 60000},
            "rate_limiting": {"enabled": true, "rules": [{"name": "burst", "capacity": 100.0, "refill_per_sec": 50.0}]},
            "performance": {"request_timeout_ms": 5000, "max_connections": 8, "heartbeat_interval_ms": 15000, "event_batch_size": 64, "event_processing_interval_ms": 50, "max_event_queue_size": 4096},
            "logging": {"level": "info", "format": "json", "outputs": ["stdout"]}
        })
        .to_string();

        let config = GatewayConfig::from_json(&json).unwrap();
        assert_eq!(config.connection.host, "mt5.broker.example");
        assert_eq!(config.rate_limiting.rules.len(), 1);
    }

    #[test]
    fn connection_config_maps_to_bounded_supervisor_config() {
        let connection = ConnectionConfig { max_reconnect_attempts: 7, ..ConnectionConfig::default() };
        let supervisor = connection.supervisor_config();
        assert_eq!(supervisor.max_reconnect_attempts, Some(7));
    }

    #[test]
    fn rejects_unknown_fields() {
        let json = serde_json::json!({
            "connection": {"host": "x", "port": 1, "timeout": 1000, "reconnect_interval_ms": 1, "max_reconnect_attempts": 1, "heartbeat_interval_ms": 1, "bogus": true},
            "security": {"encryption_enabled": true, "server_key": null, "client_key": null, "auth_enabled": true, "method": "token", "token_expiration_secs": 1, "session_timeout_secs": 1, "max_login_attempts": 1, "lockout_duration_ms": 1},
            "rate_limiting": {"enabled": false, "rules": []},
            "performance": {"request_timeout_ms": 1, "max_connections": 1, "heartbeat_interval_ms": 1, "event_batch_size": 1, "event_processing_interval_ms": 1, "max_event_queue_size": 1},
            "logging": {"level": "info", "format": "json", "outputs": ["stdout"]}
        })
        .to_string();

        assert!(GatewayConfig::from_json(&json).is_err());
    }
}
