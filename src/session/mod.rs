//! Session & Authorization: authenticates callers, tracks active sessions
//! with expiry, checks permissions per action, and audits every decision.
//!
//! Generalizes the pluggable `AuthProvider`/`AuthRegistry` pattern into a
//! session-oriented shape: a session is established once via
//! [`SessionManager::authenticate`] and then repeatedly validated/authorized
//! by id for each subsequent call, rather than re-authenticating credentials
//! on every request.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::rate_limit::RuleSet;
use crate::telemetry::{events::SessionEvent, GatewayEvent, TelemetrySink};

/// Wildcard permission: grants every action.
pub const PERMISSION_WILDCARD: &str = "*";

/// What the caller presented about the peer originating a request, carried
/// through to the audit log and the dedicated `auth:peer` rate-limit rule.
#[derive(Debug, Clone, Default)]
pub struct PeerInfo {
    pub address: Option<String>,
    pub user_agent: Option<String>,
}

impl PeerInfo {
    fn rate_limit_key(&self) -> String {
        format!("auth:peer:{}", self.address.as_deref().unwrap_or("unknown"))
    }
}

/// Credentials presented when establishing a session.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum AuthPayload {
    Jwt { token: String },
    Signatures { payload_hash: [u8; 32], signatures: Vec<DetachedSig> },
    Mtls { peer_dn: String, cert_chain: Vec<Vec<u8>> },
    Opaque(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct DetachedSig {
    pub algorithm: String,
    pub signature: Vec<u8>,
    pub key_id: Option<String>,
}

/// Result of successful authentication: who the caller is and what they can
/// do, independent of which provider established it.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub principal: String,
    pub provider: &'static str,
    pub attributes: HashMap<String, String>,
    /// Granted permissions; `checkPermission` passes iff this set contains
    /// the requested action or [`PERMISSION_WILDCARD`].
    pub permissions: HashSet<String>,
}

impl AuthContext {
    fn permits(&self, action: &str) -> bool {
        self.permissions.contains(PERMISSION_WILDCARD) || self.permissions.contains(action)
    }
}

/// A live session: an authenticated identity plus its lifetime.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub context: AuthContext,
    pub created_at: Instant,
    pub last_seen: Instant,
    pub ttl: Duration,
}

impl Session {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.last_seen) > self.ttl
    }
}

/// Pluggable authentication/authorization provider, tried in registration
/// order by the [`SessionManager`].
#[async_trait]
pub trait SessionAuthProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn authenticate(&self, auth: &AuthPayload) -> Result<AuthContext, GatewayError<String>>;

    /// Fail-closed by default: providers must explicitly grant an action.
    async fn authorize(&self, _ctx: &AuthContext, _action: &str) -> Result<(), GatewayError<String>> {
        Err(GatewayError::Authorization { details: "default authorize denies all".into() })
    }
}

/// Dev/test provider granting "anonymous" access to everything.
///
/// DO NOT USE IN PRODUCTION.
pub struct PassthroughAuth;

#[async_trait]
impl SessionAuthProvider for PassthroughAuth {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    async fn authenticate(&self, _auth: &AuthPayload) -> Result<AuthContext, GatewayError<String>> {
        Ok(AuthContext {
            principal: "anonymous".into(),
            provider: self.name(),
            attributes: HashMap::new(),
            permissions: HashSet::from([PERMISSION_WILDCARD.to_string()]),
        })
    }

    async fn authorize(&self, _ctx: &AuthContext, _action: &str) -> Result<(), GatewayError<String>> {
        Ok(())
    }
}

/// Strategy for combining multiple providers during establishment.
#[derive(Clone, Copy, Debug)]
pub enum AuthMode {
    /// First provider that authenticates wins; its own authorization
    /// decision is final (no later provider can override a denial).
    First,
    /// All providers must authenticate and authorize; the principal comes
    /// from the first provider, attributes merge with later providers
    /// overwriting earlier keys on conflict.
    All,
}

/// Audit sink for session lifecycle and permission decisions.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry);
}

/// Severity of an audited event, from routine to actionable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    fn label(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: String,
    pub ts_millis: u64,
    pub event: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub peer: Option<String>,
    pub success: bool,
    pub risk: RiskLevel,
    pub details: String,
}

/// Logs audit entries through `tracing`.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: AuditEntry) {
        tracing::info!(
            target: "gateway::audit",
            id = %entry.id,
            session_id = entry.session_id.as_deref().unwrap_or("-"),
            user_id = entry.user_id.as_deref().unwrap_or("-"),
            peer = entry.peer.as_deref().unwrap_or("-"),
            event = %entry.event,
            success = entry.success,
            risk = entry.risk.label(),
            details = %entry.details,
            "audit"
        );
    }
}

/// Retains audit entries in memory (tests, diagnostics).
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: AuditEntry) {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).push(entry);
    }
}

/// Establishes sessions, validates them on each call, checks permissions,
/// and audits every decision.
pub struct SessionManager {
    providers: Vec<Arc<dyn SessionAuthProvider>>,
    mode: AuthMode,
    sessions: Mutex<HashMap<String, Session>>,
    default_ttl: Duration,
    audit: Option<Arc<dyn AuditSink>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    /// Dedicated rate limiting for `authenticate`, keyed by `auth:peer:*`
    /// rather than by principal (the caller isn't authenticated yet).
    auth_rate_limit: Option<RuleSet>,
}

impl SessionManager {
    pub fn new(mode: AuthMode, default_ttl: Duration) -> Self {
        Self {
            providers: Vec::new(),
            mode,
            sessions: Mutex::new(HashMap::new()),
            default_ttl,
            audit: None,
            telemetry: None,
            auth_rate_limit: None,
        }
    }

    pub fn register_provider(&mut self, provider: Arc<dyn SessionAuthProvider>) {
        self.providers.push(provider);
    }

    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn with_auth_rate_limit(mut self, rules: RuleSet) -> Self {
        self.auth_rate_limit = Some(rules);
        self
    }

    /// Authenticate credentials and establish a new session, returning its id.
    pub async fn authenticate(&self, auth: &AuthPayload, peer_info: Option<PeerInfo>) -> Result<String, GatewayError<String>> {
        let peer_info = peer_info.unwrap_or_default();

        if let Some(rules) = &self.auth_rate_limit {
            if let crate::rate_limit::Decision::Denied { wait, reason } = rules.check(&peer_info.rate_limit_key(), 1).await {
                let err = GatewayError::RateLimited { retry_after: wait, rule: reason };
                self.audit(None, None, peer_info.address.clone(), "authenticate", false, RiskLevel::Medium, &err.to_string()).await;
                if let Some(sink) = &self.telemetry {
                    sink.emit(GatewayEvent::Session(SessionEvent::AuthenticationFailed { reason: err.to_string() })).await;
                }
                return Err(err);
            }
        }

        let result = match self.mode {
            AuthMode::First => self.authenticate_first(auth).await,
            AuthMode::All => self.authenticate_all(auth).await,
        };

        let ctx = match result {
            Ok(ctx) => ctx,
            Err(e) => {
                self.audit(None, None, peer_info.address.clone(), "authenticate", false, RiskLevel::High, &e.to_string()).await;
                if let Some(sink) = &self.telemetry {
                    sink.emit(GatewayEvent::Session(SessionEvent::AuthenticationFailed { reason: e.to_string() })).await;
                }
                return Err(e);
            }
        };

        let id = uuid::Uuid::new_v4().to_string();
        let now = Instant::now();
        self.sessions.lock().unwrap_or_else(|p| p.into_inner()).insert(
            id.clone(),
            Session { id: id.clone(), context: ctx.clone(), created_at: now, last_seen: now, ttl: self.default_ttl },
        );
        self.audit(Some(id.clone()), Some(ctx.principal.clone()), peer_info.address.clone(), "authenticate", true, RiskLevel::Low, "ok").await;
        if let Some(sink) = &self.telemetry {
            sink.emit(GatewayEvent::Session(SessionEvent::Authenticated { principal: ctx.principal.clone(), provider: ctx.provider })).await;
        }
        Ok(id)
    }

    async fn authenticate_first(&self, auth: &AuthPayload) -> Result<AuthContext, GatewayError<String>> {
        let mut last_err = None;
        for provider in &self.providers {
            match provider.authenticate(auth).await {
                Ok(ctx) => return Ok(ctx),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or(GatewayError::Authentication { details: "no providers registered".into() }))
    }

    async fn authenticate_all(&self, auth: &AuthPayload) -> Result<AuthContext, GatewayError<String>> {
        let mut contexts = Vec::new();
        for provider in &self.providers {
            contexts.push(provider.authenticate(auth).await?);
        }
        let mut iter = contexts.into_iter();
        let mut base = iter.next().ok_or(GatewayError::Authentication { details: "no providers registered".into() })?;
        for ctx in iter {
            base.attributes.extend(ctx.attributes);
        }
        Ok(base)
    }

    /// Validate that `session_id` refers to a live, unexpired session,
    /// refreshing its last-seen time. This is the `validateActive` step of
    /// the call pipeline.
    pub async fn validate_active(&self, session_id: &str) -> Result<AuthContext, GatewayError<String>> {
        let mut guard = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();

        match guard.get_mut(session_id) {
            Some(session) if !session.is_expired(now) => {
                session.last_seen = now;
                Ok(session.context.clone())
            }
            Some(_) => {
                guard.remove(session_id);
                drop(guard);
                if let Some(sink) = &self.telemetry {
                    sink.emit(GatewayEvent::Session(SessionEvent::SessionExpired { session_id: session_id.to_string() })).await;
                }
                Err(GatewayError::Authentication { details: "session expired".into() })
            }
            None => Err(GatewayError::Authentication { details: "unknown session".into() }),
        }
    }

    /// Check whether `ctx` is permitted to perform `action`, consulting
    /// every registered provider in [`AuthMode`] order (same semantics as
    /// authentication).
    pub async fn check_permission(&self, ctx: &AuthContext, action: &str) -> Result<(), GatewayError<String>> {
        let result = if !ctx.permits(action) {
            Err(GatewayError::Authorization { details: format!("'{action}' not in granted permissions") })
        } else {
            match self.mode {
                AuthMode::First => {
                    // Only the provider that established this session gets a say.
                    match self.providers.iter().find(|p| p.name() == ctx.provider) {
                        Some(provider) => provider.authorize(ctx, action).await,
                        None => Err(GatewayError::Authorization { details: "no provider matched this session".into() }),
                    }
                }
                AuthMode::All => {
                    let mut result = Ok(());
                    for provider in &self.providers {
                        if let Err(e) = provider.authorize(ctx, action).await {
                            result = Err(e);
                            break;
                        }
                    }
                    result
                }
            }
        };

        let details = match &result {
            Ok(()) => "ok".to_string(),
            Err(e) => format!("denied: {e}"),
        };
        self.audit(None, Some(ctx.principal.clone()), None, action, result.is_ok(), RiskLevel::Low, &details).await;

        if result.is_err() {
            if let Some(sink) = &self.telemetry {
                sink.emit(GatewayEvent::Session(SessionEvent::PermissionDenied { principal: ctx.principal.clone(), action: action.to_string() })).await;
            }
        }

        result
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Drop every session whose TTL has elapsed. Intended to be called
    /// periodically by the agent facade's housekeeping loop.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        let before = guard.len();
        guard.retain(|_, s| !s.is_expired(now));
        before - guard.len()
    }

    #[allow(clippy::too_many_arguments)]
    async fn audit(
        &self,
        session_id: Option<String>,
        user_id: Option<String>,
        peer: Option<String>,
        event: &str,
        success: bool,
        risk: RiskLevel,
        details: &str,
    ) {
        if let Some(sink) = &self.audit {
            let ts_millis = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
            sink.record(AuditEntry {
                id: uuid::Uuid::new_v4().to_string(),
                ts_millis,
                event: event.to_string(),
                user_id,
                session_id,
                peer,
                success,
                risk,
                details: details.to_string(),
            })
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn authenticate_establishes_a_validatable_session() {
        let mut manager = SessionManager::new(AuthMode::First, Duration::from_secs(60));
        manager.register_provider(Arc::new(PassthroughAuth));

        let id = manager.authenticate(&AuthPayload::Opaque(vec![]), None).await.unwrap();
        let ctx = manager.validate_active(&id).await.unwrap();
        assert_eq!(ctx.principal, "anonymous");
    }

    #[tokio::test]
    async fn unknown_session_is_rejected() {
        let manager = SessionManager::new(AuthMode::First, Duration::from_secs(60));
        let result = manager.validate_active("nonexistent").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn expired_session_is_evicted_on_validation() {
        let mut manager = SessionManager::new(AuthMode::First, Duration::from_millis(10));
        manager.register_provider(Arc::new(PassthroughAuth));
        let id = manager.authenticate(&AuthPayload::Opaque(vec![]), None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let result = manager.validate_active(&id).await;
        assert!(result.is_err());
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn permission_denied_by_default_authorize() {
        struct DenyAll;
        #[async_trait]
        impl SessionAuthProvider for DenyAll {
            fn name(&self) -> &'static str {
                "deny-all"
            }
            async fn authenticate(&self, _auth: &AuthPayload) -> Result<AuthContext, GatewayError<String>> {
                Ok(AuthContext {
                    principal: "bob".into(),
                    provider: self.name(),
                    attributes: HashMap::new(),
                    permissions: HashSet::from([PERMISSION_WILDCARD.to_string()]),
                })
            }
        }

        let mut manager = SessionManager::new(AuthMode::First, Duration::from_secs(60));
        manager.register_provider(Arc::new(DenyAll));
        let id = manager.authenticate(&AuthPayload::Opaque(vec![]), None).await.unwrap();
        let ctx = manager.validate_active(&id).await.unwrap();

        let result = manager.check_permission(&ctx, "trade.open").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn audit_sink_records_authentication_and_permission_checks() {
        let audit = Arc::new(MemoryAuditSink::new());
        let mut manager = SessionManager::new(AuthMode::First, Duration::from_secs(60)).with_audit(audit.clone());
        manager.register_provider(Arc::new(PassthroughAuth));

        let id = manager.authenticate(&AuthPayload::Opaque(vec![]), None).await.unwrap();
        let ctx = manager.validate_active(&id).await.unwrap();
        manager.check_permission(&ctx, "market.subscribe").await.unwrap();

        let entries = audit.entries();
        assert!(entries.iter().any(|e| e.event == "authenticate" && e.success));
        assert!(entries.iter().any(|e| e.event == "market.subscribe" && e.success));
    }

    #[tokio::test]
    async fn wildcard_permission_grants_any_action() {
        let mut manager = SessionManager::new(AuthMode::First, Duration::from_secs(60));
        manager.register_provider(Arc::new(PassthroughAuth));
        let id = manager.authenticate(&AuthPayload::Opaque(vec![]), None).await.unwrap();
        let ctx = manager.validate_active(&id).await.unwrap();

        assert!(manager.check_permission(&ctx, "trade.open").await.is_ok());
        assert!(manager.check_permission(&ctx, "anything.at.all").await.is_ok());
    }

    #[tokio::test]
    async fn permission_set_denies_actions_outside_the_grant() {
        struct ReadOnly;
        #[async_trait]
        impl SessionAuthProvider for ReadOnly {
            fn name(&self) -> &'static str {
                "read-only"
            }
            async fn authenticate(&self, _auth: &AuthPayload) -> Result<AuthContext, GatewayError<String>> {
                Ok(AuthContext {
                    principal: "viewer".into(),
                    provider: self.name(),
                    attributes: HashMap::new(),
                    permissions: HashSet::from(["market.subscribe".to_string()]),
                })
            }
            async fn authorize(&self, _ctx: &AuthContext, _action: &str) -> Result<(), GatewayError<String>> {
                Ok(())
            }
        }

        let mut manager = SessionManager::new(AuthMode::First, Duration::from_secs(60));
        manager.register_provider(Arc::new(ReadOnly));
        let id = manager.authenticate(&AuthPayload::Opaque(vec![]), None).await.unwrap();
        let ctx = manager.validate_active(&id).await.unwrap();

        assert!(manager.check_permission(&ctx, "market.subscribe").await.is_ok());
        assert!(manager.check_permission(&ctx, "trade.open").await.is_err());
    }

    #[tokio::test]
    async fn auth_rate_limit_denies_before_any_provider_runs_with_medium_risk() {
        use crate::rate_limit::strategies::FixedWindow;
        use crate::rate_limit::{RateRule, RuleSet};

        let mut rules = RuleSet::new();
        rules.add_rule(RateRule::new("auth-peer", 1, Arc::new(FixedWindow::new(Duration::from_secs(60), 1))));

        let audit = Arc::new(MemoryAuditSink::new());
        let mut manager = SessionManager::new(AuthMode::First, Duration::from_secs(60))
            .with_audit(audit.clone())
            .with_auth_rate_limit(rules);
        manager.register_provider(Arc::new(PassthroughAuth));

        let peer = PeerInfo { address: Some("10.0.0.1".to_string()), user_agent: None };
        assert!(manager.authenticate(&AuthPayload::Opaque(vec![]), Some(peer.clone())).await.is_ok());
        let result = manager.authenticate(&AuthPayload::Opaque(vec![]), Some(peer)).await;
        assert!(matches!(result, Err(GatewayError::RateLimited { .. })));

        let entries = audit.entries();
        let denied = entries.iter().find(|e| e.event == "authenticate" && !e.success && e.peer.as_deref() == Some("10.0.0.1"));
        assert!(denied.is_some());
        assert_eq!(denied.unwrap().risk, RiskLevel::Medium);
    }
}
