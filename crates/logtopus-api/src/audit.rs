//! Security audit trail for the API layer.
//!
//! Every decision of the token gate and of the credential exchange produces a
//! [`SecurityEvent`]. Actors are hashed before they leave the process.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use ulid::Ulid;

/// Token verified.
pub const REASON_JWT_VALID: &str = "jwt_valid";
/// No `Token` header.
pub const REASON_MISSING_TOKEN: &str = "missing_token";
/// `Token` header present but blank.
pub const REASON_EMPTY_TOKEN: &str = "empty_token";
/// Token could not be parsed or used another algorithm.
pub const REASON_MALFORMED_TOKEN: &str = "malformed_token";
/// Bad signature or expired.
pub const REASON_INVALID_TOKEN: &str = "invalid_token";
/// No signing keys loaded.
pub const REASON_AUTHORITY_UNAVAILABLE: &str = "authority_unavailable";
/// Credential pair matched.
pub const REASON_CREDENTIALS_VALID: &str = "credentials_valid";
/// Credential pair did not match.
pub const REASON_BAD_CREDENTIALS: &str = "bad_credentials";

/// Kind of security decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityAction {
    /// A bearer token was accepted.
    AuthAllow,
    /// A request to a gated route was rejected.
    AuthDeny,
    /// Credentials were exchanged for a token.
    LoginAllow,
    /// A credential exchange was rejected.
    LoginDeny,
}

impl SecurityAction {
    /// Returns true for rejections.
    #[must_use]
    pub const fn is_deny(self) -> bool {
        matches!(self, Self::AuthDeny | Self::LoginDeny)
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::AuthAllow => "auth_allow",
            Self::AuthDeny => "auth_deny",
            Self::LoginAllow => "login_allow",
            Self::LoginDeny => "login_deny",
        }
    }
}

impl std::fmt::Display for SecurityAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded security decision.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    /// ULID of this event.
    pub event_id: String,
    /// When the decision was taken.
    pub timestamp: DateTime<Utc>,
    /// Correlates with the `x-request-id` response header.
    pub request_id: String,
    /// `user:<hash>` or `anonymous`.
    pub actor: String,
    /// What was decided.
    pub action: SecurityAction,
    /// Request path.
    pub resource: String,
    /// One of the `REASON_*` constants.
    pub decision_reason: String,
}

impl SecurityEvent {
    fn new(
        action: SecurityAction,
        actor: String,
        resource: &str,
        reason: &str,
        request_id: &str,
    ) -> Self {
        Self {
            event_id: Ulid::new().to_string(),
            timestamp: Utc::now(),
            request_id: request_id.to_string(),
            actor,
            action,
            resource: resource.to_string(),
            decision_reason: reason.to_string(),
        }
    }
}

/// Destination for security events.
pub trait AuditSink: Send + Sync {
    /// Records `event`. Must not block.
    fn emit(&self, event: SecurityEvent);
}

/// Writes events to the `audit` tracing target.
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: SecurityEvent) {
        if event.action.is_deny() {
            tracing::warn!(
                target: "audit",
                event_id = %event.event_id,
                action = %event.action,
                actor = %event.actor,
                resource = %event.resource,
                decision_reason = %event.decision_reason,
                request_id = %event.request_id,
                "security_decision"
            );
        } else {
            tracing::info!(
                target: "audit",
                event_id = %event.event_id,
                action = %event.action,
                actor = %event.actor,
                resource = %event.resource,
                decision_reason = %event.decision_reason,
                request_id = %event.request_id,
                "security_decision"
            );
        }
    }
}

/// Keeps events in memory for assertions.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<SecurityEvent>>,
}

impl RecordingAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all captured events.
    #[must_use]
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for RecordingAuditSink {
    fn emit(&self, event: SecurityEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event);
        }
    }
}

/// Routes security events to a sink.
#[derive(Clone)]
pub struct AuditEmitter {
    sink: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for AuditEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditEmitter").finish_non_exhaustive()
    }
}

impl Default for AuditEmitter {
    fn default() -> Self {
        Self::with_tracing()
    }
}

impl AuditEmitter {
    /// Emitter writing to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Emitter backed by [`TracingAuditSink`].
    #[must_use]
    pub fn with_tracing() -> Self {
        Self::new(Arc::new(TracingAuditSink))
    }

    /// Forwards `event` to the sink.
    pub fn emit(&self, event: SecurityEvent) {
        self.sink.emit(event);
    }

    /// Records an accepted token for `identity`.
    pub fn auth_allow(&self, identity: &str, resource: &str, request_id: &str) {
        self.emit(SecurityEvent::new(
            SecurityAction::AuthAllow,
            hash_actor(identity),
            resource,
            REASON_JWT_VALID,
            request_id,
        ));
    }

    /// Records a gate rejection.
    pub fn auth_deny(&self, resource: &str, reason: &str, request_id: &str) {
        self.emit(SecurityEvent::new(
            SecurityAction::AuthDeny,
            "anonymous".to_string(),
            resource,
            reason,
            request_id,
        ));
    }

    /// Records a successful credential exchange.
    pub fn login_allow(&self, user: &str, resource: &str, request_id: &str) {
        self.emit(SecurityEvent::new(
            SecurityAction::LoginAllow,
            hash_actor(user),
            resource,
            REASON_CREDENTIALS_VALID,
            request_id,
        ));
    }

    /// Records a failed credential exchange.
    pub fn login_deny(&self, user: &str, resource: &str, reason: &str, request_id: &str) {
        let actor = if user.is_empty() {
            "anonymous".to_string()
        } else {
            hash_actor(user)
        };
        self.emit(SecurityEvent::new(
            SecurityAction::LoginDeny,
            actor,
            resource,
            reason,
            request_id,
        ));
    }
}

fn hash_actor(user: &str) -> String {
    let digest = Sha256::digest(user.as_bytes());
    let prefix = digest.get(..16).unwrap_or(&digest);
    format!("user:{}", hex::encode(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> (Arc<RecordingAuditSink>, AuditEmitter) {
        let sink = Arc::new(RecordingAuditSink::new());
        let emitter = AuditEmitter::new(sink.clone());
        (sink, emitter)
    }

    #[test]
    fn test_hash_actor_is_stable() {
        let hash1 = hash_actor("johnnyHotbody");
        let hash2 = hash_actor("johnnyHotbody");
        assert_eq!(hash1, hash2);
        assert!(hash1.starts_with("user:"));
        assert_eq!(hash1.len(), 5 + 32);
        assert!(!hash1.contains("johnny"));
    }

    #[test]
    fn test_hash_actor_different_inputs() {
        assert_ne!(hash_actor("alice"), hash_actor("bob"));
    }

    #[test]
    fn test_auth_allow_hashes_identity() {
        let (sink, emitter) = recording();
        emitter.auth_allow("johnnyHotbody", "/api/v1/events", "req-1");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, SecurityAction::AuthAllow);
        assert_eq!(events[0].decision_reason, REASON_JWT_VALID);
        assert_eq!(events[0].request_id, "req-1");
        assert!(!events[0].actor.contains("johnny"));
    }

    #[test]
    fn test_auth_deny_is_anonymous() {
        let (sink, emitter) = recording();
        emitter.auth_deny("/api/v1/query/events", REASON_MISSING_TOKEN, "req-2");

        let events = sink.events();
        assert_eq!(events[0].actor, "anonymous");
        assert!(events[0].action.is_deny());
        assert_eq!(events[0].resource, "/api/v1/query/events");
    }

    #[test]
    fn test_login_deny_without_user_is_anonymous() {
        let (sink, emitter) = recording();
        emitter.login_deny("", "/api/v1/auth", REASON_BAD_CREDENTIALS, "req-3");
        emitter.login_deny("mallory", "/api/v1/auth", REASON_BAD_CREDENTIALS, "req-4");

        let events = sink.events();
        assert_eq!(events[0].actor, "anonymous");
        assert!(events[1].actor.starts_with("user:"));
        assert_eq!(events[1].action.to_string(), "login_deny");
    }
}
