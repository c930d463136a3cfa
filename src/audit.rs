//! Append-only audit trail of security-relevant actions.
//!
//! Entries are immutable once appended; the store exposes no update or
//! delete for them. Every security-relevant failure writes its entry before
//! the error is returned, so observability never depends on the caller
//! choosing to log.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;
use uuid::Uuid;

use crate::store::Store;

/// Security-relevant actions recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    UserCreated,
    UserLogin,
    LoginFailed,
    AccountLocked,
    SessionEnded,
    SessionExpired,
    PasswordChanged,
    PasswordResetIssued,
    PasswordResetCompleted,
    PasswordResetFailed,
    EmailVerified,
    EmailVerificationFailed,
    UserUpdated,
    UserDeactivated,
    UserDeleted,
}

impl AuditAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserCreated => "USER_CREATED",
            Self::UserLogin => "USER_LOGIN",
            Self::LoginFailed => "LOGIN_FAILED",
            Self::AccountLocked => "ACCOUNT_LOCKED",
            Self::SessionEnded => "SESSION_ENDED",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::PasswordChanged => "PASSWORD_CHANGED",
            Self::PasswordResetIssued => "PASSWORD_RESET_ISSUED",
            Self::PasswordResetCompleted => "PASSWORD_RESET_COMPLETED",
            Self::PasswordResetFailed => "PASSWORD_RESET_FAILED",
            Self::EmailVerified => "EMAIL_VERIFIED",
            Self::EmailVerificationFailed => "EMAIL_VERIFICATION_FAILED",
            Self::UserUpdated => "USER_UPDATED",
            Self::UserDeactivated => "USER_DEACTIVATED",
            Self::UserDeleted => "USER_DELETED",
        }
    }

    /// Parse the wire/database representation back into the enum.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "USER_CREATED" => Some(Self::UserCreated),
            "USER_LOGIN" => Some(Self::UserLogin),
            "LOGIN_FAILED" => Some(Self::LoginFailed),
            "ACCOUNT_LOCKED" => Some(Self::AccountLocked),
            "SESSION_ENDED" => Some(Self::SessionEnded),
            "SESSION_EXPIRED" => Some(Self::SessionExpired),
            "PASSWORD_CHANGED" => Some(Self::PasswordChanged),
            "PASSWORD_RESET_ISSUED" => Some(Self::PasswordResetIssued),
            "PASSWORD_RESET_COMPLETED" => Some(Self::PasswordResetCompleted),
            "PASSWORD_RESET_FAILED" => Some(Self::PasswordResetFailed),
            "EMAIL_VERIFIED" => Some(Self::EmailVerified),
            "EMAIL_VERIFICATION_FAILED" => Some(Self::EmailVerificationFailed),
            "USER_UPDATED" => Some(Self::UserUpdated),
            "USER_DEACTIVATED" => Some(Self::UserDeactivated),
            "USER_DELETED" => Some(Self::UserDeleted),
            _ => None,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Failure,
    Pending,
}

impl AuditOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Pending => "pending",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub action: AuditAction,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub outcome: AuditOutcome,
    pub ip: Option<String>,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    #[must_use]
    pub fn new(action: AuditAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: None,
            session_id: None,
            action,
            entity_type: None,
            entity_id: None,
            before: None,
            after: None,
            outcome: AuditOutcome::Success,
            ip: None,
            detail: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    #[must_use]
    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    #[must_use]
    pub fn with_entity(mut self, entity_type: &str, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.to_string());
        self.entity_id = Some(entity_id.into());
        self
    }

    #[must_use]
    pub fn with_before(mut self, before: Value) -> Self {
        self.before = Some(before);
        self
    }

    #[must_use]
    pub fn with_after(mut self, after: Value) -> Self {
        self.after = Some(after);
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    #[must_use]
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Writes audit entries through the store.
///
/// Appends are exactly-once per event and never mask the primary error path:
/// a failed append is logged and swallowed.
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn Store>,
}

impl AuditRecorder {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn record(&self, entry: AuditEntry) {
        if let Err(err) = self.store.append_audit(&entry).await {
            error!(action = entry.action.as_str(), "failed to append audit entry: {err:#}");
        }
    }
}
