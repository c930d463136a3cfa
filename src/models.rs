//! Entity records owned by the credential store.
//!
//! `User` is the internal record; API boundaries hand out [`PublicUser`],
//! a projection that structurally cannot leak credentials or security state
//! (both live in separate types).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::roles::Permission;

/// Internal user record. Mutated only through the authentication and
/// account-security operations.
#[derive(Clone, Debug)]
pub struct User {
    pub id: Uuid,
    /// Stored normalized: trimmed and lowercased.
    pub email: String,
    pub display_name: String,
    /// Slug reference into the role catalog, not ownership.
    pub role: String,
    pub department: Option<String>,
    pub phone: Option<String>,
    /// Extra grants layered on top of the role's permission set.
    pub special_permissions: HashSet<Permission>,
    pub is_active: bool,
    pub email_verified: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
    pub login_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    #[must_use]
    pub fn new(email: String, display_name: String, role: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            display_name,
            role,
            department: None,
            phone: None,
            special_permissions: HashSet::new(),
            is_active: true,
            email_verified: false,
            last_login_at: None,
            last_login_ip: None,
            login_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Caller-facing projection of a [`User`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub role: String,
    pub department: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
    pub email_verified: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub login_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            role: user.role.clone(),
            department: user.department.clone(),
            phone: user.phone.clone(),
            is_active: user.is_active,
            email_verified: user.email_verified,
            last_login_at: user.last_login_at,
            login_count: user.login_count,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Password material for one user. Plaintext never appears here; the hash is
/// a PHC string and `previous_hashes` blocks reuse of recent passwords.
#[derive(Clone, Debug)]
pub struct Credential {
    pub user_id: Uuid,
    pub password_hash: String,
    /// Most recent first, capped at the configured history length.
    pub previous_hashes: Vec<String>,
    pub password_changed_at: DateTime<Utc>,
}

impl Credential {
    #[must_use]
    pub fn new(user_id: Uuid, password_hash: String) -> Self {
        Self {
            user_id,
            password_hash,
            previous_hashes: Vec::new(),
            password_changed_at: Utc::now(),
        }
    }
}

/// Per-user login-attempt bookkeeping and outstanding one-time tokens.
#[derive(Clone, Debug, Default)]
pub struct SecurityState {
    pub user_id: Uuid,
    pub failed_attempts: u32,
    pub last_failed_at: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
    /// SHA-256 of the outstanding password-reset token, if any.
    pub reset_token_hash: Option<Vec<u8>>,
    pub reset_token_expires_at: Option<DateTime<Utc>>,
    /// SHA-256 of the outstanding email-verification token, if any.
    pub verify_token_hash: Option<Vec<u8>>,
    pub verify_token_expires_at: Option<DateTime<Utc>>,
    pub two_factor_enabled: bool,
    pub two_factor_secret: Option<String>,
}

impl SecurityState {
    #[must_use]
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            ..Self::default()
        }
    }
}

/// Device and network metadata captured at login.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DeviceMeta {
    pub device: Option<String>,
    pub platform: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// One authenticated login, independent of the bearer token's cryptographic
/// validity. Sessions are the source of truth for "is this login still valid".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device: Option<String>,
    pub platform: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Absolute expiry. Activity never extends it.
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    /// Opaque refresh-token value, returned to the caller once.
    pub refresh_token: String,
    /// SHA-256 of the bound access token. The raw token is never stored.
    #[serde(skip_serializing, default)]
    pub access_token_hash: Option<Vec<u8>>,
}

impl Session {
    /// True while the session is active and its absolute expiry is ahead.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at > now
    }
}

#[cfg(test)]
mod tests {
    use super::{PublicUser, Session, User};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn sample_user() -> User {
        User::new(
            "alice@example.com".to_string(),
            "Alice".to_string(),
            "operator".to_string(),
        )
    }

    #[test]
    fn new_user_starts_active_and_unverified() {
        let user = sample_user();
        assert!(user.is_active);
        assert!(!user.email_verified);
        assert_eq!(user.login_count, 0);
        assert!(user.last_login_at.is_none());
    }

    #[test]
    fn public_projection_carries_no_secret_fields() {
        let user = sample_user();
        let view = PublicUser::from(&user);
        let json = serde_json::to_value(&view).ok();
        let json = json.unwrap_or_default();
        assert_eq!(json["email"], "alice@example.com");
        assert!(json.get("password_hash").is_none());
        assert!(json.get("special_permissions").is_none());
    }

    #[test]
    fn session_liveness_requires_active_and_unexpired() {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            device: None,
            platform: None,
            ip: None,
            user_agent: None,
            created_at: now,
            last_activity_at: now,
            expires_at: now + Duration::hours(1),
            is_active: true,
            refresh_token: "refresh".to_string(),
            access_token_hash: None,
        };
        assert!(session.is_live(now));

        let ended = Session {
            is_active: false,
            ..session.clone()
        };
        assert!(!ended.is_live(now));

        let expired = Session {
            expires_at: now - Duration::seconds(1),
            ..session
        };
        assert!(!expired.is_live(now));
    }
}
