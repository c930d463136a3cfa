//! Login/logout orchestration over the hasher, token signer, session
//! manager, security guard, and role resolver.
//!
//! Flow Overview:
//! 1) Lockout state is checked before the password, and unknown emails burn
//!    a dummy hash, so every login failure looks the same from outside.
//! 2) On success the session is committed first, then the token is minted
//!    with the session id embedded and bound back to the session by hash.
//! 3) Security-relevant outcomes are audited before the result returns.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry, AuditOutcome, AuditRecorder};
use crate::config::CoreConfig;
use crate::error::AuthError;
use crate::guard::SecurityGuard;
use crate::models::{Credential, DeviceMeta, PublicUser, SecurityState, Session, User};
use crate::password;
use crate::roles::{Permission, RoleResolver};
use crate::session::SessionManager;
use crate::store::{SignupOutcome, Store};
use crate::token::TokenSigner;
use crate::utils::{hash_opaque_token, normalize_email, valid_email};

/// Registration input. The password is consumed by hashing and never stored.
#[derive(Clone, Debug)]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    pub display_name: String,
    pub role: String,
    pub department: Option<String>,
    pub phone: Option<String>,
}

/// Allow-listed administrative updates. `None` leaves a field untouched.
#[derive(Clone, Debug, Default)]
pub struct UserUpdate {
    pub display_name: Option<String>,
    pub department: Option<String>,
    pub phone: Option<String>,
    pub role: Option<String>,
    pub special_permissions: Option<HashSet<Permission>>,
}

/// Everything a successful login hands back.
#[derive(Clone, Debug)]
pub struct LoginOutcome {
    pub user: PublicUser,
    pub session: Session,
    pub token: String,
}

pub struct AuthService {
    store: Arc<dyn Store>,
    audit: AuditRecorder,
    signer: TokenSigner,
    sessions: SessionManager,
    guard: SecurityGuard,
    roles: RoleResolver,
    config: CoreConfig,
    dummy_hash: String,
}

impl AuthService {
    /// Build the service around an injected store.
    ///
    /// # Errors
    /// Fails when the role catalog is invalid or the dummy credential
    /// cannot be hashed; both are startup faults.
    pub fn new(store: Arc<dyn Store>, config: CoreConfig) -> Result<Self, AuthError> {
        let audit = AuditRecorder::new(store.clone());
        let signer = TokenSigner::new(
            config.token_secret().clone(),
            config.issuer(),
            config.access_token_ttl_seconds(),
        );
        let sessions = SessionManager::new(
            store.clone(),
            audit.clone(),
            config.session_ttl_seconds(),
        );
        let guard = SecurityGuard::new(
            store.clone(),
            audit.clone(),
            config.max_failed_attempts(),
            config.lockout_seconds(),
            config.reset_token_ttl_seconds(),
            config.verify_token_ttl_seconds(),
        );
        let roles = RoleResolver::new(store.clone())?;
        let dummy_hash = password::dummy_hash()?;
        Ok(Self {
            store,
            audit,
            signer,
            sessions,
            guard,
            roles,
            config,
            dummy_hash,
        })
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn roles(&self) -> &RoleResolver {
        &self.roles
    }

    /// Create a user with credential and security state as one unit.
    pub async fn register(&self, input: RegisterInput) -> Result<PublicUser, AuthError> {
        let email = normalize_email(&input.email);
        if !valid_email(&email) {
            return Err(AuthError::validation("email address is not valid"));
        }
        if input.display_name.trim().is_empty() {
            return Err(AuthError::validation("display name is required"));
        }
        if !self.roles.role_is_active(&input.role).await {
            return Err(AuthError::validation(format!(
                "unknown or inactive role: {}",
                input.role
            )));
        }
        password::validate_complexity(&input.password)?;
        let password_hash =
            password::hash_password(&input.password, self.config.min_password_length())?;

        let mut user = User::new(email, input.display_name.trim().to_string(), input.role);
        user.department = input.department;
        user.phone = input.phone;
        let credential = Credential::new(user.id, password_hash);
        let security = SecurityState::new(user.id);

        match self.store.insert_user(&user, &credential, &security).await? {
            SignupOutcome::DuplicateEmail => {
                Err(AuthError::validation("email is already registered"))
            }
            SignupOutcome::Created => {
                info!(user_id = %user.id, role = %user.role, "user registered");
                self.audit
                    .record(
                        AuditEntry::new(AuditAction::UserCreated)
                            .with_user(user.id)
                            .with_entity("user", user.id.to_string())
                            .with_after(json!({"email": user.email, "role": user.role})),
                    )
                    .await;
                Ok(PublicUser::from(&user))
            }
        }
    }

    /// Authenticate and open a session.
    ///
    /// Every failure path returns the same generic `AuthenticationError`;
    /// which check failed is only visible in the audit trail.
    pub async fn login(
        &self,
        email: &str,
        password_input: &str,
        device: DeviceMeta,
    ) -> Result<LoginOutcome, AuthError> {
        let email = normalize_email(email);

        let Some(mut user) = self.store.find_user_by_email(&email).await? else {
            // Burn a verification anyway so unknown emails cost the same
            // time as known ones.
            let _ = password::verify_password(password_input, &self.dummy_hash);
            self.audit_login_failure(None, &device, "unknown email").await;
            return Err(AuthError::Authentication);
        };

        if !user.is_active {
            let _ = password::verify_password(password_input, &self.dummy_hash);
            self.audit_login_failure(Some(user.id), &device, "inactive account")
                .await;
            return Err(AuthError::Authentication);
        }

        // Lockout comes before the password so a locked account with the
        // right password is indistinguishable from a wrong password.
        if self.guard.is_locked(user.id).await? {
            let _ = password::verify_password(password_input, &self.dummy_hash);
            self.audit_login_failure(Some(user.id), &device, "account locked")
                .await;
            return Err(AuthError::Authentication);
        }

        let Some(credential) = self.store.find_credential(user.id).await? else {
            error!(user_id = %user.id, "user record has no credential");
            self.audit_login_failure(Some(user.id), &device, "missing credential")
                .await;
            return Err(AuthError::Authentication);
        };

        if !password::verify_password(password_input, &credential.password_hash) {
            self.guard.record_failed_attempt(user.id).await?;
            self.audit_login_failure(Some(user.id), &device, "wrong password")
                .await;
            return Err(AuthError::Authentication);
        }

        self.guard.record_successful_login(user.id).await?;

        let previous_login_count = user.login_count;
        user.last_login_at = Some(Utc::now());
        user.last_login_ip = device.ip.clone();
        user.login_count += 1;
        user.updated_at = Utc::now();
        self.store.update_user(&user).await?;

        let mut session = self.sessions.create(user.id, &device).await?;
        let token = self
            .signer
            .issue(user.id, &user.role, session.id, Utc::now().timestamp())
            .map_err(AuthError::from)?;
        self.sessions.bind_access_token(&mut session, &token).await?;

        info!(user_id = %user.id, session_id = %session.id, "login succeeded");
        let mut entry = AuditEntry::new(AuditAction::UserLogin)
            .with_user(user.id)
            .with_session(session.id)
            .with_entity("user", user.id.to_string())
            .with_before(json!({"login_count": previous_login_count}))
            .with_after(json!({"login_count": user.login_count}));
        if let Some(ip) = &device.ip {
            entry = entry.with_ip(ip.clone());
        }
        self.audit.record(entry).await;

        Ok(LoginOutcome {
            user: PublicUser::from(&user),
            session,
            token,
        })
    }

    /// End a session. Idempotent; audits only when a live session ends.
    pub async fn logout(&self, session_id: Uuid) -> Result<(), AuthError> {
        let ended = self.sessions.end(session_id).await?;
        if ended {
            self.audit
                .record(
                    AuditEntry::new(AuditAction::SessionEnded)
                        .with_session(session_id)
                        .with_entity("session", session_id.to_string()),
                )
                .await;
        }
        Ok(())
    }

    /// Resolve a bearer token to its user, or `None`.
    ///
    /// A syntactically valid token whose session has been revoked is just
    /// as invalid as a forged one. Only store failures surface as errors;
    /// callers branch on presence.
    pub async fn verify_token(&self, token: &str) -> Result<Option<PublicUser>, AuthError> {
        let claims = match self.signer.verify(token, Utc::now().timestamp()) {
            Ok(claims) => claims,
            Err(_) => return Ok(None),
        };
        let (Ok(user_id), Ok(session_id)) =
            (Uuid::parse_str(&claims.sub), Uuid::parse_str(&claims.sid))
        else {
            return Ok(None);
        };

        let Some(session) = self.store.find_session(session_id).await? else {
            return Ok(None);
        };
        if !session.is_live(Utc::now()) || session.user_id != user_id {
            return Ok(None);
        }
        if let Some(bound_hash) = &session.access_token_hash {
            if bound_hash != &hash_opaque_token(token) {
                return Ok(None);
            }
        }

        let Some(user) = self.store.find_user_by_id(user_id).await? else {
            return Ok(None);
        };
        if !user.is_active {
            return Ok(None);
        }

        self.sessions.touch(session_id).await?;
        Ok(Some(PublicUser::from(&user)))
    }

    /// Rotate a credential after re-verifying the current password.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let Some(credential) = self.store.find_credential(user_id).await? else {
            return Err(AuthError::NotFound("user"));
        };
        if !password::verify_password(current, &credential.password_hash) {
            return Err(AuthError::Authentication);
        }
        password::validate_complexity(new_password)?;
        self.rotate_credential(credential, new_password).await?;
        self.guard.record_successful_login(user_id).await?;

        self.audit
            .record(
                AuditEntry::new(AuditAction::PasswordChanged)
                    .with_user(user_id)
                    .with_entity("user", user_id.to_string()),
            )
            .await;
        Ok(())
    }

    /// Start a password reset. Enumeration-safe: an unknown or inactive
    /// email quietly yields `None` instead of an error.
    pub async fn request_password_reset(&self, email: &str) -> Result<Option<String>, AuthError> {
        let email = normalize_email(email);
        let Some(user) = self.store.find_user_by_email(&email).await? else {
            return Ok(None);
        };
        if !user.is_active {
            return Ok(None);
        }
        let token = self.guard.issue_reset_token(user.id).await?;
        Ok(Some(token))
    }

    /// Complete a password reset with a previously issued token.
    pub async fn reset_password(
        &self,
        email: &str,
        token: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let email = normalize_email(email);
        let Some(user) = self.store.find_user_by_email(&email).await? else {
            // No reset token can exist for an unknown email.
            return Err(AuthError::TokenInvalid);
        };
        password::validate_complexity(new_password)?;
        self.guard.consume_reset_token(user.id, token).await?;

        let Some(credential) = self.store.find_credential(user.id).await? else {
            return Err(AuthError::NotFound("user"));
        };
        self.rotate_credential(credential, new_password).await?;

        self.audit
            .record(
                AuditEntry::new(AuditAction::PasswordResetCompleted)
                    .with_user(user.id)
                    .with_entity("user", user.id.to_string()),
            )
            .await;
        Ok(())
    }

    /// Issue an email-verification token for a known user.
    pub async fn request_email_verification(&self, user_id: Uuid) -> Result<String, AuthError> {
        if self.store.find_user_by_id(user_id).await?.is_none() {
            return Err(AuthError::NotFound("user"));
        }
        self.guard.issue_verification_token(user_id).await
    }

    /// Confirm an email-verification token and mark the address verified.
    pub async fn verify_email(&self, user_id: Uuid, token: &str) -> Result<(), AuthError> {
        let Some(mut user) = self.store.find_user_by_id(user_id).await? else {
            return Err(AuthError::NotFound("user"));
        };
        self.guard.consume_verification_token(user_id, token).await?;

        user.email_verified = true;
        user.updated_at = Utc::now();
        self.store.update_user(&user).await?;

        self.audit
            .record(
                AuditEntry::new(AuditAction::EmailVerified)
                    .with_user(user_id)
                    .with_entity("user", user_id.to_string()),
            )
            .await;
        Ok(())
    }

    /// Administrative lookup by id. Allowed to reveal existence.
    pub async fn get_user(&self, user_id: Uuid) -> Result<PublicUser, AuthError> {
        let Some(user) = self.store.find_user_by_id(user_id).await? else {
            return Err(AuthError::NotFound("user"));
        };
        Ok(PublicUser::from(&user))
    }

    /// Apply allow-listed updates to a user.
    pub async fn update_user(
        &self,
        user_id: Uuid,
        changes: UserUpdate,
    ) -> Result<PublicUser, AuthError> {
        let Some(mut user) = self.store.find_user_by_id(user_id).await? else {
            return Err(AuthError::NotFound("user"));
        };
        let before = json!({"display_name": user.display_name, "role": user.role});

        if let Some(display_name) = changes.display_name {
            let display_name = display_name.trim().to_string();
            if display_name.is_empty() {
                return Err(AuthError::validation("display name cannot be empty"));
            }
            user.display_name = display_name;
        }
        if let Some(role) = changes.role {
            if !self.roles.role_is_active(&role).await {
                return Err(AuthError::validation(format!(
                    "unknown or inactive role: {role}"
                )));
            }
            user.role = role;
        }
        if let Some(department) = changes.department {
            user.department = Some(department);
        }
        if let Some(phone) = changes.phone {
            user.phone = Some(phone);
        }
        if let Some(special_permissions) = changes.special_permissions {
            user.special_permissions = special_permissions;
        }
        user.updated_at = Utc::now();
        self.store.update_user(&user).await?;

        self.audit
            .record(
                AuditEntry::new(AuditAction::UserUpdated)
                    .with_user(user.id)
                    .with_entity("user", user.id.to_string())
                    .with_before(before)
                    .with_after(json!({"display_name": user.display_name, "role": user.role})),
            )
            .await;
        Ok(PublicUser::from(&user))
    }

    /// Deactivate an account and revoke every live session.
    pub async fn deactivate_user(&self, user_id: Uuid) -> Result<(), AuthError> {
        let Some(mut user) = self.store.find_user_by_id(user_id).await? else {
            return Err(AuthError::NotFound("user"));
        };
        user.is_active = false;
        user.updated_at = Utc::now();
        self.store.update_user(&user).await?;

        let ended = self.store.end_sessions_for_user(user_id).await?;
        info!(user_id = %user_id, sessions = ended.len(), "user deactivated");
        self.audit
            .record(
                AuditEntry::new(AuditAction::UserDeactivated)
                    .with_user(user_id)
                    .with_entity("user", user_id.to_string())
                    .with_detail(format!("{} session(s) revoked", ended.len())),
            )
            .await;
        Ok(())
    }

    /// Remove an account entirely, cascade-revoking its sessions.
    pub async fn delete_user(&self, user_id: Uuid) -> Result<(), AuthError> {
        if self.store.find_user_by_id(user_id).await?.is_none() {
            return Err(AuthError::NotFound("user"));
        }
        let revoked = self.store.delete_user(user_id).await?;
        info!(user_id = %user_id, sessions = revoked.len(), "user deleted");
        self.audit
            .record(
                AuditEntry::new(AuditAction::UserDeleted)
                    .with_user(user_id)
                    .with_entity("user", user_id.to_string())
                    .with_detail(format!("{} session(s) revoked", revoked.len())),
            )
            .await;
        Ok(())
    }

    /// Membership test against the user's resolved permission set.
    pub async fn has_permission(
        &self,
        user_id: Uuid,
        permission: Permission,
    ) -> Result<bool, AuthError> {
        self.roles.has_permission(user_id, permission).await
    }

    /// Identity check against the user's role reference.
    pub async fn has_role(&self, user_id: Uuid, role_name: &str) -> Result<bool, AuthError> {
        self.roles.has_role(user_id, role_name).await
    }

    /// Periodic maintenance: end sessions past their absolute expiry.
    pub async fn sweep_expired_sessions(&self) -> Result<usize, AuthError> {
        self.sessions.sweep_expired().await
    }

    async fn rotate_credential(
        &self,
        mut credential: Credential,
        new_password: &str,
    ) -> Result<(), AuthError> {
        if password::verify_password(new_password, &credential.password_hash)
            || credential
                .previous_hashes
                .iter()
                .any(|hash| password::verify_password(new_password, hash))
        {
            return Err(AuthError::validation(
                "password was used recently and cannot be reused",
            ));
        }

        let new_hash =
            password::hash_password(new_password, self.config.min_password_length())?;
        let old_hash = std::mem::replace(&mut credential.password_hash, new_hash);
        credential.previous_hashes.insert(0, old_hash);
        credential
            .previous_hashes
            .truncate(self.config.password_history_len());
        credential.password_changed_at = Utc::now();
        self.store.upsert_credential(&credential).await?;
        Ok(())
    }

    async fn audit_login_failure(&self, user_id: Option<Uuid>, device: &DeviceMeta, detail: &str) {
        let mut entry = AuditEntry::new(AuditAction::LoginFailed)
            .with_outcome(AuditOutcome::Failure)
            .with_detail(detail);
        if let Some(user_id) = user_id {
            entry = entry.with_user(user_id).with_entity("user", user_id.to_string());
        }
        if let Some(ip) = &device.ip {
            entry = entry.with_ip(ip.clone());
        }
        self.audit.record(entry).await;
    }
}
