//! Failed-login tracking, lockout, and one-time account tokens.
//!
//! Attempt bookkeeping for one user runs under a per-user mutex so two
//! concurrent failures never under-count the tally. The lock map only grows
//! with users that actually fail or request tokens and is pruned once the
//! guard is the lone holder of an entry.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry, AuditOutcome, AuditRecorder};
use crate::error::AuthError;
use crate::models::SecurityState;
use crate::store::Store;
use crate::utils::{generate_opaque_token, hash_opaque_token};

/// Result of recording one failed attempt.
#[derive(Debug, Clone, Copy)]
pub struct FailedAttempt {
    pub attempts: u32,
    pub locked: bool,
}

pub struct SecurityGuard {
    store: Arc<dyn Store>,
    audit: AuditRecorder,
    max_failed_attempts: u32,
    lockout_seconds: i64,
    reset_token_ttl_seconds: i64,
    verify_token_ttl_seconds: i64,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SecurityGuard {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        audit: AuditRecorder,
        max_failed_attempts: u32,
        lockout_seconds: i64,
        reset_token_ttl_seconds: i64,
        verify_token_ttl_seconds: i64,
    ) -> Self {
        Self {
            store,
            audit,
            max_failed_attempts,
            lockout_seconds,
            reset_token_ttl_seconds,
            verify_token_ttl_seconds,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn user_lock(&self, user_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn load_state(&self, user_id: Uuid) -> Result<SecurityState, AuthError> {
        Ok(self
            .store
            .find_security_state(user_id)
            .await?
            .unwrap_or_else(|| SecurityState::new(user_id)))
    }

    /// True while the account's lockout window is ahead of now.
    ///
    /// # Errors
    /// A store failure is an error, not `false`: the caller must fail
    /// closed when lockout state cannot be confirmed.
    pub async fn is_locked(&self, user_id: Uuid) -> Result<bool, AuthError> {
        let state = self.load_state(user_id).await?;
        Ok(state
            .locked_until
            .is_some_and(|locked_until| locked_until > Utc::now()))
    }

    /// Count one failed attempt; lock the account when the threshold is
    /// reached and audit `ACCOUNT_LOCKED` exactly once per lock.
    pub async fn record_failed_attempt(&self, user_id: Uuid) -> Result<FailedAttempt, AuthError> {
        let lock = self.user_lock(user_id).await;
        let _serialized = lock.lock().await;

        let mut state = self.load_state(user_id).await?;
        state.failed_attempts += 1;
        state.last_failed_at = Some(Utc::now());

        let locking = state.failed_attempts >= self.max_failed_attempts;
        if locking {
            state.locked_until = Some(Utc::now() + Duration::seconds(self.lockout_seconds));
            state.failed_attempts = 0;
        }
        self.store.upsert_security_state(&state).await?;

        if locking {
            warn!(user_id = %user_id, "account locked after repeated failed logins");
            self.audit
                .record(
                    AuditEntry::new(AuditAction::AccountLocked)
                        .with_user(user_id)
                        .with_entity("user", user_id.to_string())
                        .with_outcome(AuditOutcome::Failure),
                )
                .await;
        }

        Ok(FailedAttempt {
            attempts: if locking {
                self.max_failed_attempts
            } else {
                state.failed_attempts
            },
            locked: locking,
        })
    }

    /// Reset the attempt counter and clear any lockout.
    pub async fn record_successful_login(&self, user_id: Uuid) -> Result<(), AuthError> {
        let lock = self.user_lock(user_id).await;
        let _serialized = lock.lock().await;

        let mut state = self.load_state(user_id).await?;
        state.failed_attempts = 0;
        state.last_failed_at = None;
        state.locked_until = None;
        self.store.upsert_security_state(&state).await?;
        Ok(())
    }

    /// Issue a single-use, time-boxed password-reset token. The raw value
    /// goes to the caller; only its hash is stored.
    pub async fn issue_reset_token(&self, user_id: Uuid) -> Result<String, AuthError> {
        let lock = self.user_lock(user_id).await;
        let _serialized = lock.lock().await;

        let token = generate_opaque_token()?;
        let mut state = self.load_state(user_id).await?;
        state.reset_token_hash = Some(hash_opaque_token(&token));
        state.reset_token_expires_at =
            Some(Utc::now() + Duration::seconds(self.reset_token_ttl_seconds));
        self.store.upsert_security_state(&state).await?;

        info!(user_id = %user_id, "password reset token issued");
        self.audit
            .record(
                AuditEntry::new(AuditAction::PasswordResetIssued)
                    .with_user(user_id)
                    .with_entity("user", user_id.to_string()),
            )
            .await;
        Ok(token)
    }

    /// Consume a reset token. Fails with `TokenInvalid` for unknown or
    /// already-used tokens and `TokenExpired` past the window; both paths
    /// are audited before the error returns. The token is cleared on
    /// success, making it single-use.
    pub async fn consume_reset_token(&self, user_id: Uuid, token: &str) -> Result<(), AuthError> {
        let lock = self.user_lock(user_id).await;
        let _serialized = lock.lock().await;

        let mut state = self.load_state(user_id).await?;
        let result = check_one_time_token(
            state.reset_token_hash.as_deref(),
            state.reset_token_expires_at,
            token,
        );

        if let Err(err) = result {
            self.audit
                .record(
                    AuditEntry::new(AuditAction::PasswordResetFailed)
                        .with_user(user_id)
                        .with_entity("user", user_id.to_string())
                        .with_outcome(AuditOutcome::Failure)
                        .with_detail(match err {
                            AuthError::TokenExpired => "reset token expired",
                            _ => "reset token invalid",
                        }),
                )
                .await;
            return Err(err);
        }

        state.reset_token_hash = None;
        state.reset_token_expires_at = None;
        state.failed_attempts = 0;
        state.locked_until = None;
        self.store.upsert_security_state(&state).await?;
        Ok(())
    }

    /// Issue a single-use, time-boxed email-verification token.
    pub async fn issue_verification_token(&self, user_id: Uuid) -> Result<String, AuthError> {
        let lock = self.user_lock(user_id).await;
        let _serialized = lock.lock().await;

        let token = generate_opaque_token()?;
        let mut state = self.load_state(user_id).await?;
        state.verify_token_hash = Some(hash_opaque_token(&token));
        state.verify_token_expires_at =
            Some(Utc::now() + Duration::seconds(self.verify_token_ttl_seconds));
        self.store.upsert_security_state(&state).await?;
        Ok(token)
    }

    /// Consume an email-verification token; audited on failure.
    pub async fn consume_verification_token(
        &self,
        user_id: Uuid,
        token: &str,
    ) -> Result<(), AuthError> {
        let lock = self.user_lock(user_id).await;
        let _serialized = lock.lock().await;

        let mut state = self.load_state(user_id).await?;
        let result = check_one_time_token(
            state.verify_token_hash.as_deref(),
            state.verify_token_expires_at,
            token,
        );

        if let Err(err) = result {
            self.audit
                .record(
                    AuditEntry::new(AuditAction::EmailVerificationFailed)
                        .with_user(user_id)
                        .with_entity("user", user_id.to_string())
                        .with_outcome(AuditOutcome::Failure),
                )
                .await;
            return Err(err);
        }

        state.verify_token_hash = None;
        state.verify_token_expires_at = None;
        self.store.upsert_security_state(&state).await?;
        Ok(())
    }
}

fn check_one_time_token(
    stored_hash: Option<&[u8]>,
    expires_at: Option<DateTime<Utc>>,
    presented: &str,
) -> Result<(), AuthError> {
    let Some(stored_hash) = stored_hash else {
        return Err(AuthError::TokenInvalid);
    };
    if stored_hash != hash_opaque_token(presented).as_slice() {
        return Err(AuthError::TokenInvalid);
    }
    match expires_at {
        Some(expires_at) if expires_at > Utc::now() => Ok(()),
        Some(_) => Err(AuthError::TokenExpired),
        None => Err(AuthError::Dependency(anyhow!(
            "one-time token stored without expiry"
        ))),
    }
}
