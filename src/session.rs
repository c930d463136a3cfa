//! Session lifecycle: creation, activity tracking, expiry, revocation.
//!
//! Expiry is absolute, not sliding: activity bumps `last_activity_at` but
//! never moves `expires_at`, which bounds the blast radius of a stolen
//! token. `Ended` is terminal; nothing transitions a session back.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry, AuditRecorder};
use crate::error::AuthError;
use crate::models::{DeviceMeta, Session};
use crate::store::Store;
use crate::utils::{generate_opaque_token, hash_opaque_token};

pub struct SessionManager {
    store: Arc<dyn Store>,
    audit: AuditRecorder,
    session_ttl_seconds: i64,
}

impl SessionManager {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, audit: AuditRecorder, session_ttl_seconds: i64) -> Self {
        Self {
            store,
            audit,
            session_ttl_seconds,
        }
    }

    /// Create and persist a session for one login.
    ///
    /// Every field is set before the session is committed, so an abandoned
    /// login never leaves a half-created record.
    pub async fn create(&self, user_id: Uuid, device: &DeviceMeta) -> Result<Session, AuthError> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            device: device.device.clone(),
            platform: device.platform.clone(),
            ip: device.ip.clone(),
            user_agent: device.user_agent.clone(),
            created_at: now,
            last_activity_at: now,
            expires_at: now + Duration::seconds(self.session_ttl_seconds),
            is_active: true,
            refresh_token: generate_opaque_token()?,
            access_token_hash: None,
        };
        self.store.upsert_session(&session).await?;
        debug!(session_id = %session.id, user_id = %user_id, "session created");
        Ok(session)
    }

    /// Bind a freshly minted access token to the session. Only the SHA-256
    /// of the token is stored.
    pub async fn bind_access_token(
        &self,
        session: &mut Session,
        access_token: &str,
    ) -> Result<(), AuthError> {
        session.access_token_hash = Some(hash_opaque_token(access_token));
        self.store.upsert_session(session).await?;
        Ok(())
    }

    /// Record activity on a session without extending its expiry.
    ///
    /// Missing or already-ended sessions are ignored; the caller has
    /// already decided the request is valid through other checks.
    pub async fn touch(&self, session_id: Uuid) -> Result<(), AuthError> {
        let Some(mut session) = self.store.find_session(session_id).await? else {
            return Ok(());
        };
        if !session.is_active {
            return Ok(());
        }
        session.last_activity_at = Utc::now();
        self.store.upsert_session(&session).await?;
        Ok(())
    }

    /// End a session. Idempotent: ending an already-ended session is a
    /// no-op, not an error. Returns whether a live session was ended.
    pub async fn end(&self, session_id: Uuid) -> Result<bool, AuthError> {
        let Some(mut session) = self.store.find_session(session_id).await? else {
            return Ok(false);
        };
        if !session.is_active {
            return Ok(false);
        }
        session.is_active = false;
        self.store.upsert_session(&session).await?;
        debug!(session_id = %session_id, "session ended");
        Ok(true)
    }

    /// Sessions of one user that are active and unexpired.
    pub async fn list_active(&self, user_id: Uuid) -> Result<Vec<Session>, AuthError> {
        let now = Utc::now();
        let sessions = self.store.sessions_for_user(user_id).await?;
        Ok(sessions
            .into_iter()
            .filter(|session| session.is_live(now))
            .collect())
    }

    /// Mark every session past its absolute expiry as ended, one audit
    /// entry per swept session. Safe to run concurrently with live logins:
    /// it only ever performs the one-way `Active -> Ended` transition.
    pub async fn sweep_expired(&self) -> Result<usize, AuthError> {
        let swept = self.store.end_expired_sessions(Utc::now()).await?;
        for session in &swept {
            self.audit
                .record(
                    AuditEntry::new(AuditAction::SessionExpired)
                        .with_user(session.user_id)
                        .with_session(session.id)
                        .with_entity("session", session.id.to_string()),
                )
                .await;
        }
        if !swept.is_empty() {
            info!(count = swept.len(), "expired sessions swept");
        }
        Ok(swept.len())
    }
}
