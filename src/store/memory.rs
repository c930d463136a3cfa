//! In-memory store for tests and embedded deployments.
//!
//! Each collection sits behind its own async mutex; multi-entity writes take
//! the locks in a fixed order (users, credentials, security, sessions) so
//! they stay atomic with respect to each other.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::models::{Credential, SecurityState, Session, User};

use super::{SignupOutcome, Store};

#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<Uuid, User>>,
    credentials: Mutex<HashMap<Uuid, Credential>>,
    security: Mutex<HashMap<Uuid, SecurityState>>,
    sessions: Mutex<HashMap<Uuid, Session>>,
    audit: Mutex<Vec<AuditEntry>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the full audit trail, oldest first. Test-facing.
    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit.lock().await.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let users = self.users.lock().await;
        Ok(users.values().find(|user| user.email == email).cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.lock().await.get(&id).cloned())
    }

    async fn insert_user(
        &self,
        user: &User,
        credential: &Credential,
        security: &SecurityState,
    ) -> Result<SignupOutcome> {
        let mut users = self.users.lock().await;
        if users.values().any(|existing| existing.email == user.email) {
            return Ok(SignupOutcome::DuplicateEmail);
        }
        let mut credentials = self.credentials.lock().await;
        let mut security_states = self.security.lock().await;
        users.insert(user.id, user.clone());
        credentials.insert(credential.user_id, credential.clone());
        security_states.insert(security.user_id, security.clone());
        Ok(SignupOutcome::Created)
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        self.users.lock().await.insert(user.id, user.clone());
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> Result<Vec<Session>> {
        let mut users = self.users.lock().await;
        let mut credentials = self.credentials.lock().await;
        let mut security_states = self.security.lock().await;
        let mut sessions = self.sessions.lock().await;

        users.remove(&id);
        credentials.remove(&id);
        security_states.remove(&id);

        let mut revoked = Vec::new();
        for session in sessions.values_mut() {
            if session.user_id == id && session.is_active {
                session.is_active = false;
                revoked.push(session.clone());
            }
        }
        Ok(revoked)
    }

    async fn find_credential(&self, user_id: Uuid) -> Result<Option<Credential>> {
        Ok(self.credentials.lock().await.get(&user_id).cloned())
    }

    async fn upsert_credential(&self, credential: &Credential) -> Result<()> {
        self.credentials
            .lock()
            .await
            .insert(credential.user_id, credential.clone());
        Ok(())
    }

    async fn find_security_state(&self, user_id: Uuid) -> Result<Option<SecurityState>> {
        Ok(self.security.lock().await.get(&user_id).cloned())
    }

    async fn upsert_security_state(&self, state: &SecurityState) -> Result<()> {
        self.security
            .lock()
            .await
            .insert(state.user_id, state.clone());
        Ok(())
    }

    async fn find_session(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.sessions.lock().await.get(&id).cloned())
    }

    async fn upsert_session(&self, session: &Session) -> Result<()> {
        self.sessions
            .lock()
            .await
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn sessions_for_user(&self, user_id: Uuid) -> Result<Vec<Session>> {
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .values()
            .filter(|session| session.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn end_expired_sessions(&self, now: DateTime<Utc>) -> Result<Vec<Session>> {
        let mut sessions = self.sessions.lock().await;
        let mut swept = Vec::new();
        for session in sessions.values_mut() {
            if session.is_active && session.expires_at <= now {
                session.is_active = false;
                swept.push(session.clone());
            }
        }
        Ok(swept)
    }

    async fn end_sessions_for_user(&self, user_id: Uuid) -> Result<Vec<Session>> {
        let mut sessions = self.sessions.lock().await;
        let mut ended = Vec::new();
        for session in sessions.values_mut() {
            if session.user_id == user_id && session.is_active {
                session.is_active = false;
                ended.push(session.clone());
            }
        }
        Ok(ended)
    }

    async fn role_in_use(&self, role: &str) -> Result<bool> {
        let users = self.users.lock().await;
        Ok(users.values().any(|user| user.role == role))
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        self.audit.lock().await.push(entry.clone());
        Ok(())
    }

    async fn audit_for_user(&self, user_id: Uuid, limit: usize) -> Result<Vec<AuditEntry>> {
        let audit = self.audit.lock().await;
        let mut entries: Vec<AuditEntry> = audit
            .iter()
            .filter(|entry| entry.user_id == Some(user_id))
            .cloned()
            .collect();
        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{MemoryStore, SignupOutcome, Store};
    use crate::audit::{AuditAction, AuditEntry};
    use crate::models::{Credential, SecurityState, Session, User};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn sample_records(email: &str) -> (User, Credential, SecurityState) {
        let user = User::new(email.to_string(), "Sample".to_string(), "viewer".to_string());
        let credential = Credential::new(user.id, "$argon2id$stub".to_string());
        let security = SecurityState::new(user.id);
        (user, credential, security)
    }

    fn sample_session(user_id: Uuid, ttl_seconds: i64) -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            user_id,
            device: None,
            platform: None,
            ip: None,
            user_agent: None,
            created_at: now,
            last_activity_at: now,
            expires_at: now + Duration::seconds(ttl_seconds),
            is_active: true,
            refresh_token: "refresh".to_string(),
            access_token_hash: None,
        }
    }

    #[tokio::test]
    async fn insert_user_rejects_duplicate_email() {
        let store = MemoryStore::new();
        let (user, credential, security) = sample_records("dup@example.com");
        let outcome = store.insert_user(&user, &credential, &security).await.unwrap();
        assert_eq!(outcome, SignupOutcome::Created);

        let (other, other_credential, other_security) = sample_records("dup@example.com");
        let outcome = store
            .insert_user(&other, &other_credential, &other_security)
            .await
            .unwrap();
        assert_eq!(outcome, SignupOutcome::DuplicateEmail);

        // The conflicting insert must not leave partial records behind.
        assert!(store.find_credential(other.id).await.unwrap().is_none());
        assert!(store.find_security_state(other.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_user_revokes_active_sessions() {
        let store = MemoryStore::new();
        let (user, credential, security) = sample_records("gone@example.com");
        store.insert_user(&user, &credential, &security).await.unwrap();
        store
            .upsert_session(&sample_session(user.id, 3600))
            .await
            .unwrap();

        let revoked = store.delete_user(user.id).await.unwrap();
        assert_eq!(revoked.len(), 1);
        assert!(!revoked[0].is_active);
        assert!(store.find_user_by_id(user.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn end_expired_sessions_is_idempotent() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        store
            .upsert_session(&sample_session(user_id, -10))
            .await
            .unwrap();
        store
            .upsert_session(&sample_session(user_id, 3600))
            .await
            .unwrap();

        let now = Utc::now();
        let swept = store.end_expired_sessions(now).await.unwrap();
        assert_eq!(swept.len(), 1);

        let swept_again = store.end_expired_sessions(now).await.unwrap();
        assert!(swept_again.is_empty());
    }

    #[tokio::test]
    async fn audit_reads_newest_first() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        store
            .append_audit(&AuditEntry::new(AuditAction::UserCreated).with_user(user_id))
            .await
            .unwrap();
        store
            .append_audit(&AuditEntry::new(AuditAction::UserLogin).with_user(user_id))
            .await
            .unwrap();

        let entries = store.audit_for_user(user_id, 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, AuditAction::UserLogin);

        let limited = store.audit_for_user(user_id, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn role_in_use_tracks_references() {
        let store = MemoryStore::new();
        let (user, credential, security) = sample_records("ref@example.com");
        store.insert_user(&user, &credential, &security).await.unwrap();
        assert!(store.role_in_use("viewer").await.unwrap());
        assert!(!store.role_in_use("operator").await.unwrap());
    }
}
