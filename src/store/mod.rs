//! Persistence seam for the authentication core.
//!
//! The core owns no process-wide state: everything it persists goes through
//! this trait. [`PgStore`] is the production PostgreSQL implementation;
//! [`MemoryStore`] backs tests and embedded deployments. Both must provide
//! read-your-writes consistency per user id.

mod memory;
mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::models::{Credential, SecurityState, Session, User};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Outcome when attempting to create a new user with its credential and
/// security state.
#[derive(Debug, PartialEq, Eq)]
pub enum SignupOutcome {
    Created,
    DuplicateEmail,
}

/// Storage contract consumed by the authentication core.
///
/// Multi-entity writes (`insert_user`, `delete_user`) are atomic: either
/// every record lands or none does, so no orphan user exists without a
/// credential. Audit appends are write-only; entries are never updated or
/// deleted.
#[async_trait]
pub trait Store: Send + Sync {
    /// Look up a user by normalized email.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Create user, credential, and security state as one unit.
    async fn insert_user(
        &self,
        user: &User,
        credential: &Credential,
        security: &SecurityState,
    ) -> Result<SignupOutcome>;

    async fn update_user(&self, user: &User) -> Result<()>;

    /// Remove the user with credential and security state, revoking every
    /// session. Returns the sessions that were still active, for auditing.
    async fn delete_user(&self, id: Uuid) -> Result<Vec<Session>>;

    async fn find_credential(&self, user_id: Uuid) -> Result<Option<Credential>>;

    async fn upsert_credential(&self, credential: &Credential) -> Result<()>;

    async fn find_security_state(&self, user_id: Uuid) -> Result<Option<SecurityState>>;

    async fn upsert_security_state(&self, state: &SecurityState) -> Result<()>;

    async fn find_session(&self, id: Uuid) -> Result<Option<Session>>;

    async fn upsert_session(&self, session: &Session) -> Result<()>;

    async fn sessions_for_user(&self, user_id: Uuid) -> Result<Vec<Session>>;

    /// Mark every active session past its absolute expiry as ended and
    /// return them. Already-ended sessions are untouched, which keeps the
    /// sweep idempotent.
    async fn end_expired_sessions(&self, now: DateTime<Utc>) -> Result<Vec<Session>>;

    /// Mark every active session of one user as ended and return them.
    async fn end_sessions_for_user(&self, user_id: Uuid) -> Result<Vec<Session>>;

    /// True while any user still references the role slug.
    async fn role_in_use(&self, role: &str) -> Result<bool>;

    /// Append one immutable audit entry.
    async fn append_audit(&self, entry: &AuditEntry) -> Result<()>;

    /// Read side of the audit trail, newest first.
    async fn audit_for_user(&self, user_id: Uuid, limit: usize) -> Result<Vec<AuditEntry>>;
}
