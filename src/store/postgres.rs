//! PostgreSQL store implementation.
//!
//! Runtime-bound queries with `db.query` tracing spans. Multi-entity writes
//! run in a transaction; session rows survive user deletion (revoked, not
//! dropped) so audit entries keep a referent.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry, AuditOutcome};
use crate::models::{Credential, SecurityState, Session, User};
use crate::roles::Permission;

use super::{SignupOutcome, Store};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn permissions_from_row(identifiers: Vec<String>) -> Result<std::collections::HashSet<Permission>> {
    identifiers
        .iter()
        .map(|identifier| {
            Permission::parse(identifier)
                .with_context(|| format!("unknown permission identifier: {identifier}"))
        })
        .collect()
}

fn user_from_row(row: &PgRow) -> Result<User> {
    let identifiers: Vec<String> = row.get("special_permissions");
    Ok(User {
        id: row.get("id"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        role: row.get("role"),
        department: row.get("department"),
        phone: row.get("phone"),
        special_permissions: permissions_from_row(identifiers)?,
        is_active: row.get("is_active"),
        email_verified: row.get("email_verified"),
        last_login_at: row.get("last_login_at"),
        last_login_ip: row.get("last_login_ip"),
        login_count: row.get("login_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn session_from_row(row: &PgRow) -> Session {
    Session {
        id: row.get("id"),
        user_id: row.get("user_id"),
        device: row.get("device"),
        platform: row.get("platform"),
        ip: row.get("ip"),
        user_agent: row.get("user_agent"),
        created_at: row.get("created_at"),
        last_activity_at: row.get("last_activity_at"),
        expires_at: row.get("expires_at"),
        is_active: row.get("is_active"),
        refresh_token: row.get("refresh_token"),
        access_token_hash: row.get("access_token_hash"),
    }
}

fn audit_from_row(row: &PgRow) -> Result<AuditEntry> {
    let action: String = row.get("action");
    let outcome: String = row.get("outcome");
    let before: Option<String> = row.get("before_state");
    let after: Option<String> = row.get("after_state");
    Ok(AuditEntry {
        id: row.get("id"),
        user_id: row.get("user_id"),
        session_id: row.get("session_id"),
        action: AuditAction::parse(&action)
            .with_context(|| format!("unknown audit action: {action}"))?,
        entity_type: row.get("entity_type"),
        entity_id: row.get("entity_id"),
        before: before
            .map(|text| serde_json::from_str(&text).context("invalid before snapshot"))
            .transpose()?,
        after: after
            .map(|text| serde_json::from_str(&text).context("invalid after snapshot"))
            .transpose()?,
        outcome: AuditOutcome::parse(&outcome)
            .with_context(|| format!("unknown audit outcome: {outcome}"))?,
        ip: row.get("ip"),
        detail: row.get("detail"),
        created_at: row.get("created_at"),
    })
}

fn permission_identifiers(user: &User) -> Vec<String> {
    let mut identifiers: Vec<String> = user
        .special_permissions
        .iter()
        .map(|permission| permission.as_str().to_string())
        .collect();
    identifiers.sort();
    identifiers
}

const SESSION_COLUMNS: &str = "id, user_id, device, platform, ip, user_agent, created_at, \
     last_activity_at, expires_at, is_active, refresh_token, access_token_hash";

const USER_COLUMNS: &str = "id, email, display_name, role, department, phone, \
     special_permissions, is_active, email_verified, last_login_at, last_login_ip, \
     login_count, created_at, updated_at";

#[async_trait]
impl Store for PgStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by email")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by id")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn insert_user(
        &self,
        user: &User,
        credential: &Credential,
        security: &SecurityState,
    ) -> Result<SignupOutcome> {
        let mut tx = self.pool.begin().await.context("begin signup transaction")?;

        let query = r"
            INSERT INTO users
                (id, email, display_name, role, department, phone, special_permissions,
                 is_active, email_verified, last_login_at, last_login_ip, login_count,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user.id)
            .bind(&user.email)
            .bind(&user.display_name)
            .bind(&user.role)
            .bind(&user.department)
            .bind(&user.phone)
            .bind(permission_identifiers(user))
            .bind(user.is_active)
            .bind(user.email_verified)
            .bind(user.last_login_at)
            .bind(&user.last_login_ip)
            .bind(user.login_count)
            .bind(user.created_at)
            .bind(user.updated_at)
            .execute(&mut *tx)
            .instrument(span)
            .await;

        if let Err(err) = result {
            if is_unique_violation(&err) {
                let _ = tx.rollback().await;
                return Ok(SignupOutcome::DuplicateEmail);
            }
            return Err(err).context("failed to insert user");
        }

        let query = r"
            INSERT INTO credentials (user_id, password_hash, previous_hashes, password_changed_at)
            VALUES ($1, $2, $3, $4)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(credential.user_id)
            .bind(&credential.password_hash)
            .bind(&credential.previous_hashes)
            .bind(credential.password_changed_at)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert credential")?;

        let query = r"
            INSERT INTO security_states
                (user_id, failed_attempts, last_failed_at, locked_until,
                 reset_token_hash, reset_token_expires_at,
                 verify_token_hash, verify_token_expires_at,
                 two_factor_enabled, two_factor_secret)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(security.user_id)
            .bind(i32::try_from(security.failed_attempts).unwrap_or(i32::MAX))
            .bind(security.last_failed_at)
            .bind(security.locked_until)
            .bind(&security.reset_token_hash)
            .bind(security.reset_token_expires_at)
            .bind(&security.verify_token_hash)
            .bind(security.verify_token_expires_at)
            .bind(security.two_factor_enabled)
            .bind(&security.two_factor_secret)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert security state")?;

        tx.commit().await.context("commit signup transaction")?;
        Ok(SignupOutcome::Created)
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let query = r"
            UPDATE users
            SET email = $2, display_name = $3, role = $4, department = $5, phone = $6,
                special_permissions = $7, is_active = $8, email_verified = $9,
                last_login_at = $10, last_login_ip = $11, login_count = $12, updated_at = $13
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user.id)
            .bind(&user.email)
            .bind(&user.display_name)
            .bind(&user.role)
            .bind(&user.department)
            .bind(&user.phone)
            .bind(permission_identifiers(user))
            .bind(user.is_active)
            .bind(user.email_verified)
            .bind(user.last_login_at)
            .bind(&user.last_login_ip)
            .bind(user.login_count)
            .bind(user.updated_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update user")?;
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> Result<Vec<Session>> {
        let mut tx = self.pool.begin().await.context("begin delete transaction")?;

        let query = format!(
            "UPDATE sessions SET is_active = FALSE \
             WHERE user_id = $1 AND is_active RETURNING {SESSION_COLUMNS}"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query.as_str()
        );
        let rows = sqlx::query(&query)
            .bind(id)
            .fetch_all(&mut *tx)
            .instrument(span)
            .await
            .context("failed to revoke sessions for deleted user")?;
        let revoked = rows.iter().map(session_from_row).collect();

        // Credentials and security state go with the user via FK cascade.
        let query = "DELETE FROM users WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to delete user")?;

        tx.commit().await.context("commit delete transaction")?;
        Ok(revoked)
    }

    async fn find_credential(&self, user_id: Uuid) -> Result<Option<Credential>> {
        let query = "SELECT user_id, password_hash, previous_hashes, password_changed_at \
                     FROM credentials WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup credential")?;
        Ok(row.map(|row| Credential {
            user_id: row.get("user_id"),
            password_hash: row.get("password_hash"),
            previous_hashes: row.get("previous_hashes"),
            password_changed_at: row.get("password_changed_at"),
        }))
    }

    async fn upsert_credential(&self, credential: &Credential) -> Result<()> {
        let query = r"
            INSERT INTO credentials (user_id, password_hash, previous_hashes, password_changed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE
            SET password_hash = EXCLUDED.password_hash,
                previous_hashes = EXCLUDED.previous_hashes,
                password_changed_at = EXCLUDED.password_changed_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(credential.user_id)
            .bind(&credential.password_hash)
            .bind(&credential.previous_hashes)
            .bind(credential.password_changed_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to upsert credential")?;
        Ok(())
    }

    async fn find_security_state(&self, user_id: Uuid) -> Result<Option<SecurityState>> {
        let query = "SELECT user_id, failed_attempts, last_failed_at, locked_until, \
                     reset_token_hash, reset_token_expires_at, verify_token_hash, \
                     verify_token_expires_at, two_factor_enabled, two_factor_secret \
                     FROM security_states WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup security state")?;
        Ok(row.map(|row| {
            let failed_attempts: i32 = row.get("failed_attempts");
            SecurityState {
                user_id: row.get("user_id"),
                failed_attempts: u32::try_from(failed_attempts).unwrap_or(0),
                last_failed_at: row.get("last_failed_at"),
                locked_until: row.get("locked_until"),
                reset_token_hash: row.get("reset_token_hash"),
                reset_token_expires_at: row.get("reset_token_expires_at"),
                verify_token_hash: row.get("verify_token_hash"),
                verify_token_expires_at: row.get("verify_token_expires_at"),
                two_factor_enabled: row.get("two_factor_enabled"),
                two_factor_secret: row.get("two_factor_secret"),
            }
        }))
    }

    async fn upsert_security_state(&self, state: &SecurityState) -> Result<()> {
        let query = r"
            INSERT INTO security_states
                (user_id, failed_attempts, last_failed_at, locked_until,
                 reset_token_hash, reset_token_expires_at,
                 verify_token_hash, verify_token_expires_at,
                 two_factor_enabled, two_factor_secret)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (user_id) DO UPDATE
            SET failed_attempts = EXCLUDED.failed_attempts,
                last_failed_at = EXCLUDED.last_failed_at,
                locked_until = EXCLUDED.locked_until,
                reset_token_hash = EXCLUDED.reset_token_hash,
                reset_token_expires_at = EXCLUDED.reset_token_expires_at,
                verify_token_hash = EXCLUDED.verify_token_hash,
                verify_token_expires_at = EXCLUDED.verify_token_expires_at,
                two_factor_enabled = EXCLUDED.two_factor_enabled,
                two_factor_secret = EXCLUDED.two_factor_secret
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(state.user_id)
            .bind(i32::try_from(state.failed_attempts).unwrap_or(i32::MAX))
            .bind(state.last_failed_at)
            .bind(state.locked_until)
            .bind(&state.reset_token_hash)
            .bind(state.reset_token_expires_at)
            .bind(&state.verify_token_hash)
            .bind(state.verify_token_expires_at)
            .bind(state.two_factor_enabled)
            .bind(&state.two_factor_secret)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to upsert security state")?;
        Ok(())
    }

    async fn find_session(&self, id: Uuid) -> Result<Option<Session>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session")?;
        Ok(row.as_ref().map(session_from_row))
    }

    async fn upsert_session(&self, session: &Session) -> Result<()> {
        let query = r"
            INSERT INTO sessions
                (id, user_id, device, platform, ip, user_agent, created_at,
                 last_activity_at, expires_at, is_active, refresh_token, access_token_hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE
            SET last_activity_at = EXCLUDED.last_activity_at,
                expires_at = EXCLUDED.expires_at,
                is_active = EXCLUDED.is_active,
                access_token_hash = EXCLUDED.access_token_hash
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(session.id)
            .bind(session.user_id)
            .bind(&session.device)
            .bind(&session.platform)
            .bind(&session.ip)
            .bind(&session.user_agent)
            .bind(session.created_at)
            .bind(session.last_activity_at)
            .bind(session.expires_at)
            .bind(session.is_active)
            .bind(&session.refresh_token)
            .bind(&session.access_token_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to upsert session")?;
        Ok(())
    }

    async fn sessions_for_user(&self, user_id: Uuid) -> Result<Vec<Session>> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE user_id = $1 ORDER BY created_at"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list sessions")?;
        Ok(rows.iter().map(session_from_row).collect())
    }

    async fn end_expired_sessions(&self, now: DateTime<Utc>) -> Result<Vec<Session>> {
        let query = format!(
            "UPDATE sessions SET is_active = FALSE \
             WHERE is_active AND expires_at <= $1 RETURNING {SESSION_COLUMNS}"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query.as_str()
        );
        let rows = sqlx::query(&query)
            .bind(now)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to end expired sessions")?;
        Ok(rows.iter().map(session_from_row).collect())
    }

    async fn end_sessions_for_user(&self, user_id: Uuid) -> Result<Vec<Session>> {
        let query = format!(
            "UPDATE sessions SET is_active = FALSE \
             WHERE user_id = $1 AND is_active RETURNING {SESSION_COLUMNS}"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query.as_str()
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to end user sessions")?;
        Ok(rows.iter().map(session_from_row).collect())
    }

    async fn role_in_use(&self, role: &str) -> Result<bool> {
        let query = "SELECT 1 FROM users WHERE role = $1 LIMIT 1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(role)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to check role references")?;
        Ok(row.is_some())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        let before = entry
            .before
            .as_ref()
            .map(|value| serde_json::to_string(value).context("serialize before snapshot"))
            .transpose()?;
        let after = entry
            .after
            .as_ref()
            .map(|value| serde_json::to_string(value).context("serialize after snapshot"))
            .transpose()?;

        let query = r"
            INSERT INTO audit_log
                (id, user_id, session_id, action, entity_type, entity_id,
                 before_state, after_state, outcome, ip, detail, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7::jsonb, $8::jsonb, $9, $10, $11, $12)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(entry.id)
            .bind(entry.user_id)
            .bind(entry.session_id)
            .bind(entry.action.as_str())
            .bind(&entry.entity_type)
            .bind(&entry.entity_id)
            .bind(before)
            .bind(after)
            .bind(entry.outcome.as_str())
            .bind(&entry.ip)
            .bind(&entry.detail)
            .bind(entry.created_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to append audit entry")?;
        Ok(())
    }

    async fn audit_for_user(&self, user_id: Uuid, limit: usize) -> Result<Vec<AuditEntry>> {
        let query = "SELECT id, user_id, session_id, action, entity_type, entity_id, \
                     before_state::text AS before_state, after_state::text AS after_state, \
                     outcome, ip, detail, created_at \
                     FROM audit_log WHERE user_id = $1 \
                     ORDER BY created_at DESC LIMIT $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(user_id)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to read audit trail")?;
        rows.iter().map(audit_from_row).collect()
    }
}
