//! # Sentinela (Authentication, Session & Access-Control Core)
//!
//! `sentinela` is the authentication core behind a tourism-safety
//! administrative platform: account lifecycle, password hashing and
//! rotation, sessions, failed-login lockout, bearer tokens, role-based
//! permissions, and an append-only audit trail. It is transport-agnostic;
//! the web layer that fronts it lives elsewhere and only calls the
//! operations exposed here.
//!
//! ## Sessions & Tokens
//!
//! A login produces a server-side session and a compact HS256 bearer token
//! that embeds the session id. Tokens are short-lived; the session record
//! is the source of truth for whether a login is still valid, so revoking
//! the session invalidates every token bound to it regardless of expiry.
//! Session expiry is absolute, never sliding.
//!
//! ## Lockout
//!
//! Repeated failed logins lock the account for a fixed window. The lockout
//! check runs before password verification and every login failure returns
//! the same generic error, so responses never reveal whether an email
//! exists, a password was wrong, or an account is locked.
//!
//! ## Persistence
//!
//! The core holds no hidden process-wide state. Everything goes through
//! the [`store::Store`] trait: [`store::PgStore`] for PostgreSQL (schema in
//! `sql/schema.sql`), [`store::MemoryStore`] for tests and embedded use.
//!
//! ## Auditing
//!
//! Security-relevant actions (logins, lockouts, password changes, session
//! expiry, user administration) append immutable audit entries. Failures
//! are audited before the error is returned to the caller.

pub mod audit;
pub mod config;
pub mod error;
pub mod guard;
pub mod models;
pub mod password;
pub mod roles;
pub mod service;
pub mod session;
pub mod store;
pub mod token;

mod utils;

pub use audit::{AuditAction, AuditEntry, AuditOutcome};
pub use config::CoreConfig;
pub use error::AuthError;
pub use models::{DeviceMeta, PublicUser, Session};
pub use roles::{Permission, RiskLevel, Role};
pub use service::{AuthService, LoginOutcome, RegisterInput, UserUpdate};
pub use store::{MemoryStore, PgStore, Store};
