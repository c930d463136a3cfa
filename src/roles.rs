//! Role catalog and permission resolution.
//!
//! Permissions are a closed, enumerable catalog of `resource.action`
//! identifiers; a typo in a permission string fails at parse time instead of
//! silently granting or denying. A user's effective set is always the role's
//! permissions unioned with the user's own overrides.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::AuthError;
use crate::store::Store;

/// Catalog of every permission the platform knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    DashboardView,
    TouristsView,
    TouristsCreate,
    TouristsEdit,
    TouristsDelete,
    OperatorsView,
    OperatorsCreate,
    OperatorsEdit,
    OperatorsDelete,
    AssignmentsView,
    AssignmentsManage,
    IncidentsView,
    IncidentsRespond,
    IncidentsClose,
    UsersView,
    UsersCreate,
    UsersEdit,
    UsersDelete,
    RolesView,
    RolesManage,
    SessionsManage,
    AuditView,
}

/// How much damage a permission can do if misgranted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl Permission {
    /// Every catalog entry, for startup validation and admin listings.
    #[must_use]
    pub fn all() -> &'static [Permission] {
        &[
            Self::DashboardView,
            Self::TouristsView,
            Self::TouristsCreate,
            Self::TouristsEdit,
            Self::TouristsDelete,
            Self::OperatorsView,
            Self::OperatorsCreate,
            Self::OperatorsEdit,
            Self::OperatorsDelete,
            Self::AssignmentsView,
            Self::AssignmentsManage,
            Self::IncidentsView,
            Self::IncidentsRespond,
            Self::IncidentsClose,
            Self::UsersView,
            Self::UsersCreate,
            Self::UsersEdit,
            Self::UsersDelete,
            Self::RolesView,
            Self::RolesManage,
            Self::SessionsManage,
            Self::AuditView,
        ]
    }

    /// The `resource.action` identifier.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DashboardView => "dashboard.view",
            Self::TouristsView => "tourists.view",
            Self::TouristsCreate => "tourists.create",
            Self::TouristsEdit => "tourists.edit",
            Self::TouristsDelete => "tourists.delete",
            Self::OperatorsView => "operators.view",
            Self::OperatorsCreate => "operators.create",
            Self::OperatorsEdit => "operators.edit",
            Self::OperatorsDelete => "operators.delete",
            Self::AssignmentsView => "assignments.view",
            Self::AssignmentsManage => "assignments.manage",
            Self::IncidentsView => "incidents.view",
            Self::IncidentsRespond => "incidents.respond",
            Self::IncidentsClose => "incidents.close",
            Self::UsersView => "users.view",
            Self::UsersCreate => "users.create",
            Self::UsersEdit => "users.edit",
            Self::UsersDelete => "users.delete",
            Self::RolesView => "roles.view",
            Self::RolesManage => "roles.manage",
            Self::SessionsManage => "sessions.manage",
            Self::AuditView => "audit.view",
        }
    }

    /// Parse a `resource.action` identifier.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|permission| permission.as_str() == s)
    }

    /// The resource half of the identifier, used for grouped listings.
    #[must_use]
    pub fn category(&self) -> &'static str {
        self.as_str().split('.').next().unwrap_or_default()
    }

    #[must_use]
    pub fn risk(&self) -> RiskLevel {
        match self {
            Self::DashboardView
            | Self::TouristsView
            | Self::OperatorsView
            | Self::AssignmentsView
            | Self::IncidentsView
            | Self::RolesView => RiskLevel::Low,
            Self::TouristsCreate
            | Self::TouristsEdit
            | Self::OperatorsCreate
            | Self::OperatorsEdit
            | Self::AssignmentsManage
            | Self::IncidentsRespond
            | Self::IncidentsClose => RiskLevel::Medium,
            Self::TouristsDelete
            | Self::OperatorsDelete
            | Self::UsersView
            | Self::UsersCreate
            | Self::UsersEdit
            | Self::AuditView => RiskLevel::High,
            Self::UsersDelete | Self::RolesManage | Self::SessionsManage => RiskLevel::Critical,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named permission set. Many users reference one role by slug.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub display_name: String,
    pub permissions: HashSet<Permission>,
    /// System roles cannot be deleted nor have their set cleared.
    pub is_system: bool,
    pub is_active: bool,
}

impl Role {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        permissions: HashSet<Permission>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            permissions,
            is_system: false,
            is_active: true,
        }
    }
}

fn builtin_roles() -> Vec<Role> {
    let admin = Role {
        name: "admin".to_string(),
        display_name: "Administrator".to_string(),
        permissions: Permission::all().iter().copied().collect(),
        is_system: true,
        is_active: true,
    };
    let operator = Role {
        name: "operator".to_string(),
        display_name: "Safety Operator".to_string(),
        permissions: [
            Permission::DashboardView,
            Permission::TouristsView,
            Permission::TouristsCreate,
            Permission::TouristsEdit,
            Permission::AssignmentsView,
            Permission::AssignmentsManage,
            Permission::IncidentsView,
            Permission::IncidentsRespond,
            Permission::IncidentsClose,
        ]
        .into_iter()
        .collect(),
        is_system: true,
        is_active: true,
    };
    let viewer = Role {
        name: "viewer".to_string(),
        display_name: "Read-only Viewer".to_string(),
        permissions: [
            Permission::DashboardView,
            Permission::TouristsView,
            Permission::OperatorsView,
            Permission::AssignmentsView,
            Permission::IncidentsView,
        ]
        .into_iter()
        .collect(),
        is_system: true,
        is_active: true,
    };
    vec![admin, operator, viewer]
}

/// Resolves role and per-user permissions against the catalog and the store.
pub struct RoleResolver {
    store: Arc<dyn Store>,
    catalog: RwLock<HashMap<String, Role>>,
}

impl RoleResolver {
    /// Build a resolver seeded with the system roles.
    ///
    /// # Errors
    /// Fails when the seeded catalog violates the system-role invariants;
    /// this is a startup-time configuration fault.
    pub fn new(store: Arc<dyn Store>) -> Result<Self, AuthError> {
        let mut catalog = HashMap::new();
        for role in builtin_roles() {
            validate_role(&role)?;
            catalog.insert(role.name.clone(), role);
        }
        Ok(Self {
            store,
            catalog: RwLock::new(catalog),
        })
    }

    /// Look up a role by slug.
    pub async fn role(&self, name: &str) -> Option<Role> {
        self.catalog.read().await.get(name).cloned()
    }

    /// True when the slug names an active role.
    pub async fn role_is_active(&self, name: &str) -> bool {
        self.catalog
            .read()
            .await
            .get(name)
            .is_some_and(|role| role.is_active)
    }

    /// Register or replace a role.
    ///
    /// # Errors
    /// `ValidationError` when the role is malformed, or when replacing a
    /// system role would clear its permission set.
    pub async fn register_role(&self, role: Role) -> Result<(), AuthError> {
        validate_role(&role)?;
        let mut catalog = self.catalog.write().await;
        if let Some(existing) = catalog.get(&role.name) {
            if existing.is_system && role.permissions.is_empty() {
                return Err(AuthError::validation(
                    "system roles cannot have an empty permission set",
                ));
            }
            if existing.is_system && !role.is_system {
                return Err(AuthError::validation(
                    "system roles cannot lose their system flag",
                ));
            }
        }
        catalog.insert(role.name.clone(), role);
        Ok(())
    }

    /// Delete a role.
    ///
    /// # Errors
    /// `ValidationError` for system roles and for roles still referenced by
    /// any user.
    pub async fn delete_role(&self, name: &str) -> Result<(), AuthError> {
        let mut catalog = self.catalog.write().await;
        let Some(role) = catalog.get(name) else {
            return Err(AuthError::NotFound("role"));
        };
        if role.is_system {
            return Err(AuthError::validation("system roles cannot be deleted"));
        }
        if self.store.role_in_use(name).await? {
            return Err(AuthError::validation(
                "role is still assigned to at least one user",
            ));
        }
        catalog.remove(name);
        Ok(())
    }

    /// Effective permission set: role permissions unioned with the user's
    /// overrides. Unknown users resolve to the empty set, the safe default.
    pub async fn permissions_for(&self, user_id: uuid::Uuid) -> Result<HashSet<Permission>, AuthError> {
        let Some(user) = self.store.find_user_by_id(user_id).await? else {
            return Ok(HashSet::new());
        };
        let mut effective = user.special_permissions.clone();
        if let Some(role) = self.catalog.read().await.get(&user.role) {
            if role.is_active {
                effective.extend(role.permissions.iter().copied());
            }
        }
        Ok(effective)
    }

    /// Membership test against the resolved set.
    pub async fn has_permission(
        &self,
        user_id: uuid::Uuid,
        permission: Permission,
    ) -> Result<bool, AuthError> {
        Ok(self.permissions_for(user_id).await?.contains(&permission))
    }

    /// Identity check against the user's role reference.
    pub async fn has_role(&self, user_id: uuid::Uuid, role_name: &str) -> Result<bool, AuthError> {
        let Some(user) = self.store.find_user_by_id(user_id).await? else {
            return Ok(false);
        };
        Ok(user.role == role_name)
    }
}

fn validate_role(role: &Role) -> Result<(), AuthError> {
    if role.name.is_empty()
        || !role
            .name
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
    {
        return Err(AuthError::validation(
            "role name must be a lowercase slug ([a-z0-9-_])",
        ));
    }
    if role.is_system && role.permissions.is_empty() {
        return Err(AuthError::validation(
            "system roles cannot have an empty permission set",
        ));
    }
    if role.is_system && !role.is_active {
        return Err(AuthError::validation("system roles cannot be deactivated"));
    }
    Ok(())
}
