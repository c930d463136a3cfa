//! Registration validation, password rotation, reset/verification tokens,
//! permissions, and administrative user management.

use std::sync::Arc;

use secrecy::SecretString;
use sentinela::{
    AuditAction, AuthError, AuthService, CoreConfig, DeviceMeta, MemoryStore, Permission,
    RegisterInput, UserUpdate,
};

fn test_config() -> CoreConfig {
    CoreConfig::new(SecretString::from("integration-test-secret".to_string()))
}

fn service_with(config: CoreConfig) -> (AuthService, Arc<MemoryStore>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let store = Arc::new(MemoryStore::new());
    let service = AuthService::new(store.clone(), config).expect("service construction");
    (service, store)
}

fn registration(email: &str, role: &str) -> RegisterInput {
    RegisterInput {
        email: email.to_string(),
        password: "Str0ngPass!23".to_string(),
        display_name: "Sample User".to_string(),
        role: role.to_string(),
        department: None,
        phone: None,
    }
}

#[tokio::test]
async fn register_rejects_duplicate_email_case_insensitively() {
    let (service, _store) = service_with(test_config());
    service
        .register(registration("alice@example.com", "operator"))
        .await
        .expect("first registration");

    let duplicate = service
        .register(registration("Alice@EXAMPLE.com", "viewer"))
        .await;
    assert!(matches!(duplicate, Err(AuthError::Validation(_))));
}

#[tokio::test]
async fn register_validates_input_schema() {
    let (service, _store) = service_with(test_config());

    let bad_email = service.register(registration("not-an-email", "viewer")).await;
    assert!(matches!(bad_email, Err(AuthError::Validation(_))));

    let mut weak = registration("weak@example.com", "viewer");
    weak.password = "alllowercase".to_string();
    assert!(matches!(
        service.register(weak).await,
        Err(AuthError::Validation(_))
    ));

    let mut short = registration("short@example.com", "viewer");
    short.password = "Ab1".to_string();
    assert!(matches!(
        service.register(short).await,
        Err(AuthError::Validation(_))
    ));

    let unknown_role = service
        .register(registration("role@example.com", "warlord"))
        .await;
    assert!(matches!(unknown_role, Err(AuthError::Validation(_))));

    let mut blank_name = registration("blank@example.com", "viewer");
    blank_name.display_name = "   ".to_string();
    assert!(matches!(
        service.register(blank_name).await,
        Err(AuthError::Validation(_))
    ));
}

#[tokio::test]
async fn change_password_requires_current_and_blocks_reuse() {
    let (service, store) = service_with(test_config());
    let user = service
        .register(registration("rotate@example.com", "viewer"))
        .await
        .expect("register");

    let wrong_current = service
        .change_password(user.id, "NotTheCurrent1", "An0therPass!45")
        .await;
    assert!(matches!(wrong_current, Err(AuthError::Authentication)));

    service
        .change_password(user.id, "Str0ngPass!23", "An0therPass!45")
        .await
        .expect("change password");

    // Immediate reuse of the previous password is rejected.
    let reuse = service
        .change_password(user.id, "An0therPass!45", "Str0ngPass!23")
        .await;
    assert!(matches!(reuse, Err(AuthError::Validation(_))));

    // The old password no longer logs in; the new one does.
    let old = service
        .login("rotate@example.com", "Str0ngPass!23", DeviceMeta::default())
        .await;
    assert!(matches!(old, Err(AuthError::Authentication)));
    service
        .login("rotate@example.com", "An0therPass!45", DeviceMeta::default())
        .await
        .expect("login with new password");

    let changed_entries = store
        .audit_entries()
        .await
        .into_iter()
        .filter(|entry| entry.action == AuditAction::PasswordChanged)
        .count();
    assert_eq!(changed_entries, 1);
}

#[tokio::test]
async fn password_history_window_rolls_forward() {
    // Keep only the single most recent old hash so the oldest password
    // becomes reusable after two rotations.
    let (service, _store) = service_with(test_config().with_password_history_len(1));
    let user = service
        .register(registration("history@example.com", "viewer"))
        .await
        .expect("register");

    service
        .change_password(user.id, "Str0ngPass!23", "SecondPass2!x")
        .await
        .expect("first rotation");
    service
        .change_password(user.id, "SecondPass2!x", "ThirdPass3!x")
        .await
        .expect("second rotation");

    // The original password has rolled out of the history window.
    service
        .change_password(user.id, "ThirdPass3!x", "Str0ngPass!23")
        .await
        .expect("reuse outside the window");
}

#[tokio::test]
async fn password_reset_flow_end_to_end() {
    let (service, store) = service_with(test_config());
    service
        .register(registration("reset@example.com", "viewer"))
        .await
        .expect("register");

    // Unknown emails yield no token, quietly.
    let none = service
        .request_password_reset("stranger@example.com")
        .await
        .expect("request for unknown email");
    assert!(none.is_none());

    let token = service
        .request_password_reset("reset@example.com")
        .await
        .expect("request")
        .expect("token for known email");

    let forged = service
        .reset_password("reset@example.com", "forged-token", "NewPass9!ab")
        .await;
    assert!(matches!(forged, Err(AuthError::TokenInvalid)));

    service
        .reset_password("reset@example.com", &token, "NewPass9!ab")
        .await
        .expect("reset");

    // Single-use: the same token cannot be spent twice.
    let replay = service
        .reset_password("reset@example.com", &token, "YetAnother1!z")
        .await;
    assert!(matches!(replay, Err(AuthError::TokenInvalid)));

    service
        .login("reset@example.com", "NewPass9!ab", DeviceMeta::default())
        .await
        .expect("login with reset password");

    let actions: Vec<AuditAction> = store
        .audit_entries()
        .await
        .into_iter()
        .map(|entry| entry.action)
        .collect();
    assert!(actions.contains(&AuditAction::PasswordResetIssued));
    assert!(actions.contains(&AuditAction::PasswordResetFailed));
    assert!(actions.contains(&AuditAction::PasswordResetCompleted));
}

#[tokio::test]
async fn expired_reset_token_is_rejected() {
    let (service, _store) = service_with(test_config().with_reset_token_ttl_seconds(-1));
    service
        .register(registration("late@example.com", "viewer"))
        .await
        .expect("register");

    let token = service
        .request_password_reset("late@example.com")
        .await
        .expect("request")
        .expect("token");

    let result = service
        .reset_password("late@example.com", &token, "NewPass9!ab")
        .await;
    assert!(matches!(result, Err(AuthError::TokenExpired)));
}

#[tokio::test]
async fn reset_clears_an_active_lockout() {
    let (service, _store) = service_with(test_config());
    service
        .register(registration("locked@example.com", "viewer"))
        .await
        .expect("register");

    for _ in 0..5 {
        let _ = service
            .login("locked@example.com", "WrongPass!23", DeviceMeta::default())
            .await;
    }

    let token = service
        .request_password_reset("locked@example.com")
        .await
        .expect("request")
        .expect("token");
    service
        .reset_password("locked@example.com", &token, "NewPass9!ab")
        .await
        .expect("reset");

    service
        .login("locked@example.com", "NewPass9!ab", DeviceMeta::default())
        .await
        .expect("login after reset clears lockout");
}

#[tokio::test]
async fn email_verification_flips_the_flag() {
    let (service, _store) = service_with(test_config());
    let user = service
        .register(registration("verify@example.com", "viewer"))
        .await
        .expect("register");
    assert!(!user.email_verified);

    let token = service
        .request_email_verification(user.id)
        .await
        .expect("request verification");
    service
        .verify_email(user.id, &token)
        .await
        .expect("verify email");

    let refreshed = service.get_user(user.id).await.expect("get_user");
    assert!(refreshed.email_verified);
}

#[tokio::test]
async fn permissions_resolve_role_union_overrides() {
    let (service, _store) = service_with(test_config());
    let user = service
        .register(registration("perms@example.com", "operator"))
        .await
        .expect("register");

    assert!(service
        .has_permission(user.id, Permission::IncidentsRespond)
        .await
        .expect("role permission"));
    assert!(!service
        .has_permission(user.id, Permission::UsersDelete)
        .await
        .expect("missing permission"));

    assert!(service.has_role(user.id, "operator").await.expect("has_role"));
    assert!(!service.has_role(user.id, "admin").await.expect("has_role"));

    // Layer a special permission on top of the role set.
    let mut overrides = std::collections::HashSet::new();
    overrides.insert(Permission::AuditView);
    service
        .update_user(
            user.id,
            UserUpdate {
                special_permissions: Some(overrides),
                ..UserUpdate::default()
            },
        )
        .await
        .expect("update_user");

    assert!(service
        .has_permission(user.id, Permission::AuditView)
        .await
        .expect("override permission"));
    assert!(service
        .has_permission(user.id, Permission::IncidentsRespond)
        .await
        .expect("role permission survives override"));
}

#[tokio::test]
async fn unknown_user_resolves_to_empty_permission_set() {
    let (service, _store) = service_with(test_config());
    let ghost = uuid::Uuid::new_v4();
    let permissions = service
        .roles()
        .permissions_for(ghost)
        .await
        .expect("permissions_for");
    assert!(permissions.is_empty());
    assert!(!service
        .has_permission(ghost, Permission::DashboardView)
        .await
        .expect("has_permission"));
    assert!(!service.has_role(ghost, "viewer").await.expect("has_role"));
}

#[tokio::test]
async fn role_deletion_rules_hold() {
    use sentinela::Role;

    let (service, _store) = service_with(test_config());
    service
        .register(registration("holder@example.com", "operator"))
        .await
        .expect("register");

    // System roles can never be deleted.
    let system = service.roles().delete_role("admin").await;
    assert!(matches!(system, Err(AuthError::Validation(_))));

    // A custom role cannot be deleted while referenced.
    let mut permissions = std::collections::HashSet::new();
    permissions.insert(Permission::DashboardView);
    service
        .roles()
        .register_role(Role::new("auditor", "Auditor", permissions))
        .await
        .expect("register_role");

    let user = service
        .register(registration("auditor@example.com", "auditor"))
        .await
        .expect("register with custom role");
    let in_use = service.roles().delete_role("auditor").await;
    assert!(matches!(in_use, Err(AuthError::Validation(_))));

    // Once the last reference moves away, deletion goes through.
    service
        .update_user(
            user.id,
            UserUpdate {
                role: Some("viewer".to_string()),
                ..UserUpdate::default()
            },
        )
        .await
        .expect("reassign role");
    service
        .roles()
        .delete_role("auditor")
        .await
        .expect("delete unreferenced role");
}

#[tokio::test]
async fn deactivation_revokes_sessions_and_blocks_login() {
    let (service, _store) = service_with(test_config());
    let user = service
        .register(registration("leaving@example.com", "viewer"))
        .await
        .expect("register");
    let outcome = service
        .login("leaving@example.com", "Str0ngPass!23", DeviceMeta::default())
        .await
        .expect("login");

    service.deactivate_user(user.id).await.expect("deactivate");

    assert!(service
        .verify_token(&outcome.token)
        .await
        .expect("verify after deactivation")
        .is_none());
    let login = service
        .login("leaving@example.com", "Str0ngPass!23", DeviceMeta::default())
        .await;
    assert!(matches!(login, Err(AuthError::Authentication)));
}

#[tokio::test]
async fn deletion_cascades_and_leaves_an_audit_trail() {
    let (service, store) = service_with(test_config());
    let user = service
        .register(registration("gone@example.com", "viewer"))
        .await
        .expect("register");
    let outcome = service
        .login("gone@example.com", "Str0ngPass!23", DeviceMeta::default())
        .await
        .expect("login");

    service.delete_user(user.id).await.expect("delete");

    assert!(matches!(
        service.get_user(user.id).await,
        Err(AuthError::NotFound(_))
    ));
    assert!(service
        .verify_token(&outcome.token)
        .await
        .expect("verify after deletion")
        .is_none());

    let deleted_entries = store
        .audit_entries()
        .await
        .into_iter()
        .filter(|entry| entry.action == AuditAction::UserDeleted)
        .count();
    assert_eq!(deleted_entries, 1);

    let second_delete = service.delete_user(user.id).await;
    assert!(matches!(second_delete, Err(AuthError::NotFound(_))));
}

#[tokio::test]
async fn update_user_validates_role_and_name() {
    let (service, _store) = service_with(test_config());
    let user = service
        .register(registration("edit@example.com", "viewer"))
        .await
        .expect("register");

    let bad_role = service
        .update_user(
            user.id,
            UserUpdate {
                role: Some("warlord".to_string()),
                ..UserUpdate::default()
            },
        )
        .await;
    assert!(matches!(bad_role, Err(AuthError::Validation(_))));

    let blank = service
        .update_user(
            user.id,
            UserUpdate {
                display_name: Some("  ".to_string()),
                ..UserUpdate::default()
            },
        )
        .await;
    assert!(matches!(blank, Err(AuthError::Validation(_))));

    let updated = service
        .update_user(
            user.id,
            UserUpdate {
                display_name: Some("Renamed User".to_string()),
                department: Some("mountain-rescue".to_string()),
                ..UserUpdate::default()
            },
        )
        .await
        .expect("update");
    assert_eq!(updated.display_name, "Renamed User");
    assert_eq!(updated.department.as_deref(), Some("mountain-rescue"));

    let missing = service
        .update_user(uuid::Uuid::new_v4(), UserUpdate::default())
        .await;
    assert!(matches!(missing, Err(AuthError::NotFound(_))));
}
