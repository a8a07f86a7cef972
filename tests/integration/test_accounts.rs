// Registration, invites, roles and tokens

use chrono::{Duration, Utc};

use chore_ledger::core::errors::{CoreError, TokenError};
use chore_ledger::core::models::Role;
use chore_ledger::service::accounts::{JoinRequest, ProfileUpdate, Registration};

use crate::common::*;

#[tokio::test]
async fn test_first_registrant_is_system_admin() {
    let app = TestApp::new();
    let first = app.register("Home", "first@example.com").await;
    let second = app.register("Cabin", "second@example.com").await;
    let worker = app.join(&second, "kid@example.com").await;

    assert_eq!(first.user.role, Role::SystemAdmin);
    assert_eq!(second.user.role, Role::Admin);
    assert_eq!(worker.user.role, Role::Worker);
    assert_eq!(worker.user.household_id, second.user.household_id);
    assert_ne!(first.user.household_id, second.user.household_id);
    assert_eq!(worker.claims.role, Role::Worker);
}

#[tokio::test]
async fn test_duplicate_email_conflicts_case_insensitively() {
    let app = TestApp::new();
    app.register("Home", "ada@example.com").await;

    let result = app
        .services
        .accounts
        .register(Registration {
            household_name: "Other".to_string(),
            name: "Ada".to_string(),
            email: "  ADA@Example.com ".to_string(),
            password: TEST_PASSWORD.to_string(),
        })
        .await;
    assert!(matches!(result, Err(CoreError::Conflict(_))));
}

#[tokio::test]
async fn test_short_password_rejected() {
    let app = TestApp::new();
    let result = app
        .services
        .accounts
        .register(Registration {
            household_name: "Home".to_string(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            password: "12345".to_string(),
        })
        .await;
    assert!(matches!(result, Err(CoreError::Validation(_))));
}

#[tokio::test]
async fn test_login_failures_are_indistinguishable() {
    let app = TestApp::new();
    app.register("Home", "ada@example.com").await;

    let wrong_password = app.services.accounts.login("ada@example.com", "nope-nope").await;
    let unknown_email = app.services.accounts.login("bob@example.com", TEST_PASSWORD).await;
    let (a, b) = (wrong_password.unwrap_err(), unknown_email.unwrap_err());
    assert_eq!(a.kind(), b.kind());
    assert_eq!(a.user_message(), b.user_message());
    assert_eq!(a.status_code(), 401);

    let member = app.login("ADA@example.com").await;
    assert_eq!(member.user.email, "ada@example.com");
}

#[tokio::test]
async fn test_regenerated_invite_supersedes_old_code() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;
    let old_code = app.invite_code(&admin).await;

    let household = app.services.accounts.regenerate_invite(&admin.claims).await.unwrap();
    let new_code = household.invite_code.expect("fresh code");
    assert_ne!(old_code, new_code);

    let join = |code: String, email: &str| JoinRequest {
        invite_code: code,
        name: "Kid".to_string(),
        email: email.to_string(),
        password: TEST_PASSWORD.to_string(),
    };
    let stale = app
        .services
        .accounts
        .join_household(join(old_code, "kid@example.com"))
        .await;
    assert!(matches!(stale, Err(CoreError::NotFound(_))));

    let joined = app
        .services
        .accounts
        .join_household(join(new_code, "kid@example.com"))
        .await
        .unwrap();
    assert_eq!(joined.user.household_id, admin.user.household_id);
}

#[tokio::test]
async fn test_invite_code_hidden_from_workers() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;
    let worker = app.join(&admin, "worker@example.com").await;

    let household = app.services.accounts.household(&worker.claims).await.unwrap();
    assert!(household.invite_code.is_none());
    let regenerate = app.services.accounts.regenerate_invite(&worker.claims).await;
    assert!(matches!(regenerate, Err(CoreError::Forbidden(_))));
}

#[tokio::test]
async fn test_role_rules() {
    let app = TestApp::new();
    let root = app.register("Home", "root@example.com").await;
    let admin = app.join_as(&root, "admin@example.com", Role::Admin).await;
    let worker = app.join(&root, "worker@example.com").await;

    let own = app.services.accounts.set_role(&admin.claims, admin.id(), Role::Manager).await;
    assert!(matches!(own, Err(CoreError::Forbidden(_))));

    let escalate = app
        .services
        .accounts
        .set_role(&admin.claims, worker.id(), Role::SystemAdmin)
        .await;
    assert!(matches!(escalate, Err(CoreError::Forbidden(_))));

    let demote_root = app.services.accounts.set_role(&admin.claims, root.id(), Role::Worker).await;
    assert!(matches!(demote_root, Err(CoreError::Forbidden(_))));

    let promoted = app
        .services
        .accounts
        .set_role(&admin.claims, worker.id(), Role::Manager)
        .await
        .unwrap();
    assert_eq!(promoted.role, Role::Manager);

    let by_worker = app.services.accounts.set_role(&worker.claims, admin.id(), Role::Observer).await;
    assert!(matches!(by_worker, Err(CoreError::Forbidden(_))));
}

#[tokio::test]
async fn test_only_system_admin_moves_system_admin_role() {
    let app = TestApp::new();
    let root = app.register("Home", "root@example.com").await;
    let admin = app.join_as(&root, "admin@example.com", Role::Admin).await;
    let worker = app.join(&root, "worker@example.com").await;

    let granted = app
        .services
        .accounts
        .set_role(&root.claims, worker.id(), Role::SystemAdmin)
        .await
        .unwrap();
    assert_eq!(granted.role, Role::SystemAdmin);

    let revoke = app.services.accounts.set_role(&admin.claims, worker.id(), Role::Worker).await;
    assert!(matches!(revoke, Err(CoreError::Forbidden(_))));

    let revoked = app
        .services
        .accounts
        .set_role(&root.claims, worker.id(), Role::Worker)
        .await
        .unwrap();
    assert_eq!(revoked.role, Role::Worker);
}

#[tokio::test]
async fn test_role_change_takes_effect_on_next_token() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;
    let worker = app.join(&admin, "worker@example.com").await;
    app.services
        .accounts
        .set_role(&admin.claims, worker.id(), Role::Manager)
        .await
        .unwrap();

    // The old token still carries the worker role
    let members = app.services.accounts.household_members(&worker.claims).await;
    assert!(matches!(members, Err(CoreError::Forbidden(_))));

    let manager = app.login("worker@example.com").await;
    let members = app.services.accounts.household_members(&manager.claims).await.unwrap();
    assert_eq!(members.len(), 2);
}

#[tokio::test]
async fn test_update_profile() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;
    let worker = app.join(&admin, "worker@example.com").await;

    let updated = app
        .services
        .accounts
        .update_profile(
            &worker.claims,
            ProfileUpdate {
                name: Some("Sam".to_string()),
                notification_pref_push: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "Sam");
    assert!(!updated.notification_pref_push);
    assert!(updated.notification_pref_email);

    let taken = app
        .services
        .accounts
        .update_profile(
            &worker.claims,
            ProfileUpdate {
                email: Some("admin@example.com".to_string()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(taken, Err(CoreError::Conflict(_))));
}

#[tokio::test]
async fn test_expired_token_rejected() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;

    let stale = app
        .tokens
        .issue_at(&admin.user, Utc::now() - Duration::hours(25))
        .unwrap();
    assert!(matches!(app.tokens.validate(&stale), Err(TokenError::Expired)));
}

#[tokio::test]
async fn test_refresh_only_near_expiry() {
    let app = TestApp::new();
    let admin = app.register("Home", "admin@example.com").await;

    let fresh = app.services.accounts.refresh_token(&admin.claims, &admin.token);
    assert!(matches!(fresh, Err(CoreError::Token(TokenError::NotEligible))));

    let aging = app
        .tokens
        .issue_at(&admin.user, Utc::now() - Duration::hours(23) - Duration::minutes(30))
        .unwrap();
    let claims = app.tokens.validate(&aging).unwrap();
    let renewed = app.services.accounts.refresh_token(&claims, &aging).unwrap();
    let renewed_claims = app.tokens.validate(&renewed).unwrap();
    assert!(renewed_claims.exp > claims.exp);
    assert_eq!(renewed_claims.user_id, admin.id());
}
