//! Service flow tests against the in-memory backends

use chrono::Duration;

use crate::core::auth::guard::has_permission;
use crate::core::auth::service::{AuthError, AuthSettings};
use crate::core::db::models::UniqueUserField;
use crate::core::mail::{ACCOUNT_CONFIRMATION, PASSWORD_RESET};
use crate::core::testing::{ADMIN_ROLE_ID, Harness, TEST_PASSWORD};
use crate::core::users::commands::{PhotoUpload, UpdateUserProfile};
use crate::core::users::validator::invalid_role;

fn png() -> PhotoUpload {
    PhotoUpload {
        content_type: "image/png".into(),
        bytes: vec![0x89, b'P', b'N', b'G'],
    }
}

// ============================================================================
// Registration and confirmation
// ============================================================================

#[tokio::test]
async fn test_register_then_confirm_once() {
    let harness = Harness::new();

    let user = harness.register("alice", "alice@example.com").await;
    assert!(!user.active);

    let sent = harness.mailer.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "alice@example.com");
    assert!(sent[0].html_body.contains("Alice Liddell"));

    let url = harness.mailer.last_confirmation_url().await.unwrap();
    let (_, token) = url.split_once("?token=").unwrap();

    assert!(harness.auth.confirm(token).await.unwrap());
    assert!(!harness.auth.confirm(token).await.unwrap());

    let stored = harness.users.get_user(user.id).await.unwrap();
    assert!(stored.user.active);
    assert_eq!(stored.roles.len(), 1);
    assert_eq!(stored.roles[0].name, "user");
}

#[tokio::test]
async fn test_confirmation_email_escapes_profile_markup() {
    let harness = Harness::new();
    let mut command = Harness::command("mallory", "victim@example.com");
    command.name = r#"<a href="http://evil.example">Login</a>"#.into();
    harness.auth.register(command, &harness.ctx).await.unwrap();

    let sent = harness.mailer.sent().await;
    assert!(!sent[0].html_body.contains("evil.example\">"));
    assert!(
        sent[0]
            .html_body
            .contains("&lt;a href=&quot;http://evil.example&quot;&gt;Login&lt;/a&gt;")
    );

    let url = harness.mailer.last_confirmation_url().await.unwrap();
    assert!(url.starts_with("http://testserver/v1/auth/confirm?token="));
}

#[tokio::test]
async fn test_confirm_rejects_forged_and_expired_tokens() {
    let harness = Harness::new();
    let user = harness.register("alice", "alice@example.com").await;

    assert!(matches!(
        harness.auth.confirm("garbage").await,
        Err(AuthError::InvalidToken)
    ));

    let token = harness.auth.confirmation_codec().encrypt(user.id).unwrap();
    harness.clock.advance(Duration::hours(25));
    assert!(matches!(
        harness.auth.confirm(&token).await,
        Err(AuthError::InvalidToken)
    ));
}

#[tokio::test]
async fn test_confirm_unknown_user_is_false() {
    let harness = Harness::new();
    let token = harness.auth.confirmation_codec().encrypt(4242).unwrap();

    assert!(!harness.auth.confirm(&token).await.unwrap());
}

#[tokio::test]
async fn test_concurrent_registrations_admit_one() {
    let harness = Harness::new();

    let (first, second) = tokio::join!(
        harness
            .auth
            .register(Harness::command("bob", "bob1@example.com"), &harness.ctx),
        harness
            .auth
            .register(Harness::command("bob", "bob2@example.com"), &harness.ctx),
    );

    let outcomes = [first, second];
    let created = outcomes.iter().filter(|r| r.is_ok()).count();
    let duplicates = outcomes
        .iter()
        .filter(|r| matches!(r, Err(AuthError::DuplicateAccount(UniqueUserField::Username))))
        .count();

    assert_eq!(created, 1);
    assert_eq!(duplicates, 1);
}

#[tokio::test]
async fn test_pending_registration_blocks_reuse() {
    let harness = Harness::new();
    harness.register("bob", "bob@example.com").await;

    let result = harness
        .auth
        .register(Harness::command("bobby", "bob@example.com"), &harness.ctx)
        .await;

    assert!(matches!(
        result,
        Err(AuthError::DuplicateAccount(UniqueUserField::Email))
    ));
}

#[tokio::test]
async fn test_abandoned_registration_is_reclaimed() {
    let harness = Harness::new();
    let stale = harness.register("bob", "bob@example.com").await;

    harness.clock.advance(Duration::hours(25));
    let fresh = harness.register("bob", "bob@example.com").await;
    assert_ne!(stale.id, fresh.id);

    let users = harness.store.all_users().await;
    let old = users.iter().find(|u| u.id == stale.id).unwrap();
    assert!(old.deleted_at.is_some());
    let new = users.iter().find(|u| u.id == fresh.id).unwrap();
    assert!(new.deleted_at.is_none());
}

#[tokio::test]
async fn test_reclaimed_registration_loses_its_photo() {
    let harness = Harness::new();
    let mut command = Harness::command("bob", "bob@example.com");
    command.photo = Some(png());
    let stale = harness.auth.register(command, &harness.ctx).await.unwrap();
    let stale_photo = stale.photo_path.unwrap();

    harness.clock.advance(Duration::hours(25));
    let mut command = Harness::command("bob", "bob@example.com");
    command.photo = Some(png());
    let fresh = harness.auth.register(command, &harness.ctx).await.unwrap();

    let paths = harness.files.paths().await;
    assert!(!paths.contains(&stale_photo));
    assert_eq!(paths, vec![fresh.photo_path.unwrap()]);
}

#[tokio::test]
async fn test_admin_created_account_is_active_without_email() {
    let harness = Harness::new();

    let user = harness
        .auth
        .create_active_user(Harness::command("carol", "carol@example.com"))
        .await
        .unwrap();

    assert!(user.active);
    assert!(harness.mailer.sent().await.is_empty());
    assert!(
        harness
            .auth
            .authenticate_user("carol", TEST_PASSWORD)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_admin_create_respects_pending_registrations() {
    let harness = Harness::new();
    harness.register("carol", "carol@example.com").await;

    let result = harness
        .auth
        .create_active_user(Harness::command("carol", "other@example.com"))
        .await;

    assert!(matches!(
        result,
        Err(AuthError::DuplicateAccount(UniqueUserField::Username))
    ));
}

#[tokio::test]
async fn test_active_account_is_never_reclaimed() {
    let harness = Harness::new();
    harness.register_active("bob", "bob@example.com").await;

    harness.clock.advance(Duration::days(30));
    let result = harness
        .auth
        .register(Harness::command("bob", "other@example.com"), &harness.ctx)
        .await;

    assert!(matches!(
        result,
        Err(AuthError::DuplicateAccount(UniqueUserField::Username))
    ));
}

#[tokio::test]
async fn test_register_with_unknown_role_is_rejected() {
    let harness = Harness::new();
    let mut command = Harness::command("alice", "alice@example.com");
    command.role_ids = vec![99];

    match harness.auth.register(command, &harness.ctx).await {
        Err(AuthError::Validation(issues)) => assert_eq!(issues, vec![invalid_role()]),
        other => panic!("unexpected: {other:?}"),
    }
    assert!(harness.store.all_users().await.is_empty());
}

#[tokio::test]
async fn test_register_with_explicit_roles() {
    let harness = Harness::new();
    let mut command = Harness::command("root", "root@example.com");
    command.role_ids = vec![ADMIN_ROLE_ID, ADMIN_ROLE_ID];

    let user = harness.auth.register(command, &harness.ctx).await.unwrap();
    let stored = harness.users.get_user(user.id).await.unwrap();

    assert_eq!(stored.roles.len(), 1);
    assert!(stored.has_permission("admin"));
}

#[tokio::test]
async fn test_missing_confirmation_template_still_registers() {
    let harness = Harness::new();
    harness.store.remove_template(ACCOUNT_CONFIRMATION).await;

    let user = harness.register("alice", "alice@example.com").await;

    assert!(!user.active);
    assert!(harness.mailer.sent().await.is_empty());
}

#[tokio::test]
async fn test_mail_failure_does_not_fail_registration() {
    let harness = Harness::new();
    harness.mailer.set_failing(true);

    let user = harness.register("alice", "alice@example.com").await;

    assert_eq!(user.username, "alice");
    assert!(harness.users.get_user(user.id).await.is_ok());
}

#[tokio::test]
async fn test_photo_is_stored_with_registration() {
    let harness = Harness::new();
    let mut command = Harness::command("alice", "alice@example.com");
    command.photo = Some(png());

    let user = harness.auth.register(command, &harness.ctx).await.unwrap();

    let paths = harness.files.paths().await;
    assert_eq!(paths.len(), 1);
    assert_eq!(user.photo_path.as_deref(), Some(paths[0].as_str()));
    assert!(paths[0].starts_with("users/") && paths[0].ends_with(".png"));
}

#[tokio::test]
async fn test_photo_is_removed_when_registration_fails() {
    let harness = Harness::new();
    harness.register("alice", "alice@example.com").await;

    let mut command = Harness::command("alice", "other@example.com");
    command.photo = Some(png());
    let result = harness.auth.register(command, &harness.ctx).await;

    assert!(matches!(result, Err(AuthError::DuplicateAccount(_))));
    assert!(harness.files.paths().await.is_empty());
}

// ============================================================================
// Credentials and access tokens
// ============================================================================

#[tokio::test]
async fn test_authenticate_user_outcomes() {
    let harness = Harness::new();
    harness.register_active("alice", "alice@example.com").await;
    harness.register("pending", "pending@example.com").await;

    let auth = &harness.auth;
    assert!(auth.authenticate_user("ghost", TEST_PASSWORD).await.unwrap().is_none());
    assert!(auth.authenticate_user("alice", "wrong-password").await.unwrap().is_none());
    assert!(auth.authenticate_user("pending", TEST_PASSWORD).await.unwrap().is_none());

    let user = auth
        .authenticate_user("alice", TEST_PASSWORD)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.user.username, "alice");
}

#[tokio::test]
async fn test_unknown_username_costs_one_password_check() {
    let harness = Harness::new();
    harness.register_active("alice", "alice@example.com").await;
    let auth = &harness.auth;

    let before = harness.hasher.verifications();
    assert!(auth.authenticate_user("alice", "wrong-password").await.unwrap().is_none());
    assert_eq!(harness.hasher.verifications() - before, 1);

    let before = harness.hasher.verifications();
    assert!(auth.authenticate_user("ghost", TEST_PASSWORD).await.unwrap().is_none());
    assert_eq!(harness.hasher.verifications() - before, 1);

    let before = harness.hasher.verifications();
    assert!(auth.authenticate_user("ghost", TEST_PASSWORD).await.unwrap().is_none());
    assert_eq!(harness.hasher.verifications() - before, 1);
}

#[tokio::test]
async fn test_access_token_round_trip() {
    let harness = Harness::new();
    harness.register_active("alice", "alice@example.com").await;

    let user = harness
        .auth
        .authenticate_user("alice", TEST_PASSWORD)
        .await
        .unwrap()
        .unwrap();
    let token = harness.auth.create_access_token(&user).unwrap();
    let current = harness.auth.get_current_user(&token).await.unwrap();

    assert_eq!(current.user.id, user.user.id);
    assert_eq!(current.roles, user.roles);
}

#[tokio::test]
async fn test_invalid_access_tokens() {
    let harness = Harness::new();
    assert!(matches!(
        harness.auth.get_current_user("not.a.jwt").await,
        Err(AuthError::Unauthorized)
    ));

    harness.register_active("alice", "alice@example.com").await;
    let token = harness.token_for("alice").await;
    harness.clock.advance(Duration::days(29));
    assert!(harness.auth.get_current_user(&token).await.is_ok());

    harness.clock.advance(Duration::days(1));
    assert!(matches!(
        harness.auth.get_current_user(&token).await,
        Err(AuthError::ExpiredToken)
    ));
}

#[tokio::test]
async fn test_token_from_other_secret_is_rejected() {
    let issuer = Harness::with_settings(AuthSettings::new("another-secret"));
    issuer.register_active("alice", "alice@example.com").await;
    let token = issuer.token_for("alice").await;

    let harness = Harness::new();
    harness.register_active("alice", "alice@example.com").await;

    assert!(matches!(
        harness.auth.get_current_user(&token).await,
        Err(AuthError::Unauthorized)
    ));
}

#[tokio::test]
async fn test_permission_guard() {
    let harness = Harness::new();
    harness.register_active("carol", "carol@example.com").await;
    let user_token = harness.token_for("carol").await;
    let admin_token = harness.admin_token().await;

    let guard = has_permission(harness.auth.clone(), "admin");
    assert!(matches!(
        guard.authorize(&user_token).await,
        Err(AuthError::Unauthorized)
    ));
    let admin = guard.authorize(&admin_token).await.unwrap();
    assert_eq!(admin.user.username, "admin_user");

    let base = has_permission(harness.auth.clone(), "base");
    assert!(base.authorize(&user_token).await.is_ok());
}

// ============================================================================
// Password reset
// ============================================================================

#[tokio::test]
async fn test_password_reset_flow() {
    let harness = Harness::new();
    let user = harness.register_active("alice", "alice@example.com").await;

    assert!(
        harness
            .auth
            .send_password_reset_email("alice@example.com", &harness.ctx)
            .await
            .unwrap()
    );
    let token = harness.mailer.last_reset_token().await.unwrap();

    let found = harness.auth.get_user_from_token(&token).await.unwrap().unwrap();
    assert_eq!(found.id, user.id);

    assert!(harness.auth.reset_password(&token, "brand-new-pass").await.unwrap());
    assert!(
        harness
            .auth
            .authenticate_user("alice", "brand-new-pass")
            .await
            .unwrap()
            .is_some()
    );
    assert!(
        harness
            .auth
            .authenticate_user("alice", TEST_PASSWORD)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_reset_token_is_spent_by_use() {
    let harness = Harness::new();
    harness.register_active("alice", "alice@example.com").await;
    harness
        .auth
        .send_password_reset_email("alice@example.com", &harness.ctx)
        .await
        .unwrap();
    let token = harness.mailer.last_reset_token().await.unwrap();

    assert!(harness.auth.reset_password(&token, "brand-new-pass").await.unwrap());
    assert!(matches!(
        harness.auth.reset_password(&token, "someone-else1").await,
        Err(AuthError::InvalidToken)
    ));
    assert!(matches!(
        harness.auth.get_user_from_token(&token).await,
        Err(AuthError::InvalidToken)
    ));

    let auth = &harness.auth;
    assert!(auth.authenticate_user("alice", "someone-else1").await.unwrap().is_none());
    assert!(auth.authenticate_user("alice", "brand-new-pass").await.unwrap().is_some());
}

#[tokio::test]
async fn test_reset_token_for_unknown_user_is_not_found() {
    let harness = Harness::new();
    let mut user = harness.register_active("alice", "alice@example.com").await;
    user.id = 4242;
    let token = harness.auth.password_reset_token(&user).unwrap();

    assert!(harness.auth.get_user_from_token(&token).await.unwrap().is_none());
    assert!(!harness.auth.reset_password(&token, "brand-new-pass").await.unwrap());
}

#[tokio::test]
async fn test_password_reset_unknown_email_sends_nothing() {
    let harness = Harness::new();

    let sent = harness
        .auth
        .send_password_reset_email("nobody@example.com", &harness.ctx)
        .await
        .unwrap();

    assert!(!sent);
    assert!(harness.mailer.sent().await.is_empty());
}

#[tokio::test]
async fn test_password_reset_missing_template_sends_nothing() {
    let harness = Harness::new();
    harness.register_active("alice", "alice@example.com").await;
    harness.store.remove_template(PASSWORD_RESET).await;
    let before = harness.mailer.sent().await.len();

    let sent = harness
        .auth
        .send_password_reset_email("alice@example.com", &harness.ctx)
        .await
        .unwrap();

    assert!(!sent);
    assert_eq!(harness.mailer.sent().await.len(), before);
}

#[tokio::test]
async fn test_password_reset_delivery_failure_is_an_error() {
    let harness = Harness::new();
    harness.register_active("alice", "alice@example.com").await;
    harness.mailer.set_failing(true);

    let result = harness
        .auth
        .send_password_reset_email("alice@example.com", &harness.ctx)
        .await;

    assert!(matches!(result, Err(AuthError::Email(_))));
}

#[tokio::test]
async fn test_reset_tokens_are_purpose_bound_and_expire() {
    let harness = Harness::new();
    let user = harness.register_active("alice", "alice@example.com").await;

    let confirmation = harness.auth.confirmation_codec().encrypt(user.id).unwrap();
    assert!(matches!(
        harness.auth.get_user_from_token(&confirmation).await,
        Err(AuthError::InvalidToken)
    ));

    let reset = harness.auth.password_reset_token(&user).unwrap();
    harness.clock.advance(Duration::hours(2));
    assert!(matches!(
        harness.auth.reset_password(&reset, "brand-new-pass").await,
        Err(AuthError::InvalidToken)
    ));
}

// ============================================================================
// User administration
// ============================================================================

#[tokio::test]
async fn test_update_user_replaces_photo_and_roles() {
    let harness = Harness::new();
    let mut command = Harness::command("alice", "alice@example.com");
    command.photo = Some(png());
    let user = harness.auth.register(command, &harness.ctx).await.unwrap();
    let old_photo = user.photo_path.clone().unwrap();

    let updated = harness
        .users
        .update_user(
            user.id,
            UpdateUserProfile {
                name: "Alicia".into(),
                surname: "Liddell".into(),
                country_id: 1,
                role_ids: Some(vec![ADMIN_ROLE_ID]),
                photo: Some(png()),
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.user.name, "Alicia");
    assert!(updated.has_permission("admin"));

    let paths = harness.files.paths().await;
    assert_eq!(paths.len(), 1);
    assert_ne!(paths[0], old_photo);
    assert_eq!(updated.user.photo_path.as_deref(), Some(paths[0].as_str()));

    let response = harness.users.to_response(&updated);
    assert_eq!(
        response.photo_url,
        Some(format!("http://testserver/uploads/{}", paths[0]))
    );
}

#[tokio::test]
async fn test_update_user_keeps_roles_when_not_given() {
    let harness = Harness::new();
    let user = harness.register_active("alice", "alice@example.com").await;

    let updated = harness
        .users
        .update_user(
            user.id,
            UpdateUserProfile {
                name: "Alicia".into(),
                surname: "Liddell".into(),
                country_id: 1,
                role_ids: None,
                photo: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.roles.len(), 1);
    assert_eq!(updated.roles[0].name, "user");
}

#[tokio::test]
async fn test_rejected_update_stores_nothing() {
    let harness = Harness::new();
    let user = harness.register_active("alice", "alice@example.com").await;

    let result = harness
        .users
        .update_user(
            user.id,
            UpdateUserProfile {
                name: "Alicia".into(),
                surname: "Liddell".into(),
                country_id: 1,
                role_ids: Some(vec![ADMIN_ROLE_ID, 77]),
                photo: Some(png()),
            },
        )
        .await;

    assert!(matches!(result, Err(AuthError::Validation(_))));
    assert!(harness.files.paths().await.is_empty());

    let unchanged = harness.users.get_user(user.id).await.unwrap();
    assert_eq!(unchanged.user.name, "Alice");
}
