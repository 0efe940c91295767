//! Integration tests for the auth context state machine.

mod helpers;

use std::time::Duration;

use serde_json::json;

use civic_auth::backend::SelectQuery;
use civic_auth::{AuthError, AuthEvent, AuthEventKind, AuthPhase, AuthSnapshot, LogoutOutcome};
use civic_core::config::AuthConfig;
use civic_core::error::ErrorKind;
use civic_core::types::SubjectId;
use civic_entity::profile::{Permission, UserRole};

use helpers::{TestApp, account, session, user_id};

fn short_timeouts() -> AuthConfig {
    AuthConfig {
        profile_fetch_timeout_ms: 1_000,
        login_event_timeout_ms: 200,
        ..AuthConfig::default()
    }
}

fn assert_consistent(snapshot: &AuthSnapshot) {
    assert_eq!(snapshot.is_authenticated(), snapshot.user().is_some());
    if snapshot.user().is_none() {
        for permission in Permission::ALL {
            assert!(!snapshot.has_permission(permission));
        }
        assert!(!snapshot.has_role(&UserRole::ALL));
    }
}

#[tokio::test]
async fn test_startup_restores_existing_session() {
    let app = TestApp::new(vec![account("u1", "user", json!(["viewUsers"]))]).await;
    app.backend.set_session(Some(session("u1"))).await;

    assert!(app.context.is_loading());
    app.context.start().await;

    assert!(app.context.is_authenticated());
    assert!(!app.context.is_loading());
    assert_eq!(app.context.user().map(|p| p.id.to_string()), Some("u1".to_string()));
    assert!(app.context.has_permission(Permission::ViewUsers));
    assert!(!app.context.has_permission(Permission::EditUsers));
}

#[tokio::test]
async fn test_startup_restores_session_for_every_stored_role() {
    for role in ["master", "prefeito", "secretario", "admin", "user"] {
        let app = TestApp::new(vec![account("u1", role, json!(["viewReports"]))]).await;
        app.backend.set_session(Some(session("u1"))).await;
        app.context.start().await;

        let snapshot = app.context.snapshot();
        assert!(snapshot.is_authenticated(), "role {role}: {:?}", snapshot.notice);
        assert_eq!(snapshot.user().map(|p| p.role.as_str()), Some(role));
        assert!(app.context.has_permission(Permission::ViewReports));
    }
}

#[tokio::test]
async fn test_startup_without_session() {
    let app = TestApp::started(vec![account("u1", "user", json!(null))]).await;
    let snapshot = app.context.snapshot();
    assert_eq!(snapshot.phase, AuthPhase::Unauthenticated);
    assert!(snapshot.session.is_none());
    assert!(snapshot.notice.is_none());
}

#[tokio::test]
async fn test_startup_with_missing_profile_fails_load() {
    let app = TestApp::new(vec![]).await;
    app.backend.set_session(Some(session("orphan"))).await;
    app.context.start().await;

    let snapshot = app.context.snapshot();
    assert_eq!(snapshot.phase, AuthPhase::ProfileLoadFailed);
    assert_eq!(
        snapshot.notice,
        Some(AuthError::ProfileNotFound(SubjectId::new("orphan")))
    );
    assert!(!app.context.is_authenticated());
    assert!(app.context.session().is_some());
}

#[tokio::test]
async fn test_non_super_user_permissions() {
    let app = TestApp::started(vec![account("u1", "user", json!(["viewUsers"]))]).await;
    app.login_as("u1").await;

    assert!(app.context.has_permission(Permission::ViewUsers));
    assert!(!app.context.has_permission(Permission::DeleteUsers));
    assert!(app.context.has_role(&[UserRole::User]));
    assert!(!app.context.has_role(&[UserRole::Admin, UserRole::Secretario]));
    assert!(app.context.require_permission(Permission::ViewUsers).is_ok());

    let err = app
        .context
        .require_permission(Permission::DeleteUsers)
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Authorization);
}

#[tokio::test]
async fn test_super_role_passes_every_check() {
    let app = TestApp::started(vec![account("m1", "master", json!(null))]).await;
    app.login_as("m1").await;

    for permission in Permission::ALL {
        assert!(app.context.has_permission(permission));
    }
    assert!(app.context.has_role(&[UserRole::User]));
    assert!(app.context.has_role(&[]));
    assert!(app.context.require_role(&[UserRole::Admin]).is_ok());
}

#[tokio::test]
async fn test_checks_are_false_without_user() {
    let app = TestApp::started(vec![]).await;
    for permission in Permission::ALL {
        assert!(!app.context.has_permission(permission));
    }
    assert!(!app.context.has_role(&UserRole::ALL));
    assert!(app.context.require_role(&[UserRole::User]).is_err());
}

#[tokio::test]
async fn test_latest_sign_in_wins_when_earlier_lookup_finishes_last() {
    let app = TestApp::started(vec![
        account("a", "admin", json!(["viewUsers"])),
        account("b", "user", json!(["viewGoals"])),
    ])
    .await;

    app.backend.hold_rows("a").await;
    app.backend.emit(AuthEvent::signed_in(session("a")));
    app.wait_for(|s| s.session.as_ref().is_some_and(|s| s.subject.as_str() == "a"))
        .await;

    app.backend.emit(AuthEvent::signed_in(session("b")));
    let snapshot = app.wait_for(|s| s.is_authenticated()).await;
    assert_eq!(user_id(&snapshot).as_deref(), Some("b"));

    app.backend.release_rows("a").await;
    app.wait_for_reads("a", 1).await;

    let snapshot = app.context.snapshot();
    assert_eq!(user_id(&snapshot).as_deref(), Some("b"));
    assert_eq!(snapshot.session.map(|s| s.subject.to_string()).as_deref(), Some("b"));
    assert!(app.context.has_permission(Permission::ViewGoals));
    assert!(!app.context.has_permission(Permission::ViewUsers));
}

#[tokio::test]
async fn test_sign_out_overtakes_pending_lookup() {
    let app = TestApp::started(vec![account("a", "admin", json!(null))]).await;

    app.backend.hold_rows("a").await;
    app.backend.emit(AuthEvent::signed_in(session("a")));
    app.wait_for(|s| s.phase == AuthPhase::Authenticating).await;

    app.backend.emit(AuthEvent::signed_out());
    app.wait_for(|s| s.phase == AuthPhase::Unauthenticated).await;

    app.backend.release_rows("a").await;
    app.wait_for_reads("a", 1).await;
    assert_eq!(app.context.snapshot().phase, AuthPhase::Unauthenticated);
}

#[tokio::test]
async fn test_is_authenticated_iff_user_for_event_sequence() {
    let app = TestApp::started(vec![
        account("a", "admin", json!(["viewUsers"])),
        account("b", "user", json!(null)),
    ])
    .await;

    let mut rx = app.context.subscribe();
    let observer = tokio::spawn(async move {
        let mut seen = vec![rx.borrow_and_update().clone()];
        while rx.changed().await.is_ok() {
            seen.push(rx.borrow_and_update().clone());
        }
        seen
    });

    app.backend.emit(AuthEvent::signed_in(session("a")));
    app.backend.emit(AuthEvent::signed_in(session("ghost")));
    app.backend.emit(AuthEvent::signed_in(session("b")));
    app.wait_for(|s| user_id(s).as_deref() == Some("b")).await;
    app.backend.emit(AuthEvent::token_refreshed(session("b")));
    app.backend.emit(AuthEvent::signed_out());
    app.wait_for(|s| s.phase == AuthPhase::Unauthenticated).await;
    app.backend.emit(AuthEvent::signed_in(session("a")));
    app.wait_for(|s| user_id(s).as_deref() == Some("a")).await;
    app.context.logout().await;

    app.context.dispose().await;
    drop(app);

    let seen = observer.await.unwrap();
    assert!(seen.len() > 3);
    for snapshot in &seen {
        assert_consistent(snapshot);
    }
}

#[tokio::test]
async fn test_logout_clears_state() {
    let app = TestApp::started(vec![account("u1", "user", json!(null))]).await;
    app.login_as("u1").await;

    assert_eq!(app.context.logout().await, LogoutOutcome::Clean);
    let snapshot = app.context.snapshot();
    assert_eq!(snapshot.phase, AuthPhase::Unauthenticated);
    assert!(snapshot.user().is_none());
    assert!(snapshot.session.is_none());
}

#[tokio::test]
async fn test_logout_clears_state_when_backend_fails() {
    let app = TestApp::started(vec![account("u1", "user", json!(null))]).await;
    app.login_as("u1").await;

    app.backend.set_fail_sign_out(true).await;
    let outcome = app.context.logout().await;
    assert!(matches!(
        outcome,
        LogoutOutcome::LocalOnly(AuthError::SignOutFailed(_))
    ));
    assert!(!outcome.is_clean());
    assert!(!app.context.is_authenticated());
    assert!(app.context.user().is_none());
    assert!(app.context.session().is_none());
}

#[tokio::test]
async fn test_logout_clears_state_when_backend_unreachable() {
    let app = TestApp::started(vec![account("u1", "user", json!(null))]).await;
    app.login_as("u1").await;

    app.backend.set_unavailable(true).await;
    let outcome = app.context.logout().await;
    assert!(matches!(
        outcome,
        LogoutOutcome::LocalOnly(AuthError::SignOutFailed(_))
    ));
    assert_eq!(app.context.snapshot().phase, AuthPhase::Unauthenticated);
}

#[tokio::test]
async fn test_failed_login_keeps_existing_session() {
    let app = TestApp::started(vec![
        account("a", "admin", json!(null)),
        account("b", "user", json!(null)),
    ])
    .await;
    app.login_as("a").await;

    let err = app
        .context
        .login(&helpers::email("b"), "wrong")
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::InvalidCredentials);

    let snapshot = app.context.snapshot();
    assert_eq!(user_id(&snapshot).as_deref(), Some("a"));
    assert_eq!(snapshot.notice, Some(AuthError::InvalidCredentials));
}

#[tokio::test]
async fn test_rejected_login_during_startup_keeps_backend_session() {
    let app = TestApp::new(vec![
        account("u1", "prefeito", json!(["viewUsers"])),
        account("u2", "user", json!(null)),
    ])
    .await;
    app.backend.set_session(Some(session("u1"))).await;
    app.backend.hold_rows("u1").await;

    let context = app.context.clone();
    let starting = tokio::spawn(async move { context.start().await });
    app.wait_for(|s| s.phase == AuthPhase::Authenticating).await;

    let err = app
        .context
        .login(&helpers::email("u2"), "wrong")
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::InvalidCredentials);

    let snapshot = app.context.snapshot();
    assert!(snapshot.is_loading());
    assert_eq!(snapshot.session.map(|s| s.subject.to_string()).as_deref(), Some("u1"));
    assert_eq!(snapshot.notice, Some(AuthError::InvalidCredentials));

    app.backend.release_rows("u1").await;
    starting.await.unwrap();
    let snapshot = app.wait_for(|s| !s.is_loading()).await;
    assert_eq!(user_id(&snapshot).as_deref(), Some("u1"));
    assert!(app.context.has_permission(Permission::ViewUsers));
}

#[tokio::test]
async fn test_lagged_listener_resyncs_from_backend_session() {
    let app = TestApp::with_event_buffer(vec![account("b", "secretario", json!(null))], 1).await;
    app.context.start().await;
    app.backend.set_session(Some(session("b"))).await;

    // Sent back to back, these overflow the one-slot buffer before the
    // listener runs; only the last survives and it carries no session.
    app.backend.emit(AuthEvent::signed_in(session("ghost-1")));
    app.backend.emit(AuthEvent::signed_in(session("ghost-2")));
    app.backend.emit(AuthEvent::new(AuthEventKind::UserUpdated, None));

    let snapshot = app.wait_for(|s| s.is_authenticated()).await;
    assert_eq!(user_id(&snapshot).as_deref(), Some("b"));
    assert_eq!(app.backend.reads("ghost-1").await, 0);
    assert_eq!(app.backend.reads("ghost-2").await, 0);
}

#[tokio::test]
async fn test_lagged_listener_without_session_clears_notice() {
    let app = TestApp::with_event_buffer(vec![account("u1", "user", json!(null))], 1).await;
    app.context.start().await;

    app.context
        .login(&helpers::email("u1"), "wrong")
        .await
        .unwrap_err();
    assert_eq!(app.context.snapshot().notice, Some(AuthError::InvalidCredentials));

    app.backend.emit(AuthEvent::signed_in(session("ghost-1")));
    app.backend.emit(AuthEvent::signed_in(session("ghost-2")));
    app.backend.emit(AuthEvent::new(AuthEventKind::UserUpdated, None));

    let snapshot = app.wait_for(|s| s.notice.is_none()).await;
    assert_eq!(snapshot.phase, AuthPhase::Unauthenticated);
    assert!(snapshot.session.is_none());
    assert_eq!(app.backend.reads("ghost-1").await, 0);
}

#[tokio::test]
async fn test_login_with_backend_down() {
    let app = TestApp::started(vec![account("u1", "user", json!(null))]).await;
    app.backend.set_unavailable(true).await;

    let err = app
        .context
        .login(&helpers::email("u1"), helpers::PASSWORD)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::BackendUnavailable(_)));
    assert!(err.is_retryable());
    assert_eq!(app.context.snapshot().phase, AuthPhase::Unauthenticated);
}

#[tokio::test(start_paused = true)]
async fn test_login_loads_profile_when_event_never_arrives() {
    let app = TestApp::with_config(vec![account("u1", "user", json!(null))], short_timeouts()).await;
    app.context.start().await;
    app.backend.set_suppress_events(true).await;

    app.context
        .login(&helpers::email("u1"), helpers::PASSWORD)
        .await
        .unwrap();
    assert!(app.context.is_loading());

    let snapshot = app.settled().await;
    assert!(snapshot.is_authenticated());
    assert_eq!(user_id(&snapshot).as_deref(), Some("u1"));
}

#[tokio::test(start_paused = true)]
async fn test_slow_profile_lookup_times_out() {
    let app = TestApp::with_config(vec![account("u1", "user", json!(null))], short_timeouts()).await;
    app.backend.set_session(Some(session("u1"))).await;
    app.backend.hold_rows("u1").await;

    app.context.start().await;

    let snapshot = app.context.snapshot();
    assert_eq!(snapshot.phase, AuthPhase::ProfileLoadFailed);
    assert!(matches!(snapshot.notice, Some(AuthError::BackendUnavailable(_))));
    assert!(!snapshot.is_loading());
}

#[tokio::test]
async fn test_user_updated_refetches_profile() {
    let app = TestApp::started(vec![account("u1", "user", json!(["viewUsers"]))]).await;
    app.login_as("u1").await;
    assert!(!app.context.has_permission(Permission::EditUsers));

    app.backend
        .delete_rows(&SelectQuery::table("profiles").eq("id", "u1"))
        .await;
    app.backend
        .insert_row("profiles", account("u1", "user", json!(["viewUsers", "editUsers"])).profile)
        .await;
    app.backend.emit(AuthEvent::user_updated(session("u1")));

    app.wait_for(|s| s.has_permission(Permission::EditUsers)).await;
    assert!(app.context.is_authenticated());
}

#[tokio::test]
async fn test_refresh_profile_picks_up_role_change() {
    let app = TestApp::started(vec![account("u1", "user", json!(null))]).await;
    app.login_as("u1").await;

    app.backend
        .delete_rows(&SelectQuery::table("profiles").eq("id", "u1"))
        .await;
    app.backend
        .insert_row("profiles", account("u1", "prefeito", json!(null)).profile)
        .await;

    let snapshot = app.context.refresh_profile().await;
    assert_eq!(snapshot.user().map(|p| p.role), Some(UserRole::Prefeito));
}

#[tokio::test]
async fn test_token_refresh_for_other_subject_loads_profile() {
    let app = TestApp::started(vec![
        account("a", "admin", json!(null)),
        account("b", "user", json!(null)),
    ])
    .await;
    app.login_as("a").await;

    app.backend.emit(AuthEvent::token_refreshed(session("b")));
    let snapshot = app.wait_for(|s| user_id(s).as_deref() == Some("b")).await;
    assert!(snapshot.has_role(&[UserRole::User]));
}

#[tokio::test]
async fn test_dispose_discards_in_flight_lookup() {
    let app = TestApp::started(vec![account("u1", "user", json!(null))]).await;

    app.backend.hold_rows("u1").await;
    app.backend.emit(AuthEvent::signed_in(session("u1")));
    app.wait_for(|s| s.phase == AuthPhase::Authenticating).await;

    app.context.dispose().await;
    app.backend.release_rows("u1").await;
    app.wait_for_reads("u1", 1).await;

    assert!(!app.context.is_authenticated());

    app.backend.emit(AuthEvent::signed_out());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(app.context.snapshot().phase, AuthPhase::Authenticating);
}
