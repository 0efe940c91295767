//! Integration tests for route guarding against a live auth context.

mod helpers;

use serde_json::json;

use civic_auth::{AuthEvent, GuardDecision, RouteGuard};
use civic_core::config::AuthConfig;
use civic_entity::profile::Permission;

use helpers::{TestApp, account, session};

#[tokio::test]
async fn test_guard_waits_until_startup_settles() {
    let app = TestApp::new(vec![account("u1", "user", json!(null))]).await;
    let guard = RouteGuard::new(&app.config);

    assert_eq!(
        guard.evaluate(&app.context.snapshot(), "/usuarios"),
        GuardDecision::Wait
    );

    app.context.start().await;
    assert_eq!(
        guard.evaluate(&app.context.snapshot(), "/usuarios"),
        GuardDecision::Redirect {
            to: "/login".to_string(),
            from: "/usuarios".to_string(),
        }
    );
}

#[tokio::test]
async fn test_login_returns_to_preserved_location() {
    let app = TestApp::started(vec![account("u1", "user", json!(["viewUsers"]))]).await;
    let guard = RouteGuard::new(&app.config);

    let from = match guard.evaluate(&app.context.snapshot(), "/usuarios") {
        GuardDecision::Redirect { from, .. } => from,
        other => panic!("expected redirect, got {other:?}"),
    };
    assert_eq!(guard.post_login_target(&app.context.snapshot(), Some(&from)), None);

    let snapshot = app.login_as("u1").await;
    assert_eq!(
        guard.post_login_target(&snapshot, Some(&from)).as_deref(),
        Some("/usuarios")
    );
    assert_eq!(guard.evaluate(&snapshot, &from), GuardDecision::Render);
}

#[tokio::test]
async fn test_guard_waits_while_profile_loads() {
    let app = TestApp::started(vec![account("u1", "user", json!(null))]).await;
    let guard = RouteGuard::new(&app.config);

    app.backend.hold_rows("u1").await;
    app.backend.emit(AuthEvent::signed_in(session("u1")));
    let snapshot = app.wait_for(|s| s.is_loading()).await;
    assert_eq!(guard.evaluate(&snapshot, "/metas"), GuardDecision::Wait);

    app.backend.release_rows("u1").await;
    let snapshot = app.wait_for(|s| s.is_authenticated()).await;
    assert_eq!(guard.evaluate(&snapshot, "/metas"), GuardDecision::Render);
}

#[tokio::test]
async fn test_missing_profile_redirects_to_login() {
    let app = TestApp::started(vec![]).await;
    let guard = RouteGuard::new(&app.config);

    app.backend.emit(AuthEvent::signed_in(session("ghost")));
    let snapshot = app.wait_for(|s| !s.is_loading() && s.session.is_some()).await;
    assert!(matches!(
        guard.evaluate(&snapshot, "/financeiro"),
        GuardDecision::Redirect { .. }
    ));
}

#[tokio::test]
async fn test_user_list_gated_by_permission() {
    let app = TestApp::started(vec![
        account("u1", "user", json!(["viewUsers"])),
        account("m1", "master", json!(null)),
    ])
    .await;
    let guard = RouteGuard::new(&app.config);

    let snapshot = app.login_as("u1").await;
    assert_eq!(
        guard.evaluate_with_permission(&snapshot, "/usuarios", Permission::ViewUsers),
        GuardDecision::Render
    );
    assert_eq!(
        guard.evaluate_with_permission(&snapshot, "/usuarios/novo", Permission::CreateUsers),
        GuardDecision::Forbidden {
            permission: Permission::CreateUsers
        }
    );

    app.context.logout().await;
    let snapshot = app.login_as("m1").await;
    assert_eq!(
        guard.evaluate_with_permission(&snapshot, "/usuarios/novo", Permission::CreateUsers),
        GuardDecision::Render
    );
}

#[tokio::test]
async fn test_custom_paths() {
    let config = AuthConfig {
        login_path: "/entrar".to_string(),
        home_path: "/painel".to_string(),
        ..AuthConfig::default()
    };
    let app = TestApp::with_config(vec![account("u1", "user", json!(null))], config).await;
    app.context.start().await;
    let guard = RouteGuard::new(&app.config);

    assert_eq!(
        guard.evaluate(&app.context.snapshot(), "/metas"),
        GuardDecision::Redirect {
            to: "/entrar".to_string(),
            from: "/metas".to_string(),
        }
    );

    let snapshot = app.login_as("u1").await;
    assert_eq!(
        guard.post_login_target(&snapshot, Some("/entrar")).as_deref(),
        Some("/painel")
    );
}
