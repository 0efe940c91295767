//! Integration tests for the REST backend against a fake GoTrue/PostgREST server.

mod helpers;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use civic_auth::backend::SelectQuery;
use civic_auth::{
    AuthBackend, AuthContext, AuthError, AuthEventKind, DataBackend, LogoutOutcome, ProfileStore,
    RestBackend,
};
use civic_core::config::{AuthConfig, BackendConfig, BackendKind};
use civic_entity::profile::Permission;

use helpers::{PASSWORD, account, email};

const API_KEY: &str = "anon-test-key";
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

/// In-process stand-in for the hosted backend.
#[derive(Default)]
struct FakeServer {
    rows: Vec<Value>,
    logout_fails: AtomicBool,
    refreshes: AtomicUsize,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn token_body(id: &str, access: &str, refresh: &str) -> Response {
    Json(json!({
        "access_token": access,
        "token_type": "bearer",
        "expires_in": 3600,
        "refresh_token": refresh,
        "user": { "id": id, "email": email(id) },
    }))
    .into_response()
}

async fn token(
    State(server): State<Arc<FakeServer>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if header(&headers, "apikey") != Some(API_KEY) {
        return StatusCode::FORBIDDEN.into_response();
    }

    match params.get("grant_type").map(String::as_str) {
        Some("password") => {
            let row = server.rows.iter().find(|row| {
                row["email"].as_str() == body["email"].as_str()
                    && body["password"].as_str() == Some(PASSWORD)
            });
            match row.and_then(|row| row["id"].as_str()) {
                Some(id) => token_body(id, &format!("access-{id}"), &format!("refresh-{id}")),
                None => (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "invalid_grant" })),
                )
                    .into_response(),
            }
        }
        Some("refresh_token") => match body["refresh_token"].as_str() {
            Some(refresh) if refresh.starts_with("refresh-") => {
                let id = refresh.trim_start_matches("refresh-");
                let n = server.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
                token_body(id, &format!("access-{id}-{n}"), refresh)
            }
            _ => StatusCode::UNAUTHORIZED.into_response(),
        },
        _ => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn logout(State(server): State<Arc<FakeServer>>, headers: HeaderMap) -> StatusCode {
    if header(&headers, "authorization").is_none_or(|v| !v.starts_with("Bearer ")) {
        return StatusCode::UNAUTHORIZED;
    }
    if server.logout_fails.load(Ordering::SeqCst) {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::NO_CONTENT
    }
}

async fn profiles(
    State(server): State<Arc<FakeServer>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if header(&headers, "apikey") != Some(API_KEY) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let select = params.get("select").map(String::as_str);
    if header(&headers, "accept") != Some(SINGLE_OBJECT) || select != Some("*") {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let id = params.get("id").and_then(|v| v.strip_prefix("eq."));
    match server.rows.iter().find(|row| row["id"].as_str() == id) {
        Some(row) => Json(row.clone()).into_response(),
        None => StatusCode::NOT_ACCEPTABLE.into_response(),
    }
}

async fn spawn_server(server: Arc<FakeServer>) -> String {
    let app = Router::new()
        .route("/auth/v1/token", post(token))
        .route("/auth/v1/logout", post(logout))
        .route("/rest/v1/profiles", get(profiles))
        .with_state(server);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn fake_server() -> Arc<FakeServer> {
    Arc::new(FakeServer {
        rows: vec![
            account("u1", "user", json!(["viewUsers"])).profile,
            account("m1", "master", json!(null)).profile,
        ],
        ..FakeServer::default()
    })
}

fn backend_config(url: &str) -> BackendConfig {
    BackendConfig {
        kind: BackendKind::Rest,
        url: url.to_string(),
        api_key: API_KEY.to_string(),
        ..BackendConfig::default()
    }
}

fn temp_session_file(name: &str) -> String {
    std::env::temp_dir()
        .join(format!("civic-{name}-{}.json", std::process::id()))
        .to_string_lossy()
        .into_owned()
}

#[tokio::test]
async fn test_sign_in_and_profile_lookup() {
    let url = spawn_server(fake_server()).await;
    let backend = RestBackend::new(&backend_config(&url)).await.unwrap();
    let mut events = backend.subscribe();

    let session = backend.sign_in(&email("u1"), PASSWORD).await.unwrap();
    assert_eq!(session.subject.as_str(), "u1");
    assert_eq!(session.refresh_token.as_deref(), Some("refresh-u1"));
    assert!(session.expires_at.is_some());

    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, AuthEventKind::SignedIn);
    assert_eq!(backend.current_session().await.unwrap(), Some(session));

    let row = backend
        .select_one(&SelectQuery::table("profiles").eq("id", "u1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row["role"], "user");

    let missing = backend
        .select_one(&SelectQuery::table("profiles").eq("id", "nobody"))
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_rejected_credentials() {
    let url = spawn_server(fake_server()).await;
    let backend = RestBackend::new(&backend_config(&url)).await.unwrap();

    let err = backend.sign_in(&email("u1"), "wrong").await.unwrap_err();
    assert_eq!(err, AuthError::InvalidCredentials);
    assert!(backend.current_session().await.unwrap().is_none());
}

#[tokio::test]
async fn test_unreachable_backend() {
    let backend = RestBackend::new(&backend_config("http://127.0.0.1:9")).await.unwrap();
    let err = backend.sign_in(&email("u1"), PASSWORD).await.unwrap_err();
    assert!(matches!(err, AuthError::BackendUnavailable(_)));
}

#[tokio::test]
async fn test_sign_out_failure_still_clears_session() {
    let server = fake_server();
    server.logout_fails.store(true, Ordering::SeqCst);
    let url = spawn_server(server).await;
    let backend = RestBackend::new(&backend_config(&url)).await.unwrap();

    backend.sign_in(&email("u1"), PASSWORD).await.unwrap();
    let mut events = backend.subscribe();

    let err = backend.sign_out().await.unwrap_err();
    assert!(matches!(err, AuthError::SignOutFailed(_)));
    assert!(backend.current_session().await.unwrap().is_none());
    assert_eq!(events.recv().await.unwrap().kind, AuthEventKind::SignedOut);
}

#[tokio::test]
async fn test_refresh_emits_token_refreshed() {
    let server = fake_server();
    let url = spawn_server(server.clone()).await;
    let backend = RestBackend::new(&backend_config(&url)).await.unwrap();

    backend.sign_in(&email("u1"), PASSWORD).await.unwrap();
    let mut events = backend.subscribe();

    let refreshed = backend.refresh_session().await.unwrap();
    assert_eq!(refreshed.access_token, "access-u1-1");
    assert_eq!(server.refreshes.load(Ordering::SeqCst), 1);

    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, AuthEventKind::TokenRefreshed);
    assert_eq!(event.session.map(|s| s.access_token).as_deref(), Some("access-u1-1"));
}

#[tokio::test]
async fn test_auto_refresh_renews_token_ahead_of_expiry() {
    let server = fake_server();
    let url = spawn_server(server.clone()).await;
    // Tokens live for an hour; a 3599s margin makes the first one due after a second.
    let config = BackendConfig {
        refresh_margin_seconds: 3_599,
        ..backend_config(&url)
    };
    let backend = Arc::new(RestBackend::new(&config).await.unwrap());
    backend.sign_in(&email("u1"), PASSWORD).await.unwrap();
    let mut events = backend.subscribe();

    let refresher = backend.spawn_auto_refresh();
    let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("No automatic refresh")
        .unwrap();
    refresher.abort();

    assert_eq!(event.kind, AuthEventKind::TokenRefreshed);
    let refreshed = event.session.unwrap();
    assert_eq!(refreshed.subject.as_str(), "u1");
    assert!(refreshed.access_token.starts_with("access-u1-"));
    assert!(server.refreshes.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_auto_refresh_idles_without_session() {
    let server = fake_server();
    let url = spawn_server(server.clone()).await;
    let config = BackendConfig {
        refresh_margin_seconds: 3_599,
        ..backend_config(&url)
    };
    let backend = Arc::new(RestBackend::new(&config).await.unwrap());

    let refresher = backend.spawn_auto_refresh();
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    refresher.abort();

    assert_eq!(server.refreshes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_session_survives_restart_through_session_file() {
    let url = spawn_server(fake_server()).await;
    let config = BackendConfig {
        session_file: Some(temp_session_file("restart")),
        ..backend_config(&url)
    };

    let first = RestBackend::new(&config).await.unwrap();
    first.sign_in(&email("u1"), PASSWORD).await.unwrap();

    let second = RestBackend::new(&config).await.unwrap();
    let restored = second.current_session().await.unwrap().unwrap();
    assert_eq!(restored.subject.as_str(), "u1");

    second.sign_out().await.unwrap();
    let third = RestBackend::new(&config).await.unwrap();
    assert!(third.current_session().await.unwrap().is_none());
}

#[tokio::test]
async fn test_auth_context_over_rest_backend() {
    let url = spawn_server(fake_server()).await;
    let backend = Arc::new(RestBackend::new(&backend_config(&url)).await.unwrap());
    let context = AuthContext::new(
        backend.clone(),
        ProfileStore::new(backend, "profiles"),
        AuthConfig::default(),
    );
    context.start().await;
    assert!(!context.is_authenticated());

    context.login(&email("u1"), PASSWORD).await.unwrap();
    let snapshot = context.wait_until_settled().await;
    assert!(snapshot.is_authenticated());
    assert!(context.has_permission(Permission::ViewUsers));
    assert!(!context.has_permission(Permission::EditUsers));

    assert_eq!(context.logout().await, LogoutOutcome::Clean);
    assert!(context.user().is_none());
    context.dispose().await;
}
