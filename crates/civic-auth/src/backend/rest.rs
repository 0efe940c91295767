//! HTTP backend speaking the GoTrue auth and PostgREST data protocols.
//!
//! The client keeps the current session locally (optionally persisted to a
//! JSON file), emits auth events on its own broadcast channel, and can run
//! a background task that refreshes the access token before it expires.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use civic_core::config::BackendConfig;
use civic_core::error::AppError;
use civic_core::types::SubjectId;
use civic_entity::session::Session;

use super::event::AuthEvent;
use super::{AuthBackend, DataBackend, Order, SelectQuery};
use crate::error::AuthError;

/// Media type asking PostgREST for exactly one object (406 when zero rows).
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .or_else(|| {
                self.expires_in
                    .map(|secs| Utc::now() + chrono::Duration::seconds(secs))
            });

        Session {
            subject: SubjectId::new(self.user.id),
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            email: self.user.email,
        }
    }
}

/// GoTrue/PostgREST backend client.
pub struct RestBackend {
    /// Shared HTTP client.
    http: reqwest::Client,
    /// Project base URL.
    base_url: Url,
    /// Public API key.
    api_key: String,
    /// Session held by this client.
    session: RwLock<Option<Session>>,
    /// Auth event stream.
    events: broadcast::Sender<AuthEvent>,
    /// Where the session is persisted, if anywhere.
    session_file: Option<PathBuf>,
    /// Refresh this long before expiry.
    refresh_margin: chrono::Duration,
}

impl std::fmt::Debug for RestBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestBackend")
            .field("base_url", &self.base_url.as_str())
            .field("session_file", &self.session_file)
            .finish()
    }
}

impl RestBackend {
    /// Creates a client from configuration, restoring a persisted session.
    pub async fn new(config: &BackendConfig) -> Result<Self, AppError> {
        let mut base_url = Url::parse(&config.url).map_err(|e| {
            AppError::configuration(format!("Invalid backend url '{}': {e}", config.url))
        })?;
        // Endpoints are joined relative to the base, which needs a trailing slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        if config.api_key.is_empty() {
            return Err(AppError::configuration("backend.api_key must be set"));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build HTTP client: {e}")))?;

        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let session_file = config
            .session_file
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        let restored = match &session_file {
            Some(path) => load_session(path).await,
            None => None,
        };

        if let Some(session) = &restored {
            info!(subject = %session.subject, "Restored persisted session");
        }

        Ok(Self {
            http,
            base_url,
            api_key: config.api_key.clone(),
            session: RwLock::new(restored),
            events,
            session_file,
            refresh_margin: chrono::Duration::seconds(config.refresh_margin_seconds as i64),
        })
    }

    /// Exchanges the refresh token for a new access token.
    ///
    /// Emits `TokenRefreshed` on success. If the backend rejects the refresh
    /// token, the local session is dropped and `SignedOut` is emitted.
    pub async fn refresh_session(&self) -> Result<Session, AuthError> {
        let refresh_token = self
            .session
            .read()
            .await
            .as_ref()
            .and_then(|s| s.refresh_token.clone())
            .ok_or(AuthError::SessionExpired)?;

        let url = self.endpoint("auth/v1/token", &[("grant_type", "refresh_token")])?;
        let response = self
            .http
            .post(url)
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if is_rejection(status) {
            warn!(status = %status, "Refresh token rejected, dropping session");
            self.replace_session(None).await;
            self.emit(AuthEvent::signed_out());
            return Err(AuthError::SessionExpired);
        }
        if !status.is_success() {
            return Err(status_error("token refresh", status));
        }

        let session = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AuthError::BackendUnavailable(format!("Malformed token response: {e}")))?
            .into_session();

        self.replace_session(Some(session.clone())).await;
        debug!(subject = %session.subject, "Access token refreshed");
        self.emit(AuthEvent::token_refreshed(session.clone()));
        Ok(session)
    }

    /// Spawns a task that refreshes the session ahead of expiry.
    ///
    /// The task holds only a weak reference and exits once the client is
    /// dropped; abort the handle to stop it sooner.
    pub fn spawn_auto_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let client = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let Some(this) = client.upgrade() else {
                    break;
                };
                let wait = this.next_refresh_delay().await;
                drop(this);
                tokio::time::sleep(wait).await;

                let Some(this) = client.upgrade() else {
                    break;
                };
                let due = this
                    .session
                    .read()
                    .await
                    .as_ref()
                    .is_some_and(|s| s.refresh_token.is_some() && s.expires_within(this.refresh_margin));
                if !due {
                    continue;
                }

                if let Err(e) = this.refresh_session().await {
                    error!(error = %e, "Automatic token refresh failed");
                    if e == AuthError::SessionExpired {
                        continue;
                    }
                    drop(this);
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
            }
        })
    }

    async fn next_refresh_delay(&self) -> Duration {
        let expires_at = self.session.read().await.as_ref().and_then(|s| s.expires_at);
        match expires_at {
            Some(at) => (at - self.refresh_margin - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .max(Duration::from_secs(1)),
            None => Duration::from_secs(30),
        }
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, AuthError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| AuthError::BackendUnavailable(format!("Invalid endpoint '{path}': {e}")))?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter());
        }
        Ok(url)
    }

    fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }

    async fn replace_session(&self, session: Option<Session>) {
        *self.session.write().await = session.clone();
        if let Some(path) = &self.session_file {
            persist_session(path, session.as_ref()).await;
        }
    }

    async fn bearer(&self) -> String {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.api_key.clone())
    }
}

#[async_trait]
impl AuthBackend for RestBackend {
    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        let session = self.session.read().await.clone();
        match session {
            Some(s) if s.is_expired() && s.refresh_token.is_some() => {
                match self.refresh_session().await {
                    Ok(fresh) => Ok(Some(fresh)),
                    Err(AuthError::SessionExpired) => Ok(None),
                    Err(e) => Err(e),
                }
            }
            Some(s) if s.is_expired() => {
                self.replace_session(None).await;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn sign_in(&self, identifier: &str, secret: &str) -> Result<Session, AuthError> {
        let url = self.endpoint("auth/v1/token", &[("grant_type", "password")])?;
        let response = self
            .http
            .post(url)
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({ "email": identifier, "password": secret }))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if is_rejection(status) {
            info!(status = %status, "Credentials rejected");
            return Err(AuthError::InvalidCredentials);
        }
        if !status.is_success() {
            return Err(status_error("sign-in", status));
        }

        let session = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AuthError::BackendUnavailable(format!("Malformed token response: {e}")))?
            .into_session();

        self.replace_session(Some(session.clone())).await;
        info!(subject = %session.subject, "Signed in");
        self.emit(AuthEvent::signed_in(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let token = self.session.read().await.as_ref().map(|s| s.access_token.clone());

        let outcome = match token {
            None => Ok(()),
            Some(token) => {
                let url = self.endpoint("auth/v1/logout", &[])?;
                match self
                    .http
                    .post(url)
                    .header("apikey", &self.api_key)
                    .bearer_auth(token)
                    .send()
                    .await
                {
                    // An already-invalid token means the session is gone either way.
                    Ok(r)
                        if r.status().is_success()
                            || is_rejection(r.status())
                            || r.status() == StatusCode::NOT_FOUND =>
                    {
                        Ok(())
                    }
                    Ok(r) => Err(AuthError::SignOutFailed(format!("HTTP {}", r.status()))),
                    Err(e) => Err(AuthError::SignOutFailed(e.to_string())),
                }
            }
        };

        self.replace_session(None).await;
        self.emit(AuthEvent::signed_out());
        outcome
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl DataBackend for RestBackend {
    async fn select_one(&self, query: &SelectQuery) -> Result<Option<serde_json::Value>, AuthError> {
        let params = postgrest_params(query);
        let borrowed: Vec<(&str, &str)> = params.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let url = self.endpoint(&format!("rest/v1/{}", query.table), &borrowed)?;

        let response = self
            .http
            .get(url)
            .header("apikey", &self.api_key)
            .header(reqwest::header::ACCEPT, SINGLE_OBJECT)
            .bearer_auth(self.bearer().await)
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::NOT_ACCEPTABLE => Ok(None),
            status if status.is_success() => response
                .json::<serde_json::Value>()
                .await
                .map(Some)
                .map_err(|e| AuthError::BackendUnavailable(format!("Malformed row: {e}"))),
            status => Err(status_error(&format!("select from '{}'", query.table), status)),
        }
    }
}

/// Translates a query into PostgREST query parameters.
fn postgrest_params(query: &SelectQuery) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = query
        .filters
        .iter()
        .map(|(column, value)| (column.clone(), format!("eq.{value}")))
        .collect();

    if let Some((column, order)) = &query.order {
        let dir = match order {
            Order::Asc => "asc",
            Order::Desc => "desc",
        };
        params.push(("order".to_string(), format!("{column}.{dir}")));
    }

    params.push(("select".to_string(), "*".to_string()));
    params
}

/// GoTrue answers bad credentials or revoked tokens with 400/401.
fn is_rejection(status: StatusCode) -> bool {
    status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED
}

fn status_error(operation: &str, status: StatusCode) -> AuthError {
    AuthError::BackendUnavailable(format!("{operation} failed with HTTP {status}"))
}

fn transport_error(err: reqwest::Error) -> AuthError {
    AuthError::BackendUnavailable(format!("Request failed: {err}"))
}

async fn load_session(path: &Path) -> Option<Session> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read session file");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(session) => Some(session),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring corrupt session file");
            None
        }
    }
}

async fn persist_session(path: &Path, session: Option<&Session>) {
    let result = match session {
        Some(session) => match serde_json::to_vec_pretty(session) {
            Ok(bytes) => {
                if let Some(parent) = path.parent() {
                    let _ = tokio::fs::create_dir_all(parent).await;
                }
                tokio::fs::write(path, bytes).await
            }
            Err(e) => {
                error!(error = %e, "Failed to serialize session");
                return;
            }
        },
        None => match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        },
    };

    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "Failed to persist session");
    }
}
