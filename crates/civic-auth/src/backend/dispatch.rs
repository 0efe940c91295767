//! Backend selection by configuration.

#[cfg(feature = "rest")]
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::info;

use civic_core::config::{BackendConfig, BackendKind};
use civic_core::error::AppError;
use civic_entity::session::Session;

use super::event::AuthEvent;
use super::memory::MemoryBackend;
#[cfg(feature = "rest")]
use super::rest::RestBackend;
use super::{AuthBackend, DataBackend, SelectQuery};
use crate::error::AuthError;

/// Dispatcher over the available backend clients.
///
/// Switches between the in-process and HTTP backends based on
/// `backend.kind`.
#[derive(Debug, Clone)]
pub enum BackendDispatch {
    /// In-process backend (local runs, tests).
    Memory(MemoryBackend),
    /// GoTrue/PostgREST backend.
    #[cfg(feature = "rest")]
    Rest(Arc<RestBackend>),
}

impl BackendDispatch {
    /// Builds the configured backend.
    ///
    /// The memory backend is seeded from `backend.seed_file` when set.
    pub async fn from_config(config: &BackendConfig) -> Result<Self, AppError> {
        match config.kind {
            BackendKind::Memory => {
                let backend = MemoryBackend::new(config.event_buffer)
                    .with_profiles_table(&config.profiles_table);
                if let Some(path) = config.seed_file.as_deref().filter(|p| !p.is_empty()) {
                    backend.seed_from_file(path).await?;
                }
                info!("Using in-memory backend");
                Ok(Self::Memory(backend))
            }
            #[cfg(feature = "rest")]
            BackendKind::Rest => {
                let backend = RestBackend::new(config).await?;
                info!(url = %config.url, "Using REST backend");
                Ok(Self::Rest(Arc::new(backend)))
            }
            #[cfg(not(feature = "rest"))]
            BackendKind::Rest => Err(AppError::configuration(
                "REST backend requested but the 'rest' feature is disabled",
            )),
        }
    }
}

#[async_trait]
impl AuthBackend for BackendDispatch {
    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        match self {
            Self::Memory(inner) => inner.current_session().await,
            #[cfg(feature = "rest")]
            Self::Rest(inner) => inner.current_session().await,
        }
    }

    async fn sign_in(&self, identifier: &str, secret: &str) -> Result<Session, AuthError> {
        match self {
            Self::Memory(inner) => inner.sign_in(identifier, secret).await,
            #[cfg(feature = "rest")]
            Self::Rest(inner) => inner.sign_in(identifier, secret).await,
        }
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        match self {
            Self::Memory(inner) => inner.sign_out().await,
            #[cfg(feature = "rest")]
            Self::Rest(inner) => inner.sign_out().await,
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        match self {
            Self::Memory(inner) => inner.subscribe(),
            #[cfg(feature = "rest")]
            Self::Rest(inner) => inner.subscribe(),
        }
    }
}

#[async_trait]
impl DataBackend for BackendDispatch {
    async fn select_one(&self, query: &SelectQuery) -> Result<Option<serde_json::Value>, AuthError> {
        match self {
            Self::Memory(inner) => inner.select_one(query).await,
            #[cfg(feature = "rest")]
            Self::Rest(inner) => inner.select_one(query).await,
        }
    }
}
