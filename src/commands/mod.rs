//! Shell command definitions and dispatch.

pub mod check;
pub mod session;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;
use tracing::info;

use civic_auth::{AuthContext, BackendDispatch, ProfileStore, RouteGuard};
use civic_core::config::AppConfig;
use civic_core::error::AppError;

use crate::output::OutputFormat;

/// Civic dashboard: session and authorization shell
#[derive(Debug, Parser)]
#[command(name = "civic", version, about, long_about = None)]
pub struct Cli {
    /// Directory holding default.toml and environment overlays
    #[arg(short, long, default_value = "config")]
    pub config_dir: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the current session and profile
    Status,
    /// Sign in with email and password
    Login(session::LoginArgs),
    /// Sign out and clear the local session
    Logout,
    /// Check a permission, optionally as a route guard decision
    Check(check::CheckArgs),
}

impl Cli {
    /// Execute the command against a freshly started auth context.
    pub async fn execute(&self, config: AppConfig) -> Result<(), AppError> {
        let shell = Shell::connect(&config).await?;

        let result = match &self.command {
            Commands::Status => session::status(&shell, self.format),
            Commands::Login(args) => session::login(&shell, args, self.format).await,
            Commands::Logout => session::logout(&shell).await,
            Commands::Check(args) => check::execute(&shell, args, self.format),
        };

        shell.shutdown().await;
        result
    }
}

/// Auth context, guard, and token refresher for one invocation.
pub struct Shell {
    /// Started auth context.
    pub context: Arc<AuthContext>,
    /// Route guard using the configured paths.
    pub guard: RouteGuard,
    /// Background token refresh for the REST backend.
    refresher: Option<JoinHandle<()>>,
}

impl Shell {
    /// Build the configured backend and start an auth context on it.
    pub async fn connect(config: &AppConfig) -> Result<Self, AppError> {
        let backend = Arc::new(BackendDispatch::from_config(&config.backend).await?);

        let refresher = match backend.as_ref() {
            BackendDispatch::Rest(rest) => Some(rest.spawn_auto_refresh()),
            BackendDispatch::Memory(_) => None,
        };

        let context = AuthContext::new(
            backend.clone(),
            ProfileStore::new(backend, &config.backend.profiles_table),
            config.auth.clone(),
        );
        context.start().await;
        info!(phase = %context.snapshot().phase, "Auth context ready");

        Ok(Self {
            context,
            guard: RouteGuard::new(&config.auth),
            refresher,
        })
    }

    /// Stop background work.
    pub async fn shutdown(self) {
        if let Some(handle) = self.refresher {
            handle.abort();
        }
        self.context.dispose().await;
    }
}
