//! Session commands: status, login, logout.

use clap::Args;
use serde::Serialize;

use civic_auth::{AuthPhase, AuthSnapshot, LogoutOutcome};
use civic_core::error::AppError;

use super::Shell;
use crate::output::{self, OutputFormat};

/// Arguments for `login`
#[derive(Debug, Args)]
pub struct LoginArgs {
    /// Email to sign in with
    #[arg(long)]
    pub email: String,

    /// Password (will prompt if not provided)
    #[arg(long)]
    pub password: Option<String>,
}

/// Serializable view of an auth snapshot
#[derive(Debug, Serialize)]
struct StatusView {
    phase: &'static str,
    subject: Option<String>,
    name: Option<String>,
    email: Option<String>,
    role: Option<String>,
    permissions: Vec<String>,
    notice: Option<String>,
}

impl From<&AuthSnapshot> for StatusView {
    fn from(snapshot: &AuthSnapshot) -> Self {
        let user = snapshot.user();
        Self {
            phase: snapshot.phase.name(),
            subject: snapshot.session.as_ref().map(|s| s.subject.to_string()),
            name: user.map(|p| p.name.clone()),
            email: user
                .map(|p| p.email.clone())
                .or_else(|| snapshot.session.as_ref().and_then(|s| s.email.clone())),
            role: user.map(|p| p.role.to_string()),
            permissions: user
                .and_then(|p| p.permissions.as_ref())
                .map(|set| set.iter().map(|p| p.to_string()).collect())
                .unwrap_or_default(),
            notice: snapshot.notice.as_ref().map(|n| n.to_string()),
        }
    }
}

fn print_status(snapshot: &AuthSnapshot, format: OutputFormat) {
    let view = StatusView::from(snapshot);
    match format {
        OutputFormat::Json => output::print_json(&view),
        OutputFormat::Text => {
            output::print_kv("Phase", view.phase);
            if let Some(subject) = &view.subject {
                output::print_kv("Subject", subject);
            }
            if let Some(name) = &view.name {
                output::print_kv("Name", name);
            }
            if let Some(email) = &view.email {
                output::print_kv("Email", email);
            }
            if let Some(role) = &view.role {
                output::print_kv("Role", role);
            }
            if view.role.is_some() {
                output::print_kv("Permissions", &view.permissions.join(", "));
            }
            if let Some(notice) = &view.notice {
                output::print_warning(notice);
            }
        }
    }
}

/// Print the settled state.
pub fn status(shell: &Shell, format: OutputFormat) -> Result<(), AppError> {
    print_status(&shell.context.snapshot(), format);
    Ok(())
}

/// Sign in, then wait for the profile to load.
pub async fn login(shell: &Shell, args: &LoginArgs, format: OutputFormat) -> Result<(), AppError> {
    let password = match &args.password {
        Some(p) => p.clone(),
        None => dialoguer::Password::new()
            .with_prompt("Password")
            .interact()
            .map_err(|e| AppError::internal(format!("Input error: {}", e)))?,
    };

    shell.context.login(&args.email, &password).await?;
    let snapshot = shell.context.wait_until_settled().await;
    print_status(&snapshot, format);

    match snapshot.phase {
        AuthPhase::Authenticated(_) => {
            if format == OutputFormat::Text {
                output::print_success("Signed in");
            }
            Ok(())
        }
        _ => Err(snapshot
            .notice
            .map(AppError::from)
            .unwrap_or_else(|| AppError::session("Sign-in did not produce a profile"))),
    }
}

/// Sign out. Local state is cleared even if the backend call fails.
pub async fn logout(shell: &Shell) -> Result<(), AppError> {
    match shell.context.logout().await {
        LogoutOutcome::Clean => output::print_success("Signed out"),
        LogoutOutcome::LocalOnly(err) => {
            output::print_warning(&format!("Signed out locally; {err}"));
        }
    }
    Ok(())
}
