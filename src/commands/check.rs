//! Authorization check command.

use clap::Args;
use serde::Serialize;

use civic_auth::GuardDecision;
use civic_core::error::AppError;
use civic_entity::profile::Permission;

use super::Shell;
use crate::output::{self, OutputFormat};

/// Arguments for `check`
#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Permission literal, e.g. viewUsers
    #[arg(long)]
    pub permission: Permission,

    /// Evaluate the route guard for this location as well
    #[arg(long)]
    pub route: Option<String>,
}

#[derive(Debug, Serialize)]
struct CheckView {
    permission: Permission,
    allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    route: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    decision: Option<String>,
}

fn describe(decision: &GuardDecision) -> String {
    match decision {
        GuardDecision::Wait => "wait".to_string(),
        GuardDecision::Render => "render".to_string(),
        GuardDecision::Redirect { to, from } => format!("redirect to {to} (from {from})"),
        GuardDecision::Forbidden { permission } => format!("forbidden (missing {permission})"),
    }
}

/// Report whether the current user holds a permission. Fails when denied.
pub fn execute(shell: &Shell, args: &CheckArgs, format: OutputFormat) -> Result<(), AppError> {
    let snapshot = shell.context.snapshot();
    let allowed = snapshot.has_permission(args.permission);
    let decision = args.route.as_deref().map(|route| {
        shell
            .guard
            .evaluate_with_permission(&snapshot, route, args.permission)
    });

    let view = CheckView {
        permission: args.permission,
        allowed,
        route: args.route.clone(),
        decision: decision.as_ref().map(describe),
    };

    match format {
        OutputFormat::Json => output::print_json(&view),
        OutputFormat::Text => {
            output::print_kv("Permission", args.permission.as_str());
            output::print_kv("Allowed", if allowed { "yes" } else { "no" });
            if let (Some(route), Some(decision)) = (&view.route, &view.decision) {
                output::print_kv("Route", route);
                output::print_kv("Decision", decision);
            }
        }
    }

    shell.context.require_permission(args.permission)
}
