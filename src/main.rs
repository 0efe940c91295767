//! Civic dashboard shell.
//!
//! Drives the session/authorization module from a terminal: inspect the
//! current session, sign in and out, and evaluate permission and route
//! checks against the loaded profile.

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

use civic_core::config::AppConfig;
use civic_core::error::AppError;

mod commands;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_configuration(&cli.config_dir) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = cli.execute(config).await {
        output::print_error(&e.to_string());
        std::process::exit(1);
    }
}

/// Load configuration from `{dir}/default.toml`, the `CIVIC_ENV` overlay, and
/// `CIVIC__*` variables.
fn load_configuration(dir: &str) -> Result<AppConfig, AppError> {
    let env = std::env::var("CIVIC_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load_from(dir, &env)
}

/// Initialize tracing/logging. Logs go to stderr so command output stays
/// machine-readable.
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_writer(std::io::stderr)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}
