//! Backend-as-a-service connection configuration.

use serde::{Deserialize, Serialize};

/// Which backend client implementation to construct.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// In-process backend seeded from configuration (local runs, tests).
    #[default]
    Memory,
    /// GoTrue/PostgREST-compatible HTTP backend.
    Rest,
}

/// Backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend implementation.
    #[serde(default)]
    pub kind: BackendKind,
    /// Base URL of the hosted project, e.g. `https://xyz.supabase.co`.
    #[serde(default)]
    pub url: String,
    /// Public API key sent with every request.
    #[serde(default)]
    pub api_key: String,
    /// Table holding user profiles.
    #[serde(default = "default_profiles_table")]
    pub profiles_table: String,
    /// HTTP request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Where to persist the current session between runs (optional).
    #[serde(default)]
    pub session_file: Option<String>,
    /// Refresh the access token this many seconds before it expires.
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_seconds: u64,
    /// JSON file of seed accounts for the memory backend (optional).
    #[serde(default)]
    pub seed_file: Option<String>,
    /// Capacity of the auth event broadcast channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            url: String::new(),
            api_key: String::new(),
            profiles_table: default_profiles_table(),
            request_timeout_seconds: default_request_timeout(),
            session_file: None,
            refresh_margin_seconds: default_refresh_margin(),
            seed_file: None,
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_profiles_table() -> String {
    "profiles".to_string()
}

fn default_request_timeout() -> u64 {
    15
}

fn default_refresh_margin() -> u64 {
    60
}

fn default_event_buffer() -> usize {
    64
}
