//! Session/authorization module configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for the auth context and the route guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Upper bound for a single profile lookup, in milliseconds.
    #[serde(default = "default_profile_fetch_timeout")]
    pub profile_fetch_timeout_ms: u64,
    /// How long `login` waits for the backend's sign-in event before the
    /// context loads the profile itself, in milliseconds.
    #[serde(default = "default_login_event_timeout")]
    pub login_event_timeout_ms: u64,
    /// Location of the login entry point.
    #[serde(default = "default_login_path")]
    pub login_path: String,
    /// Where to land after login when no location was preserved.
    #[serde(default = "default_home_path")]
    pub home_path: String,
}

impl AuthConfig {
    /// Profile lookup timeout as a [`Duration`].
    pub fn profile_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.profile_fetch_timeout_ms)
    }

    /// Sign-in event wait as a [`Duration`].
    pub fn login_event_timeout(&self) -> Duration {
        Duration::from_millis(self.login_event_timeout_ms)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            profile_fetch_timeout_ms: default_profile_fetch_timeout(),
            login_event_timeout_ms: default_login_event_timeout(),
            login_path: default_login_path(),
            home_path: default_home_path(),
        }
    }
}

fn default_profile_fetch_timeout() -> u64 {
    10_000
}

fn default_login_event_timeout() -> u64 {
    5_000
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_home_path() -> String {
    "/".to_string()
}
