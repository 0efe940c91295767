//! Route guard decisions.

use civic_core::config::AuthConfig;
use civic_entity::profile::Permission;

use crate::context::AuthSnapshot;

/// What to do with a request for a protected location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Auth is still resolving; show a loading indicator and do not navigate.
    Wait,
    /// Send the user to `to`, remembering the location they asked for.
    Redirect {
        /// Login entry point.
        to: String,
        /// Originally requested location, restored after login.
        from: String,
    },
    /// Render the protected content.
    Render,
    /// Signed in, but lacking the permission the location requires.
    Forbidden {
        /// The missing permission.
        permission: Permission,
    },
}

/// Maps auth snapshots to navigation decisions.
#[derive(Debug, Clone)]
pub struct RouteGuard {
    login_path: String,
    home_path: String,
}

impl RouteGuard {
    /// Creates a guard using the configured login and home locations.
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            login_path: config.login_path.clone(),
            home_path: config.home_path.clone(),
        }
    }

    /// Login entry point.
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    /// Decides how to handle a request for `requested`.
    pub fn evaluate(&self, snapshot: &AuthSnapshot, requested: &str) -> GuardDecision {
        if snapshot.is_loading() {
            GuardDecision::Wait
        } else if snapshot.is_authenticated() {
            GuardDecision::Render
        } else {
            GuardDecision::Redirect {
                to: self.login_path.clone(),
                from: requested.to_string(),
            }
        }
    }

    /// Like [`evaluate`](Self::evaluate), additionally requiring `permission`.
    pub fn evaluate_with_permission(
        &self,
        snapshot: &AuthSnapshot,
        requested: &str,
        permission: Permission,
    ) -> GuardDecision {
        match self.evaluate(snapshot, requested) {
            GuardDecision::Render if !snapshot.has_permission(permission) => {
                GuardDecision::Forbidden { permission }
            }
            decision => decision,
        }
    }

    /// Where the login page should navigate once the user is authenticated.
    ///
    /// Returns the preserved location, or the home location when none was
    /// preserved or it points back at the login page. `None` until
    /// authenticated.
    pub fn post_login_target(&self, snapshot: &AuthSnapshot, from: Option<&str>) -> Option<String> {
        if !snapshot.is_authenticated() {
            return None;
        }
        let target = from
            .map(str::trim)
            .filter(|from| !from.is_empty() && !self.is_login_location(from))
            .unwrap_or(self.home_path.as_str());
        Some(target.to_string())
    }

    fn is_login_location(&self, location: &str) -> bool {
        let path = location
            .split(['?', '#'])
            .next()
            .unwrap_or(location)
            .trim_end_matches('/');
        path == self.login_path.trim_end_matches('/')
    }
}

impl Default for RouteGuard {
    fn default() -> Self {
        Self::new(&AuthConfig::default())
    }
}
