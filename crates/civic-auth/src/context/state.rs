//! Observable auth state.

use std::sync::Arc;

use civic_entity::profile::{Permission, Profile, UserRole};
use civic_entity::session::Session;

use crate::error::AuthError;
use crate::rbac::RbacEnforcer;

/// Where the session/profile pair currently stands.
///
/// The loaded profile only exists inside [`AuthPhase::Authenticated`], so a
/// consumer can never see an authenticated flag without a user or the other
/// way around.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthPhase {
    /// Startup, before the backend has reported an existing session.
    #[default]
    Initializing,
    /// No session.
    Unauthenticated,
    /// A session exists (or a sign-in is in flight) and the profile is loading.
    Authenticating,
    /// Session and profile are both loaded.
    Authenticated(Arc<Profile>),
    /// A session exists but its profile could not be loaded.
    ProfileLoadFailed,
}

impl AuthPhase {
    /// Short lowercase name for logs and the shell.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticating => "authenticating",
            Self::Authenticated(_) => "authenticated",
            Self::ProfileLoadFailed => "profile_load_failed",
        }
    }

    /// `Initializing` or `Authenticating`.
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Initializing | Self::Authenticating)
    }
}

impl std::fmt::Display for AuthPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Point-in-time view of the auth context.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthSnapshot {
    /// Current phase.
    pub phase: AuthPhase,
    /// Session backing the phase, if any.
    pub session: Option<Session>,
    /// Last failure that was resolved into a state rather than returned.
    pub notice: Option<AuthError>,
}

impl AuthSnapshot {
    /// Whether the module is still resolving.
    pub fn is_loading(&self) -> bool {
        self.phase.is_loading()
    }

    /// Whether a profile is loaded for the current session.
    pub fn is_authenticated(&self) -> bool {
        matches!(self.phase, AuthPhase::Authenticated(_))
    }

    /// The loaded profile.
    pub fn user(&self) -> Option<&Profile> {
        match &self.phase {
            AuthPhase::Authenticated(profile) => Some(profile.as_ref()),
            _ => None,
        }
    }

    /// See [`RbacEnforcer::has_permission`].
    pub fn has_permission(&self, permission: Permission) -> bool {
        RbacEnforcer::new().has_permission(self.user(), permission)
    }

    /// See [`RbacEnforcer::has_role`].
    pub fn has_role(&self, roles: &[UserRole]) -> bool {
        RbacEnforcer::new().has_role(self.user(), roles)
    }
}
