//! RBAC enforcement logic: permission and role checks against a loaded profile.

use civic_core::error::AppError;
use civic_core::result::AppResult;
use civic_entity::profile::{Permission, Profile, UserRole};

/// Answers authorization questions for the current user.
///
/// A missing profile is denied everything. The super-role passes every
/// check regardless of its stored permissions.
#[derive(Debug, Clone, Copy, Default)]
pub struct RbacEnforcer;

impl RbacEnforcer {
    /// Creates a new enforcer.
    pub fn new() -> Self {
        Self
    }

    /// Checks whether `profile` holds `permission`.
    pub fn has_permission(&self, profile: Option<&Profile>, permission: Permission) -> bool {
        match profile {
            Some(profile) => profile.role.is_super() || profile.grants(permission),
            None => false,
        }
    }

    /// Checks whether `profile` has one of `roles`.
    pub fn has_role(&self, profile: Option<&Profile>, roles: &[UserRole]) -> bool {
        match profile {
            Some(profile) => profile.role.is_super() || roles.contains(&profile.role),
            None => false,
        }
    }

    /// Requires `permission`.
    ///
    /// Returns `Ok(())` if allowed, or an authorization error if denied.
    pub fn require_permission(
        &self,
        profile: Option<&Profile>,
        permission: Permission,
    ) -> AppResult<()> {
        if self.has_permission(profile, permission) {
            return Ok(());
        }
        Err(match profile {
            Some(profile) => AppError::authorization(format!(
                "Role '{}' does not have permission '{permission}'",
                profile.role
            )),
            None => AppError::authorization(format!(
                "Permission '{permission}' requires a signed-in user"
            )),
        })
    }

    /// Requires one of `roles`.
    pub fn require_role(&self, profile: Option<&Profile>, roles: &[UserRole]) -> AppResult<()> {
        if self.has_role(profile, roles) {
            return Ok(());
        }
        let expected = roles
            .iter()
            .map(UserRole::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        Err(match profile {
            Some(profile) => AppError::authorization(format!(
                "Role '{}' is not one of [{expected}]",
                profile.role
            )),
            None => AppError::authorization(format!("Roles [{expected}] require a signed-in user")),
        })
    }
}
