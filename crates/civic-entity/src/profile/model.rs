//! Profile entity model.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use civic_core::types::SubjectId;

use super::permission::Permission;
use super::role::UserRole;

/// A row of the `profiles` table.
///
/// Created out-of-band at registration and edited by the user pages; the
/// session module only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Same identifier as the backend session's subject.
    pub id: SubjectId,
    /// Display name.
    #[serde(rename = "nome")]
    pub name: String,
    /// Contact email.
    pub email: String,
    /// Assigned role.
    pub role: UserRole,
    /// Explicit permission grants, if any were stored.
    #[serde(default, deserialize_with = "deserialize_permissions")]
    pub permissions: Option<BTreeSet<Permission>>,
    /// When the row was created.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// When the row was last updated.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    /// Build a profile without timestamps.
    pub fn new(
        id: impl Into<SubjectId>,
        name: impl Into<String>,
        email: impl Into<String>,
        role: UserRole,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
            role,
            permissions: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Replace the explicit permission grants.
    pub fn with_permissions(mut self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.permissions = Some(permissions.into_iter().collect());
        self
    }

    /// Check whether the permission was granted explicitly.
    ///
    /// Does not consider the super-role; see the authorization enforcer.
    pub fn grants(&self, permission: Permission) -> bool {
        self.permissions
            .as_ref()
            .is_some_and(|set| set.contains(&permission))
    }
}

/// Accepts `null`, a missing column, or an array of literals. Literals the
/// dashboard does not know are dropped so one stale grant cannot lock a
/// user out entirely.
fn deserialize_permissions<'de, D>(deserializer: D) -> Result<Option<BTreeSet<Permission>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<String>> = Option::deserialize(deserializer)?;
    Ok(raw.map(|literals| {
        literals
            .into_iter()
            .filter_map(|literal| match literal.parse::<Permission>() {
                Ok(permission) => Some(permission),
                Err(_) => {
                    warn!(permission = %literal, "Ignoring unknown permission on profile");
                    None
                }
            })
            .collect()
    }))
}
