//! User role enumeration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Roles stored in the `profiles.role` column (`user_role` enum).
///
/// `Master` is the super-role: it satisfies every permission and role check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Super-role with unrestricted access.
    Master,
    /// Mayor.
    Prefeito,
    /// Municipal secretary.
    Secretario,
    /// Administrator, as written by the user edit page.
    Admin,
    /// Regular staff account.
    User,
}

impl UserRole {
    /// All roles, most privileged first.
    pub const ALL: [UserRole; 5] = [
        Self::Master,
        Self::Prefeito,
        Self::Secretario,
        Self::Admin,
        Self::User,
    ];

    /// Check if this role implicitly satisfies every check.
    pub fn is_super(&self) -> bool {
        matches!(self, Self::Master)
    }

    /// Return the role as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Prefeito => "prefeito",
            Self::Secretario => "secretario",
            Self::Admin => "admin",
            Self::User => "user",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = civic_core::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| {
                civic_core::AppError::validation(format!(
                    "Invalid user role: '{s}'. Expected one of: master, prefeito, secretario, admin, user"
                ))
            })
    }
}
