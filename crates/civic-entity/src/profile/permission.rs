//! Fine-grained permission flags stored on a profile.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Capabilities that can be granted to a profile independently of its role.
///
/// The wire names match the literals stored in `profiles.permissions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Permission {
    // -- User administration --
    /// See the user list.
    ViewUsers,
    /// Create user accounts.
    CreateUsers,
    /// Edit user accounts.
    EditUsers,
    /// Delete user accounts.
    DeleteUsers,

    // -- Goals and tasks --
    /// See goals and their tasks.
    ViewGoals,
    /// Create and edit goals and tasks.
    EditGoals,

    // -- Finance --
    /// See financial transactions and goals.
    ViewFinancial,
    /// Record and edit financial transactions.
    EditFinancial,

    /// See dashboard reports.
    ViewReports,
}

impl Permission {
    /// Every permission the dashboard knows about.
    pub const ALL: [Permission; 9] = [
        Self::ViewUsers,
        Self::CreateUsers,
        Self::EditUsers,
        Self::DeleteUsers,
        Self::ViewGoals,
        Self::EditGoals,
        Self::ViewFinancial,
        Self::EditFinancial,
        Self::ViewReports,
    ];

    /// Return the permission's stored literal.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ViewUsers => "viewUsers",
            Self::CreateUsers => "createUsers",
            Self::EditUsers => "editUsers",
            Self::DeleteUsers => "deleteUsers",
            Self::ViewGoals => "viewGoals",
            Self::EditGoals => "editGoals",
            Self::ViewFinancial => "viewFinancial",
            Self::EditFinancial => "editFinancial",
            Self::ViewReports => "viewReports",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Permission {
    type Err = civic_core::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| civic_core::AppError::validation(format!("Unknown permission: '{s}'")))
    }
}
