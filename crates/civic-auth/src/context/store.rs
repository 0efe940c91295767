//! Profile lookups wrapping the backend's data surface.

use std::sync::Arc;

use tracing::debug;

use civic_core::types::SubjectId;
use civic_entity::profile::Profile;

use crate::backend::{DataBackend, SelectQuery};
use crate::error::AuthError;

/// Reads profile rows keyed by the session subject.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    /// Backend data surface.
    data: Arc<dyn DataBackend>,
    /// Profiles table name.
    table: String,
}

impl ProfileStore {
    /// Creates a store reading from `table`.
    pub fn new(data: Arc<dyn DataBackend>, table: impl Into<String>) -> Self {
        Self {
            data,
            table: table.into(),
        }
    }

    /// Table the store reads from.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Fetches and decodes the profile for `subject`.
    ///
    /// A missing row is `ProfileNotFound`; a row that does not decode, or
    /// whose `id` differs from `subject`, is `InvalidProfile`.
    pub async fn fetch(&self, subject: &SubjectId) -> Result<Profile, AuthError> {
        let query = SelectQuery::table(&self.table).eq("id", subject.as_str());
        let row = self
            .data
            .select_one(&query)
            .await?
            .ok_or_else(|| AuthError::ProfileNotFound(subject.clone()))?;

        let profile: Profile =
            serde_json::from_value(row).map_err(|e| AuthError::InvalidProfile(e.to_string()))?;

        if profile.id != *subject {
            return Err(AuthError::InvalidProfile(format!(
                "row id '{}' does not match subject '{subject}'",
                profile.id
            )));
        }

        debug!(subject = %subject, role = %profile.role, "Profile fetched");
        Ok(profile)
    }
}
