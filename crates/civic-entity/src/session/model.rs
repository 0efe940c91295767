//! Session value issued by the backend's auth surface.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use civic_core::types::SubjectId;

/// Proof of authentication for a subject.
///
/// Created by sign-in, replaced on token refresh, and discarded on
/// sign-out or expiry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// The authenticated subject.
    pub subject: SubjectId,
    /// Bearer token for data requests.
    pub access_token: String,
    /// Token used to obtain a new access token.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// When the access token stops being valid.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Email the subject signed in with.
    #[serde(default)]
    pub email: Option<String>,
}

impl Session {
    /// Create a session without expiry or refresh token.
    pub fn new(subject: impl Into<SubjectId>, access_token: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            email: None,
        }
    }

    /// Check whether the access token has expired.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }

    /// Check whether the access token expires within `margin`.
    pub fn expires_within(&self, margin: Duration) -> bool {
        self.expires_at.is_some_and(|at| at - margin <= Utc::now())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("subject", &self.subject)
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .field("email", &self.email)
            .finish()
    }
}
