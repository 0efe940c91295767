//! Typed authentication failures.

use thiserror::Error;

use civic_core::error::{AppError, ErrorKind};
use civic_core::types::SubjectId;

/// Failures surfaced by the backend clients and the auth context.
///
/// Only `login` returns these to its caller; everywhere else the context
/// resolves them into a definite state and keeps the last one as a notice
/// on the snapshot for user messaging.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The backend rejected the identifier/secret pair. Re-prompt.
    #[error("Invalid email or password")]
    InvalidCredentials,
    /// No `profiles` row exists for the session's subject.
    #[error("No profile found for subject '{0}'")]
    ProfileNotFound(SubjectId),
    /// A `profiles` row exists but could not be decoded.
    #[error("Profile record is malformed: {0}")]
    InvalidProfile(String),
    /// Network or server failure. Retryable by user action.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
    /// The session can no longer be refreshed.
    #[error("Session expired or revoked")]
    SessionExpired,
    /// The backend could not terminate the session; local state was cleared anyway.
    #[error("Sign-out failed: {0}")]
    SignOutFailed(String),
}

impl AuthError {
    /// Whether retrying the same action later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_) | Self::SignOutFailed(_))
    }

    /// Normalize any backend failure during sign-in into the two outcomes
    /// the login form distinguishes.
    pub(crate) fn into_login_failure(self) -> Self {
        match self {
            Self::InvalidCredentials => Self::InvalidCredentials,
            Self::BackendUnavailable(msg) => Self::BackendUnavailable(msg),
            other => Self::BackendUnavailable(other.to_string()),
        }
    }

    /// Normalize any backend failure during sign-out.
    pub(crate) fn into_sign_out_failure(self) -> Self {
        match self {
            Self::SignOutFailed(msg) => Self::SignOutFailed(msg),
            other => Self::SignOutFailed(other.to_string()),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        let kind = match &err {
            AuthError::InvalidCredentials | AuthError::SessionExpired => ErrorKind::Authentication,
            AuthError::ProfileNotFound(_) => ErrorKind::NotFound,
            AuthError::InvalidProfile(_) => ErrorKind::Serialization,
            AuthError::BackendUnavailable(_) => ErrorKind::ServiceUnavailable,
            AuthError::SignOutFailed(_) => ErrorKind::Session,
        };
        AppError::with_source(kind, err.to_string(), err)
    }
}
