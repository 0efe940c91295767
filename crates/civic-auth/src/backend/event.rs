//! Session lifecycle events emitted by backend clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use civic_entity::session::Session;

/// Kinds of auth events a backend can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEventKind {
    /// A session was established.
    SignedIn,
    /// The session was terminated.
    SignedOut,
    /// The access token was renewed.
    TokenRefreshed,
    /// The signed-in user's record changed.
    UserUpdated,
}

/// An auth event with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthEvent {
    /// Unique event ID.
    pub id: Uuid,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub kind: AuthEventKind,
    /// The session after the event; absent for sign-out.
    pub session: Option<Session>,
}

impl AuthEvent {
    /// Create a new event.
    pub fn new(kind: AuthEventKind, session: Option<Session>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            session,
        }
    }

    /// A session was established.
    pub fn signed_in(session: Session) -> Self {
        Self::new(AuthEventKind::SignedIn, Some(session))
    }

    /// The session was terminated.
    pub fn signed_out() -> Self {
        Self::new(AuthEventKind::SignedOut, None)
    }

    /// The access token was renewed.
    pub fn token_refreshed(session: Session) -> Self {
        Self::new(AuthEventKind::TokenRefreshed, Some(session))
    }

    /// The signed-in user's record changed.
    pub fn user_updated(session: Session) -> Self {
        Self::new(AuthEventKind::UserUpdated, Some(session))
    }
}
