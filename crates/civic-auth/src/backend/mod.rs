//! Backend-as-a-service client surface.
//!
//! The dashboard talks to a hosted backend that provides credential
//! sign-in, a session event stream, and row-level table access. The auth
//! context only depends on the two traits below; concrete clients are
//! selected at startup through [`BackendDispatch`].

pub mod dispatch;
pub mod event;
pub mod memory;
#[cfg(feature = "rest")]
pub mod rest;

use async_trait::async_trait;
use tokio::sync::broadcast;

use civic_entity::session::Session;

use crate::error::AuthError;

pub use dispatch::BackendDispatch;
pub use event::{AuthEvent, AuthEventKind};
pub use memory::MemoryBackend;
#[cfg(feature = "rest")]
pub use rest::RestBackend;

/// Credential and session operations.
#[async_trait]
pub trait AuthBackend: Send + Sync + std::fmt::Debug {
    /// Returns the session the backend currently holds, if any.
    async fn current_session(&self) -> Result<Option<Session>, AuthError>;

    /// Verifies credentials and establishes a session.
    ///
    /// Implementations also emit [`AuthEventKind::SignedIn`] on their
    /// event stream.
    async fn sign_in(&self, identifier: &str, secret: &str) -> Result<Session, AuthError>;

    /// Terminates the current session.
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Subscribes to session lifecycle events. Dropping the receiver
    /// releases the subscription.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// Row-level read access to named tables.
#[async_trait]
pub trait DataBackend: Send + Sync + std::fmt::Debug {
    /// Returns the single row matching `query`, or `None` if no row matches.
    async fn select_one(&self, query: &SelectQuery) -> Result<Option<serde_json::Value>, AuthError>;
}

/// Sort direction for [`SelectQuery::order_by`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// A single-table query with equality filters and optional ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectQuery {
    /// Table name.
    pub table: String,
    /// `(column, value)` pairs that must all match.
    pub filters: Vec<(String, String)>,
    /// Optional `(column, direction)` ordering.
    pub order: Option<(String, Order)>,
}

impl SelectQuery {
    /// Starts a query against `table`.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
            order: None,
        }
    }

    /// Adds an equality filter.
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    /// Sets the ordering.
    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order = Some((column.into(), order));
        self
    }

    /// Checks whether a JSON row satisfies every equality filter.
    pub fn matches(&self, row: &serde_json::Value) -> bool {
        self.filters.iter().all(|(column, expected)| {
            match row.get(column) {
                Some(serde_json::Value::String(actual)) => actual == expected,
                Some(serde_json::Value::Null) | None => false,
                Some(other) => other.to_string() == *expected,
            }
        })
    }
}
