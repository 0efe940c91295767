//! # civic-auth
//!
//! Session and authorization state for the civic dashboard.
//!
//! ## Modules
//!
//! - `backend` — backend client traits, auth events, in-memory and REST clients
//! - `context` — the auth state machine (`AuthContext`) and its observable snapshot
//! - `rbac` — super-role aware permission and role checks
//! - `guard` — route guard decisions derived from the auth snapshot
//! - `error` — typed authentication failures

pub mod backend;
pub mod context;
pub mod error;
pub mod guard;
pub mod rbac;

pub use backend::{AuthBackend, AuthEvent, AuthEventKind, BackendDispatch, DataBackend, MemoryBackend, SelectQuery};
#[cfg(feature = "rest")]
pub use backend::RestBackend;
pub use context::{AuthContext, AuthPhase, AuthSnapshot, LogoutOutcome, ProfileStore};
pub use error::AuthError;
pub use guard::{GuardDecision, RouteGuard};
pub use rbac::RbacEnforcer;
