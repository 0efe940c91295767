//! Route protection driven by the auth snapshot.

pub mod route;

pub use route::{GuardDecision, RouteGuard};
