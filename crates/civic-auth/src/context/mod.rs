//! The auth state machine and the snapshot it publishes.

pub mod manager;
pub mod state;
pub mod store;

pub use manager::{AuthContext, LogoutOutcome};
pub use state::{AuthPhase, AuthSnapshot};
pub use store::ProfileStore;
