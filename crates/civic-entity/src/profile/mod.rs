//! User profile entities.

pub mod model;
pub mod permission;
pub mod role;

pub use model::Profile;
pub use permission::Permission;
pub use role::UserRole;
