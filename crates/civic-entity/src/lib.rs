//! # civic-entity
//!
//! Domain models read by the session/authorization module. Every struct
//! here is either a backend row (`profiles`) or a value issued by the
//! backend's auth surface (`Session`). All derive `Debug`, `Clone`,
//! `Serialize` and `Deserialize`.

pub mod profile;
pub mod session;
