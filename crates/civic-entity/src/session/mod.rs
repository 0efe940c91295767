//! Backend session values.

pub mod model;

pub use model::Session;
