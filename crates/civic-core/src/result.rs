//! Convenience result type alias for the civic dashboard.

use crate::error::AppError;

/// A specialized `Result` type for dashboard operations.
///
/// Every crate returns this at its public boundary so callers do not need
/// to write `Result<T, AppError>` explicitly.
pub type AppResult<T> = Result<T, AppError>;
