//! REST endpoints

pub mod error;
pub mod handlers;
pub mod router;

pub use error::ApiError;
