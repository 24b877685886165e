//! HTTP surface: router, lobby endpoints, error responses

pub mod routes;

pub use routes::{build_router, AppError};
