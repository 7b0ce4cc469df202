//! Brandcast API Library
//!
//! Axum HTTP surface over the credit ledger, admission control, billing
//! sync, and batch scheduler.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
