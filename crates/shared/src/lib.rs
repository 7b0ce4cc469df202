//! Brandcast Shared Types and Utilities
//!
//! This crate contains types and database utilities shared across the
//! Brandcast services (API and worker).

pub mod db;
pub mod types;

pub use db::*;
pub use types::*;
