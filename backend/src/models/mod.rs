//! Database models for the Forecourt backend
//!
//! Re-exports models from the shared crate

pub use shared::models::*;
