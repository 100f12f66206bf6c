//! Shared types and models for the Forecourt platform
//!
//! This crate contains the deal domain model, money arithmetic and
//! validation helpers shared between the backend and other components.

pub mod models;
pub mod money;
pub mod pricing;
pub mod types;
pub mod validation;

pub use models::*;
pub use money::*;
pub use pricing::*;
pub use types::*;
pub use validation::*;
