//! HTTP handlers

pub mod auth;
pub mod deal;
pub mod document;
pub mod health;
pub mod part_exchange;
pub mod payment;

pub use auth::*;
pub use deal::*;
pub use document::*;
pub use health::*;
pub use part_exchange::*;
pub use payment::*;
