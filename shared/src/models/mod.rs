//! Domain models for the Forecourt platform

mod deal;
mod dealer;
mod document;
mod vehicle;

pub use deal::*;
pub use dealer::*;
pub use document::*;
pub use vehicle::*;
