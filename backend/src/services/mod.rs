//! Business logic services

pub mod auth;
pub mod deal;
pub mod document;
pub mod numbering;
pub mod part_exchange;
pub mod payment;
pub mod stock;

pub use auth::AuthService;
pub use deal::DealService;
pub use document::DocumentService;
pub use part_exchange::PartExchangeService;
pub use payment::PaymentService;
pub use stock::StockService;
