//! Stock vehicle models
//!
//! The stock book is a collaborator of the deal engine: deals bind a
//! vehicle by id, part-exchange checks look VRMs up against it, and
//! cancellation restores vehicles into it. VRM decoding and external
//! lookups are out of scope.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Availability of a stock unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    Available,
    Reserved,
    Sold,
}

impl VehicleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleStatus::Available => "available",
            VehicleStatus::Reserved => "reserved",
            VehicleStatus::Sold => "sold",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "available" => Some(VehicleStatus::Available),
            "reserved" => Some(VehicleStatus::Reserved),
            "sold" => Some(VehicleStatus::Sold),
            _ => None,
        }
    }
}

/// A vehicle in the dealer's own stock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockVehicle {
    pub id: Uuid,
    pub dealer_id: Uuid,
    /// Stored normalized (uppercase, no spaces)
    pub vrm: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub mileage: Option<i32>,
    pub asking_price: Option<Decimal>,
    pub status: VehicleStatus,
    /// Set when the unit came in as a converted part-exchange
    pub source_deal_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
