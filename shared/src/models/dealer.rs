//! Dealer and user account models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered dealership. All deals, documents and stock are scoped to
/// exactly one dealer; cross-dealer access is never permitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dealer {
    pub id: Uuid,
    pub name: String,
    /// Short code used in deal numbers (e.g. "ACM")
    pub dealer_code: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub vat_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A staff account belonging to a dealer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub dealer_id: Uuid,
    pub email: String,
    pub name: String,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
