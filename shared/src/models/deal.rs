//! Deal aggregate and its embedded collections
//!
//! A deal is the central record for one vehicle sale. Everything money-
//! related hangs off it: add-ons, part-exchanges, the payment ledger and
//! the delivery/warranty lines. Collections are embedded, not separate
//! aggregates; payments are append-only and never deleted.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a deal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStatus {
    Draft,
    DepositTaken,
    Invoiced,
    Delivered,
    Completed,
    Cancelled,
}

impl DealStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealStatus::Draft => "draft",
            DealStatus::DepositTaken => "deposit_taken",
            DealStatus::Invoiced => "invoiced",
            DealStatus::Delivered => "delivered",
            DealStatus::Completed => "completed",
            DealStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(DealStatus::Draft),
            "deposit_taken" => Some(DealStatus::DepositTaken),
            "invoiced" => Some(DealStatus::Invoiced),
            "delivered" => Some(DealStatus::Delivered),
            "completed" => Some(DealStatus::Completed),
            "cancelled" => Some(DealStatus::Cancelled),
            _ => None,
        }
    }

    /// Completed and Cancelled accept no further lifecycle transitions
    /// (Completed may still be cancelled with a mandatory reason).
    pub fn is_terminal(&self) -> bool {
        matches!(self, DealStatus::Completed | DealStatus::Cancelled)
    }
}

impl std::fmt::Display for DealStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the vehicle is being sold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleType {
    Retail,
    Trade,
    Export,
}

impl SaleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleType::Retail => "retail",
            SaleType::Trade => "trade",
            SaleType::Export => "export",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "retail" => Some(SaleType::Retail),
            "trade" => Some(SaleType::Trade),
            "export" => Some(SaleType::Export),
            _ => None,
        }
    }
}

/// VAT treatment governing the whole deal
///
/// VatQualifying itemizes VAT (net + VAT stored separately on the vehicle
/// price); every other scheme embeds any VAT in the gross price and reports
/// zero itemized VAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VatScheme {
    Margin,
    VatQualifying,
    NoVat,
    Zero,
    Exempt,
}

impl VatScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            VatScheme::Margin => "margin",
            VatScheme::VatQualifying => "vat_qualifying",
            VatScheme::NoVat => "no_vat",
            VatScheme::Zero => "zero",
            VatScheme::Exempt => "exempt",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "margin" => Some(VatScheme::Margin),
            "vat_qualifying" => Some(VatScheme::VatQualifying),
            "no_vat" => Some(VatScheme::NoVat),
            "zero" => Some(VatScheme::Zero),
            "exempt" => Some(VatScheme::Exempt),
            _ => None,
        }
    }

    pub fn is_vat_qualifying(&self) -> bool {
        matches!(self, VatScheme::VatQualifying)
    }
}

/// VAT treatment of an individual add-on line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VatTreatment {
    #[default]
    Standard,
    Exempt,
}

/// An optional extra sold with the vehicle (paint protection, mats, etc.)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddOn {
    pub name: String,
    pub qty: i32,
    pub unit_price_net: Decimal,
    #[serde(default)]
    pub vat_treatment: VatTreatment,
    /// Standard-rated lines without an explicit rate fall back to 20%.
    pub vat_rate: Option<Decimal>,
}

/// A trade-in vehicle netted against the deal balance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartExchange {
    /// Registration mark; duplicate detection is case- and space-insensitive
    pub vrm: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub mileage: Option<i32>,
    /// Value credited to the customer
    pub allowance: Decimal,
    /// Outstanding finance paid off by the dealer
    #[serde(default)]
    pub settlement: Decimal,
    #[serde(default)]
    pub vat_qualifying: bool,
    #[serde(default)]
    pub has_finance: bool,
    pub finance_company_id: Option<Uuid>,
    /// Written payoff confirmation from the finance company. Togglable
    /// after invoicing, unlike the other fields.
    #[serde(default)]
    pub has_settlement_in_writing: bool,
    /// Set once the trade-in has been converted into a stock unit.
    pub converted_vehicle_id: Option<Uuid>,
}

impl PartExchange {
    /// Net value credited against the balance: allowance minus settlement.
    pub fn net_value(&self) -> Decimal {
        self.allowance - self.settlement
    }
}

/// Normalize stored part-exchange data to the canonical array shape.
///
/// Older records stored a single embedded part-exchange object, some
/// with raw registration marks ("ab12 cde"). The array (possibly empty)
/// with normalized VRMs is the only representation business logic ever
/// sees; this runs once at the storage boundary. Duplicate detection
/// relies on the VRMs here already being in comparison form.
pub fn normalize_part_exchanges(stored: serde_json::Value) -> Vec<PartExchange> {
    let mut entries: Vec<PartExchange> = match stored {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect(),
        obj @ serde_json::Value::Object(_) => serde_json::from_value(obj)
            .map(|px| vec![px])
            .unwrap_or_default(),
        _ => Vec::new(),
    };
    for px in &mut entries {
        px.vrm = crate::validation::normalize_vrm(&px.vrm);
    }
    entries
}

/// A payment against a deal. Append-only: amounts are immutable once
/// recorded and refunds are flagged, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub payment_type: PaymentType,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub paid_at: DateTime<Utc>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub is_refunded: bool,
    /// Client-supplied key making network retries of payment recording safe.
    pub idempotency_key: Option<String>,
}

/// What a payment is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Deposit,
    Balance,
    FinanceAdvance,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Deposit => "deposit",
            PaymentType::Balance => "balance",
            PaymentType::FinanceAdvance => "finance_advance",
        }
    }
}

/// How a payment was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    Finance,
    Cheque,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Finance => "finance",
            PaymentMethod::Cheque => "cheque",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "cash" => Some(PaymentMethod::Cash),
            "card" => Some(PaymentMethod::Card),
            "bank_transfer" => Some(PaymentMethod::BankTransfer),
            "finance" => Some(PaymentMethod::Finance),
            "cheque" => Some(PaymentMethod::Cheque),
            _ => None,
        }
    }
}

/// Delivery line. Absent means the customer collects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    #[serde(default)]
    pub is_free: bool,
    /// Canonical gross amount. Older records stored this as `amount`.
    #[serde(alias = "amount")]
    pub amount_gross: Decimal,
    pub amount_net: Option<Decimal>,
    pub vat_amount: Option<Decimal>,
}

/// Warranty attached to the sale
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warranty {
    pub included: bool,
    pub warranty_type: WarrantyType,
    pub name: String,
    pub duration_months: i32,
    pub claim_limit: Option<Decimal>,
    pub price_gross: Decimal,
    /// Default warranties are bundled with the sale at no charge.
    #[serde(default)]
    pub is_default: bool,
}

/// Kind of warranty cover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarrantyType {
    Default,
    ThirdParty,
    Trade,
}

/// The deal aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub id: Uuid,
    pub dealer_id: Uuid,
    /// Human-readable deal number (e.g. "D-2026-0042")
    pub deal_number: String,
    pub status: DealStatus,
    pub sale_type: Option<SaleType>,
    pub buyer_use: Option<String>,
    pub sale_channel: Option<String>,
    pub vat_scheme: Option<VatScheme>,
    /// Stock vehicle being sold (owned by the stock collaborator)
    pub vehicle_id: Uuid,
    pub customer_id: Option<Uuid>,
    /// Distinct invoice recipient when invoicing a third party
    pub invoice_recipient_id: Option<Uuid>,
    pub vehicle_price_gross: Decimal,
    /// Populated only when vat_scheme is VatQualifying
    pub vehicle_price_net: Option<Decimal>,
    pub vehicle_vat_amount: Option<Decimal>,
    /// How the balance will be settled, confirmed at invoicing
    pub payment_method: Option<PaymentMethod>,
    /// Lender paying the balance when the method is finance
    pub finance_company_id: Option<Uuid>,
    pub add_ons: Vec<AddOn>,
    /// At most two entries, unique by normalized VRM
    pub part_exchanges: Vec<PartExchange>,
    pub payments: Vec<Payment>,
    pub delivery: Option<Delivery>,
    pub warranty: Option<Warranty>,
    pub deposit_taken_at: Option<DateTime<Utc>>,
    pub invoiced_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    /// Optimistic concurrency token, bumped on every write
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deal {
    /// Sum of non-refunded payments of any type.
    pub fn total_paid(&self) -> Decimal {
        self.payments
            .iter()
            .filter(|p| !p.is_refunded)
            .map(|p| p.amount)
            .sum()
    }

    /// Find a payment previously recorded under the given idempotency key.
    pub fn payment_by_idempotency_key(&self, key: &str) -> Option<&Payment> {
        self.payments
            .iter()
            .find(|p| p.idempotency_key.as_deref() == Some(key))
    }
}
