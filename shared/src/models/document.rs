//! Sales documents and their frozen financial snapshots
//!
//! A sales document is immutable at issue: its snapshot captures every
//! figure the customer saw. Snapshots change only through explicit
//! reconciliation (payment recording updates totals in place); they are
//! never recomputed wholesale from the live deal.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::deal::{Payment, VatScheme};

/// Kind of financial document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    DepositReceipt,
    Invoice,
    PaymentReceipt,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::DepositReceipt => "deposit_receipt",
            DocumentType::Invoice => "invoice",
            DocumentType::PaymentReceipt => "payment_receipt",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "deposit_receipt" => Some(DocumentType::DepositReceipt),
            "invoice" => Some(DocumentType::Invoice),
            "payment_receipt" => Some(DocumentType::PaymentReceipt),
            _ => None,
        }
    }

    /// Number prefix per document type (numbers look like "INV-00042").
    pub fn number_prefix(&self) -> &'static str {
        match self {
            DocumentType::DepositReceipt => "DR",
            DocumentType::Invoice => "INV",
            DocumentType::PaymentReceipt => "PR",
        }
    }
}

/// Issue state of a document. Voided documents keep their number; numbers
/// are allocated exactly once and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Issued,
    Void,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Issued => "issued",
            DocumentStatus::Void => "void",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "issued" => Some(DocumentStatus::Issued),
            "void" => Some(DocumentStatus::Void),
            _ => None,
        }
    }
}

/// A financial document issued against a deal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalesDocument {
    pub id: Uuid,
    pub dealer_id: Uuid,
    pub deal_id: Uuid,
    pub document_type: DocumentType,
    /// Dealer-scoped sequential number, e.g. "INV-00042"
    pub document_number: String,
    pub status: DocumentStatus,
    pub void_reason: Option<String>,
    pub snapshot: DocumentSnapshot,
    pub issued_at: DateTime<Utc>,
    /// Stamped on an invoice once it is settled in full
    pub paid_at: Option<DateTime<Utc>>,
}

/// One priced line inside a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotLineItem {
    pub description: String,
    pub qty: i32,
    pub unit_price_net: Decimal,
    pub vat_amount: Decimal,
    pub total_gross: Decimal,
}

/// Part-exchange figures as they appeared on the document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotPartExchange {
    pub vrm: String,
    pub allowance: Decimal,
    pub settlement: Decimal,
    pub net_value: Decimal,
}

/// Frozen copy of all figures relevant to a document at issue time.
///
/// `total_paid` and `balance_due` are the only fields that move after
/// issue, and only via the payment reconciliation path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub deal_number: String,
    pub customer_id: Option<Uuid>,
    pub invoice_recipient_id: Option<Uuid>,
    pub vehicle_id: Uuid,
    pub vehicle_description: Option<String>,
    pub vat_scheme: Option<VatScheme>,
    pub line_items: Vec<SnapshotLineItem>,
    pub subtotal: Decimal,
    pub total_vat: Decimal,
    pub delivery_amount: Decimal,
    pub warranty_amount: Decimal,
    pub grand_total: Decimal,
    pub part_exchanges: Vec<SnapshotPartExchange>,
    pub px_net_value: Decimal,
    /// Payment history as reconciled against this document
    pub payments: Vec<Payment>,
    pub deposit_paid: Decimal,
    pub other_payments: Decimal,
    pub total_paid: Decimal,
    pub balance_due: Decimal,
    /// Payment-receipt specifics; absent on other document types
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_details: Option<ReceiptDetails>,
}

/// Extra figures carried only by payment receipts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptDetails {
    pub payment_id: Uuid,
    pub invoice_number: Option<String>,
    pub invoice_balance_before: Decimal,
    pub invoice_balance_after: Decimal,
    pub is_full_payment: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_type_round_trip() {
        for doc_type in [
            DocumentType::DepositReceipt,
            DocumentType::Invoice,
            DocumentType::PaymentReceipt,
        ] {
            assert_eq!(DocumentType::from_str(doc_type.as_str()), Some(doc_type));
        }
    }

    #[test]
    fn test_number_prefixes() {
        assert_eq!(DocumentType::Invoice.number_prefix(), "INV");
        assert_eq!(DocumentType::DepositReceipt.number_prefix(), "DR");
        assert_eq!(DocumentType::PaymentReceipt.number_prefix(), "PR");
    }

    #[test]
    fn test_document_status_round_trip() {
        assert_eq!(DocumentStatus::from_str("issued"), Some(DocumentStatus::Issued));
        assert_eq!(DocumentStatus::from_str("void"), Some(DocumentStatus::Void));
        assert_eq!(DocumentStatus::from_str("draft"), None);
    }
}
