//! Payment ledger: balance payments and invoice reconciliation
//!
//! Once an invoice is issued its snapshot is the source of truth for
//! what is owed; a balance payment appends to the deal's ledger and
//! reconciles the invoice snapshot in place, in the same transaction.
//! The invoiced grand total is never recomputed from the live deal; a
//! live pricing run is used only when no invoice exists yet.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::deal::{fetch_deal, parse_method, persist_deal};
use crate::services::document::{build_snapshot, DocumentService};
use shared::pricing::calculate_totals;
use shared::models::{
    Deal, DealStatus, DocumentType, Payment, PaymentType, ReceiptDetails, SalesDocument,
};
use shared::money::{full_payment_tolerance, round_money};
use shared::validation::validate_positive_amount;

#[derive(Clone)]
pub struct PaymentService {
    db: PgPool,
}

#[derive(Debug, Deserialize)]
pub struct RecordBalancePaymentInput {
    pub amount: Decimal,
    pub method: String,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub idempotency_key: Option<String>,
    #[serde(default = "default_generate_receipt")]
    pub generate_receipt: bool,
}

fn default_generate_receipt() -> bool {
    true
}

/// Outcome of recording a balance payment. `replayed` marks an
/// idempotent retry that changed nothing.
#[derive(Debug, Serialize)]
pub struct BalancePaymentOutcome {
    pub deal: Deal,
    pub payment: Payment,
    pub receipt: Option<SalesDocument>,
    pub invoice_balance_before: Decimal,
    pub invoice_balance_after: Decimal,
    pub grand_total: Decimal,
    pub is_full_payment: bool,
    pub replayed: bool,
}

impl PaymentService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Record a balance payment against the deal.
    ///
    /// Ledger append, receipt issue and invoice reconciliation all happen
    /// inside one transaction; a retry with the same idempotency key
    /// returns the original payment without touching anything.
    pub async fn record_balance_payment(
        &self,
        dealer_id: Uuid,
        deal_id: Uuid,
        input: RecordBalancePaymentInput,
    ) -> AppResult<BalancePaymentOutcome> {
        let method = parse_method(&input.method)?;
        validate_positive_amount(input.amount).map_err(|msg| AppError::Validation {
            field: "amount".to_string(),
            message: msg.to_string(),
        })?;

        let mut tx = self.db.begin().await?;
        let mut deal = fetch_deal(&mut tx, dealer_id, deal_id).await?;

        if deal.status == DealStatus::Cancelled {
            return Err(AppError::Validation {
                field: "status".to_string(),
                message: "Cannot record a payment on a cancelled deal".to_string(),
            });
        }
        if deal.customer_id.is_none() {
            return Err(AppError::Validation {
                field: "customer_id".to_string(),
                message: "Deal has no customer".to_string(),
            });
        }

        // Idempotent replay: the first recording won, report it again
        if let Some(key) = input.idempotency_key.as_deref() {
            if let Some(existing) = deal.payment_by_idempotency_key(key).cloned() {
                tx.rollback().await?;
                return self.replay(dealer_id, deal, existing).await;
            }
        }

        let invoice =
            DocumentService::latest_issued(&mut tx, dealer_id, deal_id, DocumentType::Invoice)
                .await?;

        // What is owed comes from the invoice snapshot when one exists;
        // a live pricing run covers a deal not yet invoiced
        let (grand_total, px_net_value) = match &invoice {
            Some(inv) => (inv.snapshot.grand_total, inv.snapshot.px_net_value),
            None => {
                let totals = calculate_totals(&deal);
                (totals.grand_total, totals.px_net_value)
            }
        };
        let amount_payable = round_money(grand_total - px_net_value);

        let already_paid: Decimal = deal.total_paid();
        let balance_before = round_money(amount_payable - already_paid);

        if input.amount > balance_before + full_payment_tolerance() {
            return Err(AppError::Validation {
                field: "amount".to_string(),
                message: format!(
                    "Payment of {} exceeds the outstanding balance of {}",
                    input.amount, balance_before
                ),
            });
        }

        let payment = Payment {
            id: Uuid::new_v4(),
            payment_type: PaymentType::Balance,
            amount: input.amount,
            method,
            paid_at: Utc::now(),
            reference: input.reference,
            notes: input.notes,
            is_refunded: false,
            idempotency_key: input.idempotency_key,
        };
        deal.payments.push(payment.clone());
        persist_deal(&mut tx, &deal).await?;

        let balance_after = round_money(balance_before - input.amount);
        let is_full_payment = balance_after.abs() <= full_payment_tolerance();

        let receipt = if input.generate_receipt {
            let details = ReceiptDetails {
                payment_id: payment.id,
                invoice_number: invoice.as_ref().map(|inv| inv.document_number.clone()),
                invoice_balance_before: balance_before,
                invoice_balance_after: balance_after,
                is_full_payment,
            };
            let totals = calculate_totals(&deal);
            let snapshot = build_snapshot(&deal, &totals, Some(details));
            Some(
                DocumentService::issue(
                    &mut tx,
                    dealer_id,
                    deal.id,
                    DocumentType::PaymentReceipt,
                    &snapshot,
                )
                .await?,
            )
        } else {
            None
        };

        // Reconcile the invoice snapshot in place: adjust the paid and
        // outstanding figures, leave every priced line untouched
        if let Some(inv) = &invoice {
            let mut invoice_snapshot = inv.snapshot.clone();
            invoice_snapshot.total_paid = round_money(invoice_snapshot.total_paid + input.amount);
            invoice_snapshot.balance_due = round_money(invoice_snapshot.balance_due - input.amount);
            invoice_snapshot.other_payments =
                round_money(invoice_snapshot.other_payments + input.amount);
            invoice_snapshot.payments = deal.payments.clone();
            let paid_at = if is_full_payment {
                Some(Utc::now())
            } else {
                None
            };
            DocumentService::update_snapshot(&mut tx, inv.id, &invoice_snapshot, paid_at).await?;
        }

        tx.commit().await?;
        deal.version += 1;

        tracing::info!(
            deal_number = %deal.deal_number,
            amount = %payment.amount,
            full = is_full_payment,
            "Balance payment recorded"
        );

        Ok(BalancePaymentOutcome {
            deal,
            payment,
            receipt,
            invoice_balance_before: balance_before,
            invoice_balance_after: balance_after,
            grand_total,
            is_full_payment,
            replayed: false,
        })
    }

    /// Rebuild the outcome for an idempotent retry from the state the
    /// original recording left behind.
    async fn replay(
        &self,
        dealer_id: Uuid,
        deal: Deal,
        payment: Payment,
    ) -> AppResult<BalancePaymentOutcome> {
        let mut conn = self.db.acquire().await?;
        let invoice =
            DocumentService::latest_issued(&mut conn, dealer_id, deal.id, DocumentType::Invoice)
                .await?;
        drop(conn);

        let receipt = DocumentService::new(self.db.clone())
            .receipt_for_payment(dealer_id, deal.id, payment.id)
            .await?;

        let (grand_total, current_after) = match &invoice {
            Some(inv) => (inv.snapshot.grand_total, inv.snapshot.balance_due),
            None => {
                let totals = calculate_totals(&deal);
                let outstanding =
                    round_money(totals.grand_total - totals.px_net_value - deal.total_paid());
                (totals.grand_total, outstanding)
            }
        };
        let (balance_before, balance_after, is_full_payment) = replay_figures(
            receipt.as_ref(),
            round_money(current_after + payment.amount),
            current_after,
        );

        Ok(BalancePaymentOutcome {
            deal,
            payment,
            receipt,
            invoice_balance_before: balance_before,
            invoice_balance_after: balance_after,
            grand_total,
            is_full_payment,
            replayed: true,
        })
    }
}

/// Figures to report for an idempotent retry. The receipt issued with
/// the original recording carries the authoritative before/after
/// balances; later payments move the invoice but must not rewrite what
/// this payment's outcome was. Without a receipt, the current ledger
/// state is the best available answer.
fn replay_figures(
    receipt: Option<&SalesDocument>,
    fallback_before: Decimal,
    fallback_after: Decimal,
) -> (Decimal, Decimal, bool) {
    match receipt.and_then(|doc| doc.snapshot.receipt_details.as_ref()) {
        Some(details) => (
            details.invoice_balance_before,
            details.invoice_balance_after,
            details.is_full_payment,
        ),
        None => (
            fallback_before,
            fallback_after,
            fallback_after.abs() <= full_payment_tolerance(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared::models::{DocumentSnapshot, DocumentStatus};

    fn dec(n: i64) -> Decimal {
        Decimal::new(n, 2)
    }

    fn receipt_with_details(details: ReceiptDetails) -> SalesDocument {
        SalesDocument {
            id: Uuid::new_v4(),
            dealer_id: Uuid::new_v4(),
            deal_id: Uuid::new_v4(),
            document_type: DocumentType::PaymentReceipt,
            document_number: "PR-00001".to_string(),
            status: DocumentStatus::Issued,
            void_reason: None,
            snapshot: DocumentSnapshot {
                deal_number: "D-00001".to_string(),
                customer_id: None,
                invoice_recipient_id: None,
                vehicle_id: Uuid::new_v4(),
                vehicle_description: None,
                vat_scheme: None,
                line_items: vec![],
                subtotal: dec(1_000_000),
                total_vat: Decimal::ZERO,
                delivery_amount: Decimal::ZERO,
                warranty_amount: Decimal::ZERO,
                grand_total: dec(1_000_000),
                part_exchanges: vec![],
                px_net_value: Decimal::ZERO,
                payments: vec![],
                deposit_paid: Decimal::ZERO,
                other_payments: Decimal::ZERO,
                total_paid: Decimal::ZERO,
                balance_due: dec(1_000_000),
                receipt_details: Some(details),
            },
            issued_at: Utc::now(),
            paid_at: None,
        }
    }

    #[test]
    fn test_replay_prefers_stored_receipt_figures() {
        // A later payment moved the invoice to 2000.00 outstanding, but
        // the retried payment originally saw 10000.00 -> 5000.00
        let receipt = receipt_with_details(ReceiptDetails {
            payment_id: Uuid::new_v4(),
            invoice_number: Some("INV-00001".to_string()),
            invoice_balance_before: dec(1_000_000),
            invoice_balance_after: dec(500_000),
            is_full_payment: false,
        });
        let (before, after, full) = replay_figures(Some(&receipt), dec(700_000), dec(200_000));
        assert_eq!(before, dec(1_000_000));
        assert_eq!(after, dec(500_000));
        assert!(!full);
    }

    #[test]
    fn test_replay_falls_back_without_receipt() {
        let (before, after, full) = replay_figures(None, dec(500_000), Decimal::ZERO);
        assert_eq!(before, dec(500_000));
        assert_eq!(after, Decimal::ZERO);
        assert!(full);
    }
}
