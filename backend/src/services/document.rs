//! Sales document service
//!
//! Issues deposit receipts, invoices and payment receipts, and owns every
//! write to a document's frozen snapshot. Snapshots are captured once at
//! issue and afterwards touched only by the reconciliation path (payment
//! recording) or an explicit regenerate; nothing here recomputes an issued
//! document from the live deal behind the caller's back.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::numbering::NumberingGateway;
use shared::pricing::{calculate_totals, DealTotals};
use shared::models::{
    Deal, DocumentSnapshot, DocumentStatus, DocumentType, ReceiptDetails, SalesDocument,
    SnapshotLineItem, SnapshotPartExchange,
};

/// Service for reading and issuing sales documents
#[derive(Clone)]
pub struct DocumentService {
    db: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct DocumentRow {
    id: Uuid,
    dealer_id: Uuid,
    deal_id: Uuid,
    document_type: String,
    document_number: String,
    status: String,
    void_reason: Option<String>,
    snapshot: serde_json::Value,
    issued_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
}

impl DocumentRow {
    fn into_document(self) -> AppResult<SalesDocument> {
        let document_type = DocumentType::from_str(&self.document_type).ok_or_else(|| {
            AppError::Internal(format!("Unknown document type: {}", self.document_type))
        })?;
        let status = DocumentStatus::from_str(&self.status).ok_or_else(|| {
            AppError::Internal(format!("Unknown document status: {}", self.status))
        })?;
        let snapshot: DocumentSnapshot = serde_json::from_value(self.snapshot)
            .map_err(|e| AppError::Internal(format!("Corrupt document snapshot: {}", e)))?;

        Ok(SalesDocument {
            id: self.id,
            dealer_id: self.dealer_id,
            deal_id: self.deal_id,
            document_type,
            document_number: self.document_number,
            status,
            void_reason: self.void_reason,
            snapshot,
            issued_at: self.issued_at,
            paid_at: self.paid_at,
        })
    }
}

const DOCUMENT_COLUMNS: &str = "id, dealer_id, deal_id, document_type, document_number, status, \
                                void_reason, snapshot, issued_at, paid_at";

/// Build the frozen snapshot for a document from the deal and its totals.
///
/// Called only at issue (or regenerate) time; the same pricing calculator
/// feeds the live read path, so the figures agree by construction.
pub fn build_snapshot(
    deal: &Deal,
    totals: &DealTotals,
    receipt_details: Option<ReceiptDetails>,
) -> DocumentSnapshot {
    let mut line_items: Vec<SnapshotLineItem> = Vec::new();
    for add_on in &deal.add_ons {
        let qty = rust_decimal::Decimal::from(add_on.qty);
        let net = add_on.unit_price_net * qty;
        let vat = net * shared::pricing::effective_add_on_vat_rate(add_on);
        line_items.push(SnapshotLineItem {
            description: add_on.name.clone(),
            qty: add_on.qty,
            unit_price_net: add_on.unit_price_net,
            vat_amount: shared::money::round_money(vat),
            total_gross: shared::money::round_money(net + vat),
        });
    }

    let part_exchanges = deal
        .part_exchanges
        .iter()
        .map(|px| SnapshotPartExchange {
            vrm: px.vrm.clone(),
            allowance: px.allowance,
            settlement: px.settlement,
            net_value: px.net_value(),
        })
        .collect();

    DocumentSnapshot {
        deal_number: deal.deal_number.clone(),
        customer_id: deal.customer_id,
        invoice_recipient_id: deal.invoice_recipient_id,
        vehicle_id: deal.vehicle_id,
        vehicle_description: None,
        vat_scheme: deal.vat_scheme,
        line_items,
        subtotal: totals.subtotal,
        total_vat: totals.total_vat,
        delivery_amount: totals.delivery_amount,
        warranty_amount: totals.warranty_amount,
        grand_total: totals.grand_total,
        part_exchanges,
        px_net_value: totals.px_net_value,
        payments: deal.payments.clone(),
        deposit_paid: totals.deposit_paid,
        other_payments: totals.other_payments,
        total_paid: totals.total_paid,
        balance_due: totals.balance_due,
        receipt_details,
    }
}

impl DocumentService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Issue a new document: allocate its number and persist the snapshot.
    /// Runs on the caller's transaction so number allocation, snapshot
    /// write and the deal mutation commit or roll back together.
    pub async fn issue(
        conn: &mut PgConnection,
        dealer_id: Uuid,
        deal_id: Uuid,
        document_type: DocumentType,
        snapshot: &DocumentSnapshot,
    ) -> AppResult<SalesDocument> {
        let document_number =
            NumberingGateway::allocate_document_number(conn, dealer_id, document_type).await?;

        let snapshot_json = serde_json::to_value(snapshot)
            .map_err(|e| AppError::Internal(format!("Snapshot serialization failed: {}", e)))?;

        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            r#"
            INSERT INTO sales_documents (dealer_id, deal_id, document_type, document_number, status, snapshot)
            VALUES ($1, $2, $3, $4, 'issued', $5)
            RETURNING {}
            "#,
            DOCUMENT_COLUMNS
        ))
        .bind(dealer_id)
        .bind(deal_id)
        .bind(document_type.as_str())
        .bind(&document_number)
        .bind(&snapshot_json)
        .fetch_one(conn)
        .await?;

        tracing::info!(
            deal_id = %deal_id,
            document_number = %document_number,
            "Issued {} document", document_type.as_str()
        );

        row.into_document()
    }

    /// The most recent issued (non-void) document of a type for a deal.
    pub async fn latest_issued(
        conn: &mut PgConnection,
        dealer_id: Uuid,
        deal_id: Uuid,
        document_type: DocumentType,
    ) -> AppResult<Option<SalesDocument>> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            r#"
            SELECT {}
            FROM sales_documents
            WHERE dealer_id = $1 AND deal_id = $2 AND document_type = $3 AND status = 'issued'
            ORDER BY issued_at DESC
            LIMIT 1
            "#,
            DOCUMENT_COLUMNS
        ))
        .bind(dealer_id)
        .bind(deal_id)
        .bind(document_type.as_str())
        .fetch_optional(conn)
        .await?;

        row.map(DocumentRow::into_document).transpose()
    }

    /// Overwrite a document's snapshot in place, keeping its number.
    /// `paid_at` is stamped only when supplied (full settlement).
    pub async fn update_snapshot(
        conn: &mut PgConnection,
        document_id: Uuid,
        snapshot: &DocumentSnapshot,
        paid_at: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        let snapshot_json = serde_json::to_value(snapshot)
            .map_err(|e| AppError::Internal(format!("Snapshot serialization failed: {}", e)))?;

        let result = sqlx::query(
            "UPDATE sales_documents SET snapshot = $1, paid_at = COALESCE($2, paid_at) WHERE id = $3",
        )
        .bind(&snapshot_json)
        .bind(paid_at)
        .bind(document_id)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Reconciliation(
                "Document snapshot update affected no rows".to_string(),
            ));
        }
        Ok(())
    }

    /// Void a document. The row is kept and its number stays retired; a
    /// replacement document allocates a fresh, strictly greater number.
    pub async fn void(
        conn: &mut PgConnection,
        dealer_id: Uuid,
        document_id: Uuid,
        reason: &str,
    ) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE sales_documents SET status = 'void', void_reason = $1 \
             WHERE id = $2 AND dealer_id = $3 AND status = 'issued'",
        )
        .bind(reason)
        .bind(document_id)
        .bind(dealer_id)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Document".to_string()));
        }
        Ok(())
    }

    /// All documents issued against a deal, newest first.
    pub async fn list_for_deal(
        &self,
        dealer_id: Uuid,
        deal_id: Uuid,
    ) -> AppResult<Vec<SalesDocument>> {
        let rows = sqlx::query_as::<_, DocumentRow>(&format!(
            r#"
            SELECT {}
            FROM sales_documents
            WHERE dealer_id = $1 AND deal_id = $2
            ORDER BY issued_at DESC
            "#,
            DOCUMENT_COLUMNS
        ))
        .bind(dealer_id)
        .bind(deal_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(DocumentRow::into_document).collect()
    }

    /// Get a single document by id, dealer-scoped.
    pub async fn get_document(
        &self,
        dealer_id: Uuid,
        document_id: Uuid,
    ) -> AppResult<SalesDocument> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {} FROM sales_documents WHERE id = $1 AND dealer_id = $2",
            DOCUMENT_COLUMNS
        ))
        .bind(document_id)
        .bind(dealer_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Document".to_string()))?;

        row.into_document()
    }

    /// Find the payment receipt issued for a specific ledger payment,
    /// if one was generated.
    pub async fn receipt_for_payment(
        &self,
        dealer_id: Uuid,
        deal_id: Uuid,
        payment_id: Uuid,
    ) -> AppResult<Option<SalesDocument>> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            r#"
            SELECT {}
            FROM sales_documents
            WHERE dealer_id = $1 AND deal_id = $2
              AND document_type = 'payment_receipt'
              AND snapshot -> 'receipt_details' ->> 'payment_id' = $3
            "#,
            DOCUMENT_COLUMNS
        ))
        .bind(dealer_id)
        .bind(deal_id)
        .bind(payment_id.to_string())
        .fetch_optional(&self.db)
        .await?;

        row.map(DocumentRow::into_document).transpose()
    }

    /// Reissue the deposit receipt with current deal figures without
    /// changing its document number. Issues one if none exists yet.
    pub async fn regenerate_deposit_receipt(
        conn: &mut PgConnection,
        dealer_id: Uuid,
        deal: &Deal,
    ) -> AppResult<SalesDocument> {
        let totals = calculate_totals(deal);
        let snapshot = build_snapshot(deal, &totals, None);

        match Self::latest_issued(conn, dealer_id, deal.id, DocumentType::DepositReceipt).await? {
            Some(mut receipt) => {
                Self::update_snapshot(conn, receipt.id, &snapshot, None).await?;
                receipt.snapshot = snapshot;
                Ok(receipt)
            }
            None => {
                Self::issue(conn, dealer_id, deal.id, DocumentType::DepositReceipt, &snapshot).await
            }
        }
    }

    /// Customer-facing share link for a document.
    pub fn share_url(base: &str, document_id: Uuid) -> String {
        format!("{}/documents/{}", base.trim_end_matches('/'), document_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_url_formatting() {
        let id = Uuid::nil();
        assert_eq!(
            DocumentService::share_url("https://docs.forecourt.app/", id),
            format!("https://docs.forecourt.app/documents/{}", id)
        );
    }
}
