//! Deal service: aggregate storage and the lifecycle state machine
//!
//! Every status change goes through one transition method here, each of
//! which validates its guards, mutates the aggregate inside a single
//! transaction with optimistic versioning, and issues or updates the
//! documents that transition owes. A request that fails mid-transition
//! leaves the deal exactly as it was.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult, SETTLEMENT_CONFIRMATION_REQUIRED};
use crate::services::document::{build_snapshot, DocumentService};
use crate::services::numbering::NumberingGateway;
use shared::pricing::{calculate_totals, DealTotals};
use crate::services::stock::StockService;
use shared::models::{
    normalize_part_exchanges, AddOn, Deal, DealStatus, Delivery, DocumentType, PartExchange,
    Payment, PaymentMethod, PaymentType, SaleType, SalesDocument, VatScheme, VehicleStatus,
    Warranty,
};
use shared::money::{net_from_gross, vat_from_gross};
use shared::types::{PaginatedResponse, Pagination, PaginationMeta};
use shared::validation::validate_positive_amount;

/// Deal service for aggregate CRUD and lifecycle transitions
#[derive(Clone)]
pub struct DealService {
    db: PgPool,
}

// ============================================================================
// Storage mapping
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct DealRow {
    id: Uuid,
    dealer_id: Uuid,
    deal_number: String,
    status: String,
    sale_type: Option<String>,
    buyer_use: Option<String>,
    sale_channel: Option<String>,
    vat_scheme: Option<String>,
    vehicle_id: Uuid,
    customer_id: Option<Uuid>,
    invoice_recipient_id: Option<Uuid>,
    vehicle_price_gross: Decimal,
    vehicle_price_net: Option<Decimal>,
    vehicle_vat_amount: Option<Decimal>,
    payment_method: Option<String>,
    finance_company_id: Option<Uuid>,
    add_ons: serde_json::Value,
    part_exchanges: serde_json::Value,
    payments: serde_json::Value,
    delivery: Option<serde_json::Value>,
    warranty: Option<serde_json::Value>,
    deposit_taken_at: Option<DateTime<Utc>>,
    invoiced_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancel_reason: Option<String>,
    version: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DealRow {
    /// Decode a stored row into the canonical aggregate. Legacy shapes
    /// (single embedded part-exchange, delivery `amount`) are normalized
    /// here, at the storage boundary, and nowhere else.
    fn into_deal(self) -> AppResult<Deal> {
        let status = DealStatus::from_str(&self.status)
            .ok_or_else(|| AppError::Internal(format!("Unknown deal status: {}", self.status)))?;
        let sale_type = match self.sale_type.as_deref() {
            Some(s) => Some(
                SaleType::from_str(s)
                    .ok_or_else(|| AppError::Internal(format!("Unknown sale type: {}", s)))?,
            ),
            None => None,
        };
        let vat_scheme = match self.vat_scheme.as_deref() {
            Some(s) => Some(
                VatScheme::from_str(s)
                    .ok_or_else(|| AppError::Internal(format!("Unknown VAT scheme: {}", s)))?,
            ),
            None => None,
        };

        let payment_method = match self.payment_method.as_deref() {
            Some(s) => Some(
                PaymentMethod::from_str(s)
                    .ok_or_else(|| AppError::Internal(format!("Unknown payment method: {}", s)))?,
            ),
            None => None,
        };

        let add_ons: Vec<AddOn> = serde_json::from_value(self.add_ons).unwrap_or_default();
        let part_exchanges = normalize_part_exchanges(self.part_exchanges);
        let payments: Vec<Payment> = serde_json::from_value(self.payments).unwrap_or_default();
        let delivery: Option<Delivery> = self
            .delivery
            .and_then(|v| serde_json::from_value(v).ok());
        let warranty: Option<Warranty> = self
            .warranty
            .and_then(|v| serde_json::from_value(v).ok());

        Ok(Deal {
            id: self.id,
            dealer_id: self.dealer_id,
            deal_number: self.deal_number,
            status,
            sale_type,
            buyer_use: self.buyer_use,
            sale_channel: self.sale_channel,
            vat_scheme,
            vehicle_id: self.vehicle_id,
            customer_id: self.customer_id,
            invoice_recipient_id: self.invoice_recipient_id,
            vehicle_price_gross: self.vehicle_price_gross,
            vehicle_price_net: self.vehicle_price_net,
            vehicle_vat_amount: self.vehicle_vat_amount,
            payment_method,
            finance_company_id: self.finance_company_id,
            add_ons,
            part_exchanges,
            payments,
            delivery,
            warranty,
            deposit_taken_at: self.deposit_taken_at,
            invoiced_at: self.invoiced_at,
            delivered_at: self.delivered_at,
            completed_at: self.completed_at,
            cancelled_at: self.cancelled_at,
            cancel_reason: self.cancel_reason,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const DEAL_COLUMNS: &str = "id, dealer_id, deal_number, status, sale_type, buyer_use, \
    sale_channel, vat_scheme, vehicle_id, customer_id, invoice_recipient_id, \
    vehicle_price_gross, vehicle_price_net, vehicle_vat_amount, payment_method, \
    finance_company_id, add_ons, part_exchanges, payments, delivery, warranty, \
    deposit_taken_at, invoiced_at, delivered_at, completed_at, cancelled_at, cancel_reason, \
    version, created_at, updated_at";

fn to_json<T: serde::Serialize>(value: &T) -> AppResult<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| AppError::Internal(format!("Serialization failed: {}", e)))
}

/// Load a deal, dealer-scoped. A wrong dealer looks identical to a
/// missing deal.
pub(crate) async fn fetch_deal(
    conn: &mut PgConnection,
    dealer_id: Uuid,
    deal_id: Uuid,
) -> AppResult<Deal> {
    let row = sqlx::query_as::<_, DealRow>(&format!(
        "SELECT {} FROM deals WHERE id = $1 AND dealer_id = $2",
        DEAL_COLUMNS
    ))
    .bind(deal_id)
    .bind(dealer_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Deal".to_string()))?;

    row.into_deal()
}

/// Write the mutable parts of a deal back with an optimistic version
/// check. Concurrent writers lose with a VersionConflict rather than
/// silently overwriting each other's ledger entries.
pub(crate) async fn persist_deal(conn: &mut PgConnection, deal: &Deal) -> AppResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE deals SET
            status = $1, sale_type = $2, buyer_use = $3, sale_channel = $4, vat_scheme = $5,
            customer_id = $6, invoice_recipient_id = $7, vehicle_price_gross = $8,
            vehicle_price_net = $9, vehicle_vat_amount = $10, payment_method = $11,
            finance_company_id = $12, add_ons = $13, part_exchanges = $14, payments = $15,
            delivery = $16, warranty = $17, deposit_taken_at = $18, invoiced_at = $19,
            delivered_at = $20, completed_at = $21, cancelled_at = $22, cancel_reason = $23,
            version = version + 1, updated_at = NOW()
        WHERE id = $24 AND dealer_id = $25 AND version = $26
        "#,
    )
    .bind(deal.status.as_str())
    .bind(deal.sale_type.map(|s| s.as_str()))
    .bind(&deal.buyer_use)
    .bind(&deal.sale_channel)
    .bind(deal.vat_scheme.map(|s| s.as_str()))
    .bind(deal.customer_id)
    .bind(deal.invoice_recipient_id)
    .bind(deal.vehicle_price_gross)
    .bind(deal.vehicle_price_net)
    .bind(deal.vehicle_vat_amount)
    .bind(deal.payment_method.map(|m| m.as_str()))
    .bind(deal.finance_company_id)
    .bind(to_json(&deal.add_ons)?)
    .bind(to_json(&deal.part_exchanges)?)
    .bind(to_json(&deal.payments)?)
    .bind(deal.delivery.as_ref().map(to_json).transpose()?)
    .bind(deal.warranty.as_ref().map(to_json).transpose()?)
    .bind(deal.deposit_taken_at)
    .bind(deal.invoiced_at)
    .bind(deal.delivered_at)
    .bind(deal.completed_at)
    .bind(deal.cancelled_at)
    .bind(&deal.cancel_reason)
    .bind(deal.id)
    .bind(deal.dealer_id)
    .bind(deal.version)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::VersionConflict);
    }
    Ok(())
}

// ============================================================================
// Inputs and outcomes
// ============================================================================

/// Input for creating a deal. The vehicle must already be in stock.
#[derive(Debug, Deserialize)]
pub struct CreateDealInput {
    pub vehicle_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub sale_type: Option<SaleType>,
    pub vat_scheme: Option<VatScheme>,
    pub vehicle_price_gross: Decimal,
    pub buyer_use: Option<String>,
    pub sale_channel: Option<String>,
}

/// Input for updating a draft or deposit-taken deal
#[derive(Debug, Deserialize, Default)]
pub struct UpdateDealInput {
    pub customer_id: Option<Uuid>,
    pub invoice_recipient_id: Option<Uuid>,
    pub sale_type: Option<SaleType>,
    pub vat_scheme: Option<VatScheme>,
    pub vehicle_price_gross: Option<Decimal>,
    pub buyer_use: Option<String>,
    pub sale_channel: Option<String>,
    pub add_ons: Option<Vec<AddOn>>,
    pub delivery: Option<Delivery>,
    pub collection: Option<bool>,
    pub warranty: Option<Warranty>,
}

#[derive(Debug, Deserialize)]
pub struct TakeDepositInput {
    pub amount: Decimal,
    pub method: String,
    pub reference: Option<String>,
    pub notes: Option<String>,
    #[serde(default = "default_true")]
    pub generate_receipt: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct GenerateInvoiceInput {
    pub payment_method: Option<String>,
    pub finance_company_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct MarkDeliveredInput {
    #[serde(default)]
    pub customer_confirmed: bool,
    pub mileage: Option<i32>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct MarkCompletedInput {
    #[serde(default)]
    pub confirm_without_settlement: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct CancelDealInput {
    pub reason: Option<String>,
    #[serde(default)]
    pub confirm: bool,
}

fn default_true() -> bool {
    true
}

/// Deal together with its computed totals, the standard read shape
#[derive(Debug, Serialize)]
pub struct DealWithTotals {
    #[serde(flatten)]
    pub deal: Deal,
    pub totals: DealTotals,
}

/// Outcome of taking a deposit
#[derive(Debug, Serialize)]
pub struct TakeDepositOutcome {
    pub deal: Deal,
    pub payment: Payment,
    pub receipt: Option<SalesDocument>,
    pub totals: DealTotals,
}

/// Outcome of generating an invoice
#[derive(Debug, Serialize)]
pub struct GenerateInvoiceOutcome {
    pub deal: Deal,
    pub invoice: SalesDocument,
    pub totals: DealTotals,
}

/// Outcome of cancelling a deal. Compensation failures are reported as
/// warnings for operator follow-up; they never fail the cancellation.
#[derive(Debug, Serialize)]
pub struct CancelOutcome {
    pub deal: Deal,
    pub warnings: Vec<String>,
}

// ============================================================================
// Service
// ============================================================================

impl DealService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create a deal in Draft with a stock vehicle bound. The vehicle is
    /// reserved so it cannot be sold twice.
    pub async fn create_deal(&self, dealer_id: Uuid, input: CreateDealInput) -> AppResult<Deal> {
        if input.vehicle_price_gross < Decimal::ZERO {
            return Err(AppError::Validation {
                field: "vehicle_price_gross".to_string(),
                message: "Vehicle price cannot be negative".to_string(),
            });
        }

        let stock = StockService::new(self.db.clone());
        let vehicle = stock.get_vehicle(dealer_id, input.vehicle_id).await?;
        if vehicle.status == VehicleStatus::Sold {
            return Err(AppError::InvalidStateTransition(
                "Vehicle has already been sold".to_string(),
            ));
        }

        let mut tx = self.db.begin().await?;

        let deal_number = NumberingGateway::allocate_deal_number(&mut tx, dealer_id).await?;

        let (vehicle_price_net, vehicle_vat_amount) = derive_vehicle_vat(
            input.vat_scheme,
            input.vehicle_price_gross,
        );

        let row = sqlx::query_as::<_, DealRow>(&format!(
            r#"
            INSERT INTO deals (
                dealer_id, deal_number, status, sale_type, buyer_use, sale_channel, vat_scheme,
                vehicle_id, customer_id, vehicle_price_gross, vehicle_price_net,
                vehicle_vat_amount, add_ons, part_exchanges, payments
            )
            VALUES ($1, $2, 'draft', $3, $4, $5, $6, $7, $8, $9, $10, $11, '[]', '[]', '[]')
            RETURNING {}
            "#,
            DEAL_COLUMNS
        ))
        .bind(dealer_id)
        .bind(&deal_number)
        .bind(input.sale_type.map(|s| s.as_str()))
        .bind(&input.buyer_use)
        .bind(&input.sale_channel)
        .bind(input.vat_scheme.map(|s| s.as_str()))
        .bind(input.vehicle_id)
        .bind(input.customer_id)
        .bind(input.vehicle_price_gross)
        .bind(vehicle_price_net)
        .bind(vehicle_vat_amount)
        .fetch_one(&mut *tx)
        .await?;

        StockService::set_status(&mut tx, dealer_id, input.vehicle_id, VehicleStatus::Reserved)
            .await?;

        tx.commit().await?;

        tracing::info!(deal_number = %deal_number, "Created deal");
        row.into_deal()
    }

    /// Deals for a dealer, newest first, paginated.
    pub async fn list_deals(
        &self,
        dealer_id: Uuid,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<Deal>> {
        let total_items =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM deals WHERE dealer_id = $1")
                .bind(dealer_id)
                .fetch_one(&self.db)
                .await? as u64;

        let rows = sqlx::query_as::<_, DealRow>(&format!(
            "SELECT {} FROM deals WHERE dealer_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            DEAL_COLUMNS
        ))
        .bind(dealer_id)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        let data = rows
            .into_iter()
            .map(DealRow::into_deal)
            .collect::<AppResult<Vec<_>>>()?;

        Ok(PaginatedResponse {
            data,
            pagination: PaginationMeta::new(&pagination, total_items),
        })
    }

    /// Get a deal with its live totals.
    pub async fn get_deal(&self, dealer_id: Uuid, deal_id: Uuid) -> AppResult<DealWithTotals> {
        let mut conn = self.db.acquire().await?;
        let deal = fetch_deal(&mut conn, dealer_id, deal_id).await?;
        let totals = calculate_totals(&deal);
        Ok(DealWithTotals { deal, totals })
    }

    /// Update deal fields. Pricing and classification lock once invoiced;
    /// only Draft and DepositTaken deals are editable here.
    pub async fn update_deal(
        &self,
        dealer_id: Uuid,
        deal_id: Uuid,
        input: UpdateDealInput,
    ) -> AppResult<DealWithTotals> {
        let mut tx = self.db.begin().await?;
        let mut deal = fetch_deal(&mut tx, dealer_id, deal_id).await?;

        if !matches!(deal.status, DealStatus::Draft | DealStatus::DepositTaken) {
            return Err(AppError::InvalidStateTransition(format!(
                "Deal cannot be edited while {}",
                deal.status
            )));
        }

        if let Some(customer_id) = input.customer_id {
            deal.customer_id = Some(customer_id);
        }
        if let Some(recipient) = input.invoice_recipient_id {
            deal.invoice_recipient_id = Some(recipient);
        }
        if let Some(sale_type) = input.sale_type {
            deal.sale_type = Some(sale_type);
        }
        if let Some(vat_scheme) = input.vat_scheme {
            deal.vat_scheme = Some(vat_scheme);
        }
        if let Some(price) = input.vehicle_price_gross {
            if price < Decimal::ZERO {
                return Err(AppError::Validation {
                    field: "vehicle_price_gross".to_string(),
                    message: "Vehicle price cannot be negative".to_string(),
                });
            }
            deal.vehicle_price_gross = price;
        }
        if let Some(buyer_use) = input.buyer_use {
            deal.buyer_use = Some(buyer_use);
        }
        if let Some(channel) = input.sale_channel {
            deal.sale_channel = Some(channel);
        }
        if let Some(add_ons) = input.add_ons {
            for add_on in &add_ons {
                if add_on.qty <= 0 {
                    return Err(AppError::Validation {
                        field: "add_ons".to_string(),
                        message: "Add-on quantity must be positive".to_string(),
                    });
                }
            }
            deal.add_ons = add_ons;
        }
        if input.collection.unwrap_or(false) {
            deal.delivery = None;
        } else if let Some(delivery) = input.delivery {
            deal.delivery = Some(delivery);
        }
        if let Some(warranty) = input.warranty {
            deal.warranty = Some(warranty);
        }

        // Net/VAT breakdown follows the price whenever scheme or price moved
        let (net, vat) = derive_vehicle_vat(deal.vat_scheme, deal.vehicle_price_gross);
        deal.vehicle_price_net = net;
        deal.vehicle_vat_amount = vat;

        persist_deal(&mut tx, &deal).await?;
        tx.commit().await?;

        deal.version += 1;
        let totals = calculate_totals(&deal);
        Ok(DealWithTotals { deal, totals })
    }

    /// Delete a deal. Only drafts can be deleted; the reserved vehicle
    /// goes back to available stock.
    pub async fn delete_deal(&self, dealer_id: Uuid, deal_id: Uuid) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        let deal = fetch_deal(&mut tx, dealer_id, deal_id).await?;

        if deal.status != DealStatus::Draft {
            return Err(AppError::InvalidStateTransition(format!(
                "Only draft deals can be deleted, this deal is {}",
                deal.status
            )));
        }

        sqlx::query("DELETE FROM deals WHERE id = $1 AND dealer_id = $2")
            .bind(deal_id)
            .bind(dealer_id)
            .execute(&mut *tx)
            .await?;

        StockService::set_status(&mut tx, dealer_id, deal.vehicle_id, VehicleStatus::Available)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Take a deposit. Valid from Draft (first deposit) and DepositTaken
    /// (additional deposits). Appends a Deposit payment and issues or
    /// refreshes the deposit receipt in the same unit of work.
    pub async fn take_deposit(
        &self,
        dealer_id: Uuid,
        deal_id: Uuid,
        input: TakeDepositInput,
    ) -> AppResult<TakeDepositOutcome> {
        let method = parse_method(&input.method)?;
        validate_positive_amount(input.amount).map_err(|msg| AppError::Validation {
            field: "amount".to_string(),
            message: msg.to_string(),
        })?;

        let mut tx = self.db.begin().await?;
        let mut deal = fetch_deal(&mut tx, dealer_id, deal_id).await?;

        if !matches!(deal.status, DealStatus::Draft | DealStatus::DepositTaken) {
            return Err(AppError::InvalidStateTransition(format!(
                "Cannot take a deposit while the deal is {}",
                deal.status
            )));
        }
        require_customer(&deal)?;
        require_positive_price(&deal)?;

        let payment = Payment {
            id: Uuid::new_v4(),
            payment_type: PaymentType::Deposit,
            amount: input.amount,
            method,
            paid_at: Utc::now(),
            reference: input.reference,
            notes: input.notes,
            is_refunded: false,
            idempotency_key: None,
        };
        deal.payments.push(payment.clone());
        if deal.deposit_taken_at.is_none() {
            deal.deposit_taken_at = Some(Utc::now());
        }
        deal.status = DealStatus::DepositTaken;

        persist_deal(&mut tx, &deal).await?;

        let receipt = if input.generate_receipt {
            Some(DocumentService::regenerate_deposit_receipt(&mut tx, dealer_id, &deal).await?)
        } else {
            None
        };

        tx.commit().await?;
        deal.version += 1;

        tracing::info!(deal_number = %deal.deal_number, amount = %payment.amount, "Deposit taken");
        let totals = calculate_totals(&deal);
        Ok(TakeDepositOutcome {
            deal,
            payment,
            receipt,
            totals,
        })
    }

    /// Generate the invoice. Freezes a snapshot of the current figures
    /// under a fresh invoice number and moves the deal to Invoiced.
    pub async fn generate_invoice(
        &self,
        dealer_id: Uuid,
        deal_id: Uuid,
        input: GenerateInvoiceInput,
    ) -> AppResult<GenerateInvoiceOutcome> {
        let (payment_method, finance_company_id) = parse_invoice_confirmation(&input)?;

        let mut tx = self.db.begin().await?;
        let mut deal = fetch_deal(&mut tx, dealer_id, deal_id).await?;

        if !matches!(deal.status, DealStatus::Draft | DealStatus::DepositTaken) {
            return Err(AppError::InvalidStateTransition(format!(
                "Cannot invoice a deal that is {}",
                deal.status
            )));
        }
        require_customer(&deal)?;
        require_positive_price(&deal)?;
        if deal.vat_scheme.is_none() {
            return Err(AppError::Validation {
                field: "vat_scheme".to_string(),
                message: "VAT scheme must be set before invoicing".to_string(),
            });
        }
        if deal.sale_type.is_none() {
            return Err(AppError::Validation {
                field: "sale_type".to_string(),
                message: "Sale type must be set before invoicing".to_string(),
            });
        }

        if payment_method.is_some() {
            deal.payment_method = payment_method;
        }
        if finance_company_id.is_some() {
            deal.finance_company_id = finance_company_id;
        }
        deal.status = DealStatus::Invoiced;
        deal.invoiced_at = Some(Utc::now());
        persist_deal(&mut tx, &deal).await?;

        let totals = calculate_totals(&deal);
        let snapshot = build_snapshot(&deal, &totals, None);
        let invoice =
            DocumentService::issue(&mut tx, dealer_id, deal.id, DocumentType::Invoice, &snapshot)
                .await?;

        tx.commit().await?;
        deal.version += 1;

        tracing::info!(
            deal_number = %deal.deal_number,
            invoice_number = %invoice.document_number,
            "Invoice generated"
        );
        Ok(GenerateInvoiceOutcome {
            deal,
            invoice,
            totals,
        })
    }

    /// Void the current invoice. The document keeps its number forever;
    /// the deal drops back to DepositTaken so a corrected invoice can be
    /// issued under a fresh number.
    pub async fn void_invoice(
        &self,
        dealer_id: Uuid,
        deal_id: Uuid,
        reason: &str,
    ) -> AppResult<Deal> {
        if reason.trim().is_empty() {
            return Err(AppError::Validation {
                field: "reason".to_string(),
                message: "A void reason is required".to_string(),
            });
        }

        let mut tx = self.db.begin().await?;
        let mut deal = fetch_deal(&mut tx, dealer_id, deal_id).await?;

        if deal.status != DealStatus::Invoiced {
            return Err(AppError::InvalidStateTransition(format!(
                "No invoice to void while the deal is {}",
                deal.status
            )));
        }

        let invoice =
            DocumentService::latest_issued(&mut tx, dealer_id, deal_id, DocumentType::Invoice)
                .await?
                .ok_or_else(|| AppError::NotFound("Invoice".to_string()))?;

        DocumentService::void(&mut tx, dealer_id, invoice.id, reason).await?;

        deal.status = DealStatus::DepositTaken;
        deal.invoiced_at = None;
        persist_deal(&mut tx, &deal).await?;

        tx.commit().await?;
        deal.version += 1;

        tracing::info!(
            deal_number = %deal.deal_number,
            invoice_number = %invoice.document_number,
            "Invoice voided"
        );
        Ok(deal)
    }

    /// Mark the vehicle as handed over. Requires explicit customer
    /// confirmation.
    pub async fn mark_delivered(
        &self,
        dealer_id: Uuid,
        deal_id: Uuid,
        input: MarkDeliveredInput,
    ) -> AppResult<Deal> {
        if !input.customer_confirmed {
            return Err(AppError::Precondition {
                code: "CUSTOMER_CONFIRMATION_REQUIRED",
                message: "Customer confirmation is required to mark the deal delivered".to_string(),
                details: serde_json::json!({ "required_flag": "customer_confirmed" }),
            });
        }

        let mut tx = self.db.begin().await?;
        let mut deal = fetch_deal(&mut tx, dealer_id, deal_id).await?;

        if deal.status != DealStatus::Invoiced {
            return Err(AppError::InvalidStateTransition(format!(
                "Cannot mark a {} deal as delivered",
                deal.status
            )));
        }

        deal.status = DealStatus::Delivered;
        deal.delivered_at = Some(Utc::now());
        persist_deal(&mut tx, &deal).await?;
        tx.commit().await?;
        deal.version += 1;

        Ok(deal)
    }

    /// Complete the deal. A financed part-exchange without settlement in
    /// writing blocks completion unless the caller explicitly confirms.
    /// The sold vehicle leaves stock and trade-ins become stock units.
    pub async fn mark_completed(
        &self,
        dealer_id: Uuid,
        deal_id: Uuid,
        input: MarkCompletedInput,
    ) -> AppResult<Deal> {
        let mut tx = self.db.begin().await?;
        let mut deal = fetch_deal(&mut tx, dealer_id, deal_id).await?;

        if deal.status != DealStatus::Delivered {
            return Err(AppError::InvalidStateTransition(format!(
                "Cannot complete a {} deal",
                deal.status
            )));
        }

        require_settlement_confirmed(&deal.part_exchanges, input.confirm_without_settlement)?;

        // Trade-ins enter the stock book as part of completion
        for i in 0..deal.part_exchanges.len() {
            if deal.part_exchanges[i].converted_vehicle_id.is_none() {
                let px = deal.part_exchanges[i].clone();
                let vehicle_id =
                    StockService::create_from_part_exchange(&mut tx, dealer_id, deal.id, &px)
                        .await?;
                deal.part_exchanges[i].converted_vehicle_id = Some(vehicle_id);
            }
        }

        StockService::set_status(&mut tx, dealer_id, deal.vehicle_id, VehicleStatus::Sold).await?;

        deal.status = DealStatus::Completed;
        deal.completed_at = Some(Utc::now());
        persist_deal(&mut tx, &deal).await?;
        tx.commit().await?;
        deal.version += 1;

        tracing::info!(deal_number = %deal.deal_number, "Deal completed");
        Ok(deal)
    }

    /// Cancel a deal from any non-cancelled status. Cancelling a completed
    /// deal demands a written reason; earlier statuses only need the
    /// confirmation flag. Stock restoration and trade-in cleanup run as
    /// compensating actions after the cancellation commits: their failures
    /// are reported as warnings for manual follow-up, never hidden.
    pub async fn cancel(
        &self,
        dealer_id: Uuid,
        deal_id: Uuid,
        input: CancelDealInput,
    ) -> AppResult<CancelOutcome> {
        let mut tx = self.db.begin().await?;
        let mut deal = fetch_deal(&mut tx, dealer_id, deal_id).await?;

        if deal.status == DealStatus::Cancelled {
            return Err(AppError::InvalidStateTransition(
                "Deal is already cancelled".to_string(),
            ));
        }

        let reason = validate_cancellation(deal.status, input.reason.as_deref(), input.confirm)?;

        deal.status = DealStatus::Cancelled;
        deal.cancelled_at = Some(Utc::now());
        deal.cancel_reason = reason;
        persist_deal(&mut tx, &deal).await?;
        tx.commit().await?;
        deal.version += 1;

        let mut warnings = Vec::new();
        let stock = StockService::new(self.db.clone());

        if let Err(e) = stock.restore_to_stock(dealer_id, deal.vehicle_id).await {
            tracing::error!(deal_number = %deal.deal_number, error = %e, "Stock restore failed");
            warnings.push(format!(
                "Vehicle {} could not be restored to stock: {}",
                deal.vehicle_id, e
            ));
        }

        for px in &deal.part_exchanges {
            if let Some(vehicle_id) = px.converted_vehicle_id {
                match stock.delete_if_unsold(dealer_id, vehicle_id).await {
                    Ok(true) => {}
                    Ok(false) => warnings.push(format!(
                        "Trade-in {} was already sold on and stays in the stock book",
                        px.vrm
                    )),
                    Err(e) => {
                        tracing::error!(vrm = %px.vrm, error = %e, "Trade-in cleanup failed");
                        warnings.push(format!("Trade-in {} could not be removed: {}", px.vrm, e));
                    }
                }
            }
        }

        tracing::info!(deal_number = %deal.deal_number, "Deal cancelled");
        Ok(CancelOutcome { deal, warnings })
    }

    /// Reissue the deposit receipt with current figures, keeping its
    /// document number.
    pub async fn regenerate_receipt(
        &self,
        dealer_id: Uuid,
        deal_id: Uuid,
    ) -> AppResult<SalesDocument> {
        let mut tx = self.db.begin().await?;
        let deal = fetch_deal(&mut tx, dealer_id, deal_id).await?;

        if deal.status == DealStatus::Cancelled {
            return Err(AppError::InvalidStateTransition(
                "Cannot reissue documents for a cancelled deal".to_string(),
            ));
        }

        let receipt =
            DocumentService::regenerate_deposit_receipt(&mut tx, dealer_id, &deal).await?;
        tx.commit().await?;
        Ok(receipt)
    }
}

// ============================================================================
// Guard helpers
// ============================================================================

fn require_customer(deal: &Deal) -> AppResult<()> {
    if deal.customer_id.is_none() {
        return Err(AppError::Validation {
            field: "customer_id".to_string(),
            message: "A customer must be attached to the deal".to_string(),
        });
    }
    Ok(())
}

fn require_positive_price(deal: &Deal) -> AppResult<()> {
    if deal.vehicle_price_gross <= Decimal::ZERO {
        return Err(AppError::Validation {
            field: "vehicle_price_gross".to_string(),
            message: "Vehicle price must be greater than zero".to_string(),
        });
    }
    Ok(())
}

pub(crate) fn parse_method(method: &str) -> AppResult<PaymentMethod> {
    PaymentMethod::from_str(method).ok_or_else(|| AppError::Validation {
        field: "method".to_string(),
        message: format!("Unknown payment method: {}", method),
    })
}

/// Completion guard: every financed trade-in needs its settlement figure
/// confirmed in writing, or an explicit override from the caller. The
/// error names the offending VRMs so the client can prompt per vehicle.
fn require_settlement_confirmed(
    part_exchanges: &[PartExchange],
    confirm_without_settlement: bool,
) -> AppResult<()> {
    let unsettled: Vec<String> = part_exchanges
        .iter()
        .filter(|px| px.has_finance && !px.has_settlement_in_writing)
        .map(|px| px.vrm.clone())
        .collect();
    if !unsettled.is_empty() && !confirm_without_settlement {
        return Err(AppError::Precondition {
            code: SETTLEMENT_CONFIRMATION_REQUIRED,
            message: "Financed part-exchange has no settlement in writing".to_string(),
            details: serde_json::json!({
                "part_exchange_vrms": unsettled,
                "required_flag": "confirm_without_settlement",
            }),
        });
    }
    Ok(())
}

/// Cancellation guard. A completed deal can only be unwound with a
/// written reason; earlier statuses accept either a reason or the
/// confirmation flag. Returns the trimmed reason to store.
fn validate_cancellation(
    status: DealStatus,
    reason: Option<&str>,
    confirm: bool,
) -> AppResult<Option<String>> {
    let reason = reason.map(str::trim).unwrap_or("");
    let was_completed = status == DealStatus::Completed;
    if was_completed && reason.is_empty() {
        return Err(AppError::Validation {
            field: "reason".to_string(),
            message: "Cancelling a completed deal requires a reason".to_string(),
        });
    }
    if !was_completed && !confirm && reason.is_empty() {
        return Err(AppError::Validation {
            field: "confirm".to_string(),
            message: "Cancellation must be confirmed".to_string(),
        });
    }
    Ok(if reason.is_empty() {
        None
    } else {
        Some(reason.to_string())
    })
}

/// Resolve the settlement confirmation supplied at invoicing. A finance
/// method must name the lender paying the balance.
fn parse_invoice_confirmation(
    input: &GenerateInvoiceInput,
) -> AppResult<(Option<PaymentMethod>, Option<Uuid>)> {
    let method = match input.payment_method.as_deref() {
        Some(m) => Some(parse_method(m)?),
        None => None,
    };
    if method == Some(PaymentMethod::Finance) && input.finance_company_id.is_none() {
        return Err(AppError::Validation {
            field: "finance_company_id".to_string(),
            message: "A finance sale needs its finance company".to_string(),
        });
    }
    Ok((method, input.finance_company_id))
}

/// Derive the stored net/VAT breakdown for the vehicle price. Only
/// VAT-qualifying deals itemize; everything else stores gross only.
fn derive_vehicle_vat(
    vat_scheme: Option<VatScheme>,
    price_gross: Decimal,
) -> (Option<Decimal>, Option<Decimal>) {
    match vat_scheme {
        Some(VatScheme::VatQualifying) => {
            let rate = shared::money::default_vat_rate();
            (
                Some(net_from_gross(price_gross, rate)),
                Some(vat_from_gross(price_gross, rate)),
            )
        }
        _ => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_vehicle_vat_qualifying() {
        let (net, vat) = derive_vehicle_vat(
            Some(VatScheme::VatQualifying),
            Decimal::from(12000),
        );
        assert_eq!(net, Some(Decimal::new(1000000, 2)));
        assert_eq!(vat, Some(Decimal::new(200000, 2)));
    }

    #[test]
    fn test_derive_vehicle_vat_margin() {
        assert_eq!(
            derive_vehicle_vat(Some(VatScheme::Margin), Decimal::from(12000)),
            (None, None)
        );
        assert_eq!(derive_vehicle_vat(None, Decimal::from(12000)), (None, None));
    }

    #[test]
    fn test_parse_method() {
        assert!(parse_method("bank_transfer").is_ok());
        assert!(parse_method("bitcoin").is_err());
    }

    fn trade_in(vrm: &str, has_finance: bool, settled_in_writing: bool) -> PartExchange {
        PartExchange {
            vrm: vrm.to_string(),
            make: None,
            model: None,
            year: None,
            mileage: None,
            allowance: Decimal::from(3000),
            settlement: Decimal::ZERO,
            vat_qualifying: false,
            has_finance,
            finance_company_id: None,
            has_settlement_in_writing: settled_in_writing,
            converted_vehicle_id: None,
        }
    }

    #[test]
    fn test_settlement_guard_blocks_unsettled_finance() {
        let pxs = vec![trade_in("AB12CDE", true, false)];
        let err = require_settlement_confirmed(&pxs, false).unwrap_err();
        match err {
            AppError::Precondition { code, details, .. } => {
                assert_eq!(code, SETTLEMENT_CONFIRMATION_REQUIRED);
                assert_eq!(details["part_exchange_vrms"][0], "AB12CDE");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_settlement_guard_override_and_clean_paths() {
        let unsettled = vec![trade_in("AB12CDE", true, false)];
        assert!(require_settlement_confirmed(&unsettled, true).is_ok());

        let settled = vec![trade_in("AB12CDE", true, true)];
        assert!(require_settlement_confirmed(&settled, false).is_ok());

        let cash = vec![trade_in("AB12CDE", false, false)];
        assert!(require_settlement_confirmed(&cash, false).is_ok());
    }

    #[test]
    fn test_completed_cancel_requires_reason() {
        assert!(validate_cancellation(DealStatus::Completed, None, true).is_err());
        assert!(validate_cancellation(DealStatus::Completed, Some("  "), true).is_err());
        assert_eq!(
            validate_cancellation(DealStatus::Completed, Some("customer returned"), false)
                .unwrap(),
            Some("customer returned".to_string())
        );
    }

    #[test]
    fn test_earlier_cancel_needs_confirmation_or_reason() {
        assert!(validate_cancellation(DealStatus::Draft, None, false).is_err());
        assert_eq!(validate_cancellation(DealStatus::Draft, None, true).unwrap(), None);
        assert_eq!(
            validate_cancellation(DealStatus::Invoiced, Some("wrong vehicle"), false).unwrap(),
            Some("wrong vehicle".to_string())
        );
    }

    #[test]
    fn test_invoice_confirmation_finance_needs_lender() {
        let input = GenerateInvoiceInput {
            payment_method: Some("finance".to_string()),
            finance_company_id: None,
        };
        assert!(parse_invoice_confirmation(&input).is_err());

        let input = GenerateInvoiceInput {
            payment_method: Some("finance".to_string()),
            finance_company_id: Some(Uuid::new_v4()),
        };
        let (method, company) = parse_invoice_confirmation(&input).unwrap();
        assert_eq!(method, Some(PaymentMethod::Finance));
        assert!(company.is_some());
    }

    #[test]
    fn test_invoice_confirmation_optional() {
        let (method, company) =
            parse_invoice_confirmation(&GenerateInvoiceInput::default()).unwrap();
        assert_eq!(method, None);
        assert_eq!(company, None);
    }
}
