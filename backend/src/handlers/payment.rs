//! Payment ledger HTTP handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::middleware::CurrentUser;
use crate::services::document::DocumentService;
use crate::services::payment::{PaymentService, RecordBalancePaymentInput};
use crate::AppState;

/// Record a balance payment against a deal
pub async fn record_balance_payment(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(deal_id): Path<Uuid>,
    Json(input): Json<RecordBalancePaymentInput>,
) -> impl IntoResponse {
    let service = PaymentService::new(state.db.clone());

    match service
        .record_balance_payment(current_user.0.dealer_id, deal_id, input)
        .await
    {
        Ok(outcome) => {
            let receipt = outcome.receipt.as_ref().map(|doc| {
                serde_json::json!({
                    "id": doc.id,
                    "document_number": doc.document_number,
                    "share_url": DocumentService::share_url(
                        &state.config.documents.share_url_base,
                        doc.id,
                    ),
                })
            });
            let message = if outcome.replayed {
                "Payment already recorded"
            } else if outcome.is_full_payment {
                "Balance paid in full"
            } else {
                "Payment recorded"
            };
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "success": true,
                    "deal_id": outcome.deal.id,
                    "payment": outcome.payment,
                    "balance_before": outcome.invoice_balance_before,
                    "balance_after": outcome.invoice_balance_after,
                    "is_full_payment": outcome.is_full_payment,
                    "total_paid": outcome.deal.total_paid(),
                    "grand_total": outcome.grand_total,
                    "payment_receipt": receipt,
                    "message": message,
                })),
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}
