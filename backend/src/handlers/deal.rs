//! Deal lifecycle HTTP handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use shared::types::Pagination;
use uuid::Uuid;

use crate::middleware::CurrentUser;
use crate::services::deal::{
    CancelDealInput, CreateDealInput, DealService, GenerateInvoiceInput, MarkCompletedInput,
    MarkDeliveredInput, TakeDepositInput, UpdateDealInput,
};
use crate::AppState;

/// List deals for the current dealer, paginated
pub async fn list_deals(
    State(state): State<AppState>,
    current_user: CurrentUser,
    pagination: Option<Query<Pagination>>,
) -> impl IntoResponse {
    let service = DealService::new(state.db.clone());
    let pagination = pagination.map(|Query(p)| p).unwrap_or_default();

    match service.list_deals(current_user.0.dealer_id, pagination).await {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Create a new deal
pub async fn create_deal(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreateDealInput>,
) -> impl IntoResponse {
    let service = DealService::new(state.db.clone());

    match service.create_deal(current_user.0.dealer_id, input).await {
        Ok(deal) => (StatusCode::CREATED, Json(deal)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Get a deal with its computed totals
pub async fn get_deal(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(deal_id): Path<Uuid>,
) -> impl IntoResponse {
    let service = DealService::new(state.db.clone());

    match service.get_deal(current_user.0.dealer_id, deal_id).await {
        Ok(deal) => (StatusCode::OK, Json(deal)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Update an editable deal
pub async fn update_deal(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(deal_id): Path<Uuid>,
    Json(input): Json<UpdateDealInput>,
) -> impl IntoResponse {
    let service = DealService::new(state.db.clone());

    match service
        .update_deal(current_user.0.dealer_id, deal_id, input)
        .await
    {
        Ok(deal) => (StatusCode::OK, Json(deal)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Delete a draft deal
pub async fn delete_deal(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(deal_id): Path<Uuid>,
) -> impl IntoResponse {
    let service = DealService::new(state.db.clone());

    match service.delete_deal(current_user.0.dealer_id, deal_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

/// Take a deposit against a deal
pub async fn take_deposit(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(deal_id): Path<Uuid>,
    Json(input): Json<TakeDepositInput>,
) -> impl IntoResponse {
    let service = DealService::new(state.db.clone());

    match service
        .take_deposit(current_user.0.dealer_id, deal_id, input)
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Generate the invoice for a deal
pub async fn generate_invoice(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(deal_id): Path<Uuid>,
    Json(input): Json<GenerateInvoiceInput>,
) -> impl IntoResponse {
    let service = DealService::new(state.db.clone());

    match service
        .generate_invoice(current_user.0.dealer_id, deal_id, input)
        .await
    {
        Ok(outcome) => (StatusCode::CREATED, Json(outcome)).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
pub struct VoidInvoiceRequest {
    pub reason: String,
}

/// Void the current invoice
pub async fn void_invoice(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(deal_id): Path<Uuid>,
    Json(body): Json<VoidInvoiceRequest>,
) -> impl IntoResponse {
    let service = DealService::new(state.db.clone());

    match service
        .void_invoice(current_user.0.dealer_id, deal_id, &body.reason)
        .await
    {
        Ok(deal) => (StatusCode::OK, Json(deal)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Mark the vehicle as delivered
pub async fn mark_delivered(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(deal_id): Path<Uuid>,
    Json(input): Json<MarkDeliveredInput>,
) -> impl IntoResponse {
    let service = DealService::new(state.db.clone());

    match service
        .mark_delivered(current_user.0.dealer_id, deal_id, input)
        .await
    {
        Ok(deal) => (StatusCode::OK, Json(deal)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Complete a delivered deal
pub async fn mark_completed(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(deal_id): Path<Uuid>,
    Json(input): Json<MarkCompletedInput>,
) -> impl IntoResponse {
    let service = DealService::new(state.db.clone());

    match service
        .mark_completed(current_user.0.dealer_id, deal_id, input)
        .await
    {
        Ok(deal) => (StatusCode::OK, Json(deal)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Cancel a deal
pub async fn cancel_deal(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(deal_id): Path<Uuid>,
    Json(input): Json<CancelDealInput>,
) -> impl IntoResponse {
    let service = DealService::new(state.db.clone());

    match service.cancel(current_user.0.dealer_id, deal_id, input).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Reissue the deposit receipt with current figures
pub async fn regenerate_receipt(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(deal_id): Path<Uuid>,
) -> impl IntoResponse {
    let service = DealService::new(state.db.clone());

    match service
        .regenerate_receipt(current_user.0.dealer_id, deal_id)
        .await
    {
        Ok(receipt) => (StatusCode::OK, Json(receipt)).into_response(),
        Err(e) => e.into_response(),
    }
}
