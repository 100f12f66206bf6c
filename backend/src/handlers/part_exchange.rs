//! Part-exchange HTTP handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::middleware::CurrentUser;
use crate::services::part_exchange::{PartExchangeInput, PartExchangeService};
use crate::AppState;

/// Add a part-exchange to a deal
pub async fn add_part_exchange(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(deal_id): Path<Uuid>,
    Json(input): Json<PartExchangeInput>,
) -> impl IntoResponse {
    let service = PartExchangeService::new(state.db.clone());

    match service.add(current_user.0.dealer_id, deal_id, input).await {
        Ok(deal) => (StatusCode::CREATED, Json(deal)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Update a part-exchange, addressed by its array position
pub async fn update_part_exchange(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((deal_id, index)): Path<(Uuid, usize)>,
    Json(input): Json<PartExchangeInput>,
) -> impl IntoResponse {
    let service = PartExchangeService::new(state.db.clone());

    match service
        .update(current_user.0.dealer_id, deal_id, index, input)
        .await
    {
        Ok(deal) => (StatusCode::OK, Json(deal)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Remove a part-exchange from a deal
pub async fn remove_part_exchange(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((deal_id, index)): Path<(Uuid, usize)>,
) -> impl IntoResponse {
    let service = PartExchangeService::new(state.db.clone());

    match service.remove(current_user.0.dealer_id, deal_id, index).await {
        Ok(deal) => (StatusCode::OK, Json(deal)).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
pub struct SettlementConfirmationRequest {
    pub confirmed: bool,
}

/// Record whether the finance settlement is confirmed in writing
pub async fn set_settlement_in_writing(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((deal_id, index)): Path<(Uuid, usize)>,
    Json(body): Json<SettlementConfirmationRequest>,
) -> impl IntoResponse {
    let service = PartExchangeService::new(state.db.clone());

    match service
        .set_settlement_in_writing(current_user.0.dealer_id, deal_id, index, body.confirmed)
        .await
    {
        Ok(deal) => (StatusCode::OK, Json(deal)).into_response(),
        Err(e) => e.into_response(),
    }
}
