//! Sales document HTTP handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::middleware::CurrentUser;
use crate::services::DocumentService;
use crate::AppState;

/// List all documents issued against a deal
pub async fn list_deal_documents(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(deal_id): Path<Uuid>,
) -> impl IntoResponse {
    let service = DocumentService::new(state.db.clone());

    match service.list_for_deal(current_user.0.dealer_id, deal_id).await {
        Ok(documents) => (
            StatusCode::OK,
            Json(serde_json::json!({ "documents": documents })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Get a single document with its share link
pub async fn get_document(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(document_id): Path<Uuid>,
) -> impl IntoResponse {
    let service = DocumentService::new(state.db.clone());

    match service
        .get_document(current_user.0.dealer_id, document_id)
        .await
    {
        Ok(document) => {
            let share_url =
                DocumentService::share_url(&state.config.documents.share_url_base, document.id);
            (
                StatusCode::OK,
                Json(serde_json::json!({ "document": document, "share_url": share_url })),
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}
