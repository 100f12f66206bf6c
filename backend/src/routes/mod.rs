//! Route definitions for the Forecourt sales platform

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::{handlers, middleware::auth_middleware, AppState};

/// Create API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health check (public)
        .route("/health", get(handlers::health_check))
        // Auth routes (public)
        .nest("/auth", auth_routes())
        // Protected routes - deal lifecycle
        .nest("/deals", deal_routes())
        // Protected routes - issued documents
        .nest("/documents", document_routes())
}

/// Authentication routes (public)
fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(handlers::register))
        .route("/login", post(handlers::login))
        .route("/refresh", post(handlers::refresh))
}

/// Deal lifecycle routes (protected)
fn deal_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_deals).post(handlers::create_deal))
        .route(
            "/:deal_id",
            get(handlers::get_deal)
                .put(handlers::update_deal)
                .delete(handlers::delete_deal),
        )
        // Lifecycle transitions
        .route("/:deal_id/deposit", post(handlers::take_deposit))
        .route("/:deal_id/invoice", post(handlers::generate_invoice))
        .route("/:deal_id/invoice/void", post(handlers::void_invoice))
        .route("/:deal_id/deliver", post(handlers::mark_delivered))
        .route("/:deal_id/complete", post(handlers::mark_completed))
        .route("/:deal_id/cancel", post(handlers::cancel_deal))
        // Payments
        .route("/:deal_id/payments", post(handlers::record_balance_payment))
        // Part-exchanges
        .route("/:deal_id/part-exchanges", post(handlers::add_part_exchange))
        .route(
            "/:deal_id/part-exchanges/:index",
            put(handlers::update_part_exchange).delete(handlers::remove_part_exchange),
        )
        .route(
            "/:deal_id/part-exchanges/:index/settlement-in-writing",
            post(handlers::set_settlement_in_writing),
        )
        // Documents issued against the deal
        .route("/:deal_id/documents", get(handlers::list_deal_documents))
        .route(
            "/:deal_id/receipt/regenerate",
            post(handlers::regenerate_receipt),
        )
        .route_layer(middleware::from_fn(auth_middleware))
}

/// Document routes (protected)
fn document_routes() -> Router<AppState> {
    Router::new()
        .route("/:document_id", get(handlers::get_document))
        .route_layer(middleware::from_fn(auth_middleware))
}
