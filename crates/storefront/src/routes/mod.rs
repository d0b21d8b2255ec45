//! HTTP route handlers for the storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                            - Liveness
//! GET  /health/ready                      - Readiness (database reachable)
//!
//! # Customer API (x-user-id)
//! POST /api/orders                        - Place an order from the cart
//! GET  /api/orders/{id}                   - Order with items
//! POST /api/orders/{id}/cancel            - Cancel an unpaid order
//! POST /api/orders/{id}/refunds           - Request a refund, return or exchange
//! GET  /api/refunds/{id}                  - Refund with items
//! POST /api/refunds/{id}/cancel           - Withdraw a pending refund
//!
//! # Payment gateway (signed)
//! POST /api/payments/callback             - Payment outcome
//!
//! # Back office (x-admin-id)
//! POST /admin/orders/{id}/status          - Order status transition
//! POST /admin/orders/{id}/cancel          - Cancel any undelivered order
//! GET  /admin/refunds/{id}                - Refund with items
//! POST /admin/refunds/{id}/approve        - pending -> approved
//! POST /admin/refunds/{id}/reject         - pending -> rejected
//! POST /admin/refunds/{id}/process        - approved -> processing
//! POST /admin/refunds/{id}/complete       - processing -> completed
//! POST /admin/refunds/{id}/restock        - Return goods to stock
//! POST /admin/stock/receive               - Record received goods
//! ```

pub mod admin;
pub mod orders;
pub mod payments;
pub mod refunds;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};

use crate::state::AppState;

/// Create the customer API router.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", post(orders::create))
        .route("/orders/{id}", get(orders::show))
        .route("/orders/{id}/cancel", post(orders::cancel))
        .route("/orders/{id}/refunds", post(orders::request_refund))
        .route("/refunds/{id}", get(refunds::show))
        .route("/refunds/{id}/cancel", post(refunds::cancel))
        .route("/payments/callback", post(payments::callback))
}

/// Create the back-office router.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/orders/{id}/status", post(admin::update_order_status))
        .route("/orders/{id}/cancel", post(admin::cancel_order))
        .route("/refunds/{id}", get(admin::show_refund))
        .route("/refunds/{id}/approve", post(admin::approve_refund))
        .route("/refunds/{id}/reject", post(admin::reject_refund))
        .route("/refunds/{id}/process", post(admin::process_refund))
        .route("/refunds/{id}/complete", post(admin::complete_refund))
        .route("/refunds/{id}/restock", post(admin::restock_refund))
        .route("/stock/receive", post(admin::receive_stock))
}

/// Create all routes for the storefront.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .nest("/api", api_routes())
        .nest("/admin", admin_routes())
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Returns 503 Service Unavailable if the database is not reachable.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    match sqlx::query("SELECT 1").fetch_one(state.pool()).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
