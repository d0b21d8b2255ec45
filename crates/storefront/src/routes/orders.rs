//! Customer order routes.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::instrument;

use stockroom_core::OrderId;

use crate::error::{Result, add_breadcrumb};
use crate::middleware::RequireUser;
use crate::models::{CheckoutReceipt, CheckoutRequest, Order, OrderWithItems, RefundRequest, RefundWithItems};
use crate::services::{CancellationService, CheckoutService, OrderService, RefundService};
use crate::state::AppState;

/// Optional reason supplied with a cancellation.
#[derive(Debug, Default, Deserialize)]
pub struct CancelBody {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Place an order from the caller's cart.
#[instrument(skip(state, request))]
pub async fn create(
    State(state): State<AppState>,
    RequireUser(user_id): RequireUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutReceipt>)> {
    let receipt = CheckoutService::new(
        state.pool(),
        &state.config().checkout,
        state.gateway(),
        state.events(),
    )
    .create_order(user_id, &request)
    .await?;

    add_breadcrumb(
        "checkout",
        "Order placed",
        Some(&[("order_number", receipt.order.order.order_number.as_str())]),
    );
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// Get one of the caller's orders.
#[instrument(skip(state))]
pub async fn show(
    State(state): State<AppState>,
    RequireUser(user_id): RequireUser,
    Path(order_id): Path<OrderId>,
) -> Result<Json<OrderWithItems>> {
    let order = OrderService::new(state.pool(), state.events())
        .get_for_user(order_id, user_id)
        .await?;
    Ok(Json(order))
}

/// Cancel one of the caller's orders.
#[instrument(skip(state, body))]
pub async fn cancel(
    State(state): State<AppState>,
    RequireUser(user_id): RequireUser,
    Path(order_id): Path<OrderId>,
    Json(body): Json<CancelBody>,
) -> Result<Json<Order>> {
    let order = CancellationService::new(state.pool(), state.events())
        .cancel(order_id, user_id, body.reason)
        .await?;
    Ok(Json(order))
}

/// Request a refund, return or exchange for items of an order.
#[instrument(skip(state, request))]
pub async fn request_refund(
    State(state): State<AppState>,
    RequireUser(user_id): RequireUser,
    Path(order_id): Path<OrderId>,
    Json(request): Json<RefundRequest>,
) -> Result<(StatusCode, Json<RefundWithItems>)> {
    let refund = RefundService::new(state.pool(), &state.config().checkout, state.events())
        .create(order_id, user_id, &request)
        .await?;
    Ok((StatusCode::CREATED, Json(refund)))
}
