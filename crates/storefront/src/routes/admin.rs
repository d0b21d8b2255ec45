//! Back-office routes for orders, refunds and stock intake.
//!
//! Every handler requires [`RequireAdmin`]; the admin id is logged with each
//! state change.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;
use tracing::instrument;

use stockroom_core::{OrderId, OrderStatus, ProductId, RefundId, SkuKey, VariantId};

use crate::db::StockLevel;
use crate::error::Result;
use crate::middleware::RequireAdmin;
use crate::models::{Order, Refund, RefundWithItems};
use crate::routes::orders::CancelBody;
use crate::services::{CancellationService, OrderService, RefundService, StockService};
use crate::state::AppState;

/// Target status for an order.
#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: OrderStatus,
}

/// Optional note attached to a refund decision.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteBody {
    #[serde(default)]
    pub admin_note: Option<String>,
}

/// Goods received into the warehouse.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveBody {
    pub product_id: ProductId,
    #[serde(default)]
    pub variant_id: Option<VariantId>,
    pub quantity: i32,
}

/// Move an order along its state machine.
#[instrument(skip(state, body))]
pub async fn update_order_status(
    State(state): State<AppState>,
    RequireAdmin(admin_id): RequireAdmin,
    Path(order_id): Path<OrderId>,
    Json(body): Json<StatusBody>,
) -> Result<Json<Order>> {
    let order = OrderService::new(state.pool(), state.events())
        .update_status(order_id, body.status)
        .await?;
    Ok(Json(order))
}

/// Cancel any not-yet-delivered order.
#[instrument(skip(state, body))]
pub async fn cancel_order(
    State(state): State<AppState>,
    RequireAdmin(admin_id): RequireAdmin,
    Path(order_id): Path<OrderId>,
    Json(body): Json<CancelBody>,
) -> Result<Json<Order>> {
    let order = CancellationService::new(state.pool(), state.events())
        .cancel_as_admin(order_id, body.reason)
        .await?;
    Ok(Json(order))
}

fn refunds(state: &AppState) -> RefundService<'_> {
    RefundService::new(state.pool(), &state.config().checkout, state.events())
}

/// Get any refund.
#[instrument(skip(state))]
pub async fn show_refund(
    State(state): State<AppState>,
    RequireAdmin(admin_id): RequireAdmin,
    Path(refund_id): Path<RefundId>,
) -> Result<Json<RefundWithItems>> {
    Ok(Json(refunds(&state).get(refund_id).await?))
}

#[instrument(skip(state, body))]
pub async fn approve_refund(
    State(state): State<AppState>,
    RequireAdmin(admin_id): RequireAdmin,
    Path(refund_id): Path<RefundId>,
    Json(body): Json<NoteBody>,
) -> Result<Json<Refund>> {
    Ok(Json(refunds(&state).approve(refund_id, body.admin_note).await?))
}

#[instrument(skip(state, body))]
pub async fn reject_refund(
    State(state): State<AppState>,
    RequireAdmin(admin_id): RequireAdmin,
    Path(refund_id): Path<RefundId>,
    Json(body): Json<NoteBody>,
) -> Result<Json<Refund>> {
    Ok(Json(refunds(&state).reject(refund_id, body.admin_note).await?))
}

#[instrument(skip(state, body))]
pub async fn process_refund(
    State(state): State<AppState>,
    RequireAdmin(admin_id): RequireAdmin,
    Path(refund_id): Path<RefundId>,
    Json(body): Json<NoteBody>,
) -> Result<Json<Refund>> {
    Ok(Json(
        refunds(&state)
            .start_processing(refund_id, body.admin_note)
            .await?,
    ))
}

#[instrument(skip(state, body))]
pub async fn complete_refund(
    State(state): State<AppState>,
    RequireAdmin(admin_id): RequireAdmin,
    Path(refund_id): Path<RefundId>,
    Json(body): Json<NoteBody>,
) -> Result<Json<Refund>> {
    Ok(Json(refunds(&state).complete(refund_id, body.admin_note).await?))
}

/// Put a completed return's goods back into stock.
#[instrument(skip(state))]
pub async fn restock_refund(
    State(state): State<AppState>,
    RequireAdmin(admin_id): RequireAdmin,
    Path(refund_id): Path<RefundId>,
) -> Result<Json<Refund>> {
    Ok(Json(refunds(&state).restock(refund_id).await?))
}

/// Record goods received for one SKU.
#[instrument(skip(state, body))]
pub async fn receive_stock(
    State(state): State<AppState>,
    RequireAdmin(admin_id): RequireAdmin,
    Json(body): Json<ReceiveBody>,
) -> Result<Json<StockLevel>> {
    let sku = SkuKey::new(body.product_id, body.variant_id);
    let level = StockService::new(state.pool(), state.events())
        .receive(sku, body.quantity)
        .await?;
    Ok(Json(level))
}
