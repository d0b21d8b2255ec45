//! Refund, return and exchange models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockroom_core::{
    OrderId, OrderItemId, RefundId, RefundItemId, RefundStatus, RefundType, UserId,
};

/// Refund header.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Refund {
    pub id: RefundId,
    pub refund_number: String,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub refund_type: RefundType,
    pub reason: String,
    pub status: RefundStatus,
    pub refund_amount: Decimal,
    pub admin_note: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub restocked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One refunded order line.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RefundItem {
    pub id: RefundItemId,
    pub refund_id: RefundId,
    pub order_item_id: OrderItemId,
    pub quantity: i32,
    pub refund_amount: Decimal,
}

/// A refund with its items.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundWithItems {
    #[serde(flatten)]
    pub refund: Refund,
    pub items: Vec<RefundItem>,
}

/// One requested `(order item, quantity)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundItemRequest {
    pub order_item_id: OrderItemId,
    pub quantity: i32,
}

/// Refund input from the customer.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    #[serde(default)]
    pub refund_type: RefundType,
    pub reason: String,
    pub items: Vec<RefundItemRequest>,
}
