//! Order repository.
//!
//! Orders and their items are written once, by the checkout transaction.
//! Afterwards only the status columns in [`OrderField`] change, always under
//! a row lock taken with [`lock`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::Postgres;
use sqlx::query_builder::Separated;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

use stockroom_core::{
    CouponId, OrderId, OrderStatus, PaymentMethod, PaymentStatus, SkuKey, UserId,
};

use super::{Patch, PatchField, RepositoryError};
use crate::models::{Order, OrderItem, OrderWithItems, ShippingAddress};

macro_rules! order_columns {
    () => {
        "id, order_number, user_id, subtotal, discount_amount, tax_amount, shipping_fee, \
         total_amount, coupon_id, shipping_address, shipping_provider, payment_method, \
         payment_status, order_status, transaction_id, note, cancel_reason, paid_at, \
         cancelled_at, delivered_at, created_at, updated_at"
    };
}

macro_rules! item_columns {
    () => {
        "id, order_id, product_id, variant_id, quantity, unit_price, product_name, sku, \
         variant_attributes, created_at"
    };
}

/// Order header as computed by checkout.
#[derive(Debug)]
pub struct NewOrder<'a> {
    pub order_number: &'a str,
    pub user_id: UserId,
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub shipping_fee: Decimal,
    pub total_amount: Decimal,
    pub coupon_id: Option<CouponId>,
    pub shipping_address: &'a ShippingAddress,
    pub shipping_provider: Option<&'a str>,
    pub payment_method: PaymentMethod,
    pub note: Option<&'a str>,
}

/// Item snapshot as frozen by checkout.
#[derive(Debug)]
pub struct NewOrderItem<'a> {
    pub sku: SkuKey,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub product_name: &'a str,
    pub sku_code: &'a str,
    pub variant_attributes: &'a serde_json::Value,
}

/// Updatable order columns.
#[derive(Debug)]
pub enum OrderField {
    OrderStatus(OrderStatus),
    PaymentStatus(PaymentStatus),
    TransactionId(Option<String>),
    CancelReason(Option<String>),
    PaidAt(DateTime<Utc>),
    CancelledAt(DateTime<Utc>),
    DeliveredAt(DateTime<Utc>),
}

impl PatchField for OrderField {
    fn column(&self) -> &'static str {
        match self {
            Self::OrderStatus(_) => "order_status",
            Self::PaymentStatus(_) => "payment_status",
            Self::TransactionId(_) => "transaction_id",
            Self::CancelReason(_) => "cancel_reason",
            Self::PaidAt(_) => "paid_at",
            Self::CancelledAt(_) => "cancelled_at",
            Self::DeliveredAt(_) => "delivered_at",
        }
    }

    fn push(self, set: &mut Separated<'_, 'static, Postgres, &'static str>) {
        set.push(self.column()).push_unseparated(" = ");
        match self {
            Self::OrderStatus(v) => set.push_bind_unseparated(v),
            Self::PaymentStatus(v) => set.push_bind_unseparated(v),
            Self::TransactionId(v) | Self::CancelReason(v) => set.push_bind_unseparated(v),
            Self::PaidAt(v) | Self::CancelledAt(v) | Self::DeliveredAt(v) => {
                set.push_bind_unseparated(v)
            }
        };
    }
}

/// Start a patch against `store.orders`.
#[must_use]
pub const fn patch() -> Patch<OrderField> {
    Patch::new("store.orders")
}

/// Insert the order header.
///
/// # Errors
///
/// Returns `RepositoryError::Conflict` if the order number is already taken.
/// Returns `RepositoryError::Database` for other database errors.
pub async fn insert(conn: &mut PgConnection, order: &NewOrder<'_>) -> Result<Order, RepositoryError> {
    sqlx::query_as::<_, Order>(concat!(
        "INSERT INTO store.orders (order_number, user_id, subtotal, discount_amount, tax_amount, ",
        "shipping_fee, total_amount, coupon_id, shipping_address, shipping_provider, ",
        "payment_method, payment_status, order_status, note) ",
        "VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'pending', 'pending', $12) ",
        "RETURNING ",
        order_columns!(),
    ))
    .bind(order.order_number)
    .bind(order.user_id)
    .bind(order.subtotal)
    .bind(order.discount_amount)
    .bind(order.tax_amount)
    .bind(order.shipping_fee)
    .bind(order.total_amount)
    .bind(order.coupon_id)
    .bind(Json(order.shipping_address))
    .bind(order.shipping_provider)
    .bind(order.payment_method)
    .bind(order.note)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        if let sqlx::Error::Database(ref db_err) = e
            && db_err.is_unique_violation()
        {
            return RepositoryError::Conflict(format!(
                "order number {} already exists",
                order.order_number
            ));
        }
        RepositoryError::Database(e)
    })
}

/// Insert one immutable item snapshot.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the insert fails.
pub async fn insert_item(
    conn: &mut PgConnection,
    order_id: OrderId,
    item: &NewOrderItem<'_>,
) -> Result<OrderItem, RepositoryError> {
    let item = sqlx::query_as::<_, OrderItem>(concat!(
        "INSERT INTO store.order_items (order_id, product_id, variant_id, quantity, unit_price, ",
        "product_name, sku, variant_attributes) ",
        "VALUES ($1, $2, $3, $4, $5, $6, $7, $8) ",
        "RETURNING ",
        item_columns!(),
    ))
    .bind(order_id)
    .bind(item.sku.product_id)
    .bind(item.sku.variant_id)
    .bind(item.quantity)
    .bind(item.unit_price)
    .bind(item.product_name)
    .bind(item.sku_code)
    .bind(item.variant_attributes)
    .fetch_one(&mut *conn)
    .await?;
    Ok(item)
}

/// Lock an order row for the rest of the transaction.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn lock(conn: &mut PgConnection, id: OrderId) -> Result<Option<Order>, RepositoryError> {
    let order = sqlx::query_as::<_, Order>(concat!(
        "SELECT ",
        order_columns!(),
        " FROM store.orders WHERE id = $1 FOR UPDATE",
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(order)
}

/// Lock an order row by its order number.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn lock_by_number(
    conn: &mut PgConnection,
    order_number: &str,
) -> Result<Option<Order>, RepositoryError> {
    let order = sqlx::query_as::<_, Order>(concat!(
        "SELECT ",
        order_columns!(),
        " FROM store.orders WHERE order_number = $1 FOR UPDATE",
    ))
    .bind(order_number)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(order)
}

/// Re-read an order after patching it.
///
/// # Errors
///
/// Returns `RepositoryError::NotFound` if the order does not exist.
pub async fn reload(conn: &mut PgConnection, id: OrderId) -> Result<Order, RepositoryError> {
    sqlx::query_as::<_, Order>(concat!(
        "SELECT ",
        order_columns!(),
        " FROM store.orders WHERE id = $1",
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(RepositoryError::NotFound)
}

/// Items of an order, in insertion order.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn items(conn: &mut PgConnection, id: OrderId) -> Result<Vec<OrderItem>, RepositoryError> {
    let items = sqlx::query_as::<_, OrderItem>(concat!(
        "SELECT ",
        item_columns!(),
        " FROM store.order_items WHERE order_id = $1 ORDER BY id",
    ))
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(items)
}

/// Read-side access to orders.
pub struct OrderRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> OrderRepository<'a> {
    /// Create a new order repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Get an order with its items.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if a query fails.
    pub async fn get_with_items(&self, id: OrderId) -> Result<Option<OrderWithItems>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let order = match reload(&mut conn, id).await {
            Ok(order) => order,
            Err(RepositoryError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        let items = items(&mut conn, id).await?;
        Ok(Some(OrderWithItems { order, items }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_patch_sql() {
        let builder = patch()
            .set(OrderField::OrderStatus(OrderStatus::Cancelled))
            .set(OrderField::PaymentStatus(PaymentStatus::Failed))
            .set(OrderField::CancelledAt(Utc::now()))
            .set(OrderField::CancelReason(None))
            .into_query(1, true);
        assert_eq!(
            builder.sql(),
            "UPDATE store.orders SET cancel_reason = $1, cancelled_at = $2, order_status = $3, \
             payment_status = $4, updated_at = NOW() WHERE id = $5"
        );
    }

    #[test]
    fn test_lock_sql_takes_row_lock() {
        const SQL: &str = concat!("SELECT ", order_columns!(), " FROM store.orders WHERE id = $1 FOR UPDATE");
        assert!(SQL.ends_with("FOR UPDATE"));
        assert!(SQL.contains("payment_status, order_status"));
    }
}
