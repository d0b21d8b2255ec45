//! Refund repository.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::Postgres;
use sqlx::query_builder::Separated;
use sqlx::{PgConnection, PgPool};

use stockroom_core::{
    OrderId, OrderItemId, ProductId, RefundId, RefundStatus, RefundType, SkuKey, UserId, VariantId,
};

use super::{Patch, PatchField, RepositoryError};
use crate::models::{Refund, RefundItem, RefundWithItems};

/// Partial unique index allowing one in-flight refund per order.
pub const ONE_IN_FLIGHT_INDEX: &str = "idx_refunds_one_in_flight";

macro_rules! refund_columns {
    () => {
        "id, refund_number, order_id, user_id, refund_type, reason, status, refund_amount, \
         admin_note, processed_at, completed_at, restocked_at, created_at, updated_at"
    };
}

/// Refund header as validated by the refund service.
#[derive(Debug)]
pub struct NewRefund<'a> {
    pub refund_number: &'a str,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub refund_type: RefundType,
    pub reason: &'a str,
    pub refund_amount: Decimal,
}

/// Updatable refund columns.
#[derive(Debug)]
pub enum RefundField {
    Status(RefundStatus),
    AdminNote(Option<String>),
    ProcessedAt(DateTime<Utc>),
    CompletedAt(DateTime<Utc>),
    RestockedAt(DateTime<Utc>),
}

impl PatchField for RefundField {
    fn column(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::AdminNote(_) => "admin_note",
            Self::ProcessedAt(_) => "processed_at",
            Self::CompletedAt(_) => "completed_at",
            Self::RestockedAt(_) => "restocked_at",
        }
    }

    fn push(self, set: &mut Separated<'_, 'static, Postgres, &'static str>) {
        set.push(self.column()).push_unseparated(" = ");
        match self {
            Self::Status(v) => set.push_bind_unseparated(v),
            Self::AdminNote(v) => set.push_bind_unseparated(v),
            Self::ProcessedAt(v) | Self::CompletedAt(v) | Self::RestockedAt(v) => {
                set.push_bind_unseparated(v)
            }
        };
    }
}

/// Start a patch against `store.refunds`.
#[must_use]
pub const fn patch() -> Patch<RefundField> {
    Patch::new("store.refunds")
}

/// Insert a pending refund.
///
/// # Errors
///
/// Returns `RepositoryError::Conflict` naming the violated index when the
/// order already has an in-flight refund ([`ONE_IN_FLIGHT_INDEX`]) or the
/// refund number is taken.
/// Returns `RepositoryError::Database` for other database errors.
pub async fn insert(conn: &mut PgConnection, refund: &NewRefund<'_>) -> Result<Refund, RepositoryError> {
    sqlx::query_as::<_, Refund>(concat!(
        "INSERT INTO store.refunds (refund_number, order_id, user_id, refund_type, reason, ",
        "status, refund_amount) ",
        "VALUES ($1, $2, $3, $4, $5, 'pending', $6) ",
        "RETURNING ",
        refund_columns!(),
    ))
    .bind(refund.refund_number)
    .bind(refund.order_id)
    .bind(refund.user_id)
    .bind(refund.refund_type)
    .bind(refund.reason)
    .bind(refund.refund_amount)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        if let sqlx::Error::Database(ref db_err) = e
            && db_err.is_unique_violation()
        {
            return RepositoryError::Conflict(
                db_err.constraint().unwrap_or("refunds_refund_number_key").to_owned(),
            );
        }
        RepositoryError::Database(e)
    })
}

/// Insert one refund item.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the insert fails.
pub async fn insert_item(
    conn: &mut PgConnection,
    refund_id: RefundId,
    order_item_id: OrderItemId,
    quantity: i32,
    refund_amount: Decimal,
) -> Result<RefundItem, RepositoryError> {
    let item = sqlx::query_as::<_, RefundItem>(
        r"
        INSERT INTO store.refund_items (refund_id, order_item_id, quantity, refund_amount)
        VALUES ($1, $2, $3, $4)
        RETURNING id, refund_id, order_item_id, quantity, refund_amount
        ",
    )
    .bind(refund_id)
    .bind(order_item_id)
    .bind(quantity)
    .bind(refund_amount)
    .fetch_one(&mut *conn)
    .await?;
    Ok(item)
}

#[derive(Debug, sqlx::FromRow)]
struct RefundedRow {
    order_item_id: i32,
    quantity: i64,
}

/// Quantity per order item already claimed by refunds that still count
/// (everything except rejected and cancelled).
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn refunded_quantities(
    conn: &mut PgConnection,
    order_id: OrderId,
) -> Result<HashMap<OrderItemId, i64>, RepositoryError> {
    let rows = sqlx::query_as::<_, RefundedRow>(
        r"
        SELECT ri.order_item_id, SUM(ri.quantity)::BIGINT AS quantity
        FROM store.refund_items ri
        JOIN store.refunds r ON r.id = ri.refund_id
        WHERE r.order_id = $1 AND r.status NOT IN ('rejected', 'cancelled')
        GROUP BY ri.order_item_id
        ",
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| (OrderItemId::new(row.order_item_id), row.quantity))
        .collect())
}

/// Whether the order has a pending, approved or processing refund.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn has_in_flight(conn: &mut PgConnection, order_id: OrderId) -> Result<bool, RepositoryError> {
    let exists: bool = sqlx::query_scalar(
        r"
        SELECT EXISTS (
            SELECT 1 FROM store.refunds
            WHERE order_id = $1 AND status IN ('pending', 'approved', 'processing')
        )
        ",
    )
    .bind(order_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(exists)
}

/// Lock a refund row for the rest of the transaction.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn lock(conn: &mut PgConnection, id: RefundId) -> Result<Option<Refund>, RepositoryError> {
    let refund = sqlx::query_as::<_, Refund>(concat!(
        "SELECT ",
        refund_columns!(),
        " FROM store.refunds WHERE id = $1 FOR UPDATE",
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(refund)
}

/// Re-read a refund after patching it.
///
/// # Errors
///
/// Returns `RepositoryError::NotFound` if the refund does not exist.
pub async fn reload(conn: &mut PgConnection, id: RefundId) -> Result<Refund, RepositoryError> {
    sqlx::query_as::<_, Refund>(concat!(
        "SELECT ",
        refund_columns!(),
        " FROM store.refunds WHERE id = $1",
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(RepositoryError::NotFound)
}

/// Items of a refund.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn items(conn: &mut PgConnection, id: RefundId) -> Result<Vec<RefundItem>, RepositoryError> {
    let items = sqlx::query_as::<_, RefundItem>(
        r"
        SELECT id, refund_id, order_item_id, quantity, refund_amount
        FROM store.refund_items
        WHERE refund_id = $1
        ORDER BY id
        ",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(items)
}

#[derive(Debug, sqlx::FromRow)]
struct ReturnedUnitRow {
    product_id: i32,
    variant_id: Option<i32>,
    quantity: i32,
}

/// The stock units a refund's items came from, with the quantities returned.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the query fails.
pub async fn returned_units(
    conn: &mut PgConnection,
    id: RefundId,
) -> Result<Vec<(SkuKey, i32)>, RepositoryError> {
    let rows = sqlx::query_as::<_, ReturnedUnitRow>(
        r"
        SELECT oi.product_id, oi.variant_id, ri.quantity
        FROM store.refund_items ri
        JOIN store.order_items oi ON oi.id = ri.order_item_id
        WHERE ri.refund_id = $1
        ",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            (
                SkuKey::new(
                    ProductId::new(row.product_id),
                    row.variant_id.map(VariantId::new),
                ),
                row.quantity,
            )
        })
        .collect())
}

/// Read-side access to refunds.
pub struct RefundRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> RefundRepository<'a> {
    /// Create a new refund repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Get a refund with its items.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if a query fails.
    pub async fn get_with_items(&self, id: RefundId) -> Result<Option<RefundWithItems>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let refund = match reload(&mut conn, id).await {
            Ok(refund) => refund,
            Err(RepositoryError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        let items = items(&mut conn, id).await?;
        Ok(Some(RefundWithItems { refund, items }))
    }
}
