//! Shipment placeholders created after checkout.

use rust_decimal::Decimal;
use sqlx::PgPool;

use stockroom_core::{OrderId, ShipmentId};

use super::RepositoryError;

/// Insert a `preparing` shipment for an order.
///
/// Idempotent per order: a second call returns the existing shipment.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the insert fails.
pub async fn create_placeholder(
    pool: &PgPool,
    order_id: OrderId,
    provider: &str,
    fee: Decimal,
) -> Result<ShipmentId, RepositoryError> {
    let id: i32 = sqlx::query_scalar(
        r"
        INSERT INTO store.shipments (order_id, provider, fee)
        VALUES ($1, $2, $3)
        ON CONFLICT (order_id) DO UPDATE SET order_id = EXCLUDED.order_id
        RETURNING id
        ",
    )
    .bind(order_id)
    .bind(provider)
    .bind(fee)
    .fetch_one(pool)
    .await?;
    Ok(ShipmentId::new(id))
}
