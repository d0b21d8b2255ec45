//! Low-stock alert records.
//!
//! At most one open alert exists per SKU (partial unique index on
//! `resolved_at IS NULL`). An alert is opened when a unit drops to its
//! threshold and resolved once it climbs back above it.

use sqlx::PgPool;

use stockroom_core::SkuKey;

use super::RepositoryError;

/// Open an alert for the SKU unless one is already open.
///
/// Returns `true` when a new alert was recorded.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the insert fails.
pub async fn open(
    pool: &PgPool,
    sku: SkuKey,
    quantity: i32,
    threshold: i32,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        r"
        INSERT INTO store.stock_alerts (product_id, variant_id, quantity, threshold)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (product_id, COALESCE(variant_id, 0)) WHERE resolved_at IS NULL
        DO NOTHING
        ",
    )
    .bind(sku.product_id)
    .bind(sku.variant_id)
    .bind(quantity)
    .bind(threshold)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Resolve the open alert for the SKU, if any.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the update fails.
pub async fn resolve(pool: &PgPool, sku: SkuKey) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        r"
        UPDATE store.stock_alerts
        SET resolved_at = NOW()
        WHERE product_id = $1
          AND variant_id IS NOT DISTINCT FROM $2
          AND resolved_at IS NULL
        ",
    )
    .bind(sku.product_id)
    .bind(sku.variant_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}
