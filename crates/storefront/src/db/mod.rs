//! Database operations for the storefront `PostgreSQL`.
//!
//! # Schema: `store`
//!
//! ## Tables
//!
//! - `products`, `product_variants`, `categories` - Catalog (read-only here)
//! - `stock_units` - Authoritative per-SKU quantities, written only by [`stock::StockLedger`]
//! - `cart_items` - Shopping cart lines
//! - `coupons`, `coupon_usages` - Discount codes and their redemptions
//! - `orders`, `order_items` - Orders and their immutable item snapshots
//! - `refunds`, `refund_items` - Refund, return, and exchange requests
//! - `shipments`, `notifications`, `stock_alerts` - Post-commit side channels
//!
//! # Transactions
//!
//! Functions that participate in a caller's transaction take
//! `&mut PgConnection`; pass `&mut *tx` from a `sqlx::Transaction`.
//! Dropping a transaction without committing rolls it back.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/storefront/migrations/` and run via:
//! ```bash
//! cargo run -p stockroom-cli -- migrate
//! ```

pub mod alerts;
pub mod cart;
pub mod coupons;
pub mod notifications;
pub mod orders;
pub mod patch;
pub mod refunds;
pub mod shipments;
pub mod stock;

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use patch::{Patch, PatchField};
pub use stock::{LedgerError, StockLedger, StockLevel};

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., unique order number).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

impl RepositoryError {
    /// Whether the underlying database error is a unique-constraint violation.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::Database(sqlx::Error::Database(db_err)) if db_err.is_unique_violation())
    }
}

/// SQL predicate for rows a shopper may see: active and not soft-deleted.
///
/// Every read of a product, variant, category, or coupon goes through this
/// predicate so the soft-delete rules cannot drift between queries. Expands
/// to a string literal, so it composes with `concat!`.
///
/// ```rust,ignore
/// concat!("SELECT id FROM store.products p WHERE ", visible!("p"))
/// ```
macro_rules! visible {
    ($alias:literal) => {
        concat!("(", $alias, ".is_active AND ", $alias, ".deleted_at IS NULL)")
    };
}

pub(crate) use visible;

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Run the storefront migrations embedded at compile time.
///
/// # Errors
///
/// Returns `MigrateError` if any migration fails to apply.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_visible_predicate_expands_to_literal() {
        const SQL: &str = concat!("WHERE ", visible!("p"));
        assert_eq!(SQL, "WHERE (p.is_active AND p.deleted_at IS NULL)");
    }
}
