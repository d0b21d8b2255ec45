//! The stock ledger: authoritative per-SKU quantities.
//!
//! This module holds the only SQL in the crate that writes
//! `store.stock_units.quantity`. Every mutation runs inside the caller's
//! transaction and takes a `FOR UPDATE` row lock that is held until that
//! transaction commits or rolls back.
//!
//! Multi-unit operations lock rows in ascending [`SkuKey`] order (see
//! [`stockroom_core::sku::canonicalize`]) so two transactions touching
//! overlapping SKU sets can never wait on each other in a cycle.

use serde::Serialize;
use sqlx::PgConnection;
use thiserror::Error;
use tracing::instrument;

use stockroom_core::sku::canonicalize;
use stockroom_core::{ProductId, SkuKey, StockUnitId, VariantId};

use super::RepositoryError;

/// Errors raised by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A unit in the batch does not have enough stock. Nothing in the batch
    /// was written.
    #[error("insufficient stock for {sku}: available {available}, requested {requested}")]
    InsufficientStock {
        sku: SkuKey,
        available: i32,
        requested: i32,
    },

    /// No stock unit exists for the SKU key.
    #[error("no stock unit for {0}")]
    UnknownSku(SkuKey),

    /// A requested quantity was zero or negative, or would overflow the unit.
    #[error("invalid quantity {quantity} for {sku}")]
    InvalidQuantity { sku: SkuKey, quantity: i32 },

    /// Repository/database error.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::Repository(RepositoryError::Database(err))
    }
}

/// Quantity of one stock unit after a ledger mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockLevel {
    pub sku: SkuKey,
    pub quantity: i32,
    pub low_stock_threshold: i32,
}

impl StockLevel {
    /// Whether the unit is at or below its alert threshold.
    #[must_use]
    pub const fn is_low(&self) -> bool {
        self.quantity <= self.low_stock_threshold
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LockedUnitRow {
    id: i32,
    quantity: i32,
    low_stock_threshold: i32,
}

#[derive(Debug, sqlx::FromRow)]
struct StockLevelRow {
    product_id: i32,
    variant_id: Option<i32>,
    quantity: i32,
    low_stock_threshold: i32,
}

impl From<StockLevelRow> for StockLevel {
    fn from(row: StockLevelRow) -> Self {
        Self {
            sku: SkuKey::new(
                ProductId::new(row.product_id),
                row.variant_id.map(VariantId::new),
            ),
            quantity: row.quantity,
            low_stock_threshold: row.low_stock_threshold,
        }
    }
}

/// A stock unit that has been locked for this transaction.
struct Locked {
    id: i32,
    sku: SkuKey,
    quantity: i32,
    low_stock_threshold: i32,
}

/// Ledger bound to one open transaction.
pub struct StockLedger<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> StockLedger<'c> {
    /// Bind the ledger to the caller's transaction (`&mut *tx`).
    #[must_use]
    pub const fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }

    /// Decrement stock for every unit in the batch.
    ///
    /// All rows are locked and verified before any row is written, so a
    /// shortfall on any unit leaves every quantity untouched. The caller's
    /// transaction must still be rolled back to release the locks (dropping
    /// it does that).
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InsufficientStock` for the first unit (in lock
    /// order) that cannot cover its request.
    /// Returns `LedgerError::UnknownSku` if a key has no stock unit.
    #[instrument(skip(self, units), fields(units = units.len()))]
    pub async fn reserve(&mut self, units: &[(SkuKey, i32)]) -> Result<Vec<StockLevel>, LedgerError> {
        let units = batch(units)?;
        let mut locked = Vec::with_capacity(units.len());

        for &(sku, requested) in &units {
            let unit = self.lock(sku).await?;
            if unit.quantity < requested {
                tracing::info!(
                    sku = %sku,
                    available = unit.quantity,
                    requested,
                    "Stock reservation refused"
                );
                return Err(LedgerError::InsufficientStock {
                    sku,
                    available: unit.quantity,
                    requested,
                });
            }
            locked.push((unit, requested));
        }

        let mut levels = Vec::with_capacity(locked.len());
        for (unit, requested) in locked {
            levels.push(self.write(&unit, unit.quantity - requested).await?);
        }
        Ok(levels)
    }

    /// Add stock back for every unit in the batch.
    ///
    /// No upper bound is enforced; callers compute how much to give back.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::UnknownSku` if a key has no stock unit.
    #[instrument(skip(self, units), fields(units = units.len()))]
    pub async fn release(&mut self, units: &[(SkuKey, i32)]) -> Result<Vec<StockLevel>, LedgerError> {
        self.increment(units).await
    }

    /// Record goods received into the warehouse.
    ///
    /// Same arithmetic as [`release`](Self::release); kept separate so intake
    /// shows up distinctly in the logs.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::UnknownSku` if a key has no stock unit.
    #[instrument(skip(self, units), fields(units = units.len()))]
    pub async fn receive(&mut self, units: &[(SkuKey, i32)]) -> Result<Vec<StockLevel>, LedgerError> {
        let levels = self.increment(units).await?;
        for level in &levels {
            tracing::info!(sku = %level.sku, quantity = level.quantity, "Stock received");
        }
        Ok(levels)
    }

    /// Create the stock unit for a SKU with its opening quantity.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` (wrapped) if the SKU already has a unit.
    /// Returns `LedgerError::InvalidQuantity` for a negative opening quantity.
    pub async fn register(
        &mut self,
        sku: SkuKey,
        quantity: i32,
        low_stock_threshold: i32,
    ) -> Result<StockUnitId, LedgerError> {
        if quantity < 0 || low_stock_threshold < 0 {
            return Err(LedgerError::InvalidQuantity { sku, quantity });
        }

        let id: i32 = sqlx::query_scalar(
            r"
            INSERT INTO store.stock_units (product_id, variant_id, quantity, low_stock_threshold)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            ",
        )
        .bind(sku.product_id)
        .bind(sku.variant_id)
        .bind(quantity)
        .bind(low_stock_threshold)
        .fetch_one(&mut *self.conn)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return RepositoryError::Conflict(format!("stock unit for {sku} already exists"));
            }
            RepositoryError::Database(e)
        })?;

        Ok(StockUnitId::new(id))
    }

    /// Current levels for the given keys, without locking.
    ///
    /// Keys with no stock unit are omitted.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Repository` if the query fails.
    pub async fn levels(&mut self, keys: &[SkuKey]) -> Result<Vec<StockLevel>, LedgerError> {
        let mut levels = Vec::with_capacity(keys.len());
        for &sku in keys {
            let row = sqlx::query_as::<_, StockLevelRow>(
                r"
                SELECT product_id, variant_id, quantity, low_stock_threshold
                FROM store.stock_units
                WHERE product_id = $1 AND variant_id IS NOT DISTINCT FROM $2
                ",
            )
            .bind(sku.product_id)
            .bind(sku.variant_id)
            .fetch_optional(&mut *self.conn)
            .await?;

            if let Some(row) = row {
                levels.push(row.into());
            }
        }
        Ok(levels)
    }

    async fn increment(&mut self, units: &[(SkuKey, i32)]) -> Result<Vec<StockLevel>, LedgerError> {
        let units = batch(units)?;
        let mut levels = Vec::with_capacity(units.len());
        for (sku, quantity) in units {
            let unit = self.lock(sku).await?;
            let total = unit
                .quantity
                .checked_add(quantity)
                .ok_or(LedgerError::InvalidQuantity { sku, quantity })?;
            levels.push(self.write(&unit, total).await?);
        }
        Ok(levels)
    }

    async fn lock(&mut self, sku: SkuKey) -> Result<Locked, LedgerError> {
        let row = sqlx::query_as::<_, LockedUnitRow>(
            r"
            SELECT id, quantity, low_stock_threshold
            FROM store.stock_units
            WHERE product_id = $1 AND variant_id IS NOT DISTINCT FROM $2
            FOR UPDATE
            ",
        )
        .bind(sku.product_id)
        .bind(sku.variant_id)
        .fetch_optional(&mut *self.conn)
        .await?
        .ok_or(LedgerError::UnknownSku(sku))?;

        Ok(Locked {
            id: row.id,
            sku,
            quantity: row.quantity,
            low_stock_threshold: row.low_stock_threshold,
        })
    }

    async fn write(&mut self, unit: &Locked, quantity: i32) -> Result<StockLevel, LedgerError> {
        sqlx::query(
            r"
            UPDATE store.stock_units
            SET quantity = $2, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(unit.id)
        .bind(quantity)
        .execute(&mut *self.conn)
        .await?;

        Ok(StockLevel {
            sku: unit.sku,
            quantity,
            low_stock_threshold: unit.low_stock_threshold,
        })
    }
}

/// Validate every requested quantity, then merge into canonical lock order.
fn batch(units: &[(SkuKey, i32)]) -> Result<Vec<(SkuKey, i32)>, LedgerError> {
    for &(sku, quantity) in units {
        check_quantity(sku, quantity)?;
    }
    canonicalize(units).map_err(|(sku, quantity)| LedgerError::InvalidQuantity { sku, quantity })
}

fn check_quantity(sku: SkuKey, quantity: i32) -> Result<(), LedgerError> {
    if quantity <= 0 {
        return Err(LedgerError::InvalidQuantity { sku, quantity });
    }
    Ok(())
}
