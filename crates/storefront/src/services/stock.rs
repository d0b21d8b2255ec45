//! Warehouse intake and stock unit registration.

use sqlx::PgPool;
use tracing::instrument;

use stockroom_core::{SkuKey, StockUnitId};

use super::events::{DomainEvent, EventBus};
use crate::db::{LedgerError, StockLedger, StockLevel};

/// Stock operations outside of checkout and reversals.
pub struct StockService<'a> {
    pool: &'a PgPool,
    events: &'a EventBus,
}

impl<'a> StockService<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool, events: &'a EventBus) -> Self {
        Self { pool, events }
    }

    /// Record received goods for one SKU.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidQuantity` for a non-positive quantity and
    /// `LedgerError::UnknownSku` if the SKU has no stock unit.
    #[instrument(skip(self), fields(sku = %sku))]
    pub async fn receive(&self, sku: SkuKey, quantity: i32) -> Result<StockLevel, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let levels = StockLedger::new(&mut tx).receive(&[(sku, quantity)]).await?;
        tx.commit().await?;

        let level = levels.first().copied().ok_or(LedgerError::UnknownSku(sku))?;
        self.events.publish(DomainEvent::stock_changes(levels));
        Ok(level)
    }

    /// Create the stock unit for a SKU.
    ///
    /// # Errors
    ///
    /// Returns a wrapped `RepositoryError::Conflict` if the SKU already has one.
    #[instrument(skip(self), fields(sku = %sku))]
    pub async fn register(
        &self,
        sku: SkuKey,
        quantity: i32,
        low_stock_threshold: i32,
    ) -> Result<StockUnitId, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let mut ledger = StockLedger::new(&mut tx);
        let id = ledger.register(sku, quantity, low_stock_threshold).await?;
        let levels = ledger.levels(&[sku]).await?;
        tx.commit().await?;

        tracing::info!(stock_unit_id = %id, quantity, "Stock unit registered");
        self.events.publish(DomainEvent::stock_changes(levels));
        Ok(id)
    }

    /// Current level of one SKU.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::UnknownSku` if the SKU has no stock unit.
    pub async fn level(&self, sku: SkuKey) -> Result<StockLevel, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        StockLedger::new(&mut conn)
            .levels(&[sku])
            .await?
            .into_iter()
            .next()
            .ok_or(LedgerError::UnknownSku(sku))
    }
}
