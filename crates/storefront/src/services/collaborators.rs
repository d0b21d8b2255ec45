//! External collaborators invoked after commit.
//!
//! Each collaborator is a trait so the event worker can run against the
//! database-backed defaults in production and recording fakes in tests.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use thiserror::Error;

use stockroom_core::{OrderId, ShipmentId};

use crate::db::notifications::{self, NewNotification};
use crate::db::{RepositoryError, StockLevel, alerts, shipments};

/// Failure inside a collaborator. Always logged and swallowed by the caller.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Repository/database error.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote side answered but refused the request.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Creates shipping records.
#[async_trait]
pub trait ShippingProvider: Send + Sync {
    /// Register a shipment for an order and return its identifier.
    async fn create_shipment(
        &self,
        order_id: OrderId,
        fee: Decimal,
        provider: &str,
    ) -> Result<ShipmentId, CollaboratorError>;
}

/// Delivers user notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: NewNotification) -> Result<(), CollaboratorError>;
}

/// Reacts to stock level changes.
#[async_trait]
pub trait LowStockAlerter: Send + Sync {
    /// Raise an alert when `level` is at or below its threshold.
    async fn check_and_alert(&self, level: StockLevel) -> Result<(), CollaboratorError>;
}

/// Collaborators used by the event worker.
#[derive(Clone)]
pub struct Collaborators {
    pub shipping: Arc<dyn ShippingProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub alerter: Arc<dyn LowStockAlerter>,
}

impl Collaborators {
    /// Database-backed collaborators sharing one pool.
    #[must_use]
    pub fn database(pool: PgPool) -> Self {
        Self {
            shipping: Arc::new(DbShippingProvider::new(pool.clone())),
            notifier: Arc::new(DbNotifier::new(pool.clone())),
            alerter: Arc::new(DbLowStockAlerter::new(pool)),
        }
    }
}

/// Records a `preparing` shipment placeholder in `store.shipments`.
pub struct DbShippingProvider {
    pool: PgPool,
}

impl DbShippingProvider {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ShippingProvider for DbShippingProvider {
    async fn create_shipment(
        &self,
        order_id: OrderId,
        fee: Decimal,
        provider: &str,
    ) -> Result<ShipmentId, CollaboratorError> {
        Ok(shipments::create_placeholder(&self.pool, order_id, provider, fee).await?)
    }
}

/// Stores notifications in the in-app inbox.
pub struct DbNotifier {
    pool: PgPool,
}

impl DbNotifier {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Notifier for DbNotifier {
    async fn notify(&self, notification: NewNotification) -> Result<(), CollaboratorError> {
        notifications::insert(&self.pool, &notification).await?;
        Ok(())
    }
}

/// Opens and resolves rows in `store.stock_alerts`.
pub struct DbLowStockAlerter {
    pool: PgPool,
}

impl DbLowStockAlerter {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LowStockAlerter for DbLowStockAlerter {
    async fn check_and_alert(&self, level: StockLevel) -> Result<(), CollaboratorError> {
        if level.is_low() {
            if alerts::open(&self.pool, level.sku, level.quantity, level.low_stock_threshold).await? {
                tracing::warn!(
                    sku = %level.sku,
                    quantity = level.quantity,
                    threshold = level.low_stock_threshold,
                    "Stock at or below threshold"
                );
            }
        } else if alerts::resolve(&self.pool, level.sku).await? {
            tracing::info!(sku = %level.sku, quantity = level.quantity, "Low-stock alert resolved");
        }
        Ok(())
    }
}
