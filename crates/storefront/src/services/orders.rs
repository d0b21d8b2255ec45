//! Order reads and administrative status transitions.

use chrono::Utc;
use sqlx::PgPool;
use thiserror::Error;
use tracing::instrument;

use stockroom_core::{OrderId, OrderStatus, UserId};

use super::cancellation::{CancelError, CancellationService};
use super::events::{DomainEvent, EventBus};
use crate::db::RepositoryError;
use crate::db::orders::{self, OrderField, OrderRepository};
use crate::models::{Order, OrderWithItems};

/// Errors from order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Order does not exist or does not belong to the caller.
    #[error("order {0} not found")]
    NotFound(OrderId),

    /// The order state machine forbids the move.
    #[error("order {order_id} cannot move from {from} to {to}")]
    InvalidTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// Cancellation through the admin path failed.
    #[error(transparent)]
    Cancel(#[from] CancelError),

    /// Repository/database error.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<sqlx::Error> for OrderError {
    fn from(err: sqlx::Error) -> Self {
        Self::Repository(RepositoryError::Database(err))
    }
}

/// Order reads and back-office transitions.
pub struct OrderService<'a> {
    pool: &'a PgPool,
    events: &'a EventBus,
}

impl<'a> OrderService<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool, events: &'a EventBus) -> Self {
        Self { pool, events }
    }

    /// Get one of the user's orders with its items.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::NotFound` if the order does not exist or belongs
    /// to another user.
    pub async fn get_for_user(&self, order_id: OrderId, user_id: UserId) -> Result<OrderWithItems, OrderError> {
        OrderRepository::new(self.pool)
            .get_with_items(order_id)
            .await?
            .filter(|o| o.order.user_id == user_id)
            .ok_or(OrderError::NotFound(order_id))
    }

    /// Move an order along its state machine.
    ///
    /// Moving to `cancelled` goes through the cancellation path so stock is
    /// released. Moving to `delivered` stamps `delivered_at`.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::NotFound` if the order does not exist.
    /// Returns `OrderError::InvalidTransition` if the move is not allowed.
    #[instrument(skip(self))]
    pub async fn update_status(&self, order_id: OrderId, next: OrderStatus) -> Result<Order, OrderError> {
        if next == OrderStatus::Cancelled {
            return CancellationService::new(self.pool, self.events)
                .cancel_as_admin(order_id, None)
                .await
                .map_err(|e| match e {
                    CancelError::NotFound(id) => OrderError::NotFound(id),
                    CancelError::NotCancellable { order_id, status } => OrderError::InvalidTransition {
                        order_id,
                        from: status,
                        to: OrderStatus::Cancelled,
                    },
                    other => other.into(),
                });
        }

        let mut tx = self.pool.begin().await?;
        let order = orders::lock(&mut tx, order_id)
            .await?
            .ok_or(OrderError::NotFound(order_id))?;

        if !order.order_status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                order_id,
                from: order.order_status,
                to: next,
            });
        }

        orders::patch()
            .set(OrderField::OrderStatus(next))
            .set_some((next == OrderStatus::Delivered).then(|| OrderField::DeliveredAt(Utc::now())))
            .apply(&mut tx, order_id.as_i32(), true)
            .await?;
        let order = orders::reload(&mut tx, order_id).await?;
        tx.commit().await?;

        tracing::info!(order_id = %order_id, status = %next, "Order status updated");
        self.events.publish([DomainEvent::OrderStatusChanged {
            order_id,
            user_id: order.user_id,
            order_number: order.order_number.clone(),
            status: next,
        }]);

        Ok(order)
    }
}
