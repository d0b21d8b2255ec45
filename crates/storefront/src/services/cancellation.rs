//! Order cancellation.
//!
//! Both the customer path and the administrative path lock the order row,
//! release every item's stock through the ledger and flip the status in one
//! transaction. They differ only in which orders they accept.

use chrono::Utc;
use sqlx::{PgConnection, PgPool};
use thiserror::Error;
use tracing::instrument;

use stockroom_core::{OrderId, OrderStatus, PaymentStatus, SkuKey, UserId};

use super::events::{DomainEvent, EventBus};
use crate::db::orders::{self, OrderField};
use crate::db::{LedgerError, RepositoryError, StockLedger, StockLevel};
use crate::models::Order;

/// Errors from cancellation.
#[derive(Debug, Error)]
pub enum CancelError {
    /// Order does not exist or does not belong to the caller.
    #[error("order {0} not found")]
    NotFound(OrderId),

    /// Order is past the point where it can be cancelled.
    #[error("order {order_id} cannot be cancelled in status {status}")]
    NotCancellable {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// Order is paid; money has to go back through a refund.
    #[error("order {0} is paid and requires a manual refund")]
    RequiresManualRefund(OrderId),

    /// Stock release failed.
    #[error(transparent)]
    Stock(#[from] LedgerError),

    /// Repository/database error.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<sqlx::Error> for CancelError {
    fn from(err: sqlx::Error) -> Self {
        Self::Repository(RepositoryError::Database(err))
    }
}

/// Who is cancelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Actor {
    Customer(UserId),
    Admin,
}

/// Check whether `actor` may cancel `order`.
fn check_cancellable(order: &Order, actor: Actor) -> Result<(), CancelError> {
    match actor {
        Actor::Customer(user_id) => {
            if order.user_id != user_id {
                return Err(CancelError::NotFound(order.id));
            }
            if !order.order_status.is_customer_cancellable() {
                return Err(CancelError::NotCancellable {
                    order_id: order.id,
                    status: order.order_status,
                });
            }
            if order.payment_status == PaymentStatus::Paid {
                return Err(CancelError::RequiresManualRefund(order.id));
            }
        }
        Actor::Admin => {
            if !order.order_status.can_transition_to(OrderStatus::Cancelled) {
                return Err(CancelError::NotCancellable {
                    order_id: order.id,
                    status: order.order_status,
                });
            }
        }
    }
    Ok(())
}

/// Cancels orders and gives their stock back.
pub struct CancellationService<'a> {
    pool: &'a PgPool,
    events: &'a EventBus,
}

impl<'a> CancellationService<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool, events: &'a EventBus) -> Self {
        Self { pool, events }
    }

    /// Cancel an order on behalf of its owner.
    ///
    /// # Errors
    ///
    /// Returns `CancelError::NotFound` if the order does not exist or belongs
    /// to another user.
    /// Returns `CancelError::NotCancellable` once the order is shipping,
    /// delivered, or already cancelled.
    /// Returns `CancelError::RequiresManualRefund` if the order is paid.
    #[instrument(skip(self, reason))]
    pub async fn cancel(
        &self,
        order_id: OrderId,
        user_id: UserId,
        reason: Option<String>,
    ) -> Result<Order, CancelError> {
        self.run(order_id, Actor::Customer(user_id), reason).await
    }

    /// Cancel an order from the back office.
    ///
    /// Follows the order state machine only: anything not yet delivered can
    /// be cancelled. A paid order keeps its payment status and is logged for
    /// a manual refund.
    ///
    /// # Errors
    ///
    /// Returns `CancelError::NotFound` if the order does not exist.
    /// Returns `CancelError::NotCancellable` for delivered or cancelled orders.
    #[instrument(skip(self, reason))]
    pub async fn cancel_as_admin(
        &self,
        order_id: OrderId,
        reason: Option<String>,
    ) -> Result<Order, CancelError> {
        self.run(order_id, Actor::Admin, reason).await
    }

    async fn run(
        &self,
        order_id: OrderId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<Order, CancelError> {
        let mut tx = self.pool.begin().await?;

        let order = orders::lock(&mut tx, order_id)
            .await?
            .ok_or(CancelError::NotFound(order_id))?;
        check_cancellable(&order, actor)?;

        let (order, levels) = cancel_locked(&mut tx, &order, reason).await?;
        tx.commit().await?;

        tracing::info!(order_id = %order.id, actor = ?actor, "Order cancelled");
        self.events.publish(
            std::iter::once(DomainEvent::OrderCancelled {
                order_id: order.id,
                user_id: order.user_id,
                order_number: order.order_number.clone(),
            })
            .chain(DomainEvent::stock_changes(levels)),
        );

        Ok(order)
    }
}

/// Release stock and mark a locked order cancelled.
async fn cancel_locked(
    conn: &mut PgConnection,
    order: &Order,
    reason: Option<String>,
) -> Result<(Order, Vec<StockLevel>), CancelError> {
    let items = orders::items(conn, order.id).await?;
    let units: Vec<(SkuKey, i32)> = items.iter().map(|i| (i.sku_key(), i.quantity)).collect();
    let levels = if units.is_empty() {
        Vec::new()
    } else {
        StockLedger::new(conn).release(&units).await?
    };

    if order.payment_status == PaymentStatus::Paid {
        tracing::warn!(
            order_id = %order.id,
            order_number = %order.order_number,
            "Cancelling paid order, manual refund required"
        );
    }

    orders::patch()
        .set(OrderField::OrderStatus(OrderStatus::Cancelled))
        .set(OrderField::CancelledAt(Utc::now()))
        .set(OrderField::CancelReason(reason))
        .set_some(
            (order.payment_status == PaymentStatus::Pending)
                .then_some(OrderField::PaymentStatus(PaymentStatus::Failed)),
        )
        .apply(conn, order.id.as_i32(), true)
        .await?;

    let order = orders::reload(conn, order.id).await?;
    Ok((order, levels))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use sqlx::types::Json;
    use stockroom_core::PaymentMethod;

    use super::*;
    use crate::models::ShippingAddress;

    fn order(status: OrderStatus, payment: PaymentStatus) -> Order {
        Order {
            id: OrderId::new(1),
            order_number: "ORD1".to_owned(),
            user_id: UserId::new(7),
            subtotal: Decimal::from(100),
            discount_amount: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            shipping_fee: Decimal::ZERO,
            total_amount: Decimal::from(100),
            coupon_id: None,
            shipping_address: Json(ShippingAddress {
                recipient_name: "Kim".to_owned(),
                phone: "010".to_owned(),
                line1: "1 Main St".to_owned(),
                line2: None,
                city: "Seoul".to_owned(),
                postal_code: "04524".to_owned(),
                country: "KR".to_owned(),
            }),
            shipping_provider: None,
            payment_method: PaymentMethod::BankTransfer,
            payment_status: payment,
            order_status: status,
            transaction_id: None,
            note: None,
            cancel_reason: None,
            paid_at: None,
            cancelled_at: None,
            delivered_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_customer_can_cancel_unpaid_pending_order() {
        let o = order(OrderStatus::Pending, PaymentStatus::Pending);
        assert!(check_cancellable(&o, Actor::Customer(UserId::new(7))).is_ok());
    }

    #[test]
    fn test_other_users_order_looks_missing() {
        let o = order(OrderStatus::Pending, PaymentStatus::Pending);
        assert!(matches!(
            check_cancellable(&o, Actor::Customer(UserId::new(8))),
            Err(CancelError::NotFound(_))
        ));
    }

    #[test]
    fn test_customer_cannot_cancel_shipping_order() {
        let o = order(OrderStatus::Shipping, PaymentStatus::Pending);
        assert!(matches!(
            check_cancellable(&o, Actor::Customer(UserId::new(7))),
            Err(CancelError::NotCancellable {
                status: OrderStatus::Shipping,
                ..
            })
        ));
    }

    #[test]
    fn test_paid_order_requires_manual_refund() {
        let o = order(OrderStatus::Confirmed, PaymentStatus::Paid);
        assert!(matches!(
            check_cancellable(&o, Actor::Customer(UserId::new(7))),
            Err(CancelError::RequiresManualRefund(_))
        ));
    }

    #[test]
    fn test_admin_follows_state_machine() {
        let shipping = order(OrderStatus::Shipping, PaymentStatus::Paid);
        assert!(check_cancellable(&shipping, Actor::Admin).is_ok());

        let delivered = order(OrderStatus::Delivered, PaymentStatus::Paid);
        assert!(matches!(
            check_cancellable(&delivered, Actor::Admin),
            Err(CancelError::NotCancellable { .. })
        ));
    }
}
