//! Refunds, returns and exchanges.
//!
//! A request is validated twice: once on a plain connection so obvious
//! mistakes never open a write transaction, and again inside the write
//! transaction under a row lock on the order. Two concurrent requests for the
//! same order serialize on that lock, so the second one sees the first one's
//! items when it re-checks the quantity ceiling. The partial unique index on
//! in-flight refunds backs this up at the schema level.
//!
//! Approving or completing a refund never touches stock. Goods that come
//! back on a return or exchange are put on the shelf by [`RefundService::restock`].

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use thiserror::Error;
use tracing::instrument;

use stockroom_core::money::{line_total, round_whole};
use stockroom_core::number::refund_number;
use stockroom_core::{OrderId, OrderItemId, OrderStatus, RefundId, RefundStatus, UserId};

use super::events::{DomainEvent, EventBus};
use crate::config::CheckoutSettings;
use crate::db::refunds::{self, NewRefund, ONE_IN_FLIGHT_INDEX, RefundField, RefundRepository};
use crate::db::{LedgerError, RepositoryError, StockLedger, orders};
use crate::models::{Order, OrderItem, Refund, RefundRequest, RefundWithItems};

/// Errors from refund operations.
#[derive(Debug, Error)]
pub enum RefundError {
    /// Order does not exist or does not belong to the caller.
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// Refund does not exist or does not belong to the caller.
    #[error("refund {0} not found")]
    RefundNotFound(RefundId),

    /// Request is malformed (no items, blank reason, non-positive quantity).
    #[error("invalid refund request: {0}")]
    InvalidRequest(String),

    /// Order is not delivered or cancelled.
    #[error("order {order_id} in status {status} is not eligible for a refund")]
    NotRefundable {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// The eligibility window has closed.
    #[error("refund window of {window_days} days for order {order_id} has expired")]
    WindowExpired { order_id: OrderId, window_days: i64 },

    /// Another refund for the order is pending, approved or processing.
    #[error("order {0} already has a refund in progress")]
    InFlight(OrderId),

    /// Requested item is not part of the order.
    #[error("order item {0} does not belong to this order")]
    InvalidItem(OrderItemId),

    /// Requested quantity exceeds what is left to refund.
    #[error("order item {order_item_id}: requested {requested}, only {remaining} left to refund")]
    OverQuantity {
        order_item_id: OrderItemId,
        requested: i64,
        remaining: i64,
    },

    /// The refund state machine forbids the move.
    #[error("refund {refund_id} cannot move from {from} to {to}")]
    InvalidTransition {
        refund_id: RefundId,
        from: RefundStatus,
        to: RefundStatus,
    },

    /// The refund is not eligible for restocking.
    #[error("refund {refund_id} cannot be restocked: {reason}")]
    NotRestockable {
        refund_id: RefundId,
        reason: &'static str,
    },

    /// Stock release failed.
    #[error(transparent)]
    Stock(#[from] LedgerError),

    /// Repository/database error.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<sqlx::Error> for RefundError {
    fn from(err: sqlx::Error) -> Self {
        Self::Repository(RepositoryError::Database(err))
    }
}

/// One validated refund line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedItem {
    pub order_item_id: OrderItemId,
    pub quantity: i32,
    pub refund_amount: Decimal,
}

/// A validated refund request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundPlan {
    pub items: Vec<PlannedItem>,
    pub refund_amount: Decimal,
}

/// Validate a request against an order and the quantities already refunded.
///
/// Pure: the caller loads `order`, `items` and `already_refunded`. Repeated
/// lines for the same order item are merged before the ceiling check.
///
/// # Errors
///
/// Returns the first failed check as a `RefundError`.
pub fn plan_refund(
    order: &Order,
    items: &[OrderItem],
    already_refunded: &HashMap<OrderItemId, i64>,
    request: &RefundRequest,
    now: DateTime<Utc>,
    window_days: i64,
) -> Result<RefundPlan, RefundError> {
    if request.reason.trim().is_empty() {
        return Err(RefundError::InvalidRequest("reason is required".to_owned()));
    }
    if request.items.is_empty() {
        return Err(RefundError::InvalidRequest("at least one item is required".to_owned()));
    }

    if !order.order_status.is_refundable() {
        return Err(RefundError::NotRefundable {
            order_id: order.id,
            status: order.order_status,
        });
    }
    if now - order.created_at > Duration::days(window_days) {
        return Err(RefundError::WindowExpired {
            order_id: order.id,
            window_days,
        });
    }

    let mut requested: BTreeMap<OrderItemId, i64> = BTreeMap::new();
    for line in &request.items {
        if line.quantity <= 0 {
            return Err(RefundError::InvalidRequest(format!(
                "quantity for order item {} must be positive",
                line.order_item_id
            )));
        }
        *requested.entry(line.order_item_id).or_insert(0) += i64::from(line.quantity);
    }

    let mut planned = Vec::with_capacity(requested.len());
    for (order_item_id, quantity) in requested {
        let item = items
            .iter()
            .find(|i| i.id == order_item_id)
            .ok_or(RefundError::InvalidItem(order_item_id))?;

        let claimed = already_refunded.get(&order_item_id).copied().unwrap_or(0);
        let remaining = i64::from(item.quantity) - claimed;
        if quantity > remaining {
            return Err(RefundError::OverQuantity {
                order_item_id,
                requested: quantity,
                remaining,
            });
        }

        // Bounded by the item's own i32 quantity after the check above.
        let quantity = i32::try_from(quantity).map_err(|_| RefundError::OverQuantity {
            order_item_id,
            requested: quantity,
            remaining,
        })?;
        planned.push(PlannedItem {
            order_item_id,
            quantity,
            refund_amount: round_whole(line_total(item.unit_price, quantity)),
        });
    }

    let refund_amount = planned.iter().map(|i| i.refund_amount).sum();
    Ok(RefundPlan {
        items: planned,
        refund_amount,
    })
}

/// Refund requests, transitions and restocking.
pub struct RefundService<'a> {
    pool: &'a PgPool,
    settings: &'a CheckoutSettings,
    events: &'a EventBus,
}

impl<'a> RefundService<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool, settings: &'a CheckoutSettings, events: &'a EventBus) -> Self {
        Self {
            pool,
            settings,
            events,
        }
    }

    /// Request a refund for items of a delivered or cancelled order.
    ///
    /// # Errors
    ///
    /// Returns `RefundError::OrderNotFound` if the order does not exist or
    /// belongs to another user.
    /// Returns `RefundError::NotRefundable`, `WindowExpired`, `InvalidItem`,
    /// `OverQuantity` or `InFlight` when the request fails validation, either
    /// before or inside the write transaction.
    #[instrument(skip(self, request), fields(items = request.items.len()))]
    pub async fn create(
        &self,
        order_id: OrderId,
        user_id: UserId,
        request: &RefundRequest,
    ) -> Result<RefundWithItems, RefundError> {
        {
            let mut conn = self.pool.acquire().await?;
            self.validate(&mut conn, order_id, user_id, request, false).await?;
        }

        let mut tx = self.pool.begin().await?;
        let (order, plan) = self.validate(&mut tx, order_id, user_id, request, true).await?;

        let number = refund_number(user_id, Utc::now(), &mut rand::rng());
        let refund = refunds::insert(
            &mut tx,
            &NewRefund {
                refund_number: &number,
                order_id,
                user_id,
                refund_type: request.refund_type,
                reason: request.reason.trim(),
                refund_amount: plan.refund_amount,
            },
        )
        .await
        .map_err(|e| match e {
            RepositoryError::Conflict(ref index) if index == ONE_IN_FLIGHT_INDEX => {
                RefundError::InFlight(order_id)
            }
            other => other.into(),
        })?;

        let mut items = Vec::with_capacity(plan.items.len());
        for planned in &plan.items {
            items.push(
                refunds::insert_item(
                    &mut tx,
                    refund.id,
                    planned.order_item_id,
                    planned.quantity,
                    planned.refund_amount,
                )
                .await?,
            );
        }

        tx.commit().await?;

        tracing::info!(
            refund_id = %refund.id,
            order_id = %order.id,
            refund_amount = %refund.refund_amount,
            "Refund requested"
        );
        self.events.publish([DomainEvent::RefundRequested {
            refund_id: refund.id,
            order_id,
            user_id,
            refund_number: refund.refund_number.clone(),
        }]);

        Ok(RefundWithItems { refund, items })
    }

    /// Load the order and run every check. With `lock` the order row is
    /// locked for the rest of the caller's transaction.
    async fn validate(
        &self,
        conn: &mut PgConnection,
        order_id: OrderId,
        user_id: UserId,
        request: &RefundRequest,
        lock: bool,
    ) -> Result<(Order, RefundPlan), RefundError> {
        let order = if lock {
            orders::lock(conn, order_id).await?
        } else {
            match orders::reload(conn, order_id).await {
                Ok(order) => Some(order),
                Err(RepositoryError::NotFound) => None,
                Err(e) => return Err(e.into()),
            }
        }
        .filter(|o| o.user_id == user_id)
        .ok_or(RefundError::OrderNotFound(order_id))?;

        let items = orders::items(conn, order_id).await?;
        let already = refunds::refunded_quantities(conn, order_id).await?;
        let plan = plan_refund(
            &order,
            &items,
            &already,
            request,
            Utc::now(),
            self.settings.refund_window_days,
        )?;

        if refunds::has_in_flight(conn, order_id).await? {
            return Err(RefundError::InFlight(order_id));
        }

        Ok((order, plan))
    }

    /// `pending → approved`.
    ///
    /// # Errors
    ///
    /// Returns `RefundError::RefundNotFound` or `RefundError::InvalidTransition`.
    pub async fn approve(&self, refund_id: RefundId, admin_note: Option<String>) -> Result<Refund, RefundError> {
        self.transition(refund_id, RefundStatus::Approved, admin_note, None).await
    }

    /// `pending → rejected`.
    ///
    /// # Errors
    ///
    /// Returns `RefundError::RefundNotFound` or `RefundError::InvalidTransition`.
    pub async fn reject(&self, refund_id: RefundId, admin_note: Option<String>) -> Result<Refund, RefundError> {
        self.transition(refund_id, RefundStatus::Rejected, admin_note, None).await
    }

    /// `approved → processing`.
    ///
    /// # Errors
    ///
    /// Returns `RefundError::RefundNotFound` or `RefundError::InvalidTransition`.
    pub async fn start_processing(
        &self,
        refund_id: RefundId,
        admin_note: Option<String>,
    ) -> Result<Refund, RefundError> {
        self.transition(refund_id, RefundStatus::Processing, admin_note, None).await
    }

    /// `processing → completed`.
    ///
    /// # Errors
    ///
    /// Returns `RefundError::RefundNotFound` or `RefundError::InvalidTransition`.
    pub async fn complete(&self, refund_id: RefundId, admin_note: Option<String>) -> Result<Refund, RefundError> {
        self.transition(refund_id, RefundStatus::Completed, admin_note, None).await
    }

    /// `pending → cancelled`, by the user who requested the refund.
    ///
    /// # Errors
    ///
    /// Returns `RefundError::RefundNotFound` if the refund belongs to another
    /// user, or `RefundError::InvalidTransition` once it left `pending`.
    pub async fn cancel_by_user(&self, refund_id: RefundId, user_id: UserId) -> Result<Refund, RefundError> {
        self.transition(refund_id, RefundStatus::Cancelled, None, Some(user_id))
            .await
    }

    #[instrument(skip(self, admin_note))]
    async fn transition(
        &self,
        refund_id: RefundId,
        next: RefundStatus,
        admin_note: Option<String>,
        owner: Option<UserId>,
    ) -> Result<Refund, RefundError> {
        let mut tx = self.pool.begin().await?;

        let refund = refunds::lock(&mut tx, refund_id)
            .await?
            .filter(|r| owner.is_none_or(|user| r.user_id == user))
            .ok_or(RefundError::RefundNotFound(refund_id))?;

        if !refund.status.can_transition_to(next) {
            return Err(RefundError::InvalidTransition {
                refund_id,
                from: refund.status,
                to: next,
            });
        }

        let now = Utc::now();
        refunds::patch()
            .set(RefundField::Status(next))
            .set_some(admin_note.map(|note| RefundField::AdminNote(Some(note))))
            .set_some((next == RefundStatus::Processing).then_some(RefundField::ProcessedAt(now)))
            .set_some((next == RefundStatus::Completed).then_some(RefundField::CompletedAt(now)))
            .apply(&mut tx, refund_id.as_i32(), true)
            .await?;
        let refund = refunds::reload(&mut tx, refund_id).await?;
        tx.commit().await?;

        tracing::info!(refund_id = %refund_id, status = %next, "Refund status updated");
        self.events.publish([DomainEvent::RefundStatusChanged {
            refund_id,
            user_id: refund.user_id,
            refund_number: refund.refund_number.clone(),
            status: next,
        }]);

        Ok(refund)
    }

    /// Put returned goods back into stock.
    ///
    /// Only for completed returns and exchanges, and only once. Goods on a
    /// cancelled order were released by the cancellation and never go back
    /// on the shelf a second time.
    ///
    /// # Errors
    ///
    /// Returns `RefundError::RefundNotFound` if the refund does not exist.
    /// Returns `RefundError::NotRestockable` if the refund is not a completed
    /// return or exchange, was already restocked, or belongs to a cancelled
    /// order.
    #[instrument(skip(self))]
    pub async fn restock(&self, refund_id: RefundId) -> Result<Refund, RefundError> {
        let mut tx = self.pool.begin().await?;

        let refund = refunds::lock(&mut tx, refund_id)
            .await?
            .ok_or(RefundError::RefundNotFound(refund_id))?;
        // Cancelled and delivered are both terminal, so no lock is needed.
        let order = orders::reload(&mut tx, refund.order_id).await?;
        check_restockable(&refund, order.order_status)?;

        let units = refunds::returned_units(&mut tx, refund_id).await?;
        let levels = StockLedger::new(&mut tx).release(&units).await?;

        refunds::patch()
            .set(RefundField::RestockedAt(Utc::now()))
            .apply(&mut tx, refund_id.as_i32(), true)
            .await?;
        let refund = refunds::reload(&mut tx, refund_id).await?;
        tx.commit().await?;

        tracing::info!(refund_id = %refund_id, units = levels.len(), "Returned goods restocked");
        self.events.publish(DomainEvent::stock_changes(levels));

        Ok(refund)
    }

    /// Get a refund with its items.
    ///
    /// # Errors
    ///
    /// Returns `RefundError::RefundNotFound` if the refund does not exist.
    pub async fn get(&self, refund_id: RefundId) -> Result<RefundWithItems, RefundError> {
        RefundRepository::new(self.pool)
            .get_with_items(refund_id)
            .await?
            .ok_or(RefundError::RefundNotFound(refund_id))
    }

    /// Get one of the user's refunds with its items.
    ///
    /// # Errors
    ///
    /// Returns `RefundError::RefundNotFound` if the refund does not exist or
    /// belongs to another user.
    pub async fn get_for_user(&self, refund_id: RefundId, user_id: UserId) -> Result<RefundWithItems, RefundError> {
        RefundRepository::new(self.pool)
            .get_with_items(refund_id)
            .await?
            .filter(|r| r.refund.user_id == user_id)
            .ok_or(RefundError::RefundNotFound(refund_id))
    }
}

fn check_restockable(refund: &Refund, order_status: OrderStatus) -> Result<(), RefundError> {
    let reason = if !refund.refund_type.returns_goods() {
        "refund type does not return goods"
    } else if order_status == OrderStatus::Cancelled {
        "order was cancelled and its stock already released"
    } else if refund.status != RefundStatus::Completed {
        "refund is not completed"
    } else if refund.restocked_at.is_some() {
        "refund was already restocked"
    } else {
        return Ok(());
    };
    Err(RefundError::NotRestockable {
        refund_id: refund.id,
        reason,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use sqlx::types::Json;
    use stockroom_core::{PaymentMethod, PaymentStatus, ProductId, RefundType};

    use super::*;
    use crate::models::{RefundItemRequest, ShippingAddress};

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn order(status: OrderStatus, age_days: i64) -> Order {
        Order {
            id: OrderId::new(1),
            order_number: "ORD1".to_owned(),
            user_id: UserId::new(7),
            subtotal: Decimal::from(4_500),
            discount_amount: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            shipping_fee: Decimal::ZERO,
            total_amount: Decimal::from(4_500),
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
            payment_method: PaymentMethod::Online,
            payment_status: PaymentStatus::Paid,
            order_status: status,
            transaction_id: None,
            note: None,
            cancel_reason: None,
            paid_at: None,
            cancelled_at: None,
            delivered_at: None,
            created_at: now() - Duration::days(age_days),
            updated_at: now(),
        }
    }

    fn item(id: i32, quantity: i32, unit_price: Decimal) -> OrderItem {
        OrderItem {
            id: OrderItemId::new(id),
            order_id: OrderId::new(1),
            product_id: ProductId::new(42),
            variant_id: None,
            quantity,
            unit_price,
            product_name: "Mug".to_owned(),
            sku: "MUG".to_owned(),
            variant_attributes: serde_json::json!({}),
            created_at: now(),
        }
    }

    fn request(lines: &[(i32, i32)]) -> RefundRequest {
        RefundRequest {
            refund_type: RefundType::Return,
            reason: "damaged".to_owned(),
            items: lines
                .iter()
                .map(|&(id, quantity)| RefundItemRequest {
                    order_item_id: OrderItemId::new(id),
                    quantity,
                })
                .collect(),
        }
    }

    #[test]
    fn test_refund_of_two_out_of_three() {
        let items = [item(10, 3, Decimal::from(1_500))];
        let plan = plan_refund(
            &order(OrderStatus::Delivered, 1),
            &items,
            &HashMap::new(),
            &request(&[(10, 2)]),
            now(),
            30,
        )
        .unwrap();
        assert_eq!(plan.refund_amount, Decimal::from(3_000));
        assert_eq!(plan.items[0].quantity, 2);
    }

    #[test]
    fn test_second_refund_over_ceiling_fails() {
        let items = [item(10, 3, Decimal::from(1_500))];
        let already = HashMap::from([(OrderItemId::new(10), 2)]);
        let err = plan_refund(
            &order(OrderStatus::Delivered, 1),
            &items,
            &already,
            &request(&[(10, 2)]),
            now(),
            30,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RefundError::OverQuantity {
                requested: 2,
                remaining: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_repeated_lines_are_merged_before_ceiling() {
        let items = [item(10, 3, Decimal::from(1_500))];
        let err = plan_refund(
            &order(OrderStatus::Delivered, 1),
            &items,
            &HashMap::new(),
            &request(&[(10, 2), (10, 2)]),
            now(),
            30,
        )
        .unwrap_err();
        assert!(matches!(err, RefundError::OverQuantity { requested: 4, .. }));
    }

    #[test]
    fn test_order_must_be_delivered_or_cancelled() {
        let items = [item(10, 3, Decimal::from(1_500))];
        let err = plan_refund(
            &order(OrderStatus::Shipping, 1),
            &items,
            &HashMap::new(),
            &request(&[(10, 1)]),
            now(),
            30,
        )
        .unwrap_err();
        assert!(matches!(err, RefundError::NotRefundable { .. }));
    }

    #[test]
    fn test_window_expired() {
        let items = [item(10, 3, Decimal::from(1_500))];
        let err = plan_refund(
            &order(OrderStatus::Delivered, 31),
            &items,
            &HashMap::new(),
            &request(&[(10, 1)]),
            now(),
            30,
        )
        .unwrap_err();
        assert!(matches!(err, RefundError::WindowExpired { window_days: 30, .. }));
    }

    #[test]
    fn test_foreign_item_rejected() {
        let items = [item(10, 3, Decimal::from(1_500))];
        let err = plan_refund(
            &order(OrderStatus::Cancelled, 1),
            &items,
            &HashMap::new(),
            &request(&[(11, 1)]),
            now(),
            30,
        )
        .unwrap_err();
        assert!(matches!(err, RefundError::InvalidItem(id) if id == OrderItemId::new(11)));
    }

    #[test]
    fn test_non_positive_quantity_and_blank_reason() {
        let items = [item(10, 3, Decimal::from(1_500))];
        let delivered = order(OrderStatus::Delivered, 1);
        assert!(matches!(
            plan_refund(&delivered, &items, &HashMap::new(), &request(&[(10, 0)]), now(), 30),
            Err(RefundError::InvalidRequest(_))
        ));

        let mut blank = request(&[(10, 1)]);
        blank.reason = "   ".to_owned();
        assert!(matches!(
            plan_refund(&delivered, &items, &HashMap::new(), &blank, now(), 30),
            Err(RefundError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_refund_amount_rounds_half_up() {
        let items = [item(10, 3, Decimal::new(3335, 1))];
        let plan = plan_refund(
            &order(OrderStatus::Delivered, 1),
            &items,
            &HashMap::new(),
            &request(&[(10, 1)]),
            now(),
            30,
        )
        .unwrap();
        assert_eq!(plan.refund_amount, Decimal::from(334));
    }

    fn refund(refund_type: RefundType, status: RefundStatus, restocked: bool) -> Refund {
        Refund {
            id: RefundId::new(5),
            refund_number: "RFD1".to_owned(),
            order_id: OrderId::new(1),
            user_id: UserId::new(7),
            refund_type,
            reason: "damaged".to_owned(),
            status,
            refund_amount: Decimal::from(1_500),
            admin_note: None,
            processed_at: None,
            completed_at: None,
            restocked_at: restocked.then(now),
            created_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn test_restock_rules() {
        let delivered = OrderStatus::Delivered;
        assert!(
            check_restockable(&refund(RefundType::Return, RefundStatus::Completed, false), delivered)
                .is_ok()
        );
        assert!(
            check_restockable(&refund(RefundType::Exchange, RefundStatus::Completed, false), delivered)
                .is_ok()
        );
        assert!(matches!(
            check_restockable(&refund(RefundType::Refund, RefundStatus::Completed, false), delivered),
            Err(RefundError::NotRestockable { .. })
        ));
        assert!(matches!(
            check_restockable(&refund(RefundType::Return, RefundStatus::Approved, false), delivered),
            Err(RefundError::NotRestockable { .. })
        ));
        assert!(matches!(
            check_restockable(&refund(RefundType::Return, RefundStatus::Completed, true), delivered),
            Err(RefundError::NotRestockable { .. })
        ));
    }

    #[test]
    fn test_return_on_cancelled_order_is_not_restocked() {
        let err = check_restockable(
            &refund(RefundType::Return, RefundStatus::Completed, false),
            OrderStatus::Cancelled,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RefundError::NotRestockable { reason, .. } if reason.contains("cancelled")
        ));
    }
}
