//! Order aggregate builder.
//!
//! Turns a cart into an order in one transaction: header, immutable item
//! snapshots, stock reservation, coupon redemption and cart clear either all
//! commit or none do. Claiming the cart lines first means one cart becomes at
//! most one order. Everything that talks to the outside world runs after
//! commit and cannot undo the order.

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;
use thiserror::Error;
use tracing::instrument;

use stockroom_core::money::{percent_of, round_whole};
use stockroom_core::number::order_number;
use stockroom_core::{CartItemId, CouponId, PaymentMethod, SkuKey, UserId};

use super::discount::{self, CouponError, DiscountOutcome, OrderScope, RedemptionContext};
use super::events::{DomainEvent, EventBus};
use super::payments::PaymentGateway;
use super::snapshot::{self, SnapshotError};
use crate::config::CheckoutSettings;
use crate::db::coupons::{self, CouponRepository, Redemption};
use crate::db::orders::{self, NewOrder, NewOrderItem};
use crate::db::{LedgerError, RepositoryError, StockLedger, cart};
use crate::models::{CheckoutReceipt, CheckoutRequest, OrderWithItems, PricedLine};

/// Errors from order creation.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Cart could not be snapshotted (empty, unavailable product, pre-check).
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// Coupon was refused.
    #[error(transparent)]
    Coupon(#[from] CouponError),

    /// Stock reservation failed inside the transaction.
    #[error(transparent)]
    Stock(#[from] LedgerError),

    /// The cart changed after it was snapshotted, usually because another
    /// checkout of the same cart committed first.
    #[error("cart changed during checkout")]
    CartChanged,

    /// Request is malformed.
    #[error("invalid checkout request: {0}")]
    InvalidRequest(String),

    /// Repository/database error.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<sqlx::Error> for CheckoutError {
    fn from(err: sqlx::Error) -> Self {
        Self::Repository(RepositoryError::Database(err))
    }
}

/// Order totals derived from the snapshot and coupon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub shipping_fee: Decimal,
    pub total_amount: Decimal,
}

impl Totals {
    /// `total = subtotal + shipping_fee - discount + tax`, with tax charged
    /// on the discounted subtotal and rounded half-up to a whole unit.
    #[must_use]
    pub fn compute(
        lines: &[PricedLine],
        discount_amount: Decimal,
        shipping_fee: Decimal,
        tax_rate_percent: Decimal,
    ) -> Self {
        let subtotal: Decimal = lines.iter().map(PricedLine::line_total).sum();
        let tax_amount = round_whole(percent_of(subtotal - discount_amount, tax_rate_percent));
        Self {
            subtotal,
            discount_amount,
            tax_amount,
            shipping_fee,
            total_amount: subtotal + shipping_fee - discount_amount + tax_amount,
        }
    }
}

/// A coupon that passed validation for this checkout.
struct AppliedCoupon {
    id: CouponId,
    outcome: DiscountOutcome,
}

/// Creates orders from carts.
pub struct CheckoutService<'a> {
    pool: &'a PgPool,
    settings: &'a CheckoutSettings,
    gateway: &'a dyn PaymentGateway,
    events: &'a EventBus,
}

impl<'a> CheckoutService<'a> {
    #[must_use]
    pub const fn new(
        pool: &'a PgPool,
        settings: &'a CheckoutSettings,
        gateway: &'a dyn PaymentGateway,
        events: &'a EventBus,
    ) -> Self {
        Self {
            pool,
            settings,
            gateway,
            events,
        }
    }

    /// Create an order from the user's cart.
    ///
    /// Snapshot and coupon validation happen before the transaction opens,
    /// so those failures never touch the database. Stock is reserved under
    /// row locks inside the transaction; a shortfall there rolls back the
    /// whole order.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::Snapshot` for an empty cart, an unavailable
    /// product, or a failed stock pre-check.
    /// Returns `CheckoutError::Coupon` if the coupon is refused, including
    /// when a concurrent checkout takes its last use or the user's last use
    /// first.
    /// Returns `CheckoutError::CartChanged` if the snapshotted cart lines are
    /// no longer there as priced.
    /// Returns `CheckoutError::Stock` if the locked reservation fails.
    #[instrument(skip(self, request), fields(payment_method = %request.payment_method))]
    pub async fn create_order(
        &self,
        user_id: UserId,
        request: &CheckoutRequest,
    ) -> Result<CheckoutReceipt, CheckoutError> {
        validate_request(request)?;

        let lines = snapshot::snapshot(self.pool, user_id).await?;
        let subtotal: Decimal = lines.iter().map(PricedLine::line_total).sum();

        let coupon = match normalized_code(request.coupon_code.as_deref()) {
            Some(code) => Some(self.validate_coupon(user_id, code, subtotal, &lines).await?),
            None => None,
        };
        let discount_amount = coupon
            .as_ref()
            .map_or(Decimal::ZERO, |c| c.outcome.discount_amount);
        let totals = Totals::compute(
            &lines,
            discount_amount,
            request.shipping_fee,
            self.settings.tax_rate_percent,
        );

        let now = Utc::now();
        let number = order_number(user_id, now, &mut rand::rng());

        let mut tx = self.pool.begin().await?;

        let snapshotted: Vec<(CartItemId, i32)> =
            lines.iter().map(|l| (l.cart_item_id, l.quantity)).collect();
        if !cart::claim_lines(&mut tx, user_id, &snapshotted).await? {
            tracing::info!(user_id = %user_id, "Cart changed during checkout");
            return Err(CheckoutError::CartChanged);
        }

        let order = orders::insert(
            &mut tx,
            &NewOrder {
                order_number: &number,
                user_id,
                subtotal: totals.subtotal,
                discount_amount: totals.discount_amount,
                tax_amount: totals.tax_amount,
                shipping_fee: totals.shipping_fee,
                total_amount: totals.total_amount,
                coupon_id: coupon.as_ref().map(|c| c.id),
                shipping_address: &request.shipping_address,
                shipping_provider: request.shipping_provider.as_deref(),
                payment_method: request.payment_method,
                note: request.note.as_deref(),
            },
        )
        .await?;

        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            let item = orders::insert_item(
                &mut tx,
                order.id,
                &NewOrderItem {
                    sku: line.sku,
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    product_name: &line.product_name,
                    sku_code: &line.sku_code,
                    variant_attributes: &line.variant_attributes,
                },
            )
            .await?;
            items.push(item);
        }

        let units: Vec<(SkuKey, i32)> = lines.iter().map(|l| (l.sku, l.quantity)).collect();
        let levels = StockLedger::new(&mut tx).reserve(&units).await?;

        if let Some(applied) = &coupon {
            match coupons::record_redemption(&mut tx, applied.id, user_id, order.id).await? {
                Redemption::Recorded => {}
                Redemption::UsageLimitReached => return Err(CouponError::UsageLimitReached.into()),
                Redemption::UserLimitReached { limit } => {
                    return Err(CouponError::UserLimitReached { limit }.into());
                }
            }
        }

        tx.commit().await?;

        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total_amount = %order.total_amount,
            items = items.len(),
            "Order created"
        );

        self.events.publish(
            std::iter::once(DomainEvent::OrderCreated {
                order_id: order.id,
                user_id,
                order_number: order.order_number.clone(),
                total_amount: order.total_amount,
                shipping_fee: order.shipping_fee,
                shipping_provider: order.shipping_provider.clone(),
            })
            .chain(DomainEvent::stock_changes(levels)),
        );

        let payment_url = if order.payment_method == PaymentMethod::Online {
            match self
                .gateway
                .request_payment_url(order.id, &order.order_number, order.total_amount)
                .await
            {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!(order_id = %order.id, error = %e, "Failed to obtain payment URL");
                    None
                }
            }
        } else {
            None
        };

        Ok(CheckoutReceipt {
            order: OrderWithItems { order, items },
            payment_url,
        })
    }

    async fn validate_coupon(
        &self,
        user_id: UserId,
        code: &str,
        subtotal: Decimal,
        lines: &[PricedLine],
    ) -> Result<AppliedCoupon, CheckoutError> {
        let repo = CouponRepository::new(self.pool);
        let coupon = repo
            .find_by_code(code)
            .await?
            .ok_or_else(|| CouponError::NotFound(code.to_owned()))?;
        let user_redemptions = repo.count_user_redemptions(coupon.id, user_id).await?;
        let scope = OrderScope::from_lines(lines);

        let outcome = discount::apply(
            &coupon,
            subtotal,
            &RedemptionContext {
                now: Utc::now(),
                user_redemptions,
                scope: &scope,
            },
        )?;

        Ok(AppliedCoupon {
            id: coupon.id,
            outcome,
        })
    }
}

fn validate_request(request: &CheckoutRequest) -> Result<(), CheckoutError> {
    if request.shipping_fee.is_sign_negative() {
        return Err(CheckoutError::InvalidRequest(
            "shipping fee must not be negative".to_owned(),
        ));
    }
    let address = &request.shipping_address;
    for (field, value) in [
        ("recipientName", &address.recipient_name),
        ("phone", &address.phone),
        ("line1", &address.line1),
        ("city", &address.city),
        ("postalCode", &address.postal_code),
        ("country", &address.country),
    ] {
        if value.trim().is_empty() {
            return Err(CheckoutError::InvalidRequest(format!(
                "shippingAddress.{field} is required"
            )));
        }
    }
    Ok(())
}

fn normalized_code(code: Option<&str>) -> Option<&str> {
    code.map(str::trim).filter(|c| !c.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use stockroom_core::ProductId;

    use super::*;
    use crate::models::ShippingAddress;

    fn line(product: i32, unit_price: i64, quantity: i32) -> PricedLine {
        PricedLine {
            cart_item_id: CartItemId::new(product),
            sku: SkuKey::product(ProductId::new(product)),
            category_id: None,
            product_name: "Mug".to_owned(),
            sku_code: "MUG".to_owned(),
            variant_attributes: serde_json::json!({}),
            unit_price: Decimal::from(unit_price),
            quantity,
            available: 10,
        }
    }

    fn request() -> CheckoutRequest {
        CheckoutRequest {
            payment_method: PaymentMethod::BankTransfer,
            shipping_address: ShippingAddress {
                recipient_name: "Kim".to_owned(),
                phone: "010".to_owned(),
                line1: "1 Main St".to_owned(),
                line2: None,
                city: "Seoul".to_owned(),
                postal_code: "04524".to_owned(),
                country: "KR".to_owned(),
            },
            shipping_fee: Decimal::from(3_000),
            shipping_provider: None,
            coupon_code: None,
            note: None,
        }
    }

    #[test]
    fn test_total_without_discount_or_tax() {
        let totals = Totals::compute(
            &[line(42, 10_000, 1)],
            Decimal::ZERO,
            Decimal::from(3_000),
            Decimal::ZERO,
        );
        assert_eq!(totals.subtotal, Decimal::from(10_000));
        assert_eq!(totals.total_amount, Decimal::from(13_000));
    }

    #[test]
    fn test_tax_is_charged_on_discounted_subtotal() {
        let totals = Totals::compute(
            &[line(1, 50_000, 2)],
            Decimal::from(5_000),
            Decimal::ZERO,
            Decimal::from(10),
        );
        assert_eq!(totals.subtotal, Decimal::from(100_000));
        assert_eq!(totals.tax_amount, Decimal::from(9_500));
        assert_eq!(totals.total_amount, Decimal::from(104_500));
    }

    #[test]
    fn test_tax_rounds_half_up() {
        let totals = Totals::compute(
            &[line(1, 15, 1)],
            Decimal::ZERO,
            Decimal::ZERO,
            Decimal::from(10),
        );
        assert_eq!(totals.tax_amount, Decimal::from(2));
    }

    #[test]
    fn test_negative_shipping_fee_rejected() {
        let mut req = request();
        req.shipping_fee = Decimal::from(-1);
        assert!(matches!(
            validate_request(&req),
            Err(CheckoutError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_blank_address_field_rejected() {
        let mut req = request();
        req.shipping_address.city = "  ".to_owned();
        let err = validate_request(&req).unwrap_err();
        assert!(err.to_string().contains("shippingAddress.city"));
        assert!(validate_request(&request()).is_ok());
    }

    #[test]
    fn test_blank_coupon_code_is_ignored() {
        assert_eq!(normalized_code(Some("  ")), None);
        assert_eq!(normalized_code(Some(" SALE10 ")), Some("SALE10"));
        assert_eq!(normalized_code(None), None);
    }
}
