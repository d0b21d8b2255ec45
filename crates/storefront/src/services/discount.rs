//! Discount calculator.
//!
//! [`apply`] is pure: it sees the coupon, the order amount, and a
//! [`RedemptionContext`] the caller assembled, and never touches the
//! database. Recording the redemption is the checkout transaction's job.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use stockroom_core::money::{percent_of, truncate_whole};
use stockroom_core::{CategoryId, CouponScope, DiscountType, ProductId};

use crate::models::{Coupon, PricedLine};

/// Why a coupon was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CouponError {
    #[error("coupon {0} not found")]
    NotFound(String),

    #[error("coupon is inactive")]
    Inactive,

    #[error("coupon is not valid yet")]
    NotStarted,

    #[error("coupon has expired")]
    Expired,

    #[error("coupon usage limit reached")]
    UsageLimitReached,

    #[error("coupon already used the maximum {limit} times by this user")]
    UserLimitReached { limit: i32 },

    #[error("order amount {order_amount} is below the coupon minimum {minimum}")]
    BelowMinimum {
        minimum: Decimal,
        order_amount: Decimal,
    },

    #[error("coupon does not apply to any item in this order")]
    NotApplicable,
}

/// Products and categories present in an order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderScope {
    pub product_ids: BTreeSet<ProductId>,
    pub category_ids: BTreeSet<CategoryId>,
}

impl OrderScope {
    /// Collect the scope of a priced cart.
    #[must_use]
    pub fn from_lines(lines: &[PricedLine]) -> Self {
        Self {
            product_ids: lines.iter().map(|l| l.sku.product_id).collect(),
            category_ids: lines.iter().filter_map(|l| l.category_id).collect(),
        }
    }

    fn intersects(&self, scope: CouponScope, targets: &[i32]) -> bool {
        match scope {
            CouponScope::All => true,
            CouponScope::Category => targets
                .iter()
                .any(|id| self.category_ids.contains(&CategoryId::new(*id))),
            CouponScope::Product => targets
                .iter()
                .any(|id| self.product_ids.contains(&ProductId::new(*id))),
        }
    }
}

/// Facts about the redemption that live outside the coupon row.
#[derive(Debug, Clone, Copy)]
pub struct RedemptionContext<'a> {
    pub now: DateTime<Utc>,
    /// Times this user has already redeemed the coupon.
    pub user_redemptions: i64,
    pub scope: &'a OrderScope,
}

/// Result of applying a coupon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountOutcome {
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
}

/// Validate `coupon` against the order and compute the discount.
///
/// Rules are checked in order and the first failure is returned. The
/// discount is always within `0..=order_amount`.
///
/// # Errors
///
/// Returns the `CouponError` for the first rule that fails.
pub fn apply(
    coupon: &Coupon,
    order_amount: Decimal,
    ctx: &RedemptionContext<'_>,
) -> Result<DiscountOutcome, CouponError> {
    if !coupon.is_active {
        return Err(CouponError::Inactive);
    }
    if ctx.now < coupon.starts_at {
        return Err(CouponError::NotStarted);
    }
    if ctx.now > coupon.ends_at {
        return Err(CouponError::Expired);
    }

    if let Some(limit) = coupon.usage_limit
        && coupon.used_count >= limit
    {
        return Err(CouponError::UsageLimitReached);
    }

    if ctx.user_redemptions >= i64::from(coupon.user_limit) {
        return Err(CouponError::UserLimitReached {
            limit: coupon.user_limit,
        });
    }

    if order_amount < coupon.min_order_amount {
        return Err(CouponError::BelowMinimum {
            minimum: coupon.min_order_amount,
            order_amount,
        });
    }

    if !ctx.scope.intersects(coupon.scope, &coupon.target_ids) {
        return Err(CouponError::NotApplicable);
    }

    let raw = match coupon.discount_type {
        DiscountType::Percentage => {
            let raw = truncate_whole(percent_of(order_amount, coupon.discount_value));
            coupon.max_discount_amount.map_or(raw, |cap| raw.min(cap))
        }
        DiscountType::Fixed => coupon.discount_value,
    };

    let discount_amount = raw.max(Decimal::ZERO).min(order_amount);
    Ok(DiscountOutcome {
        discount_amount,
        final_amount: order_amount - discount_amount,
    })
}
