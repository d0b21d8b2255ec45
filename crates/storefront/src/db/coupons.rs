//! Coupon repository.

use sqlx::{PgConnection, PgPool};
use tracing::instrument;

use stockroom_core::{CouponId, OrderId, UserId};

use super::{RepositoryError, visible};
use crate::models::Coupon;

const FIND_BY_CODE_SQL: &str = concat!(
    "SELECT c.id, c.code, c.discount_type, c.discount_value, c.min_order_amount, ",
    "c.max_discount_amount, c.usage_limit, c.used_count, c.user_limit, ",
    "c.starts_at, c.ends_at, c.scope, c.target_ids, c.is_active ",
    "FROM store.coupons c ",
    "WHERE c.code = $1 AND ",
    visible!("c"),
);

/// Repository for coupon reads.
pub struct CouponRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> CouponRepository<'a> {
    /// Create a new coupon repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Look up a visible coupon by its code.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>, RepositoryError> {
        let coupon = sqlx::query_as::<_, Coupon>(FIND_BY_CODE_SQL)
            .bind(code)
            .fetch_optional(self.pool)
            .await?;
        Ok(coupon)
    }

    /// Number of times a user has redeemed a coupon.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn count_user_redemptions(
        &self,
        coupon_id: CouponId,
        user_id: UserId,
    ) -> Result<i64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*)
            FROM store.coupon_usages
            WHERE coupon_id = $1 AND user_id = $2
            ",
        )
        .bind(coupon_id)
        .bind(user_id)
        .fetch_one(self.pool)
        .await?;
        Ok(count)
    }
}

/// Outcome of [`record_redemption`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redemption {
    Recorded,
    UsageLimitReached,
    UserLimitReached { limit: i32 },
}

#[derive(Debug, sqlx::FromRow)]
struct LimitsRow {
    usage_limit: Option<i32>,
    used_count: i32,
    user_limit: i32,
}

/// Check both limits for a coupon against current counts.
fn check_limits(limits: &LimitsRow, user_redemptions: i64) -> Redemption {
    if limits.usage_limit.is_some_and(|limit| limits.used_count >= limit) {
        Redemption::UsageLimitReached
    } else if user_redemptions >= i64::from(limits.user_limit) {
        Redemption::UserLimitReached {
            limit: limits.user_limit,
        }
    } else {
        Redemption::Recorded
    }
}

/// Record one redemption inside the checkout transaction.
///
/// The coupon row is locked first, so checkouts redeeming the same coupon
/// serialize here and each re-checks both the global and the per-user limit
/// against committed redemptions. Anything but `Redemption::Recorded` means
/// nothing was written and the caller must roll back.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if a statement fails.
#[instrument(skip(conn))]
pub async fn record_redemption(
    conn: &mut PgConnection,
    coupon_id: CouponId,
    user_id: UserId,
    order_id: OrderId,
) -> Result<Redemption, RepositoryError> {
    let limits = sqlx::query_as::<_, LimitsRow>(
        r"
        SELECT usage_limit, used_count, user_limit
        FROM store.coupons
        WHERE id = $1
        FOR UPDATE
        ",
    )
    .bind(coupon_id)
    .fetch_one(&mut *conn)
    .await?;

    let user_redemptions: i64 = sqlx::query_scalar(
        r"
        SELECT COUNT(*)
        FROM store.coupon_usages
        WHERE coupon_id = $1 AND user_id = $2
        ",
    )
    .bind(coupon_id)
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    let outcome = check_limits(&limits, user_redemptions);
    if outcome != Redemption::Recorded {
        tracing::info!(coupon_id = %coupon_id, user_id = %user_id, ?outcome, "Coupon redemption refused");
        return Ok(outcome);
    }

    sqlx::query("UPDATE store.coupons SET used_count = used_count + 1 WHERE id = $1")
        .bind(coupon_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        r"
        INSERT INTO store.coupon_usages (coupon_id, user_id, order_id)
        VALUES ($1, $2, $3)
        ",
    )
    .bind(coupon_id)
    .bind(user_id)
    .bind(order_id)
    .execute(&mut *conn)
    .await?;

    Ok(Redemption::Recorded)
}
