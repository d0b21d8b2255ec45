//! Integration tests for Stockroom.
//!
//! # Running Tests
//!
//! ```bash
//! # Point at a disposable database; migrations are applied automatically
//! export TEST_DATABASE_URL=postgres://localhost/stockroom_test
//!
//! # Run the database-backed tests
//! cargo test -p stockroom-integration-tests -- --ignored
//! ```
//!
//! Every test creates its own products, coupons and user ids, so tests can
//! share one database and run in parallel.

#![allow(clippy::missing_panics_doc)]

use chrono::{Duration, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use secrecy::SecretString;
use sqlx::PgPool;
use tokio::sync::mpsc::UnboundedReceiver;

use stockroom_core::{OrderId, OrderStatus, PaymentMethod, ProductId, SkuKey, UserId};
use stockroom_storefront::config::CheckoutSettings;
use stockroom_storefront::db::{self, StockLedger, cart::CartRepository};
use stockroom_storefront::models::{CheckoutRequest, ShippingAddress};
use stockroom_storefront::services::{
    CheckoutService, DisabledPaymentGateway, DomainEvent, EventBus, OrderService, RefundService,
};

/// Shared handles for one test.
pub struct TestContext {
    pub pool: PgPool,
    pub events: EventBus,
    pub settings: CheckoutSettings,
    pub gateway: DisabledPaymentGateway,
    // Held so publishing never hits a closed channel.
    _rx: UnboundedReceiver<DomainEvent>,
}

impl TestContext {
    /// Connect to `TEST_DATABASE_URL` and apply migrations.
    pub async fn new() -> Self {
        let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
        let pool = db::create_pool(&SecretString::from(url))
            .await
            .expect("Failed to connect to test database");
        db::migrate(&pool).await.expect("Failed to run migrations");

        let (events, rx) = EventBus::new();
        Self {
            pool,
            events,
            settings: CheckoutSettings::default(),
            gateway: DisabledPaymentGateway,
            _rx: rx,
        }
    }

    pub fn checkout(&self) -> CheckoutService<'_> {
        CheckoutService::new(&self.pool, &self.settings, &self.gateway, &self.events)
    }

    pub fn orders(&self) -> OrderService<'_> {
        OrderService::new(&self.pool, &self.events)
    }

    pub fn refunds(&self) -> RefundService<'_> {
        RefundService::new(&self.pool, &self.settings, &self.events)
    }

    /// Create an active product with its own stock unit.
    pub async fn product(&self, base_price: i64, stock: i32) -> SkuKey {
        let mut tx = self.pool.begin().await.expect("begin");
        let product_id: i32 = sqlx::query_scalar(
            r"
            INSERT INTO store.products (name, sku, base_price)
            VALUES ($1, $2, $3)
            RETURNING id
            ",
        )
        .bind("Test product")
        .bind(format!("TEST-{}", unique()))
        .bind(Decimal::from(base_price))
        .fetch_one(&mut *tx)
        .await
        .expect("insert product");

        let sku = SkuKey::product(ProductId::new(product_id));
        StockLedger::new(&mut *tx)
            .register(sku, stock, 0)
            .await
            .expect("register stock unit");
        tx.commit().await.expect("commit");
        sku
    }

    /// Create a coupon valid for the next day and return its code.
    pub async fn percentage_coupon(&self, percent: i64, max_discount: i64) -> String {
        let code = format!("SALE{}", unique());
        let now = Utc::now();
        sqlx::query(
            r"
            INSERT INTO store.coupons (
                code, discount_type, discount_value, max_discount_amount, starts_at, ends_at
            )
            VALUES ($1, 'percentage', $2, $3, $4, $5)
            ",
        )
        .bind(&code)
        .bind(Decimal::from(percent))
        .bind(Decimal::from(max_discount))
        .bind(now - Duration::hours(1))
        .bind(now + Duration::days(1))
        .execute(&self.pool)
        .await
        .expect("insert coupon");
        code
    }

    pub async fn add_to_cart(&self, user_id: UserId, sku: SkuKey, quantity: i32) {
        CartRepository::new(&self.pool)
            .add(user_id, sku, quantity)
            .await
            .expect("add to cart");
    }

    pub async fn stock(&self, sku: SkuKey) -> i32 {
        let mut conn = self.pool.acquire().await.expect("acquire");
        StockLedger::new(&mut *conn)
            .levels(&[sku])
            .await
            .expect("levels")
            .first()
            .map(|l| l.quantity)
            .expect("stock unit exists")
    }

    pub async fn order_count(&self, user_id: UserId) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM store.orders WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .expect("count orders")
    }

    pub async fn order_item_count(&self, user_id: UserId) -> i64 {
        sqlx::query_scalar(
            r"
            SELECT COUNT(*)
            FROM store.order_items i
            JOIN store.orders o ON o.id = i.order_id
            WHERE o.user_id = $1
            ",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .expect("count order items")
    }

    pub async fn cart_line_count(&self, user_id: UserId) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM store.cart_items WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .expect("count cart lines")
    }

    /// Redemptions of a coupon as `(used_count, usage rows)`.
    pub async fn coupon_redemptions(&self, code: &str) -> (i32, i64) {
        sqlx::query_as(
            r"
            SELECT c.used_count, COUNT(u.id)
            FROM store.coupons c
            LEFT JOIN store.coupon_usages u ON u.coupon_id = c.id
            WHERE c.code = $1
            GROUP BY c.id
            ",
        )
        .bind(code)
        .fetch_one(&self.pool)
        .await
        .expect("coupon redemptions")
    }

    /// Walk an order through the happy path to `delivered`.
    pub async fn deliver(&self, order_id: OrderId) {
        for status in [
            OrderStatus::Confirmed,
            OrderStatus::Processing,
            OrderStatus::Shipping,
            OrderStatus::Delivered,
        ] {
            self.orders()
                .update_status(order_id, status)
                .await
                .expect("status transition");
        }
    }
}

/// A user id no other test uses.
pub fn new_user() -> UserId {
    UserId::new(rand::rng().random_range(1_000_000..i32::MAX))
}

fn unique() -> u64 {
    rand::rng().random()
}

/// A valid checkout request.
pub fn checkout_request(payment_method: PaymentMethod, coupon_code: Option<&str>) -> CheckoutRequest {
    CheckoutRequest {
        payment_method,
        shipping_address: ShippingAddress {
            recipient_name: "Kim Minji".to_owned(),
            phone: "010-0000-0000".to_owned(),
            line1: "1 Test Street".to_owned(),
            line2: None,
            city: "Seoul".to_owned(),
            postal_code: "04524".to_owned(),
            country: "KR".to_owned(),
        },
        shipping_fee: Decimal::ZERO,
        shipping_provider: None,
        coupon_code: coupon_code.map(str::to_owned),
        note: None,
    }
}
