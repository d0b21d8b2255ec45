//! Checkout against a live database: stock reservation and coupons.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use rust_decimal::Decimal;

use stockroom_core::PaymentMethod;
use stockroom_integration_tests::{TestContext, checkout_request, new_user};
use stockroom_storefront::db::{LedgerError, StockLedger};
use stockroom_storefront::services::CheckoutError;
use stockroom_storefront::services::discount::CouponError;
use stockroom_storefront::services::snapshot::SnapshotError;

// =============================================================================
// Stock Reservation
// =============================================================================

#[tokio::test]
#[ignore = "Requires PostgreSQL (TEST_DATABASE_URL)"]
async fn test_concurrent_checkouts_never_oversell() {
    let ctx = TestContext::new().await;
    let sku = ctx.product(48_000, 1).await;

    let (alice, bob) = (new_user(), new_user());
    ctx.add_to_cart(alice, sku, 1).await;
    ctx.add_to_cart(bob, sku, 1).await;

    let request = checkout_request(PaymentMethod::BankTransfer, None);
    let checkout = ctx.checkout();
    let (a, b) = tokio::join!(
        checkout.create_order(alice, &request),
        checkout.create_order(bob, &request),
    );

    let outcomes = [a, b];
    let placed = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(placed, 1, "exactly one checkout must win the last unit");

    for outcome in &outcomes {
        if let Err(err) = outcome {
            assert!(
                matches!(
                    err,
                    CheckoutError::Stock(LedgerError::InsufficientStock { .. })
                        | CheckoutError::Snapshot(SnapshotError::InsufficientStock { .. })
                ),
                "unexpected error: {err:?}"
            );
        }
    }
    assert_eq!(ctx.stock(sku).await, 0);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (TEST_DATABASE_URL)"]
async fn test_reserve_batch_is_all_or_nothing() {
    let ctx = TestContext::new().await;
    let plenty = ctx.product(10_000, 5).await;
    let scarce = ctx.product(10_000, 1).await;

    let mut tx = ctx.pool.begin().await.unwrap();
    let err = StockLedger::new(&mut *tx)
        .reserve(&[(plenty, 2), (scarce, 3)])
        .await
        .unwrap_err();
    drop(tx);

    match err {
        LedgerError::InsufficientStock {
            sku,
            available,
            requested,
        } => {
            assert_eq!(sku, scarce);
            assert_eq!(available, 1);
            assert_eq!(requested, 3);
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }
    assert_eq!(ctx.stock(plenty).await, 5);
    assert_eq!(ctx.stock(scarce).await, 1);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (TEST_DATABASE_URL)"]
async fn test_shortfall_inside_checkout_leaves_no_order() {
    let ctx = TestContext::new().await;
    let mug = ctx.product(15_000, 5).await;
    let skillet = ctx.product(48_000, 1).await;
    let user = new_user();
    ctx.add_to_cart(user, mug, 1).await;
    ctx.add_to_cart(user, skillet, 1).await;

    // Take the last skillet in an open transaction: the checkout's lock-free
    // pre-check still sees one, then its reservation waits on the row lock
    // and finds none once this commits.
    let mut other = ctx.pool.begin().await.unwrap();
    StockLedger::new(&mut *other)
        .reserve(&[(skillet, 1)])
        .await
        .unwrap();

    let request = checkout_request(PaymentMethod::BankTransfer, None);
    let checkout = ctx.checkout();
    let (result, ()) = tokio::join!(checkout.create_order(user, &request), async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        other.commit().await.unwrap();
    });

    let err = result.unwrap_err();
    assert!(
        matches!(
            err,
            CheckoutError::Stock(LedgerError::InsufficientStock {
                available: 0,
                requested: 1,
                ..
            })
        ),
        "unexpected error: {err:?}"
    );
    assert_eq!(ctx.order_count(user).await, 0);
    assert_eq!(ctx.order_item_count(user).await, 0);
    assert_eq!(ctx.cart_line_count(user).await, 2);
    assert_eq!(ctx.stock(mug).await, 5);
    assert_eq!(ctx.stock(skillet).await, 0);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (TEST_DATABASE_URL)"]
async fn test_one_cart_becomes_one_order() {
    let ctx = TestContext::new().await;
    let sku = ctx.product(15_000, 10).await;
    let user = new_user();
    ctx.add_to_cart(user, sku, 2).await;

    let request = checkout_request(PaymentMethod::BankTransfer, None);
    let checkout = ctx.checkout();
    let (a, b) = tokio::join!(
        checkout.create_order(user, &request),
        checkout.create_order(user, &request),
    );

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    for outcome in &outcomes {
        if let Err(err) = outcome {
            assert!(
                matches!(
                    err,
                    CheckoutError::CartChanged | CheckoutError::Snapshot(SnapshotError::EmptyCart)
                ),
                "unexpected error: {err:?}"
            );
        }
    }
    assert_eq!(ctx.order_count(user).await, 1);
    assert_eq!(ctx.stock(sku).await, 8);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (TEST_DATABASE_URL)"]
async fn test_receive_refuses_overflowing_quantity() {
    let ctx = TestContext::new().await;
    let sku = ctx.product(1_000, i32::MAX - 1).await;

    let mut tx = ctx.pool.begin().await.unwrap();
    let err = StockLedger::new(&mut *tx)
        .receive(&[(sku, 5)])
        .await
        .unwrap_err();
    drop(tx);

    assert!(matches!(err, LedgerError::InvalidQuantity { quantity: 5, .. }));
    assert_eq!(ctx.stock(sku).await, i32::MAX - 1);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (TEST_DATABASE_URL)"]
async fn test_checkout_reserves_stock_and_clears_cart() {
    let ctx = TestContext::new().await;
    let sku = ctx.product(15_000, 10).await;
    let user = new_user();
    ctx.add_to_cart(user, sku, 3).await;

    let receipt = ctx
        .checkout()
        .create_order(user, &checkout_request(PaymentMethod::BankTransfer, None))
        .await
        .unwrap();

    assert_eq!(receipt.order.items.len(), 1);
    assert_eq!(receipt.order.order.subtotal, Decimal::from(45_000));
    assert!(receipt.payment_url.is_none());
    assert_eq!(ctx.stock(sku).await, 7);

    // Cart is gone, so a second checkout has nothing to buy
    let err = ctx
        .checkout()
        .create_order(user, &checkout_request(PaymentMethod::BankTransfer, None))
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::Snapshot(SnapshotError::EmptyCart)));
}

// =============================================================================
// Coupons
// =============================================================================

#[tokio::test]
#[ignore = "Requires PostgreSQL (TEST_DATABASE_URL)"]
async fn test_percentage_coupon_is_capped_and_single_use() {
    let ctx = TestContext::new().await;
    let sku = ctx.product(100_000, 5).await;
    let code = ctx.percentage_coupon(10, 5_000).await;
    let user = new_user();

    ctx.add_to_cart(user, sku, 1).await;
    let receipt = ctx
        .checkout()
        .create_order(user, &checkout_request(PaymentMethod::BankTransfer, Some(&code)))
        .await
        .unwrap();
    assert_eq!(receipt.order.order.discount_amount, Decimal::from(5_000));
    assert_eq!(receipt.order.order.total_amount, Decimal::from(95_000));
    assert!(receipt.order.order.coupon_id.is_some());

    ctx.add_to_cart(user, sku, 1).await;
    let err = ctx
        .checkout()
        .create_order(user, &checkout_request(PaymentMethod::BankTransfer, Some(&code)))
        .await
        .unwrap_err();
    assert!(
        matches!(err, CheckoutError::Coupon(CouponError::UserLimitReached { limit: 1 })),
        "unexpected error: {err:?}"
    );
    // The refused checkout reserved nothing
    assert_eq!(ctx.stock(sku).await, 4);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (TEST_DATABASE_URL)"]
async fn test_concurrent_checkouts_redeem_coupon_once_per_user() {
    let ctx = TestContext::new().await;
    let sku = ctx.product(100_000, 10).await;
    let code = ctx.percentage_coupon(10, 5_000).await;
    let user = new_user();
    ctx.add_to_cart(user, sku, 1).await;

    let request = checkout_request(PaymentMethod::BankTransfer, Some(&code));
    let checkout = ctx.checkout();
    let (a, b) = tokio::join!(
        checkout.create_order(user, &request),
        checkout.create_order(user, &request),
    );

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    for outcome in &outcomes {
        if let Err(err) = outcome {
            assert!(
                matches!(
                    err,
                    CheckoutError::CartChanged
                        | CheckoutError::Snapshot(SnapshotError::EmptyCart)
                        | CheckoutError::Coupon(CouponError::UserLimitReached { limit: 1 })
                ),
                "unexpected error: {err:?}"
            );
        }
    }
    assert_eq!(ctx.coupon_redemptions(&code).await, (1, 1));
    assert_eq!(ctx.order_count(user).await, 1);
    assert_eq!(ctx.stock(sku).await, 9);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (TEST_DATABASE_URL)"]
async fn test_unknown_coupon_is_not_found() {
    let ctx = TestContext::new().await;
    let sku = ctx.product(20_000, 5).await;
    let user = new_user();
    ctx.add_to_cart(user, sku, 1).await;

    let err = ctx
        .checkout()
        .create_order(user, &checkout_request(PaymentMethod::BankTransfer, Some("NOPE-0000")))
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::Coupon(CouponError::NotFound(_))));
    assert_eq!(ctx.stock(sku).await, 5);
}
