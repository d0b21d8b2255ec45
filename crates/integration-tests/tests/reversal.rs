//! Cancellation, refunds and restocking against a live database.

#![allow(clippy::unwrap_used)]

use rust_decimal::Decimal;

use stockroom_core::{OrderStatus, PaymentMethod, PaymentStatus, RefundStatus, RefundType};
use stockroom_integration_tests::{TestContext, checkout_request, new_user};
use stockroom_storefront::models::{OrderWithItems, RefundItemRequest, RefundRequest};
use stockroom_storefront::services::{CancelError, CancellationService, RefundError};

async fn place_order(ctx: &TestContext, price: i64, stock: i32, quantity: i32) -> OrderWithItems {
    let sku = ctx.product(price, stock).await;
    let user = new_user();
    ctx.add_to_cart(user, sku, quantity).await;
    ctx.checkout()
        .create_order(user, &checkout_request(PaymentMethod::BankTransfer, None))
        .await
        .unwrap()
        .order
}

fn request(refund_type: RefundType, order: &OrderWithItems, quantity: i32) -> RefundRequest {
    RefundRequest {
        refund_type,
        reason: "Arrived chipped".to_owned(),
        items: vec![RefundItemRequest {
            order_item_id: order.items.first().unwrap().id,
            quantity,
        }],
    }
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
#[ignore = "Requires PostgreSQL (TEST_DATABASE_URL)"]
async fn test_cancel_restores_stock_and_fails_payment() {
    let ctx = TestContext::new().await;
    let sku = ctx.product(12_000, 4).await;
    let user = new_user();
    ctx.add_to_cart(user, sku, 3).await;

    let placed = ctx
        .checkout()
        .create_order(user, &checkout_request(PaymentMethod::BankTransfer, None))
        .await
        .unwrap()
        .order;
    assert_eq!(ctx.stock(sku).await, 1);

    let cancelled = CancellationService::new(&ctx.pool, &ctx.events)
        .cancel(placed.order.id, user, Some("Changed my mind".to_owned()))
        .await
        .unwrap();

    assert_eq!(cancelled.order_status, OrderStatus::Cancelled);
    assert_eq!(cancelled.payment_status, PaymentStatus::Failed);
    assert_eq!(ctx.stock(sku).await, 4);

    // A second cancel must not release the stock again
    let err = CancellationService::new(&ctx.pool, &ctx.events)
        .cancel(placed.order.id, user, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CancelError::NotCancellable { .. }));
    assert_eq!(ctx.stock(sku).await, 4);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (TEST_DATABASE_URL)"]
async fn test_cancel_of_someone_elses_order_is_not_found() {
    let ctx = TestContext::new().await;
    let placed = place_order(&ctx, 12_000, 4, 1).await;

    let err = CancellationService::new(&ctx.pool, &ctx.events)
        .cancel(placed.order.id, new_user(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CancelError::NotFound(_)));
}

// =============================================================================
// Refunds
// =============================================================================

#[tokio::test]
#[ignore = "Requires PostgreSQL (TEST_DATABASE_URL)"]
async fn test_refund_quantity_ceiling_spans_refunds() {
    let ctx = TestContext::new().await;
    let placed = place_order(&ctx, 10_000, 10, 3).await;
    let (order_id, user) = (placed.order.id, placed.order.user_id);
    ctx.deliver(order_id).await;

    let refunds = ctx.refunds();
    let first = refunds
        .create(order_id, user, &request(RefundType::Refund, &placed, 2))
        .await
        .unwrap();
    assert_eq!(first.refund.refund_amount, Decimal::from(20_000));
    assert_eq!(first.refund.status, RefundStatus::Pending);

    let id = first.refund.id;
    refunds.approve(id, None).await.unwrap();
    refunds.start_processing(id, None).await.unwrap();
    let done = refunds.complete(id, Some("Paid out".to_owned())).await.unwrap();
    assert_eq!(done.status, RefundStatus::Completed);
    assert!(done.completed_at.is_some());

    let err = refunds
        .create(order_id, user, &request(RefundType::Refund, &placed, 2))
        .await
        .unwrap_err();
    match err {
        RefundError::OverQuantity {
            requested,
            remaining,
            ..
        } => {
            assert_eq!(requested, 2);
            assert_eq!(remaining, 1);
        }
        other => panic!("expected OverQuantity, got {other:?}"),
    }
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (TEST_DATABASE_URL)"]
async fn test_concurrent_refunds_respect_quantity_ceiling() {
    let ctx = TestContext::new().await;
    let placed = place_order(&ctx, 10_000, 10, 3).await;
    let (order_id, user) = (placed.order.id, placed.order.user_id);
    ctx.deliver(order_id).await;

    let refunds = ctx.refunds();
    let first = request(RefundType::Refund, &placed, 2);
    let second = request(RefundType::Refund, &placed, 2);
    let (a, b) = tokio::join!(
        refunds.create(order_id, user, &first),
        refunds.create(order_id, user, &second),
    );

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    for outcome in &outcomes {
        if let Err(err) = outcome {
            assert!(
                matches!(err, RefundError::InFlight(_) | RefundError::OverQuantity { .. }),
                "unexpected error: {err:?}"
            );
        }
    }

    let covered: i64 = sqlx::query_scalar(
        r"
        SELECT COALESCE(SUM(ri.quantity), 0)::BIGINT
        FROM store.refund_items ri
        JOIN store.refunds r ON r.id = ri.refund_id
        WHERE r.order_id = $1
        ",
    )
    .bind(order_id)
    .fetch_one(&ctx.pool)
    .await
    .unwrap();
    assert_eq!(covered, 2);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (TEST_DATABASE_URL)"]
async fn test_in_flight_refund_blocks_another() {
    let ctx = TestContext::new().await;
    let placed = place_order(&ctx, 10_000, 10, 3).await;
    let (order_id, user) = (placed.order.id, placed.order.user_id);
    ctx.deliver(order_id).await;

    let refunds = ctx.refunds();
    let pending = refunds
        .create(order_id, user, &request(RefundType::Refund, &placed, 1))
        .await
        .unwrap();

    let err = refunds
        .create(order_id, user, &request(RefundType::Refund, &placed, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, RefundError::InFlight(_)));

    // Withdrawing the first one frees the order up again
    let withdrawn = refunds.cancel_by_user(pending.refund.id, user).await.unwrap();
    assert_eq!(withdrawn.status, RefundStatus::Cancelled);
    refunds
        .create(order_id, user, &request(RefundType::Refund, &placed, 3))
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (TEST_DATABASE_URL)"]
async fn test_refund_on_pending_order_is_refused() {
    let ctx = TestContext::new().await;
    let placed = place_order(&ctx, 10_000, 10, 1).await;

    let err = ctx
        .refunds()
        .create(
            placed.order.id,
            placed.order.user_id,
            &request(RefundType::Refund, &placed, 1),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RefundError::NotRefundable { .. }));
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (TEST_DATABASE_URL)"]
async fn test_completed_return_restocks_once() {
    let ctx = TestContext::new().await;
    let sku = ctx.product(10_000, 10).await;
    let user = new_user();
    ctx.add_to_cart(user, sku, 3).await;
    let placed = ctx
        .checkout()
        .create_order(user, &checkout_request(PaymentMethod::BankTransfer, None))
        .await
        .unwrap()
        .order;
    ctx.deliver(placed.order.id).await;
    assert_eq!(ctx.stock(sku).await, 7);

    let refunds = ctx.refunds();
    let id = refunds
        .create(placed.order.id, user, &request(RefundType::Return, &placed, 2))
        .await
        .unwrap()
        .refund
        .id;

    // Not restockable until the return is completed
    let early = refunds.restock(id).await.unwrap_err();
    assert!(matches!(early, RefundError::NotRestockable { .. }));

    refunds.approve(id, None).await.unwrap();
    refunds.start_processing(id, None).await.unwrap();
    refunds.complete(id, None).await.unwrap();

    let restocked = refunds.restock(id).await.unwrap();
    assert!(restocked.restocked_at.is_some());
    assert_eq!(ctx.stock(sku).await, 9);

    let again = refunds.restock(id).await.unwrap_err();
    assert!(matches!(again, RefundError::NotRestockable { .. }));
    assert_eq!(ctx.stock(sku).await, 9);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (TEST_DATABASE_URL)"]
async fn test_return_on_cancelled_order_does_not_restock_twice() {
    let ctx = TestContext::new().await;
    let sku = ctx.product(10_000, 4).await;
    let user = new_user();
    ctx.add_to_cart(user, sku, 3).await;
    let placed = ctx
        .checkout()
        .create_order(user, &checkout_request(PaymentMethod::BankTransfer, None))
        .await
        .unwrap()
        .order;
    assert_eq!(ctx.stock(sku).await, 1);

    CancellationService::new(&ctx.pool, &ctx.events)
        .cancel(placed.order.id, user, None)
        .await
        .unwrap();
    assert_eq!(ctx.stock(sku).await, 4);

    let refunds = ctx.refunds();
    let id = refunds
        .create(placed.order.id, user, &request(RefundType::Return, &placed, 3))
        .await
        .unwrap()
        .refund
        .id;
    refunds.approve(id, None).await.unwrap();
    refunds.start_processing(id, None).await.unwrap();
    refunds.complete(id, None).await.unwrap();

    let err = refunds.restock(id).await.unwrap_err();
    assert!(matches!(err, RefundError::NotRestockable { .. }));
    assert_eq!(ctx.stock(sku).await, 4);
    assert!(refunds.get(id).await.unwrap().refund.restocked_at.is_none());
}
