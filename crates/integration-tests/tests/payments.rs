//! Payment callbacks against a live database.

#![allow(clippy::unwrap_used)]

use stockroom_core::{OrderStatus, PaymentMethod, PaymentStatus};
use stockroom_integration_tests::{TestContext, checkout_request, new_user};
use stockroom_storefront::models::OrderWithItems;
use stockroom_storefront::services::{PaymentCallback, PaymentError, PaymentService};

async fn online_order(ctx: &TestContext) -> OrderWithItems {
    let sku = ctx.product(30_000, 5).await;
    let user = new_user();
    ctx.add_to_cart(user, sku, 1).await;
    let receipt = ctx
        .checkout()
        .create_order(user, &checkout_request(PaymentMethod::Online, None))
        .await
        .unwrap();
    // No gateway configured, so no redirect is issued
    assert!(receipt.payment_url.is_none());
    receipt.order
}

fn callback(order: &OrderWithItems, success: bool) -> PaymentCallback {
    PaymentCallback {
        order_number: order.order.order_number.clone(),
        success,
        transaction_id: Some("txn_0001".to_owned()),
    }
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (TEST_DATABASE_URL)"]
async fn test_successful_callback_marks_paid_and_confirms() {
    let ctx = TestContext::new().await;
    let placed = online_order(&ctx).await;
    let payments = PaymentService::new(&ctx.pool, &ctx.events);

    let order = payments.handle_callback(&callback(&placed, true)).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    assert_eq!(order.order_status, OrderStatus::Confirmed);
    assert_eq!(order.transaction_id.as_deref(), Some("txn_0001"));

    // Gateway retries are no-ops
    let replay = payments.handle_callback(&callback(&placed, true)).await.unwrap();
    assert_eq!(replay.payment_status, PaymentStatus::Paid);
    assert_eq!(replay.paid_at, order.paid_at);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (TEST_DATABASE_URL)"]
async fn test_failed_callback_marks_payment_failed() {
    let ctx = TestContext::new().await;
    let placed = online_order(&ctx).await;

    let order = PaymentService::new(&ctx.pool, &ctx.events)
        .handle_callback(&callback(&placed, false))
        .await
        .unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Failed);
    assert_eq!(order.order_status, OrderStatus::Pending);
}

#[tokio::test]
#[ignore = "Requires PostgreSQL (TEST_DATABASE_URL)"]
async fn test_callback_for_unknown_order_is_rejected() {
    let ctx = TestContext::new().await;

    let err = PaymentService::new(&ctx.pool, &ctx.events)
        .handle_callback(&PaymentCallback {
            order_number: "ORD-DOES-NOT-EXIST".to_owned(),
            success: true,
            transaction_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::OrderNotFound(_)));
}
