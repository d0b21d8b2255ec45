//! Unified error handling with Sentry integration.
//!
//! Every handler returns `Result<T, AppError>`. Domain errors keep their own
//! types inside services and are classified here into an HTTP status, a
//! stable machine-readable `kind` and an optional `details` object:
//!
//! ```json
//! { "error": { "kind": "insufficient_stock", "message": "...", "details": { ... } } }
//! ```
//!
//! Server errors are captured to Sentry and their message is not exposed.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use thiserror::Error;

use crate::db::{LedgerError, RepositoryError};
use crate::services::discount::CouponError;
use crate::services::{
    CancelError, CheckoutError, OrderError, PaymentError, RefundError, SnapshotError,
};

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error(transparent)]
    Cancel(#[from] CancelError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Refund(#[from] RefundError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Stock(#[from] LedgerError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Caller is not identified.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

type Classified = (StatusCode, &'static str);

const INTERNAL: Classified = (StatusCode::INTERNAL_SERVER_ERROR, "internal");

fn classify_repository(err: &RepositoryError) -> Classified {
    match err {
        RepositoryError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
        RepositoryError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
        RepositoryError::Database(_) | RepositoryError::DataCorruption(_) => INTERNAL,
    }
}

fn classify_ledger(err: &LedgerError) -> Classified {
    match err {
        LedgerError::InsufficientStock { .. } => (StatusCode::CONFLICT, "insufficient_stock"),
        LedgerError::UnknownSku(_) => (StatusCode::CONFLICT, "unknown_sku"),
        LedgerError::InvalidQuantity { .. } => (StatusCode::BAD_REQUEST, "invalid_quantity"),
        LedgerError::Repository(e) => classify_repository(e),
    }
}

fn classify_snapshot(err: &SnapshotError) -> Classified {
    match err {
        SnapshotError::EmptyCart => (StatusCode::BAD_REQUEST, "empty_cart"),
        SnapshotError::ProductUnavailable { .. } => (StatusCode::CONFLICT, "product_unavailable"),
        SnapshotError::InsufficientStock { .. } => (StatusCode::CONFLICT, "insufficient_stock"),
        SnapshotError::Repository(e) => classify_repository(e),
    }
}

const fn classify_coupon(err: &CouponError) -> Classified {
    match err {
        CouponError::NotFound(_) => (StatusCode::NOT_FOUND, "coupon_not_found"),
        _ => (StatusCode::UNPROCESSABLE_ENTITY, "coupon_rejected"),
    }
}

fn classify_cancel(err: &CancelError) -> Classified {
    match err {
        CancelError::NotFound(_) => (StatusCode::NOT_FOUND, "order_not_found"),
        CancelError::NotCancellable { .. } => (StatusCode::CONFLICT, "not_cancellable"),
        CancelError::RequiresManualRefund(_) => (StatusCode::CONFLICT, "requires_manual_refund"),
        CancelError::Stock(e) => classify_ledger(e),
        CancelError::Repository(e) => classify_repository(e),
    }
}

impl AppError {
    fn classify(&self) -> Classified {
        match self {
            Self::Checkout(err) => match err {
                CheckoutError::Snapshot(e) => classify_snapshot(e),
                CheckoutError::Coupon(e) => classify_coupon(e),
                CheckoutError::Stock(e) => classify_ledger(e),
                CheckoutError::CartChanged => (StatusCode::CONFLICT, "cart_changed"),
                CheckoutError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
                CheckoutError::Repository(e) => classify_repository(e),
            },
            Self::Cancel(err) => classify_cancel(err),
            Self::Order(err) => match err {
                OrderError::NotFound(_) => (StatusCode::NOT_FOUND, "order_not_found"),
                OrderError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
                OrderError::Cancel(e) => classify_cancel(e),
                OrderError::Repository(e) => classify_repository(e),
            },
            Self::Refund(err) => match err {
                RefundError::OrderNotFound(_) => (StatusCode::NOT_FOUND, "order_not_found"),
                RefundError::RefundNotFound(_) => (StatusCode::NOT_FOUND, "refund_not_found"),
                RefundError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
                RefundError::InvalidItem(_) => (StatusCode::BAD_REQUEST, "invalid_item"),
                RefundError::NotRefundable { .. } => (StatusCode::CONFLICT, "not_refundable"),
                RefundError::WindowExpired { .. } => (StatusCode::CONFLICT, "refund_window_expired"),
                RefundError::InFlight(_) => (StatusCode::CONFLICT, "refund_in_flight"),
                RefundError::OverQuantity { .. } => (StatusCode::CONFLICT, "over_quantity"),
                RefundError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
                RefundError::NotRestockable { .. } => (StatusCode::CONFLICT, "not_restockable"),
                RefundError::Stock(e) => classify_ledger(e),
                RefundError::Repository(e) => classify_repository(e),
            },
            Self::Payment(err) => match err {
                PaymentError::OrderNotFound(_) => (StatusCode::NOT_FOUND, "order_not_found"),
                PaymentError::InvalidSignature(_) => (StatusCode::UNAUTHORIZED, "invalid_signature"),
                PaymentError::NotConfigured => {
                    (StatusCode::SERVICE_UNAVAILABLE, "payments_not_configured")
                }
                PaymentError::Repository(e) => classify_repository(e),
            },
            Self::Stock(err) => classify_ledger(err),
            Self::Database(err) => classify_repository(err),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::Internal(_) => INTERNAL,
        }
    }

    /// Structured context for errors a client can act on.
    fn details(&self) -> Option<Value> {
        let stock = |sku: &dyn std::fmt::Display, available: i32, requested: i32| {
            json!({ "sku": sku.to_string(), "available": available, "requested": requested })
        };
        match self {
            Self::Checkout(CheckoutError::Snapshot(SnapshotError::InsufficientStock {
                sku,
                available,
                requested,
            }))
            | Self::Checkout(CheckoutError::Stock(LedgerError::InsufficientStock {
                sku,
                available,
                requested,
            })) => Some(stock(sku, *available, *requested)),
            Self::Checkout(CheckoutError::Snapshot(SnapshotError::ProductUnavailable {
                product_id,
                variant_id,
            })) => Some(json!({ "productId": product_id, "variantId": variant_id })),
            Self::Refund(RefundError::OverQuantity {
                order_item_id,
                requested,
                remaining,
            }) => Some(json!({
                "orderItemId": order_item_id,
                "requested": requested,
                "remaining": remaining,
            })),
            Self::Refund(RefundError::InvalidItem(order_item_id)) => {
                Some(json!({ "orderItemId": order_item_id }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind) = self.classify();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        // Don't expose internal error details to clients
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = json!({
            "error": {
                "kind": kind,
                "message": message,
                "details": self.details(),
            }
        });

        (status, Json(body)).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context for the current request.
pub fn set_sentry_user(user_id: &impl ToString) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            ..Default::default()
        }));
    });
}

/// Add a breadcrumb for a state-changing action.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of actions
/// leading up to an error.
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
