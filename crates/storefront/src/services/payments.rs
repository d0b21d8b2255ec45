//! Payment collaborator and callback handling.
//!
//! Checkout asks a [`PaymentGateway`] for a redirect URL after commit. The
//! gateway later reports the outcome through a signed callback, which
//! [`CallbackVerifier`] authenticates and [`PaymentService`] applies.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sqlx::PgPool;
use thiserror::Error;
use tracing::instrument;
use url::Url;

use stockroom_core::{OrderId, OrderStatus, PaymentStatus};

use super::collaborators::CollaboratorError;
use super::events::{DomainEvent, EventBus};
use crate::db::RepositoryError;
use crate::db::orders::{self, OrderField};
use crate::models::Order;

/// Signature scheme version prefix.
const SIGNATURE_VERSION: &str = "v1";

/// Errors from payment callback handling.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// No order has the reported order number.
    #[error("order {0} not found")]
    OrderNotFound(String),

    /// The callback signature did not verify.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// No callback secret is configured, so no callback can be trusted.
    #[error("payment callbacks are not configured")]
    NotConfigured,

    /// Repository/database error.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<sqlx::Error> for PaymentError {
    fn from(err: sqlx::Error) -> Self {
        Self::Repository(RepositoryError::Database(err))
    }
}

/// Issues payment redirect URLs.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Request a redirect URL for an order. `None` means the gateway has
    /// nothing for the customer to visit.
    async fn request_payment_url(
        &self,
        order_id: OrderId,
        order_number: &str,
        amount: Decimal,
    ) -> Result<Option<String>, CollaboratorError>;
}

/// Gateway used when no `PAYMENT_GATEWAY_URL` is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledPaymentGateway;

#[async_trait]
impl PaymentGateway for DisabledPaymentGateway {
    async fn request_payment_url(
        &self,
        _order_id: OrderId,
        _order_number: &str,
        _amount: Decimal,
    ) -> Result<Option<String>, CollaboratorError> {
        Ok(None)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentSessionRequest<'a> {
    order_id: OrderId,
    order_number: &'a str,
    #[serde(with = "rust_decimal::serde::str")]
    amount: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentSessionResponse {
    redirect_url: Option<String>,
}

/// Gateway reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpPaymentGateway {
    /// Create a gateway client posting to `endpoint`.
    #[must_use]
    pub fn new(endpoint: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self))]
    async fn request_payment_url(
        &self,
        order_id: OrderId,
        order_number: &str,
        amount: Decimal,
    ) -> Result<Option<String>, CollaboratorError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&PaymentSessionRequest {
                order_id,
                order_number,
                amount,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::Rejected(format!(
                "payment gateway returned {status}"
            )));
        }

        let body: PaymentSessionResponse = response.json().await?;
        Ok(body.redirect_url)
    }
}

/// Verifies HMAC-SHA256 signatures on payment callbacks.
///
/// The signed message is `v1:{timestamp}:{body}` and the signature header
/// carries `v1=<hex digest>`.
#[derive(Clone)]
pub struct CallbackVerifier {
    secret: SecretString,
    tolerance_secs: i64,
}

impl std::fmt::Debug for CallbackVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackVerifier")
            .field("secret", &"[REDACTED]")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

impl CallbackVerifier {
    #[must_use]
    pub const fn new(secret: SecretString, tolerance_secs: i64) -> Self {
        Self {
            secret,
            tolerance_secs,
        }
    }

    /// Verify a callback against the current time.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::InvalidSignature` if the timestamp is malformed
    /// or stale, or the signature does not match.
    pub fn verify(&self, timestamp: &str, body: &str, signature: &str) -> Result<(), PaymentError> {
        self.verify_at(timestamp, body, signature, Utc::now().timestamp())
    }

    /// Verify a callback as of `now` (unix seconds).
    ///
    /// # Errors
    ///
    /// See [`verify`](Self::verify).
    pub fn verify_at(
        &self,
        timestamp: &str,
        body: &str,
        signature: &str,
        now: i64,
    ) -> Result<(), PaymentError> {
        let ts: i64 = timestamp
            .parse()
            .map_err(|_| PaymentError::InvalidSignature("invalid timestamp".to_string()))?;

        if (now - ts).abs() > self.tolerance_secs {
            return Err(PaymentError::InvalidSignature(
                "timestamp outside tolerance".to_string(),
            ));
        }

        let expected = self.sign(timestamp, body)?;
        if !constant_time_compare(&expected, signature) {
            return Err(PaymentError::InvalidSignature(
                "signature mismatch".to_string(),
            ));
        }

        Ok(())
    }

    /// Compute the signature header value for a message.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::InvalidSignature` if the key is unusable.
    pub fn sign(&self, timestamp: &str, body: &str) -> Result<String, PaymentError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|e| PaymentError::InvalidSignature(e.to_string()))?;
        mac.update(format!("{SIGNATURE_VERSION}:{timestamp}:{body}").as_bytes());
        Ok(format!(
            "{SIGNATURE_VERSION}={}",
            hex::encode(mac.finalize().into_bytes())
        ))
    }
}

/// Constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

/// Outcome reported by the payment gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCallback {
    pub order_number: String,
    pub success: bool,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

/// What a callback does to an order's payment state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallbackEffect {
    /// Already settled; nothing changes.
    Ignore,
    /// Mark paid, optionally confirming a pending order.
    MarkPaid { confirm: bool },
    /// Mark the pending payment failed.
    MarkFailed,
}

fn callback_effect(
    payment_status: PaymentStatus,
    order_status: OrderStatus,
    success: bool,
) -> CallbackEffect {
    match (payment_status, success) {
        (PaymentStatus::Paid | PaymentStatus::Failed, _) => CallbackEffect::Ignore,
        (PaymentStatus::Pending, true) => CallbackEffect::MarkPaid {
            confirm: order_status == OrderStatus::Pending,
        },
        (PaymentStatus::Pending, false) => CallbackEffect::MarkFailed,
    }
}

/// Applies payment callbacks to orders.
pub struct PaymentService<'a> {
    pool: &'a PgPool,
    events: &'a EventBus,
}

impl<'a> PaymentService<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool, events: &'a EventBus) -> Self {
        Self { pool, events }
    }

    /// Apply a verified callback.
    ///
    /// Repeated callbacks for a paid order are no-ops, so the gateway may
    /// retry freely. A failed payment stays failed; a late success for it is
    /// logged for a manual refund.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::OrderNotFound` for an unknown order number.
    #[instrument(skip(self, callback), fields(order_number = %callback.order_number, success = callback.success))]
    pub async fn handle_callback(&self, callback: &PaymentCallback) -> Result<Order, PaymentError> {
        let mut tx = self.pool.begin().await?;

        let order = orders::lock_by_number(&mut tx, &callback.order_number)
            .await?
            .ok_or_else(|| PaymentError::OrderNotFound(callback.order_number.clone()))?;

        let effect = callback_effect(order.payment_status, order.order_status, callback.success);
        let patch = match effect {
            CallbackEffect::Ignore => {
                if order.payment_status == PaymentStatus::Failed && callback.success {
                    tracing::warn!(
                        order_id = %order.id,
                        order_number = %order.order_number,
                        order_status = %order.order_status,
                        "Payment succeeded after it was marked failed, manual refund required"
                    );
                }
                tracing::info!(order_id = %order.id, payment_status = %order.payment_status, "Payment callback ignored");
                return Ok(order);
            }
            CallbackEffect::MarkPaid { confirm } => {
                if order.order_status == OrderStatus::Cancelled {
                    tracing::warn!(
                        order_id = %order.id,
                        order_number = %order.order_number,
                        "Payment received for cancelled order, manual refund required"
                    );
                }
                let patch = orders::patch()
                    .set(OrderField::PaymentStatus(PaymentStatus::Paid))
                    .set(OrderField::TransactionId(callback.transaction_id.clone()))
                    .set(OrderField::PaidAt(Utc::now()));
                if confirm {
                    patch.set(OrderField::OrderStatus(OrderStatus::Confirmed))
                } else {
                    patch
                }
            }
            CallbackEffect::MarkFailed => {
                orders::patch().set(OrderField::PaymentStatus(PaymentStatus::Failed))
            }
        };

        patch.apply(&mut tx, order.id.as_i32(), true).await?;
        let order = orders::reload(&mut tx, order.id).await?;
        tx.commit().await?;

        tracing::info!(order_id = %order.id, payment_status = %order.payment_status, "Payment callback applied");
        self.events.publish([DomainEvent::PaymentReceived {
            order_id: order.id,
            user_id: order.user_id,
            order_number: order.order_number.clone(),
            success: callback.success,
        }]);

        Ok(order)
    }
}
