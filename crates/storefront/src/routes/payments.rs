//! Payment gateway callback.

use axum::{
    Json,
    extract::State,
    http::HeaderMap,
};
use serde::Serialize;
use tracing::instrument;

use stockroom_core::{OrderStatus, PaymentStatus};

use crate::error::{AppError, Result};
use crate::services::{PaymentCallback, PaymentError, PaymentService};
use crate::state::AppState;

/// Header carrying the unix timestamp the gateway signed.
pub const TIMESTAMP_HEADER: &str = "x-payment-timestamp";

/// Header carrying `v1=<hex hmac>`.
pub const SIGNATURE_HEADER: &str = "x-payment-signature";

/// Acknowledgement returned to the gateway.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackAck {
    pub order_number: String,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> std::result::Result<&'a str, PaymentError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| PaymentError::InvalidSignature(format!("missing {name} header")))
}

/// Apply a signed payment outcome.
///
/// The signature is checked over the raw body before it is parsed.
#[instrument(skip_all)]
pub async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<CallbackAck>> {
    let verifier = state.verifier().ok_or(PaymentError::NotConfigured)?;
    verifier.verify(
        header(&headers, TIMESTAMP_HEADER)?,
        &body,
        header(&headers, SIGNATURE_HEADER)?,
    )?;

    let callback: PaymentCallback = serde_json::from_str(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid callback payload: {e}")))?;

    let order = PaymentService::new(state.pool(), state.events())
        .handle_callback(&callback)
        .await?;

    Ok(Json(CallbackAck {
        order_number: order.order_number,
        payment_status: order.payment_status,
        order_status: order.order_status,
    }))
}
