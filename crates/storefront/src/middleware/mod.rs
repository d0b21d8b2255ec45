//! HTTP middleware stack for the storefront.
//!
//! # Middleware Order (bottom to top in Router)
//!
//! 1. Sentry layer (capture errors)
//! 2. Request ID (set `x-request-id` if the proxy did not)
//! 3. `TraceLayer` (request span carrying the request id)
//! 4. Request ID propagation (echo `x-request-id` on the response)
//!
//! Caller identity is not a layer; handlers take [`RequireUser`] or
//! [`RequireAdmin`] as extractors.

pub mod identity;

use axum::{body::Body, http::Request};
use tracing::Span;

pub use identity::{ADMIN_ID_HEADER, RequireAdmin, RequireUser, USER_ID_HEADER};

/// The HTTP header name for request IDs.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the tracing span for a request.
///
/// The request id is recorded on the span and tagged on the Sentry scope so
/// log lines and error reports can be correlated.
pub fn request_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("-");

    sentry::configure_scope(|scope| {
        scope.set_tag("request_id", request_id);
    });

    tracing::info_span!(
        "request",
        method = %request.method(),
        uri = %request.uri(),
        request_id = %request_id,
        user_id = tracing::field::Empty,
    )
}
