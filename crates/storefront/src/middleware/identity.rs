//! Caller identity extractors.
//!
//! Authentication happens upstream (gateway or session service). It forwards
//! the authenticated principal in a header; these extractors only parse it.

use axum::{extract::FromRequestParts, http::request::Parts};

use stockroom_core::{AdminUserId, UserId};

use crate::error::{AppError, set_sentry_user};

/// Header carrying the authenticated customer id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the authenticated back-office user id.
pub const ADMIN_ID_HEADER: &str = "x-admin-id";

fn header_id(parts: &Parts, name: &str) -> Result<i32, AppError> {
    let value = parts
        .headers
        .get(name)
        .ok_or_else(|| AppError::Unauthorized(format!("missing {name} header")))?;

    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i32>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::Unauthorized(format!("malformed {name} header")))
}

/// Extractor that requires an authenticated customer.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(RequireUser(user_id): RequireUser) -> impl IntoResponse {
///     format!("Hello, {user_id}!")
/// }
/// ```
pub struct RequireUser(pub UserId);

impl<S> FromRequestParts<S> for RequireUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = UserId::new(header_id(parts, USER_ID_HEADER)?);
        set_sentry_user(&user_id);
        tracing::Span::current().record("user_id", user_id.as_i32());
        Ok(Self(user_id))
    }
}

/// Extractor that requires an authenticated back-office user.
pub struct RequireAdmin(pub AdminUserId);

impl<S> FromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let admin_id = AdminUserId::new(header_id(parts, ADMIN_ID_HEADER)?);
        set_sentry_user(&format!("admin:{admin_id}"));
        Ok(Self(admin_id))
    }
}
