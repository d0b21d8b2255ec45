//! Customer refund routes.

use axum::{
    Json,
    extract::{Path, State},
};

use stockroom_core::RefundId;

use crate::error::Result;
use crate::middleware::RequireUser;
use crate::models::{Refund, RefundWithItems};
use crate::services::RefundService;
use crate::state::AppState;

/// Get one of the caller's refunds.
pub async fn show(
    State(state): State<AppState>,
    RequireUser(user_id): RequireUser,
    Path(refund_id): Path<RefundId>,
) -> Result<Json<RefundWithItems>> {
    let refund = RefundService::new(state.pool(), &state.config().checkout, state.events())
        .get_for_user(refund_id, user_id)
        .await?;
    Ok(Json(refund))
}

/// Withdraw a pending refund request.
pub async fn cancel(
    State(state): State<AppState>,
    RequireUser(user_id): RequireUser,
    Path(refund_id): Path<RefundId>,
) -> Result<Json<Refund>> {
    let refund = RefundService::new(state.pool(), &state.config().checkout, state.events())
        .cancel_by_user(refund_id, user_id)
        .await?;
    Ok(Json(refund))
}
