//! Cart snapshot: the priced, stock-checked view of a cart at checkout.
//!
//! The stock check here is a pre-check on unlocked reads. The stock ledger
//! repeats it under row locks inside the order transaction.

use sqlx::PgPool;
use thiserror::Error;
use tracing::instrument;

use stockroom_core::{ProductId, SkuKey, UserId, VariantId};

use crate::db::RepositoryError;
use crate::db::cart::CartRepository;
use crate::models::{CartLineView, PricedLine};

/// Errors that abort snapshotting. No partial snapshot is ever returned.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The user has no cart lines.
    #[error("cart is empty")]
    EmptyCart,

    /// A product or variant in the cart is inactive or deleted.
    #[error("product {product_id} is unavailable")]
    ProductUnavailable {
        product_id: ProductId,
        variant_id: Option<VariantId>,
    },

    /// The pre-check saw less stock than the line asks for.
    #[error("insufficient stock for {sku}: available {available}, requested {requested}")]
    InsufficientStock {
        sku: SkuKey,
        available: i32,
        requested: i32,
    },

    /// Repository/database error.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Read and price a user's cart.
///
/// # Errors
///
/// Returns `SnapshotError::EmptyCart` if the cart has no lines.
/// Returns `SnapshotError::ProductUnavailable` for the first line whose
/// product or variant is not visible.
/// Returns `SnapshotError::InsufficientStock` if the pre-check fails.
#[instrument(skip(pool))]
pub async fn snapshot(pool: &PgPool, user_id: UserId) -> Result<Vec<PricedLine>, SnapshotError> {
    let views = CartRepository::new(pool).lines_for_checkout(user_id).await?;
    price_lines(views)
}

/// Validate and price joined cart lines.
///
/// # Errors
///
/// See [`snapshot`].
pub fn price_lines(views: Vec<CartLineView>) -> Result<Vec<PricedLine>, SnapshotError> {
    if views.is_empty() {
        return Err(SnapshotError::EmptyCart);
    }

    views.into_iter().map(price_line).collect()
}

fn price_line(view: CartLineView) -> Result<PricedLine, SnapshotError> {
    let unavailable = || SnapshotError::ProductUnavailable {
        product_id: view.sku.product_id,
        variant_id: view.sku.variant_id,
    };

    if !view.product_visible || !view.variant_visible {
        return Err(unavailable());
    }
    let (Some(base_price), Some(product_name), Some(sku_code)) =
        (view.base_price, view.product_name.clone(), view.sku_code.clone())
    else {
        return Err(unavailable());
    };

    let available = view.available.unwrap_or(0);
    if available < view.quantity {
        return Err(SnapshotError::InsufficientStock {
            sku: view.sku,
            available,
            requested: view.quantity,
        });
    }

    Ok(PricedLine {
        cart_item_id: view.cart_item_id,
        sku: view.sku,
        category_id: view.category_id,
        product_name,
        sku_code,
        variant_attributes: view.variant_attributes,
        unit_price: base_price + view.price_adjustment,
        quantity: view.quantity,
        available,
    })
}
