//! Cart lines as read at checkout time.

use rust_decimal::Decimal;
use serde::Serialize;

use stockroom_core::money::line_total;
use stockroom_core::{CartItemId, CategoryId, SkuKey};

/// One cart line joined with the current catalog and stock state.
///
/// Produced by [`crate::db::cart::CartRepository::lines_for_checkout`]. Nothing
/// here is validated yet; [`crate::services::snapshot::price_lines`] turns a
/// list of views into [`PricedLine`]s or an error.
#[derive(Debug, Clone)]
pub struct CartLineView {
    pub cart_item_id: CartItemId,
    pub sku: SkuKey,
    pub quantity: i32,
    /// Product exists and passes the visibility predicate.
    pub product_visible: bool,
    /// Variant exists and passes the visibility predicate. `true` when the
    /// line has no variant.
    pub variant_visible: bool,
    pub category_id: Option<CategoryId>,
    pub product_name: Option<String>,
    pub sku_code: Option<String>,
    pub variant_attributes: serde_json::Value,
    pub base_price: Option<Decimal>,
    pub price_adjustment: Decimal,
    /// Current stock, `None` when no stock unit exists.
    pub available: Option<i32>,
}

/// A cart line priced and stock-checked at the instant of checkout.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricedLine {
    pub cart_item_id: CartItemId,
    pub sku: SkuKey,
    pub category_id: Option<CategoryId>,
    pub product_name: String,
    pub sku_code: String,
    pub variant_attributes: serde_json::Value,
    /// `base_price + price_adjustment`.
    pub unit_price: Decimal,
    pub quantity: i32,
    /// Stock seen by the pre-check. Informational only.
    pub available: i32,
}

impl PricedLine {
    /// `unit_price * quantity`.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        line_total(self.unit_price, self.quantity)
    }
}
