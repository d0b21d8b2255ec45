//! SKU keys identifying a distinct stockable unit.

use core::fmt;

use serde::{Deserialize, Serialize};

use super::id::{ProductId, VariantId};

/// A `(product, variant?)` pair naming one stock unit.
///
/// The derived ordering (product first, then variant with `None` before any
/// `Some`) is the canonical lock order used by the stock ledger. Every caller
/// that locks more than one stock unit must lock them in ascending `SkuKey`
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkuKey {
    /// Product the unit belongs to.
    pub product_id: ProductId,
    /// Variant, or `None` for products sold without variants.
    pub variant_id: Option<VariantId>,
}

impl SkuKey {
    /// Key for a product without variants.
    #[must_use]
    pub const fn product(product_id: ProductId) -> Self {
        Self {
            product_id,
            variant_id: None,
        }
    }

    /// Key for a specific variant of a product.
    #[must_use]
    pub const fn variant(product_id: ProductId, variant_id: VariantId) -> Self {
        Self {
            product_id,
            variant_id: Some(variant_id),
        }
    }

    /// Build a key from optional parts as stored in the database.
    #[must_use]
    pub const fn new(product_id: ProductId, variant_id: Option<VariantId>) -> Self {
        Self {
            product_id,
            variant_id,
        }
    }
}

impl fmt::Display for SkuKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant_id {
            Some(variant) => write!(f, "({},{})", self.product_id, variant),
            None => write!(f, "({},null)", self.product_id),
        }
    }
}

/// Sort `(key, quantity)` pairs into canonical lock order, merging duplicates.
///
/// Quantities for the same key are summed so each unit is locked and checked
/// exactly once per batch.
///
/// # Errors
///
/// Returns the offending `(key, quantity)` pair if summing it overflows `i32`.
pub fn canonicalize(units: &[(SkuKey, i32)]) -> Result<Vec<(SkuKey, i32)>, (SkuKey, i32)> {
    let mut merged: std::collections::BTreeMap<SkuKey, i32> = std::collections::BTreeMap::new();
    for &(key, quantity) in units {
        let total = merged.entry(key).or_insert(0);
        *total = total.checked_add(quantity).ok_or((key, quantity))?;
    }
    Ok(merged.into_iter().collect())
}
