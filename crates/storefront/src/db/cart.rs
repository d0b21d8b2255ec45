//! Cart repository.

use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};

use stockroom_core::{CartItemId, CategoryId, ProductId, SkuKey, UserId, VariantId};

use super::{RepositoryError, visible};
use crate::models::CartLineView;

#[derive(Debug, sqlx::FromRow)]
struct CartLineRow {
    id: i32,
    product_id: i32,
    variant_id: Option<i32>,
    quantity: i32,
    product_visible: bool,
    variant_visible: bool,
    category_id: Option<i32>,
    product_name: Option<String>,
    sku_code: Option<String>,
    variant_attributes: Option<serde_json::Value>,
    base_price: Option<Decimal>,
    price_adjustment: Option<Decimal>,
    available: Option<i32>,
}

impl From<CartLineRow> for CartLineView {
    fn from(row: CartLineRow) -> Self {
        Self {
            cart_item_id: CartItemId::new(row.id),
            sku: SkuKey::new(
                ProductId::new(row.product_id),
                row.variant_id.map(VariantId::new),
            ),
            quantity: row.quantity,
            product_visible: row.product_visible,
            variant_visible: row.variant_visible,
            category_id: row.category_id.map(CategoryId::new),
            product_name: row.product_name,
            sku_code: row.sku_code,
            variant_attributes: row
                .variant_attributes
                .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())),
            base_price: row.base_price,
            price_adjustment: row.price_adjustment.unwrap_or(Decimal::ZERO),
            available: row.available,
        }
    }
}

const CHECKOUT_LINES_SQL: &str = concat!(
    "SELECT c.id, c.product_id, c.variant_id, c.quantity, ",
    "COALESCE(", visible!("p"), ", FALSE) AS product_visible, ",
    "CASE WHEN c.variant_id IS NULL THEN TRUE ELSE COALESCE(", visible!("v"), ", FALSE) END AS variant_visible, ",
    "p.category_id, p.name AS product_name, COALESCE(v.sku, p.sku) AS sku_code, ",
    "v.attributes AS variant_attributes, p.base_price, v.price_adjustment, ",
    "s.quantity AS available ",
    "FROM store.cart_items c ",
    "LEFT JOIN store.products p ON p.id = c.product_id ",
    "LEFT JOIN store.product_variants v ON v.id = c.variant_id AND v.product_id = c.product_id ",
    "LEFT JOIN store.stock_units s ON s.product_id = c.product_id ",
    "AND s.variant_id IS NOT DISTINCT FROM c.variant_id ",
    "WHERE c.user_id = $1 ",
    "ORDER BY c.id",
);

/// Repository for cart lines.
pub struct CartRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> CartRepository<'a> {
    /// Create a new cart repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// All of a user's cart lines joined with catalog and stock state.
    ///
    /// Lines whose product or variant was deleted are still returned (with
    /// the visibility flag cleared) so the caller can report them.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn lines_for_checkout(
        &self,
        user_id: UserId,
    ) -> Result<Vec<CartLineView>, RepositoryError> {
        let rows = sqlx::query_as::<_, CartLineRow>(CHECKOUT_LINES_SQL)
            .bind(user_id)
            .fetch_all(self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Add `quantity` of a SKU to the cart, merging with an existing line.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` for a non-positive quantity.
    /// Returns `RepositoryError::Database` if the upsert fails.
    pub async fn add(
        &self,
        user_id: UserId,
        sku: SkuKey,
        quantity: i32,
    ) -> Result<CartItemId, RepositoryError> {
        if quantity <= 0 {
            return Err(RepositoryError::Conflict(format!(
                "cart quantity must be positive, got {quantity}"
            )));
        }

        let id: i32 = sqlx::query_scalar(
            r"
            INSERT INTO store.cart_items (user_id, product_id, variant_id, quantity)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, product_id, COALESCE(variant_id, 0))
            DO UPDATE SET quantity = store.cart_items.quantity + EXCLUDED.quantity,
                          updated_at = NOW()
            RETURNING id
            ",
        )
        .bind(user_id)
        .bind(sku.product_id)
        .bind(sku.variant_id)
        .bind(quantity)
        .fetch_one(self.pool)
        .await?;

        Ok(CartItemId::new(id))
    }
}

/// Delete the snapshotted lines of a user's cart inside the caller's
/// transaction.
///
/// `lines` holds the `(line id, quantity)` pairs the snapshot priced. The
/// delete takes each row's lock, so two checkouts of the same cart serialize
/// here and the second finds the rows gone. Returns `false` unless exactly
/// the snapshotted lines were deleted with the snapshotted quantities; the
/// caller must then roll back. Lines added after the snapshot are left alone.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the delete fails.
pub async fn claim_lines(
    conn: &mut PgConnection,
    user_id: UserId,
    lines: &[(CartItemId, i32)],
) -> Result<bool, RepositoryError> {
    let ids: Vec<i32> = lines.iter().map(|(id, _)| id.as_i32()).collect();
    let deleted: Vec<(i32, i32)> = sqlx::query_as(
        r"
        DELETE FROM store.cart_items
        WHERE user_id = $1 AND id = ANY($2)
        RETURNING id, quantity
        ",
    )
    .bind(user_id)
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let deleted: Vec<(CartItemId, i32)> = deleted
        .into_iter()
        .map(|(id, quantity)| (CartItemId::new(id), quantity))
        .collect();
    Ok(same_lines(lines, &deleted))
}

/// Whether two `(line id, quantity)` lists hold the same pairs.
fn same_lines(expected: &[(CartItemId, i32)], actual: &[(CartItemId, i32)]) -> bool {
    let mut expected = expected.to_vec();
    let mut actual = actual.to_vec();
    expected.sort_unstable();
    actual.sort_unstable();
    expected == actual
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(id: i32, quantity: i32) -> (CartItemId, i32) {
        (CartItemId::new(id), quantity)
    }

    #[test]
    fn test_claim_requires_every_snapshotted_line() {
        let snapshot = [line(1, 2), line(2, 1)];
        assert!(same_lines(&snapshot, &[line(2, 1), line(1, 2)]));
        // Another checkout took line 2 first
        assert!(!same_lines(&snapshot, &[line(1, 2)]));
        // Both lines already gone
        assert!(!same_lines(&snapshot, &[]));
    }

    #[test]
    fn test_claim_rejects_changed_quantity() {
        assert!(!same_lines(&[line(1, 2)], &[line(1, 3)]));
    }

    #[test]
    fn test_checkout_query_applies_visibility_to_product_and_variant() {
        assert!(CHECKOUT_LINES_SQL.contains("COALESCE((p.is_active AND p.deleted_at IS NULL), FALSE)"));
        assert!(CHECKOUT_LINES_SQL.contains("COALESCE((v.is_active AND v.deleted_at IS NULL), FALSE)"));
    }

    #[test]
    fn test_missing_variant_attributes_default_to_empty_object() {
        let row = CartLineRow {
            id: 1,
            product_id: 42,
            variant_id: None,
            quantity: 1,
            product_visible: true,
            variant_visible: true,
            category_id: None,
            product_name: Some("Tee".to_owned()),
            sku_code: Some("TEE".to_owned()),
            variant_attributes: None,
            base_price: Some(Decimal::from(1000)),
            price_adjustment: None,
            available: Some(3),
        };
        let view = CartLineView::from(row);
        assert_eq!(view.variant_attributes, serde_json::json!({}));
        assert_eq!(view.price_adjustment, Decimal::ZERO);
        assert_eq!(view.sku, SkuKey::product(ProductId::new(42)));
    }
}
