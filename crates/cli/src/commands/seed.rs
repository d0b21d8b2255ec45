//! Seed the catalog, stock units and coupons from a YAML file.
//!
//! The whole file is applied in one transaction. Rows that already exist
//! (matched by category name, product or variant SKU, coupon code) are left
//! untouched, so seeding twice is harmless.
//!
//! # File format
//!
//! ```yaml
//! categories:
//!   - name: Kitchen
//!     products:
//!       - name: Stoneware Mug
//!         sku: MUG-001
//!         basePrice: "15000"
//!         stock: 10
//!         lowStockThreshold: 2
//!         variants:
//!           - sku: MUG-001-BLUE
//!             attributes: { color: blue }
//!             priceAdjustment: "1000"
//!             stock: 4
//! coupons:
//!   - code: SALE10
//!     discountType: percentage
//!     discountValue: "10"
//!     maxDiscountAmount: "5000"
//!     validDays: 30
//! ```

use std::collections::HashSet;
use std::path::Path;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::PgConnection;
use sqlx::types::Json;
use tracing::{error, info};

use stockroom_core::{CouponScope, DiscountType, ProductId, SkuKey, VariantId};
use stockroom_storefront::db::StockLedger;

use super::{CliError, connect};

#[derive(Debug, Deserialize)]
pub struct SeedCatalog {
    #[serde(default)]
    pub categories: Vec<SeedCategory>,
    #[serde(default)]
    pub coupons: Vec<SeedCoupon>,
}

#[derive(Debug, Deserialize)]
pub struct SeedCategory {
    pub name: String,
    #[serde(default)]
    pub products: Vec<SeedProduct>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedProduct {
    pub name: String,
    pub sku: String,
    pub base_price: Decimal,
    /// Opening stock of the product's own unit. Omit for products that are
    /// only sold through variants.
    #[serde(default)]
    pub stock: Option<i32>,
    #[serde(default = "default_threshold")]
    pub low_stock_threshold: i32,
    #[serde(default)]
    pub variants: Vec<SeedVariant>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedVariant {
    pub sku: String,
    #[serde(default = "empty_attributes")]
    pub attributes: serde_json::Value,
    #[serde(default)]
    pub price_adjustment: Decimal,
    pub stock: i32,
    #[serde(default = "default_threshold")]
    pub low_stock_threshold: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedCoupon {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    #[serde(default)]
    pub min_order_amount: Decimal,
    #[serde(default)]
    pub max_discount_amount: Option<Decimal>,
    #[serde(default)]
    pub usage_limit: Option<i32>,
    #[serde(default = "default_user_limit")]
    pub user_limit: i32,
    #[serde(default = "default_valid_days")]
    pub valid_days: i64,
    #[serde(default)]
    pub scope: CouponScope,
    #[serde(default)]
    pub target_ids: Vec<i32>,
}

fn empty_attributes() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

const fn default_threshold() -> i32 {
    5
}

const fn default_user_limit() -> i32 {
    1
}

const fn default_valid_days() -> i64 {
    30
}

/// Check a catalog before touching the database.
///
/// Returns one message per problem; an empty list means the file is usable.
pub fn validate(catalog: &SeedCatalog) -> Vec<String> {
    let mut errors = Vec::new();
    let mut skus = HashSet::new();

    for category in &catalog.categories {
        if category.name.trim().is_empty() {
            errors.push("category with empty name".to_string());
        }
        for product in &category.products {
            if !skus.insert(product.sku.as_str()) {
                errors.push(format!("duplicate SKU {}", product.sku));
            }
            if product.base_price.is_sign_negative() {
                errors.push(format!("{}: negative base price", product.sku));
            }
            if product.stock.is_some_and(|s| s < 0) || product.low_stock_threshold < 0 {
                errors.push(format!("{}: negative stock or threshold", product.sku));
            }
            for variant in &product.variants {
                if !skus.insert(variant.sku.as_str()) {
                    errors.push(format!("duplicate SKU {}", variant.sku));
                }
                if variant.stock < 0 || variant.low_stock_threshold < 0 {
                    errors.push(format!("{}: negative stock or threshold", variant.sku));
                }
            }
        }
    }

    let mut codes = HashSet::new();
    for coupon in &catalog.coupons {
        let code = coupon.code.trim().to_uppercase();
        if code.is_empty() {
            errors.push("coupon with empty code".to_string());
        } else if !codes.insert(code) {
            errors.push(format!("duplicate coupon code {}", coupon.code));
        }
        if coupon.discount_value.is_sign_negative() {
            errors.push(format!("{}: negative discount value", coupon.code));
        }
        if coupon.discount_type == DiscountType::Percentage
            && coupon.discount_value > Decimal::ONE_HUNDRED
        {
            errors.push(format!("{}: percentage above 100", coupon.code));
        }
        if coupon.scope != CouponScope::All && coupon.target_ids.is_empty() {
            errors.push(format!("{}: scoped coupon without targets", coupon.code));
        }
    }

    errors
}

/// Seed from a YAML file.
pub async fn catalog(file_path: &str) -> Result<(), CliError> {
    let path = Path::new(file_path);
    if !path.exists() {
        return Err(CliError::Seed(format!("file not found: {file_path}")));
    }

    info!(path = %file_path, "Loading catalog from file");
    let content = tokio::fs::read_to_string(path).await?;
    let catalog: SeedCatalog = serde_yaml::from_str(&content)?;

    let errors = validate(&catalog);
    if !errors.is_empty() {
        error!("Catalog validation failed:");
        for err in &errors {
            error!("  - {err}");
        }
        return Err(CliError::Seed(format!("{} validation errors found", errors.len())));
    }

    let pool = connect().await?;
    let mut tx = pool.begin().await?;

    let mut products = 0;
    for category in &catalog.categories {
        let category_id = upsert_category(&mut tx, &category.name).await?;
        for product in &category.products {
            if seed_product(&mut tx, category_id, product).await? {
                products += 1;
            }
        }
    }

    let mut coupons = 0;
    for coupon in &catalog.coupons {
        if seed_coupon(&mut tx, coupon).await? {
            coupons += 1;
        }
    }

    tx.commit().await?;
    info!(products, coupons, "Seeding complete");
    Ok(())
}

async fn upsert_category(conn: &mut PgConnection, name: &str) -> Result<i32, CliError> {
    let existing: Option<i32> = sqlx::query_scalar(
        "SELECT id FROM store.categories WHERE name = $1 AND deleted_at IS NULL",
    )
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(id) = existing {
        return Ok(id);
    }

    let id = sqlx::query_scalar("INSERT INTO store.categories (name) VALUES ($1) RETURNING id")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}

/// Insert a product, its variants and their stock units. Returns `false`
/// if the product SKU already exists.
async fn seed_product(
    conn: &mut PgConnection,
    category_id: i32,
    product: &SeedProduct,
) -> Result<bool, CliError> {
    let product_id: Option<i32> = sqlx::query_scalar(
        r"
        INSERT INTO store.products (category_id, name, sku, base_price)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (sku) DO NOTHING
        RETURNING id
        ",
    )
    .bind(category_id)
    .bind(&product.name)
    .bind(&product.sku)
    .bind(product.base_price)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(product_id) = product_id.map(ProductId::new) else {
        info!(sku = %product.sku, "Product exists, skipping");
        return Ok(false);
    };

    if let Some(stock) = product.stock {
        StockLedger::new(&mut *conn)
            .register(SkuKey::product(product_id), stock, product.low_stock_threshold)
            .await?;
    }

    for variant in &product.variants {
        let variant_id: i32 = sqlx::query_scalar(
            r"
            INSERT INTO store.product_variants (product_id, sku, attributes, price_adjustment)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            ",
        )
        .bind(product_id)
        .bind(&variant.sku)
        .bind(Json(&variant.attributes))
        .bind(variant.price_adjustment)
        .fetch_one(&mut *conn)
        .await?;

        StockLedger::new(&mut *conn)
            .register(
                SkuKey::variant(product_id, VariantId::new(variant_id)),
                variant.stock,
                variant.low_stock_threshold,
            )
            .await?;
    }

    info!(sku = %product.sku, product_id = %product_id, variants = product.variants.len(), "Product seeded");
    Ok(true)
}

/// Insert a coupon valid from now for `valid_days`. Returns `false` if the
/// code already exists.
async fn seed_coupon(conn: &mut PgConnection, coupon: &SeedCoupon) -> Result<bool, CliError> {
    let now = Utc::now();
    let inserted: Option<i32> = sqlx::query_scalar(
        r"
        INSERT INTO store.coupons (
            code, discount_type, discount_value, min_order_amount, max_discount_amount,
            usage_limit, user_limit, starts_at, ends_at, scope, target_ids
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (code) DO NOTHING
        RETURNING id
        ",
    )
    .bind(coupon.code.trim().to_uppercase())
    .bind(coupon.discount_type)
    .bind(coupon.discount_value)
    .bind(coupon.min_order_amount)
    .bind(coupon.max_discount_amount)
    .bind(coupon.usage_limit)
    .bind(coupon.user_limit)
    .bind(now)
    .bind(now + Duration::days(coupon.valid_days))
    .bind(coupon.scope)
    .bind(&coupon.target_ids)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(inserted.is_some())
}
