//! Warehouse stock commands.

use stockroom_core::{ProductId, SkuKey, VariantId};
use stockroom_storefront::services::StockService;

use super::{CliError, EventRuntime, connect};

fn sku(product: i32, variant: Option<i32>) -> SkuKey {
    SkuKey::new(ProductId::new(product), variant.map(VariantId::new))
}

/// Record goods received for one SKU.
pub async fn receive(product: i32, variant: Option<i32>, quantity: i32) -> Result<(), CliError> {
    let pool = connect().await?;
    let runtime = EventRuntime::start(&pool);

    let result = StockService::new(&pool, runtime.bus())
        .receive(sku(product, variant), quantity)
        .await;
    runtime.finish().await;

    let level = result?;
    tracing::info!(
        sku = %level.sku,
        quantity = level.quantity,
        low = level.is_low(),
        "Stock received"
    );
    Ok(())
}

/// Show the current level of one SKU.
pub async fn show(product: i32, variant: Option<i32>) -> Result<(), CliError> {
    let pool = connect().await?;
    let runtime = EventRuntime::start(&pool);

    let result = StockService::new(&pool, runtime.bus())
        .level(sku(product, variant))
        .await;
    runtime.finish().await;

    let level = result?;
    tracing::info!(
        sku = %level.sku,
        quantity = level.quantity,
        low_stock_threshold = level.low_stock_threshold,
        "Stock level"
    );
    Ok(())
}
