//! Refund commands.

use stockroom_core::RefundId;
use stockroom_storefront::config::CheckoutSettings;
use stockroom_storefront::services::RefundService;

use super::{CliError, EventRuntime, connect};

/// Return a completed return or exchange's goods to stock.
pub async fn restock(id: i32) -> Result<(), CliError> {
    let pool = connect().await?;
    let runtime = EventRuntime::start(&pool);
    let settings = CheckoutSettings::default();

    let result = RefundService::new(&pool, &settings, runtime.bus())
        .restock(RefundId::new(id))
        .await;
    runtime.finish().await;

    let refund = result?;
    tracing::info!(
        refund_id = %refund.id,
        refund_number = %refund.refund_number,
        "Refund restocked"
    );
    Ok(())
}
