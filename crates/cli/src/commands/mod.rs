//! CLI subcommands.

pub mod migrate;
pub mod refunds;
pub mod seed;
pub mod stock;

use secrecy::SecretString;
use sqlx::PgPool;
use thiserror::Error;
use tokio::task::JoinHandle;

use stockroom_storefront::db::{self, LedgerError};
use stockroom_storefront::services::{Collaborators, EventBus, EventWorker, RefundError};

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Stock(#[from] LedgerError),

    #[error(transparent)]
    Refund(#[from] RefundError),

    #[error("Invalid seed file: {0}")]
    Seed(String),

    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Connect to the storefront database.
///
/// Reads `STOREFRONT_DATABASE_URL`, falling back to `DATABASE_URL`.
pub async fn connect() -> Result<PgPool, CliError> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("STOREFRONT_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| CliError::MissingEnvVar("STOREFRONT_DATABASE_URL"))?;

    tracing::info!("Connecting to storefront database...");
    Ok(db::create_pool(&database_url).await?)
}

/// An event bus with its worker, for commands that change stock.
///
/// Low-stock alerts opened or resolved by a command are written before the
/// command exits.
pub struct EventRuntime {
    bus: EventBus,
    worker: JoinHandle<()>,
}

impl EventRuntime {
    pub fn start(pool: &PgPool) -> Self {
        let (bus, rx) = EventBus::new();
        let worker = EventWorker::new(Collaborators::database(pool.clone())).spawn(rx);
        Self { bus, worker }
    }

    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Close the bus and wait for queued events to be handled.
    pub async fn finish(self) {
        drop(self.bus);
        if let Err(e) = self.worker.await {
            tracing::warn!(error = %e, "Event worker did not finish cleanly");
        }
    }
}
