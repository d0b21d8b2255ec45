//! Stockroom CLI - migrations, seeding and warehouse operations.
//!
//! # Usage
//!
//! ```bash
//! # Run storefront database migrations
//! sr-cli migrate
//!
//! # Load the demo catalog, stock units and coupons
//! sr-cli seed --file crates/cli/seed/catalog.yaml
//!
//! # Record goods received
//! sr-cli stock receive --product 42 --quantity 10
//! sr-cli stock receive --product 42 --variant 7 --quantity 3
//!
//! # Show the current level of a SKU
//! sr-cli stock show --product 42
//!
//! # Put a completed return back on the shelf
//! sr-cli refunds restock 15
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "sr-cli")]
#[command(author, version, about = "Stockroom CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Seed the catalog, stock units and coupons from a YAML file
    Seed {
        /// Path to the catalog file
        #[arg(short, long, default_value = "crates/cli/seed/catalog.yaml")]
        file: String,
    },
    /// Warehouse stock operations
    Stock {
        #[command(subcommand)]
        action: StockAction,
    },
    /// Refund operations
    Refunds {
        #[command(subcommand)]
        action: RefundAction,
    },
}

#[derive(Subcommand)]
enum StockAction {
    /// Record goods received for a SKU
    Receive {
        /// Product id
        #[arg(short, long)]
        product: i32,

        /// Variant id (omit for the product's own stock unit)
        #[arg(short, long)]
        variant: Option<i32>,

        /// Units received
        #[arg(short, long)]
        quantity: i32,
    },
    /// Show the current level of a SKU
    Show {
        /// Product id
        #[arg(short, long)]
        product: i32,

        /// Variant id
        #[arg(short, long)]
        variant: Option<i32>,
    },
}

#[derive(Subcommand)]
enum RefundAction {
    /// Return a completed return or exchange's goods to stock
    Restock {
        /// Refund id
        id: i32,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CliError> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Seed { file } => commands::seed::catalog(&file).await?,
        Commands::Stock { action } => match action {
            StockAction::Receive {
                product,
                variant,
                quantity,
            } => commands::stock::receive(product, variant, quantity).await?,
            StockAction::Show { product, variant } => {
                commands::stock::show(product, variant).await?;
            }
        },
        Commands::Refunds { action } => match action {
            RefundAction::Restock { id } => commands::refunds::restock(id).await?,
        },
    }
    Ok(())
}
