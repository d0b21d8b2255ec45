//! Stockroom Core - Shared types library.
//!
//! This crate provides common types used across all Stockroom components:
//! - `storefront` - Order fulfillment and inventory engine with its HTTP surface
//! - `cli` - Command-line tools for migrations, seeding, and stock intake
//!
//! # Architecture
//!
//! The core crate contains only types and pure rules - no I/O, no database
//! access, no HTTP clients. This keeps it lightweight and allows it to be used
//! anywhere.
//!
//! # Modules
//!
//! - [`types`] - Type-safe IDs, SKU keys, money helpers, statuses, and number generation

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
