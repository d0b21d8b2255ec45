//! Core types for Stockroom.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod id;
pub mod money;
pub mod number;
pub mod sku;
pub mod status;

pub use id::*;
pub use sku::SkuKey;
pub use status::*;
