//! Stockroom storefront library.
//!
//! Order fulfillment and inventory consistency: checkout, cancellation,
//! refunds and restocking over a row-locked stock ledger, plus the HTTP
//! surface the binary serves. Exposed as a library so the CLI and the
//! integration tests drive the same services.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
