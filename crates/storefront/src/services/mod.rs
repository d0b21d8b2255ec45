//! Business logic services for the storefront.
//!
//! # Services
//!
//! - `snapshot` - Cart snapshot and stock pre-check
//! - `discount` - Coupon validation and discount arithmetic
//! - `checkout` - Order creation
//! - `cancellation` - Customer and back-office cancellation
//! - `orders` - Order reads and status transitions
//! - `refunds` - Refunds, returns, exchanges and restocking
//! - `payments` - Payment gateway and signed callbacks
//! - `stock` - Warehouse intake and stock unit registration
//! - `events` - Post-commit domain events and their worker
//! - `collaborators` - Shipping, notification and low-stock alerting

pub mod cancellation;
pub mod checkout;
pub mod collaborators;
pub mod discount;
pub mod events;
pub mod orders;
pub mod payments;
pub mod refunds;
pub mod snapshot;
pub mod stock;

pub use cancellation::{CancelError, CancellationService};
pub use checkout::{CheckoutError, CheckoutService};
pub use collaborators::Collaborators;
pub use events::{DomainEvent, EventBus, EventWorker};
pub use orders::{OrderError, OrderService};
pub use payments::{
    CallbackVerifier, DisabledPaymentGateway, HttpPaymentGateway, PaymentCallback, PaymentError,
    PaymentGateway, PaymentService,
};
pub use refunds::{RefundError, RefundService};
pub use snapshot::SnapshotError;
pub use stock::StockService;
