//! Domain models for the storefront.
//!
//! Row types that mirror tables one-to-one derive `sqlx::FromRow` here;
//! query-specific rows stay private to their `db` module.

pub mod cart;
pub mod coupon;
pub mod order;
pub mod refund;

pub use cart::{CartLineView, PricedLine};
pub use coupon::Coupon;
pub use order::{
    CheckoutReceipt, CheckoutRequest, Order, OrderItem, OrderWithItems, ShippingAddress,
};
pub use refund::{Refund, RefundItem, RefundItemRequest, RefundRequest, RefundWithItems};
