//! Status enums for orders, payments, refunds, and coupons.
//!
//! The order and refund enums carry their own transition tables so every
//! caller agrees on which moves are legal.

use serde::{Deserialize, Serialize};

/// Generate `Display` and `FromStr` for a snake_case enum.
macro_rules! snake_case_str {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// The stored `snake_case` form.
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(format!(concat!("invalid ", stringify!($name), ": {}"), s)),
                }
            }
        }
    };
}

/// Order lifecycle status.
///
/// `pending → confirmed → processing → shipping → delivered`, with
/// `cancelled` reachable from every state except `delivered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "store.order_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Processing,
    Shipping,
    Delivered,
    Cancelled,
}

snake_case_str!(OrderStatus {
    Pending => "pending",
    Confirmed => "confirmed",
    Processing => "processing",
    Shipping => "shipping",
    Delivered => "delivered",
    Cancelled => "cancelled",
});

impl OrderStatus {
    /// Whether `next` is a legal transition from `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed)
                | (Self::Confirmed, Self::Processing)
                | (Self::Processing, Self::Shipping)
                | (Self::Shipping, Self::Delivered)
                | (
                    Self::Pending | Self::Confirmed | Self::Processing | Self::Shipping,
                    Self::Cancelled
                )
        )
    }

    /// Whether a customer may cancel the order themselves.
    ///
    /// Narrower than the state machine: once goods are on their way the
    /// customer has to go through a return instead.
    #[must_use]
    pub const fn is_customer_cancellable(self) -> bool {
        !matches!(self, Self::Shipping | Self::Delivered | Self::Cancelled)
    }

    /// Whether a refund or return may be requested for an order in this state.
    #[must_use]
    pub const fn is_refundable(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }
}

/// Payment status, driven by the payment collaborator's callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "store.payment_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
}

snake_case_str!(PaymentStatus {
    Pending => "pending",
    Paid => "paid",
    Failed => "failed",
});

/// How the customer pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "store.payment_method", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Paid through the external gateway; checkout returns a redirect URL.
    Online,
    /// Bank transfer settled offline.
    BankTransfer,
    /// Paid on delivery.
    CashOnDelivery,
}

snake_case_str!(PaymentMethod {
    Online => "online",
    BankTransfer => "bank_transfer",
    CashOnDelivery => "cash_on_delivery",
});

/// Refund lifecycle status.
///
/// `pending → approved | rejected | cancelled`, `approved → processing → completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "store.refund_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Processing,
    Completed,
    Cancelled,
}

snake_case_str!(RefundStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
    Processing => "processing",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl RefundStatus {
    /// Whether `next` is a legal transition from `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Approved | Self::Rejected | Self::Cancelled)
                | (Self::Approved, Self::Processing)
                | (Self::Processing, Self::Completed)
        )
    }

    /// An in-flight refund blocks new refund requests on the same order.
    #[must_use]
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::Pending | Self::Approved | Self::Processing)
    }

    /// Whether this refund's quantities count against the per-item ceiling.
    #[must_use]
    pub const fn holds_quantity(self) -> bool {
        !matches!(self, Self::Rejected | Self::Cancelled)
    }
}

/// Kind of reversal the customer asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "store.refund_type", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum RefundType {
    /// Money back, goods kept or never shipped.
    #[default]
    Refund,
    /// Goods come back and money is returned.
    Return,
    /// Goods come back and are replaced.
    Exchange,
}

snake_case_str!(RefundType {
    Refund => "refund",
    Return => "return",
    Exchange => "exchange",
});

impl RefundType {
    /// Whether physical goods come back and may later be restocked.
    #[must_use]
    pub const fn returns_goods(self) -> bool {
        matches!(self, Self::Return | Self::Exchange)
    }
}

/// How a coupon's `discount_value` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "store.discount_type", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

snake_case_str!(DiscountType {
    Percentage => "percentage",
    Fixed => "fixed",
});

/// Which part of an order a coupon applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "store.coupon_scope", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum CouponScope {
    #[default]
    All,
    Category,
    Product,
}

snake_case_str!(CouponScope {
    All => "all",
    Category => "category",
    Product => "product",
});

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_order_happy_path_transitions() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Confirmed));
        assert!(OrderStatus::Confirmed.can_transition_to(OrderStatus::Processing));
        assert!(OrderStatus::Processing.can_transition_to(OrderStatus::Shipping));
        assert!(OrderStatus::Shipping.can_transition_to(OrderStatus::Delivered));
    }

    #[test]
    fn test_order_cannot_skip_or_go_back() {
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Shipping));
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Shipping));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Pending));
    }

    #[test]
    fn test_cancelled_reachable_from_everything_but_delivered() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::Processing,
            OrderStatus::Shipping,
        ] {
            assert!(status.can_transition_to(OrderStatus::Cancelled), "{status}");
        }
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Cancelled));
    }

    #[test]
    fn test_customer_cancellable_states() {
        assert!(OrderStatus::Pending.is_customer_cancellable());
        assert!(OrderStatus::Processing.is_customer_cancellable());
        assert!(!OrderStatus::Shipping.is_customer_cancellable());
        assert!(!OrderStatus::Delivered.is_customer_cancellable());
        assert!(!OrderStatus::Cancelled.is_customer_cancellable());
    }

    #[test]
    fn test_refund_transitions() {
        assert!(RefundStatus::Pending.can_transition_to(RefundStatus::Approved));
        assert!(RefundStatus::Pending.can_transition_to(RefundStatus::Cancelled));
        assert!(RefundStatus::Approved.can_transition_to(RefundStatus::Processing));
        assert!(RefundStatus::Processing.can_transition_to(RefundStatus::Completed));
        assert!(!RefundStatus::Approved.can_transition_to(RefundStatus::Cancelled));
        assert!(!RefundStatus::Rejected.can_transition_to(RefundStatus::Approved));
        assert!(!RefundStatus::Pending.can_transition_to(RefundStatus::Completed));
    }

    #[test]
    fn test_refund_in_flight_and_quantity_holding() {
        assert!(RefundStatus::Pending.is_in_flight());
        assert!(RefundStatus::Processing.is_in_flight());
        assert!(!RefundStatus::Completed.is_in_flight());
        assert!(RefundStatus::Completed.holds_quantity());
        assert!(!RefundStatus::Rejected.holds_quantity());
        assert!(!RefundStatus::Cancelled.holds_quantity());
    }

    #[test]
    fn test_status_string_round_trip() {
        assert_eq!("shipping".parse::<OrderStatus>().unwrap(), OrderStatus::Shipping);
        assert_eq!(PaymentMethod::CashOnDelivery.to_string(), "cash_on_delivery");
        assert!("bogus".parse::<RefundStatus>().is_err());
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&PaymentMethod::BankTransfer).unwrap();
        assert_eq!(json, "\"bank_transfer\"");
    }
}
