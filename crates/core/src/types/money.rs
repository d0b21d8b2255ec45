//! Decimal money arithmetic.
//!
//! Amounts are plain [`Decimal`] values in the store currency. The store
//! settles in whole currency units, so anything derived from a percentage or
//! a multiplication is rounded back to a whole unit before it is persisted.

use rust_decimal::{Decimal, RoundingStrategy};

/// Round to a whole currency unit, half away from zero.
#[must_use]
pub fn round_whole(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

/// Truncate to a whole currency unit (toward zero).
#[must_use]
pub fn truncate_whole(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(0, RoundingStrategy::ToZero)
}

/// `amount * percent / 100`, unrounded.
#[must_use]
pub fn percent_of(amount: Decimal, percent: Decimal) -> Decimal {
    amount * percent / Decimal::ONE_HUNDRED
}

/// `unit_price * quantity`.
#[must_use]
pub fn line_total(unit_price: Decimal, quantity: i32) -> Decimal {
    unit_price * Decimal::from(quantity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_whole_half_away_from_zero() {
        assert_eq!(round_whole(Decimal::new(25, 1)), Decimal::from(3));
        assert_eq!(round_whole(Decimal::new(24, 1)), Decimal::from(2));
    }

    #[test]
    fn test_truncate_whole_drops_fraction() {
        assert_eq!(truncate_whole(Decimal::new(9999, 2)), Decimal::from(99));
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(
            percent_of(Decimal::from(100_000), Decimal::from(10)),
            Decimal::from(10_000)
        );
    }

    #[test]
    fn test_line_total() {
        assert_eq!(line_total(Decimal::from(1500), 3), Decimal::from(4500));
    }
}
