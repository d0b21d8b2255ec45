//! Human-readable order and refund numbers.
//!
//! Format: `{prefix}{yyyymmddHHMMSS}-{user:06}-{suffix}`, e.g.
//! `ORD20261018153012-000042-K7QX2M`. Two numbers only collide if the same
//! user is issued two numbers in the same second and both draw the same
//! six-character suffix from a 32-symbol alphabet.

use chrono::{DateTime, Utc};
use rand::Rng;

use super::id::UserId;

/// Crockford-style alphabet without easily confused characters.
const SUFFIX_ALPHABET: &[u8] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const SUFFIX_LEN: usize = 6;

/// Generate an order number.
#[must_use]
pub fn order_number<R: Rng + ?Sized>(user: UserId, now: DateTime<Utc>, rng: &mut R) -> String {
    generate("ORD", user, now, rng)
}

/// Generate a refund number.
#[must_use]
pub fn refund_number<R: Rng + ?Sized>(user: UserId, now: DateTime<Utc>, rng: &mut R) -> String {
    generate("RFD", user, now, rng)
}

fn generate<R: Rng + ?Sized>(prefix: &str, user: UserId, now: DateTime<Utc>, rng: &mut R) -> String {
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| char::from(SUFFIX_ALPHABET[rng.random_range(0..SUFFIX_ALPHABET.len())]))
        .collect();
    format!(
        "{prefix}{}-{:06}-{suffix}",
        now.format("%Y%m%d%H%M%S"),
        user.as_i32()
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 15, 30, 12).unwrap()
    }

    #[test]
    fn test_order_number_layout() {
        let mut rng = StdRng::seed_from_u64(1);
        let number = order_number(UserId::new(42), fixed_time(), &mut rng);
        assert!(number.starts_with("ORD20261018153012-000042-"), "{number}");
        assert_eq!(number.len(), "ORD20261018153012-000042-".len() + SUFFIX_LEN);
    }

    #[test]
    fn test_suffix_uses_alphabet_only() {
        let mut rng = StdRng::seed_from_u64(7);
        let number = refund_number(UserId::new(1), fixed_time(), &mut rng);
        let suffix = number.rsplit('-').next().unwrap();
        assert!(suffix.bytes().all(|b| SUFFIX_ALPHABET.contains(&b)));
        assert!(number.starts_with("RFD"));
    }

    #[test]
    fn test_same_user_same_second_differs() {
        let mut rng = StdRng::seed_from_u64(99);
        let a = order_number(UserId::new(5), fixed_time(), &mut rng);
        let b = order_number(UserId::new(5), fixed_time(), &mut rng);
        assert_ne!(a, b);
    }
}
