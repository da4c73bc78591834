use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Active discount code and its fractional rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountState {
    /// Normalized (upper-case) code.
    pub code: String,
    /// Fraction of the subtotal taken off. `1` is a free order.
    pub amount: Decimal,
}

/// Built-in codes, keyed upper-case.
///
/// `STAFFTEST` carries a negative rate on purpose; it is applied as-is.
const DISCOUNT_CODES: &[(&str, i64, u32)] = &[
    ("ONSEN15", 15, 2),
    ("WELCOME10", 10, 2),
    ("ROASTERS20", 20, 2),
    ("FREEBREW", 1, 0),
    ("STAFFTEST", -1, 0),
];

/// Looks up `code` ignoring case and surrounding whitespace.
pub fn lookup(code: &str) -> Option<DiscountState> {
    let wanted = code.trim().to_ascii_uppercase();
    DISCOUNT_CODES
        .iter()
        .find(|(key, _, _)| *key == wanted)
        .map(|(key, num, scale)| DiscountState {
            code: (*key).to_string(),
            amount: Decimal::new(*num, *scale),
        })
}

/// Every configured code, in table order.
pub fn codes() -> impl Iterator<Item = &'static str> {
    DISCOUNT_CODES.iter().map(|(key, _, _)| *key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case_and_whitespace() {
        let upper = lookup("ONSEN15").expect("known code");
        assert_eq!(lookup("onsen15"), Some(upper.clone()));
        assert_eq!(lookup("  Onsen15 "), Some(upper.clone()));
        assert_eq!(upper.amount, Decimal::new(15, 2));
    }

    #[test]
    fn unknown_code_misses() {
        assert_eq!(lookup("not-a-real-code"), None);
        assert_eq!(lookup(""), None);
    }

    #[test]
    fn free_and_sentinel_rates_are_kept_verbatim() {
        assert_eq!(lookup("freebrew").map(|d| d.amount), Some(Decimal::ONE));
        assert_eq!(
            lookup("stafftest").map(|d| d.amount),
            Some(Decimal::NEGATIVE_ONE)
        );
    }

    #[test]
    fn table_keys_are_upper_case() {
        for code in codes() {
            assert_eq!(code, code.to_ascii_uppercase());
        }
    }
}
