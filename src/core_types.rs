//! Core types used throughout the system
//!
//! Fundamental type aliases and monetary precision rules shared by all
//! modules. IDs are plain integer surrogates matching the database schema.

use rust_decimal::{Decimal, RoundingStrategy};

/// Currency ID - globally unique identifier for a currency (BTC, USDT, ...).
pub type CurrencyId = i32;

/// Exchange ID - one row per connected external exchange.
pub type ExchangeId = i32;

/// Trading pair ID (e.g. BTC_USD).
pub type PairId = i32;

/// Admin (back-office operator) ID.
pub type AdminId = i64;

/// Parent order ID.
pub type OrderId = i64;

/// Decomposed (child) order ID.
pub type ChildOrderId = i64;

/// API key (credential) ID, system- or user-owned.
pub type ApiKeyId = i64;

/// Outbox request ID.
pub type RequestId = i64;

/// Balance row ID.
pub type BalanceId = i64;

/// Scale for native-denominated monetary columns.
pub const BALANCE_SCALE: u32 = 8;

/// Scale for USD-denominated monetary columns.
pub const USD_SCALE: u32 = 8;

/// Fixed-precision truncation toward zero.
///
/// All monetary writes pass through this before binding: the stored value
/// never has a larger magnitude than the computed one. For negative values
/// (short positions) this rounds toward zero, not toward negative infinity.
#[inline]
pub fn truncate(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::ToZero)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn truncate_drops_excess_digits() {
        assert_eq!(truncate(dec("1.234567891"), 8), dec("1.23456789"));
        assert_eq!(truncate(dec("1.999999999"), 8), dec("1.99999999"));
    }

    #[test]
    fn truncate_negative_rounds_toward_zero() {
        // Short positions must never grow in magnitude.
        assert_eq!(truncate(dec("-1.999999999"), 8), dec("-1.99999999"));
        assert_eq!(truncate(dec("-0.000000001"), 8), Decimal::ZERO);
    }
}
