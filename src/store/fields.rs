//! Field validation
//!
//! Every value a repository binds into SQL passes through one of these
//! checks first ("filter then bind"). A violation fails fast with a
//! validation error naming the offending field; nothing is written.

use rust_decimal::Decimal;

use crate::error::CoreError;

/// Numeric value must be >= 0.
pub fn non_negative(field: &'static str, value: Decimal) -> Result<Decimal, CoreError> {
    if value < Decimal::ZERO {
        return Err(CoreError::validation(
            field,
            format!("must be non-negative, got {value}"),
        ));
    }
    Ok(value)
}

/// Numeric value must be > 0.
pub fn positive(field: &'static str, value: Decimal) -> Result<Decimal, CoreError> {
    if value <= Decimal::ZERO {
        return Err(CoreError::validation(
            field,
            format!("must be positive, got {value}"),
        ));
    }
    Ok(value)
}

/// Numeric value must lie within [min, max].
pub fn in_range(
    field: &'static str,
    value: Decimal,
    min: Decimal,
    max: Decimal,
) -> Result<Decimal, CoreError> {
    if value < min || value > max {
        return Err(CoreError::validation(
            field,
            format!("must be within [{min}, {max}], got {value}"),
        ));
    }
    Ok(value)
}

/// Share-like fraction: 0 < value <= 1.
pub fn fraction(field: &'static str, value: Decimal) -> Result<Decimal, CoreError> {
    if value <= Decimal::ZERO || value > Decimal::ONE {
        return Err(CoreError::validation(
            field,
            format!("must be within (0, 1], got {value}"),
        ));
    }
    Ok(value)
}

/// Surrogate ID must be positive.
pub fn known_id<T: Into<i64> + Copy>(field: &'static str, value: T) -> Result<T, CoreError> {
    if value.into() <= 0 {
        return Err(CoreError::validation(field, "must be a positive id"));
    }
    Ok(value)
}

/// Identifier-like string: 1..=max chars of [A-Za-z0-9_-].
pub fn name<'a>(field: &'static str, value: &'a str, max: usize) -> Result<&'a str, CoreError> {
    if value.is_empty() || value.len() > max {
        return Err(CoreError::validation(
            field,
            format!("length must be 1..={max}, got {}", value.len()),
        ));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(CoreError::validation(
            field,
            format!("'{value}' contains characters outside [A-Za-z0-9_-]"),
        ));
    }
    Ok(value)
}

/// Raw payload (URL, header block, body): length-bounded, otherwise free-form.
pub fn bounded_text<'a>(
    field: &'static str,
    value: &'a str,
    max: usize,
) -> Result<&'a str, CoreError> {
    if value.len() > max {
        return Err(CoreError::validation(
            field,
            format!("length must be <= {max}, got {}", value.len()),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn non_negative_accepts_zero() {
        assert!(non_negative("amount", Decimal::ZERO).is_ok());
        assert!(non_negative("amount", dec("-0.1")).is_err());
    }

    #[test]
    fn positive_rejects_zero() {
        assert!(positive("amount", Decimal::ZERO).is_err());
        assert!(positive("amount", dec("0.00000001")).is_ok());
    }

    #[test]
    fn in_range_is_inclusive() {
        assert!(in_range("price", dec("1"), dec("1"), dec("2")).is_ok());
        assert!(in_range("price", dec("2"), dec("1"), dec("2")).is_ok());
        assert!(in_range("price", dec("2.1"), dec("1"), dec("2")).is_err());
    }

    #[test]
    fn fraction_domain() {
        assert!(fraction("share", Decimal::ONE).is_ok());
        assert!(fraction("share", dec("0.5")).is_ok());
        assert!(fraction("share", Decimal::ZERO).is_err());
        assert!(fraction("share", dec("1.01")).is_err());
    }

    #[test]
    fn name_rules() {
        assert!(name("symbol", "BTC_USD", 32).is_ok());
        assert!(name("symbol", "", 32).is_err());
        assert!(name("symbol", "BTC USD", 32).is_err());
        assert!(name("symbol", &"X".repeat(33), 32).is_err());
    }

    #[test]
    fn bounded_text_limit() {
        assert!(bounded_text("body", "{}", 10).is_ok());
        assert!(bounded_text("body", &"x".repeat(11), 10).is_err());
    }

    #[test]
    fn validation_error_names_the_field() {
        let err = positive("fundsIn.amount", Decimal::ZERO).unwrap_err();
        assert!(err.to_string().contains("fundsIn.amount"));
    }
}
