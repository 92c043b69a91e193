//! Decimal helpers for amounts and factors
//!
//! Amounts are whole `u128` units. Factors, rates and multipliers are
//! `BigDecimal`. Every conversion back to an amount floors, so all validators
//! round the same way.

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use std::str::FromStr;

use crate::error::{Result, SettlementError};

/// Digits kept after the decimal point for intermediate results.
pub const DECIMAL_SCALE: i64 = 18;

/// `int × 10^-scale`, e.g. `decimal(25, 2)` is 0.25.
pub fn decimal(int: i64, scale: i64) -> BigDecimal {
    BigDecimal::new(BigInt::from(int), scale)
}

pub fn from_amount(amount: u128) -> BigDecimal {
    BigDecimal::new(BigInt::from(amount), 0)
}

/// Floor a decimal to an amount. Negative values floor to zero and values
/// above `u128::MAX` saturate.
pub fn floor_to_amount(value: &BigDecimal) -> u128 {
    if *value <= BigDecimal::zero() {
        return 0;
    }
    let (digits, _) = value.with_scale(0).into_bigint_and_exponent();
    digits.to_u128().unwrap_or(u128::MAX)
}

/// `amount × factor`, floored.
pub fn mul_amount(amount: u128, factor: &BigDecimal) -> u128 {
    floor_to_amount(&(from_amount(amount) * factor))
}

/// `base^exp`, truncating to [`DECIMAL_SCALE`] after every multiplication.
pub fn pow_truncated(base: &BigDecimal, exp: u64) -> BigDecimal {
    let mut result = decimal(1, 0);
    let mut square = base.with_scale(DECIMAL_SCALE);
    let mut e = exp;
    while e > 0 {
        if e & 1 == 1 {
            result = (&result * &square).with_scale(DECIMAL_SCALE);
        }
        e >>= 1;
        if e > 0 {
            square = (&square * &square).with_scale(DECIMAL_SCALE);
        }
    }
    result
}

pub fn parse_decimal(value: &str) -> Result<BigDecimal> {
    BigDecimal::from_str(value).map_err(|_| SettlementError::InvalidDecimal {
        value: value.to_string(),
    })
}
