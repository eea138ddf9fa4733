//! # Checked Fixed-Point Math
//!
//! Wrapping arithmetic and money do not mix. Every helper here returns a
//! [`MathError`] instead of overflowing, and every division states its
//! rounding direction in its name.

use alloy_primitives::U256;
use thiserror::Error;

use crate::config::{BPS_DENOMINATOR, WAD};

/// Errors from checked arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MathError {
    /// A multiplication or addition exceeded `U256::MAX`.
    #[error("arithmetic overflow")]
    Overflow,

    /// A subtraction would have gone below zero.
    #[error("arithmetic underflow: {minuend} - {subtrahend}")]
    Underflow {
        /// Left-hand side.
        minuend: U256,
        /// Right-hand side.
        subtrahend: U256,
    },

    /// Division by zero.
    #[error("division by zero")]
    DivisionByZero,
}

/// `10^18` as a `U256`.
pub fn wad() -> U256 {
    U256::from(WAD)
}

/// `10^exp` as a `U256`.
pub fn pow10(exp: u8) -> Result<U256, MathError> {
    let ten = U256::from(10u64);
    let mut acc = U256::from(1u64);
    for _ in 0..exp {
        acc = acc.checked_mul(ten).ok_or(MathError::Overflow)?;
    }
    Ok(acc)
}

/// `floor(a * b / denominator)`.
pub fn mul_div(a: U256, b: U256, denominator: U256) -> Result<U256, MathError> {
    if denominator.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    let product = a.checked_mul(b).ok_or(MathError::Overflow)?;
    Ok(product / denominator)
}

/// `ceil(a * b / denominator)`.
pub fn mul_div_up(a: U256, b: U256, denominator: U256) -> Result<U256, MathError> {
    if denominator.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    let product = a.checked_mul(b).ok_or(MathError::Overflow)?;
    let quotient = product / denominator;
    if (product % denominator).is_zero() {
        Ok(quotient)
    } else {
        quotient.checked_add(U256::from(1u64)).ok_or(MathError::Overflow)
    }
}

/// `a + b`, checked.
pub fn add(a: U256, b: U256) -> Result<U256, MathError> {
    a.checked_add(b).ok_or(MathError::Overflow)
}

/// `a - b`, checked.
pub fn sub(a: U256, b: U256) -> Result<U256, MathError> {
    a.checked_sub(b).ok_or(MathError::Underflow {
        minuend: a,
        subtrahend: b,
    })
}

/// Sums an iterator of amounts, failing on overflow.
pub fn sum<I: IntoIterator<Item = U256>>(values: I) -> Result<U256, MathError> {
    values.into_iter().try_fold(U256::ZERO, add)
}

/// `floor(amount * bps / 10_000)`.
pub fn bps_of(amount: U256, bps: u32) -> Result<U256, MathError> {
    mul_div(amount, U256::from(bps), U256::from(BPS_DENOMINATOR))
}

/// `ceil(amount * bps / 10_000)`.
pub fn bps_of_up(amount: U256, bps: u32) -> Result<U256, MathError> {
    mul_div_up(amount, U256::from(bps), U256::from(BPS_DENOMINATOR))
}

/// Inflates `amount` by `units / denominator`, rounding up.
///
/// Used for both buffer scales: `inflate_up(x, 10, 10_000)` adds 0.1%.
pub fn inflate_up(amount: U256, units: u64, denominator: u64) -> Result<U256, MathError> {
    let numerator = U256::from(denominator)
        .checked_add(U256::from(units))
        .ok_or(MathError::Overflow)?;
    mul_div_up(amount, numerator, U256::from(denominator))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(v: u64) -> U256 {
        U256::from(v)
    }

    #[test]
    fn mul_div_floors() {
        assert_eq!(mul_div(u(10), u(3), u(4)).unwrap(), u(7));
    }

    #[test]
    fn mul_div_up_ceils_only_with_remainder() {
        assert_eq!(mul_div_up(u(10), u(3), u(4)).unwrap(), u(8));
        assert_eq!(mul_div_up(u(8), u(3), u(4)).unwrap(), u(6));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert_eq!(mul_div(u(1), u(1), U256::ZERO), Err(MathError::DivisionByZero));
        assert_eq!(mul_div_up(u(1), u(1), U256::ZERO), Err(MathError::DivisionByZero));
    }

    #[test]
    fn overflow_is_an_error() {
        assert_eq!(mul_div(U256::MAX, u(2), u(1)), Err(MathError::Overflow));
        assert_eq!(add(U256::MAX, u(1)), Err(MathError::Overflow));
    }

    #[test]
    fn sub_reports_operands() {
        let err = sub(u(1), u(2)).unwrap_err();
        assert_eq!(
            err,
            MathError::Underflow {
                minuend: u(1),
                subtrahend: u(2)
            }
        );
    }

    #[test]
    fn bps_helpers() {
        assert_eq!(bps_of(u(10_000), 100).unwrap(), u(100));
        assert_eq!(bps_of(u(10), 100).unwrap(), U256::ZERO);
        assert_eq!(bps_of_up(u(10), 100).unwrap(), u(1));
    }

    #[test]
    fn inflate_up_applies_buffer() {
        // 0.1% flash buffer on 1_000_000.
        assert_eq!(inflate_up(u(1_000_000), 10, 10_000).unwrap(), u(1_001_000));
        // 0.001% collateral buffer on 1_000 rounds up.
        assert_eq!(inflate_up(u(1_000), 1, 100_000).unwrap(), u(1_001));
    }

    #[test]
    fn pow10_and_sum() {
        assert_eq!(pow10(6).unwrap(), u(1_000_000));
        assert_eq!(pow10(18).unwrap(), wad());
        assert_eq!(sum([u(1), u(2), u(3)]).unwrap(), u(6));
        assert_eq!(sum(Vec::new()).unwrap(), U256::ZERO);
    }
}
