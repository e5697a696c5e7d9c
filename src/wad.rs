//! WAD (1e18) fixed-point helpers.
//!
//! Every fraction in the protocol (target weights, ownership splits, slippage,
//! deviation and divergence limits) is an unsigned integer scaled by [`WAD`].
//! Products are taken in 256-bit intermediates so `a * b / c` never overflows
//! before the division.

use alloy_primitives::U256;

use crate::error::MathError;

/// Fixed-point unit: `WAD` represents 1.0.
pub const WAD: u128 = 1_000_000_000_000_000_000;

/// Denominator for basis-point fees.
pub const BPS: u128 = 10_000;

/// `floor(a * b / denominator)`.
pub fn mul_div(a: u128, b: u128, denominator: u128) -> Result<u128, MathError> {
    if denominator == 0 {
        return Err(MathError::DivisionByZero);
    }
    let quotient = U256::from(a) * U256::from(b) / U256::from(denominator);
    u128::try_from(quotient).map_err(|_| MathError::Overflow)
}

/// `ceil(a * b / denominator)`.
pub fn mul_div_up(a: u128, b: u128, denominator: u128) -> Result<u128, MathError> {
    if denominator == 0 {
        return Err(MathError::DivisionByZero);
    }
    let product = U256::from(a) * U256::from(b);
    let d = U256::from(denominator);
    let mut quotient = product / d;
    if product % d != U256::ZERO {
        quotient += U256::from(1u8);
    }
    u128::try_from(quotient).map_err(|_| MathError::Overflow)
}

/// `floor(amount * fraction / WAD)`.
#[inline]
pub fn wad_mul(amount: u128, fraction: u128) -> Result<u128, MathError> {
    mul_div(amount, fraction, WAD)
}

/// `floor(numerator * WAD / denominator)`.
#[inline]
pub fn wad_div(numerator: u128, denominator: u128) -> Result<u128, MathError> {
    mul_div(numerator, WAD, denominator)
}

/// True when `|a - b| / reference` is strictly greater than `limit` (WAD).
///
/// Compared as `|a - b| * WAD > limit * reference` so the boundary is exact.
pub fn exceeds_relative(a: u128, b: u128, reference: u128, limit: u128) -> bool {
    let lhs = U256::from(a.abs_diff(b)) * U256::from(WAD);
    let rhs = U256::from(limit) * U256::from(reference);
    lhs > rhs
}

/// Half of a basis-point fee: `floor(amount * fee_bps / 20_000)`.
///
/// Swap fees are split evenly between the two legs of a trade.
pub fn half_fee(amount: u128, fee_bps: u16) -> Result<u128, MathError> {
    mul_div(amount, u128::from(fee_bps), 2 * BPS)
}
