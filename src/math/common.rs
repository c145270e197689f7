//! Checked scaled-integer arithmetic shared by the ledger indexes.
//!
//! All distribution indexes are raw `U256` values scaled by [`WAD`]; basis
//! point fractions use [`BPS_DIVISOR`]. The `Try*` traits mirror the checked
//! operator style used across the crate so overflow surfaces as
//! [`LedgerError::MathOverflow`] instead of a panic.

use crate::error::LedgerError;
use odra::casper_types::U256;

/// Precision of the scaled distribution indexes.
pub const WAD: u128 = 1_000_000_000_000_000_000;
/// Divisor for basis-point fractions.
pub const BPS_DIVISOR: u64 = 10_000;
/// Milliseconds per 365-day year, the APR accrual base.
pub const MS_PER_YEAR: u64 = 31_536_000_000;

/// Identity of the index scale as a `U256`.
pub fn wad() -> U256 {
    U256::from(WAD)
}

/// Try to add, return an error on overflow.
pub trait TryAdd: Sized {
    /// Add.
    fn try_add(self, rhs: Self) -> Result<Self, LedgerError>;
}

/// Try to subtract, return an error on underflow.
pub trait TrySub: Sized {
    /// Subtract.
    fn try_sub(self, rhs: Self) -> Result<Self, LedgerError>;
}

/// Try to multiply, return an error on overflow.
pub trait TryMul<Rhs = Self>: Sized {
    /// Multiply.
    fn try_mul(self, rhs: Rhs) -> Result<Self, LedgerError>;
}

/// Try to divide, return an error on overflow or divide by zero.
pub trait TryDiv<Rhs = Self>: Sized {
    /// Divide.
    fn try_div(self, rhs: Rhs) -> Result<Self, LedgerError>;
}

impl TryAdd for U256 {
    fn try_add(self, rhs: Self) -> Result<Self, LedgerError> {
        self.checked_add(rhs).ok_or(LedgerError::MathOverflow)
    }
}

impl TrySub for U256 {
    fn try_sub(self, rhs: Self) -> Result<Self, LedgerError> {
        self.checked_sub(rhs).ok_or(LedgerError::MathOverflow)
    }
}

impl TryMul for U256 {
    fn try_mul(self, rhs: Self) -> Result<Self, LedgerError> {
        self.checked_mul(rhs).ok_or(LedgerError::MathOverflow)
    }
}

impl TryDiv for U256 {
    fn try_div(self, rhs: Self) -> Result<Self, LedgerError> {
        self.checked_div(rhs).ok_or(LedgerError::MathOverflow)
    }
}

/// `amount * num / den`, rounded down.
pub fn mul_div_floor(amount: U256, num: U256, den: U256) -> Result<U256, LedgerError> {
    amount.try_mul(num)?.try_div(den)
}

/// `amount * num / den`, rounded up.
pub fn mul_div_ceil(amount: U256, num: U256, den: U256) -> Result<U256, LedgerError> {
    if den.is_zero() {
        return Err(LedgerError::MathOverflow);
    }
    let product = amount.try_mul(num)?;
    product
        .try_add(den.try_sub(U256::one())?)?
        .try_div(den)
}

/// Basis-point fraction of `amount`, rounded down.
pub fn bps_of(amount: U256, bps: u64) -> Result<U256, LedgerError> {
    mul_div_floor(amount, U256::from(bps), U256::from(BPS_DIVISOR))
}

/// Simple interest on `principal` at `apr_bps` over `elapsed_ms`, rounded down.
///
/// Used for fixed-term agreements where rounding loss stays with the payer.
pub fn interest_floor(principal: U256, apr_bps: u64, elapsed_ms: u64) -> Result<U256, LedgerError> {
    mul_div_floor(
        principal,
        U256::from(apr_bps).try_mul(U256::from(elapsed_ms))?,
        U256::from(BPS_DIVISOR).try_mul(U256::from(MS_PER_YEAR))?,
    )
}

/// Simple interest rounded up, used by the rolling engine so the lender is
/// never shorted by integer truncation.
pub fn interest_ceil(principal: U256, apr_bps: u64, elapsed_ms: u64) -> Result<U256, LedgerError> {
    if principal.is_zero() || apr_bps == 0 || elapsed_ms == 0 {
        return Ok(U256::zero());
    }
    mul_div_ceil(
        principal,
        U256::from(apr_bps).try_mul(U256::from(elapsed_ms))?,
        U256::from(BPS_DIVISOR).try_mul(U256::from(MS_PER_YEAR))?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked_ops_catch_overflow() {
        assert_eq!(U256::MAX.try_add(U256::one()), Err(LedgerError::MathOverflow));
        assert_eq!(U256::zero().try_sub(U256::one()), Err(LedgerError::MathOverflow));
        assert_eq!(U256::one().try_div(U256::zero()), Err(LedgerError::MathOverflow));
        assert_eq!(U256::from(6u64).try_mul(U256::from(7u64)), Ok(U256::from(42u64)));
    }

    #[test]
    fn mul_div_rounding() {
        let a = U256::from(10u64);
        assert_eq!(mul_div_floor(a, U256::from(1u64), U256::from(3u64)).unwrap(), U256::from(3u64));
        assert_eq!(mul_div_ceil(a, U256::from(1u64), U256::from(3u64)).unwrap(), U256::from(4u64));
        assert_eq!(mul_div_ceil(U256::zero(), U256::from(1u64), U256::from(3u64)).unwrap(), U256::zero());
    }

    #[test]
    fn bps_fraction() {
        assert_eq!(bps_of(U256::from(10_000u64), 2_500).unwrap(), U256::from(2_500u64));
        assert_eq!(bps_of(U256::from(3u64), 5_000).unwrap(), U256::from(1u64));
    }

    #[test]
    fn interest_floor_and_ceil() {
        // 1000 principal, 10% APR, half a year
        let p = U256::from(1_000u64);
        let half_year = MS_PER_YEAR / 2;
        assert_eq!(interest_floor(p, 1_000, half_year).unwrap(), U256::from(50u64));
        assert_eq!(interest_ceil(p, 1_000, half_year).unwrap(), U256::from(50u64));
        // tiny elapsed rounds up to 1 on the ceiling path, down to 0 on the floor path
        assert_eq!(interest_floor(p, 1_000, 1).unwrap(), U256::zero());
        assert_eq!(interest_ceil(p, 1_000, 1).unwrap(), U256::one());
        assert_eq!(interest_ceil(U256::zero(), 1_000, half_year).unwrap(), U256::zero());
    }
}
