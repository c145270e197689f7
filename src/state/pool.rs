//! Per-pool scaled accounting. One `Pool` record exists per underlying
//! asset, created lazily on first touch and never deleted.

use crate::error::LedgerError;
use crate::math::{mul_div_floor, wad, TryAdd, TryDiv, TryMul, TrySub};
use odra::casper_types::U256;

/// Pool-wide balances and the two distribution indexes.
///
/// `total_deposits` is the sum of all position principals; `tracked_balance`
/// is the liquid value actually redeemable (loan principal leaves the pool,
/// seizures only move value between positions). Both indexes are monotone;
/// rounding loss from a distribution is carried in the matching remainder
/// field and folded into the next accrual.
#[odra::odra_type]
#[derive(Default)]
pub struct Pool {
    pub total_deposits: U256,
    pub tracked_balance: U256,
    pub fee_index: U256,
    pub fee_index_remainder: U256,
    pub active_credit_index: U256,
    pub active_credit_remainder: U256,
    pub active_credit_principal_total: U256,
}

impl Pool {
    /// Distributes `amount` across all depositors in O(1) by advancing the
    /// fee index. With no depositors the whole scaled amount is retained in
    /// the remainder.
    pub fn accrue_fee(&mut self, amount: U256) -> Result<(), LedgerError> {
        let carry = self.fee_index_remainder.try_add(amount.try_mul(wad())?)?;
        if self.total_deposits.is_zero() {
            self.fee_index_remainder = carry;
            return Ok(());
        }
        let delta = carry.try_div(self.total_deposits)?;
        self.fee_index = self.fee_index.try_add(delta)?;
        self.fee_index_remainder = carry.try_sub(delta.try_mul(self.total_deposits)?)?;
        Ok(())
    }

    /// Same mechanism as [`Pool::accrue_fee`], driven by the total of
    /// currently gate-eligible principal instead of all deposits.
    pub fn accrue_active(&mut self, amount: U256) -> Result<(), LedgerError> {
        let carry = self.active_credit_remainder.try_add(amount.try_mul(wad())?)?;
        if self.active_credit_principal_total.is_zero() {
            self.active_credit_remainder = carry;
            return Ok(());
        }
        let delta = carry.try_div(self.active_credit_principal_total)?;
        self.active_credit_index = self.active_credit_index.try_add(delta)?;
        self.active_credit_remainder =
            carry.try_sub(delta.try_mul(self.active_credit_principal_total)?)?;
        Ok(())
    }

    /// Yield owed to `principal` since its fee-index `checkpoint`.
    pub fn pending_fee(&self, principal: U256, checkpoint: U256) -> Result<U256, LedgerError> {
        mul_div_floor(principal, self.fee_index.try_sub(checkpoint)?, wad())
    }

    /// Yield owed to eligible `principal` since its active-index `snapshot`.
    pub fn pending_active(&self, principal: U256, snapshot: U256) -> Result<U256, LedgerError> {
        mul_div_floor(principal, self.active_credit_index.try_sub(snapshot)?, wad())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_accrual_is_conserved_up_to_remainder() {
        let mut pool = Pool::default();
        pool.total_deposits = U256::from(700u64);

        pool.accrue_fee(U256::from(100u64)).unwrap();
        // two holders, 500 and 200
        let a = pool.pending_fee(U256::from(500u64), U256::zero()).unwrap();
        let b = pool.pending_fee(U256::from(200u64), U256::zero()).unwrap();
        let distributed = a + b;
        assert!(distributed <= U256::from(100u64));
        // the undistributed part sits in the remainder, scaled by WAD
        let leftover = U256::from(100u64) - distributed;
        assert!(pool.fee_index_remainder <= (leftover + U256::one()) * wad());
    }

    #[test]
    fn remainder_folds_into_next_accrual() {
        let mut pool = Pool::default();
        pool.total_deposits = U256::from(3u64);

        // 1 unit over 3 depositors leaves a remainder
        pool.accrue_fee(U256::one()).unwrap();
        let first = pool.fee_index;
        assert!(!pool.fee_index_remainder.is_zero());

        // 2 more units: carried remainder tops the index up to a full WAD
        pool.accrue_fee(U256::from(2u64)).unwrap();
        assert!(pool.fee_index > first);
        assert_eq!(pool.fee_index, wad());
        assert!(pool.fee_index_remainder.is_zero());
    }

    #[test]
    fn accrual_with_no_depositors_is_retained() {
        let mut pool = Pool::default();
        pool.accrue_fee(U256::from(40u64)).unwrap();
        assert_eq!(pool.fee_index, U256::zero());
        assert_eq!(pool.fee_index_remainder, U256::from(40u64) * wad());

        pool.total_deposits = U256::from(40u64);
        pool.accrue_fee(U256::zero()).unwrap();
        assert_eq!(pool.fee_index, wad());
        assert_eq!(pool.fee_index_remainder, U256::zero());
    }

    #[test]
    fn active_accrual_uses_eligible_total() {
        let mut pool = Pool::default();
        pool.total_deposits = U256::from(1_000u64);
        pool.active_credit_principal_total = U256::from(250u64);

        pool.accrue_active(U256::from(50u64)).unwrap();
        let owed = pool.pending_active(U256::from(250u64), U256::zero()).unwrap();
        assert_eq!(owed, U256::from(50u64));
        // the fee index is untouched
        assert_eq!(pool.fee_index, U256::zero());
    }

    #[test]
    fn indexes_never_decrease() {
        let mut pool = Pool::default();
        pool.total_deposits = U256::from(9u64);
        let mut last = U256::zero();
        for step in 1u64..=20 {
            pool.accrue_fee(U256::from(step % 3)).unwrap();
            assert!(pool.fee_index >= last);
            last = pool.fee_index;
        }
    }
}
