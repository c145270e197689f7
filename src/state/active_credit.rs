//! Weighted time-credit state gating active-credit yield eligibility.
//!
//! Each position carries two of these per pool: one for the encumbrance side
//! (lent principal and locked collateral) and one for same-asset debt. Yield
//! eligibility is binary on the dwell time: zero weight before the gate, full
//! principal at or after it. Top-ups dilute accumulated maturity by the
//! weighted-average formula so a large late deposit cannot inherit the credit
//! earned by a small early one.

use crate::error::LedgerError;
use crate::math::{mul_div_floor, TryAdd, TrySub};
use crate::state::pool::Pool;
use odra::casper_types::U256;

#[odra::odra_type]
#[derive(Default)]
pub struct ActiveCreditState {
    /// Exposure principal accumulated on this side.
    pub principal: U256,
    /// Weighted start of the dwell clock; `now - start_time` is the credit.
    pub start_time: u64,
    /// Active-credit index at the last settlement.
    pub index_snapshot: U256,
    /// Whether `principal` is currently counted in the pool's eligible total.
    pub indexed: bool,
}

impl ActiveCreditState {
    /// Accumulated dwell credit, capped at the gate.
    pub fn elapsed_credit(&self, now: u64, gate: u64) -> u64 {
        now.saturating_sub(self.start_time).min(gate)
    }

    pub fn eligible(&self, now: u64, gate: u64) -> bool {
        !self.principal.is_zero() && now.saturating_sub(self.start_time) >= gate
    }

    /// Binary eligibility weight: zero before the gate, full principal after.
    pub fn weight(&self, now: u64, gate: u64) -> U256 {
        if self.eligible(now, gate) {
            self.principal
        } else {
            U256::zero()
        }
    }

    /// Settles pending active yield against the pool index and refreshes the
    /// snapshot. Returns the amount owed; zero while not indexed.
    pub fn settle(&mut self, pool: &Pool) -> Result<U256, LedgerError> {
        if !self.indexed {
            self.index_snapshot = pool.active_credit_index;
            return Ok(U256::zero());
        }
        let pending = pool.pending_active(self.principal, self.index_snapshot)?;
        self.index_snapshot = pool.active_credit_index;
        Ok(pending)
    }

    /// Settles, then reconciles the `indexed` flag with current eligibility,
    /// keeping `pool.active_credit_principal_total` exact. Returns the
    /// settled yield.
    pub fn sync(&mut self, pool: &mut Pool, now: u64, gate: u64) -> Result<U256, LedgerError> {
        let settled = self.settle(pool)?;
        let eligible = self.eligible(now, gate);
        if eligible && !self.indexed {
            self.indexed = true;
            self.index_snapshot = pool.active_credit_index;
            pool.active_credit_principal_total =
                pool.active_credit_principal_total.try_add(self.principal)?;
        } else if !eligible && self.indexed {
            self.indexed = false;
            pool.active_credit_principal_total =
                pool.active_credit_principal_total.try_sub(self.principal)?;
        }
        Ok(settled)
    }

    /// Adds exposure, diluting the dwell credit in proportion to the top-up:
    /// `new_credit = principal * min(now - start, gate) / (principal + add)`.
    /// Returns yield settled under the old principal.
    pub fn increase(
        &mut self,
        pool: &mut Pool,
        add: U256,
        now: u64,
        gate: u64,
    ) -> Result<U256, LedgerError> {
        let settled = self.sync(pool, now, gate)?;
        if self.indexed {
            // drop out of the eligible total; the final sync re-adds the new
            // principal if the diluted credit still clears the gate
            pool.active_credit_principal_total =
                pool.active_credit_principal_total.try_sub(self.principal)?;
            self.indexed = false;
        }
        if self.principal.is_zero() {
            self.start_time = now;
        } else {
            let credit = U256::from(self.elapsed_credit(now, gate));
            let total = self.principal.try_add(add)?;
            let kept = mul_div_floor(self.principal, credit, total)?;
            // kept <= gate, so the narrowing cast is exact
            self.start_time = now - kept.as_u64();
        }
        self.principal = self.principal.try_add(add)?;
        self.sync(pool, now, gate)?;
        Ok(settled)
    }

    /// Removes up to `amount` of exposure. Closing the side entirely resets
    /// all state so nothing stale survives into a later exposure.
    pub fn decrease(
        &mut self,
        pool: &mut Pool,
        amount: U256,
        now: u64,
        gate: u64,
    ) -> Result<U256, LedgerError> {
        let settled = self.sync(pool, now, gate)?;
        let removed = amount.min(self.principal);
        if self.indexed {
            pool.active_credit_principal_total =
                pool.active_credit_principal_total.try_sub(removed)?;
        }
        self.principal = self.principal.try_sub(removed)?;
        if self.principal.is_zero() {
            *self = ActiveCreditState::default();
        }
        Ok(settled)
    }
}
