//! Per-position, per-pool balances and the encumbrance record.

use crate::error::LedgerError;
use crate::math::{bps_of, TryAdd, TrySub};
use crate::state::active_credit::ActiveCreditState;
use crate::state::pool::Pool;
use odra::casper_types::U256;
use odra::prelude::*;

/// Content-stable identity of a position: the ownership token backing it.
/// The ledger only ever uses this as a lookup key; who controls the key is
/// resolved through the external ownership registry.
#[odra::odra_type]
pub struct PositionKey {
    pub token_contract: Address,
    pub token_id: u64,
}

/// Principal that is spoken for and therefore not withdrawable or
/// double-usable. The single source of truth for solvency checks.
#[odra::odra_type]
#[derive(Default)]
pub struct Encumbrance {
    /// Collateral locked under active agreements.
    pub locked_principal: U256,
    /// Principal currently lent out under active agreements.
    pub lent_principal: U256,
    /// Debt collateralized by this position, in this pool.
    pub borrowed_principal: U256,
    /// Principal reserved by this position's open offers in this pool.
    pub offer_escrow: U256,
}

/// One position's slice of one pool.
#[odra::odra_type]
#[derive(Default)]
pub struct PoolPosition {
    pub principal: U256,
    pub fee_index_checkpoint: U256,
    pub accrued_yield: U256,
    pub encumbrance: Encumbrance,
    /// Lender/collateral exposure side of the active-credit clock.
    pub credit_side: ActiveCreditState,
    /// Same-asset debt exposure side.
    pub debt_side: ActiveCreditState,
}

impl PoolPosition {
    /// Settles fee-index yield under the current principal. Must run before
    /// any mutation of `principal` so yield is never misattributed.
    pub fn settle_fee(&mut self, pool: &Pool) -> Result<U256, LedgerError> {
        let pending = pool.pending_fee(self.principal, self.fee_index_checkpoint)?;
        self.accrued_yield = self.accrued_yield.try_add(pending)?;
        self.fee_index_checkpoint = pool.fee_index;
        Ok(pending)
    }

    /// Principal not locked as collateral and not reserved by open offers.
    /// Lent and borrowed amounts restrict pool liquidity, not this bound.
    pub fn withdrawable(&self) -> U256 {
        self.principal
            .saturating_sub(self.encumbrance.locked_principal)
            .saturating_sub(self.encumbrance.offer_escrow)
    }

    /// Debt-side solvency bound: `locked + borrowed <= principal * LTV`.
    pub fn check_ltv(&self, max_ltv_bps: u64) -> Result<(), LedgerError> {
        let encumbered = self
            .encumbrance
            .locked_principal
            .try_add(self.encumbrance.borrowed_principal)?;
        if encumbered > bps_of(self.principal, max_ltv_bps)? {
            return Err(LedgerError::LtvExceeded);
        }
        Ok(())
    }

    /// Locks collateral and records the debt it secures, failing with a
    /// solvency error (and no state change observed) if the LTV bound breaks.
    pub fn lock_for_loan(
        &mut self,
        lock: U256,
        debt: U256,
        max_ltv_bps: u64,
    ) -> Result<(), LedgerError> {
        self.encumbrance.locked_principal = self.encumbrance.locked_principal.try_add(lock)?;
        self.encumbrance.borrowed_principal = self.encumbrance.borrowed_principal.try_add(debt)?;
        self.check_ltv(max_ltv_bps)
    }

    /// Releases a loan's collateral lock and debt. Saturating: a prior
    /// seizure may already have consumed part of the lock.
    pub fn release_loan(&mut self, lock: U256, debt: U256) {
        self.encumbrance.locked_principal =
            self.encumbrance.locked_principal.saturating_sub(lock);
        self.encumbrance.borrowed_principal =
            self.encumbrance.borrowed_principal.saturating_sub(debt);
    }

    pub fn add_escrow(&mut self, amount: U256) -> Result<(), LedgerError> {
        if self.withdrawable() < amount {
            return Err(LedgerError::InsufficientPrincipal);
        }
        self.encumbrance.offer_escrow = self.encumbrance.offer_escrow.try_add(amount)?;
        Ok(())
    }

    pub fn release_escrow(&mut self, amount: U256) -> Result<(), LedgerError> {
        self.encumbrance.offer_escrow = self.encumbrance.offer_escrow.try_sub(amount)?;
        Ok(())
    }

    /// Settles both active-credit sides and banks the yield. Returns the
    /// total settled.
    pub fn sync_active(
        &mut self,
        pool: &mut Pool,
        now: u64,
        gate: u64,
    ) -> Result<U256, LedgerError> {
        let a = self.credit_side.sync(pool, now, gate)?;
        let b = self.debt_side.sync(pool, now, gate)?;
        let total = a.try_add(b)?;
        self.accrued_yield = self.accrued_yield.try_add(total)?;
        Ok(total)
    }

    pub fn credit_increase(
        &mut self,
        pool: &mut Pool,
        add: U256,
        now: u64,
        gate: u64,
    ) -> Result<U256, LedgerError> {
        let settled = self.credit_side.increase(pool, add, now, gate)?;
        self.accrued_yield = self.accrued_yield.try_add(settled)?;
        Ok(settled)
    }

    pub fn credit_decrease(
        &mut self,
        pool: &mut Pool,
        amount: U256,
        now: u64,
        gate: u64,
    ) -> Result<U256, LedgerError> {
        let settled = self.credit_side.decrease(pool, amount, now, gate)?;
        self.accrued_yield = self.accrued_yield.try_add(settled)?;
        Ok(settled)
    }

    pub fn debt_increase(
        &mut self,
        pool: &mut Pool,
        add: U256,
        now: u64,
        gate: u64,
    ) -> Result<U256, LedgerError> {
        let settled = self.debt_side.increase(pool, add, now, gate)?;
        self.accrued_yield = self.accrued_yield.try_add(settled)?;
        Ok(settled)
    }

    pub fn debt_decrease(
        &mut self,
        pool: &mut Pool,
        amount: U256,
        now: u64,
        gate: u64,
    ) -> Result<U256, LedgerError> {
        let settled = self.debt_side.decrease(pool, amount, now, gate)?;
        self.accrued_yield = self.accrued_yield.try_add(settled)?;
        Ok(settled)
    }
}
