//! Fixed-term agreement state machine: Active -> Repaid | Exercised |
//! Defaulted, every terminal state permanent.

use crate::error::LedgerError;
use crate::math::interest_floor;
use crate::state::position::PositionKey;
use odra::casper_types::U256;
use odra::prelude::*;

#[odra::odra_type]
pub enum AgreementStatus {
    Active = 0,
    Repaid = 1,
    Exercised = 2,
    Defaulted = 3,
}

/// Terms are copied from the matched offer at fill time and never change;
/// only `status` mutates afterwards.
#[odra::odra_type]
pub struct Agreement {
    pub id: u64,
    pub lender: PositionKey,
    pub borrower: PositionKey,
    pub source_pool: Address,
    pub collateral_pool: Address,
    pub principal: U256,
    pub apr_bps: u64,
    pub duration: u64,
    pub collateral_lock: U256,
    pub allow_early_repay: bool,
    pub allow_exercise: bool,
    pub status: AgreementStatus,
    pub start_time: u64,
    pub due_time: u64,
}

impl Agreement {
    pub fn require_active(&self) -> Result<(), LedgerError> {
        match self.status {
            AgreementStatus::Active => Ok(()),
            _ => Err(LedgerError::InvalidAgreementState),
        }
    }

    pub fn same_asset(&self) -> bool {
        self.source_pool == self.collateral_pool
    }

    fn recovery_opens(&self, grace_period: u64) -> u64 {
        self.due_time.saturating_add(grace_period)
    }

    /// Repayment window. With early repay the whole life of the agreement is
    /// open; without it the window opens once only the minimum interest
    /// duration remains. Either way it closes when recovery opens.
    pub fn check_repay_window(
        &self,
        now: u64,
        min_interest_duration: u64,
        grace_period: u64,
    ) -> Result<(), LedgerError> {
        if now > self.recovery_opens(grace_period) {
            return Err(LedgerError::RepayWindowClosed);
        }
        if !self.allow_early_repay {
            let opens = self.due_time.saturating_sub(min_interest_duration);
            if now < opens {
                return Err(LedgerError::EarlyRepayNotAllowed);
            }
        }
        Ok(())
    }

    /// Interest owed at repayment: simple interest over the elapsed time,
    /// floored to the minimum interest duration and capped at the full term.
    pub fn interest_due(&self, now: u64, min_interest_duration: u64) -> Result<U256, LedgerError> {
        let floor = min_interest_duration.min(self.duration);
        let elapsed = now
            .saturating_sub(self.start_time)
            .max(floor)
            .min(self.duration);
        interest_floor(self.principal, self.apr_bps, elapsed)
    }

    pub fn check_exercise(&self, now: u64, grace_period: u64) -> Result<(), LedgerError> {
        if !self.allow_exercise {
            return Err(LedgerError::ExerciseNotAllowed);
        }
        if now > self.recovery_opens(grace_period) {
            return Err(LedgerError::GracePeriodExpired);
        }
        Ok(())
    }

    pub fn check_recover(&self, now: u64, grace_period: u64) -> Result<(), LedgerError> {
        if now <= self.recovery_opens(grace_period) {
            return Err(LedgerError::GracePeriodActive);
        }
        Ok(())
    }
}
