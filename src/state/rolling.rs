//! Amortizing interval-based loans with arrears accumulation.

use crate::error::LedgerError;
use crate::math::{bps_of, interest_ceil, TryAdd, TrySub};
use crate::state::agreement::AgreementStatus;
use crate::state::position::PositionKey;
use odra::casper_types::U256;
use odra::prelude::*;

/// Terms of a rolling offer, validated against [`crate::state::config::RollingConfig`]
/// at posting time.
#[odra::odra_type]
pub struct RollingTerms {
    pub source_pool: Address,
    pub collateral_pool: Address,
    pub principal: U256,
    pub rolling_apy_bps: u64,
    pub payment_interval: u64,
    pub payment_count: u64,
    pub collateral_lock: U256,
    pub upfront_premium_bps: u64,
    pub allow_amortization: bool,
}

#[odra::odra_type]
pub struct RollingOffer {
    pub id: u64,
    pub maker: PositionKey,
    pub terms: RollingTerms,
    pub cancelled: bool,
    pub filled: bool,
}

impl RollingOffer {
    pub fn require_live(&self) -> Result<(), LedgerError> {
        if self.filled {
            return Err(LedgerError::OfferAlreadyFilled);
        }
        if self.cancelled {
            return Err(LedgerError::OfferAlreadyCancelled);
        }
        Ok(())
    }
}

/// How one payment was applied. Arrears absorb first, then current interest;
/// anything further amortizes principal.
#[derive(Debug, PartialEq, Eq)]
pub struct PaymentBreakdown {
    pub to_arrears: U256,
    pub to_interest: U256,
    pub to_principal: U256,
    /// Current interest left unpaid by this payment, rolled into arrears.
    pub carried: U256,
    pub paid_off: bool,
}

impl PaymentBreakdown {
    pub fn applied(&self) -> Result<U256, LedgerError> {
        self.to_arrears.try_add(self.to_interest)?.try_add(self.to_principal)
    }
}

#[odra::odra_type]
pub struct RollingAgreement {
    pub id: u64,
    pub lender: PositionKey,
    pub borrower: PositionKey,
    pub source_pool: Address,
    pub collateral_pool: Address,
    pub outstanding_principal: U256,
    pub arrears: U256,
    pub payments_made: u64,
    pub max_payments: u64,
    pub payment_interval: u64,
    pub next_due: u64,
    pub rolling_apy_bps: u64,
    pub last_accrual: u64,
    pub collateral_lock: U256,
    pub allow_amortization: bool,
    /// Snapshot of the protocol grace period at fill time.
    pub grace_period: u64,
    pub status: AgreementStatus,
}

impl RollingAgreement {
    pub fn require_active(&self) -> Result<(), LedgerError> {
        match self.status {
            AgreementStatus::Active => Ok(()),
            _ => Err(LedgerError::InvalidAgreementState),
        }
    }

    pub fn same_asset(&self) -> bool {
        self.source_pool == self.collateral_pool
    }

    /// Ceiling-rounded interest since the last accrual, capped by nothing:
    /// arrears simply keep growing while payments are missed.
    pub fn accrued_interest(&self, now: u64) -> Result<U256, LedgerError> {
        interest_ceil(
            self.outstanding_principal,
            self.rolling_apy_bps,
            now.saturating_sub(self.last_accrual),
        )
    }

    pub fn minimum_payment(&self, min_payment_bps: u64) -> Result<U256, LedgerError> {
        bps_of(self.outstanding_principal, min_payment_bps)
    }

    /// Everything the borrower owes right now.
    pub fn total_owed(&self, now: u64) -> Result<U256, LedgerError> {
        self.arrears
            .try_add(self.accrued_interest(now)?)?
            .try_add(self.outstanding_principal)
    }

    /// Applies one payment. Rejects dust, routes arrears then interest then
    /// principal, rolls unpaid interest into arrears, and advances the
    /// schedule by whole intervals until it passes `now` (catch-up, never a
    /// reset of phase).
    pub fn apply_payment(
        &mut self,
        amount: U256,
        now: u64,
        min_payment_bps: u64,
    ) -> Result<PaymentBreakdown, LedgerError> {
        self.require_active()?;
        if amount.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }
        // a payment that clears everything owed is never dust
        if amount < self.minimum_payment(min_payment_bps)? && amount < self.total_owed(now)? {
            return Err(LedgerError::PaymentBelowMinimum);
        }

        let interest = self.accrued_interest(now)?;
        let mut remaining = amount;

        let to_arrears = remaining.min(self.arrears);
        remaining = remaining.try_sub(to_arrears)?;
        self.arrears = self.arrears.try_sub(to_arrears)?;

        let to_interest = remaining.min(interest);
        remaining = remaining.try_sub(to_interest)?;
        let carried = interest.try_sub(to_interest)?;
        self.arrears = self.arrears.try_add(carried)?;

        let mut to_principal = U256::zero();
        if !remaining.is_zero() {
            if !self.allow_amortization {
                return Err(LedgerError::AmortizationDisabled);
            }
            to_principal = remaining.min(self.outstanding_principal);
            self.outstanding_principal = self.outstanding_principal.try_sub(to_principal)?;
        }

        self.last_accrual = now;
        self.advance_schedule(now);
        self.payments_made = self.payments_made.saturating_add(1);

        let paid_off = self.outstanding_principal.is_zero() && self.arrears.is_zero();
        if paid_off {
            self.status = AgreementStatus::Repaid;
        }
        Ok(PaymentBreakdown {
            to_arrears,
            to_interest,
            to_principal,
            carried,
            paid_off,
        })
    }

    fn advance_schedule(&mut self, now: u64) {
        let intervals = if now >= self.next_due {
            (now - self.next_due) / self.payment_interval + 1
        } else {
            1
        };
        // the schedule ends after max_payments intervals; catch-up never
        // extends it further
        let remaining = self.max_payments.saturating_sub(self.payments_made).max(1);
        self.next_due = self
            .next_due
            .saturating_add(intervals.min(remaining).saturating_mul(self.payment_interval));
    }

    pub fn check_recover(&self, now: u64) -> Result<(), LedgerError> {
        self.require_active()?;
        if now <= self.next_due.saturating_add(self.grace_period) {
            return Err(LedgerError::GracePeriodActive);
        }
        Ok(())
    }
}
