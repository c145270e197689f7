//! Lender- and borrower-initiated offers, including divisible tranches.

use crate::error::LedgerError;
use crate::math::{mul_div_floor, TrySub};
use crate::state::position::PositionKey;
use odra::casper_types::U256;
use odra::prelude::*;

#[odra::odra_type]
pub enum OfferKind {
    /// Single fill consumes the whole offer.
    Standard = 0,
    /// Divisible; each fill consumes exactly `terms.principal`.
    Tranche = 1,
    /// Divisible; fills are denominated in collateral and priced by ratio.
    RatioTranche = 2,
}

#[odra::odra_type]
pub enum OfferSide {
    Lend = 0,
    Borrow = 1,
}

/// Reported in `OfferCancelled` so indexers can tell a maker cancel from a
/// depletion auto-cancel.
#[odra::odra_type]
pub enum CancelReason {
    Maker = 0,
    Depleted = 1,
}

/// Terms shared by every offer variant. `principal` and `collateral_lock`
/// are per-fill amounts.
#[odra::odra_type]
pub struct OfferTerms {
    pub source_pool: Address,
    pub collateral_pool: Address,
    pub principal: U256,
    pub apr_bps: u64,
    pub duration: u64,
    pub collateral_lock: U256,
    pub allow_early_repay: bool,
    pub allow_exercise: bool,
    pub allow_lender_call: bool,
}

#[odra::odra_type]
pub struct Offer {
    pub id: u64,
    pub kind: OfferKind,
    pub side: OfferSide,
    pub maker: PositionKey,
    pub terms: OfferTerms,
    /// Unfilled capacity, denominated in the escrow asset: loan principal
    /// for lend offers, collateral for borrow offers.
    pub tranche_remaining: U256,
    pub price_num: U256,
    pub price_den: U256,
    pub min_fill: U256,
    pub cancelled: bool,
    pub filled: bool,
}

impl Offer {
    pub fn is_live(&self) -> bool {
        !self.cancelled && !self.filled
    }

    pub fn require_live(&self) -> Result<(), LedgerError> {
        if self.filled {
            return Err(LedgerError::OfferAlreadyFilled);
        }
        if self.cancelled {
            return Err(LedgerError::OfferAlreadyCancelled);
        }
        Ok(())
    }

    /// Pool in which the maker's escrow for this offer is held.
    pub fn escrow_pool(&self) -> Address {
        match self.side {
            OfferSide::Lend => self.terms.source_pool,
            OfferSide::Borrow => self.terms.collateral_pool,
        }
    }

    pub fn has_capacity(&self, fill: U256) -> bool {
        self.tranche_remaining >= fill
    }

    /// Converts a collateral-denominated ratio fill to loan principal.
    pub fn ratio_principal(&self, collateral_amount: U256) -> Result<U256, LedgerError> {
        if self.price_num.is_zero() || self.price_den.is_zero() {
            return Err(LedgerError::InvalidRatio);
        }
        mul_div_floor(collateral_amount, self.price_num, self.price_den)
    }

    /// The single atomic decrement-and-check step of tranche matching: takes
    /// `fill` out of the remaining capacity and marks the offer filled once
    /// less than `floor` (one fill's worth) is left. Returns the leftover
    /// escrow to release beyond the fill itself.
    pub fn consume(&mut self, fill: U256, floor: U256) -> Result<U256, LedgerError> {
        self.require_live()?;
        if !self.has_capacity(fill) {
            return Err(LedgerError::FillExceedsRemaining);
        }
        self.tranche_remaining = self.tranche_remaining.try_sub(fill)?;
        let mut leftover = U256::zero();
        if self.tranche_remaining < floor {
            self.filled = true;
            leftover = self.tranche_remaining;
            self.tranche_remaining = U256::zero();
        }
        Ok(leftover)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odra::casper_types::account::AccountHash;

    fn addr(n: u8) -> Address {
        Address::Account(AccountHash::new([n; 32]))
    }

    fn key(n: u8) -> PositionKey {
        PositionKey {
            token_contract: addr(0xEE),
            token_id: n as u64,
        }
    }

    fn tranche_offer(per_fill: u64, total: u64) -> Offer {
        Offer {
            id: 1,
            kind: OfferKind::Tranche,
            side: OfferSide::Lend,
            maker: key(1),
            terms: OfferTerms {
                source_pool: addr(10),
                collateral_pool: addr(11),
                principal: U256::from(per_fill),
                apr_bps: 1_000,
                duration: 1_000_000,
                collateral_lock: U256::from(per_fill / 2),
                allow_early_repay: true,
                allow_exercise: false,
                allow_lender_call: false,
            },
            tranche_remaining: U256::from(total),
            price_num: U256::zero(),
            price_den: U256::zero(),
            min_fill: U256::zero(),
            cancelled: false,
            filled: false,
        }
    }

    #[test]
    fn tranche_fills_until_depleted() {
        let mut offer = tranche_offer(100, 250);
        let floor = U256::from(100u64);

        assert_eq!(offer.consume(floor, floor), Ok(U256::zero()));
        assert_eq!(offer.tranche_remaining, U256::from(150u64));
        assert!(offer.is_live());

        // second fill leaves 50, below one fill's worth; the dust escrow is
        // surfaced for release and the offer is terminal
        assert_eq!(offer.consume(floor, floor), Ok(U256::from(50u64)));
        assert!(offer.filled);
        assert_eq!(offer.tranche_remaining, U256::zero());

        // a third attempt fails cleanly
        assert_eq!(offer.consume(floor, floor), Err(LedgerError::OfferAlreadyFilled));
    }

    #[test]
    fn oversized_fill_is_rejected_without_mutation() {
        let mut offer = tranche_offer(100, 80);
        assert_eq!(
            offer.consume(U256::from(100u64), U256::from(100u64)),
            Err(LedgerError::FillExceedsRemaining)
        );
        assert_eq!(offer.tranche_remaining, U256::from(80u64));
        assert!(offer.is_live());
    }

    #[test]
    fn ratio_conversion_validates_the_ratio() {
        let mut offer = tranche_offer(100, 1_000);
        offer.kind = OfferKind::RatioTranche;
        assert_eq!(
            offer.ratio_principal(U256::from(30u64)),
            Err(LedgerError::InvalidRatio)
        );
        offer.price_num = U256::from(2u64);
        offer.price_den = U256::from(3u64);
        assert_eq!(offer.ratio_principal(U256::from(30u64)), Ok(U256::from(20u64)));
    }
}
