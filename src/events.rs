//! Events for off-ledger observers. Field order is part of the observable
//! contract; indexers rely on it.
//!
//! Positions are identified by their `(token_contract, token_id)` pair and
//! cancel reasons by their discriminant; event fields stay CLValue-native.

use odra::casper_types::U256;
use odra::prelude::*;

#[odra::event]
pub struct PositionBound {
    pub token_contract: Address,
    pub token_id: u64,
    pub controller: Address,
}

#[odra::event]
pub struct Deposited {
    pub token_contract: Address,
    pub token_id: u64,
    pub pool: Address,
    pub amount: U256,
    pub new_principal: U256,
}

#[odra::event]
pub struct Withdrawn {
    pub token_contract: Address,
    pub token_id: u64,
    pub pool: Address,
    pub amount: U256,
    pub new_principal: U256,
}

#[odra::event]
pub struct YieldClaimed {
    pub token_contract: Address,
    pub token_id: u64,
    pub pool: Address,
    pub amount: U256,
}

#[odra::event]
pub struct OfferPosted {
    pub offer_id: u64,
    pub maker_contract: Address,
    pub maker_id: u64,
    pub source_pool: Address,
    pub collateral_pool: Address,
    pub principal: U256,
    pub tranche_total: U256,
}

#[odra::event]
pub struct OfferAccepted {
    pub offer_id: u64,
    pub agreement_id: u64,
    pub taker_contract: Address,
    pub taker_id: u64,
    pub fill_principal: U256,
    pub collateral_lock: U256,
    pub tranche_remaining: U256,
    pub depleted: bool,
}

#[odra::event]
pub struct OfferCancelled {
    pub offer_id: u64,
    /// [`crate::state::CancelReason`] discriminant.
    pub reason: u8,
    pub escrow_returned: U256,
}

#[odra::event]
pub struct AgreementRepaid {
    pub agreement_id: u64,
    pub principal: U256,
    pub interest: U256,
}

#[odra::event]
pub struct AgreementExercised {
    pub agreement_id: u64,
    pub seized: U256,
}

#[odra::event]
pub struct AgreementDefaulted {
    pub agreement_id: u64,
    pub seized: U256,
}

#[odra::event]
pub struct RollingOfferPosted {
    pub offer_id: u64,
    pub maker_contract: Address,
    pub maker_id: u64,
    pub source_pool: Address,
    pub collateral_pool: Address,
    pub principal: U256,
}

#[odra::event]
pub struct RollingOfferCancelled {
    pub offer_id: u64,
    pub escrow_returned: U256,
}

#[odra::event]
pub struct RollingOpened {
    pub offer_id: u64,
    pub agreement_id: u64,
    pub borrower_contract: Address,
    pub borrower_id: u64,
    pub principal: U256,
    pub upfront_premium: U256,
    pub next_due: u64,
}

#[odra::event]
pub struct RollingPaymentMade {
    pub agreement_id: u64,
    pub to_arrears: U256,
    pub to_interest: U256,
    pub to_principal: U256,
    pub next_due: u64,
    pub paid_off: bool,
}

#[odra::event]
pub struct RollingDefaulted {
    pub agreement_id: u64,
    pub covered: U256,
    pub penalty: U256,
    pub refunded: U256,
}

#[odra::event]
pub struct ActiveCreditAccrued {
    pub pool: Address,
    pub amount: U256,
}

#[odra::event]
pub struct ActiveCreditSettled {
    pub token_contract: Address,
    pub token_id: u64,
    pub pool: Address,
    pub amount: U256,
}

#[odra::event]
pub struct ActiveCreditTimingUpdated {
    pub token_contract: Address,
    pub token_id: u64,
    pub pool: Address,
    pub principal: U256,
    pub start_time: u64,
}

#[odra::event]
pub struct ConfigUpdated {}
