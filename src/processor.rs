//! The ledger module: storage, entry points and the settlement choreography.
//!
//! All mutating flows are built from small load-mutate-store helpers, each of
//! which finishes its writes before the next one runs. That keeps pool and
//! position records from aliasing when source and collateral share one pool.
//!
//! Every mutating entry point is `non_reentrant`, and no flow makes an
//! outbound contract call, so storage is never observable mid-write.

use odra::casper_types::U256;
use odra::prelude::*;

use crate::error::LedgerError;
use crate::events::{
    ActiveCreditAccrued, ActiveCreditSettled, ActiveCreditTimingUpdated, AgreementDefaulted,
    AgreementExercised, AgreementRepaid, ConfigUpdated, Deposited, OfferAccepted, OfferCancelled,
    OfferPosted, PositionBound, RollingDefaulted, RollingOfferCancelled, RollingOfferPosted,
    RollingOpened, RollingPaymentMade, Withdrawn, YieldClaimed,
};
use crate::math::{bps_of, TryAdd, TrySub};
use crate::state::{
    Agreement, AgreementStatus, CancelReason, Offer, OfferKind, OfferSide, OfferTerms, Pool,
    PoolPosition, PositionKey, ProtocolConfig, RollingAgreement, RollingConfig, RollingOffer,
    RollingTerms,
};

fn same_position(a: &PositionKey, b: &PositionKey) -> bool {
    a.token_contract == b.token_contract && a.token_id == b.token_id
}

const SEQ_OFFER: u8 = 0;
const SEQ_AGREEMENT: u8 = 1;
const SEQ_ROLLING_OFFER: u8 = 2;
const SEQ_ROLLING_AGREEMENT: u8 = 3;

#[odra::module(
    events = [
        PositionBound,
        Deposited,
        Withdrawn,
        YieldClaimed,
        OfferPosted,
        OfferAccepted,
        OfferCancelled,
        AgreementRepaid,
        AgreementExercised,
        AgreementDefaulted,
        RollingOfferPosted,
        RollingOfferCancelled,
        RollingOpened,
        RollingPaymentMade,
        RollingDefaulted,
        ActiveCreditAccrued,
        ActiveCreditSettled,
        ActiveCreditTimingUpdated,
        ConfigUpdated
    ]
)]
pub struct PeerLendingLedger {
    owner: Var<Address>,
    position_registry: Var<Address>,
    treasury: Var<PositionKey>,
    config: Var<ProtocolConfig>,
    rolling_config: Var<RollingConfig>,
    pools: Mapping<Address, Pool>,
    positions: Mapping<(PositionKey, Address), PoolPosition>,
    controllers: Mapping<PositionKey, Address>,
    offers: Mapping<u64, Offer>,
    agreements: Mapping<u64, Agreement>,
    rolling_offers: Mapping<u64, RollingOffer>,
    rolling_agreements: Mapping<u64, RollingAgreement>,
    // one id counter per object family, keyed by the SEQ_* constants
    sequences: Mapping<u8, u64>,
}

#[odra::module]
impl PeerLendingLedger {
    pub fn init(
        &mut self,
        owner: Address,
        position_registry: Address,
        treasury: PositionKey,
        config: ProtocolConfig,
        rolling_config: RollingConfig,
    ) {
        self.resolve(config.validate());
        self.resolve(rolling_config.validate());
        self.owner.set(owner);
        self.position_registry.set(position_registry);
        self.treasury.set(treasury);
        self.config.set(config);
        self.rolling_config.set(rolling_config);
    }

    // -----------------------------------------------------------------
    // Administration and position binding
    // -----------------------------------------------------------------

    /// Called by the ownership registry whenever a position token moves to a
    /// new controller. Rebinding an already bound key is the transfer path.
    pub fn bind_position(&mut self, key: PositionKey, controller: Address) {
        let registry = self
            .position_registry
            .get()
            .unwrap_or_else(|| self.env().revert(LedgerError::InvalidConfig));
        if self.env().caller() != registry {
            self.env().revert(LedgerError::Unauthorized);
        }
        self.controllers.set(&key, controller);
        self.env().emit_event(PositionBound {
            token_contract: key.token_contract,
            token_id: key.token_id,
            controller,
        });
    }

    pub fn update_config(&mut self, config: ProtocolConfig) {
        self.require_owner();
        self.resolve(config.validate());
        self.config.set(config);
        self.env().emit_event(ConfigUpdated {});
    }

    pub fn update_rolling_config(&mut self, rolling_config: RollingConfig) {
        self.require_owner();
        self.resolve(rolling_config.validate());
        self.rolling_config.set(rolling_config);
        self.env().emit_event(ConfigUpdated {});
    }

    // -----------------------------------------------------------------
    // Deposits, withdrawals, yield
    // -----------------------------------------------------------------

    #[odra(non_reentrant)]
    pub fn deposit(&mut self, key: PositionKey, pool: Address, amount: U256) {
        self.require_controller(&key);
        if amount.is_zero() {
            self.env().revert(LedgerError::ZeroAmount);
        }
        let cfg = self.cfg();
        let mut p = self.pool(&pool);
        let mut pos = self.position(&key, &pool);
        self.resolve(pos.settle_fee(&p));
        pos.principal = self.resolve(pos.principal.try_add(amount));
        if pos.principal < cfg.min_deposit {
            self.env().revert(LedgerError::BelowMinimumDeposit);
        }
        p.total_deposits = self.resolve(p.total_deposits.try_add(amount));
        p.tracked_balance = self.resolve(p.tracked_balance.try_add(amount));
        let new_principal = pos.principal;
        self.pools.set(&pool, p);
        self.positions.set(&(key.clone(), pool), pos);
        self.env().emit_event(Deposited {
            token_contract: key.token_contract,
            token_id: key.token_id,
            pool,
            amount,
            new_principal,
        });
    }

    #[odra(non_reentrant)]
    pub fn withdraw(&mut self, key: PositionKey, pool: Address, amount: U256) {
        self.require_controller(&key);
        if amount.is_zero() {
            self.env().revert(LedgerError::ZeroAmount);
        }
        let cfg = self.cfg();
        let mut p = self.pool(&pool);
        let mut pos = self.position(&key, &pool);
        self.resolve(pos.settle_fee(&p));
        if pos.withdrawable() < amount {
            self.env().revert(LedgerError::InsufficientPrincipal);
        }
        if p.tracked_balance < amount {
            self.env().revert(LedgerError::InsufficientLiquidity);
        }
        pos.principal = self.resolve(pos.principal.try_sub(amount));
        self.resolve(pos.check_ltv(cfg.max_ltv_bps));
        p.total_deposits = self.resolve(p.total_deposits.try_sub(amount));
        p.tracked_balance = self.resolve(p.tracked_balance.try_sub(amount));
        let new_principal = pos.principal;
        self.pools.set(&pool, p);
        self.positions.set(&(key.clone(), pool), pos);
        self.env().emit_event(Withdrawn {
            token_contract: key.token_contract,
            token_id: key.token_id,
            pool,
            amount,
            new_principal,
        });
    }

    /// Settles both indexes and folds everything accrued back into principal.
    #[odra(non_reentrant)]
    pub fn claim_yield(&mut self, key: PositionKey, pool: Address) -> U256 {
        self.require_controller(&key);
        let cfg = self.cfg();
        let now = self.now();
        let mut p = self.pool(&pool);
        let mut pos = self.position(&key, &pool);
        self.resolve(pos.settle_fee(&p));
        let active = self.resolve(pos.sync_active(&mut p, now, cfg.active_credit_time_gate));
        let amount = pos.accrued_yield;
        pos.accrued_yield = U256::zero();
        pos.principal = self.resolve(pos.principal.try_add(amount));
        p.total_deposits = self.resolve(p.total_deposits.try_add(amount));
        self.pools.set(&pool, p);
        self.positions.set(&(key.clone(), pool), pos);
        self.emit_active_settled(&key, pool, active);
        self.env().emit_event(YieldClaimed {
            token_contract: key.token_contract,
            token_id: key.token_id,
            pool,
            amount,
        });
        amount
    }

    // -----------------------------------------------------------------
    // Offer book
    // -----------------------------------------------------------------

    #[odra(non_reentrant)]
    pub fn post_offer(&mut self, key: PositionKey, terms: OfferTerms) -> u64 {
        self.require_controller(&key);
        self.validate_offer_terms(&terms);
        self.add_offer_escrow(&key, terms.source_pool, terms.principal);
        self.insert_offer(key, OfferKind::Standard, OfferSide::Lend, terms, None)
    }

    /// A lend offer that can be filled repeatedly in fixed slices of
    /// `terms.principal` until `tranche_total` is used up.
    #[odra(non_reentrant)]
    pub fn post_tranche_offer(
        &mut self,
        key: PositionKey,
        terms: OfferTerms,
        tranche_total: U256,
    ) -> u64 {
        self.require_controller(&key);
        self.validate_offer_terms(&terms);
        if tranche_total < terms.principal {
            self.env().revert(LedgerError::BelowMinimumFill);
        }
        self.add_offer_escrow(&key, terms.source_pool, tranche_total);
        self.insert_offer(
            key,
            OfferKind::Tranche,
            OfferSide::Lend,
            terms,
            Some((tranche_total, U256::zero(), U256::zero(), U256::zero())),
        )
    }

    /// A lend offer with taker-sized fills: principal is derived from the
    /// collateral the taker brings at `price_num / price_den`.
    #[odra(non_reentrant)]
    pub fn post_ratio_tranche_offer(
        &mut self,
        key: PositionKey,
        terms: OfferTerms,
        tranche_total: U256,
        price_num: U256,
        price_den: U256,
        min_fill: U256,
    ) -> u64 {
        self.require_controller(&key);
        let cfg = self.cfg();
        if terms.duration == 0 {
            self.env().revert(LedgerError::ZeroDuration);
        }
        if price_num.is_zero() || price_den.is_zero() {
            self.env().revert(LedgerError::InvalidRatio);
        }
        if terms.source_pool == terms.collateral_pool {
            self.env().revert(LedgerError::AssetMismatch);
        }
        if min_fill.is_zero() {
            self.env().revert(LedgerError::ZeroAmount);
        }
        if min_fill < cfg.min_loan {
            self.env().revert(LedgerError::BelowMinimumLoan);
        }
        if tranche_total < min_fill {
            self.env().revert(LedgerError::BelowMinimumFill);
        }
        self.add_offer_escrow(&key, terms.source_pool, tranche_total);
        self.insert_offer(
            key,
            OfferKind::RatioTranche,
            OfferSide::Lend,
            terms,
            Some((tranche_total, price_num, price_den, min_fill)),
        )
    }

    /// The borrower side of the book: escrows the collateral lock instead of
    /// loan principal, waiting for a lender to take the terms.
    #[odra(non_reentrant)]
    pub fn post_borrow_offer(&mut self, key: PositionKey, terms: OfferTerms) -> u64 {
        self.require_controller(&key);
        self.validate_offer_terms(&terms);
        if terms.collateral_lock.is_zero() {
            self.env().revert(LedgerError::ZeroAmount);
        }
        self.add_offer_escrow(&key, terms.collateral_pool, terms.collateral_lock);
        let remaining = terms.collateral_lock;
        self.insert_offer(
            key,
            OfferKind::Standard,
            OfferSide::Borrow,
            terms,
            Some((remaining, U256::zero(), U256::zero(), U256::zero())),
        )
    }

    #[odra(non_reentrant)]
    pub fn cancel_offer(&mut self, key: PositionKey, offer_id: u64) {
        self.require_controller(&key);
        let mut offer = self.load_offer(offer_id);
        if !same_position(&offer.maker, &key) {
            self.env().revert(LedgerError::Unauthorized);
        }
        self.resolve(offer.require_live());
        let escrow = offer.tranche_remaining;
        let escrow_pool = offer.escrow_pool();
        offer.cancelled = true;
        offer.tranche_remaining = U256::zero();
        self.offers.set(&offer_id, offer);
        self.release_offer_escrow(&key, escrow_pool, escrow);
        self.env().emit_event(OfferCancelled {
            offer_id,
            reason: CancelReason::Maker as u8,
            escrow_returned: escrow,
        });
    }

    /// Fills one slice of a standard, tranche or borrow offer. Returns the
    /// new agreement id, or `None` when the offer could no longer cover a
    /// full fill and was auto-cancelled instead.
    #[odra(non_reentrant)]
    pub fn accept_offer(&mut self, key: PositionKey, offer_id: u64) -> Option<u64> {
        self.require_controller(&key);
        let mut offer = self.load_offer(offer_id);
        self.resolve(offer.require_live());
        if same_position(&offer.maker, &key) {
            self.env().revert(LedgerError::SelfFill);
        }
        if matches!(offer.kind, OfferKind::RatioTranche) {
            self.env().revert(LedgerError::WrongOfferKind);
        }
        let fill = offer.terms.principal;
        let lock = offer.terms.collateral_lock;
        // capacity is tracked in the escrow asset: principal for lend
        // offers, collateral for borrow offers
        let consumed = match offer.side {
            OfferSide::Lend => fill,
            OfferSide::Borrow => lock,
        };
        if !offer.has_capacity(consumed) {
            self.auto_cancel(offer, offer_id);
            return None;
        }
        let leftover = self.resolve(offer.consume(consumed, consumed));
        Some(self.execute_fill(offer, offer_id, key, fill, lock, leftover))
    }

    /// Fills a ratio tranche offer with a taker-chosen collateral amount.
    #[odra(non_reentrant)]
    pub fn accept_ratio_fill(
        &mut self,
        key: PositionKey,
        offer_id: u64,
        collateral_amount: U256,
    ) -> Option<u64> {
        self.require_controller(&key);
        let mut offer = self.load_offer(offer_id);
        self.resolve(offer.require_live());
        if same_position(&offer.maker, &key) {
            self.env().revert(LedgerError::SelfFill);
        }
        if !matches!(offer.kind, OfferKind::RatioTranche) {
            self.env().revert(LedgerError::WrongOfferKind);
        }
        if collateral_amount.is_zero() {
            self.env().revert(LedgerError::ZeroAmount);
        }
        let fill = self.resolve(offer.ratio_principal(collateral_amount));
        if fill.is_zero() {
            self.env().revert(LedgerError::ZeroAmount);
        }
        if fill < offer.min_fill {
            self.env().revert(LedgerError::BelowMinimumFill);
        }
        if !offer.has_capacity(fill) {
            self.auto_cancel(offer, offer_id);
            return None;
        }
        let floor = offer.min_fill;
        let leftover = self.resolve(offer.consume(fill, floor));
        Some(self.execute_fill(offer, offer_id, key, fill, collateral_amount, leftover))
    }

    // -----------------------------------------------------------------
    // Fixed-term agreement lifecycle
    // -----------------------------------------------------------------

    #[odra(non_reentrant)]
    pub fn repay(&mut self, key: PositionKey, agreement_id: u64) {
        self.require_controller(&key);
        let mut ag = self.load_agreement(agreement_id);
        if !same_position(&ag.borrower, &key) {
            self.env().revert(LedgerError::Unauthorized);
        }
        self.resolve(ag.require_active());
        let cfg = self.cfg();
        let now = self.now();
        self.resolve(ag.check_repay_window(now, cfg.min_interest_duration, cfg.grace_period));
        let interest = self.resolve(ag.interest_due(now, cfg.min_interest_duration));
        let total = self.resolve(ag.principal.try_add(interest));
        self.pool_inflow(ag.source_pool, total);
        self.lender_restore(&ag.lender, ag.source_pool, ag.principal);
        self.split_interest(ag.source_pool, &ag.lender, interest);
        self.borrower_release(
            &ag.borrower,
            ag.collateral_pool,
            ag.collateral_lock,
            ag.principal,
            ag.same_asset(),
        );
        ag.status = AgreementStatus::Repaid;
        let principal = ag.principal;
        self.agreements.set(&agreement_id, ag);
        self.env().emit_event(AgreementRepaid {
            agreement_id,
            principal,
            interest,
        });
    }

    /// Lender-initiated seizure inside the exercise window.
    #[odra(non_reentrant)]
    pub fn exercise(&mut self, key: PositionKey, agreement_id: u64) {
        self.require_controller(&key);
        let mut ag = self.load_agreement(agreement_id);
        if !same_position(&ag.lender, &key) {
            self.env().revert(LedgerError::Unauthorized);
        }
        self.resolve(ag.require_active());
        let cfg = self.cfg();
        self.resolve(ag.check_exercise(self.now(), cfg.grace_period));
        let seized = self.settle_seizure(&ag);
        ag.status = AgreementStatus::Exercised;
        self.agreements.set(&agreement_id, ag);
        self.env().emit_event(AgreementExercised {
            agreement_id,
            seized,
        });
    }

    /// Permissionless default recovery once the grace period has lapsed.
    /// Runs the same waterfall as `exercise`.
    #[odra(non_reentrant)]
    pub fn recover(&mut self, agreement_id: u64) {
        let mut ag = self.load_agreement(agreement_id);
        self.resolve(ag.require_active());
        let cfg = self.cfg();
        self.resolve(ag.check_recover(self.now(), cfg.grace_period));
        let seized = self.settle_seizure(&ag);
        ag.status = AgreementStatus::Defaulted;
        self.agreements.set(&agreement_id, ag);
        self.env().emit_event(AgreementDefaulted {
            agreement_id,
            seized,
        });
    }

    // -----------------------------------------------------------------
    // Rolling loans
    // -----------------------------------------------------------------

    #[odra(non_reentrant)]
    pub fn post_rolling_offer(&mut self, key: PositionKey, terms: RollingTerms) -> u64 {
        self.require_controller(&key);
        let cfg = self.cfg();
        let rcfg = self.rcfg();
        if terms.principal.is_zero() {
            self.env().revert(LedgerError::ZeroAmount);
        }
        if terms.payment_interval == 0 || terms.payment_count == 0 {
            self.env().revert(LedgerError::ZeroDuration);
        }
        if terms.principal < cfg.min_loan {
            self.env().revert(LedgerError::BelowMinimumLoan);
        }
        self.resolve(rcfg.validate_terms(&terms));
        self.add_offer_escrow(&key, terms.source_pool, terms.principal);
        let offer_id = self.next_id(SEQ_ROLLING_OFFER);
        let offer = RollingOffer {
            id: offer_id,
            maker: key.clone(),
            terms: terms.clone(),
            cancelled: false,
            filled: false,
        };
        self.rolling_offers.set(&offer_id, offer);
        self.env().emit_event(RollingOfferPosted {
            offer_id,
            maker_contract: key.token_contract,
            maker_id: key.token_id,
            source_pool: terms.source_pool,
            collateral_pool: terms.collateral_pool,
            principal: terms.principal,
        });
        offer_id
    }

    #[odra(non_reentrant)]
    pub fn cancel_rolling_offer(&mut self, key: PositionKey, offer_id: u64) {
        self.require_controller(&key);
        let mut offer = self.load_rolling_offer(offer_id);
        if !same_position(&offer.maker, &key) {
            self.env().revert(LedgerError::Unauthorized);
        }
        self.resolve(offer.require_live());
        offer.cancelled = true;
        let escrow = offer.terms.principal;
        let source = offer.terms.source_pool;
        self.rolling_offers.set(&offer_id, offer);
        self.release_offer_escrow(&key, source, escrow);
        self.env().emit_event(RollingOfferCancelled {
            offer_id,
            escrow_returned: escrow,
        });
    }

    #[odra(non_reentrant)]
    pub fn accept_rolling_offer(&mut self, key: PositionKey, offer_id: u64) -> u64 {
        self.require_controller(&key);
        let mut offer = self.load_rolling_offer(offer_id);
        self.resolve(offer.require_live());
        if same_position(&offer.maker, &key) {
            self.env().revert(LedgerError::SelfFill);
        }
        offer.filled = true;
        let lender = offer.maker.clone();
        let t = offer.terms.clone();
        self.rolling_offers.set(&offer_id, offer);

        let same_asset = t.source_pool == t.collateral_pool;
        self.lender_fund(&lender, t.source_pool, t.principal, t.principal);
        self.borrower_bind(
            &key,
            t.collateral_pool,
            t.collateral_lock,
            t.principal,
            U256::zero(),
            same_asset,
        );
        // the premium is interest paid up front, routed like any interest
        let premium = self.resolve(bps_of(t.principal, t.upfront_premium_bps));
        self.pool_inflow(t.source_pool, premium);
        self.split_interest(t.source_pool, &lender, premium);

        let cfg = self.cfg();
        let now = self.now();
        let agreement_id = self.next_id(SEQ_ROLLING_AGREEMENT);
        let next_due = now.saturating_add(t.payment_interval);
        let ag = RollingAgreement {
            id: agreement_id,
            lender,
            borrower: key.clone(),
            source_pool: t.source_pool,
            collateral_pool: t.collateral_pool,
            outstanding_principal: t.principal,
            arrears: U256::zero(),
            payments_made: 0,
            max_payments: t.payment_count,
            payment_interval: t.payment_interval,
            next_due,
            rolling_apy_bps: t.rolling_apy_bps,
            last_accrual: now,
            collateral_lock: t.collateral_lock,
            allow_amortization: t.allow_amortization,
            grace_period: cfg.grace_period,
            status: AgreementStatus::Active,
        };
        self.rolling_agreements.set(&agreement_id, ag);
        self.env().emit_event(RollingOpened {
            offer_id,
            agreement_id,
            borrower_contract: key.token_contract,
            borrower_id: key.token_id,
            principal: t.principal,
            upfront_premium: premium,
            next_due,
        });
        agreement_id
    }

    /// One payment against a rolling loan. Overpayment is capped at the
    /// total owed; anything routed to principal unwinds debt on both sides.
    #[odra(non_reentrant)]
    pub fn make_rolling_payment(&mut self, key: PositionKey, agreement_id: u64, amount: U256) {
        self.require_controller(&key);
        let mut ag = self.load_rolling(agreement_id);
        if !same_position(&ag.borrower, &key) {
            self.env().revert(LedgerError::Unauthorized);
        }
        let rcfg = self.rcfg();
        let now = self.now();
        let owed = self.resolve(ag.total_owed(now));
        let pay = amount.min(owed);
        let breakdown = self.resolve(ag.apply_payment(pay, now, rcfg.min_payment_bps));
        let applied = self.resolve(breakdown.applied());
        self.pool_inflow(ag.source_pool, applied);
        let interest_paid = self.resolve(breakdown.to_arrears.try_add(breakdown.to_interest));
        self.split_interest(ag.source_pool, &ag.lender, interest_paid);
        if !breakdown.to_principal.is_zero() {
            self.lender_restore(&ag.lender, ag.source_pool, breakdown.to_principal);
            self.borrower_release(
                &ag.borrower,
                ag.collateral_pool,
                U256::zero(),
                breakdown.to_principal,
                ag.same_asset(),
            );
        }
        if breakdown.paid_off {
            self.borrower_release(
                &ag.borrower,
                ag.collateral_pool,
                ag.collateral_lock,
                U256::zero(),
                ag.same_asset(),
            );
        }
        let next_due = ag.next_due;
        self.rolling_agreements.set(&agreement_id, ag);
        self.env().emit_event(RollingPaymentMade {
            agreement_id,
            to_arrears: breakdown.to_arrears,
            to_interest: breakdown.to_interest,
            to_principal: breakdown.to_principal,
            next_due,
            paid_off: breakdown.paid_off,
        });
    }

    /// Permissionless rolling-loan recovery: collateral covers what is owed
    /// and runs through the same seizure waterfall as fixed-term recovery, a
    /// penalty on the residual goes to the treasury, the rest stays with the
    /// borrower.
    #[odra(non_reentrant)]
    pub fn recover_rolling(&mut self, agreement_id: u64) {
        let mut ag = self.load_rolling(agreement_id);
        let now = self.now();
        self.resolve(ag.check_recover(now));
        let rcfg = self.rcfg();
        let owed = self.resolve(ag.total_owed(now));
        let (covered, penalty, refunded) =
            self.seize_rolling(&ag, owed, rcfg.default_penalty_bps);
        self.settle_waterfall(ag.collateral_pool, &ag.lender, covered);
        let treasury = self.treasury_key();
        self.credit_principal(&treasury, ag.collateral_pool, penalty);
        self.lender_writeoff(&ag.lender, ag.source_pool, ag.outstanding_principal);
        ag.status = AgreementStatus::Defaulted;
        self.rolling_agreements.set(&agreement_id, ag);
        self.env().emit_event(RollingDefaulted {
            agreement_id,
            covered,
            penalty,
            refunded,
        });
    }

    // -----------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------

    pub fn get_config(&self) -> ProtocolConfig {
        self.cfg()
    }

    pub fn get_rolling_config(&self) -> RollingConfig {
        self.rcfg()
    }

    pub fn pool_state(&self, pool: Address) -> Pool {
        self.pool(&pool)
    }

    pub fn position_state(&self, key: PositionKey, pool: Address) -> PoolPosition {
        self.position(&key, &pool)
    }

    pub fn controller_of(&self, key: PositionKey) -> Option<Address> {
        self.controllers.get(&key)
    }

    pub fn offer_state(&self, offer_id: u64) -> Offer {
        self.load_offer(offer_id)
    }

    pub fn agreement_state(&self, agreement_id: u64) -> Agreement {
        self.load_agreement(agreement_id)
    }

    pub fn rolling_offer_state(&self, offer_id: u64) -> RollingOffer {
        self.load_rolling_offer(offer_id)
    }

    pub fn rolling_state(&self, agreement_id: u64) -> RollingAgreement {
        self.load_rolling(agreement_id)
    }

    pub fn withdrawable_of(&self, key: PositionKey, pool: Address) -> U256 {
        self.position(&key, &pool).withdrawable()
    }

    /// Everything the position could claim right now, including index
    /// growth not yet settled into storage.
    pub fn pending_yield_of(&self, key: PositionKey, pool: Address) -> U256 {
        let p = self.pool(&pool);
        let pos = self.position(&key, &pool);
        let mut total = pos.accrued_yield;
        total = self.resolve(
            total.try_add(self.resolve(p.pending_fee(pos.principal, pos.fee_index_checkpoint))),
        );
        if pos.credit_side.indexed {
            let pending =
                self.resolve(p.pending_active(pos.credit_side.principal, pos.credit_side.index_snapshot));
            total = self.resolve(total.try_add(pending));
        }
        if pos.debt_side.indexed {
            let pending =
                self.resolve(p.pending_active(pos.debt_side.principal, pos.debt_side.index_snapshot));
            total = self.resolve(total.try_add(pending));
        }
        total
    }

    pub fn active_credit_weight_of(&self, key: PositionKey, pool: Address) -> U256 {
        let cfg = self.cfg();
        let now = self.now();
        let pos = self.position(&key, &pool);
        let gate = cfg.active_credit_time_gate;
        self.resolve(
            pos.credit_side
                .weight(now, gate)
                .try_add(pos.debt_side.weight(now, gate)),
        )
    }

    // -----------------------------------------------------------------
    // Internal plumbing
    // -----------------------------------------------------------------

    fn resolve<T>(&self, result: Result<T, LedgerError>) -> T {
        match result {
            Ok(value) => value,
            Err(error) => self.env().revert(error),
        }
    }

    fn next_id(&mut self, seq: u8) -> u64 {
        let id = self.sequences.get(&seq).unwrap_or_default();
        self.sequences.set(&seq, id + 1);
        id
    }

    /// Every index touch that banks yield announces itself, whichever flow
    /// triggered it.
    fn emit_active_settled(&self, key: &PositionKey, pool: Address, amount: U256) {
        if amount.is_zero() {
            return;
        }
        self.env().emit_event(ActiveCreditSettled {
            token_contract: key.token_contract,
            token_id: key.token_id,
            pool,
            amount,
        });
    }

    fn now(&self) -> u64 {
        self.env().get_block_time()
    }

    fn cfg(&self) -> ProtocolConfig {
        self.config
            .get()
            .unwrap_or_else(|| self.env().revert(LedgerError::InvalidConfig))
    }

    fn rcfg(&self) -> RollingConfig {
        self.rolling_config
            .get()
            .unwrap_or_else(|| self.env().revert(LedgerError::InvalidConfig))
    }

    fn treasury_key(&self) -> PositionKey {
        self.treasury
            .get()
            .unwrap_or_else(|| self.env().revert(LedgerError::InvalidConfig))
    }

    fn require_owner(&self) {
        let owner = self
            .owner
            .get()
            .unwrap_or_else(|| self.env().revert(LedgerError::InvalidConfig));
        if self.env().caller() != owner {
            self.env().revert(LedgerError::Unauthorized);
        }
    }

    fn require_controller(&self, key: &PositionKey) {
        let controller = self
            .controllers
            .get(key)
            .unwrap_or_else(|| self.env().revert(LedgerError::PositionNotBound));
        if self.env().caller() != controller {
            self.env().revert(LedgerError::Unauthorized);
        }
    }

    fn pool(&self, pool: &Address) -> Pool {
        self.pools.get(pool).unwrap_or_default()
    }

    fn position(&self, key: &PositionKey, pool: &Address) -> PoolPosition {
        self.positions
            .get(&(key.clone(), *pool))
            .unwrap_or_default()
    }

    fn load_offer(&self, offer_id: u64) -> Offer {
        self.offers
            .get(&offer_id)
            .unwrap_or_else(|| self.env().revert(LedgerError::UnknownOffer))
    }

    fn load_agreement(&self, agreement_id: u64) -> Agreement {
        self.agreements
            .get(&agreement_id)
            .unwrap_or_else(|| self.env().revert(LedgerError::UnknownAgreement))
    }

    fn load_rolling_offer(&self, offer_id: u64) -> RollingOffer {
        self.rolling_offers
            .get(&offer_id)
            .unwrap_or_else(|| self.env().revert(LedgerError::UnknownOffer))
    }

    fn load_rolling(&self, agreement_id: u64) -> RollingAgreement {
        self.rolling_agreements
            .get(&agreement_id)
            .unwrap_or_else(|| self.env().revert(LedgerError::UnknownAgreement))
    }

    fn validate_offer_terms(&self, terms: &OfferTerms) {
        let cfg = self.cfg();
        if terms.principal.is_zero() {
            self.env().revert(LedgerError::ZeroAmount);
        }
        if terms.duration == 0 {
            self.env().revert(LedgerError::ZeroDuration);
        }
        if terms.principal < cfg.min_loan {
            self.env().revert(LedgerError::BelowMinimumLoan);
        }
    }

    fn insert_offer(
        &mut self,
        maker: PositionKey,
        kind: OfferKind,
        side: OfferSide,
        terms: OfferTerms,
        tranche: Option<(U256, U256, U256, U256)>,
    ) -> u64 {
        let (remaining, price_num, price_den, min_fill) = tranche.unwrap_or((
            terms.principal,
            U256::zero(),
            U256::zero(),
            U256::zero(),
        ));
        let offer_id = self.next_id(SEQ_OFFER);
        let offer = Offer {
            id: offer_id,
            kind,
            side,
            maker: maker.clone(),
            terms: terms.clone(),
            tranche_remaining: remaining,
            price_num,
            price_den,
            min_fill,
            cancelled: false,
            filled: false,
        };
        self.offers.set(&offer_id, offer);
        self.env().emit_event(OfferPosted {
            offer_id,
            maker_contract: maker.token_contract,
            maker_id: maker.token_id,
            source_pool: terms.source_pool,
            collateral_pool: terms.collateral_pool,
            principal: terms.principal,
            tranche_total: remaining,
        });
        offer_id
    }

    fn auto_cancel(&mut self, mut offer: Offer, offer_id: u64) {
        let escrow = offer.tranche_remaining;
        let escrow_pool = offer.escrow_pool();
        let maker = offer.maker.clone();
        offer.cancelled = true;
        offer.tranche_remaining = U256::zero();
        self.offers.set(&offer_id, offer);
        self.release_offer_escrow(&maker, escrow_pool, escrow);
        self.env().emit_event(OfferCancelled {
            offer_id,
            reason: CancelReason::Depleted as u8,
            escrow_returned: escrow,
        });
    }

    /// Turns one consumed fill into a live agreement. `offer` has already
    /// had its capacity decremented; `leftover` is extra escrow to release
    /// because the fill depleted the offer.
    fn execute_fill(
        &mut self,
        offer: Offer,
        offer_id: u64,
        taker: PositionKey,
        fill: U256,
        lock: U256,
        leftover: U256,
    ) -> u64 {
        let terms = offer.terms.clone();
        let same_asset = terms.source_pool == terms.collateral_pool;
        let (lender, borrower, lender_release, borrower_release) = match offer.side {
            OfferSide::Lend => (
                offer.maker.clone(),
                taker.clone(),
                self.resolve(fill.try_add(leftover)),
                U256::zero(),
            ),
            OfferSide::Borrow => (
                taker.clone(),
                offer.maker.clone(),
                U256::zero(),
                self.resolve(lock.try_add(leftover)),
            ),
        };
        let tranche_remaining = offer.tranche_remaining;
        let depleted = offer.filled;
        self.offers.set(&offer_id, offer);

        self.lender_fund(&lender, terms.source_pool, fill, lender_release);
        self.borrower_bind(
            &borrower,
            terms.collateral_pool,
            lock,
            fill,
            borrower_release,
            same_asset,
        );

        let now = self.now();
        let agreement_id = self.next_id(SEQ_AGREEMENT);
        let ag = Agreement {
            id: agreement_id,
            lender,
            borrower,
            source_pool: terms.source_pool,
            collateral_pool: terms.collateral_pool,
            principal: fill,
            apr_bps: terms.apr_bps,
            duration: terms.duration,
            collateral_lock: lock,
            allow_early_repay: terms.allow_early_repay,
            allow_exercise: terms.allow_exercise,
            status: AgreementStatus::Active,
            start_time: now,
            due_time: now.saturating_add(terms.duration),
        };
        self.agreements.set(&agreement_id, ag);
        self.env().emit_event(OfferAccepted {
            offer_id,
            agreement_id,
            taker_contract: taker.token_contract,
            taker_id: taker.token_id,
            fill_principal: fill,
            collateral_lock: lock,
            tranche_remaining,
            depleted,
        });
        agreement_id
    }

    fn add_offer_escrow(&mut self, key: &PositionKey, pool: Address, amount: U256) {
        let p = self.pool(&pool);
        let mut pos = self.position(key, &pool);
        self.resolve(pos.settle_fee(&p));
        self.resolve(pos.add_escrow(amount));
        self.positions.set(&(key.clone(), pool), pos);
    }

    fn release_offer_escrow(&mut self, key: &PositionKey, pool: Address, amount: U256) {
        if amount.is_zero() {
            return;
        }
        let mut pos = self.position(key, &pool);
        self.resolve(pos.release_escrow(amount));
        self.positions.set(&(key.clone(), pool), pos);
    }

    /// Moves `fill` of the lender's principal out of the pool and into the
    /// loan, releasing the matching offer escrow first.
    fn lender_fund(&mut self, lender: &PositionKey, pool: Address, fill: U256, escrow_release: U256) {
        let cfg = self.cfg();
        let now = self.now();
        let mut p = self.pool(&pool);
        let mut pos = self.position(lender, &pool);
        self.resolve(pos.settle_fee(&p));
        self.resolve(pos.release_escrow(escrow_release));
        if pos.principal < fill {
            self.env().revert(LedgerError::InsufficientPrincipal);
        }
        if p.tracked_balance < fill {
            self.env().revert(LedgerError::InsufficientLiquidity);
        }
        pos.principal = self.resolve(pos.principal.try_sub(fill));
        p.total_deposits = self.resolve(p.total_deposits.try_sub(fill));
        p.tracked_balance = self.resolve(p.tracked_balance.try_sub(fill));
        pos.encumbrance.lent_principal =
            self.resolve(pos.encumbrance.lent_principal.try_add(fill));
        let settled =
            self.resolve(pos.credit_increase(&mut p, fill, now, cfg.active_credit_time_gate));
        let timing_principal = pos.credit_side.principal;
        let timing_start = pos.credit_side.start_time;
        self.pools.set(&pool, p);
        self.positions.set(&(lender.clone(), pool), pos);
        self.emit_active_settled(lender, pool, settled);
        self.env().emit_event(ActiveCreditTimingUpdated {
            token_contract: lender.token_contract,
            token_id: lender.token_id,
            pool,
            principal: timing_principal,
            start_time: timing_start,
        });
    }

    /// Locks collateral and records the debt on the borrower's record in
    /// the collateral pool, enforcing the loan-to-value bound.
    fn borrower_bind(
        &mut self,
        borrower: &PositionKey,
        pool: Address,
        lock: U256,
        debt: U256,
        escrow_release: U256,
        same_asset: bool,
    ) {
        let cfg = self.cfg();
        let now = self.now();
        let gate = cfg.active_credit_time_gate;
        let mut p = self.pool(&pool);
        let mut pos = self.position(borrower, &pool);
        self.resolve(pos.settle_fee(&p));
        self.resolve(pos.release_escrow(escrow_release));
        self.resolve(pos.lock_for_loan(lock, debt, cfg.max_ltv_bps));
        let mut settled = self.resolve(pos.credit_increase(&mut p, lock, now, gate));
        if same_asset {
            let more = self.resolve(pos.debt_increase(&mut p, debt, now, gate));
            settled = self.resolve(settled.try_add(more));
        }
        let timing_principal = pos.credit_side.principal;
        let timing_start = pos.credit_side.start_time;
        self.pools.set(&pool, p);
        self.positions.set(&(borrower.clone(), pool), pos);
        self.emit_active_settled(borrower, pool, settled);
        self.env().emit_event(ActiveCreditTimingUpdated {
            token_contract: borrower.token_contract,
            token_id: borrower.token_id,
            pool,
            principal: timing_principal,
            start_time: timing_start,
        });
    }

    /// Unwinds a borrower's lock and debt after repayment or amortization.
    fn borrower_release(
        &mut self,
        borrower: &PositionKey,
        pool: Address,
        lock: U256,
        debt: U256,
        same_asset: bool,
    ) {
        let cfg = self.cfg();
        let now = self.now();
        let gate = cfg.active_credit_time_gate;
        let mut p = self.pool(&pool);
        let mut pos = self.position(borrower, &pool);
        self.resolve(pos.settle_fee(&p));
        pos.release_loan(lock, debt);
        let mut settled = U256::zero();
        if !lock.is_zero() {
            settled = self.resolve(pos.credit_decrease(&mut p, lock, now, gate));
        }
        if same_asset && !debt.is_zero() {
            let more = self.resolve(pos.debt_decrease(&mut p, debt, now, gate));
            settled = self.resolve(settled.try_add(more));
        }
        self.pools.set(&pool, p);
        self.positions.set(&(borrower.clone(), pool), pos);
        self.emit_active_settled(borrower, pool, settled);
    }

    /// Returns repaid principal to the lender's free balance.
    fn lender_restore(&mut self, lender: &PositionKey, pool: Address, amount: U256) {
        if amount.is_zero() {
            return;
        }
        let cfg = self.cfg();
        let now = self.now();
        let mut p = self.pool(&pool);
        let mut pos = self.position(lender, &pool);
        self.resolve(pos.settle_fee(&p));
        pos.principal = self.resolve(pos.principal.try_add(amount));
        p.total_deposits = self.resolve(p.total_deposits.try_add(amount));
        pos.encumbrance.lent_principal =
            self.resolve(pos.encumbrance.lent_principal.try_sub(amount));
        let settled =
            self.resolve(pos.credit_decrease(&mut p, amount, now, cfg.active_credit_time_gate));
        self.pools.set(&pool, p);
        self.positions.set(&(lender.clone(), pool), pos);
        self.emit_active_settled(lender, pool, settled);
    }

    /// Clears lent principal that will never come back in kind; the lender
    /// is compensated from the seizure waterfall instead.
    fn lender_writeoff(&mut self, lender: &PositionKey, pool: Address, amount: U256) {
        let cfg = self.cfg();
        let now = self.now();
        let mut p = self.pool(&pool);
        let mut pos = self.position(lender, &pool);
        self.resolve(pos.settle_fee(&p));
        pos.encumbrance.lent_principal =
            self.resolve(pos.encumbrance.lent_principal.try_sub(amount));
        let settled =
            self.resolve(pos.credit_decrease(&mut p, amount, now, cfg.active_credit_time_gate));
        self.pools.set(&pool, p);
        self.positions.set(&(lender.clone(), pool), pos);
        self.emit_active_settled(lender, pool, settled);
    }

    /// Credits principal to a position, settling its fee checkpoint first.
    fn credit_principal(&mut self, key: &PositionKey, pool: Address, amount: U256) {
        if amount.is_zero() {
            return;
        }
        let mut p = self.pool(&pool);
        let mut pos = self.position(key, &pool);
        self.resolve(pos.settle_fee(&p));
        pos.principal = self.resolve(pos.principal.try_add(amount));
        p.total_deposits = self.resolve(p.total_deposits.try_add(amount));
        self.pools.set(&pool, p);
        self.positions.set(&(key.clone(), pool), pos);
    }

    /// Records external asset arrival (repayments, premiums).
    fn pool_inflow(&mut self, pool: Address, amount: U256) {
        if amount.is_zero() {
            return;
        }
        let mut p = self.pool(&pool);
        p.tracked_balance = self.resolve(p.tracked_balance.try_add(amount));
        self.pools.set(&pool, p);
    }

    fn distribute_fee(&mut self, pool: Address, amount: U256) {
        if amount.is_zero() {
            return;
        }
        let mut p = self.pool(&pool);
        self.resolve(p.accrue_fee(amount));
        self.pools.set(&pool, p);
    }

    fn distribute_active(&mut self, pool: Address, amount: U256) {
        if amount.is_zero() {
            return;
        }
        let mut p = self.pool(&pool);
        self.resolve(p.accrue_active(amount));
        self.pools.set(&pool, p);
        self.env().emit_event(ActiveCreditAccrued { pool, amount });
    }

    /// Routes repaid interest: platform fee first (split between lender
    /// rebate and treasury), then the lender's share of the net, then the
    /// fee index for everyone else.
    fn split_interest(&mut self, pool: Address, lender: &PositionKey, interest: U256) {
        if interest.is_zero() {
            return;
        }
        let cfg = self.cfg();
        let fee = self.resolve(bps_of(interest, cfg.platform_fee_bps));
        let fee_to_lender = self.resolve(bps_of(fee, cfg.platform_fee_lender_split_bps));
        let fee_to_treasury = self.resolve(fee.try_sub(fee_to_lender));
        let net = self.resolve(interest.try_sub(fee));
        let to_lender = self.resolve(bps_of(net, cfg.lender_interest_share_bps));
        let to_pool = self.resolve(net.try_sub(to_lender));
        let lender_total = self.resolve(to_lender.try_add(fee_to_lender));
        self.credit_principal(lender, pool, lender_total);
        let treasury = self.treasury_key();
        self.credit_principal(&treasury, pool, fee_to_treasury);
        self.distribute_fee(pool, to_pool);
    }

    /// Takes the collateral lock out of the borrower's position, capped at
    /// what the position actually holds. Returns the seized amount.
    fn seize_from_borrower(
        &mut self,
        borrower: &PositionKey,
        pool: Address,
        lock: U256,
        debt: U256,
        same_asset: bool,
    ) -> U256 {
        let cfg = self.cfg();
        let now = self.now();
        let gate = cfg.active_credit_time_gate;
        let mut p = self.pool(&pool);
        let mut pos = self.position(borrower, &pool);
        self.resolve(pos.settle_fee(&p));
        let seized = lock.min(pos.principal);
        pos.principal = self.resolve(pos.principal.try_sub(seized));
        p.total_deposits = self.resolve(p.total_deposits.try_sub(seized));
        pos.release_loan(lock, debt);
        let mut settled = self.resolve(pos.credit_decrease(&mut p, lock, now, gate));
        if same_asset {
            let more = self.resolve(pos.debt_decrease(&mut p, debt, now, gate));
            settled = self.resolve(settled.try_add(more));
        }
        self.pools.set(&pool, p);
        self.positions.set(&(borrower.clone(), pool), pos);
        self.emit_active_settled(borrower, pool, settled);
        seized
    }

    /// The fixed-order seizure waterfall shared by `exercise` and
    /// `recover`: lender share, treasury, active-credit index, fee index.
    fn settle_waterfall(&mut self, pool: Address, lender: &PositionKey, seized: U256) {
        if seized.is_zero() {
            return;
        }
        let cfg = self.cfg();
        let lender_share = self.resolve(bps_of(seized, cfg.default_lender_split_bps));
        let remainder = self.resolve(seized.try_sub(lender_share));
        let to_treasury = self.resolve(bps_of(remainder, cfg.platform_fee_bps));
        let to_active = self.resolve(bps_of(remainder, cfg.active_credit_share_bps));
        let to_fee =
            self.resolve(self.resolve(remainder.try_sub(to_treasury)).try_sub(to_active));
        self.credit_principal(lender, pool, lender_share);
        let treasury = self.treasury_key();
        self.credit_principal(&treasury, pool, to_treasury);
        self.distribute_active(pool, to_active);
        self.distribute_fee(pool, to_fee);
    }

    fn settle_seizure(&mut self, ag: &Agreement) -> U256 {
        let same_asset = ag.same_asset();
        let seized = self.seize_from_borrower(
            &ag.borrower,
            ag.collateral_pool,
            ag.collateral_lock,
            ag.principal,
            same_asset,
        );
        self.settle_waterfall(ag.collateral_pool, &ag.lender, seized);
        self.lender_writeoff(&ag.lender, ag.source_pool, ag.principal);
        seized
    }

    /// Rolling-loan seizure: collateral covers the owed amount first, a
    /// penalty on the residual goes to the treasury, the rest stays put.
    fn seize_rolling(
        &mut self,
        ag: &RollingAgreement,
        owed: U256,
        penalty_bps: u64,
    ) -> (U256, U256, U256) {
        let cfg = self.cfg();
        let now = self.now();
        let gate = cfg.active_credit_time_gate;
        let pool_addr = ag.collateral_pool;
        let mut p = self.pool(&pool_addr);
        let mut pos = self.position(&ag.borrower, &pool_addr);
        self.resolve(pos.settle_fee(&p));
        let seizable = ag.collateral_lock.min(pos.principal);
        let covered = seizable.min(owed);
        let residual = self.resolve(seizable.try_sub(covered));
        let penalty = self.resolve(bps_of(residual, penalty_bps));
        let taken = self.resolve(covered.try_add(penalty));
        pos.principal = self.resolve(pos.principal.try_sub(taken));
        p.total_deposits = self.resolve(p.total_deposits.try_sub(taken));
        pos.release_loan(ag.collateral_lock, ag.outstanding_principal);
        let mut settled = self.resolve(pos.credit_decrease(&mut p, ag.collateral_lock, now, gate));
        if ag.same_asset() {
            let more = self.resolve(pos.debt_decrease(&mut p, ag.outstanding_principal, now, gate));
            settled = self.resolve(settled.try_add(more));
        }
        self.pools.set(&pool_addr, p);
        self.positions.set(&(ag.borrower.clone(), pool_addr), pos);
        self.emit_active_settled(&ag.borrower, pool_addr, settled);
        let refunded = self.resolve(residual.try_sub(penalty));
        (covered, penalty, refunded)
    }
}
