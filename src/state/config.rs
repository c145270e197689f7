//! Owner-gated protocol configuration. Validation is atomic: an invalid
//! struct is rejected before any field is stored.

use crate::error::LedgerError;
use crate::math::BPS_DIVISOR;
use crate::state::rolling::RollingTerms;
use odra::casper_types::U256;

/// Pool-wide economic parameters.
///
/// All `*_bps` fields are basis points of their respective base; see the
/// settlement waterfall in `processor.rs` for how the shares compose.
#[odra::odra_type]
pub struct ProtocolConfig {
    /// Protocol cut, taken from repaid interest and from the seizure
    /// remainder after the lender share.
    pub platform_fee_bps: u64,
    /// Share of net repaid interest credited straight to the lender.
    pub lender_interest_share_bps: u64,
    /// Share of the platform fee rebated to the lender on repayment.
    pub platform_fee_lender_split_bps: u64,
    /// Lender share of a seized amount in the waterfall.
    pub default_lender_split_bps: u64,
    /// Share of the seizure remainder fed to the active-credit index.
    pub active_credit_share_bps: u64,
    /// Floor on the interest-bearing window of a fixed-term loan, ms.
    pub min_interest_duration: u64,
    /// Window after a due date before default recovery opens, ms.
    pub grace_period: u64,
    /// Dwell time before active-credit weight becomes non-zero, ms.
    pub active_credit_time_gate: u64,
    /// Upper bound on `locked + borrowed` relative to position principal.
    pub max_ltv_bps: u64,
    /// Smallest principal a position may hold after a deposit.
    pub min_deposit: U256,
    /// Smallest per-fill loan principal an offer may carry.
    pub min_loan: U256,
}

impl ProtocolConfig {
    pub fn validate(&self) -> Result<(), LedgerError> {
        let bps_fields = [
            self.platform_fee_bps,
            self.lender_interest_share_bps,
            self.platform_fee_lender_split_bps,
            self.default_lender_split_bps,
            self.active_credit_share_bps,
        ];
        if bps_fields.iter().any(|bps| *bps > BPS_DIVISOR) {
            return Err(LedgerError::InvalidConfig);
        }
        // platform fee and active-credit share both carve the same remainder
        if self.platform_fee_bps + self.active_credit_share_bps > BPS_DIVISOR {
            return Err(LedgerError::InvalidConfig);
        }
        if self.max_ltv_bps == 0 || self.max_ltv_bps > BPS_DIVISOR {
            return Err(LedgerError::InvalidConfig);
        }
        if self.active_credit_time_gate == 0 {
            return Err(LedgerError::InvalidConfig);
        }
        Ok(())
    }
}

/// Bounds that every rolling offer is validated against at posting time.
#[odra::odra_type]
pub struct RollingConfig {
    pub min_payment_interval: u64,
    pub max_payment_count: u64,
    pub max_upfront_premium_bps: u64,
    pub min_rolling_apy_bps: u64,
    pub max_rolling_apy_bps: u64,
    pub default_penalty_bps: u64,
    pub min_payment_bps: u64,
}

impl RollingConfig {
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.min_payment_interval == 0 || self.max_payment_count == 0 {
            return Err(LedgerError::InvalidConfig);
        }
        if self.min_rolling_apy_bps > self.max_rolling_apy_bps {
            return Err(LedgerError::InvalidConfig);
        }
        if self.default_penalty_bps > BPS_DIVISOR {
            return Err(LedgerError::PenaltyTooHigh);
        }
        if self.min_payment_bps > BPS_DIVISOR {
            return Err(LedgerError::MinPaymentOutOfRange);
        }
        if self.max_upfront_premium_bps > BPS_DIVISOR {
            return Err(LedgerError::UpfrontPremiumTooHigh);
        }
        Ok(())
    }

    /// Checks one offer's terms, yielding a distinct error per violated bound.
    pub fn validate_terms(&self, terms: &RollingTerms) -> Result<(), LedgerError> {
        if terms.payment_interval < self.min_payment_interval {
            return Err(LedgerError::PaymentIntervalTooShort);
        }
        if terms.payment_count > self.max_payment_count {
            return Err(LedgerError::PaymentCountTooHigh);
        }
        if terms.upfront_premium_bps > self.max_upfront_premium_bps {
            return Err(LedgerError::UpfrontPremiumTooHigh);
        }
        if terms.rolling_apy_bps < self.min_rolling_apy_bps {
            return Err(LedgerError::RollingApyTooLow);
        }
        if terms.rolling_apy_bps > self.max_rolling_apy_bps {
            return Err(LedgerError::RollingApyTooHigh);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odra::casper_types::account::AccountHash;
    use odra::prelude::Address;

    fn base_config() -> ProtocolConfig {
        ProtocolConfig {
            platform_fee_bps: 500,
            lender_interest_share_bps: 9_000,
            platform_fee_lender_split_bps: 2_000,
            default_lender_split_bps: 7_000,
            active_credit_share_bps: 3_000,
            min_interest_duration: 86_400_000,
            grace_period: 86_400_000,
            active_credit_time_gate: 604_800_000,
            max_ltv_bps: 8_000,
            min_deposit: U256::from(10u64),
            min_loan: U256::from(10u64),
        }
    }

    #[test]
    fn accepts_sane_config() {
        assert_eq!(base_config().validate(), Ok(()));
    }

    #[test]
    fn rejects_out_of_range_bps() {
        let mut cfg = base_config();
        cfg.default_lender_split_bps = 10_001;
        assert_eq!(cfg.validate(), Err(LedgerError::InvalidConfig));

        let mut cfg = base_config();
        cfg.platform_fee_bps = 6_000;
        cfg.active_credit_share_bps = 5_000;
        assert_eq!(cfg.validate(), Err(LedgerError::InvalidConfig));
    }

    #[test]
    fn rejects_degenerate_ltv_and_gate() {
        let mut cfg = base_config();
        cfg.max_ltv_bps = 0;
        assert_eq!(cfg.validate(), Err(LedgerError::InvalidConfig));

        let mut cfg = base_config();
        cfg.active_credit_time_gate = 0;
        assert_eq!(cfg.validate(), Err(LedgerError::InvalidConfig));
    }

    fn base_rolling() -> RollingConfig {
        RollingConfig {
            min_payment_interval: 86_400_000,
            max_payment_count: 52,
            max_upfront_premium_bps: 1_000,
            min_rolling_apy_bps: 100,
            max_rolling_apy_bps: 5_000,
            default_penalty_bps: 1_000,
            min_payment_bps: 100,
        }
    }

    fn addr(n: u8) -> Address {
        Address::Account(AccountHash::new([n; 32]))
    }

    #[test]
    fn rolling_bounds_have_distinct_errors() {
        let cfg = base_rolling();
        let terms = |f: &dyn Fn(&mut RollingTerms)| {
            let mut t = RollingTerms {
                source_pool: addr(10),
                collateral_pool: addr(11),
                principal: U256::from(1_000u64),
                rolling_apy_bps: 1_000,
                payment_interval: 86_400_000,
                payment_count: 12,
                collateral_lock: U256::from(500u64),
                upfront_premium_bps: 100,
                allow_amortization: true,
            };
            f(&mut t);
            t
        };
        assert_eq!(
            cfg.validate_terms(&terms(&|t| t.payment_interval = 1)),
            Err(LedgerError::PaymentIntervalTooShort)
        );
        assert_eq!(
            cfg.validate_terms(&terms(&|t| t.payment_count = 53)),
            Err(LedgerError::PaymentCountTooHigh)
        );
        assert_eq!(
            cfg.validate_terms(&terms(&|t| t.upfront_premium_bps = 1_001)),
            Err(LedgerError::UpfrontPremiumTooHigh)
        );
        assert_eq!(
            cfg.validate_terms(&terms(&|t| t.rolling_apy_bps = 1)),
            Err(LedgerError::RollingApyTooLow)
        );
        assert_eq!(
            cfg.validate_terms(&terms(&|t| t.rolling_apy_bps = 50_000)),
            Err(LedgerError::RollingApyTooHigh)
        );
        assert_eq!(cfg.validate_terms(&terms(&|_| {})), Ok(()));
    }
}
