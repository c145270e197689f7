use core::fmt;

use odra::prelude::*;

/// Every failure mode of the ledger. Each variant aborts the whole
/// transaction; there is no partial application or local recovery.
#[odra::odra_error]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerError {
    // validation
    ZeroAmount = 1,
    ZeroDuration = 2,
    AssetMismatch = 3,
    InvalidRatio = 4,
    BelowMinimumDeposit = 5,
    BelowMinimumLoan = 6,
    InvalidConfig = 7,

    // rolling-config bounds, one variant per bound
    PaymentIntervalTooShort = 8,
    PaymentCountTooHigh = 9,
    UpfrontPremiumTooHigh = 10,
    RollingApyTooLow = 11,
    RollingApyTooHigh = 12,
    PenaltyTooHigh = 13,
    MinPaymentOutOfRange = 14,

    // authorization
    Unauthorized = 15,
    PositionNotBound = 16,

    // state
    InvalidAgreementState = 17,
    OfferAlreadyFilled = 18,
    OfferAlreadyCancelled = 19,
    WrongOfferKind = 20,
    SelfFill = 21,

    // timing
    EarlyRepayNotAllowed = 22,
    RepayWindowClosed = 23,
    GracePeriodActive = 24,
    GracePeriodExpired = 25,
    ExerciseNotAllowed = 26,

    // solvency
    LtvExceeded = 27,
    InsufficientPrincipal = 28,
    InsufficientLiquidity = 29,

    // capacity
    FillExceedsRemaining = 30,
    BelowMinimumFill = 31,
    PaymentBelowMinimum = 32,
    AmortizationDisabled = 33,

    // math
    MathOverflow = 34,

    // lookup
    UnknownOffer = 35,
    UnknownAgreement = 36,
}

impl LedgerError {
    pub fn message(&self) -> &str {
        match self {
            LedgerError::ZeroAmount => "Input amount is zero",
            LedgerError::ZeroDuration => "Input duration is zero",
            LedgerError::AssetMismatch => "Asset pair does not match the offer",
            LedgerError::InvalidRatio => "Price ratio must have positive numerator and denominator",
            LedgerError::BelowMinimumDeposit => "Deposit below the pool minimum",
            LedgerError::BelowMinimumLoan => "Loan principal below the pool minimum",
            LedgerError::InvalidConfig => "Configuration value out of range",
            LedgerError::PaymentIntervalTooShort => "Rolling payment interval below the configured minimum",
            LedgerError::PaymentCountTooHigh => "Rolling payment count above the configured maximum",
            LedgerError::UpfrontPremiumTooHigh => "Upfront premium above the configured maximum",
            LedgerError::RollingApyTooLow => "Rolling APY below the configured minimum",
            LedgerError::RollingApyTooHigh => "Rolling APY above the configured maximum",
            LedgerError::PenaltyTooHigh => "Default penalty above 100%",
            LedgerError::MinPaymentOutOfRange => "Minimum payment fraction above 100%",
            LedgerError::Unauthorized => "Caller does not control the referenced position",
            LedgerError::PositionNotBound => "Position key has no bound controller",
            LedgerError::InvalidAgreementState => "Operation invalid for the agreement status",
            LedgerError::OfferAlreadyFilled => "Offer is already filled",
            LedgerError::OfferAlreadyCancelled => "Offer is already cancelled",
            LedgerError::WrongOfferKind => "Fill path does not match the offer kind",
            LedgerError::SelfFill => "Maker cannot fill its own offer",
            LedgerError::EarlyRepayNotAllowed => "Early repayment is disabled for this agreement",
            LedgerError::RepayWindowClosed => "Repayment window has closed",
            LedgerError::GracePeriodActive => "Grace period has not elapsed yet",
            LedgerError::GracePeriodExpired => "Grace period has expired",
            LedgerError::ExerciseNotAllowed => "Early exercise is disabled for this agreement",
            LedgerError::LtvExceeded => "Encumbrance would breach the loan-to-value bound",
            LedgerError::InsufficientPrincipal => "Position principal insufficient for the requested amount",
            LedgerError::InsufficientLiquidity => "Pool liquidity insufficient for the requested amount",
            LedgerError::FillExceedsRemaining => "Fill amount exceeds remaining tranche capacity",
            LedgerError::BelowMinimumFill => "Fill amount below the offer minimum",
            LedgerError::PaymentBelowMinimum => "Payment below the minimum fraction of outstanding principal",
            LedgerError::AmortizationDisabled => "Payment exceeds interest and arrears but amortization is disabled",
            LedgerError::MathOverflow => "Math operation overflow",
            LedgerError::UnknownOffer => "No offer with the given id",
            LedgerError::UnknownAgreement => "No agreement with the given id",
        }
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}
