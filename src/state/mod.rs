pub mod active_credit;
pub mod agreement;
pub mod config;
pub mod offer;
pub mod pool;
pub mod position;
pub mod rolling;

pub use active_credit::ActiveCreditState;
pub use agreement::{Agreement, AgreementStatus};
pub use config::{ProtocolConfig, RollingConfig};
pub use offer::{CancelReason, Offer, OfferKind, OfferSide, OfferTerms};
pub use pool::Pool;
pub use position::{Encumbrance, PoolPosition, PositionKey};
pub use rolling::{PaymentBreakdown, RollingAgreement, RollingOffer, RollingTerms};
