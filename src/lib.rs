#![allow(clippy::arithmetic_side_effects)]
#![cfg_attr(not(test), no_std)]

//! A collateralized peer-to-peer lending ledger for the Casper blockchain.
//!
//! Positions are identified by ownership tokens and hold per-pool principal.
//! Lenders and borrowers meet through an offer book; matched fills become
//! fixed-term or rolling agreements, with collateral seizures settled through
//! a deterministic waterfall and passive yield distributed via scaled
//! per-pool indexes.

pub mod error;
pub mod events;
pub mod math;
pub mod processor;
pub mod state;

pub use processor::PeerLendingLedger;

extern crate alloc;
