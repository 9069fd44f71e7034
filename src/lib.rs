//! Package staking engine: referral forest, package ledger, persistence and
//! the service front ends call into.
//!
//! Stateless rules (level policy, accrual, exit split) live in [`stake_core`].

pub mod config;
pub mod ledger;
pub mod referral;
pub mod service;
pub mod store;

pub use stake_core;
