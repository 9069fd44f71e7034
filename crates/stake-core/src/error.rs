use thiserror::Error;

use crate::{AccountId, PackageId};

/// Coarse classification used by front ends to pick a message class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller-correctable input problem; retrying unchanged will fail again.
    Validation,
    /// The caller invoked an operation out of order.
    State,
    /// A referenced record does not exist.
    NotFound,
    /// Arithmetic or storage failure inside the engine.
    Internal,
}

/// Canonical error type exposed by the staking engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StakeError {
    /// Principal below the configured minimum.
    #[error("principal {principal} is below the minimum of {minimum}")]
    BelowMinimum { principal: u64, minimum: u64 },

    /// The accrual clock moved backwards.
    #[error("clock skew: as-of {as_of} is before last accrual at {last_accrual}")]
    ClockSkew { as_of: i64, last_accrual: i64 },

    /// Staking parameters failed validation.
    #[error("invalid staking parameters: {0}")]
    InvalidParams(&'static str),

    #[error("package {0} has not reached its cap")]
    NotEligible(PackageId),

    #[error("package {0} has already exited")]
    AlreadyExited(PackageId),

    /// Linking the referee would close a loop in the referral forest.
    #[error("linking {referee} under {referrer} would create a cycle")]
    CycleDetected { referrer: AccountId, referee: AccountId },

    #[error("account {0} already has a referrer")]
    AlreadyReferred(AccountId),

    #[error("account {0} already exists")]
    AccountExists(AccountId),

    #[error("unknown account {0}")]
    AccountNotFound(AccountId),

    #[error("unknown package {0}")]
    PackageNotFound(PackageId),

    #[error("unknown referral code {0}")]
    ReferrerNotFound(String),

    #[error("arithmetic overflow")]
    Overflow,

    /// Persistence collaborator failure, carried as text so the error stays comparable.
    #[error("storage error: {0}")]
    Storage(String),
}

impl StakeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StakeError::BelowMinimum { .. }
            | StakeError::ClockSkew { .. }
            | StakeError::InvalidParams(_) => ErrorKind::Validation,
            StakeError::NotEligible(_)
            | StakeError::AlreadyExited(_)
            | StakeError::CycleDetected { .. }
            | StakeError::AlreadyReferred(_)
            | StakeError::AccountExists(_) => ErrorKind::State,
            StakeError::AccountNotFound(_)
            | StakeError::PackageNotFound(_)
            | StakeError::ReferrerNotFound(_) => ErrorKind::NotFound,
            StakeError::Overflow | StakeError::Storage(_) => ErrorKind::Internal,
        }
    }
}
