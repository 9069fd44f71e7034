use serde::{Deserialize, Serialize};

use crate::{params::StakingParams, AccountId, Amount, PackageId, StakeError, Timestamp};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Active,
    EligibleForExit,
    Exited,
}

impl PackageStatus {
    /// Active and exit-eligible packages still count towards staked totals.
    pub fn is_open(&self) -> bool {
        !matches!(self, PackageStatus::Exited)
    }
}

/// A single staking commitment with its own principal, cap and accrual clock.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StakingPackage {
    pub id: PackageId,
    pub owner: AccountId,
    pub principal: Amount,
    pub created_at: Timestamp,
    pub last_accrual_at: Timestamp,
    /// Unaccelerated release per full day.
    pub base_release: Amount,
    /// Acceleration per full day as of the most recent tick.
    pub accelerated_release: Amount,
    pub cumulative_released: Amount,
    /// Release below one base unit carried into the next tick, as a
    /// numerator over `PPM * SECONDS_PER_DAY * BPS`.
    #[serde(default)]
    pub release_carry: u64,
    pub cap: Amount,
    pub status: PackageStatus,
    pub exited_at: Option<Timestamp>,
}

impl StakingPackage {
    pub fn open(
        id: PackageId,
        owner: AccountId,
        principal: Amount,
        now: Timestamp,
        params: &StakingParams,
    ) -> Result<Self, StakeError> {
        if principal < params.min_principal {
            return Err(StakeError::BelowMinimum {
                principal,
                minimum: params.min_principal,
            });
        }
        Ok(Self {
            id,
            owner,
            principal,
            created_at: now,
            last_accrual_at: now,
            base_release: params.daily_base_release(principal)?,
            accelerated_release: 0,
            cumulative_released: 0,
            release_carry: 0,
            cap: params.cap_of(principal)?,
            status: PackageStatus::Active,
            exited_at: None,
        })
    }

    pub fn remaining(&self) -> Amount {
        self.cap.saturating_sub(self.cumulative_released)
    }
}

/// Per-account reward totals.
///
/// `pending` accumulates every tick's release as one undifferentiated amount;
/// the per-asset totals only move on exit.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewardBalance {
    pub pending: Amount,
    pub primary_lifetime: Amount,
    pub secondary_lifetime: Amount,
}
