use serde::{Deserialize, Serialize};

use crate::{Amount, StakeError, BPS_DENOMINATOR, PPM_DENOMINATOR, UNIT};

/// Tunable rates and limits of a staking pool.
///
/// Daily release is expressed in parts per million of principal; every other
/// rate is in basis points against [`BPS_DENOMINATOR`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StakingParams {
    /// 3_000 ppm = 3‰ of principal per day.
    pub daily_rate_ppm: u64,
    /// 15_000 bps = cap at 1.5x principal.
    pub cap_multiplier_bps: u64,
    /// Smallest principal accepted for a new package, in base units.
    pub min_principal: Amount,
    /// Acceleration contributed by each direct referral (3_000 = 30% of base).
    pub direct_bonus_bps: u64,
    /// Acceleration contributed by each indirect referral (1_000 = 10% of base).
    pub indirect_bonus_bps: u64,
    /// Share of an exit paid in the primary reward asset; the rest is secondary.
    pub primary_share_bps: u64,
}

impl Default for StakingParams {
    fn default() -> Self {
        Self {
            daily_rate_ppm: 3_000,
            cap_multiplier_bps: 15_000,
            min_principal: 100 * UNIT,
            direct_bonus_bps: 3_000,
            indirect_bonus_bps: 1_000,
            primary_share_bps: 5_000,
        }
    }
}

impl StakingParams {
    pub fn validate(&self) -> Result<(), StakeError> {
        if self.daily_rate_ppm == 0 || self.daily_rate_ppm as u128 > PPM_DENOMINATOR {
            return Err(StakeError::InvalidParams(
                "daily_rate_ppm must be within 1..=1_000_000",
            ));
        }
        if (self.cap_multiplier_bps as u128) < BPS_DENOMINATOR {
            return Err(StakeError::InvalidParams(
                "cap_multiplier_bps must be at least 10_000",
            ));
        }
        if self.min_principal == 0 {
            return Err(StakeError::InvalidParams("min_principal must be positive"));
        }
        if self.primary_share_bps as u128 > BPS_DENOMINATOR {
            return Err(StakeError::InvalidParams(
                "primary_share_bps must not exceed 10_000",
            ));
        }
        Ok(())
    }

    /// Maximum total a package of `principal` may ever release.
    pub fn cap_of(&self, principal: Amount) -> Result<Amount, StakeError> {
        let cap = (principal as u128)
            .checked_mul(self.cap_multiplier_bps as u128)
            .ok_or(StakeError::Overflow)?
            / BPS_DENOMINATOR;
        Amount::try_from(cap).map_err(|_| StakeError::Overflow)
    }

    /// Unaccelerated release of `principal` over one full day.
    pub fn daily_base_release(&self, principal: Amount) -> Result<Amount, StakeError> {
        let daily = (principal as u128)
            .checked_mul(self.daily_rate_ppm as u128)
            .ok_or(StakeError::Overflow)?
            / PPM_DENOMINATOR;
        Amount::try_from(daily).map_err(|_| StakeError::Overflow)
    }
}
