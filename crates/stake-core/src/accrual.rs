//! Per-tick release of a staking package.
//!
//! `released = min(base + referral + team, cap - cumulative_released)` where
//!
//! * `base     = principal * daily_rate * elapsed / 1 day`
//! * `referral = base * (direct * direct_bonus + indirect * indirect_bonus)`
//! * `team     = base * team_acceleration`
//!
//! The reported components are each floored once from the exact base
//! numerator. The release itself is floored from their exact sum plus the
//! remainder carried by the package, and the new remainder is carried on, so
//! the total released over a span does not depend on how often it is ticked.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    level::LevelGrant,
    package::{PackageStatus, RewardBalance, StakingPackage},
    params::StakingParams,
    Amount, StakeError, Timestamp, BPS_DENOMINATOR, PPM_DENOMINATOR, SECONDS_PER_DAY,
};

/// Owner-side inputs that accelerate a package.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Acceleration {
    pub direct_referrals: u32,
    pub indirect_referrals: u32,
    pub grant: LevelGrant,
}

impl Acceleration {
    /// Combined referral multiplier in basis points of base release. Uncapped.
    pub fn referral_bps(&self, params: &StakingParams) -> Result<u128, StakeError> {
        let direct = (self.direct_referrals as u128)
            .checked_mul(params.direct_bonus_bps as u128)
            .ok_or(StakeError::Overflow)?;
        let indirect = (self.indirect_referrals as u128)
            .checked_mul(params.indirect_bonus_bps as u128)
            .ok_or(StakeError::Overflow)?;
        direct.checked_add(indirect).ok_or(StakeError::Overflow)
    }
}

/// Breakdown of one accrual step.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Accrual {
    pub elapsed_secs: i64,
    pub base: Amount,
    pub referral_bonus: Amount,
    pub team_bonus: Amount,
    pub raw: Amount,
    pub released: Amount,
    /// Sub-unit remainder the package carries after this step.
    pub carry: u64,
    /// The package became exit-eligible during this step.
    pub reached_cap: bool,
}

/// Computes the release of `package` between its last accrual and `as_of`
/// without touching it.
pub fn compute(
    package: &StakingPackage,
    as_of: Timestamp,
    accel: &Acceleration,
    params: &StakingParams,
) -> Result<Accrual, StakeError> {
    if package.status == PackageStatus::Exited {
        return Ok(Accrual::default());
    }
    let elapsed = as_of - package.last_accrual_at;
    if elapsed < 0 {
        return Err(StakeError::ClockSkew {
            as_of,
            last_accrual: package.last_accrual_at,
        });
    }

    let base_num = (package.principal as u128)
        .checked_mul(params.daily_rate_ppm as u128)
        .and_then(|v| v.checked_mul(elapsed as u128))
        .ok_or(StakeError::Overflow)?;
    let base_den = PPM_DENOMINATOR * SECONDS_PER_DAY as u128;
    let bonus_den = base_den * BPS_DENOMINATOR;

    let referral_bps = accel.referral_bps(params)?;
    let team_bps = accel.grant.team_acceleration_bps as u128;

    let base = base_num / base_den;
    let referral = base_num
        .checked_mul(referral_bps)
        .ok_or(StakeError::Overflow)?
        / bonus_den;
    let team = base_num.checked_mul(team_bps).ok_or(StakeError::Overflow)? / bonus_den;

    let total_bps = BPS_DENOMINATOR
        .checked_add(referral_bps)
        .and_then(|v| v.checked_add(team_bps))
        .ok_or(StakeError::Overflow)?;
    let total_num = base_num
        .checked_mul(total_bps)
        .and_then(|v| v.checked_add(package.release_carry as u128))
        .ok_or(StakeError::Overflow)?;
    let raw = total_num / bonus_den;

    let remaining = package.remaining() as u128;
    let released = raw.min(remaining);
    let reached_cap = released == remaining && package.status == PackageStatus::Active;
    let carry = if released < raw || remaining == 0 {
        0
    } else {
        total_num % bonus_den
    };

    Ok(Accrual {
        elapsed_secs: elapsed,
        base: to_amount(base)?,
        referral_bonus: to_amount(referral)?,
        team_bonus: to_amount(team)?,
        raw: to_amount(raw)?,
        released: to_amount(released)?,
        carry: to_amount(carry)?,
        reached_cap,
    })
}

/// Advances `package` to `as_of`, crediting the release to the owner's
/// pending balance. Exited packages are left untouched and release zero.
pub fn accrue(
    package: &mut StakingPackage,
    balance: &mut RewardBalance,
    as_of: Timestamp,
    accel: &Acceleration,
    params: &StakingParams,
) -> Result<Accrual, StakeError> {
    if package.status == PackageStatus::Exited {
        return Ok(Accrual::default());
    }
    let step = compute(package, as_of, accel, params)?;
    let pending = balance
        .pending
        .checked_add(step.released)
        .ok_or(StakeError::Overflow)?;
    let accelerated = accelerated_daily(package.base_release, accel, params)?;

    package.cumulative_released += step.released;
    package.last_accrual_at = as_of;
    package.release_carry = step.carry;
    package.accelerated_release = accelerated;
    if step.reached_cap {
        package.status = PackageStatus::EligibleForExit;
    }
    balance.pending = pending;

    debug!(
        "package {} accrued {} over {}s (base {}, referral {}, team {}), released {}/{}",
        package.id,
        step.released,
        step.elapsed_secs,
        step.base,
        step.referral_bonus,
        step.team_bonus,
        package.cumulative_released,
        package.cap
    );
    Ok(step)
}

fn accelerated_daily(
    base_release: Amount,
    accel: &Acceleration,
    params: &StakingParams,
) -> Result<Amount, StakeError> {
    let bps = accel
        .referral_bps(params)?
        .checked_add(accel.grant.team_acceleration_bps as u128)
        .ok_or(StakeError::Overflow)?;
    let daily = (base_release as u128)
        .checked_mul(bps)
        .ok_or(StakeError::Overflow)?
        / BPS_DENOMINATOR;
    to_amount(daily)
}

fn to_amount(value: u128) -> Result<Amount, StakeError> {
    Amount::try_from(value).map_err(|_| StakeError::Overflow)
}
