//! Tiered level policy.
//!
//! Each tier carries its own requirement and tiers are evaluated
//! independently: an account holds the highest tier whose requirement is met,
//! whether or not the lower tiers' requirements still hold.

use std::fmt;

use serde::{Deserialize, Serialize};

pub type Level = u8;

pub const MAX_LEVEL: Level = 5;

/// What an account needs to reach a tier.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Requirement {
    /// At least `count` accounts referred directly.
    DirectReferrals { count: u32 },
    /// At least `count` downline accounts (any depth) at `level` or above.
    DownlineAtLevel { level: Level, count: u32 },
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::DirectReferrals { count } => write!(f, ">={count} direct referrals"),
            Requirement::DownlineAtLevel { level, count } => {
                write!(f, ">={count} downline accounts at level {level}")
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelTier {
    pub level: Level,
    pub requirement: Requirement,
    pub team_acceleration_bps: u64,
    pub global_dividend_bps: u64,
}

/// Ordered tier table, lowest tier first.
pub const LEVEL_TABLE: [LevelTier; MAX_LEVEL as usize] = [
    LevelTier {
        level: 1,
        requirement: Requirement::DirectReferrals { count: 10 },
        team_acceleration_bps: 500,
        global_dividend_bps: 0,
    },
    LevelTier {
        level: 2,
        requirement: Requirement::DownlineAtLevel { level: 1, count: 3 },
        team_acceleration_bps: 1_000,
        global_dividend_bps: 0,
    },
    LevelTier {
        level: 3,
        requirement: Requirement::DownlineAtLevel { level: 2, count: 3 },
        team_acceleration_bps: 1_500,
        global_dividend_bps: 0,
    },
    LevelTier {
        level: 4,
        requirement: Requirement::DownlineAtLevel { level: 3, count: 3 },
        team_acceleration_bps: 2_000,
        global_dividend_bps: 0,
    },
    LevelTier {
        level: 5,
        requirement: Requirement::DownlineAtLevel { level: 4, count: 3 },
        team_acceleration_bps: 2_500,
        global_dividend_bps: 100,
    },
];

/// Referral counts a level is evaluated from.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeamComposition {
    pub direct_referrals: u32,
    /// `team_at_level[k]` counts downline accounts whose level is exactly `k`.
    pub team_at_level: [u32; MAX_LEVEL as usize + 1],
}

impl TeamComposition {
    /// Downline accounts whose level is `level` or higher.
    pub fn at_least(&self, level: Level) -> u32 {
        self.team_at_level
            .iter()
            .skip(level as usize)
            .fold(0u32, |acc, n| acc.saturating_add(*n))
    }

    fn satisfies(&self, requirement: &Requirement) -> bool {
        match *requirement {
            Requirement::DirectReferrals { count } => self.direct_referrals >= count,
            Requirement::DownlineAtLevel { level, count } => self.at_least(level) >= count,
        }
    }
}

/// Result of evaluating the policy.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelGrant {
    pub level: Level,
    pub team_acceleration_bps: u64,
    pub global_dividend_bps: u64,
}

pub fn level_of(counts: &TeamComposition) -> LevelGrant {
    LEVEL_TABLE
        .iter()
        .rev()
        .find(|tier| counts.satisfies(&tier.requirement))
        .map(|tier| LevelGrant {
            level: tier.level,
            team_acceleration_bps: tier.team_acceleration_bps,
            global_dividend_bps: tier.global_dividend_bps,
        })
        .unwrap_or_default()
}

/// Grant for an already evaluated level.
pub fn grant_for(level: Level) -> LevelGrant {
    LEVEL_TABLE
        .iter()
        .find(|tier| tier.level == level)
        .map(|tier| LevelGrant {
            level,
            team_acceleration_bps: tier.team_acceleration_bps,
            global_dividend_bps: tier.global_dividend_bps,
        })
        .unwrap_or_default()
}

pub fn level_table() -> Vec<LevelTier> {
    LEVEL_TABLE.to_vec()
}
