use serde::{Deserialize, Serialize};

use crate::{params::StakingParams, Amount, StakeError, BPS_DENOMINATOR};

/// Amounts credited to each reward asset on exit.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PayoutSplit {
    pub primary: Amount,
    pub secondary: Amount,
}

impl PayoutSplit {
    pub fn total(&self) -> Amount {
        self.primary + self.secondary
    }
}

/// Splits an exiting package's released amount by value.
///
/// The primary share is floored and the secondary asset takes the remainder,
/// so the two halves always sum to `pending`.
pub fn split_on_exit(pending: Amount, params: &StakingParams) -> Result<PayoutSplit, StakeError> {
    let primary = (pending as u128)
        .checked_mul(params.primary_share_bps as u128)
        .ok_or(StakeError::Overflow)?
        / BPS_DENOMINATOR;
    let primary = Amount::try_from(primary).map_err(|_| StakeError::Overflow)?;
    Ok(PayoutSplit {
        primary,
        secondary: pending - primary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UNIT;

    #[test]
    fn even_split_of_a_full_cap() {
        let split = split_on_exit(1_500 * UNIT, &StakingParams::default()).unwrap();
        assert_eq!(split.primary, 750 * UNIT);
        assert_eq!(split.secondary, 750 * UNIT);
    }

    #[test]
    fn odd_amounts_lose_nothing() {
        let params = StakingParams::default();
        for pending in [0, 1, 3, 999_999, u64::MAX] {
            let split = split_on_exit(pending, &params).unwrap();
            assert_eq!(split.total(), pending);
        }
        let split = split_on_exit(3, &params).unwrap();
        assert_eq!((split.primary, split.secondary), (1, 2));
    }

    #[test]
    fn custom_share_is_honoured() {
        let params = StakingParams {
            primary_share_bps: 7_000,
            ..StakingParams::default()
        };
        let split = split_on_exit(1_000, &params).unwrap();
        assert_eq!(split, PayoutSplit { primary: 700, secondary: 300 });
    }
}
