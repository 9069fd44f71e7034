//! Core primitives for the package staking engine.
//!
//! This crate holds the stateless rules the ledger is built from:
//!
//! * [`level`]: the tier table mapping referral composition to a level and
//!   its team acceleration.
//! * [`accrual`]: per-tick release of a package, combining the base rate with
//!   referral and team acceleration, bounded by the package cap.
//! * [`payout`]: the exit split of a package's released amount across the
//!   two reward assets.
//! * [`package`]: package and reward balance records plus their status enum.
//! * [`params`]: tunable rates and limits.
//! * [`clock`]: the time source the engine consumes.
//!
//! Amounts are integer base units and every intermediate product is computed
//! in `u128` with checked arithmetic.

pub mod accrual;
pub mod clock;
pub mod level;
pub mod package;
pub mod params;
pub mod payout;

mod error;

pub use error::{ErrorKind, StakeError};

pub type AccountId = String;
pub type PackageId = u64;
pub type Amount = u64;
pub type Timestamp = i64;

/// Base units per whole token (6 decimals).
pub const UNIT: Amount = 1_000_000;
pub const SECONDS_PER_DAY: i64 = 86_400;
pub const BPS_DENOMINATOR: u128 = 10_000;
pub const PPM_DENOMINATOR: u128 = 1_000_000;

const UNIT_DECIMALS: usize = 6;

/// Parses a token amount such as `"100"` or `"5.25"` into base units.
pub fn parse_amount(text: &str) -> Option<Amount> {
    let text = text.trim();
    let (whole, frac) = match text.split_once('.') {
        Some((w, f)) => (w, f),
        None => (text, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if frac.len() > UNIT_DECIMALS || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let whole: Amount = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let frac: Amount = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<width$}", width = UNIT_DECIMALS).parse().ok()?
    };
    whole.checked_mul(UNIT)?.checked_add(frac)
}

/// Renders base units as a decimal token amount.
pub fn format_amount(amount: Amount) -> String {
    format!(
        "{}.{:0width$}",
        amount / UNIT,
        amount % UNIT,
        width = UNIT_DECIMALS
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whole_and_fractional_tokens() {
        assert_eq!(parse_amount("100"), Some(100 * UNIT));
        assert_eq!(parse_amount("5.25"), Some(5_250_000));
        assert_eq!(parse_amount(".5"), Some(500_000));
        assert_eq!(parse_amount("0.000001"), Some(1));
    }

    #[test]
    fn rejects_malformed_amounts() {
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("1.0000001"), None);
        assert_eq!(parse_amount("-3"), None);
        assert_eq!(parse_amount("1.2x"), None);
        assert_eq!(parse_amount("18446744073709551615"), None);
    }

    #[test]
    fn formats_with_six_decimals() {
        assert_eq!(format_amount(5_250_000), "5.250000");
        assert_eq!(format_amount(1), "0.000001");
    }
}
