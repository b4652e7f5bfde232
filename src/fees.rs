//! Platform fee policy
//!
//! Pure and deterministic: the same gross amount always yields the same
//! split, so every recorded transaction can be re-derived for audits and
//! dispute resolution. The payout is defined as `gross - fee` exactly; no
//! component computes it any other way.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use thiserror::Error;

/// Fee brackets, percentage by gross amount. Smaller sales carry a higher
/// platform percentage; the absolute fee is capped at [`FEE_CAP`] and
/// floored at one cent (a positive sale never nets the platform zero).
///
/// | gross           | rate |
/// |-----------------|------|
/// | (0, 20.00)      | 10%  |
/// | [20.00, 100.00) | 7%   |
/// | [100.00, ∞)     | 5%   |
const TIER_SMALL_LIMIT: Decimal = Decimal::from_parts(2000, 0, 0, false, 2); // 20.00
const TIER_MID_LIMIT: Decimal = Decimal::from_parts(10000, 0, 0, false, 2); // 100.00

const RATE_SMALL: Decimal = Decimal::from_parts(10, 0, 0, false, 2); // 0.10
const RATE_MID: Decimal = Decimal::from_parts(7, 0, 0, false, 2); // 0.07
const RATE_LARGE: Decimal = Decimal::from_parts(5, 0, 0, false, 2); // 0.05

/// Absolute fee ceiling in currency units.
pub const FEE_CAP: Decimal = Decimal::from_parts(2500, 0, 0, false, 2); // 25.00

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeeError {
    #[error("amount must be positive with at most 2 fraction digits: {0}")]
    InvalidAmount(Decimal),
}

/// The division of a gross payment into platform fee and seller payout.
///
/// Invariant: `fee + payout == gross`, always exact in cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeSplit {
    pub fee: Decimal,
    pub payout: Decimal,
}

/// Compute the platform fee / seller payout split for a gross amount.
///
/// The fee is the tier percentage rounded to the minor currency unit
/// (midpoint away from zero), then capped at [`FEE_CAP`], then floored at
/// 0.01 (the floor only engages for gross <= 0.04, where the rounded
/// percentage is zero). The payout is the exact remainder, so no cent is
/// ever lost or invented.
pub fn split(gross: Decimal) -> Result<FeeSplit, FeeError> {
    if gross <= Decimal::ZERO || gross != gross.round_dp(2) {
        return Err(FeeError::InvalidAmount(gross));
    }

    let rate = if gross < TIER_SMALL_LIMIT {
        RATE_SMALL
    } else if gross < TIER_MID_LIMIT {
        RATE_MID
    } else {
        RATE_LARGE
    };

    let mut fee =
        (gross * rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    if fee > FEE_CAP {
        fee = FEE_CAP;
    }
    // A positive sale never nets the platform zero (mirrors the minimum-fee
    // rule the processor applies on its own side).
    if fee.is_zero() {
        fee = Decimal::new(1, 2); // 0.01
    }

    Ok(FeeSplit {
        fee,
        payout: gross - fee,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_small_tier_documented_vector() {
        // 19.99 * 10% = 1.999 -> rounds to 2.00, payout 17.99
        let s = split(dec("19.99")).unwrap();
        assert_eq!(s.fee, dec("2.00"));
        assert_eq!(s.payout, dec("17.99"));
    }

    #[test]
    fn test_mid_tier() {
        // 20.00 crosses into the 7% bracket: fee 1.40
        let s = split(dec("20.00")).unwrap();
        assert_eq!(s.fee, dec("1.40"));
        assert_eq!(s.payout, dec("18.60"));
    }

    #[test]
    fn test_large_tier_hits_cap() {
        // 1000.00 * 5% = 50.00 -> capped at 25.00
        let s = split(dec("1000.00")).unwrap();
        assert_eq!(s.fee, dec("25.00"));
        assert_eq!(s.payout, dec("975.00"));
    }

    #[test]
    fn test_minimum_fee_floor() {
        // 0.01 * 10% = 0.001 -> rounds to 0.00 -> floored to one cent
        let s = split(dec("0.01")).unwrap();
        assert_eq!(s.fee, dec("0.01"));
        assert_eq!(s.payout, dec("0.00"));

        // 0.04 is the largest gross where the floor engages; at 0.05 the
        // rounded percentage already reaches one cent on its own.
        assert_eq!(split(dec("0.04")).unwrap().fee, dec("0.01"));
        assert_eq!(split(dec("0.05")).unwrap().fee, dec("0.01"));
        assert_eq!(split(dec("0.15")).unwrap().fee, dec("0.02"));
    }

    #[test]
    fn test_split_always_sums_to_gross() {
        for raw in ["0.01", "5.55", "19.99", "20.00", "99.99", "100.00", "123.45", "9999.99"] {
            let gross = dec(raw);
            let s = split(gross).unwrap();
            assert_eq!(s.fee + s.payout, gross, "leak at gross={}", gross);
            assert!(s.fee <= FEE_CAP);
            assert!(s.fee > Decimal::ZERO);
        }
    }

    #[test]
    fn test_rejects_invalid_amounts() {
        assert!(split(Decimal::ZERO).is_err());
        assert!(split(dec("-1.00")).is_err());
        assert!(split(dec("1.999")).is_err());
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(split(dec("42.42")).unwrap(), split(dec("42.42")).unwrap());
    }
}
