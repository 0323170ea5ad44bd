//! Price feed access.
//!
//! The keeper reads one collateral price per run. Two remote paths exist:
//!
//! - a round-style aggregator read (`latestRoundData`) that carries an
//!   update timestamp, used whenever staleness must be enforced;
//! - the protocol's own best-effort `fetchPrice`, which returns a 1e18 price
//!   but no timestamp.
//!
//! Validation (bounds, staleness) is the caller's job; this layer only reads.

mod aggregator;

pub use aggregator::ProtocolPriceFeed;

use alloy::primitives::U256;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;

/// Remote price source.
#[async_trait]
pub trait PriceFeed: Send + Sync + Debug {
    /// Latest round from the round-style feed.
    async fn latest_round(&self) -> Result<RoundData>;

    /// Best-effort price fetch, already scaled to 1e18.
    async fn fetch_price(&self) -> Result<U256>;
}

/// Round data from an aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundData {
    /// Round ID
    pub round_id: u128,
    /// Price answer in feed decimals (negative answers are mapped to zero)
    pub answer: U256,
    /// Feed decimals
    pub decimals: u8,
    /// Timestamp when round started
    pub started_at: u64,
    /// Timestamp when answer was computed (0 if the feed does not report it)
    pub updated_at: u64,
    /// Round ID for which answer was computed
    pub answered_in_round: u128,
}

impl RoundData {
    /// Observation timestamp, if the feed reported one.
    pub fn observed_at(&self) -> Option<u64> {
        (self.updated_at > 0).then_some(self.updated_at)
    }

    /// Answer scaled to 18 decimals; `None` if scaling overflows.
    pub fn answer_e18(&self) -> Option<U256> {
        normalize_to_18(self.answer, self.decimals)
    }
}

/// Scale a fixed-point value from `decimals` to 18 decimals.
///
/// `None` when the scaled value does not fit in 256 bits. A divisor too
/// large to represent means the value scales to zero.
pub fn normalize_to_18(value: U256, decimals: u8) -> Option<U256> {
    let ten = U256::from(10u64);
    if decimals <= 18 {
        let factor = ten.checked_pow(U256::from(18 - decimals))?;
        value.checked_mul(factor)
    } else {
        match ten.checked_pow(U256::from(decimals - 18)) {
            Some(divisor) => Some(value / divisor),
            None => Some(U256::ZERO),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round(answer: u64, decimals: u8, updated_at: u64) -> RoundData {
        RoundData {
            round_id: 100,
            answer: U256::from(answer),
            decimals,
            started_at: 1_700_000_000,
            updated_at,
            answered_in_round: 100,
        }
    }

    #[test]
    fn test_answer_normalization() {
        // $2000 with 8 decimals
        let r = round(200_000_000_000, 8, 1_700_000_100);
        assert_eq!(
            r.answer_e18(),
            Some(U256::from(2000u64) * U256::from(10u64).pow(U256::from(18)))
        );
    }

    #[test]
    fn test_observed_at_unknown_when_zero() {
        assert_eq!(round(1, 8, 0).observed_at(), None);
        assert_eq!(round(1, 8, 1_700_000_100).observed_at(), Some(1_700_000_100));
    }

    #[test]
    fn test_normalize_high_decimals() {
        let v = U256::from(10u64).pow(U256::from(20));
        assert_eq!(normalize_to_18(v, 20), Some(U256::from(10u64).pow(U256::from(18))));
        assert_eq!(normalize_to_18(U256::MAX, 255), Some(U256::ZERO));
    }

    #[test]
    fn test_normalize_rejects_overflow() {
        assert_eq!(normalize_to_18(U256::MAX, 8), None);
        assert_eq!(normalize_to_18(U256::MAX, 18), Some(U256::MAX));
        // Scaling by 1e18 overflows
        let r = RoundData {
            answer: U256::MAX / U256::from(1_000u64),
            decimals: 0,
            ..round(0, 0, 0)
        };
        assert_eq!(r.answer_e18(), None);
    }
}
