//! Price reader with fail-closed validation.
//!
//! One price is read per run and reused by every job. The round-style feed
//! is the primary path because it carries an observation timestamp; the
//! protocol's best-effort `fetchPrice` is only an acceptable fallback when
//! staleness is not being enforced.

use alloy::primitives::U256;
use keeper_chain::PriceFeed;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::reason::ReasonCode;

/// Inclusive sanity bounds, 1e18 scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceBounds {
    pub min: U256,
    pub max: U256,
}

impl PriceBounds {
    pub fn contains(&self, value: U256) -> bool {
        self.min <= value && value <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    /// Round-style aggregator read
    Round,
    /// Protocol `fetchPrice` fallback
    BestEffort,
}

/// A validated price, immutable for the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceSample {
    pub value_e18: U256,
    /// Unix seconds, if the source reported it
    pub observed_at: Option<u64>,
    pub source: PriceSource,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PriceRejection {
    #[error("price read failed: {0}")]
    Unavailable(String),

    #[error("price timestamp unavailable while staleness is enforced")]
    TimestampUnavailable,

    #[error("price is {age}s old, max {max_age}s")]
    Stale { age: u64, max_age: u64 },

    #[error("price {value} outside [{min}, {max}]")]
    OutOfBounds { value: U256, min: U256, max: U256 },

    #[error("price is zero or negative")]
    Invalid,
}

impl PriceRejection {
    pub fn reason(&self) -> ReasonCode {
        match self {
            PriceRejection::Unavailable(_) => ReasonCode::PriceUnavailable,
            PriceRejection::TimestampUnavailable => ReasonCode::PriceTimestampUnavailable,
            PriceRejection::Stale { .. } => ReasonCode::PriceStale,
            PriceRejection::OutOfBounds { .. } => ReasonCode::PriceOutOfBounds,
            PriceRejection::Invalid => ReasonCode::PriceInvalid,
        }
    }
}

pub struct PriceReader {
    feed: Arc<dyn PriceFeed>,
    bounds: Option<PriceBounds>,
    /// Seconds; `None` disables staleness enforcement
    max_age: Option<u64>,
}

impl PriceReader {
    pub fn new(feed: Arc<dyn PriceFeed>, bounds: Option<PriceBounds>, max_age: Option<u64>) -> Self {
        Self {
            feed,
            bounds,
            max_age,
        }
    }

    /// Read and validate a price as of `now` (unix seconds).
    ///
    /// Validation order: freshness (if enforced), zero, then bounds (if set).
    pub async fn read_price(&self, now: u64) -> Result<PriceSample, PriceRejection> {
        let sample = match self.feed.latest_round().await {
            Ok(round) => PriceSample {
                value_e18: round.answer_e18().ok_or_else(|| {
                    PriceRejection::Unavailable(format!(
                        "answer {} with {} decimals overflows 18-decimal scaling",
                        round.answer, round.decimals
                    ))
                })?,
                observed_at: round.observed_at(),
                source: PriceSource::Round,
            },
            Err(e) if self.max_age.is_some() => {
                return Err(PriceRejection::Unavailable(e.to_string()));
            }
            Err(e) => {
                warn!(error = %e, "Round read failed, using best-effort price");
                let value = self
                    .feed
                    .fetch_price()
                    .await
                    .map_err(|e| PriceRejection::Unavailable(e.to_string()))?;
                PriceSample {
                    value_e18: value,
                    observed_at: None,
                    source: PriceSource::BestEffort,
                }
            }
        };

        if let Some(max_age) = self.max_age {
            let observed = sample
                .observed_at
                .ok_or(PriceRejection::TimestampUnavailable)?;
            // Clock skew can put the observation slightly in the future
            let age = now.saturating_sub(observed);
            if age > max_age {
                return Err(PriceRejection::Stale { age, max_age });
            }
        }

        if sample.value_e18.is_zero() {
            return Err(PriceRejection::Invalid);
        }

        if let Some(bounds) = self.bounds {
            if !bounds.contains(sample.value_e18) {
                return Err(PriceRejection::OutOfBounds {
                    value: sample.value_e18,
                    min: bounds.min,
                    max: bounds.max,
                });
            }
        }

        debug!(
            price = %sample.value_e18,
            observed_at = ?sample.observed_at,
            source = ?sample.source,
            "Price accepted"
        );
        Ok(sample)
    }
}
