//! Machine-parseable reason codes attached to skip and abort events.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    // Price
    PriceUnavailable,
    PriceTimestampUnavailable,
    PriceStale,
    PriceOutOfBounds,
    PriceInvalid,
    // Run level
    ScanFailed,
    LowBalance,
    // Planning / estimation
    FeeUnavailable,
    EstimateRevert,
    EstimateFailed,
    GasCeiling,
    SpendCeiling,
    // Submission
    SubmitFailed,
    TxReverted,
    TxUnconfirmed,
    // Redemption
    AllowanceFailed,
    NothingToRedeem,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::PriceUnavailable => "PRICE_UNAVAILABLE",
            ReasonCode::PriceTimestampUnavailable => "PRICE_TIMESTAMP_UNAVAILABLE",
            ReasonCode::PriceStale => "PRICE_STALE",
            ReasonCode::PriceOutOfBounds => "PRICE_OUT_OF_BOUNDS",
            ReasonCode::PriceInvalid => "PRICE_INVALID",
            ReasonCode::ScanFailed => "SCAN_FAILED",
            ReasonCode::LowBalance => "LOW_BALANCE",
            ReasonCode::FeeUnavailable => "FEE_UNAVAILABLE",
            ReasonCode::EstimateRevert => "ESTIMATE_REVERT",
            ReasonCode::EstimateFailed => "ESTIMATE_FAILED",
            ReasonCode::GasCeiling => "GAS_CEILING",
            ReasonCode::SpendCeiling => "SPEND_CEILING",
            ReasonCode::SubmitFailed => "SUBMIT_FAILED",
            ReasonCode::TxReverted => "TX_REVERTED",
            ReasonCode::TxUnconfirmed => "TX_UNCONFIRMED",
            ReasonCode::AllowanceFailed => "ALLOWANCE_FAILED",
            ReasonCode::NothingToRedeem => "NOTHING_TO_REDEEM",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_serde() {
        for code in [
            ReasonCode::PriceTimestampUnavailable,
            ReasonCode::GasCeiling,
            ReasonCode::TxUnconfirmed,
            ReasonCode::NothingToRedeem,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{code}\""));
        }
    }
}
