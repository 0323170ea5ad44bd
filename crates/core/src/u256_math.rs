//! Fixed-point helpers for ratio, price and fee arithmetic.
//!
//! Everything the engine compares stays in U256; f64 conversions exist
//! only for configuration input and log output.

use alloy::primitives::U256;

/// WAD constant: 1e18 for 18-decimal fixed-point arithmetic
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000u64, 0, 0, 0]);

/// Liquidation threshold: 110% collateral ratio
pub const LIQUIDATION_THRESHOLD: U256 = U256::from_limbs([1_100_000_000_000_000_000u64, 0, 0, 0]);

/// One gwei in wei
pub const GWEI: u128 = 1_000_000_000;

/// Whether a collateral ratio is below the liquidation threshold.
#[inline(always)]
pub fn is_liquidatable(ratio: U256) -> bool {
    ratio < LIQUIDATION_THRESHOLD
}

/// Whether a collateral ratio is below 100% (collateral worth less than debt).
#[inline(always)]
pub fn is_underwater(ratio: U256) -> bool {
    ratio < WAD
}

/// Apply a percentage buffer to a gas amount.
/// Returns: gas * (100 + pct) / 100, saturating
///
/// Example: with_buffer(100_000, 20) = 120_000
#[inline(always)]
pub fn with_buffer(gas: u64, pct: u32) -> u64 {
    let buffered = (gas as u128) * (100 + pct as u128) / 100;
    buffered.min(u64::MAX as u128) as u64
}

/// Projected native cost of a submission: gas limit x price per gas.
#[inline(always)]
pub fn projected_cost(gas_limit: u64, price_per_gas: u128) -> U256 {
    U256::from(gas_limit) * U256::from(price_per_gas)
}

/// Convert f64 to WAD (18 decimals).
/// Use for converting operator input to U256.
#[inline(always)]
pub fn f64_to_wad(value: f64) -> U256 {
    if value <= 0.0 {
        return U256::ZERO;
    }
    U256::from((value * 1e18) as u128)
}

/// Convert a gwei amount to wei.
#[inline(always)]
pub fn gwei_to_wei(gwei: f64) -> u128 {
    if gwei <= 0.0 {
        return 0;
    }
    (gwei * GWEI as f64) as u128
}
