//! EIP-1559 dynamic fee estimator.
//!
//! Reads the latest base fee and the node's suggested priority fee and
//! derives a `max_fee_per_gas` with a configurable multiplier. Unlike a
//! signing-path strategy this never substitutes defaults: if the chain has
//! no base fee or the node cannot suggest a tip, the estimate fails and the
//! caller moves on to the next fee source.

use super::GasParams;
use alloy::providers::{Provider, ProviderBuilder};
use anyhow::Result;

/// Default max fee cap: 500 gwei.
const DEFAULT_MAX_FEE_CAP: u128 = 500_000_000_000;

#[derive(Debug, Clone)]
pub struct Eip1559Estimator {
    rpc_url: String,
    /// Multiplier for max_fee relative to base_fee (e.g., 2.0 = absorb one doubling).
    max_fee_multiplier: f64,
    /// Maximum allowed max_fee_per_gas in wei, if capped.
    max_fee_cap: Option<u128>,
}

impl Eip1559Estimator {
    pub fn new(rpc_url: impl Into<String>, max_fee_multiplier: f64) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            max_fee_multiplier,
            max_fee_cap: Some(DEFAULT_MAX_FEE_CAP),
        }
    }

    /// Replace the max fee cap; `None` leaves estimates uncapped.
    pub fn with_max_fee_cap(mut self, cap: Option<u128>) -> Self {
        self.max_fee_cap = cap;
        self
    }

    /// `(max_fee_per_gas, max_priority_fee_per_gas)` from base fee and tip.
    /// The tip never exceeds the (capped) max fee.
    fn calculate_fees(&self, base_fee: u128, priority_fee: u128) -> (u128, u128) {
        let max_fee =
            (((base_fee as f64) * self.max_fee_multiplier) as u128).saturating_add(priority_fee);
        let max_fee = match self.max_fee_cap {
            Some(cap) => max_fee.min(cap),
            None => max_fee,
        };
        (max_fee, priority_fee.min(max_fee))
    }

    pub async fn fetch_params(&self) -> Result<GasParams> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);

        let block = provider
            .get_block_by_number(alloy::eips::BlockNumberOrTag::Latest)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to get latest block"))?;

        let base_fee = block
            .header
            .base_fee_per_gas
            .map(|b| b as u128)
            .ok_or_else(|| anyhow::anyhow!("Latest block has no base fee"))?;

        let priority_fee = provider.get_max_priority_fee_per_gas().await?;
        let (max_fee_per_gas, max_priority_fee_per_gas) = self.calculate_fees(base_fee, priority_fee);

        Ok(GasParams::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
            base_fee,
        })
    }
}
