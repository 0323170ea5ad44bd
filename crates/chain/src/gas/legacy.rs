//! Legacy single-price estimator (pre-EIP-1559).

use alloy::providers::{Provider, ProviderBuilder};
use anyhow::Result;

/// Reads `eth_gasPrice`, optionally capped.
#[derive(Debug, Clone)]
pub struct LegacyEstimator {
    rpc_url: String,
    /// Maximum gas price in wei, if capped.
    max_gas_price: Option<u128>,
}

impl LegacyEstimator {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            max_gas_price: None,
        }
    }

    pub fn with_max_gas_price(mut self, max_gas_price: Option<u128>) -> Self {
        self.max_gas_price = max_gas_price;
        self
    }

    fn cap(&self, gas_price: u128) -> u128 {
        match self.max_gas_price {
            Some(max) => gas_price.min(max),
            None => gas_price,
        }
    }

    pub async fn fetch_gas_price(&self) -> Result<u128> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let gas_price = provider.get_gas_price().await?;
        if gas_price == 0 {
            anyhow::bail!("Node reported a zero gas price");
        }
        Ok(self.cap(gas_price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_cap() {
        let estimator = LegacyEstimator::new("http://localhost:8545");
        assert_eq!(estimator.cap(20_000_000_000), 20_000_000_000);

        let capped = estimator.clone().with_max_gas_price(Some(10_000_000_000));
        assert_eq!(capped.cap(5_000_000_000), 5_000_000_000);
        assert_eq!(capped.cap(20_000_000_000), 10_000_000_000);

        let uncapped = estimator.with_max_gas_price(None);
        assert_eq!(uncapped.cap(20_000_000_000), 20_000_000_000);
    }
}
