//! Aggregator + protocol price feed reader.

use super::{PriceFeed, RoundData};
use alloy::primitives::{Address, U256};
use alloy::providers::ProviderBuilder;
use alloy::sol;
use anyhow::Result;
use async_trait::async_trait;

// Chainlink-style aggregator interface
sol! {
    #[sol(rpc)]
    interface IAggregatorV3 {
        function latestRoundData() external view returns (
            uint80 roundId,
            int256 answer,
            uint256 startedAt,
            uint256 updatedAt,
            uint80 answeredInRound
        );

        function decimals() external view returns (uint8);
    }
}

// Protocol price feed (best-effort path)
sol! {
    #[sol(rpc)]
    interface IProtocolPriceFeed {
        function fetchPrice() external returns (uint256);
    }
}

/// Price feed reading the protocol's feed contract and, optionally, the
/// aggregator behind it.
#[derive(Debug, Clone)]
pub struct ProtocolPriceFeed {
    rpc_url: String,
    /// Protocol price feed contract (`fetchPrice`)
    price_feed: Address,
    /// Round-style aggregator, if configured
    aggregator: Option<Address>,
}

impl ProtocolPriceFeed {
    pub fn new(rpc_url: impl Into<String>, price_feed: Address) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            price_feed,
            aggregator: None,
        }
    }

    pub fn with_aggregator(mut self, aggregator: Address) -> Self {
        self.aggregator = Some(aggregator);
        self
    }
}

#[async_trait]
impl PriceFeed for ProtocolPriceFeed {
    async fn latest_round(&self) -> Result<RoundData> {
        let aggregator = self
            .aggregator
            .ok_or_else(|| anyhow::anyhow!("No round-style aggregator configured"))?;

        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let contract = IAggregatorV3::new(aggregator, &provider);

        let decimals = contract.decimals().call().await?._0;
        let round = contract.latestRoundData().call().await?;

        // Convert int256 answer to U256 (negative answers become zero and are
        // rejected downstream)
        let answer = if round.answer.is_negative() {
            U256::ZERO
        } else {
            U256::from_limbs(round.answer.into_raw().into_limbs())
        };

        Ok(RoundData {
            round_id: round.roundId.to::<u128>(),
            answer,
            decimals,
            started_at: timestamp("startedAt", round.startedAt)?,
            updated_at: timestamp("updatedAt", round.updatedAt)?,
            answered_in_round: round.answeredInRound.to::<u128>(),
        })
    }

    async fn fetch_price(&self) -> Result<U256> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let contract = IProtocolPriceFeed::new(self.price_feed, &provider);
        // Simulated, so it never writes even though fetchPrice is non-view
        let price = contract.fetchPrice().call().await?._0;
        Ok(price)
    }
}

/// Feed timestamps are uint256 on the wire.
fn timestamp(field: &str, value: U256) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow::anyhow!("{field} {value} is not a valid timestamp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_out_of_range_is_an_error() {
        assert_eq!(timestamp("updatedAt", U256::from(1_700_000_000u64)).unwrap(), 1_700_000_000);
        let too_big = U256::from(u64::MAX) + U256::from(1u64);
        let err = timestamp("updatedAt", too_big).unwrap_err();
        assert!(err.to_string().contains("updatedAt"));
    }

    #[tokio::test]
    async fn test_round_read_requires_aggregator() {
        let feed = ProtocolPriceFeed::new("http://localhost:8545", Address::ZERO);
        let err = feed.latest_round().await.unwrap_err();
        assert!(err.to_string().contains("aggregator"));
    }
}
