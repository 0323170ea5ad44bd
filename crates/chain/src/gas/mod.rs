//! Fee estimation and fee plans.
//!
//! Network estimates come from two independent sources, a dynamic
//! (EIP-1559) estimator and a legacy single-price estimator. The keeper
//! combines them with operator overrides into a [`FeePlan`], which is what
//! actually gets applied to a transaction.
//!
//! # Example
//!
//! ```rust,ignore
//! use keeper_chain::gas::{Eip1559Estimator, LegacyEstimator, RpcNetworkFees};
//!
//! let fees = RpcNetworkFees::new(
//!     Eip1559Estimator::new(rpc_url, 2.0),
//!     LegacyEstimator::new(rpc_url),
//! );
//! let dynamic = fees.dynamic_estimate().await?;
//! ```

mod eip1559;
mod legacy;

pub use eip1559::Eip1559Estimator;
pub use legacy::LegacyEstimator;

use alloy::network::TransactionBuilder;
use alloy::rpc::types::TransactionRequest;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt::{self, Debug};

/// Gas parameters fetched from the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasParams {
    /// Legacy gas pricing (pre-EIP-1559).
    Legacy {
        /// Gas price in wei.
        gas_price: u128,
    },
    /// EIP-1559 gas pricing.
    Eip1559 {
        /// Maximum fee per gas in wei.
        max_fee_per_gas: u128,
        /// Maximum priority fee per gas in wei.
        max_priority_fee_per_gas: u128,
        /// Current base fee (for reference).
        base_fee: u128,
    },
}

impl GasParams {
    /// Priority fee, if this is a dynamic estimate.
    pub fn priority_fee(&self) -> Option<u128> {
        match self {
            GasParams::Eip1559 {
                max_priority_fee_per_gas,
                ..
            } => Some(*max_priority_fee_per_gas),
            GasParams::Legacy { .. } => None,
        }
    }
}

/// Network fee sources.
#[async_trait]
pub trait NetworkFees: Send + Sync + Debug {
    /// Dynamic fee estimate (base fee + priority fee).
    async fn dynamic_estimate(&self) -> Result<GasParams>;

    /// Legacy single gas price estimate, in wei.
    async fn legacy_estimate(&self) -> Result<u128>;
}

/// Fee sources backed by an RPC endpoint.
#[derive(Debug)]
pub struct RpcNetworkFees {
    eip1559: Eip1559Estimator,
    legacy: LegacyEstimator,
}

impl RpcNetworkFees {
    pub fn new(eip1559: Eip1559Estimator, legacy: LegacyEstimator) -> Self {
        Self { eip1559, legacy }
    }
}

#[async_trait]
impl NetworkFees for RpcNetworkFees {
    async fn dynamic_estimate(&self) -> Result<GasParams> {
        self.eip1559.fetch_params().await
    }

    async fn legacy_estimate(&self) -> Result<u128> {
        self.legacy.fetch_gas_price().await
    }
}

/// Transaction type a fee plan resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeMode {
    Eip1559,
    Legacy,
    Unknown,
}

impl fmt::Display for FeeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeeMode::Eip1559 => write!(f, "eip1559"),
            FeeMode::Legacy => write!(f, "legacy"),
            FeeMode::Unknown => write!(f, "unknown"),
        }
    }
}

/// Where the fee plan's numbers came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeSource {
    Config,
    Estimate,
    None,
}

impl fmt::Display for FeeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeeSource::Config => write!(f, "config"),
            FeeSource::Estimate => write!(f, "estimate"),
            FeeSource::None => write!(f, "none"),
        }
    }
}

/// Resolved fee plan for one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeePlan {
    pub mode: FeeMode,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    pub gas_price: Option<u128>,
    pub source: FeeSource,
    pub known: bool,
    /// False when the priority fee fell back to zero.
    pub priority_known: bool,
}

impl FeePlan {
    pub fn eip1559(
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
        source: FeeSource,
        priority_known: bool,
    ) -> Self {
        Self {
            mode: FeeMode::Eip1559,
            max_fee_per_gas: Some(max_fee_per_gas),
            max_priority_fee_per_gas: Some(max_priority_fee_per_gas),
            gas_price: None,
            source,
            known: true,
            priority_known,
        }
    }

    pub fn legacy(gas_price: u128, source: FeeSource) -> Self {
        Self {
            mode: FeeMode::Legacy,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            gas_price: Some(gas_price),
            source,
            known: true,
            priority_known: true,
        }
    }

    pub fn unknown() -> Self {
        Self {
            mode: FeeMode::Unknown,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            gas_price: None,
            source: FeeSource::None,
            known: false,
            priority_known: false,
        }
    }

    /// Upper bound on the price paid per unit of gas.
    pub fn price_per_gas(&self) -> Option<u128> {
        match self.mode {
            FeeMode::Eip1559 => self.max_fee_per_gas,
            FeeMode::Legacy => self.gas_price,
            FeeMode::Unknown => None,
        }
    }

    /// Apply the plan to a transaction request.
    ///
    /// An unknown plan leaves the fee fields empty for the provider to fill.
    pub fn apply(&self, tx: &mut TransactionRequest) {
        match self.mode {
            FeeMode::Eip1559 => {
                if let Some(max_fee) = self.max_fee_per_gas {
                    tx.set_max_fee_per_gas(max_fee);
                }
                if let Some(priority) = self.max_priority_fee_per_gas {
                    tx.set_max_priority_fee_per_gas(priority);
                }
            }
            FeeMode::Legacy => {
                if let Some(price) = self.gas_price {
                    tx.set_gas_price(price);
                }
            }
            FeeMode::Unknown => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;

    #[test]
    fn test_gas_params_priority_fee() {
        let legacy = GasParams::Legacy {
            gas_price: 1_000_000_000,
        };
        assert_eq!(legacy.priority_fee(), None);

        let eip1559 = GasParams::Eip1559 {
            max_fee_per_gas: 50_000_000_000,
            max_priority_fee_per_gas: 2_000_000_000,
            base_fee: 30_000_000_000,
        };
        assert_eq!(eip1559.priority_fee(), Some(2_000_000_000));
    }

    #[test]
    fn test_fee_plan_apply_eip1559() {
        let plan = FeePlan::eip1559(50_000_000_000, 2_000_000_000, FeeSource::Config, true);
        let mut tx = TransactionRequest::default().with_to(Address::ZERO);
        plan.apply(&mut tx);

        assert_eq!(tx.max_fee_per_gas, Some(50_000_000_000));
        assert_eq!(tx.max_priority_fee_per_gas, Some(2_000_000_000));
        assert_eq!(tx.gas_price, None);
        assert_eq!(plan.price_per_gas(), Some(50_000_000_000));
    }

    #[test]
    fn test_fee_plan_apply_legacy() {
        let plan = FeePlan::legacy(5_000_000_000, FeeSource::Estimate);
        let mut tx = TransactionRequest::default().with_to(Address::ZERO);
        plan.apply(&mut tx);

        assert_eq!(tx.gas_price, Some(5_000_000_000));
        assert!(tx.max_fee_per_gas.is_none());
    }

    #[test]
    fn test_unknown_plan_leaves_fields_empty() {
        let plan = FeePlan::unknown();
        let mut tx = TransactionRequest::default();
        plan.apply(&mut tx);

        assert!(!plan.known);
        assert_eq!(plan.price_per_gas(), None);
        assert!(tx.gas_price.is_none());
        assert!(tx.max_fee_per_gas.is_none());
    }
}
