//! Keeper wrapper gateway.
//!
//! The wrapper contract is a stateless pass-through: it calls the protocol,
//! forwards whatever balance deltas came back to a recipient, and emits a
//! job event carrying a monotonically increasing job id. The keeper never
//! talks to the protocol's write surface directly.
//!
//! [`KeeperGateway`] is the seam the execution engine drives: estimate gas
//! for a call, submit it with a fee plan and gas limit, read the signer's
//! balance and allowance.

pub mod bindings;

pub use bindings::{IERC20, IHintHelpers, IKeeperWrapper, ISortedTroves, ITroveManager};

use alloy::primitives::{Address, Bytes, Log, B256, U256};
use alloy::providers::ProviderBuilder;
use alloy::sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ChainError, ChainResult};
use crate::gas::FeePlan;
use crate::provider::parse_rpc_url;
use crate::signer::TransactionSender;

/// Hinted redemption arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedemptionCall {
    pub amount: U256,
    pub first_hint: Address,
    pub upper_hint: Address,
    pub lower_hint: Address,
    pub partial_nicr: U256,
    pub max_iterations: u64,
}

/// A call the keeper can route through the wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeeperCall {
    /// Liquidate one or more borrowers.
    Liquidate {
        borrowers: Vec<Address>,
        fallback_on_fail: bool,
    },
    /// Hinted redemption of stable asset for collateral.
    Redeem(RedemptionCall),
    /// Approve the wrapper to pull `amount` of `token`.
    Approve { token: Address, amount: U256 },
}

impl KeeperCall {
    pub fn liquidate(borrowers: Vec<Address>, fallback_on_fail: bool) -> Self {
        KeeperCall::Liquidate {
            borrowers,
            fallback_on_fail,
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            KeeperCall::Liquidate { borrowers, .. } if borrowers.len() == 1 => "liquidate",
            KeeperCall::Liquidate { .. } => "liquidate_batch",
            KeeperCall::Redeem(_) => "redeem",
            KeeperCall::Approve { .. } => "approve",
        }
    }
}

/// Terminal state of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutcome {
    pub tx_hash: B256,
    /// Receipt status
    pub success: bool,
    pub gas_used: u64,
    pub effective_gas_price: u128,
    /// Wrapper job id, if the job event was found
    pub job_id: Option<U256>,
    /// Positions the wrapper reports as liquidated
    pub succeeded: Option<u64>,
}

impl TxOutcome {
    /// Actual native cost: gas used x effective price.
    pub fn cost(&self) -> U256 {
        U256::from(self.gas_used) * U256::from(self.effective_gas_price)
    }
}

/// Execution seam between the engine and the chain.
#[async_trait]
pub trait KeeperGateway: Send + Sync + Debug {
    /// Estimate gas for a call. Reverts come back as [`ChainError::Revert`].
    async fn estimate_gas(&self, call: &KeeperCall) -> ChainResult<u64>;

    /// Sign, send and wait for the receipt.
    async fn submit(&self, call: &KeeperCall, gas_limit: u64, fee: &FeePlan) -> ChainResult<TxOutcome>;

    /// Whether transactions can be signed.
    fn has_signer(&self) -> bool;

    /// Native balance of the signer, if one is configured.
    async fn signer_balance(&self) -> ChainResult<Option<U256>>;

    /// Allowance granted by the signer to the wrapper for `token`.
    async fn allowance(&self, token: Address) -> ChainResult<U256>;
}

/// Encode calldata and resolve the target for a call.
pub fn encode_call(wrapper: Address, recipient: Address, call: &KeeperCall) -> (Address, Bytes) {
    match call {
        KeeperCall::Liquidate {
            borrowers,
            fallback_on_fail,
        } => {
            let data = if borrowers.len() == 1 {
                IKeeperWrapper::liquidateCall {
                    borrower: borrowers[0],
                    recipient,
                }
                .abi_encode()
            } else {
                IKeeperWrapper::liquidateBatchCall {
                    borrowers: borrowers.clone(),
                    fallbackOnFail: *fallback_on_fail,
                    recipient,
                }
                .abi_encode()
            };
            (wrapper, Bytes::from(data))
        }
        KeeperCall::Redeem(r) => {
            let data = IKeeperWrapper::redeemHintedCall {
                amount: r.amount,
                firstHint: r.first_hint,
                upperHint: r.upper_hint,
                lowerHint: r.lower_hint,
                partialNICR: r.partial_nicr,
                maxIterations: U256::from(r.max_iterations),
                recipient,
            }
            .abi_encode();
            (wrapper, Bytes::from(data))
        }
        KeeperCall::Approve { token, amount } => {
            let data = IERC20::approveCall {
                spender: wrapper,
                amount: *amount,
            }
            .abi_encode();
            (*token, Bytes::from(data))
        }
    }
}

/// Pull the wrapper's job id and success count out of receipt logs.
pub fn decode_job_events(wrapper: Address, logs: &[Log]) -> (Option<U256>, Option<u64>) {
    for log in logs.iter().filter(|l| l.address == wrapper) {
        if let Ok(ev) = IKeeperWrapper::LiquidationJob::decode_log_data(&log.data, true) {
            return (Some(ev.jobId), Some(ev.succeeded.saturating_to::<u64>()));
        }
        if let Ok(ev) = IKeeperWrapper::RedemptionJob::decode_log_data(&log.data, true) {
            return (Some(ev.jobId), None);
        }
    }
    (None, None)
}

/// Wrapper contract with transaction sending capability.
pub struct KeeperContract {
    /// Wrapper address
    pub address: Address,
    rpc_url: String,
    /// Receives forwarded balance deltas
    recipient: Address,
    /// `from` used for estimation when no signer is configured
    estimate_from: Address,
    sender: Option<Arc<TransactionSender>>,
}

impl KeeperContract {
    /// Read-only wrapper (dry-run without a key).
    pub fn new(address: Address, rpc_url: impl Into<String>, recipient: Address) -> Self {
        Self {
            address,
            rpc_url: rpc_url.into(),
            recipient,
            estimate_from: recipient,
            sender: None,
        }
    }

    pub fn with_sender(mut self, sender: Arc<TransactionSender>) -> Self {
        self.estimate_from = sender.address;
        self.sender = Some(sender);
        self
    }

    pub fn with_estimate_from(mut self, from: Address) -> Self {
        self.estimate_from = from;
        self
    }

    fn owner(&self) -> Address {
        self.sender
            .as_ref()
            .map(|s| s.address)
            .unwrap_or(self.estimate_from)
    }
}

impl Debug for KeeperContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeeperContract")
            .field("address", &self.address)
            .field("recipient", &self.recipient)
            .field("has_signer", &self.sender.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KeeperGateway for KeeperContract {
    async fn estimate_gas(&self, call: &KeeperCall) -> ChainResult<u64> {
        let url = parse_rpc_url(&self.rpc_url)?;
        let provider = ProviderBuilder::new().on_http(url);
        let from = self.owner();

        let estimate = match call {
            KeeperCall::Liquidate { borrowers, .. } if borrowers.len() == 1 => {
                IKeeperWrapper::new(self.address, &provider)
                    .liquidate(borrowers[0], self.recipient)
                    .from(from)
                    .estimate_gas()
                    .await
            }
            KeeperCall::Liquidate {
                borrowers,
                fallback_on_fail,
            } => {
                IKeeperWrapper::new(self.address, &provider)
                    .liquidateBatch(borrowers.clone(), *fallback_on_fail, self.recipient)
                    .from(from)
                    .estimate_gas()
                    .await
            }
            KeeperCall::Redeem(r) => {
                IKeeperWrapper::new(self.address, &provider)
                    .redeemHinted(
                        r.amount,
                        r.first_hint,
                        r.upper_hint,
                        r.lower_hint,
                        r.partial_nicr,
                        U256::from(r.max_iterations),
                        self.recipient,
                    )
                    .from(from)
                    .estimate_gas()
                    .await
            }
            KeeperCall::Approve { token, amount } => {
                IERC20::new(*token, &provider)
                    .approve(self.address, *amount)
                    .from(from)
                    .estimate_gas()
                    .await
            }
        };

        let gas = estimate.map_err(ChainError::from_rpc)?;
        debug!(call = call.kind(), gas = gas, "Gas estimated");
        Ok(gas)
    }

    async fn submit(&self, call: &KeeperCall, gas_limit: u64, fee: &FeePlan) -> ChainResult<TxOutcome> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| ChainError::Signer("transaction ready but signer not configured".into()))?;

        let (to, calldata) = encode_call(self.address, self.recipient, call);
        tracing::info!(
            contract = %to,
            call = call.kind(),
            calldata_len = calldata.len(),
            "[CONTRACT] Sending keeper call"
        );

        let sent = sender.send_call(to, calldata, gas_limit, fee).await?;
        let (job_id, succeeded) = decode_job_events(self.address, &sent.logs);

        Ok(TxOutcome {
            tx_hash: sent.tx_hash,
            success: sent.success,
            gas_used: sent.gas_used,
            effective_gas_price: sent.effective_gas_price,
            job_id,
            succeeded,
        })
    }

    fn has_signer(&self) -> bool {
        self.sender.is_some()
    }

    async fn signer_balance(&self) -> ChainResult<Option<U256>> {
        match &self.sender {
            Some(sender) => sender.balance().await.map(Some),
            None => Ok(None),
        }
    }

    async fn allowance(&self, token: Address) -> ChainResult<U256> {
        let url = parse_rpc_url(&self.rpc_url)?;
        let provider = ProviderBuilder::new().on_http(url);
        let allowance = IERC20::new(token, &provider)
            .allowance(self.owner(), self.address)
            .call()
            .await
            .map_err(ChainError::from_rpc)?;
        Ok(allowance._0)
    }
}
