//! Keeper chain interaction layer.
//!
//! This crate provides:
//! - Protocol reads (sorted borrower list, collateral ratios, redemption hints)
//! - Price feed access (round-style aggregator and protocol `fetchPrice`)
//! - Contract bindings for the protocol and the keeper wrapper
//! - Fee estimation (Legacy + EIP-1559) and fee plans
//! - Transaction signing and sending with local nonce tracking
//!
//! Everything the execution core needs from the chain is behind a trait
//! ([`PriceFeed`], [`SortedPositions`], [`HintSource`], [`NetworkFees`],
//! [`KeeperGateway`]), so the core can be driven by test doubles.

pub mod contracts;
pub mod error;
pub mod gas;
pub mod oracle;
pub mod protocol;
mod provider;
mod signer;

pub use contracts::{
    decode_job_events, encode_call, KeeperCall, KeeperContract, KeeperGateway, RedemptionCall,
    TxOutcome,
};
pub use error::{ChainError, ChainResult};
pub use gas::{
    Eip1559Estimator, FeeMode, FeePlan, FeeSource, GasParams, LegacyEstimator, NetworkFees,
    RpcNetworkFees,
};
pub use oracle::{normalize_to_18, PriceFeed, ProtocolPriceFeed, RoundData};
pub use protocol::{HintSource, RedemptionHints, SortedPositions};
pub use provider::{ProtocolAddresses, ProviderManager};
pub use signer::{NonceManager, SentTransaction, TransactionSender};
