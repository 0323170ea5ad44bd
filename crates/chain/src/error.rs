//! Chain error classification.
//!
//! RPC failures come back from alloy as opaque transport errors. The engine
//! needs to tell a deterministic revert apart from a transient network
//! failure, because only the latter is worth retrying.

use alloy::primitives::B256;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// Execution reverted (during estimation or simulation).
    #[error("execution reverted: {0}")]
    Revert(String),

    /// Transient RPC / network failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// No signer available, or the key could not be used.
    #[error("signer error: {0}")]
    Signer(String),

    /// Response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Broadcast, but no receipt was obtained. Never resubmitted: the
    /// transaction may still land under its nonce.
    #[error("transaction {tx_hash} unconfirmed: {reason}")]
    Unconfirmed { tx_hash: B256, reason: String },
}

impl ChainError {
    /// Classify an RPC error message.
    ///
    /// Nodes disagree on wording, so anything mentioning a revert is treated
    /// as deterministic and everything else as transient.
    pub fn from_rpc(err: impl std::fmt::Display) -> Self {
        let msg = err.to_string();
        let lower = msg.to_lowercase();
        if lower.contains("revert") || lower.contains("invalid opcode") {
            ChainError::Revert(msg)
        } else {
            ChainError::Transport(msg)
        }
    }

    pub fn is_revert(&self) -> bool {
        matches!(self, ChainError::Revert(_))
    }

    /// Only transport failures are retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Transport(_))
    }

    /// Hash of a broadcast transaction whose outcome is unknown.
    pub fn unconfirmed_hash(&self) -> Option<B256> {
        match self {
            ChainError::Unconfirmed { tx_hash, .. } => Some(*tx_hash),
            _ => None,
        }
    }
}

pub type ChainResult<T> = Result<T, ChainError>;
