//! Signing identity and transaction submission.
//!
//! Transactions from one signing identity must be strictly ordered, so the
//! nonce is tracked locally. A failed send rewinds it to the confirmed count.
//! Once broadcast, a transaction is only ever polled for its receipt, never
//! resent; if no receipt arrives the nonce is rewound to the pending count so
//! the next send queues behind it, or reuses the nonce if it was dropped.

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, Log, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{ChainError, ChainResult};
use crate::gas::FeePlan;
use crate::provider::parse_rpc_url;

/// Local nonce counter for one signer.
#[derive(Debug)]
pub struct NonceManager {
    next: AtomicU64,
}

impl NonceManager {
    pub fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    /// Take the next nonce.
    #[inline]
    pub fn reserve(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Nonce the next `reserve` will hand out.
    #[inline]
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    /// Rewind to a transaction count read from the chain.
    pub fn rewind(&self, count: u64) {
        self.next.store(count, Ordering::SeqCst);
    }
}

/// How long to wait for a receipt after broadcast.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReceiptPolling {
    pub interval: Duration,
    /// "Not mined yet" answers before giving up
    pub max_pending: u32,
    /// Consecutive failed polls before giving up
    pub max_errors: u32,
}

impl Default for ReceiptPolling {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_pending: 90,
            max_errors: 5,
        }
    }
}

/// Poll for the receipt of a broadcast transaction.
///
/// Failed polls back off (doubling, capped at 8x the interval). Running out
/// of either budget yields `ChainError::Unconfirmed`, which callers must not
/// retry.
pub(crate) async fn await_receipt<T, E, F, Fut>(
    tx_hash: B256,
    polling: ReceiptPolling,
    mut poll: F,
) -> ChainResult<T>
where
    E: fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let mut pending = 0u32;
    let mut errors = 0u32;
    loop {
        let wait = match poll().await {
            Ok(Some(receipt)) => return Ok(receipt),
            Ok(None) => {
                errors = 0;
                pending += 1;
                if pending >= polling.max_pending {
                    return Err(ChainError::Unconfirmed {
                        tx_hash,
                        reason: format!("not mined after {pending} polls"),
                    });
                }
                polling.interval
            }
            Err(e) => {
                errors += 1;
                warn!(tx_hash = %tx_hash, failures = errors, error = %e, "Receipt poll failed");
                if errors >= polling.max_errors {
                    return Err(ChainError::Unconfirmed {
                        tx_hash,
                        reason: e.to_string(),
                    });
                }
                polling.interval * (1u32 << errors.min(3))
            }
        };
        tokio::time::sleep(wait).await;
    }
}

/// Receipt data the gateway needs.
#[derive(Debug, Clone)]
pub struct SentTransaction {
    pub tx_hash: B256,
    pub success: bool,
    pub gas_used: u64,
    pub effective_gas_price: u128,
    pub logs: Vec<Log>,
}

/// Signs and sends keeper transactions, one at a time.
pub struct TransactionSender {
    rpc_url: String,
    wallet: EthereumWallet,
    pub address: Address,
    chain_id: u64,
    nonces: NonceManager,
    polling: ReceiptPolling,
}

impl TransactionSender {
    /// Build a sender from a hex private key (`0x` prefix optional).
    ///
    /// Reads the confirmed nonce, and the chain ID when not given.
    pub async fn new(private_key: &str, rpc_url: &str, chain_id: Option<u64>) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .trim_start_matches("0x")
            .parse()
            .context("PRIVATE_KEY is not a valid secp256k1 key")?;
        let address = signer.address();

        let provider = ProviderBuilder::new().on_http(parse_rpc_url(rpc_url)?);
        let chain_id = match chain_id {
            Some(id) => id,
            None => provider.get_chain_id().await?,
        };
        let confirmed = provider.get_transaction_count(address).await?;

        info!(
            address = %address,
            chain_id = chain_id,
            nonce = confirmed,
            "Signer ready"
        );

        Ok(Self {
            rpc_url: rpc_url.to_string(),
            wallet: EthereumWallet::from(signer),
            address,
            chain_id,
            nonces: NonceManager::new(confirmed),
            polling: ReceiptPolling::default(),
        })
    }

    /// Send a call and wait for its receipt.
    ///
    /// A mined-but-reverted transaction is returned as `success = false`,
    /// not as an error: it still consumed gas and the caller must account
    /// for it. Only a failure before broadcast is `Transport`.
    pub async fn send_call(
        &self,
        to: Address,
        calldata: Bytes,
        gas_limit: u64,
        fee: &FeePlan,
    ) -> ChainResult<SentTransaction> {
        let started = Instant::now();
        let nonce = self.nonces.reserve();

        let mut tx = TransactionRequest::default()
            .with_from(self.address)
            .with_to(to)
            .with_input(calldata)
            .with_value(U256::ZERO)
            .with_nonce(nonce)
            .with_gas_limit(gas_limit)
            .with_chain_id(self.chain_id);
        fee.apply(&mut tx);

        let provider = ProviderBuilder::new()
            .wallet(self.wallet.clone())
            .on_http(parse_rpc_url(&self.rpc_url)?);

        let pending = match provider.send_transaction(tx).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(nonce = nonce, error = %e, "Send failed, resyncing nonce");
                self.resync(false).await;
                return Err(ChainError::from_rpc(e));
            }
        };
        let tx_hash = *pending.tx_hash();
        debug!(
            tx_hash = %tx_hash,
            nonce = nonce,
            send_ms = started.elapsed().as_millis() as u64,
            "Broadcast, awaiting receipt"
        );

        let client = &provider;
        let polled = await_receipt(tx_hash, self.polling, move || async move {
            client.get_transaction_receipt(tx_hash).await
        })
        .await;
        let receipt = match polled {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(tx_hash = %tx_hash, nonce = nonce, error = %e, "No receipt, transaction left in flight");
                self.resync(true).await;
                return Err(e);
            }
        };

        let success = receipt.status();
        let logs: Vec<Log> = receipt.inner.logs().iter().map(|l| l.inner.clone()).collect();
        debug!(
            tx_hash = %tx_hash,
            block = receipt.block_number.unwrap_or(0),
            success = success,
            gas_used = receipt.gas_used,
            total_ms = started.elapsed().as_millis() as u64,
            "Receipt received"
        );

        Ok(SentTransaction {
            tx_hash,
            success,
            gas_used: receipt.gas_used,
            effective_gas_price: receipt.effective_gas_price,
            logs,
        })
    }

    /// Rewind the local nonce to the chain's transaction count, confirmed
    /// or including the mempool.
    async fn resync(&self, include_pending: bool) {
        let provider = match parse_rpc_url(&self.rpc_url) {
            Ok(url) => ProviderBuilder::new().on_http(url),
            Err(e) => {
                warn!(error = %e, "Nonce not resynced");
                return;
            }
        };
        let count = if include_pending {
            provider.get_transaction_count(self.address).pending().await
        } else {
            provider.get_transaction_count(self.address).await
        };
        match count {
            Ok(count) => {
                self.nonces.rewind(count);
                debug!(nonce = count, include_pending = include_pending, "Nonce resynced");
            }
            Err(e) => warn!(error = %e, "Nonce resync failed"),
        }
    }

    pub fn next_nonce(&self) -> u64 {
        self.nonces.peek()
    }

    /// Native balance of the signer.
    pub async fn balance(&self) -> ChainResult<U256> {
        let provider = ProviderBuilder::new().on_http(parse_rpc_url(&self.rpc_url)?);
        provider
            .get_balance(self.address)
            .await
            .map_err(ChainError::from_rpc)
    }
}

impl fmt::Debug for TransactionSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionSender")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("next_nonce", &self.next_nonce())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[test]
    fn test_nonces_are_sequential() {
        let nonces = NonceManager::new(10);
        assert_eq!(nonces.reserve(), 10);
        assert_eq!(nonces.reserve(), 11);
        assert_eq!(nonces.peek(), 12);
    }

    #[test]
    fn test_rewind_reuses_unconfirmed_nonce() {
        let nonces = NonceManager::new(4);
        nonces.reserve();
        nonces.reserve();
        // Only the first landed; the next send must replace the second
        nonces.rewind(5);
        assert_eq!(nonces.reserve(), 5);
    }

    fn fast_polling() -> ReceiptPolling {
        ReceiptPolling {
            interval: Duration::ZERO,
            max_pending: 3,
            max_errors: 3,
        }
    }

    #[tokio::test]
    async fn test_receipt_after_failed_polls() {
        let hash = B256::repeat_byte(7);
        let mut answers: VecDeque<Result<Option<u64>, &str>> =
            VecDeque::from([Err("connection reset"), Ok(None), Err("timeout"), Ok(Some(21_000))]);
        let mut polls = 0;

        let receipt = await_receipt(hash, fast_polling(), || {
            polls += 1;
            let answer = answers.pop_front().unwrap();
            async move { answer }
        })
        .await
        .unwrap();

        assert_eq!(receipt, 21_000);
        assert_eq!(polls, 4);
    }

    #[tokio::test]
    async fn test_repeated_poll_failures_leave_tx_unconfirmed() {
        let hash = B256::repeat_byte(7);
        let mut polls = 0;

        let err = await_receipt::<u64, _, _, _>(hash, fast_polling(), || {
            polls += 1;
            async { Err("connection refused") }
        })
        .await
        .unwrap_err();

        assert_eq!(polls, 3);
        assert_eq!(err.unconfirmed_hash(), Some(hash));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_never_mined_leaves_tx_unconfirmed() {
        let hash = B256::repeat_byte(9);
        let err = await_receipt::<u64, &str, _, _>(hash, fast_polling(), || async { Ok(None) })
            .await
            .unwrap_err();
        assert_eq!(err.unconfirmed_hash(), Some(hash));
    }

    #[tokio::test]
    #[ignore] // Requires a local dev node
    async fn test_sender_against_dev_node() {
        // Well-known dev account key
        let key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
        let sender = TransactionSender::new(key, "http://localhost:8545", Some(31337))
            .await
            .unwrap();
        assert_eq!(
            sender.address,
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse::<Address>().unwrap()
        );
    }
}
