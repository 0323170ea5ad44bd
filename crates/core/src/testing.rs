//! In-memory chain doubles for engine tests.

use alloy::primitives::{Address, B256, U256};
use anyhow::Result;
use async_trait::async_trait;
use keeper_chain::{
    ChainError, ChainResult, FeePlan, GasParams, HintSource, KeeperCall, KeeperGateway,
    NetworkFees, PriceFeed, RedemptionHints, RoundData, SortedPositions, TxOutcome,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;

pub fn addr(n: u64) -> Address {
    let mut bytes = [0u8; 20];
    bytes[12..].copy_from_slice(&n.to_be_bytes());
    Address::from(bytes)
}

pub fn addrs(range: std::ops::Range<u64>) -> Vec<Address> {
    range.map(addr).collect()
}

/// Ratio helper: percent to 1e18 fixed point.
pub fn pct(p: u64) -> U256 {
    U256::from(p) * U256::from(10_000_000_000_000_000u64)
}

// ============================================================================
// Price feed
// ============================================================================

#[derive(Debug, Default)]
pub struct MockFeed {
    pub round: Option<RoundData>,
    pub fetch: Option<U256>,
    pub fetch_calls: Mutex<usize>,
}

impl MockFeed {
    /// Round with an 8-decimal answer in whole USD.
    pub fn round(usd: u64, updated_at: u64) -> Self {
        Self {
            round: Some(RoundData {
                round_id: 1,
                answer: U256::from(usd) * U256::from(100_000_000u64),
                decimals: 8,
                started_at: updated_at,
                updated_at,
                answered_in_round: 1,
            }),
            ..Default::default()
        }
    }

    pub fn with_fetch(mut self, price: U256) -> Self {
        self.fetch = Some(price);
        self
    }
}

#[async_trait]
impl PriceFeed for MockFeed {
    async fn latest_round(&self) -> Result<RoundData> {
        self.round
            .clone()
            .ok_or_else(|| anyhow::anyhow!("round read failed"))
    }

    async fn fetch_price(&self) -> Result<U256> {
        *self.fetch_calls.lock() += 1;
        self.fetch.ok_or_else(|| anyhow::anyhow!("fetchPrice failed"))
    }
}

// ============================================================================
// Sorted list
// ============================================================================

/// Sorted list held as tail-first order plus explicit `prev` links.
#[derive(Debug, Default)]
pub struct MockList {
    pub tail: Option<Address>,
    pub prev: HashMap<Address, Address>,
    pub ratios: HashMap<Address, U256>,
    pub fail_ratio_for: Option<Address>,
    pub visits: Mutex<Vec<Address>>,
}

impl MockList {
    /// Build from ratios listed tail first (riskiest first).
    pub fn from_tail(entries: &[(Address, U256)]) -> Self {
        let mut list = Self {
            tail: entries.first().map(|(a, _)| *a),
            ..Default::default()
        };
        for (i, (id, ratio)) in entries.iter().enumerate() {
            list.ratios.insert(*id, *ratio);
            let prev = entries.get(i + 1).map(|(a, _)| *a).unwrap_or(Address::ZERO);
            list.prev.insert(*id, prev);
        }
        list
    }

    pub fn visited(&self) -> Vec<Address> {
        self.visits.lock().clone()
    }
}

#[async_trait]
impl SortedPositions for MockList {
    async fn last(&self) -> Result<Option<Address>> {
        Ok(self.tail)
    }

    async fn prev(&self, id: Address) -> Result<Option<Address>> {
        Ok(self
            .prev
            .get(&id)
            .copied()
            .filter(|a| *a != Address::ZERO))
    }

    async fn ratio(&self, id: Address, _price: U256) -> Result<U256> {
        self.visits.lock().push(id);
        if self.fail_ratio_for == Some(id) {
            anyhow::bail!("rpc timeout");
        }
        self.ratios
            .get(&id)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("unknown borrower"))
    }
}

// ============================================================================
// Hints
// ============================================================================

#[derive(Debug)]
pub struct MockHints {
    pub hints: RedemptionHints,
    pub position: (Address, Address),
    pub fail: bool,
}

#[async_trait]
impl HintSource for MockHints {
    async fn redemption_hints(
        &self,
        _amount: U256,
        _price: U256,
        _max_iterations: u64,
    ) -> Result<RedemptionHints> {
        if self.fail {
            anyhow::bail!("hint helper unavailable");
        }
        Ok(self.hints)
    }

    async fn insert_position(
        &self,
        _nicr: U256,
        _prev: Address,
        _next: Address,
    ) -> Result<(Address, Address)> {
        Ok(self.position)
    }
}

// ============================================================================
// Network fees
// ============================================================================

#[derive(Debug, Default)]
pub struct MockFees {
    pub dynamic: Option<GasParams>,
    pub legacy: Option<u128>,
    /// Served before `legacy`, one per call
    pub legacy_queue: Mutex<VecDeque<u128>>,
    pub dynamic_calls: Mutex<usize>,
    pub legacy_calls: Mutex<usize>,
}

impl MockFees {
    pub fn dynamic(max_fee: u128, priority: u128) -> Self {
        Self {
            dynamic: Some(GasParams::Eip1559 {
                max_fee_per_gas: max_fee,
                max_priority_fee_per_gas: priority,
                base_fee: max_fee.saturating_sub(priority) / 2,
            }),
            ..Default::default()
        }
    }

    pub fn legacy(gas_price: u128) -> Self {
        Self {
            legacy: Some(gas_price),
            ..Default::default()
        }
    }

    /// Legacy prices in call order; the last one repeats.
    pub fn legacy_sequence(prices: &[u128]) -> Self {
        Self {
            legacy: prices.last().copied(),
            legacy_queue: Mutex::new(prices.iter().copied().collect()),
            ..Default::default()
        }
    }

    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> (usize, usize) {
        (*self.dynamic_calls.lock(), *self.legacy_calls.lock())
    }
}

#[async_trait]
impl NetworkFees for MockFees {
    async fn dynamic_estimate(&self) -> Result<GasParams> {
        *self.dynamic_calls.lock() += 1;
        self.dynamic
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no base fee"))
    }

    async fn legacy_estimate(&self) -> Result<u128> {
        *self.legacy_calls.lock() += 1;
        if let Some(price) = self.legacy_queue.lock().pop_front() {
            return Ok(price);
        }
        self.legacy.ok_or_else(|| anyhow::anyhow!("gas price unavailable"))
    }
}

// ============================================================================
// Gateway
// ============================================================================

type EstimateFn = Box<dyn Fn(&KeeperCall) -> ChainResult<u64> + Send + Sync>;

/// Gateway double. Estimates come from a closure; submissions pop scripted
/// results and otherwise succeed using the full gas limit.
pub struct MockGateway {
    estimate: EstimateFn,
    pub scripted: Mutex<VecDeque<ChainResult<TxOutcome>>>,
    pub estimates: Mutex<Vec<KeeperCall>>,
    pub submitted: Mutex<Vec<(KeeperCall, u64, FeePlan)>>,
    pub signer: bool,
    pub balance: U256,
    pub allowance: U256,
    next_job_id: Mutex<u64>,
}

impl MockGateway {
    /// Liquidations cost `per_borrower` gas each; other calls cost 60k.
    pub fn per_borrower(per_borrower: u64) -> Self {
        Self::with_estimate(move |call| match call {
            KeeperCall::Liquidate { borrowers, .. } => Ok(per_borrower * borrowers.len() as u64),
            _ => Ok(60_000),
        })
    }

    pub fn with_estimate<F>(f: F) -> Self
    where
        F: Fn(&KeeperCall) -> ChainResult<u64> + Send + Sync + 'static,
    {
        Self {
            estimate: Box::new(f),
            scripted: Mutex::new(VecDeque::new()),
            estimates: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            signer: true,
            balance: U256::from(10u64).pow(U256::from(18)),
            allowance: U256::ZERO,
            next_job_id: Mutex::new(1),
        }
    }

    pub fn script(&self, result: ChainResult<TxOutcome>) {
        self.scripted.lock().push_back(result);
    }

    pub fn submit_count(&self) -> usize {
        self.submitted.lock().len()
    }

    pub fn estimate_count(&self) -> usize {
        self.estimates.lock().len()
    }

    pub fn submitted_calls(&self) -> Vec<KeeperCall> {
        self.submitted.lock().iter().map(|(c, _, _)| c.clone()).collect()
    }
}

impl fmt::Debug for MockGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockGateway")
            .field("submitted", &self.submit_count())
            .finish_non_exhaustive()
    }
}

/// A mined outcome with the given receipt data.
pub fn outcome(success: bool, gas_used: u64, price: u128, succeeded: Option<u64>) -> TxOutcome {
    TxOutcome {
        tx_hash: B256::repeat_byte(0xab),
        success,
        gas_used,
        effective_gas_price: price,
        job_id: Some(U256::from(42u64)),
        succeeded,
    }
}

pub fn transport_error() -> ChainError {
    ChainError::Transport("connection reset by peer".into())
}

pub fn unconfirmed_error() -> ChainError {
    ChainError::Unconfirmed {
        tx_hash: B256::repeat_byte(0xcd),
        reason: "receipt poll failed 5 times".into(),
    }
}

pub fn revert_error() -> ChainError {
    ChainError::Revert("execution reverted".into())
}

#[async_trait]
impl KeeperGateway for MockGateway {
    async fn estimate_gas(&self, call: &KeeperCall) -> ChainResult<u64> {
        self.estimates.lock().push(call.clone());
        (self.estimate)(call)
    }

    async fn submit(&self, call: &KeeperCall, gas_limit: u64, fee: &FeePlan) -> ChainResult<TxOutcome> {
        self.submitted
            .lock()
            .push((call.clone(), gas_limit, fee.clone()));

        if let Some(result) = self.scripted.lock().pop_front() {
            return result;
        }

        let succeeded = match call {
            KeeperCall::Liquidate { borrowers, .. } => Some(borrowers.len() as u64),
            _ => None,
        };
        let mut id = self.next_job_id.lock();
        let job_id = *id;
        *id += 1;

        Ok(TxOutcome {
            tx_hash: B256::left_padding_from(&job_id.to_be_bytes()),
            success: true,
            gas_used: gas_limit,
            effective_gas_price: fee.price_per_gas().unwrap_or(1),
            job_id: Some(U256::from(job_id)),
            succeeded,
        })
    }

    fn has_signer(&self) -> bool {
        self.signer
    }

    async fn signer_balance(&self) -> ChainResult<Option<U256>> {
        Ok(self.signer.then_some(self.balance))
    }

    async fn allowance(&self, _token: Address) -> ChainResult<U256> {
        Ok(self.allowance)
    }
}
