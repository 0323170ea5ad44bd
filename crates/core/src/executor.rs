//! Execution engine: one job at a time, from planning to a terminal state.
//!
//! ```text
//! PLANNING -> (SHRINK)* -> ESTIMATING -> SUBMITTING -> CONFIRMING
//!                                            ^             |
//!                                            +--- RETRY <--+--> CONFIRMED | ABORTED
//! ```
//!
//! Planning resolves the fee plan. Estimation runs on the whole batch and
//! halves it while the buffered estimate is above the gas ceiling; the
//! dropped suffix goes back to the caller as leftover. The spend ceiling is
//! checked against `gas_limit x price_per_gas`, which bounds the receipt's
//! actual cost, so confirmed spend can never pass the ceiling.
//!
//! Only transport failures before broadcast are retried. The first retry
//! re-estimates gas and re-resolves the fee plan; later retries reuse it.
//! A broadcast transaction whose receipt never arrives is not resent; its
//! worst-case cost is charged instead.

use alloy::primitives::{Address, B256, U256};
use keeper_chain::{ChainError, FeePlan, KeeperCall, KeeperGateway, TxOutcome};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::fee::FeeResolver;
use crate::jobs::Job;
use crate::reason::ReasonCode;
use crate::u256_math::{projected_cost, with_buffer};

/// Backoff doubles per attempt up to this factor.
const MAX_BACKOFF_FACTOR: u32 = 8;

#[derive(Debug, Clone)]
pub struct ExecutionPolicy {
    pub gas_ceiling: Option<u64>,
    /// Wei, per run
    pub spend_ceiling: Option<U256>,
    pub gas_buffer_pct: u32,
    pub max_tx_retries: u32,
    pub retry_backoff: Duration,
    pub dry_run: bool,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            gas_ceiling: None,
            spend_ceiling: None,
            gas_buffer_pct: 20,
            max_tx_retries: 2,
            retry_backoff: Duration::from_millis(500),
            dry_run: false,
        }
    }
}

/// Run-scoped native spend, charged from receipts only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpendTracker {
    spent_wei: U256,
}

impl SpendTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spent(&self) -> U256 {
        self.spent_wei
    }

    fn record(&mut self, cost: U256) {
        self.spent_wei = self.spent_wei.saturating_add(cost);
    }
}

/// Outcome of one liquidation job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// Borrowers whose transaction was attempted (or simulated in dry-run)
    pub processed: Vec<Address>,
    pub leftover: Vec<Address>,
    pub tx_hash: Option<B256>,
    pub job_id: Option<U256>,
    /// Positions the wrapper reports as liquidated
    pub succeeded: Option<u64>,
    /// Why there is leftover, or why the outcome is unknown
    pub reason: Option<ReasonCode>,
    /// Wei charged to the spend tracker
    pub cost: U256,
    pub dry_run: bool,
}

/// Outcome of a single unshrinkable call (approve, redeem).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Confirmed(TxOutcome),
    /// Mined with a failed status; cost was charged
    Reverted(TxOutcome),
    /// Broadcast without a receipt; the worst case was charged
    Unconfirmed { tx_hash: B256, charged: U256 },
    DryRun,
    Skipped(ReasonCode),
}

impl CallOutcome {
    pub fn tx_hash(&self) -> Option<B256> {
        match self {
            CallOutcome::Confirmed(o) | CallOutcome::Reverted(o) => Some(o.tx_hash),
            CallOutcome::Unconfirmed { tx_hash, .. } => Some(*tx_hash),
            _ => None,
        }
    }

    /// Wei charged to the spend tracker.
    pub fn cost(&self) -> U256 {
        match self {
            CallOutcome::Confirmed(o) | CallOutcome::Reverted(o) => o.cost(),
            CallOutcome::Unconfirmed { charged, .. } => *charged,
            _ => U256::ZERO,
        }
    }

    pub fn reason(&self) -> Option<ReasonCode> {
        match self {
            CallOutcome::Reverted(_) => Some(ReasonCode::TxReverted),
            CallOutcome::Unconfirmed { .. } => Some(ReasonCode::TxUnconfirmed),
            CallOutcome::Skipped(r) => Some(*r),
            _ => None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, CallOutcome::Confirmed(_))
    }
}

#[derive(Debug, Clone)]
struct Planned {
    gas_limit: u64,
    fee: FeePlan,
}

#[derive(Debug)]
enum Settled {
    Mined(TxOutcome),
    Reverted(TxOutcome),
    Unconfirmed { tx_hash: B256, charged: U256 },
    DryRun,
}

pub struct ExecutionEngine {
    gateway: Arc<dyn KeeperGateway>,
    fees: FeeResolver,
    policy: ExecutionPolicy,
}

impl ExecutionEngine {
    pub fn new(gateway: Arc<dyn KeeperGateway>, fees: FeeResolver, policy: ExecutionPolicy) -> Self {
        Self {
            gateway,
            fees,
            policy,
        }
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// Execute one liquidation job.
    pub async fn execute_job(&self, job: &Job, tracker: &mut SpendTracker) -> ExecutionResult {
        let fee = match self.plan_fee().await {
            Ok(fee) => fee,
            Err(reason) => return self.skip_job(job, reason),
        };

        let mut batch = job.borrowers.clone();
        let mut shrink_reason = None;

        let (call, gas_limit) = loop {
            let call = KeeperCall::liquidate(batch.clone(), job.fallback_on_fail);
            let next_len = batch.len() / 2;

            match self.estimate(&call).await {
                Ok(gas) if self.exceeds_gas_ceiling(gas) => {
                    if batch.len() == 1 {
                        return self.skip_job(job, ReasonCode::GasCeiling);
                    }
                    info!(
                        event = "job_shrink",
                        reason = %ReasonCode::GasCeiling,
                        from = batch.len(),
                        to = next_len,
                        gas = gas,
                        gas_ceiling = ?self.policy.gas_ceiling,
                        "Batch over gas ceiling, halving"
                    );
                    batch.truncate(next_len);
                    shrink_reason = Some(ReasonCode::GasCeiling);
                }
                Ok(gas) => break (call, gas),
                Err(ReasonCode::EstimateRevert) if job.fallback_on_fail && batch.len() > 1 => {
                    info!(
                        event = "job_shrink",
                        reason = %ReasonCode::EstimateRevert,
                        from = batch.len(),
                        to = next_len,
                        "Batch estimate reverted, halving"
                    );
                    batch.truncate(next_len);
                    shrink_reason = Some(ReasonCode::EstimateRevert);
                }
                Err(reason) => return self.skip_job(job, reason),
            }
        };

        let planned = Planned { gas_limit, fee };
        if let Err(reason) = self.check_spend(&planned, tracker) {
            return self.skip_job(job, reason);
        }
        self.log_plan(&call, &planned, job.len() - batch.len(), tracker);

        let leftover = job.borrowers[batch.len()..].to_vec();
        let reason = if leftover.is_empty() { None } else { shrink_reason };

        match self.settle(&call, planned, tracker).await {
            Ok(Settled::DryRun) => ExecutionResult {
                processed: batch,
                leftover,
                reason,
                dry_run: true,
                ..Default::default()
            },
            Ok(Settled::Mined(outcome)) => ExecutionResult {
                processed: batch,
                leftover,
                tx_hash: Some(outcome.tx_hash),
                job_id: outcome.job_id,
                succeeded: outcome.succeeded,
                reason,
                cost: outcome.cost(),
                dry_run: false,
            },
            Ok(Settled::Reverted(outcome)) => ExecutionResult {
                tx_hash: Some(outcome.tx_hash),
                cost: outcome.cost(),
                ..self.skip_job(job, ReasonCode::TxReverted)
            },
            // Attempted: it may still land, so it is not handed back
            Ok(Settled::Unconfirmed { tx_hash, charged }) => ExecutionResult {
                processed: batch,
                leftover,
                tx_hash: Some(tx_hash),
                reason: Some(ReasonCode::TxUnconfirmed),
                cost: charged,
                ..Default::default()
            },
            Err(reason) => self.skip_job(job, reason),
        }
    }

    /// Execute a single call through the same fee/gas/spend/retry path,
    /// without shrinking.
    pub async fn execute_call(&self, call: &KeeperCall, tracker: &mut SpendTracker) -> CallOutcome {
        let planned = match self.plan_call(call, tracker).await {
            Ok(planned) => planned,
            Err(reason) => {
                log_skip(call.kind(), 1, reason);
                return CallOutcome::Skipped(reason);
            }
        };
        self.log_plan(call, &planned, 0, tracker);

        match self.settle(call, planned, tracker).await {
            Ok(Settled::Mined(outcome)) => CallOutcome::Confirmed(outcome),
            Ok(Settled::Reverted(outcome)) => {
                log_skip(call.kind(), 1, ReasonCode::TxReverted);
                CallOutcome::Reverted(outcome)
            }
            Ok(Settled::Unconfirmed { tx_hash, charged }) => {
                log_skip(call.kind(), 1, ReasonCode::TxUnconfirmed);
                CallOutcome::Unconfirmed { tx_hash, charged }
            }
            Ok(Settled::DryRun) => CallOutcome::DryRun,
            Err(reason) => {
                log_skip(call.kind(), 1, reason);
                CallOutcome::Skipped(reason)
            }
        }
    }

    async fn plan_call(&self, call: &KeeperCall, tracker: &SpendTracker) -> Result<Planned, ReasonCode> {
        let fee = self.plan_fee().await?;
        let gas_limit = self.estimate(call).await?;
        if self.exceeds_gas_ceiling(gas_limit) {
            return Err(ReasonCode::GasCeiling);
        }
        let planned = Planned { gas_limit, fee };
        self.check_spend(&planned, tracker)?;
        Ok(planned)
    }

    async fn plan_fee(&self) -> Result<FeePlan, ReasonCode> {
        let fee = self.fees.resolve().await;
        if !fee.known && self.policy.spend_ceiling.is_some() {
            return Err(ReasonCode::FeeUnavailable);
        }
        Ok(fee)
    }

    /// Buffered gas estimate.
    async fn estimate(&self, call: &KeeperCall) -> Result<u64, ReasonCode> {
        match self.gateway.estimate_gas(call).await {
            Ok(raw) => {
                let buffered = with_buffer(raw, self.policy.gas_buffer_pct);
                debug!(call = call.kind(), raw = raw, buffered = buffered, "Gas estimated");
                Ok(buffered)
            }
            Err(e) if e.is_revert() => {
                debug!(call = call.kind(), error = %e, "Estimate reverted");
                Err(ReasonCode::EstimateRevert)
            }
            Err(e) => {
                warn!(call = call.kind(), error = %e, "Estimate failed");
                Err(ReasonCode::EstimateFailed)
            }
        }
    }

    fn exceeds_gas_ceiling(&self, gas: u64) -> bool {
        self.policy.gas_ceiling.is_some_and(|ceiling| gas > ceiling)
    }

    fn check_spend(&self, planned: &Planned, tracker: &SpendTracker) -> Result<(), ReasonCode> {
        let Some(ceiling) = self.policy.spend_ceiling else {
            return Ok(());
        };
        let price = planned
            .fee
            .price_per_gas()
            .ok_or(ReasonCode::FeeUnavailable)?;
        let projected = projected_cost(planned.gas_limit, price);
        if tracker.spent().saturating_add(projected) > ceiling {
            debug!(
                projected_wei = %projected,
                spent_wei = %tracker.spent(),
                ceiling_wei = %ceiling,
                "Projected cost over spend ceiling"
            );
            return Err(ReasonCode::SpendCeiling);
        }
        Ok(())
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(3);
        self.policy.retry_backoff * factor.min(MAX_BACKOFF_FACTOR)
    }

    /// Submit and wait for a terminal state, retrying failures that happen
    /// before broadcast.
    async fn settle(
        &self,
        call: &KeeperCall,
        mut planned: Planned,
        tracker: &mut SpendTracker,
    ) -> Result<Settled, ReasonCode> {
        if self.policy.dry_run {
            info!(
                event = "dry_run_submit",
                call = call.kind(),
                gas_limit = planned.gas_limit,
                fee_mode = %planned.fee.mode,
                "Dry run, transaction not sent"
            );
            return Ok(Settled::DryRun);
        }

        let mut attempt = 0u32;
        loop {
            info!(
                event = "tx_submitted",
                call = call.kind(),
                attempt = attempt,
                gas_limit = planned.gas_limit,
                fee_mode = %planned.fee.mode,
                price_per_gas = ?planned.fee.price_per_gas(),
                "Submitting transaction"
            );

            match self.gateway.submit(call, planned.gas_limit, &planned.fee).await {
                Ok(outcome) => {
                    tracker.record(outcome.cost());
                    info!(
                        event = "tx_confirmed",
                        call = call.kind(),
                        tx_hash = %outcome.tx_hash,
                        success = outcome.success,
                        gas_used = outcome.gas_used,
                        cost_wei = %outcome.cost(),
                        job_id = ?outcome.job_id,
                        succeeded = ?outcome.succeeded,
                        spent_wei = %tracker.spent(),
                        "Transaction settled"
                    );
                    return Ok(if outcome.success {
                        Settled::Mined(outcome)
                    } else {
                        Settled::Reverted(outcome)
                    });
                }
                Err(ChainError::Unconfirmed { tx_hash, reason }) => {
                    // Unknown outcome: charge what it could cost at most
                    let charged = planned
                        .fee
                        .price_per_gas()
                        .map(|price| projected_cost(planned.gas_limit, price))
                        .unwrap_or(U256::ZERO);
                    tracker.record(charged);
                    warn!(
                        event = "tx_unconfirmed",
                        call = call.kind(),
                        tx_hash = %tx_hash,
                        charged_wei = %charged,
                        spent_wei = %tracker.spent(),
                        error = %reason,
                        "No receipt, not resubmitting"
                    );
                    return Ok(Settled::Unconfirmed { tx_hash, charged });
                }
                Err(e) if e.is_transient() && attempt < self.policy.max_tx_retries => {
                    attempt += 1;
                    let backoff = self.backoff(attempt);
                    warn!(
                        event = "tx_retry",
                        call = call.kind(),
                        attempt = attempt,
                        max_retries = self.policy.max_tx_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        refresh = attempt == 1,
                        error = %e,
                        "Submission failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;

                    if attempt == 1 {
                        planned = self.refresh(call, planned, tracker).await?;
                    }
                }
                Err(e) => {
                    warn!(call = call.kind(), attempt = attempt, error = %e, "Submission failed");
                    return Err(ReasonCode::SubmitFailed);
                }
            }
        }
    }

    /// Re-estimate and re-resolve before the first retry.
    async fn refresh(
        &self,
        call: &KeeperCall,
        previous: Planned,
        tracker: &SpendTracker,
    ) -> Result<Planned, ReasonCode> {
        let fee = self.plan_fee().await?;
        let gas_limit = match self.estimate(call).await {
            Ok(gas) => gas,
            // Keep the last good estimate through a transient read failure
            Err(ReasonCode::EstimateFailed) => previous.gas_limit,
            Err(reason) => return Err(reason),
        };
        if self.exceeds_gas_ceiling(gas_limit) {
            return Err(ReasonCode::GasCeiling);
        }

        let planned = Planned { gas_limit, fee };
        self.check_spend(&planned, tracker)?;
        debug!(
            gas_limit = planned.gas_limit,
            previous_gas_limit = previous.gas_limit,
            price_per_gas = ?planned.fee.price_per_gas(),
            "Plan refreshed for retry"
        );
        Ok(planned)
    }

    fn log_plan(&self, call: &KeeperCall, planned: &Planned, deferred: usize, tracker: &SpendTracker) {
        let fee = &planned.fee;
        info!(
            event = "job_plan",
            call = call.kind(),
            borrowers = call_size(call),
            deferred = deferred,
            gas_limit = planned.gas_limit,
            fee_mode = %fee.mode,
            fee_source = %fee.source,
            fee_known = fee.known,
            priority_known = fee.priority_known,
            max_fee_per_gas = ?fee.max_fee_per_gas,
            max_priority_fee_per_gas = ?fee.max_priority_fee_per_gas,
            gas_price = ?fee.gas_price,
            projected_cost_wei = ?fee.price_per_gas().map(|p| projected_cost(planned.gas_limit, p)),
            spent_wei = %tracker.spent(),
            dry_run = self.policy.dry_run,
            "Job planned"
        );
    }

    fn skip_job(&self, job: &Job, reason: ReasonCode) -> ExecutionResult {
        log_skip("liquidate", job.len(), reason);
        ExecutionResult {
            leftover: job.borrowers.clone(),
            reason: Some(reason),
            dry_run: self.policy.dry_run,
            ..Default::default()
        }
    }
}

fn call_size(call: &KeeperCall) -> usize {
    match call {
        KeeperCall::Liquidate { borrowers, .. } => borrowers.len(),
        _ => 1,
    }
}

fn log_skip(call: &str, size: usize, reason: ReasonCode) {
    warn!(
        event = "job_skip",
        call = call,
        reason = %reason,
        borrowers = size,
        "Job aborted"
    );
}
