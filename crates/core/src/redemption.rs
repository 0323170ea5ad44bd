//! Hinted redemption of the stable asset, run after liquidations.

use alloy::primitives::{Address, B256, U256};
use keeper_chain::{HintSource, KeeperCall, KeeperGateway, RedemptionCall};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::executor::{CallOutcome, ExecutionEngine, SpendTracker};
use crate::reason::ReasonCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedemptionSettings {
    /// Stable asset amount, 1e18 scaled
    pub amount: U256,
    pub max_iterations: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RedemptionReport {
    pub requested: U256,
    /// Amount after the hint helper's truncation
    pub amount: U256,
    pub approve_tx: Option<B256>,
    pub tx_hash: Option<B256>,
    pub job_id: Option<U256>,
    pub cost: U256,
    pub dry_run: bool,
    pub reason: Option<ReasonCode>,
}

impl RedemptionReport {
    pub fn is_confirmed(&self) -> bool {
        self.tx_hash.is_some() && self.reason.is_none()
    }

    fn aborted(mut self, reason: ReasonCode) -> Self {
        warn!(event = "job_skip", call = "redeem", reason = %reason, "Redemption aborted");
        self.reason = Some(reason);
        self
    }
}

pub struct RedemptionPlanner {
    hints: Arc<dyn HintSource>,
    gateway: Arc<dyn KeeperGateway>,
    stable_token: Address,
    settings: RedemptionSettings,
}

impl RedemptionPlanner {
    pub fn new(
        hints: Arc<dyn HintSource>,
        gateway: Arc<dyn KeeperGateway>,
        stable_token: Address,
        settings: RedemptionSettings,
    ) -> Self {
        Self {
            hints,
            gateway,
            stable_token,
            settings,
        }
    }

    /// Resolve hints, top up the allowance if short, then redeem.
    pub async fn run(
        &self,
        engine: &ExecutionEngine,
        price: U256,
        tracker: &mut SpendTracker,
    ) -> RedemptionReport {
        let mut report = RedemptionReport {
            requested: self.settings.amount,
            dry_run: engine.policy().dry_run,
            ..Default::default()
        };

        let hints = match self
            .hints
            .redemption_hints(self.settings.amount, price, self.settings.max_iterations)
            .await
        {
            Ok(hints) => hints,
            Err(e) => {
                warn!(error = %e, "Redemption hints unavailable");
                return report.aborted(ReasonCode::EstimateFailed);
            }
        };
        report.amount = hints.truncated_amount;
        if hints.truncated_amount.is_zero() {
            return report.aborted(ReasonCode::NothingToRedeem);
        }

        // Both sides start at the first hint; the list walk finds the slot
        let (upper_hint, lower_hint) = match self
            .hints
            .insert_position(hints.partial_nicr, hints.first_hint, hints.first_hint)
            .await
        {
            Ok(position) => position,
            Err(e) => {
                warn!(error = %e, "Insert position lookup failed");
                return report.aborted(ReasonCode::EstimateFailed);
            }
        };

        info!(
            event = "redemption_plan",
            requested = %self.settings.amount,
            amount = %hints.truncated_amount,
            first_hint = %hints.first_hint,
            upper_hint = %upper_hint,
            lower_hint = %lower_hint,
            partial_nicr = %hints.partial_nicr,
            max_iterations = self.settings.max_iterations,
            "Redemption planned"
        );

        let allowance = match self.gateway.allowance(self.stable_token).await {
            Ok(allowance) => allowance,
            Err(e) => {
                warn!(token = %self.stable_token, error = %e, "Allowance read failed");
                return report.aborted(ReasonCode::AllowanceFailed);
            }
        };
        if allowance < hints.truncated_amount {
            let approve = KeeperCall::Approve {
                token: self.stable_token,
                amount: hints.truncated_amount,
            };
            let outcome = engine.execute_call(&approve, tracker).await;
            report.approve_tx = outcome.tx_hash();
            report.cost += outcome.cost();
            if !outcome.is_confirmed() {
                warn!(
                    allowance = %allowance,
                    needed = %hints.truncated_amount,
                    outcome = ?outcome.reason(),
                    "Approval not confirmed"
                );
                return report.aborted(ReasonCode::AllowanceFailed);
            }
        }

        let redeem = KeeperCall::Redeem(RedemptionCall {
            amount: hints.truncated_amount,
            first_hint: hints.first_hint,
            upper_hint,
            lower_hint,
            partial_nicr: hints.partial_nicr,
            max_iterations: self.settings.max_iterations,
        });

        match engine.execute_call(&redeem, tracker).await {
            CallOutcome::Confirmed(o) => {
                report.tx_hash = Some(o.tx_hash);
                report.job_id = o.job_id;
                report.cost += o.cost();
                report
            }
            CallOutcome::Reverted(o) => {
                report.tx_hash = Some(o.tx_hash);
                report.cost += o.cost();
                report.aborted(ReasonCode::TxReverted)
            }
            CallOutcome::Unconfirmed { tx_hash, charged } => {
                report.tx_hash = Some(tx_hash);
                report.cost += charged;
                report.aborted(ReasonCode::TxUnconfirmed)
            }
            CallOutcome::DryRun => report,
            CallOutcome::Skipped(reason) => report.aborted(reason),
        }
    }
}
