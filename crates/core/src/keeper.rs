//! One keeper run: price, balance check, scan, jobs, requeue, redemption.
//!
//! Jobs run strictly one after another. The signer's nonce and the run's
//! spend tracker both need serialized access, and one price sample is
//! shared by every job in the run.

use alloy::primitives::{Address, U256};
use chrono::Utc;
use keeper_chain::{HintSource, KeeperGateway, NetworkFees, PriceFeed, SortedPositions};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::KeeperConfig;
use crate::executor::{ExecutionEngine, ExecutionResult, SpendTracker};
use crate::fee::FeeResolver;
use crate::jobs::{build_jobs, Job};
use crate::price::{PriceReader, PriceSample};
use crate::reason::ReasonCode;
use crate::redemption::{RedemptionPlanner, RedemptionReport};
use crate::scanner::{PositionScanner, ScanStats};
use crate::snapshot::SnapshotWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Aborted { reason: ReasonCode },
}

/// Everything one run did, logged as `run_summary` and appended to the
/// snapshot file.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: u64,
    pub profile: String,
    pub dry_run: bool,
    pub outcome: RunOutcome,
    pub price: Option<PriceSample>,
    pub scan: Option<ScanStats>,
    pub jobs_built: usize,
    /// One entry per execution attempt, requeues included
    pub jobs: Vec<ExecutionResult>,
    pub requeued: usize,
    pub suppressed: usize,
    /// Borrowers whose transaction was attempted
    pub processed: usize,
    /// Liquidations the wrapper reported as successful
    pub succeeded: u64,
    pub spent_wei: U256,
    pub redemption: Option<RedemptionReport>,
    pub duration_ms: u64,
}

impl RunSummary {
    fn new(started_at: u64, config: &KeeperConfig) -> Self {
        Self {
            started_at,
            profile: config.profile.clone(),
            dry_run: config.dry_run,
            outcome: RunOutcome::Completed,
            price: None,
            scan: None,
            jobs_built: 0,
            jobs: Vec::new(),
            requeued: 0,
            suppressed: 0,
            processed: 0,
            succeeded: 0,
            spent_wei: U256::ZERO,
            redemption: None,
            duration_ms: 0,
        }
    }

    fn record(&mut self, result: &ExecutionResult) {
        self.processed += result.processed.len();
        self.succeeded += result.succeeded.unwrap_or(0);
        self.jobs.push(result.clone());
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, RunOutcome::Aborted { .. })
    }
}

pub struct Keeper {
    config: KeeperConfig,
    price: PriceReader,
    scanner: PositionScanner,
    engine: ExecutionEngine,
    gateway: Arc<dyn KeeperGateway>,
    redemption: Option<RedemptionPlanner>,
    snapshot: Option<SnapshotWriter>,
}

impl Keeper {
    pub fn new(
        config: KeeperConfig,
        feed: Arc<dyn PriceFeed>,
        positions: Arc<dyn SortedPositions>,
        gateway: Arc<dyn KeeperGateway>,
        fees: Arc<dyn NetworkFees>,
    ) -> Self {
        let price = PriceReader::new(feed, config.price_bounds, config.max_price_age);
        let engine = ExecutionEngine::new(
            gateway.clone(),
            FeeResolver::new(fees, config.fee_overrides),
            config.execution_policy(),
        );
        let snapshot = config.snapshot_path.clone().map(SnapshotWriter::new);

        Self {
            price,
            scanner: PositionScanner::new(positions),
            engine,
            gateway,
            redemption: None,
            snapshot,
            config,
        }
    }

    /// Enable post-liquidation redemption, if the config asks for it.
    pub fn with_redemption(mut self, hints: Arc<dyn HintSource>, stable_token: Address) -> Self {
        if let Some(settings) = self.config.redemption {
            self.redemption = Some(RedemptionPlanner::new(
                hints,
                self.gateway.clone(),
                stable_token,
                settings,
            ));
        }
        self
    }

    pub fn config(&self) -> &KeeperConfig {
        &self.config
    }

    pub async fn run_once(&self) -> RunSummary {
        let now = Utc::now().timestamp().max(0) as u64;
        self.run_once_at(now).await
    }

    /// Run once against a given wall-clock time (unix seconds).
    pub async fn run_once_at(&self, now: u64) -> RunSummary {
        let start = Instant::now();
        let mut summary = RunSummary::new(now, &self.config);

        info!(
            event = "run_start",
            profile = %self.config.profile,
            dry_run = self.config.dry_run,
            now = now,
            "Keeper run started"
        );

        if let Err(reason) = self.execute(now, &mut summary).await {
            summary.outcome = RunOutcome::Aborted { reason };
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;
        self.finish(&summary);
        summary
    }

    async fn execute(&self, now: u64, summary: &mut RunSummary) -> Result<(), ReasonCode> {
        // Fail closed: nothing below runs on an unverified price
        let price = match self.price.read_price(now).await {
            Ok(sample) => sample,
            Err(rejection) => {
                warn!(
                    event = "price_rejected",
                    reason = %rejection.reason(),
                    detail = %rejection,
                    "Price rejected, run aborted"
                );
                return Err(rejection.reason());
            }
        };
        summary.price = Some(price);

        self.check_balance().await?;

        let discovery = match self
            .scanner
            .scan(price.value_e18, &self.config.scan_limits())
            .await
        {
            Ok(discovery) => discovery,
            Err(e) => {
                error!(reason = %ReasonCode::ScanFailed, error = %e, "Scan failed, run aborted");
                return Err(ReasonCode::ScanFailed);
            }
        };
        let stats = discovery.stats;
        summary.scan = Some(stats);
        info!(
            event = "scan_complete",
            price = %price.value_e18,
            scanned = stats.scanned,
            liquidatable = stats.liquidatable,
            below_threshold = stats.below_threshold,
            early_exit = stats.early_exit,
            capped = stats.capped,
            cycle_detected = stats.cycle_detected,
            "Scan complete"
        );

        let jobs = build_jobs(
            &discovery.liquidatable,
            self.config.max_per_job,
            self.config.enable_fallback,
        );
        summary.jobs_built = jobs.len();
        info!(
            event = "jobs_built",
            jobs = jobs.len(),
            candidates = discovery.liquidatable.len(),
            max_per_job = self.config.max_per_job,
            "Jobs built"
        );

        let mut tracker = SpendTracker::new();
        self.drain(jobs, &mut tracker, summary).await;

        if let Some(planner) = &self.redemption {
            summary.redemption = Some(planner.run(&self.engine, price.value_e18, &mut tracker).await);
        }

        summary.spent_wei = tracker.spent();
        Ok(())
    }

    async fn check_balance(&self) -> Result<(), ReasonCode> {
        let Some(min) = self.config.min_signer_balance else {
            return Ok(());
        };
        match self.gateway.signer_balance().await {
            Ok(Some(balance)) if balance < min => {
                warn!(
                    reason = %ReasonCode::LowBalance,
                    balance_wei = %balance,
                    min_wei = %min,
                    "Signer balance below minimum, run skipped"
                );
                Err(ReasonCode::LowBalance)
            }
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(reason = %ReasonCode::LowBalance, error = %e, "Balance read failed, run skipped");
                Err(ReasonCode::LowBalance)
            }
        }
    }

    /// Execute jobs until the queue is empty.
    ///
    /// A job that comes back whole is requeued once at the back; the second
    /// time its exact borrower set is seen it is dropped. A shrink suffix is
    /// new work and goes to the front.
    async fn drain(&self, jobs: Vec<Job>, tracker: &mut SpendTracker, summary: &mut RunSummary) {
        let mut queue: VecDeque<Job> = jobs.into();
        let mut skipped: HashSet<Vec<Address>> = HashSet::new();

        while let Some(job) = queue.pop_front() {
            let result = self.engine.execute_job(&job, tracker).await;
            summary.record(&result);

            if result.leftover.is_empty() {
                continue;
            }

            if result.processed.is_empty() && result.leftover == job.borrowers {
                if skipped.insert(result.leftover.clone()) {
                    info!(
                        event = "job_requeue",
                        borrowers = job.len(),
                        reason = ?result.reason,
                        position = "back",
                        "Job requeued"
                    );
                    summary.requeued += 1;
                    queue.push_back(job);
                } else {
                    warn!(
                        event = "requeue_suppressed",
                        borrowers = job.len(),
                        reason = ?result.reason,
                        "Job already skipped this run, dropped"
                    );
                    summary.suppressed += 1;
                }
            } else {
                info!(
                    event = "job_requeue",
                    borrowers = result.leftover.len(),
                    reason = ?result.reason,
                    position = "front",
                    "Shrink suffix requeued"
                );
                summary.requeued += 1;
                queue.push_front(Job::new(result.leftover, job.fallback_on_fail));
            }
        }
    }

    fn finish(&self, summary: &RunSummary) {
        let reason = match summary.outcome {
            RunOutcome::Aborted { reason } => Some(reason),
            RunOutcome::Completed => None,
        };
        info!(
            event = "run_summary",
            outcome = if reason.is_some() { "aborted" } else { "completed" },
            reason = ?reason,
            scanned = summary.scan.map(|s| s.scanned).unwrap_or(0),
            liquidatable = summary.scan.map(|s| s.liquidatable).unwrap_or(0),
            jobs_built = summary.jobs_built,
            attempts = summary.jobs.len(),
            requeued = summary.requeued,
            suppressed = summary.suppressed,
            processed = summary.processed,
            succeeded = summary.succeeded,
            spent_wei = %summary.spent_wei,
            redemption = ?summary.redemption.as_ref().map(|r| r.reason),
            duration_ms = summary.duration_ms,
            "Keeper run finished"
        );

        if let Some(snapshot) = &self.snapshot {
            if let Err(e) = snapshot.append(summary) {
                warn!(path = %snapshot.path().display(), error = %e, "Snapshot write failed");
            }
        }
    }
}
