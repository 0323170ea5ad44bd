//! Keeper execution core.
//!
//! This crate provides the keeper's run pipeline:
//! - Price reading with bounds and staleness checks (fail closed)
//! - Tail-first discovery of liquidatable positions in the sorted list
//! - Job building and the per-job execution state machine
//!   (gas-ceiling shrink, spend ceiling, bounded retry, dry-run)
//! - Fee plan resolution (overrides, EIP-1559, legacy)
//! - Hinted redemption after liquidations
//! - The run loop with its requeue discipline and run snapshots
//!
//! Chain access goes through the traits in `keeper_chain`.

pub mod config;
mod executor;
mod fee;
mod jobs;
mod keeper;
mod price;
mod reason;
mod redemption;
mod scanner;
mod snapshot;
pub mod u256_math;

#[cfg(test)]
mod testing;

pub use config::{load_config, ConfigError, ConnectionSettings, KeeperConfig, RawKeeperConfig};
pub use executor::{CallOutcome, ExecutionEngine, ExecutionPolicy, ExecutionResult, SpendTracker};
pub use fee::{resolve_fee, FeeOverrides, FeeResolver};
pub use jobs::{build_jobs, Job};
pub use keeper::{Keeper, RunOutcome, RunSummary};
pub use price::{PriceBounds, PriceReader, PriceRejection, PriceSample, PriceSource};
pub use reason::ReasonCode;
pub use redemption::{RedemptionPlanner, RedemptionReport, RedemptionSettings};
pub use scanner::{Candidate, DiscoveryResult, PositionScanner, ScanLimits, ScanStats};
pub use snapshot::SnapshotWriter;
