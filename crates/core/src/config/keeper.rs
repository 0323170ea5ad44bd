//! Keeper configuration with profile support.
//!
//! The TOML surface is flat and numeric: `0` (or an absent key) disables an
//! optional ceiling. [`RawKeeperConfig::validate`] is the only place those
//! sentinels are interpreted; everything downstream sees `Option`s.
//!
//! Native and stable amounts are [`Amount`]s: a TOML number, or a decimal
//! string such as `"100.1"` that converts to wei exactly.

use alloy::primitives::utils::parse_ether;
use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::executor::ExecutionPolicy;
use crate::fee::FeeOverrides;
use crate::price::PriceBounds;
use crate::redemption::RedemptionSettings;
use crate::scanner::ScanLimits;
use crate::u256_math::{f64_to_wad, gwei_to_wei};

/// Largest accepted gas buffer percentage.
const MAX_GAS_BUFFER_PCT: u32 = 1000;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_to_scan must be greater than zero")]
    ZeroMaxToScan,

    #[error("max_per_job must be greater than zero")]
    ZeroMaxPerJob,

    #[error("min_price_usd and max_price_usd must be set together")]
    PartialPriceBounds,

    #[error("min_price_usd ({min}) is above max_price_usd ({max})")]
    InvertedPriceBounds { min: f64, max: f64 },

    #[error("{field} must be a finite, non-negative number (got {value})")]
    InvalidNumber { field: &'static str, value: f64 },

    #[error("gas_buffer_pct {0} exceeds {MAX_GAS_BUFFER_PCT}")]
    BufferTooLarge(u32),

    #[error("max_priority_fee_gwei override requires max_fee_gwei")]
    PriorityWithoutMaxFee,

    #[error("max_priority_fee_gwei ({priority}) is above max_fee_gwei ({max_fee})")]
    PriorityAboveMaxFee { priority: f64, max_fee: f64 },

    #[error("invalid address for {field}: {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Whole-unit amount with 18 decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    Number(f64),
    Text(String),
}

impl Default for Amount {
    fn default() -> Self {
        Amount::Number(0.0)
    }
}

impl From<f64> for Amount {
    fn from(value: f64) -> Self {
        Amount::Number(value)
    }
}

impl Amount {
    /// Exact wei value. Numbers go through their shortest decimal form, so
    /// `100.1` becomes 100.1e18 rather than the nearest binary fraction.
    fn to_wei(&self, field: &'static str) -> Result<U256, ConfigError> {
        let text = match self {
            Amount::Number(value) => non_negative(field, *value)?.to_string(),
            Amount::Text(text) => text.trim().to_string(),
        };
        if text.starts_with('-') {
            return Err(ConfigError::InvalidValue { field, value: text });
        }
        parse_ether(&text).map_err(|_| ConfigError::InvalidValue { field, value: text })
    }
}

/// Raw configuration as read from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawKeeperConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    /// `from` address for estimation when running without a key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keeper_address: Option<String>,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub jobs: JobConfig,

    #[serde(default)]
    pub price: PriceConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub fees: FeeConfig,

    #[serde(default)]
    pub redemption: RedemptionConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Discovery limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Hard cap on list entries visited per run
    #[serde(default = "default_max_to_scan")]
    pub max_to_scan: usize,

    /// Stop after this many entries with nothing liquidatable (0 = never)
    #[serde(default = "default_early_exit")]
    pub early_exit_threshold: usize,
}

fn default_max_to_scan() -> usize {
    200
}
fn default_early_exit() -> usize {
    25
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_to_scan: default_max_to_scan(),
            early_exit_threshold: default_early_exit(),
        }
    }
}

/// Job building.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default = "default_max_per_job")]
    pub max_per_job: usize,

    /// Ask the wrapper to fall back to per-position calls when the batch reverts
    #[serde(default = "default_enable_fallback")]
    pub enable_fallback: bool,
}

fn default_max_per_job() -> usize {
    10
}
fn default_enable_fallback() -> bool {
    true
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            max_per_job: default_max_per_job(),
            enable_fallback: default_enable_fallback(),
        }
    }
}

/// Price sanity checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceConfig {
    /// Lower bound in USD (0 = unset)
    #[serde(default)]
    pub min_price_usd: f64,

    /// Upper bound in USD (0 = unset)
    #[serde(default)]
    pub max_price_usd: f64,

    /// Maximum price age in seconds (0 = staleness not enforced)
    #[serde(default)]
    pub max_price_age_secs: u64,
}

/// Submission limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Per-job gas ceiling (0 = none)
    #[serde(default)]
    pub gas_ceiling: u64,

    /// Per-run native spend ceiling, in whole native units (0 = none)
    #[serde(default)]
    pub spend_ceiling_native: Amount,

    /// Buffer applied on top of gas estimates (percentage)
    #[serde(default = "default_gas_buffer")]
    pub gas_buffer_pct: u32,

    #[serde(default = "default_max_retries")]
    pub max_tx_retries: u32,

    /// Base retry backoff; doubles per attempt, capped at 8x
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    #[serde(default)]
    pub dry_run: bool,

    /// Minimum signer balance in native units (0 = not checked)
    #[serde(default)]
    pub min_signer_balance_native: Amount,
}

fn default_gas_buffer() -> u32 {
    20
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_backoff() -> u64 {
    500
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            gas_ceiling: 0,
            spend_ceiling_native: Amount::default(),
            gas_buffer_pct: default_gas_buffer(),
            max_tx_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff(),
            dry_run: false,
            min_signer_balance_native: Amount::default(),
        }
    }
}

/// Fee overrides and estimator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Explicit max fee per gas (0 = use network estimates)
    #[serde(default)]
    pub max_fee_gwei: f64,

    /// Explicit priority fee (0 = source from network)
    #[serde(default)]
    pub max_priority_fee_gwei: f64,

    /// Multiplier for max_fee relative to base_fee
    #[serde(default = "default_max_fee_multiplier")]
    pub eip1559_max_fee_multiplier: f64,

    /// Cap on estimated max fees (0 = uncapped)
    #[serde(default = "default_max_fee_cap")]
    pub max_fee_cap_gwei: f64,
}

fn default_max_fee_multiplier() -> f64 {
    2.0
}
fn default_max_fee_cap() -> f64 {
    500.0
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            max_fee_gwei: 0.0,
            max_priority_fee_gwei: 0.0,
            eip1559_max_fee_multiplier: default_max_fee_multiplier(),
            max_fee_cap_gwei: default_max_fee_cap(),
        }
    }
}

/// Hinted redemption after liquidations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedemptionConfig {
    /// Stable asset amount to redeem, whole units (0 = disabled)
    #[serde(default)]
    pub amount: Amount,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
}

fn default_max_iterations() -> u64 {
    50
}

impl Default for RedemptionConfig {
    fn default() -> Self {
        Self {
            amount: Amount::default(),
            max_iterations: default_max_iterations(),
        }
    }
}

/// Scheduling and run output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between runs (0 = run once and exit)
    #[serde(default)]
    pub run_interval_secs: u64,

    /// Coarse per-run timeout (0 = none)
    #[serde(default)]
    pub run_timeout_secs: u64,

    /// Append-only JSON-lines run snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<String>,
}

impl Default for RawKeeperConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            keeper_address: None,
            scan: ScanConfig::default(),
            jobs: JobConfig::default(),
            price: PriceConfig::default(),
            execution: ExecutionConfig::default(),
            fees: FeeConfig::default(),
            redemption: RedemptionConfig::default(),
            schedule: ScheduleConfig::default(),
        }
    }
}

impl RawKeeperConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Create a testing profile: dry-run, small batches, no ceilings.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            scan: ScanConfig {
                max_to_scan: 50,
                early_exit_threshold: 10,
            },
            jobs: JobConfig {
                max_per_job: 5,
                enable_fallback: true,
            },
            execution: ExecutionConfig {
                dry_run: true,
                max_tx_retries: 1,
                retry_backoff_ms: 100,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Create a production profile with conservative settings.
    pub fn production() -> Self {
        Self {
            profile: "production".to_string(),
            scan: ScanConfig {
                max_to_scan: 500,
                early_exit_threshold: 50,
            },
            jobs: JobConfig {
                max_per_job: 20,
                enable_fallback: true,
            },
            price: PriceConfig {
                max_price_age_secs: 3600,
                ..Default::default()
            },
            execution: ExecutionConfig {
                gas_ceiling: 12_000_000,
                spend_ceiling_native: Amount::from(0.5),
                gas_buffer_pct: 25,
                max_tx_retries: 3,
                retry_backoff_ms: 1000,
                dry_run: false,
                min_signer_balance_native: Amount::from(0.05),
            },
            schedule: ScheduleConfig {
                run_interval_secs: 60,
                run_timeout_secs: 300,
                snapshot_path: None,
            },
            ..Default::default()
        }
    }

    /// Get profile from environment variable KEEPER_PROFILE, or default.
    /// Supported values: testing, production
    pub fn from_env() -> Self {
        let profile = std::env::var("KEEPER_PROFILE").unwrap_or_else(|_| "default".to_string());
        Self::profile(&profile)
    }

    pub fn profile(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "testing" | "test" => Self::testing(),
            "production" | "prod" => Self::production(),
            _ => Self::default(),
        }
    }

    /// Single validation pass. Sentinel zeros become `None`.
    pub fn validate(&self) -> Result<KeeperConfig, ConfigError> {
        if self.scan.max_to_scan == 0 {
            return Err(ConfigError::ZeroMaxToScan);
        }
        if self.jobs.max_per_job == 0 {
            return Err(ConfigError::ZeroMaxPerJob);
        }
        if self.execution.gas_buffer_pct > MAX_GAS_BUFFER_PCT {
            return Err(ConfigError::BufferTooLarge(self.execution.gas_buffer_pct));
        }

        let min_price = non_negative("min_price_usd", self.price.min_price_usd)?;
        let max_price = non_negative("max_price_usd", self.price.max_price_usd)?;
        let price_bounds = match (min_price > 0.0, max_price > 0.0) {
            (false, false) => None,
            (true, true) if min_price > max_price => {
                return Err(ConfigError::InvertedPriceBounds {
                    min: min_price,
                    max: max_price,
                })
            }
            (true, true) => Some(PriceBounds {
                min: f64_to_wad(min_price),
                max: f64_to_wad(max_price),
            }),
            _ => return Err(ConfigError::PartialPriceBounds),
        };

        let max_fee = non_negative("max_fee_gwei", self.fees.max_fee_gwei)?;
        let priority = non_negative("max_priority_fee_gwei", self.fees.max_priority_fee_gwei)?;
        if priority > 0.0 && max_fee == 0.0 {
            return Err(ConfigError::PriorityWithoutMaxFee);
        }
        if priority > max_fee && max_fee > 0.0 {
            return Err(ConfigError::PriorityAboveMaxFee {
                priority,
                max_fee,
            });
        }
        let fee_overrides = FeeOverrides {
            max_fee_per_gas: (max_fee > 0.0).then(|| gwei_to_wei(max_fee)),
            max_priority_fee_per_gas: (priority > 0.0).then(|| gwei_to_wei(priority)),
        };

        let multiplier = non_negative(
            "eip1559_max_fee_multiplier",
            self.fees.eip1559_max_fee_multiplier,
        )?;
        let fee_cap = non_negative("max_fee_cap_gwei", self.fees.max_fee_cap_gwei)?;

        let spend = self.execution.spend_ceiling_native.to_wei("spend_ceiling_native")?;
        let min_balance = self
            .execution
            .min_signer_balance_native
            .to_wei("min_signer_balance_native")?;

        let redemption_amount = self.redemption.amount.to_wei("redemption.amount")?;
        let redemption = non_zero(redemption_amount).map(|amount| RedemptionSettings {
            amount,
            max_iterations: self.redemption.max_iterations,
        });

        let keeper_address = self
            .keeper_address
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|s| parse_address("keeper_address", s))
            .transpose()?;

        Ok(KeeperConfig {
            profile: self.profile.clone(),
            max_to_scan: self.scan.max_to_scan,
            early_exit_threshold: non_zero(self.scan.early_exit_threshold),
            max_per_job: self.jobs.max_per_job,
            enable_fallback: self.jobs.enable_fallback,
            price_bounds,
            max_price_age: non_zero(self.price.max_price_age_secs),
            gas_ceiling: non_zero(self.execution.gas_ceiling),
            spend_ceiling: non_zero(spend),
            gas_buffer_pct: self.execution.gas_buffer_pct,
            max_tx_retries: self.execution.max_tx_retries,
            retry_backoff: Duration::from_millis(self.execution.retry_backoff_ms),
            fee_overrides,
            eip1559_max_fee_multiplier: multiplier,
            max_fee_cap: non_zero(gwei_to_wei(fee_cap)),
            dry_run: self.execution.dry_run,
            min_signer_balance: non_zero(min_balance),
            redemption,
            run_interval: non_zero(self.schedule.run_interval_secs).map(Duration::from_secs),
            run_timeout: non_zero(self.schedule.run_timeout_secs).map(Duration::from_secs),
            snapshot_path: self
                .schedule
                .snapshot_path
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            keeper_address,
        })
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::InvalidNumber { field, value })
    }
}

fn non_zero<T: Default + PartialEq>(value: T) -> Option<T> {
    (value != T::default()).then_some(value)
}

pub(crate) fn parse_address(field: &'static str, value: &str) -> Result<Address, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

/// Validated configuration. Every optional feature is an `Option`.
#[derive(Debug, Clone)]
pub struct KeeperConfig {
    pub profile: String,
    pub max_to_scan: usize,
    pub early_exit_threshold: Option<usize>,
    pub max_per_job: usize,
    pub enable_fallback: bool,
    pub price_bounds: Option<PriceBounds>,
    /// Seconds
    pub max_price_age: Option<u64>,
    pub gas_ceiling: Option<u64>,
    /// Wei
    pub spend_ceiling: Option<U256>,
    pub gas_buffer_pct: u32,
    pub max_tx_retries: u32,
    pub retry_backoff: Duration,
    pub fee_overrides: FeeOverrides,
    pub eip1559_max_fee_multiplier: f64,
    /// Wei
    pub max_fee_cap: Option<u128>,
    pub dry_run: bool,
    /// Wei
    pub min_signer_balance: Option<U256>,
    pub redemption: Option<RedemptionSettings>,
    pub run_interval: Option<Duration>,
    pub run_timeout: Option<Duration>,
    pub snapshot_path: Option<PathBuf>,
    pub keeper_address: Option<Address>,
}

impl KeeperConfig {
    pub fn scan_limits(&self) -> ScanLimits {
        ScanLimits {
            max_to_scan: self.max_to_scan,
            early_exit_threshold: self.early_exit_threshold,
        }
    }

    pub fn execution_policy(&self) -> ExecutionPolicy {
        ExecutionPolicy {
            gas_ceiling: self.gas_ceiling,
            spend_ceiling: self.spend_ceiling,
            gas_buffer_pct: self.gas_buffer_pct,
            max_tx_retries: self.max_tx_retries,
            retry_backoff: self.retry_backoff,
            dry_run: self.dry_run,
        }
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(
            profile = %self.profile,
            dry_run = self.dry_run,
            "Keeper configuration loaded"
        );
        tracing::info!(
            max_to_scan = self.max_to_scan,
            early_exit = ?self.early_exit_threshold,
            max_per_job = self.max_per_job,
            enable_fallback = self.enable_fallback,
            "Discovery and job limits"
        );
        tracing::info!(
            gas_ceiling = ?self.gas_ceiling,
            spend_ceiling_wei = ?self.spend_ceiling,
            gas_buffer_pct = self.gas_buffer_pct,
            max_tx_retries = self.max_tx_retries,
            max_fee_override = ?self.fee_overrides.max_fee_per_gas,
            max_fee_cap = ?self.max_fee_cap,
            "Execution limits"
        );
        tracing::info!(
            bounds = ?self.price_bounds,
            max_age_secs = ?self.max_price_age,
            redemption = self.redemption.is_some(),
            "Price checks"
        );
    }
}
