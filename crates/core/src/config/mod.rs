//! Configuration for the keeper.
//!
//! This module provides:
//! - Engine options with profiles (TOML, validated once into `Option` fields)
//! - Connection settings from the environment (RPC endpoint, key, addresses)

mod keeper;
mod loader;

pub use keeper::{
    Amount, ConfigError, ExecutionConfig, FeeConfig, JobConfig, KeeperConfig, PriceConfig,
    RawKeeperConfig, RedemptionConfig, ScanConfig, ScheduleConfig,
};
pub use loader::{load_config, ConnectionSettings, DEFAULT_CONFIG_PATH};
