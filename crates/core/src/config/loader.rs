//! Configuration loading from file and environment.
//!
//! Engine options come from a TOML file, connection settings (RPC endpoint,
//! key, contract addresses) from the environment. Both are resolved once at
//! startup; anything missing or malformed is fatal before the first remote
//! call.

use alloy::primitives::Address;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use super::keeper::{parse_address, ConfigError, KeeperConfig, RawKeeperConfig};

/// Default location of the engine options file.
pub const DEFAULT_CONFIG_PATH: &str = "config/keeper.toml";

/// Load and validate engine options.
///
/// Uses `KEEPER_CONFIG` if set (the file must then exist), otherwise
/// `config/keeper.toml` if present, otherwise the `KEEPER_PROFILE` profile.
pub fn load_config() -> Result<KeeperConfig> {
    let raw = match std::env::var("KEEPER_CONFIG") {
        Ok(path) => RawKeeperConfig::from_file(&path)
            .with_context(|| format!("Failed to load config from {path}"))?,
        Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            RawKeeperConfig::from_file(DEFAULT_CONFIG_PATH)
                .with_context(|| format!("Failed to load config from {DEFAULT_CONFIG_PATH}"))?
        }
        Err(_) => RawKeeperConfig::from_env(),
    };

    info!(profile = %raw.profile, "Validating keeper configuration");
    raw.validate().context("Invalid keeper configuration")
}

/// Connection settings resolved from the environment.
#[derive(Clone)]
pub struct ConnectionSettings {
    pub rpc_url: String,
    /// Absent only in dry-run
    pub private_key: Option<String>,
    pub trove_manager: Address,
    pub sorted_troves: Address,
    pub hint_helpers: Address,
    pub price_feed: Address,
    pub keeper_wrapper: Address,
    /// Round-style aggregator; without it only the best-effort price path exists
    pub price_aggregator: Option<Address>,
    /// Required when redemption is enabled
    pub stable_token: Option<Address>,
    /// Defaults to the signer address
    pub profit_receiver: Option<Address>,
    pub chain_id: Option<u64>,
}

impl std::fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("rpc_url", &self.rpc_url)
            .field("has_private_key", &self.private_key.is_some())
            .field("keeper_wrapper", &self.keeper_wrapper)
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

impl ConnectionSettings {
    /// Read settings from the process environment.
    pub fn from_env(config: &KeeperConfig) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok(), config)
    }

    /// Read settings through `lookup`; blank values count as missing.
    pub fn from_lookup<F>(lookup: F, config: &KeeperConfig) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));
        let address = |key: &'static str| -> Result<Address, ConfigError> {
            parse_address(key, &required(key)?)
        };
        let optional_address = |key: &'static str| -> Result<Option<Address>, ConfigError> {
            get(key).map(|v| parse_address(key, &v)).transpose()
        };

        let rpc_url = required("RPC_URL")?;

        let private_key = get("PRIVATE_KEY");
        if private_key.is_none() && !config.dry_run {
            return Err(ConfigError::Missing("PRIVATE_KEY"));
        }

        let stable_token = optional_address("STABLE_TOKEN")?;
        if config.redemption.is_some() && stable_token.is_none() {
            return Err(ConfigError::Missing("STABLE_TOKEN"));
        }

        let chain_id = get("CHAIN_ID")
            .map(|v| {
                v.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                    field: "CHAIN_ID",
                    value: v.clone(),
                })
            })
            .transpose()?;

        Ok(Self {
            rpc_url,
            private_key,
            trove_manager: address("TROVE_MANAGER")?,
            sorted_troves: address("SORTED_TROVES")?,
            hint_helpers: address("HINT_HELPERS")?,
            price_feed: address("PRICE_FEED")?,
            keeper_wrapper: address("KEEPER_WRAPPER")?,
            price_aggregator: optional_address("PRICE_AGGREGATOR")?,
            stable_token,
            profit_receiver: optional_address("PROFIT_RECEIVER")?,
            chain_id,
        })
    }
}
