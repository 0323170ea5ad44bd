//! Liquidation and redemption keeper.
//!
//! Each run reads one validated price, walks the sorted borrower list from
//! its riskiest end, and liquidates what it finds in bounded batches through
//! the keeper wrapper. Runs once, or periodically when `run_interval_secs`
//! is configured.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use keeper_chain::{
    Eip1559Estimator, KeeperContract, LegacyEstimator, ProtocolAddresses, ProtocolPriceFeed,
    ProviderManager, RpcNetworkFees, TransactionSender,
};
use keeper_core::{load_config, ConnectionSettings, Keeper, KeeperConfig};

/// Environment variable names.
mod env {
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    // Fatal before any remote call
    let config = load_config()?;
    config.log_config();
    let settings = ConnectionSettings::from_env(&config).context("Invalid connection settings")?;
    info!(settings = ?settings, "Connection settings loaded");

    let keeper = initialize_keeper(config, &settings).await?;

    match keeper.config().run_interval {
        None => {
            // A single run reports failure through the exit status
            if !run_bounded(&keeper).await {
                anyhow::bail!("Run did not complete");
            }
        }
        Some(interval) => {
            info!(interval_secs = interval.as_secs(), "Starting periodic runs");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_bounded(&keeper).await;
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("Shutdown requested");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// JSON lines by default, `LOG_FORMAT=pretty` for humans.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,keeper_core=debug,keeper_chain=info"));
    let registry = tracing_subscriber::registry().with(filter);

    let pretty = std::env::var(env::LOG_FORMAT).is_ok_and(|v| v.eq_ignore_ascii_case("pretty"));
    if pretty {
        registry.with(fmt::layer()).init();
    } else {
        registry
            .with(fmt::layer().json().flatten_event(true).with_current_span(false))
            .init();
    }
}

/// One run, cut off by `run_timeout_secs` if configured. False when the
/// run aborted or timed out.
async fn run_bounded(keeper: &Keeper) -> bool {
    let summary = match keeper.config().run_timeout {
        None => keeper.run_once().await,
        Some(timeout) => match tokio::time::timeout(timeout, keeper.run_once()).await {
            Ok(summary) => summary,
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "Run timed out");
                return false;
            }
        },
    };
    !summary.is_aborted()
}

async fn initialize_keeper(config: KeeperConfig, settings: &ConnectionSettings) -> Result<Keeper> {
    info!("Initializing components...");

    // Transaction sender, absent only in dry-run
    let sender = match &settings.private_key {
        Some(key) => {
            let sender = TransactionSender::new(key, &settings.rpc_url, settings.chain_id)
                .await
                .context("Failed to initialize signer")?;
            info!(address = %sender.address, "Transaction sender initialized");
            Some(Arc::new(sender))
        }
        None => {
            warn!("No PRIVATE_KEY configured, running without a signer");
            None
        }
    };

    // Provider manager (sorted list, ratios, hints)
    let provider = Arc::new(
        ProviderManager::new(
            &settings.rpc_url,
            ProtocolAddresses {
                trove_manager: settings.trove_manager,
                sorted_troves: settings.sorted_troves,
                hint_helpers: settings.hint_helpers,
            },
        )
        .await?,
    );
    match provider.list_size().await {
        Ok(size) => info!(list_size = %size, "Sorted list reachable"),
        Err(e) => warn!(error = %e, "Sorted list size unavailable"),
    }

    // Price feed
    let mut feed = ProtocolPriceFeed::new(&settings.rpc_url, settings.price_feed);
    if let Some(aggregator) = settings.price_aggregator {
        feed = feed.with_aggregator(aggregator);
    } else if config.max_price_age.is_some() {
        warn!("Staleness enforced without PRICE_AGGREGATOR; every run will be rejected");
    }

    // Keeper wrapper
    let recipient = settings
        .profit_receiver
        .or_else(|| sender.as_ref().map(|s| s.address))
        .or(config.keeper_address)
        .context("PROFIT_RECEIVER or keeper_address is required without a signer")?;
    let mut wrapper = KeeperContract::new(settings.keeper_wrapper, settings.rpc_url.clone(), recipient);
    match sender {
        Some(sender) => wrapper = wrapper.with_sender(sender),
        None => {
            if let Some(from) = config.keeper_address {
                wrapper = wrapper.with_estimate_from(from);
            }
        }
    }
    info!(wrapper = %settings.keeper_wrapper, recipient = %recipient, "Keeper wrapper configured");

    // Network fees
    let fees = RpcNetworkFees::new(
        Eip1559Estimator::new(&settings.rpc_url, config.eip1559_max_fee_multiplier)
            .with_max_fee_cap(config.max_fee_cap),
        LegacyEstimator::new(&settings.rpc_url).with_max_gas_price(config.max_fee_cap),
    );

    let mut keeper = Keeper::new(
        config,
        Arc::new(feed),
        provider.clone(),
        Arc::new(wrapper),
        Arc::new(fees),
    );
    if let Some(token) = settings.stable_token {
        keeper = keeper.with_redemption(provider, token);
    }

    info!("All components initialized");
    Ok(keeper)
}
