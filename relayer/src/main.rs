// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy::network::EthereumWallet;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::{Address, U256};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use relayer::attester::Attester;
use relayer::backfill::backfill;
use relayer::delivery::{EvmDestination, EvmDestinationConfig};
use relayer::hub_client::{HubApi, HubClient};
use relayer::pipeline::{Pipeline, PipelineConfig, WatchLoopConfig, run_watch_loop};
use relayer::watcher::{EventWatcher, EventWatcherConfig, EvmSource};

const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_HUB_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_DELIVERY_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_CONFIRMATIONS: u64 = 1;
const DEFAULT_MAX_IN_FLIGHT: usize = 16;
const DEFAULT_RECEIPT_RETRY_ATTEMPTS: u32 = 10;
const DEFAULT_RECEIPT_RETRY_DELAY_MS: u64 = 500;
const DEFAULT_HUB_RETRY_ATTEMPTS: u32 = 5;
const DEFAULT_HUB_RETRY_DELAY_MS: u64 = 500;
const DEFAULT_STARTUP_RETRY_ATTEMPTS: u32 = 30;
const DEFAULT_STARTUP_RETRY_DELAY_MS: u64 = 1000;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5000;
const DEFAULT_BACKFILL_LIMIT: usize = 1000;
const DEFAULT_LONG_BLOCK_RANGE_ERROR_CODES: &str = "rate limit,too many";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    let attester = Arc::new(Attester::from_hex(&config.private_key)?);
    let signer: PrivateKeySigner = config
        .private_key
        .trim()
        .parse()
        .map_err(|e| format!("invalid RELAYER_PRIVATE_KEY: {e}"))?;
    info!(attester = %attester.address(), "relayer identity");

    let source_provider = ProviderBuilder::new()
        .connect(&config.source_rpc_url)
        .await?
        .erased();
    let dest_provider = ProviderBuilder::new()
        .wallet(EthereumWallet::from(signer))
        .connect(&config.dest_rpc_url)
        .await?
        .erased();
    let hub = Arc::new(HubClient::new(&config.hub_url, config.hub_timeout)?);

    wait_until_ready("source ledger", &config, || async {
        source_provider.get_block_number().await.map(|_| ())
    })
    .await?;
    wait_until_ready("destination ledger", &config, || async {
        dest_provider.get_block_number().await.map(|_| ())
    })
    .await?;
    wait_until_ready("hub", &config, || hub.health()).await?;

    let src_chain_id = match &config.source_chain_id {
        Some(id) => id.clone(),
        None => source_provider.get_chain_id().await?.to_string(),
    };
    let dst_chain_id = match &config.dest_chain_id {
        Some(id) => id.clone(),
        None => dest_provider.get_chain_id().await?.to_string(),
    };
    let dst_chain_filter = dst_chain_id.parse::<U256>().ok();
    if dst_chain_filter.is_none() {
        warn!(dst_chain_id, "destination chain id is not numeric, watching all destinations");
    }

    let destination = Arc::new(EvmDestination::new(
        dest_provider,
        EvmDestinationConfig {
            receiver_contract: config.packet_receiver_address,
            confirmations: config.confirmations,
            timeout: config.delivery_timeout,
        },
    ));
    let pipeline = Arc::new(Pipeline::new(
        hub.clone(),
        attester,
        destination,
        PipelineConfig {
            hub_timeout: config.hub_timeout,
            delivery_timeout: config.delivery_timeout,
            hub_retry_attempts: config.hub_retry_attempts,
            hub_retry_delay: config.hub_retry_delay,
        },
    ));

    if config.backfill_on_start {
        match backfill(&pipeline, &dst_chain_id, config.backfill_limit).await {
            Ok(stats) => info!(
                delivered = stats.delivered,
                failed = stats.failed,
                "backfill finished"
            ),
            Err(err) => warn!(error = %err, "backfill skipped: cannot list pending records"),
        }
    }

    let start_block = match config.start_block {
        Some(block) => block,
        None => source_provider.get_block_number().await?,
    };
    let source = EvmSource::new(
        source_provider,
        config.packet_sender_address,
        dst_chain_filter,
        config.long_block_range_error_codes.clone(),
    );
    let watcher = EventWatcher::new(
        source,
        EventWatcherConfig {
            src_chain_id: src_chain_id.clone(),
            start_block,
            poll_interval: config.poll_interval,
            receipt_retry_attempts: config.receipt_retry_attempts,
            receipt_retry_delay: config.receipt_retry_delay,
        },
    );

    info!(
        %src_chain_id,
        %dst_chain_id,
        start_block,
        sender_contract = %config.packet_sender_address,
        receiver_contract = %config.packet_receiver_address,
        "relayer watching PacketSent"
    );
    run_watch_loop(
        watcher,
        pipeline,
        WatchLoopConfig {
            max_in_flight: config.max_in_flight,
            shutdown_grace: config.shutdown_grace,
        },
        async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "cannot listen for ctrl-c, stopping");
            }
            info!("shutdown requested");
        },
    )
    .await;

    Ok(())
}

async fn wait_until_ready<F, Fut, E>(
    dependency: &str,
    config: &Config,
    mut check: F,
) -> Result<(), String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let attempts = config.startup_retry_attempts.max(1);
    for attempt in 1..=attempts {
        match check().await {
            Ok(()) => {
                info!(dependency, "dependency ready");
                return Ok(());
            }
            Err(err) => warn!(dependency, attempt, error = %err, "waiting for dependency"),
        }
        if attempt < attempts {
            tokio::time::sleep(config.startup_retry_delay).await;
        }
    }
    Err(format!("{dependency} not reachable after {attempts} attempts"))
}

struct Config {
    source_rpc_url: String,
    dest_rpc_url: String,
    hub_url: String,
    private_key: String,
    packet_sender_address: Address,
    packet_receiver_address: Address,
    source_chain_id: Option<String>,
    dest_chain_id: Option<String>,
    start_block: Option<u64>,
    poll_interval: Duration,
    hub_timeout: Duration,
    delivery_timeout: Duration,
    confirmations: u64,
    max_in_flight: usize,
    receipt_retry_attempts: u32,
    receipt_retry_delay: Duration,
    hub_retry_attempts: u32,
    hub_retry_delay: Duration,
    startup_retry_attempts: u32,
    startup_retry_delay: Duration,
    shutdown_grace: Duration,
    long_block_range_error_codes: Vec<String>,
    backfill_on_start: bool,
    backfill_limit: usize,
}

impl Config {
    fn from_env() -> Result<Self, String> {
        Ok(Self {
            source_rpc_url: env_required("RELAYER_SOURCE_RPC_URL")?,
            dest_rpc_url: env_required("RELAYER_DEST_RPC_URL")?,
            hub_url: env_required("RELAYER_HUB_URL")?,
            private_key: env_required("RELAYER_PRIVATE_KEY")?,
            packet_sender_address: env_address("RELAYER_PACKET_SENDER_ADDRESS")?,
            packet_receiver_address: env_address("RELAYER_PACKET_RECEIVER_ADDRESS")?,
            source_chain_id: env_optional("RELAYER_SOURCE_CHAIN_ID"),
            dest_chain_id: env_optional("RELAYER_DEST_CHAIN_ID"),
            start_block: env_optional("RELAYER_START_BLOCK")
                .map(|value| {
                    value
                        .parse::<u64>()
                        .map_err(|e| format!("invalid RELAYER_START_BLOCK: {e}"))
                })
                .transpose()?,
            poll_interval: env_millis("RELAYER_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS),
            hub_timeout: env_millis("RELAYER_HUB_TIMEOUT_MS", DEFAULT_HUB_TIMEOUT_MS),
            delivery_timeout: env_millis(
                "RELAYER_DELIVERY_TIMEOUT_MS",
                DEFAULT_DELIVERY_TIMEOUT_MS,
            ),
            confirmations: env_u64("RELAYER_CONFIRMATIONS", DEFAULT_CONFIRMATIONS),
            max_in_flight: env_usize("RELAYER_MAX_IN_FLIGHT", DEFAULT_MAX_IN_FLIGHT).max(1),
            receipt_retry_attempts: env_u32(
                "RELAYER_RECEIPT_RETRY_ATTEMPTS",
                DEFAULT_RECEIPT_RETRY_ATTEMPTS,
            ),
            receipt_retry_delay: env_millis(
                "RELAYER_RECEIPT_RETRY_DELAY_MS",
                DEFAULT_RECEIPT_RETRY_DELAY_MS,
            ),
            hub_retry_attempts: env_u32("RELAYER_HUB_RETRY_ATTEMPTS", DEFAULT_HUB_RETRY_ATTEMPTS),
            hub_retry_delay: env_millis("RELAYER_HUB_RETRY_DELAY_MS", DEFAULT_HUB_RETRY_DELAY_MS),
            startup_retry_attempts: env_u32(
                "RELAYER_STARTUP_RETRY_ATTEMPTS",
                DEFAULT_STARTUP_RETRY_ATTEMPTS,
            ),
            startup_retry_delay: env_millis(
                "RELAYER_STARTUP_RETRY_DELAY_MS",
                DEFAULT_STARTUP_RETRY_DELAY_MS,
            ),
            shutdown_grace: env_millis("RELAYER_SHUTDOWN_GRACE_MS", DEFAULT_SHUTDOWN_GRACE_MS),
            long_block_range_error_codes: env_string(
                "RELAYER_LONG_BLOCK_RANGE_ERROR_CODES",
                DEFAULT_LONG_BLOCK_RANGE_ERROR_CODES,
            )
            .split(',')
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(str::to_string)
            .collect(),
            backfill_on_start: env_bool("RELAYER_BACKFILL_ON_START", true),
            backfill_limit: env_usize("RELAYER_BACKFILL_LIMIT", DEFAULT_BACKFILL_LIMIT).max(1),
        })
    }
}

fn env_required(key: &str) -> Result<String, String> {
    env_optional(key).ok_or_else(|| format!("missing required environment variable {key}"))
}

fn env_optional(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_address(key: &str) -> Result<Address, String> {
    env_required(key)?
        .parse::<Address>()
        .map_err(|e| format!("invalid {key}: {e}"))
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_optional(key).as_deref() {
        Some("1") | Some("true") | Some("yes") => true,
        Some("0") | Some("false") | Some("no") => false,
        _ => default,
    }
}

fn env_millis(key: &str, default: u64) -> Duration {
    Duration::from_millis(env_u64(key, default))
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
