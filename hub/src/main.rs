// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use tracing_subscriber::EnvFilter;

use hub::api::AppState;
use hub::sequencing_lane::{
    SequencingLane, SequencingLaneConfig, SequencingLaneError, SequencingLaneInput,
};
use hub::storage;
use hub::verifier::AcceptAll;

const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:7000";
const DEFAULT_DB_PATH: &str = "hub.sqlite";
const DEFAULT_QUEUE_CAP: usize = 1024;
const DEFAULT_QUEUE_TIMEOUT_MS: u64 = 100;
const DEFAULT_MAX_REQUESTS_PER_CHUNK: usize = 64;
const DEFAULT_LANE_IDLE_POLL_INTERVAL: Duration = Duration::from_millis(2);
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
const DEFAULT_SQLITE_SYNCHRONOUS: &str = "NORMAL";
const DEFAULT_PENDING_LIMIT: usize = 50;
const DEFAULT_MAX_PENDING_LIMIT: usize = 1000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    let storage = storage::Storage::open(&config.db_path, &config.sqlite_synchronous)?;
    let (tx, rx) = tokio::sync::mpsc::channel::<SequencingLaneInput>(config.queue_capacity);

    let lane = SequencingLane::new(
        rx,
        storage,
        SequencingLaneConfig {
            max_requests_per_chunk: config.max_requests_per_chunk,
            idle_poll_interval: config.lane_idle_poll_interval,
        },
    );
    let (mut lane_handle, lane_stop) = lane.spawn();

    warn!("proof verification disabled: submitted proofs and commitments are trusted as-is");
    let state = Arc::new(AppState {
        lane_sender: tx,
        queue_timeout: Duration::from_millis(config.queue_timeout_ms),
        verifier: Arc::new(AcceptAll),
        default_pending_limit: config.default_pending_limit,
        max_pending_limit: config.max_pending_limit,
    });

    let app = hub::api::router(state, config.max_body_bytes);
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;

    tracing::info!(address = %config.http_addr, db = %config.db_path, "hub listening");
    tokio::select! {
        server_result = axum::serve(listener, app) => {
            lane_stop.request_shutdown();
            match lane_handle.await {
                Ok(SequencingLaneError::ShutdownRequested) => {}
                Ok(err) => return Err(format!("sequencing lane exited during shutdown: {err}").into()),
                Err(join_err) => {
                    return Err(format!("sequencing lane join error during shutdown: {join_err}").into())
                }
            }
            server_result?;
        }
        lane_result = &mut lane_handle => {
            match lane_result {
                Ok(err) => return Err(format!("sequencing lane exited: {err}").into()),
                Err(join_err) => {
                    return Err(format!("sequencing lane join error: {join_err}").into())
                }
            }
        }
    }

    Ok(())
}

struct Config {
    http_addr: String,
    db_path: String,
    queue_capacity: usize,
    queue_timeout_ms: u64,
    max_requests_per_chunk: usize,
    lane_idle_poll_interval: Duration,
    max_body_bytes: usize,
    sqlite_synchronous: String,
    default_pending_limit: usize,
    max_pending_limit: usize,
}

impl Config {
    fn from_env() -> Self {
        let max_pending_limit = env_usize("HUB_MAX_PENDING_LIMIT", DEFAULT_MAX_PENDING_LIMIT).max(1);
        Self {
            http_addr: env_string("HUB_HTTP_ADDR", DEFAULT_HTTP_ADDR),
            db_path: env_string("HUB_DB_PATH", DEFAULT_DB_PATH),
            queue_capacity: env_usize("HUB_QUEUE_CAP", DEFAULT_QUEUE_CAP).max(1),
            queue_timeout_ms: env_u64("HUB_QUEUE_TIMEOUT_MS", DEFAULT_QUEUE_TIMEOUT_MS),
            max_requests_per_chunk: env_usize(
                "HUB_MAX_REQUESTS_PER_CHUNK",
                DEFAULT_MAX_REQUESTS_PER_CHUNK,
            )
            .max(1),
            lane_idle_poll_interval: Duration::from_millis(
                env_u64(
                    "HUB_LANE_IDLE_POLL_INTERVAL_MS",
                    DEFAULT_LANE_IDLE_POLL_INTERVAL.as_millis() as u64,
                )
                .max(1),
            ),
            max_body_bytes: env_usize("HUB_MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES),
            sqlite_synchronous: env_string("HUB_SQLITE_SYNCHRONOUS", DEFAULT_SQLITE_SYNCHRONOUS),
            default_pending_limit: env_usize("HUB_DEFAULT_PENDING_LIMIT", DEFAULT_PENDING_LIMIT)
                .min(max_pending_limit),
            max_pending_limit,
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
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
