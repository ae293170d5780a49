// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

use relay_core::packet::Packet;

use super::{PacketOutcome, Pipeline, PipelineError, RelayStats, log_outcome};
use crate::watcher::{EventWatcher, SourceLedger};

#[derive(Debug, Clone, Copy)]
pub struct WatchLoopConfig {
    /// Packet pipelines allowed to run at the same time.
    pub max_in_flight: usize,
    /// How long in-flight pipelines may keep running after shutdown is requested.
    pub shutdown_grace: Duration,
}

type TaskResult = Result<Result<PacketOutcome, PipelineError>, JoinError>;

/// Polls the source ledger until `shutdown` resolves, spawning one pipeline task per packet.
///
/// Pipelines still running when the grace period ends are abandoned; their hub records stay
/// undelivered and are picked up again by a backfill.
pub async fn run_watch_loop<S, F>(
    mut watcher: EventWatcher<S>,
    pipeline: Arc<Pipeline>,
    config: WatchLoopConfig,
    shutdown: F,
) -> RelayStats
where
    S: SourceLedger,
    F: Future<Output = ()>,
{
    let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
    let mut tasks: JoinSet<Result<PacketOutcome, PipelineError>> = JoinSet::new();
    let mut stats = RelayStats::default();
    tokio::pin!(shutdown);

    info!(
        next_block = watcher.next_block(),
        max_in_flight = config.max_in_flight,
        "watch loop started"
    );

    'watch: loop {
        let batch = tokio::select! {
            _ = &mut shutdown => break 'watch,
            batch = watcher.poll_once() => batch,
        };

        match batch {
            Ok(packets) => {
                let mut packets = packets.into_iter();
                while let Some(packet) = packets.next() {
                    let permit = tokio::select! {
                        _ = &mut shutdown => None,
                        permit = permits.clone().acquire_owned() => permit.ok(),
                    };
                    let Some(permit) = permit else {
                        // The cursor already moved past these; only a restart from an
                        // earlier block picks them up again.
                        let unsubmitted: Vec<Packet> =
                            std::iter::once(packet).chain(packets.by_ref()).collect();
                        stats.unsubmitted = unsubmitted.len() as u64;
                        warn!(
                            unsubmitted = unsubmitted.len(),
                            resume_from_block = ?first_block(&unsubmitted),
                            "stopping before every detected packet was submitted, \
                             restart with RELAYER_START_BLOCK at or below resume_from_block"
                        );
                        break 'watch;
                    };
                    let pipeline = pipeline.clone();
                    tasks.spawn(async move {
                        let result = pipeline.relay(packet).await;
                        drop(permit);
                        result
                    });
                    while let Some(joined) = tasks.try_join_next() {
                        record(&mut stats, joined);
                    }
                }
            }
            Err(err) => warn!(error = %err, "source poll failed, will retry"),
        }

        while let Some(joined) = tasks.try_join_next() {
            record(&mut stats, joined);
        }

        tokio::select! {
            _ = &mut shutdown => break 'watch,
            _ = tokio::time::sleep(watcher.poll_interval()) => {}
        }
    }

    info!(in_flight = tasks.len(), "watch loop stopping");
    let drained = tokio::time::timeout(config.shutdown_grace, async {
        while let Some(joined) = tasks.join_next().await {
            record(&mut stats, joined);
        }
    })
    .await;
    if drained.is_err() {
        warn!(abandoned = tasks.len(), "abandoning in-flight packet pipelines");
        tasks.abort_all();
    }

    info!(
        delivered = stats.delivered,
        duplicates = stats.duplicates,
        failed = stats.failed,
        unsubmitted = stats.unsubmitted,
        "watch loop stopped"
    );
    stats
}

/// Lowest source block among `packets`, read from their inclusion proofs.
fn first_block(packets: &[Packet]) -> Option<u64> {
    packets
        .iter()
        .filter_map(|packet| packet.proof.as_json().get("blockNumber")?.as_u64())
        .min()
}

fn record(stats: &mut RelayStats, joined: TaskResult) {
    match joined {
        Ok(result) => {
            log_outcome(&result);
            stats.record(&result);
        }
        Err(err) => {
            error!(error = %err, "packet pipeline task panicked");
            stats.failed += 1;
        }
    }
}
