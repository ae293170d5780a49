// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Startup recovery: finishes hub records that were registered but never marked delivered.

use alloy_primitives::U256;
use tracing::info;

use crate::hub_client::HubClientError;
use crate::pipeline::{PacketOutcome, Pipeline, RelayStats, log_outcome};

/// Delivers every pending record bound for `dst_chain_id`, in ascending hub order.
///
/// Only the first `limit` pending records of the hub are considered. Per-record failures are
/// logged and counted; only a failure to list the pending records is returned.
pub async fn backfill(
    pipeline: &Pipeline,
    dst_chain_id: &str,
    limit: usize,
) -> Result<RelayStats, HubClientError> {
    let mut records = pipeline.hub().list_pending(limit).await?;
    records.retain(|record| same_chain(&record.packet.dst_chain_id, dst_chain_id));
    records.sort_by_key(|record| record.hub_seq);

    let mut stats = RelayStats::default();
    if records.is_empty() {
        return Ok(stats);
    }
    info!(count = records.len(), dst_chain_id, "backfilling pending hub records");

    for record in records {
        let result = pipeline
            .deliver_registered(&record.packet, record.hub_seq)
            .await
            .map(|receipt| PacketOutcome::Delivered {
                hub_seq: record.hub_seq,
                tx_hash: receipt.tx_hash,
            });
        log_outcome(&result);
        stats.record(&result);
    }
    Ok(stats)
}

/// Chain ids may be written in decimal or hex; compare numerically when both parse.
fn same_chain(a: &str, b: &str) -> bool {
    match (a.trim().parse::<U256>(), b.trim().parse::<U256>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
