// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::time::Duration;

use relay_core::packet::{Packet, Proof};
use tracing::{debug, info, trace, warn};

use super::{InclusionContext, SentPacket, SourceError, SourceLedger};

#[derive(Debug, Clone)]
pub struct EventWatcherConfig {
    /// Chain id recorded as `srcChainId` on every packet.
    pub src_chain_id: String,
    /// First block to scan.
    pub start_block: u64,
    /// Poll interval when no new blocks.
    pub poll_interval: Duration,
    pub receipt_retry_attempts: u32,
    pub receipt_retry_delay: Duration,
}

/// Block-range cursor over the source ledger. Every event past the cursor is turned into
/// exactly one packet; deduplication is left to the hub.
pub struct EventWatcher<S> {
    source: S,
    config: EventWatcherConfig,
    next_block: u64,
}

impl<S: SourceLedger> EventWatcher<S> {
    pub fn new(source: S, config: EventWatcherConfig) -> Self {
        let next_block = config.start_block;
        Self {
            source,
            config,
            next_block,
        }
    }

    pub fn next_block(&self) -> u64 {
        self.next_block
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    /// Scans from the cursor to the current head and returns the packets found.
    ///
    /// When the context of an event cannot be fetched, packets from earlier blocks are still
    /// returned and the cursor stops at that event's block, so it is read again next time.
    pub async fn poll_once(&mut self) -> Result<Vec<Packet>, SourceError> {
        let head = self.source.head().await?;
        if head < self.next_block {
            return Ok(Vec::new());
        }

        let start_block = self.next_block;
        let events = self.source.packets_in_range(start_block, head).await?;
        let mut packets: Vec<(u64, Packet)> = Vec::with_capacity(events.len());

        for event in events {
            let context = match self.inclusion_context_with_retry(&event).await {
                Ok(context) => context,
                Err(err) => {
                    warn!(
                        error = %err,
                        block_number = event.block_number,
                        "stopping scan before event without inclusion context"
                    );
                    packets.retain(|(block, _)| *block < event.block_number);
                    self.next_block = event.block_number.max(start_block);
                    return Ok(packets.into_iter().map(|(_, packet)| packet).collect());
                }
            };

            match normalize(&self.config.src_chain_id, &event, &context) {
                Ok(packet) => {
                    trace!(
                        key = %packet.key(),
                        tx_hash = %event.tx_hash,
                        block_number = event.block_number,
                        "packet sent"
                    );
                    packets.push((event.block_number, packet));
                }
                // Cannot become valid on a retry.
                Err(err) => warn!(error = %err, tx_hash = %event.tx_hash, "skipping event"),
            }
        }

        if !packets.is_empty() {
            info!(
                block_range = %format!("{}..={}", start_block, head),
                count = packets.len(),
                "packets detected"
            );
        }
        self.next_block = head + 1;
        Ok(packets.into_iter().map(|(_, packet)| packet).collect())
    }

    async fn inclusion_context_with_retry(
        &self,
        event: &SentPacket,
    ) -> Result<InclusionContext, SourceError> {
        let attempts = self.config.receipt_retry_attempts.max(1);
        for attempt in 1..=attempts {
            match self.source.inclusion_context(event.tx_hash).await {
                Ok(Some(context)) => return Ok(context),
                Ok(None) => debug!(tx_hash = %event.tx_hash, attempt, "receipt not indexed yet"),
                Err(err) => {
                    warn!(error = %err, tx_hash = %event.tx_hash, attempt, "receipt lookup failed")
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.receipt_retry_delay).await;
            }
        }
        Err(SourceError::ContextUnavailable {
            tx_hash: event.tx_hash,
            attempts,
        })
    }
}

/// Builds the hub packet for one source event.
pub fn normalize(
    src_chain_id: &str,
    event: &SentPacket,
    context: &InclusionContext,
) -> Result<Packet, SourceError> {
    let src_seq = u64::try_from(event.seq).map_err(|_| {
        SourceError::MalformedEvent(format!("sequence {} does not fit in u64", event.seq))
    })?;

    Ok(Packet {
        src_chain_id: src_chain_id.to_string(),
        dst_chain_id: event.dst_chain_id.to_string(),
        src_seq,
        sender: event.sender.to_checksum(None),
        receiver: event.receiver.to_checksum(None),
        payload: event.payload.to_vec(),
        commitment: event.commitment.to_string(),
        proof: build_proof(context),
    })
}

pub fn build_proof(context: &InclusionContext) -> Proof {
    Proof::new(serde_json::json!({
        "ledger": "evm",
        "txHash": context.tx_hash.to_string(),
        "blockNumber": context.block_number,
        "blockHash": context.block_hash.to_string(),
        "header": {
            "number": context.header.number,
            "hash": context.header.hash.to_string(),
            "parentHash": context.header.parent_hash.to_string(),
            "timestamp": context.header.timestamp,
        },
    }))
}
