// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Watches the source ledger for `PacketSent` events and turns each one into a hub submission.

mod evm;
mod event_watcher;

use alloy_primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;
use thiserror::Error;

pub use event_watcher::{EventWatcher, EventWatcherConfig, build_proof, normalize};
pub use evm::EvmSource;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("provider/transport: {0}")]
    Provider(String),
    #[error("malformed event: {0}")]
    MalformedEvent(String),
    #[error("inclusion context for {tx_hash} unavailable after {attempts} attempts")]
    ContextUnavailable { tx_hash: B256, attempts: u32 },
}

/// One `PacketSent` log as read from the source ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    pub dst_chain_id: U256,
    pub seq: U256,
    pub sender: Address,
    pub receiver: Address,
    pub payload: Bytes,
    pub commitment: B256,
    pub tx_hash: B256,
    pub block_number: u64,
    pub log_index: u64,
}

/// Source-ledger context of the transaction that emitted a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InclusionContext {
    pub tx_hash: B256,
    pub block_number: u64,
    pub block_hash: B256,
    pub header: BlockHeader,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    pub timestamp: u64,
}

#[async_trait]
pub trait SourceLedger: Send + Sync {
    async fn chain_id(&self) -> Result<u64, SourceError>;

    async fn head(&self) -> Result<u64, SourceError>;

    /// `PacketSent` events in `from..=to`, ordered by block and log index.
    async fn packets_in_range(&self, from: u64, to: u64) -> Result<Vec<SentPacket>, SourceError>;

    /// `Ok(None)` while the node has not indexed the receipt or block yet.
    async fn inclusion_context(
        &self,
        tx_hash: B256,
    ) -> Result<Option<InclusionContext>, SourceError>;
}
