// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Hands attested packets to the destination ledger and waits for confirmed inclusion.

mod evm;

use alloy_primitives::B256;
use async_trait::async_trait;
use thiserror::Error;

use crate::attester::AttestedPacket;

pub use evm::{EvmDestination, EvmDestinationConfig};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("send recvPacket: {0}")]
    Send(String),
    #[error("wait for inclusion of {tx_hash}: {reason}")]
    Confirmation { tx_hash: B256, reason: String },
    #[error("recvPacket transaction {tx_hash} reverted")]
    Reverted { tx_hash: B256 },
    #[error("inclusion not confirmed within {0:?}")]
    Timeout(std::time::Duration),
}

/// Confirmed inclusion of a delivery on the destination ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
}

#[async_trait]
pub trait DestinationLedger: Send + Sync {
    /// Returns only once the destination ledger confirmed inclusion.
    async fn deliver(&self, packet: &AttestedPacket) -> Result<DeliveryReceipt, DeliveryError>;
}
