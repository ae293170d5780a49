// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::time::Duration;

use alloy::providers::DynProvider;
use alloy_primitives::Address;
use async_trait::async_trait;
use tracing::{debug, info};

use super::{DeliveryError, DeliveryReceipt, DestinationLedger};
use crate::attester::AttestedPacket;
use crate::bindings::IPacketReceiver::{self, IPacketReceiverInstance};

#[derive(Debug, Clone)]
pub struct EvmDestinationConfig {
    /// Contract exposing `recvPacket`.
    pub receiver_contract: Address,
    /// Blocks on top of the inclusion block before a delivery counts as confirmed.
    pub confirmations: u64,
    pub timeout: Duration,
}

/// Calls `recvPacket` through a wallet-enabled provider.
pub struct EvmDestination {
    contract: IPacketReceiverInstance<DynProvider>,
    confirmations: u64,
    timeout: Duration,
}

impl EvmDestination {
    pub fn new(provider: DynProvider, config: EvmDestinationConfig) -> Self {
        Self {
            contract: IPacketReceiver::new(config.receiver_contract, provider),
            confirmations: config.confirmations.max(1),
            timeout: config.timeout,
        }
    }
}

#[async_trait]
impl DestinationLedger for EvmDestination {
    async fn deliver(&self, packet: &AttestedPacket) -> Result<DeliveryReceipt, DeliveryError> {
        let pending = self
            .contract
            .recvPacket(packet.fields.clone(), packet.attestation.clone())
            .send()
            .await
            .map_err(|e| DeliveryError::Send(e.to_string()))?;
        let tx_hash = *pending.tx_hash();
        debug!(%tx_hash, hub_seq = %packet.hub_seq(), "recvPacket sent");

        let receipt = pending
            .with_required_confirmations(self.confirmations)
            .with_timeout(Some(self.timeout))
            .get_receipt()
            .await
            .map_err(|e| DeliveryError::Confirmation {
                tx_hash,
                reason: e.to_string(),
            })?;
        if !receipt.status() {
            return Err(DeliveryError::Reverted { tx_hash });
        }

        info!(
            %tx_hash,
            block_number = ?receipt.block_number,
            hub_seq = %packet.hub_seq(),
            "recvPacket confirmed"
        );
        Ok(DeliveryReceipt {
            tx_hash,
            block_number: receipt.block_number,
        })
    }
}
