// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use alloy::contract::Error as ContractError;
use alloy::contract::Event;
use alloy::eips::BlockNumberOrTag;
use alloy::providers::{DynProvider, Provider};
use alloy::rpc::types::Topic;
use alloy::sol_types::SolEvent;
use alloy_primitives::{Address, B256, U256};
use async_recursion::async_recursion;
use async_trait::async_trait;

use super::{BlockHeader, InclusionContext, SentPacket, SourceError, SourceLedger};
use crate::bindings::PacketSent;

/// Reads `PacketSent` logs from an EVM node over JSON-RPC.
#[derive(Clone)]
pub struct EvmSource {
    provider: DynProvider,
    /// Contract that emits `PacketSent`.
    sender_contract: Address,
    /// Only events for this destination chain (topic1) are returned when set.
    dst_chain_filter: Option<U256>,
    /// RPC error substrings that trigger partition retry for large block ranges.
    long_block_range_error_codes: Vec<String>,
}

impl EvmSource {
    pub fn new(
        provider: DynProvider,
        sender_contract: Address,
        dst_chain_filter: Option<U256>,
        long_block_range_error_codes: Vec<String>,
    ) -> Self {
        Self {
            provider,
            sender_contract,
            dst_chain_filter,
            long_block_range_error_codes,
        }
    }
}

#[async_trait]
impl SourceLedger for EvmSource {
    async fn chain_id(&self) -> Result<u64, SourceError> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| SourceError::Provider(e.to_string()))
    }

    async fn head(&self) -> Result<u64, SourceError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| SourceError::Provider(e.to_string()))
    }

    async fn packets_in_range(&self, from: u64, to: u64) -> Result<Vec<SentPacket>, SourceError> {
        if from > to {
            return Ok(Vec::new());
        }
        let topic1: Option<Topic> = self
            .dst_chain_filter
            .map(|dst| B256::from(dst.to_be_bytes::<32>()).into());

        let logs = get_packet_sent_events(
            &self.provider,
            topic1.as_ref(),
            &self.sender_contract,
            from,
            to,
            &self.long_block_range_error_codes,
        )
        .await
        .map_err(|errs| {
            SourceError::Provider(format!(
                "get_packet_sent_events: {}",
                errs.into_iter()
                    .next()
                    .map(|e| e.to_string())
                    .unwrap_or_default()
            ))
        })?;

        let mut packets = logs
            .into_iter()
            .map(|(event, log)| {
                let tx_hash = log.transaction_hash.ok_or_else(|| {
                    SourceError::MalformedEvent("log without transaction hash".to_string())
                })?;
                Ok(SentPacket {
                    dst_chain_id: event.dstChainId,
                    seq: event.seq,
                    sender: event.sender,
                    receiver: event.receiver,
                    payload: event.payload,
                    commitment: event.commitment,
                    tx_hash,
                    block_number: log.block_number.unwrap_or(from),
                    log_index: log.log_index.unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>, SourceError>>()?;
        packets.sort_by_key(|p| (p.block_number, p.log_index));
        Ok(packets)
    }

    async fn inclusion_context(
        &self,
        tx_hash: B256,
    ) -> Result<Option<InclusionContext>, SourceError> {
        let Some(receipt) = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| SourceError::Provider(e.to_string()))?
        else {
            return Ok(None);
        };
        let (Some(block_number), Some(block_hash)) = (receipt.block_number, receipt.block_hash)
        else {
            return Ok(None);
        };

        let Some(block) = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(block_number))
            .await
            .map_err(|e| SourceError::Provider(e.to_string()))?
        else {
            return Ok(None);
        };

        Ok(Some(InclusionContext {
            tx_hash,
            block_number,
            block_hash,
            header: BlockHeader {
                number: block.header.number,
                hash: block.header.hash,
                parent_hash: block.header.parent_hash,
                timestamp: block.header.timestamp,
            },
        }))
    }
}

/// Reads PacketSent events in a block range. Retries with half-range partition on configured RPC errors.
#[async_recursion]
async fn get_packet_sent_events(
    provider: &DynProvider,
    topic1: Option<&Topic>,
    read_from: &Address,
    start_block: u64,
    end_block: u64,
    long_block_range_error_codes: &[String],
) -> Result<Vec<(PacketSent, alloy::rpc::types::Log)>, Vec<ContractError>> {
    let event = {
        let mut e = Event::new_sol(provider, read_from)
            .from_block(start_block)
            .to_block(end_block)
            .event(PacketSent::SIGNATURE);
        if let Some(t) = topic1 {
            e = e.topic1(t.clone());
        }
        e
    };

    match event.query().await {
        Ok(logs) => Ok(logs),
        Err(e) => {
            if start_block < end_block && should_retry_with_partition(&e, long_block_range_error_codes)
            {
                let middle = start_block + (end_block - start_block) / 2;

                let first = get_packet_sent_events(
                    provider,
                    topic1,
                    read_from,
                    start_block,
                    middle,
                    long_block_range_error_codes,
                )
                .await;
                let second = get_packet_sent_events(
                    provider,
                    topic1,
                    read_from,
                    middle + 1,
                    end_block,
                    long_block_range_error_codes,
                )
                .await;

                match (first, second) {
                    (Ok(mut a), Ok(b)) => {
                        a.extend(b);
                        Ok(a)
                    }
                    (Err(mut a), Err(b)) => {
                        a.extend(b);
                        Err(a)
                    }
                    (Err(e), _) | (_, Err(e)) => Err(e),
                }
            } else {
                Err(vec![e])
            }
        }
    }
}

fn should_retry_with_partition(err: &ContractError, codes: &[String]) -> bool {
    error_message_matches_retry_codes(&format!("{err:?}"), codes)
}

pub(crate) fn error_message_matches_retry_codes(error_message: &str, codes: &[String]) -> bool {
    codes.iter().any(|c| error_message.contains(c))
}
