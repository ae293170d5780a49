// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! JSON bodies exchanged with the hub over HTTP.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::hex::{decode_hex_0x, encode_hex_0x};
use crate::packet::{HubRecord, Packet, Proof};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub src_chain_id: String,
    pub dst_chain_id: String,
    pub src_seq: u64,
    pub sender: String,
    pub receiver: String,
    pub payload_hex: String,
    pub commitment: String,
    pub proof: serde_json::Value,
}

impl From<&Packet> for SubmitRequest {
    fn from(packet: &Packet) -> Self {
        Self {
            src_chain_id: packet.src_chain_id.clone(),
            dst_chain_id: packet.dst_chain_id.clone(),
            src_seq: packet.src_seq,
            sender: packet.sender.clone(),
            receiver: packet.receiver.clone(),
            payload_hex: encode_hex_0x(&packet.payload),
            commitment: packet.commitment.clone(),
            proof: packet.proof.as_json().clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub ok: bool,
    pub hub_seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRecord {
    pub hub_seq: u64,
    pub src_chain_id: String,
    pub dst_chain_id: String,
    pub src_seq: u64,
    pub sender: String,
    pub receiver: String,
    pub payload_hex: String,
    pub commitment: String,
    pub proof: serde_json::Value,
    pub delivered: bool,
    pub created_at: u64,
}

impl From<&HubRecord> for PendingRecord {
    fn from(record: &HubRecord) -> Self {
        let packet = &record.packet;
        Self {
            hub_seq: record.hub_seq,
            src_chain_id: packet.src_chain_id.clone(),
            dst_chain_id: packet.dst_chain_id.clone(),
            src_seq: packet.src_seq,
            sender: packet.sender.clone(),
            receiver: packet.receiver.clone(),
            payload_hex: encode_hex_0x(&packet.payload),
            commitment: packet.commitment.clone(),
            proof: packet.proof.as_json().clone(),
            delivered: record.delivered,
            created_at: to_unix_ms(record.created_at),
        }
    }
}

impl TryFrom<PendingRecord> for HubRecord {
    type Error = String;

    fn try_from(value: PendingRecord) -> Result<Self, Self::Error> {
        let payload = decode_hex_0x(&value.payload_hex)?;
        Ok(Self {
            hub_seq: value.hub_seq,
            packet: Packet {
                src_chain_id: value.src_chain_id,
                dst_chain_id: value.dst_chain_id,
                src_seq: value.src_seq,
                sender: value.sender,
                receiver: value.receiver,
                payload,
                commitment: value.commitment,
                proof: Proof::new(value.proof),
            },
            delivered: value.delivered,
            created_at: UNIX_EPOCH + Duration::from_millis(value.created_at),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingResponse {
    pub packets: Vec<PendingRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkDeliveredRequest {
    pub hub_seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkDeliveredResponse {
    pub ok: bool,
    pub changes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
}

/// Body of every non-2xx hub response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub code: String,
    pub message: String,
    /// Sequence already assigned to the key; only set on `DUPLICATE`.
    #[serde(rename = "hubSeq", default, skip_serializing_if = "Option::is_none")]
    pub hub_seq: Option<u64>,
}

pub const CODE_BAD_REQUEST: &str = "BAD_REQUEST";
pub const CODE_DUPLICATE: &str = "DUPLICATE";
pub const CODE_OVERLOADED: &str = "OVERLOADED";
pub const CODE_INTERNAL_ERROR: &str = "INTERNAL_ERROR";

fn to_unix_ms(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
