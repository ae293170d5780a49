// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Source-ledger inclusion evidence. Carried through the hub uninterpreted.
///
/// The value is free-form JSON; by convention it carries a `"ledger"` tag naming the source
/// ledger family so a verifier can dispatch on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Proof(serde_json::Value);

impl Proof {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn ledger(&self) -> Option<&str> {
        self.0.get("ledger").and_then(serde_json::Value::as_str)
    }

    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_json(self) -> serde_json::Value {
        self.0
    }
}

/// A cross-ledger message as emitted by the source ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub src_chain_id: String,
    pub dst_chain_id: String,
    pub src_seq: u64,
    pub sender: String,
    pub receiver: String,
    pub payload: Vec<u8>,
    // Computed by the source side; the hub never recomputes it.
    pub commitment: String,
    pub proof: Proof,
}

impl Packet {
    pub fn key(&self) -> PacketKey {
        PacketKey {
            src_chain_id: self.src_chain_id.clone(),
            dst_chain_id: self.dst_chain_id.clone(),
            src_seq: self.src_seq,
        }
    }
}

/// Uniqueness key of a registration: one source packet per destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PacketKey {
    pub src_chain_id: String,
    pub dst_chain_id: String,
    pub src_seq: u64,
}

impl fmt::Display for PacketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{}#{}",
            self.src_chain_id, self.dst_chain_id, self.src_seq
        )
    }
}

/// A packet once registered by the hub.
#[derive(Debug, Clone, PartialEq)]
pub struct HubRecord {
    pub hub_seq: u64,
    pub packet: Packet,
    pub delivered: bool,
    pub created_at: SystemTime,
}
