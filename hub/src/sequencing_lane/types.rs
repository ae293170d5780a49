// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::time::SystemTime;

use relay_core::packet::{HubRecord, Packet, PacketKey};
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug)]
pub struct PendingSubmission {
    pub packet: Packet,
    pub respond_to: oneshot::Sender<Result<u64, HubError>>,
    pub received_at: SystemTime,
}

#[derive(Debug)]
pub struct PendingMarkDelivered {
    pub hub_seq: u64,
    pub respond_to: oneshot::Sender<Result<u64, HubError>>,
}

#[derive(Debug)]
pub struct PendingListRequest {
    pub limit: usize,
    pub respond_to: oneshot::Sender<Result<Vec<HubRecord>, HubError>>,
}

#[derive(Debug)]
pub enum SequencingLaneInput {
    Submit(PendingSubmission),
    MarkDelivered(PendingMarkDelivered),
    ListPending(PendingListRequest),
}

/// Per-request outcome reported back to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("packet {key} already registered as hub sequence {existing_hub_seq}")]
    Duplicate {
        key: PacketKey,
        existing_hub_seq: u64,
    },
    #[error("{0}")]
    Internal(String),
}

impl HubError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
