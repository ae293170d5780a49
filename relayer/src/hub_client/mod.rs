// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Client side of the hub's HTTP surface.

mod client;
mod error;

use async_trait::async_trait;
use relay_core::packet::{HubRecord, Packet};

pub use client::HubClient;
pub use error::HubClientError;

/// Outcome of registering one packet with the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Registered { hub_seq: u64 },
    // The key is already registered; not a failure. The sequence is absent if the body lacked it.
    Duplicate { existing_hub_seq: Option<u64> },
}

#[async_trait]
pub trait HubApi: Send + Sync {
    async fn health(&self) -> Result<(), HubClientError>;

    async fn submit(&self, packet: &Packet) -> Result<SubmitOutcome, HubClientError>;

    async fn list_pending(&self, limit: usize) -> Result<Vec<HubRecord>, HubClientError>;

    /// Returns the number of records flipped to delivered (0 or 1).
    async fn mark_delivered(&self, hub_seq: u64) -> Result<u64, HubClientError>;
}
