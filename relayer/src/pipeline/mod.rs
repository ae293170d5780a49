// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! Per-packet relay task: submit, attest, deliver, mark delivered.
//!
//! Each step needs the exact result of the previous one, so a packet's steps run strictly in
//! order; distinct packets run as independent tasks (see [`run_watch_loop`]).

mod watch_loop;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::B256;
use relay_core::packet::{Packet, PacketKey};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::attester::{AttestError, Attester};
use crate::delivery::{DeliveryError, DeliveryReceipt, DestinationLedger};
use crate::hub_client::{HubApi, HubClientError, SubmitOutcome};

pub use watch_loop::{WatchLoopConfig, run_watch_loop};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound for one hub round-trip.
    pub hub_timeout: Duration,
    /// Upper bound for sending a delivery and waiting for its confirmation.
    pub delivery_timeout: Duration,
    /// Attempts per hub call on transient failures (unreachable, timeout, overloaded).
    pub hub_retry_attempts: u32,
    /// First backoff delay; doubled per attempt.
    pub hub_retry_delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketOutcome {
    Delivered { hub_seq: u64, tx_hash: B256 },
    // Terminal no-op: another submission already registered this key.
    Duplicate {
        key: PacketKey,
        existing_hub_seq: Option<u64>,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("submit {key}: {source}")]
    Submit {
        key: PacketKey,
        #[source]
        source: HubClientError,
    },
    #[error("attest hub sequence {hub_seq}: {source}")]
    Attest {
        hub_seq: u64,
        #[source]
        source: AttestError,
    },
    #[error("deliver hub sequence {hub_seq}: {source}")]
    Deliver {
        hub_seq: u64,
        #[source]
        source: DeliveryError,
    },
    #[error("mark hub sequence {hub_seq} delivered: {source}")]
    MarkDelivered {
        hub_seq: u64,
        #[source]
        source: HubClientError,
    },
}

impl PipelineError {
    /// Hub sequence of the record left undelivered, if registration succeeded.
    pub fn hub_seq(&self) -> Option<u64> {
        match self {
            Self::Submit { .. } => None,
            Self::Attest { hub_seq, .. }
            | Self::Deliver { hub_seq, .. }
            | Self::MarkDelivered { hub_seq, .. } => Some(*hub_seq),
        }
    }
}

/// Running totals of pipeline outcomes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub delivered: u64,
    pub duplicates: u64,
    pub failed: u64,
    /// Detected packets dropped at shutdown before their pipeline started.
    pub unsubmitted: u64,
}

impl RelayStats {
    pub fn record(&mut self, result: &Result<PacketOutcome, PipelineError>) {
        match result {
            Ok(PacketOutcome::Delivered { .. }) => self.delivered += 1,
            Ok(PacketOutcome::Duplicate { .. }) => self.duplicates += 1,
            Err(_) => self.failed += 1,
        }
    }
}

pub struct Pipeline {
    hub: Arc<dyn HubApi>,
    attester: Arc<Attester>,
    destination: Arc<dyn DestinationLedger>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        hub: Arc<dyn HubApi>,
        attester: Arc<Attester>,
        destination: Arc<dyn DestinationLedger>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            hub,
            attester,
            destination,
            config,
        }
    }

    pub fn hub(&self) -> &Arc<dyn HubApi> {
        &self.hub
    }

    /// Runs the whole relay for one source event.
    pub async fn relay(&self, packet: Packet) -> Result<PacketOutcome, PipelineError> {
        let key = packet.key();
        let mut submit_timed_out = false;
        let submitted = self
            .call_hub_observed(
                "submit",
                || self.hub.submit(&packet),
                |err| submit_timed_out |= matches!(err, HubClientError::Timeout),
            )
            .await
            .map_err(|source| PipelineError::Submit {
                key: key.clone(),
                source,
            })?;

        let hub_seq = match submitted {
            SubmitOutcome::Registered { hub_seq } => hub_seq,
            // A timed-out attempt may have been committed; the duplicate is then our own.
            SubmitOutcome::Duplicate {
                existing_hub_seq: Some(hub_seq),
            } if submit_timed_out => {
                warn!(
                    hub_seq,
                    key = %key,
                    "submit timed out after the hub registered the packet, continuing delivery"
                );
                hub_seq
            }
            SubmitOutcome::Duplicate { existing_hub_seq } => {
                if submit_timed_out {
                    error!(
                        key = %key,
                        "submit timed out and the retry was a duplicate without a hub sequence, \
                         record may be left pending"
                    );
                }
                return Ok(PacketOutcome::Duplicate {
                    key,
                    existing_hub_seq,
                });
            }
        };
        debug!(hub_seq, key = %key, "packet registered");

        let receipt = self.deliver_registered(&packet, hub_seq).await?;
        Ok(PacketOutcome::Delivered {
            hub_seq,
            tx_hash: receipt.tx_hash,
        })
    }

    /// Attests, delivers and marks a packet the hub already sequenced as `hub_seq`.
    ///
    /// The hub is only told about a delivery after the destination confirmed inclusion.
    pub async fn deliver_registered(
        &self,
        packet: &Packet,
        hub_seq: u64,
    ) -> Result<DeliveryReceipt, PipelineError> {
        let attested = self
            .attester
            .attest(packet, hub_seq)
            .map_err(|source| PipelineError::Attest { hub_seq, source })?;

        let receipt = match tokio::time::timeout(
            self.config.delivery_timeout,
            self.destination.deliver(&attested),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.config.delivery_timeout)),
        }
        .map_err(|source| PipelineError::Deliver { hub_seq, source })?;

        let changes = self
            .call_hub("markDelivered", || self.hub.mark_delivered(hub_seq))
            .await
            .map_err(|source| PipelineError::MarkDelivered { hub_seq, source })?;
        if changes == 0 {
            debug!(hub_seq, "hub record was already marked delivered");
        }
        Ok(receipt)
    }

    async fn call_hub<T, F, Fut>(&self, what: &'static str, call: F) -> Result<T, HubClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, HubClientError>>,
    {
        self.call_hub_observed(what, call, |_| {}).await
    }

    /// Like `call_hub`, handing every retried error to `observe` first.
    async fn call_hub_observed<T, F, Fut, O>(
        &self,
        what: &'static str,
        mut call: F,
        mut observe: O,
    ) -> Result<T, HubClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, HubClientError>>,
        O: FnMut(&HubClientError),
    {
        let attempts = self.config.hub_retry_attempts.max(1);
        let mut delay = self.config.hub_retry_delay;
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.config.hub_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(HubClientError::Timeout),
            };
            match result {
                Err(err) if err.is_transient() && attempt < attempts => {
                    observe(&err);
                    warn!(error = %err, attempt, call = what, "hub call failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2).min(MAX_RETRY_DELAY);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

pub fn log_outcome(result: &Result<PacketOutcome, PipelineError>) {
    match result {
        Ok(PacketOutcome::Delivered { hub_seq, tx_hash }) => {
            info!(hub_seq, %tx_hash, "packet delivered")
        }
        Ok(PacketOutcome::Duplicate {
            key,
            existing_hub_seq,
        }) => {
            info!(key = %key, ?existing_hub_seq, "packet already registered at the hub, skipping")
        }
        Err(err) => match err.hub_seq() {
            Some(hub_seq) => error!(
                hub_seq,
                error = %err,
                "packet pipeline failed, hub record left undelivered"
            ),
            None => error!(error = %err, "packet pipeline failed before registration"),
        },
    }
}
