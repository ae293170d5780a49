// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::storage::{Storage, SubmitOutcome};

use super::{
    HubError, PendingListRequest, PendingMarkDelivered, PendingSubmission, SequencingLaneError,
    SequencingLaneInput,
};

#[derive(Debug, Clone, Copy)]
pub struct SequencingLaneConfig {
    pub max_requests_per_chunk: usize,
    pub idle_poll_interval: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct SequencingLaneStop {
    shutdown: Arc<AtomicBool>,
}

impl SequencingLaneStop {
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

pub struct SequencingLane {
    rx: mpsc::Receiver<SequencingLaneInput>,
    stop: SequencingLaneStop,
    storage: Storage,
    config: SequencingLaneConfig,
}

impl SequencingLane {
    pub fn new(
        rx: mpsc::Receiver<SequencingLaneInput>,
        storage: Storage,
        config: SequencingLaneConfig,
    ) -> Self {
        Self {
            rx,
            stop: SequencingLaneStop::default(),
            storage,
            config,
        }
    }

    pub fn spawn(self) -> (JoinHandle<SequencingLaneError>, SequencingLaneStop) {
        let stop = self.stop.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let mut lane = self;
            match lane.run_forever() {
                Err(err) => err,
                Ok(()) => unreachable!("sequencing lane run loop is expected to be non-terminating"),
            }
        });
        (handle, stop)
    }

    fn run_forever(&mut self) -> Result<(), SequencingLaneError> {
        info!(
            next_hub_seq = self.storage.next_hub_seq(),
            "sequencing lane started"
        );

        while !self.stop.is_shutdown_requested() {
            let handled = self.process_request_chunk()?;
            if handled == 0 {
                thread::sleep(self.config.idle_poll_interval);
            }
        }

        Err(SequencingLaneError::ShutdownRequested)
    }

    fn process_request_chunk(&mut self) -> Result<usize, SequencingLaneError> {
        let max_chunk = self.config.max_requests_per_chunk.max(1);
        let mut handled = 0_usize;

        while handled < max_chunk {
            match self.rx.try_recv() {
                Ok(input) => {
                    self.apply(input)?;
                    handled = handled.saturating_add(1);
                }
                Err(mpsc::error::TryRecvError::Empty) => return Ok(handled),
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    if handled == 0 {
                        return Err(SequencingLaneError::ChannelClosed);
                    }
                    return Ok(handled);
                }
            }
        }
        Ok(handled)
    }

    fn apply(&mut self, input: SequencingLaneInput) -> Result<(), SequencingLaneError> {
        match input {
            SequencingLaneInput::Submit(item) => self.apply_submission(item),
            SequencingLaneInput::MarkDelivered(item) => self.apply_mark_delivered(item),
            SequencingLaneInput::ListPending(item) => {
                self.answer_list_pending(item);
                Ok(())
            }
        }
    }

    fn apply_submission(&mut self, item: PendingSubmission) -> Result<(), SequencingLaneError> {
        let PendingSubmission {
            packet,
            respond_to,
            received_at,
        } = item;

        match self.storage.submit(&packet) {
            Ok(SubmitOutcome::Registered { hub_seq }) => {
                let queued_for = SystemTime::now()
                    .duration_since(received_at)
                    .unwrap_or_default();
                debug!(
                    hub_seq,
                    key = %packet.key(),
                    queued_us = queued_for.as_micros() as u64,
                    "packet registered"
                );
                let _ = respond_to.send(Ok(hub_seq));
                Ok(())
            }
            Ok(SubmitOutcome::Duplicate { existing_hub_seq }) => {
                let _ = respond_to.send(Err(HubError::Duplicate {
                    key: packet.key(),
                    existing_hub_seq,
                }));
                Ok(())
            }
            Err(source) => {
                let _ = respond_to.send(Err(HubError::internal(format!("db error: {source}"))));
                Err(SequencingLaneError::Submit { source })
            }
        }
    }

    fn apply_mark_delivered(
        &mut self,
        item: PendingMarkDelivered,
    ) -> Result<(), SequencingLaneError> {
        match self.storage.mark_delivered(item.hub_seq) {
            Ok(changes) => {
                debug!(hub_seq = item.hub_seq, changes, "mark delivered");
                let _ = item.respond_to.send(Ok(changes as u64));
                Ok(())
            }
            Err(source) => {
                let _ = item
                    .respond_to
                    .send(Err(HubError::internal(format!("db error: {source}"))));
                Err(SequencingLaneError::MarkDelivered { source })
            }
        }
    }

    // Reads do not mutate the store, so a failed read is reported to the caller only.
    fn answer_list_pending(&mut self, item: PendingListRequest) {
        let result = self.storage.list_pending(item.limit).map_err(|err| {
            warn!(error = %err, "list pending failed");
            HubError::internal(format!("db error: {err}"))
        });
        let _ = item.respond_to.send(result);
    }
}
