// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SequencingLaneError {
    #[error("sequencing lane input channel closed")]
    ChannelClosed,
    #[error("sequencing lane shutdown requested")]
    ShutdownRequested,
    #[error("persist submission failed")]
    Submit {
        #[source]
        source: rusqlite::Error,
    },
    #[error("mark delivered failed")]
    MarkDelivered {
        #[source]
        source: rusqlite::Error,
    },
}
