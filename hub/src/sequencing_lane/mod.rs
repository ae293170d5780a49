// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

//! The single writer of the packet store.
//!
//! Every hub operation is funnelled through one channel into a blocking thread that owns the
//! [`crate::storage::Storage`]. Requests are applied one at a time, each in its own
//! transaction, so "check uniqueness + assign next hub sequence + persist" can never be
//! interleaved by a concurrent submission.
mod error;
mod lane;
mod types;

pub use error::SequencingLaneError;
pub use lane::{SequencingLane, SequencingLaneConfig, SequencingLaneStop};
pub use types::{
    HubError, PendingListRequest, PendingMarkDelivered, PendingSubmission, SequencingLaneInput,
};
