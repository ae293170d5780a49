// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubClientError {
    #[error("hub unreachable: {0}")]
    Unavailable(String),
    #[error("hub request timed out")]
    Timeout,
    #[error("hub overloaded: {message}")]
    Overloaded { message: String },
    #[error("hub conflict ({code}): {message}")]
    Conflict {
        code: String,
        message: String,
        hub_seq: Option<u64>,
    },
    #[error("hub rejected request with {status} ({code}): {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },
    #[error("hub failed with {status} ({code}): {message}")]
    Server {
        status: u16,
        code: String,
        message: String,
    },
    #[error("unexpected hub response: {0}")]
    Decode(String),
}

impl HubClientError {
    /// True when retrying the same request later may succeed.
    ///
    /// `Timeout` is ambiguous: the hub may have applied the request before the answer was lost,
    /// so a retried submit can come back as a duplicate of its own registration.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Timeout | Self::Overloaded { .. }
        )
    }
}

impl From<reqwest::Error> for HubClientError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            Self::Timeout
        } else if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Unavailable(value.to_string())
        }
    }
}
