// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use relay_core::wire::{
    CODE_BAD_REQUEST, CODE_DUPLICATE, CODE_INTERNAL_ERROR, CODE_OVERLOADED, ErrorResponse,
};
use thiserror::Error;

use crate::sequencing_lane::HubError;

#[derive(Debug, Error, Clone)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{message}")]
    Duplicate {
        message: String,
        existing_hub_seq: u64,
    },
    #[error("{0}")]
    InternalError(String),
    #[error("{0}")]
    Overloaded(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError(message.into())
    }

    pub fn overloaded(message: impl Into<String>) -> Self {
        Self::Overloaded(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            // A client error: the packet is already registered, retrying cannot help.
            Self::Duplicate { .. } => StatusCode::CONFLICT,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Overloaded(_) => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => CODE_BAD_REQUEST,
            Self::Duplicate { .. } => CODE_DUPLICATE,
            Self::InternalError(_) => CODE_INTERNAL_ERROR,
            Self::Overloaded(_) => CODE_OVERLOADED,
        }
    }
}

impl From<HubError> for ApiError {
    fn from(value: HubError) -> Self {
        match value {
            err @ HubError::Duplicate {
                existing_hub_seq, ..
            } => Self::Duplicate {
                message: err.to_string(),
                existing_hub_seq,
            },
            HubError::Internal(message) => Self::InternalError(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let hub_seq = match &self {
            Self::Duplicate {
                existing_hub_seq, ..
            } => Some(*existing_hub_seq),
            _ => None,
        };
        let body = ErrorResponse {
            ok: false,
            code: self.code().to_string(),
            message: self.to_string(),
            hub_seq,
        };
        (self.status(), Json(body)).into_response()
    }
}
