// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

mod error;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::Router;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Json, Query, State};
use axum::routing::{get, post};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::info;

use relay_core::hex::decode_hex_0x;
use relay_core::packet::{Packet, Proof};
use relay_core::wire::{
    HealthResponse, MarkDeliveredRequest, MarkDeliveredResponse, PendingRecord, PendingResponse,
    SubmitRequest, SubmitResponse,
};

use crate::sequencing_lane::{
    PendingListRequest, PendingMarkDelivered, PendingSubmission, SequencingLaneInput,
};
use crate::storage::MAX_SRC_SEQ;
use crate::verifier::ProofVerifier;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub lane_sender: mpsc::Sender<SequencingLaneInput>,
    pub queue_timeout: Duration,
    pub verifier: Arc<dyn ProofVerifier>,
    pub default_pending_limit: usize,
    pub max_pending_limit: usize,
}

#[derive(Debug, Deserialize)]
struct PendingQuery {
    limit: Option<usize>,
}

pub fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/submit", post(submit_packet))
        .route("/pending", get(list_pending))
        .route("/markDelivered", post(mark_delivered))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}

async fn submit_packet(
    State(state): State<Arc<AppState>>,
    req: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(req) = req.map_err(|err| ApiError::bad_request(format!("invalid JSON: {err}")))?;
    let packet = validate_submission(req)?;
    state
        .verifier
        .verify(&packet)
        .map_err(|reason| ApiError::bad_request(format!("proof rejected: {reason}")))?;

    let key = packet.key();
    let (respond_to, recv) = oneshot::channel();
    enqueue(
        &state,
        SequencingLaneInput::Submit(PendingSubmission {
            packet,
            respond_to,
            received_at: SystemTime::now(),
        }),
    )
    .await?;

    let hub_seq = recv
        .await
        .map_err(|_| ApiError::internal_error("sequencing lane dropped response"))?
        .map_err(ApiError::from)?;

    info!(hub_seq, key = %key, "packet sequenced");
    Ok(Json(SubmitResponse { ok: true, hub_seq }))
}

async fn list_pending(
    State(state): State<Arc<AppState>>,
    query: Result<Query<PendingQuery>, QueryRejection>,
) -> Result<Json<PendingResponse>, ApiError> {
    let Query(query) =
        query.map_err(|err| ApiError::bad_request(format!("invalid query: {err}")))?;
    let limit = query
        .limit
        .unwrap_or(state.default_pending_limit)
        .min(state.max_pending_limit);

    let (respond_to, recv) = oneshot::channel();
    enqueue(
        &state,
        SequencingLaneInput::ListPending(PendingListRequest { limit, respond_to }),
    )
    .await?;

    let records = recv
        .await
        .map_err(|_| ApiError::internal_error("sequencing lane dropped response"))?
        .map_err(ApiError::from)?;

    Ok(Json(PendingResponse {
        packets: records.iter().map(PendingRecord::from).collect(),
    }))
}

async fn mark_delivered(
    State(state): State<Arc<AppState>>,
    req: Result<Json<MarkDeliveredRequest>, JsonRejection>,
) -> Result<Json<MarkDeliveredResponse>, ApiError> {
    let Json(req) = req.map_err(|err| ApiError::bad_request(format!("invalid JSON: {err}")))?;
    if req.hub_seq == 0 {
        return Err(ApiError::bad_request("hubSeq must be a positive integer"));
    }

    let (respond_to, recv) = oneshot::channel();
    enqueue(
        &state,
        SequencingLaneInput::MarkDelivered(PendingMarkDelivered {
            hub_seq: req.hub_seq,
            respond_to,
        }),
    )
    .await?;

    let changes = recv
        .await
        .map_err(|_| ApiError::internal_error("sequencing lane dropped response"))?
        .map_err(ApiError::from)?;

    info!(hub_seq = req.hub_seq, changes, "mark delivered");
    Ok(Json(MarkDeliveredResponse { ok: true, changes }))
}

fn validate_submission(req: SubmitRequest) -> Result<Packet, ApiError> {
    require_non_empty("srcChainId", &req.src_chain_id)?;
    require_non_empty("dstChainId", &req.dst_chain_id)?;
    require_non_empty("sender", &req.sender)?;
    require_non_empty("receiver", &req.receiver)?;
    require_non_empty("commitment", &req.commitment)?;
    if req.src_seq > MAX_SRC_SEQ {
        return Err(ApiError::bad_request(format!(
            "srcSeq must not exceed {MAX_SRC_SEQ}"
        )));
    }

    let payload = decode_hex_0x(&req.payload_hex)
        .map_err(|err| ApiError::bad_request(format!("payloadHex: {err}")))?;
    if req.proof.is_null() {
        return Err(ApiError::bad_request("proof is required"));
    }

    Ok(Packet {
        src_chain_id: req.src_chain_id,
        dst_chain_id: req.dst_chain_id,
        src_seq: req.src_seq,
        sender: req.sender,
        receiver: req.receiver,
        payload,
        commitment: req.commitment,
        proof: Proof::new(req.proof),
    })
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::bad_request(format!("{field} must not be empty")));
    }
    Ok(())
}

async fn enqueue(state: &AppState, input: SequencingLaneInput) -> Result<(), ApiError> {
    match state
        .lane_sender
        .send_timeout(input, state.queue_timeout)
        .await
    {
        Ok(()) => Ok(()),
        Err(SendTimeoutError::Timeout(_)) => Err(ApiError::overloaded("queue full")),
        Err(SendTimeoutError::Closed(_)) => {
            Err(ApiError::internal_error("sequencing lane unavailable"))
        }
    }
}
