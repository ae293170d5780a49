// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::time::Duration;

use async_trait::async_trait;
use relay_core::packet::{HubRecord, Packet};
use relay_core::wire::{
    ErrorResponse, HealthResponse, MarkDeliveredRequest, MarkDeliveredResponse, PendingResponse,
    SubmitRequest, SubmitResponse,
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{HubApi, HubClientError, SubmitOutcome};

#[derive(Debug, Clone)]
pub struct HubClient {
    http: reqwest::Client,
    base_url: String,
}

impl HubClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, HubClientError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl HubApi for HubClient {
    async fn health(&self) -> Result<(), HubClientError> {
        let response = self.http.get(self.url("/health")).send().await?;
        let health: HealthResponse = decode(response).await?;
        if !health.ok {
            return Err(HubClientError::Unavailable(
                "hub reported not ok".to_string(),
            ));
        }
        Ok(())
    }

    async fn submit(&self, packet: &Packet) -> Result<SubmitOutcome, HubClientError> {
        let response = self
            .http
            .post(self.url("/submit"))
            .json(&SubmitRequest::from(packet))
            .send()
            .await?;
        match decode::<SubmitResponse>(response).await {
            Ok(body) => Ok(SubmitOutcome::Registered {
                hub_seq: body.hub_seq,
            }),
            Err(HubClientError::Conflict {
                message, hub_seq, ..
            }) => {
                debug!(key = %packet.key(), ?hub_seq, %message, "hub reported duplicate");
                Ok(SubmitOutcome::Duplicate {
                    existing_hub_seq: hub_seq,
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<HubRecord>, HubClientError> {
        let response = self
            .http
            .get(self.url("/pending"))
            .query(&[("limit", limit)])
            .send()
            .await?;
        let body: PendingResponse = decode(response).await?;
        body.packets
            .into_iter()
            .map(|record| {
                let hub_seq = record.hub_seq;
                HubRecord::try_from(record)
                    .map_err(|err| HubClientError::Decode(format!("record {hub_seq}: {err}")))
            })
            .collect()
    }

    async fn mark_delivered(&self, hub_seq: u64) -> Result<u64, HubClientError> {
        let response = self
            .http
            .post(self.url("/markDelivered"))
            .json(&MarkDeliveredRequest { hub_seq })
            .send()
            .await?;
        let body: MarkDeliveredResponse = decode(response).await?;
        Ok(body.changes)
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, HubClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let body = response.text().await.unwrap_or_default();
    let (code, message, hub_seq) = match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(err) => (err.code, err.message, err.hub_seq),
        Err(_) => (String::new(), body, None),
    };
    Err(match status {
        StatusCode::CONFLICT => HubClientError::Conflict {
            code,
            message,
            hub_seq,
        },
        StatusCode::TOO_MANY_REQUESTS => HubClientError::Overloaded { message },
        status if status.is_client_error() => HubClientError::Rejected {
            status: status.as_u16(),
            code,
            message,
        },
        status => HubClientError::Server {
            status: status.as_u16(),
            code,
            message,
        },
    })
}
