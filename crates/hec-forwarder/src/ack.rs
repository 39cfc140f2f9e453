// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Indexer acknowledgement polling.
//!
//! ```text
//!             ┌──────────── false / non-200 (budget left) ───┐
//!             v                                              │
//!   ──> ┌─────────┐ ── ack true ──────> Confirmed            │
//!       │ Pending │ ── transport error ─> ConnectionError    │
//!       └─────────┘ ─────────────────────────────────────────┘
//!             │
//!             └── budget spent ──> Exhausted
//! ```
//!
//! The caller waits `ack_wait` before the first poll. A poll runs at most
//! `ack_retries + 1` times.

use crate::client::{collector_endpoint, Channel, SessionAffinity};
use crate::config::ForwarderConfig;
use crate::error::ConfigError;
use reqwest::header::{HeaderValue, AUTHORIZATION, COOKIE};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct AckRequest {
    acks: [u64; 1],
}

#[derive(Debug, Deserialize)]
struct AckResponse {
    acks: HashMap<String, bool>,
}

#[derive(Debug)]
pub enum AckOutcome {
    Confirmed {
        attempts: u32,
    },
    Exhausted {
        attempts: u32,
        last_status: Option<StatusCode>,
        /// Only captured when `debug` is enabled.
        last_body: Option<String>,
    },
    ConnectionError {
        attempts: u32,
        error: reqwest::Error,
    },
}

#[derive(Debug, Clone)]
pub struct AckPoller {
    client: reqwest::Client,
    config: Arc<ForwarderConfig>,
    ack_url: Url,
    authorization: HeaderValue,
}

impl AckPoller {
    pub fn new(client: reqwest::Client, config: Arc<ForwarderConfig>) -> Result<Self, ConfigError> {
        Ok(AckPoller {
            ack_url: collector_endpoint(&config, "ack")?,
            authorization: config.authorization_header()?,
            client,
            config,
        })
    }

    fn ack_url(&self, channel: Channel) -> Url {
        let mut url = self.ack_url.clone();
        url.query_pairs_mut()
            .append_pair("channel", &channel.to_string());
        url
    }

    /// Polls until `ack_id` is confirmed, the retry budget runs out, or the
    /// connection fails.
    pub async fn poll(
        &self,
        channel: Channel,
        ack_id: u64,
        affinity: Option<&SessionAffinity>,
    ) -> AckOutcome {
        let url = self.ack_url(channel);
        let payload = AckRequest { acks: [ack_id] };
        let key = ack_id.to_string();

        let mut attempts: u32 = 0;
        let mut last_status = None;
        let mut last_body = None;

        // ack_retries + 1 attempts, no overflow at u32::MAX
        for _ in 0..=self.config.ack_retries {
            attempts = attempts.saturating_add(1);
            let mut request = self
                .client
                .post(url.clone())
                .header(AUTHORIZATION, self.authorization.clone())
                .json(&payload);
            if let Some(affinity) = affinity {
                request = request.header(COOKIE, affinity.header_value());
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(error) => {
                    warn!("HEC | Ack poll {attempts} for ack id {ack_id} failed to connect: {error}");
                    return AckOutcome::ConnectionError { attempts, error };
                }
            };

            let status = response.status();
            last_status = Some(status);
            if status != StatusCode::OK {
                debug!("HEC | Ack poll {attempts} for ack id {ack_id} returned {status}");
                if self.config.debug {
                    last_body = response.text().await.ok();
                }
                continue;
            }

            let body = match response.text().await {
                Ok(body) => body,
                Err(error) => return AckOutcome::ConnectionError { attempts, error },
            };
            match serde_json::from_str::<AckResponse>(&body) {
                Ok(parsed) if parsed.acks.get(&key).copied().unwrap_or(false) => {
                    debug!("HEC | Ack id {ack_id} confirmed after {attempts} polls");
                    return AckOutcome::Confirmed { attempts };
                }
                Ok(_) => debug!("HEC | Ack id {ack_id} not yet indexed, poll {attempts}"),
                Err(e) => warn!("HEC | Unreadable ack response for ack id {ack_id}: {e}"),
            }
            if self.config.debug {
                last_body = Some(body);
            }
        }

        AckOutcome::Exhausted {
            attempts,
            last_status,
            last_body,
        }
    }
}
