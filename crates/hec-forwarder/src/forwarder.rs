// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! End-to-end handling of one subscription payload.
//!
//! ```text
//!   payload
//!      │
//!      v
//!   ┌─────────┐  not DATA_MESSAGE
//!   │ decode  │ ─────────────────────> Skipped
//!   └────┬────┘
//!        v
//!   ┌─────────┐  empty body
//!   │ format  │ ─────────────────────> Skipped
//!   └────┬────┘
//!        v
//!   ┌─────────┐  non-200 / not Success
//!   │ submit  │ ─────────────────────> IngestionFailed | ConnectionError
//!   └────┬────┘
//!        │ ack not required ─────────> Delivered
//!        v
//!   ┌─────────┐
//!   │ ack     │ ─────────────────────> Acknowledged | AckFailed | ConnectionError
//!   └─────────┘
//! ```

use crate::ack::{AckOutcome, AckPoller};
use crate::client::{Channel, HecClient, PreparedRequest, SubmitResult};
use crate::config::ForwarderConfig;
use crate::decoder::{decode, Decoded};
use crate::error::ForwardError;
use crate::formatter::{format, MessageLine, Transform};
use crate::http::build_client;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotDataMessage,
    EmptyBatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckFailureReason {
    /// The retry budget ran out without a positive ack.
    Exhausted,
    /// Ack was required but the submission response had no `ackId`.
    MissingAckId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Submit,
    Ack,
}

/// Terminal status of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Skipped {
        reason: SkipReason,
    },
    /// Accepted and confirmed as indexed.
    Acknowledged {
        ack_id: u64,
    },
    /// Accepted; acknowledgement was not requested.
    Delivered,
    IngestionFailed {
        http_status: u16,
        response: String,
    },
    /// Accepted by HEC but durability is unconfirmed.
    AckFailed {
        ack_id: Option<u64>,
        reason: AckFailureReason,
        attempts: u32,
        last_status: Option<u16>,
    },
    ConnectionError {
        stage: Stage,
        message: String,
    },
}

impl Outcome {
    /// True when HEC accepted the data, whether or not durability was confirmed.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(
            self,
            Outcome::Acknowledged { .. } | Outcome::Delivered | Outcome::AckFailed { .. }
        )
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Outcome::IngestionFailed { .. }
                | Outcome::AckFailed { .. }
                | Outcome::ConnectionError { .. }
        )
    }
}

/// Request and response details, filled in only when `debug` is enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub request_url: String,
    pub request_headers: Vec<(String, String)>,
    pub request_body: String,
    pub submit_status: Option<u16>,
    pub submit_response: Option<String>,
    pub ack_retries: u32,
    pub ack_attempts: Option<u32>,
    pub last_ack_status: Option<u16>,
    pub last_ack_response: Option<String>,
}

impl Diagnostics {
    fn for_request(request: &PreparedRequest, ack_retries: u32) -> Self {
        Diagnostics {
            request_url: request.url.to_string(),
            request_headers: request.redacted_headers(),
            request_body: request.body.clone(),
            ack_retries,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForwardReport {
    #[serde(flatten)]
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Diagnostics>,
}

impl ForwardReport {
    fn new(outcome: Outcome, diagnostics: Option<Diagnostics>) -> Self {
        ForwardReport {
            outcome,
            diagnostics,
        }
    }
}

/// Wires decoder, formatter, HEC client and ack poller for one
/// configuration. Cheap to share across invocations.
#[derive(Clone)]
pub struct Forwarder {
    config: Arc<ForwarderConfig>,
    client: HecClient,
    poller: AckPoller,
    transform: Arc<dyn Transform>,
}

impl Forwarder {
    pub fn new(config: Arc<ForwarderConfig>) -> Result<Self, ForwardError> {
        Self::with_transform(config, Arc::new(MessageLine))
    }

    pub fn with_transform(
        config: Arc<ForwarderConfig>,
        transform: Arc<dyn Transform>,
    ) -> Result<Self, ForwardError> {
        let http_client = build_client(&config)?;
        let client = HecClient::new(http_client.clone(), Arc::clone(&config))?;
        let poller = AckPoller::new(http_client, Arc::clone(&config))?;
        Ok(Forwarder {
            config,
            client,
            poller,
            transform,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    /// Decodes `raw`, submits it and, when required, waits for the
    /// indexer acknowledgement.
    pub async fn forward(&self, raw: &[u8]) -> Result<ForwardReport, ForwardError> {
        let batch = match decode(raw)? {
            Decoded::Data(batch) => batch,
            Decoded::NotDataMessage(message_type) => {
                debug!("HEC | Skipping {message_type:?} batch");
                return Ok(ForwardReport::new(
                    Outcome::Skipped {
                        reason: SkipReason::NotDataMessage,
                    },
                    None,
                ));
            }
        };

        let body = format(
            &batch.log_events,
            self.config.endpoint_type,
            &self.config.source_type,
            self.transform.as_ref(),
        )?;
        if body.is_empty() {
            debug!("HEC | Nothing to send for {}/{}", batch.log_group, batch.log_stream);
            return Ok(ForwardReport::new(
                Outcome::Skipped {
                    reason: SkipReason::EmptyBatch,
                },
                None,
            ));
        }

        let channel = Channel::new();
        let records = body.records;
        let request = self.client.prepare(body, channel);
        let mut diagnostics = self
            .config
            .debug
            .then(|| Diagnostics::for_request(&request, self.config.ack_retries));

        debug!(
            "HEC | Sending {records} records from {} to {} endpoint on channel {channel}",
            batch.log_group, self.config.endpoint_type
        );
        let outcome = match self.client.submit(&request).await {
            SubmitResult::ConnectionError(e) => Outcome::ConnectionError {
                stage: Stage::Submit,
                message: e.to_string(),
            },
            SubmitResult::Failure { status, response } => {
                if let Some(d) = diagnostics.as_mut() {
                    d.submit_status = Some(status.as_u16());
                    d.submit_response = Some(response.clone());
                }
                Outcome::IngestionFailed {
                    http_status: status.as_u16(),
                    response,
                }
            }
            SubmitResult::Accepted {
                ack_id,
                affinity,
                response,
            } => {
                if let Some(d) = diagnostics.as_mut() {
                    d.submit_status = Some(200);
                    d.submit_response = Some(response);
                }
                match (self.config.ack_required, ack_id) {
                    (false, _) => Outcome::Delivered,
                    (true, None) => Outcome::AckFailed {
                        ack_id: None,
                        reason: AckFailureReason::MissingAckId,
                        attempts: 0,
                        last_status: None,
                    },
                    (true, Some(ack_id)) => {
                        tokio::time::sleep(self.config.ack_wait).await;
                        let ack = self.poller.poll(channel, ack_id, affinity.as_ref()).await;
                        self.ack_outcome(ack_id, ack, diagnostics.as_mut())
                    }
                }
            }
        };

        log_outcome(&outcome, records);
        Ok(ForwardReport::new(outcome, diagnostics))
    }

    fn ack_outcome(
        &self,
        ack_id: u64,
        ack: AckOutcome,
        diagnostics: Option<&mut Diagnostics>,
    ) -> Outcome {
        match ack {
            AckOutcome::Confirmed { attempts } => {
                if let Some(d) = diagnostics {
                    d.ack_attempts = Some(attempts);
                    d.last_ack_status = Some(200);
                }
                Outcome::Acknowledged { ack_id }
            }
            AckOutcome::Exhausted {
                attempts,
                last_status,
                last_body,
            } => {
                if let Some(d) = diagnostics {
                    d.ack_attempts = Some(attempts);
                    d.last_ack_status = last_status.map(|s| s.as_u16());
                    d.last_ack_response = last_body;
                }
                Outcome::AckFailed {
                    ack_id: Some(ack_id),
                    reason: AckFailureReason::Exhausted,
                    attempts,
                    last_status: last_status.map(|s| s.as_u16()),
                }
            }
            AckOutcome::ConnectionError { attempts, error } => {
                if let Some(d) = diagnostics {
                    d.ack_attempts = Some(attempts);
                }
                Outcome::ConnectionError {
                    stage: Stage::Ack,
                    message: error.to_string(),
                }
            }
        }
    }
}

fn log_outcome(outcome: &Outcome, records: usize) {
    match outcome {
        Outcome::Acknowledged { ack_id } => {
            info!("HEC | Ingestion success with acknowledgement: {records} records, ack id {ack_id}");
        }
        Outcome::Delivered => info!("HEC | Ingestion success without acknowledgement: {records} records"),
        Outcome::IngestionFailed {
            http_status,
            response,
        } => {
            error!("HEC | Ingestion failed with status {http_status}: {response}");
        }
        Outcome::AckFailed {
            ack_id,
            reason,
            attempts,
            ..
        } => warn!(
            "HEC | Acknowledgement failed ({reason:?}) for ack id {ack_id:?} after {attempts} polls"
        ),
        Outcome::ConnectionError { stage, message } => {
            error!("HEC | Connection error during {stage:?}: {message}");
        }
        Outcome::Skipped { .. } => {}
    }
}
