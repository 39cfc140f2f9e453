// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::runtime::{ErrorPayload, Invocation, RuntimeClient, RuntimeError};
use hec_forwarder::forwarder::Diagnostics;
use hec_forwarder::{CloudWatchLogsEvent, ForwardError, ForwardReport, Forwarder};
use tracing::{error, info};

/// Errors reported back to Lambda through the invocation error endpoint.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("invocation is not a CloudWatch Logs event: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error(transparent)]
    Forward(#[from] ForwardError),
}

impl HandlerError {
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            HandlerError::Envelope(_) => "InvalidEvent",
            HandlerError::Forward(ForwardError::Decode(_)) => "DecodeError",
            HandlerError::Forward(ForwardError::Format(_)) => "FormatError",
            HandlerError::Forward(_) => "ForwarderError",
        }
    }
}

pub async fn handle(forwarder: &Forwarder, body: &[u8]) -> Result<ForwardReport, HandlerError> {
    let event: CloudWatchLogsEvent = serde_json::from_slice(body)?;
    let report = forwarder.forward(event.awslogs.data.as_bytes()).await?;
    if let Some(diagnostics) = &report.diagnostics {
        log_diagnostics(diagnostics);
    }
    Ok(report)
}

/// Runs one invocation and posts its result to the runtime API.
pub async fn process(
    runtime: &RuntimeClient,
    forwarder: &Forwarder,
    invocation: &Invocation,
) -> Result<(), RuntimeError> {
    match handle(forwarder, &invocation.body).await {
        Ok(report) => {
            runtime
                .send_response(&invocation.request_id, &report)
                .await
        }
        Err(e) => {
            error!("HEC | Invocation failed: {e}");
            let payload = ErrorPayload::new(e.error_type(), &e);
            runtime.send_error(&invocation.request_id, &payload).await
        }
    }
}

fn log_diagnostics(diagnostics: &Diagnostics) {
    info!(
        url = %diagnostics.request_url,
        headers = ?diagnostics.request_headers,
        body = %diagnostics.request_body,
        "HEC | Request data"
    );
    info!(
        status = ?diagnostics.submit_status,
        response = ?diagnostics.submit_response,
        "HEC | Ingestion response"
    );
    if let Some(attempts) = diagnostics.ack_attempts {
        info!(
            attempts,
            retries = diagnostics.ack_retries,
            status = ?diagnostics.last_ack_status,
            response = ?diagnostics.last_ack_response,
            "HEC | Acknowledgement response"
        );
    }
}
