// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Minimal client for the Lambda custom runtime API.
//!
//! ```text
//!   GET  /2018-06-01/runtime/invocation/next
//!   POST /2018-06-01/runtime/invocation/{request_id}/response
//!   POST /2018-06-01/runtime/invocation/{request_id}/error
//!   POST /2018-06-01/runtime/init/error
//! ```

use reqwest::StatusCode;
use serde::Serialize;
use std::env;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

const RUNTIME_API_VERSION: &str = "2018-06-01";
const REQUEST_ID_HEADER: &str = "Lambda-Runtime-Aws-Request-Id";
const DEADLINE_HEADER: &str = "Lambda-Runtime-Deadline-Ms";
const ERROR_TYPE_HEADER: &str = "Lambda-Runtime-Function-Error-Type";

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("AWS_LAMBDA_RUNTIME_API environment variable is not set")]
    MissingEndpoint,

    #[error("runtime API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("runtime API returned {status} for {path}")]
    Status { status: StatusCode, path: String },

    #[error("invocation is missing the Lambda-Runtime-Aws-Request-Id header")]
    MissingRequestId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub request_id: String,
    /// Epoch milliseconds after which Lambda kills the invocation
    pub deadline_ms: Option<u64>,
    pub body: Vec<u8>,
}

impl Invocation {
    /// Time left before `deadline_ms`, zero once it has passed.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.remaining_at(SystemTime::now())
    }

    fn remaining_at(&self, now: SystemTime) -> Option<Duration> {
        let deadline = UNIX_EPOCH + Duration::from_millis(self.deadline_ms?);
        Some(deadline.duration_since(now).unwrap_or(Duration::ZERO))
    }
}

/// Body of the `/error` endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub error_message: String,
    pub error_type: String,
}

impl ErrorPayload {
    pub fn new(error_type: &str, error: &dyn std::error::Error) -> Self {
        ErrorPayload {
            error_message: error.to_string(),
            error_type: error_type.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeClient {
    // No request timeout: `invocation/next` blocks until an event arrives
    client: reqwest::Client,
    base_url: String,
}

impl RuntimeClient {
    /// `endpoint` is the `host:port` Lambda exposes in `AWS_LAMBDA_RUNTIME_API`.
    #[must_use]
    pub fn new(endpoint: &str) -> Self {
        RuntimeClient {
            client: reqwest::Client::new(),
            base_url: format!("http://{endpoint}/{RUNTIME_API_VERSION}/runtime"),
        }
    }

    pub fn from_env() -> Result<Self, RuntimeError> {
        let endpoint =
            env::var("AWS_LAMBDA_RUNTIME_API").map_err(|_| RuntimeError::MissingEndpoint)?;
        Ok(Self::new(&endpoint))
    }

    pub async fn next_invocation(&self) -> Result<Invocation, RuntimeError> {
        let path = "invocation/next";
        let response = self
            .client
            .get(format!("{}/{path}", self.base_url))
            .send()
            .await?;
        let response = check_status(response, path)?;

        let headers = response.headers();
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(RuntimeError::MissingRequestId)?;
        let deadline_ms = headers
            .get(DEADLINE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let body = response.bytes().await?.to_vec();
        debug!("Received invocation {request_id} ({} bytes)", body.len());
        Ok(Invocation {
            request_id,
            deadline_ms,
            body,
        })
    }

    pub async fn send_response<T: Serialize + ?Sized>(
        &self,
        request_id: &str,
        response: &T,
    ) -> Result<(), RuntimeError> {
        let path = format!("invocation/{request_id}/response");
        let response = self
            .client
            .post(format!("{}/{path}", self.base_url))
            .json(response)
            .send()
            .await?;
        check_status(response, &path).map(|_| ())
    }

    pub async fn send_error(
        &self,
        request_id: &str,
        error: &ErrorPayload,
    ) -> Result<(), RuntimeError> {
        self.post_error(&format!("invocation/{request_id}/error"), error)
            .await
    }

    pub async fn init_error(&self, error: &ErrorPayload) -> Result<(), RuntimeError> {
        self.post_error("init/error", error).await
    }

    async fn post_error(&self, path: &str, error: &ErrorPayload) -> Result<(), RuntimeError> {
        let response = self
            .client
            .post(format!("{}/{path}", self.base_url))
            .header(ERROR_TYPE_HEADER, error.error_type.as_str())
            .json(error)
            .send()
            .await?;
        check_status(response, path).map(|_| ())
    }
}

fn check_status(
    response: reqwest::Response,
    path: &str,
) -> Result<reqwest::Response, RuntimeError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(RuntimeError::Status {
            status: response.status(),
            path: path.to_string(),
        })
    }
}
