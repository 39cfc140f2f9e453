// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while turning a subscription payload into a `LogBatch`.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not valid gzip: {0}")]
    Gzip(#[source] std::io::Error),

    #[error("payload is not a valid log batch: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while building an event-mode body.
#[derive(Debug, thiserror::Error)]
#[error("failed to build event envelope: {0}")]
pub struct FormatError(#[from] pub serde_json::Error);

/// Errors raised while reading `ForwarderConfig` from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    Missing(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Fatal errors for a single invocation. Expected HEC conditions
/// (rejections, timeouts, unconfirmed acks) are reported through
/// `Outcome` instead.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error(transparent)]
    Endpoint(#[from] ConfigError),
}
