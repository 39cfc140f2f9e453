// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Decoding of CloudWatch Logs subscription payloads.
//!
//! The subscription delivers `{"awslogs": {"data": "..."}}` where `data` is
//! a base64 string wrapping a gzip stream wrapping a JSON `LogBatch`:
//!
//! ```text
//!   base64 ──> gzip ──> JSON ──> LogBatch
//! ```
//!
//! Control messages (sent by CloudWatch to check that the destination is
//! reachable) decode fine but carry no data and are not forwarded.

use crate::error::DecodeError;
use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::io::Read;
use tracing::debug;

/// Lambda invocation event produced by a CloudWatch Logs subscription filter.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudWatchLogsEvent {
    pub awslogs: AwsLogs,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AwsLogs {
    /// base64 encoded, gzip compressed `LogBatch`
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    DataMessage,
    ControlMessage,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogBatch {
    pub message_type: MessageType,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub log_group: String,
    #[serde(default)]
    pub log_stream: String,
    #[serde(default)]
    pub subscription_filters: Vec<String>,
    #[serde(default)]
    pub log_events: Vec<LogEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogEvent {
    #[serde(default)]
    pub id: String,
    /// Epoch milliseconds
    #[serde(default)]
    pub timestamp: i64,
    pub message: String,
}

/// Result of decoding a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Data(LogBatch),
    /// A well-formed batch that must not be forwarded.
    NotDataMessage(MessageType),
}

/// Decodes the `awslogs.data` field of an invocation event.
pub fn decode_event(event: &CloudWatchLogsEvent) -> Result<Decoded, DecodeError> {
    decode(event.awslogs.data.as_bytes())
}

/// Decodes a base64 + gzip + JSON payload, preserving log event order.
pub fn decode(raw: &[u8]) -> Result<Decoded, DecodeError> {
    let compressed = STANDARD.decode(raw)?;

    let mut json = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut json)
        .map_err(DecodeError::Gzip)?;
    debug!(
        "HEC | Decompressed payload {} -> {} bytes",
        compressed.len(),
        json.len()
    );

    let batch: LogBatch = serde_json::from_slice(&json)?;
    if batch.message_type != MessageType::DataMessage {
        return Ok(Decoded::NotDataMessage(batch.message_type));
    }

    debug!(
        "HEC | Decoded {} log events from {}/{}",
        batch.log_events.len(),
        batch.log_group,
        batch.log_stream
    );
    Ok(Decoded::Data(batch))
}
