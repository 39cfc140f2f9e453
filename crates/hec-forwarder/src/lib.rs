// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Forwards CloudWatch Logs subscription batches to a Splunk HTTP Event
//! Collector, optionally confirming durable receipt through indexer
//! acknowledgement.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod ack;
pub mod client;
pub mod config;
pub mod decoder;
pub mod error;
pub mod formatter;
pub mod forwarder;
pub mod http;

pub use config::{EndpointType, ForwarderConfig};
pub use decoder::{CloudWatchLogsEvent, LogBatch, LogEvent};
pub use error::{ConfigError, DecodeError, ForwardError};
pub use formatter::{MessageLine, Transform};
pub use forwarder::{ForwardReport, Forwarder, Outcome};
