// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::ForwarderConfig;
use core::time::Duration;
use tracing::warn;

/// Builds the client shared by submissions and ack polls.
///
/// Every request inherits `request_timeout`. With `verify_ssl` off the
/// client accepts self-signed and mismatched certificates.
pub fn build_client(config: &ForwarderConfig) -> Result<reqwest::Client, reqwest::Error> {
    if !config.verify_ssl {
        warn!("HEC | TLS certificate verification is disabled");
    }

    reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(config.request_timeout)
        .connect_timeout(config.request_timeout)
        .danger_accept_invalid_certs(!config.verify_ssl)
        // Warm Lambda containers reuse the pool between invocations
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)))
        .build()
}
