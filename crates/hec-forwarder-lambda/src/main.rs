// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod handler;
mod logger;
mod runtime;

use std::{env, sync::Arc};
use tracing::{debug, error, info, Instrument};
use tracing_subscriber::EnvFilter;

use hec_forwarder::{Forwarder, ForwarderConfig};
use runtime::{ErrorPayload, RuntimeClient};

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{log_level}");

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .event_format(logger::Formatter)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let runtime = match RuntimeClient::from_env() {
        Ok(r) => r,
        Err(e) => {
            error!("Not running inside a Lambda custom runtime: {e}");
            return;
        }
    };

    let config = match ForwarderConfig::from_env() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Error loading forwarder configuration: {e}");
            report_init_error(&runtime, "ConfigError", &e).await;
            return;
        }
    };

    let forwarder = match Forwarder::new(Arc::clone(&config)) {
        Ok(f) => f,
        Err(e) => {
            error!("Error creating forwarder: {e}");
            report_init_error(&runtime, "ForwarderError", &e).await;
            return;
        }
    };

    info!(
        "Forwarding to {} ({} endpoint, ack {})",
        config.hec_host,
        config.endpoint_type,
        if config.ack_required { "required" } else { "disabled" }
    );

    loop {
        let invocation = match runtime.next_invocation().await {
            Ok(i) => i,
            Err(e) => {
                error!("Failed to fetch next invocation: {e}");
                return;
            }
        };

        let span = tracing::info_span!(
            "invocation",
            request_id = %invocation.request_id,
            remaining_ms = invocation
                .remaining()
                .map(|r| u64::try_from(r.as_millis()).unwrap_or(u64::MAX)),
        );
        if let Err(e) = handler::process(&runtime, &forwarder, &invocation)
            .instrument(span)
            .await
        {
            error!(
                "Failed to report result of invocation {}: {e}",
                invocation.request_id
            );
        }
    }
}

async fn report_init_error(
    runtime: &RuntimeClient,
    error_type: &str,
    error: &dyn std::error::Error,
) {
    if let Err(e) = runtime
        .init_error(&ErrorPayload::new(error_type, error))
        .await
    {
        error!("Failed to report init error: {e}");
    }
}
