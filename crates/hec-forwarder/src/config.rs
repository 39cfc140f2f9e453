// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::ConfigError;
use reqwest::header::HeaderValue;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const COLLECTOR_PATH: &str = "/services/collector";
const DEFAULT_SOURCE_TYPE: &str = "aws:cloudwatchlogs";
const DEFAULT_ACK_WAIT_SECS: u64 = 3;
const DEFAULT_ACK_RETRIES: u32 = 3;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;
/// Below this the indexer rarely has an ack ready on the first poll.
const RECOMMENDED_MIN_ACK_WAIT_SECS: u64 = 3;

/// HEC submission mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndpointType {
    /// `/services/collector/raw`: opaque text, channel in the query string.
    #[default]
    Raw,
    /// `/services/collector/event`: JSON envelopes, channel in a header.
    Event,
}

impl FromStr for EndpointType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "raw" => Ok(EndpointType::Raw),
            "event" => Ok(EndpointType::Event),
            other => Err(ConfigError::Invalid(format!(
                "HEC_ENDPOINT_TYPE must be 'raw' or 'event', got '{other}'"
            ))),
        }
    }
}

impl fmt::Display for EndpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointType::Raw => f.write_str("raw"),
            EndpointType::Event => f.write_str("event"),
        }
    }
}

/// Immutable forwarder configuration, built once per process.
#[derive(Clone)]
pub struct ForwarderConfig {
    /// HEC host as configured, e.g. `https://splunk.example.com:8088`
    pub hec_host: String,
    pub hec_token: String,
    pub endpoint_type: EndpointType,
    pub source_type: String,
    pub ack_required: bool,
    /// Delay between a successful submission and the first ack poll
    pub ack_wait: Duration,
    /// Number of extra ack polls after the first one
    pub ack_retries: u32,
    pub request_timeout: Duration,
    pub verify_ssl: bool,
    /// Load balancer cookie used for ack session affinity. `None` disables it.
    pub elb_cookie_name: Option<String>,
    /// Attach request/response diagnostics to every report
    pub debug: bool,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            hec_host: String::new(),
            hec_token: String::new(),
            endpoint_type: EndpointType::Raw,
            source_type: DEFAULT_SOURCE_TYPE.to_string(),
            ack_required: false,
            ack_wait: Duration::from_secs(DEFAULT_ACK_WAIT_SECS),
            ack_retries: DEFAULT_ACK_RETRIES,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            verify_ssl: true,
            elb_cookie_name: None,
            debug: false,
        }
    }
}

// The token must never end up in logs.
impl fmt::Debug for ForwarderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwarderConfig")
            .field("hec_host", &self.hec_host)
            .field("hec_token", &"<redacted>")
            .field("endpoint_type", &self.endpoint_type)
            .field("source_type", &self.source_type)
            .field("ack_required", &self.ack_required)
            .field("ack_wait", &self.ack_wait)
            .field("ack_retries", &self.ack_retries)
            .field("request_timeout", &self.request_timeout)
            .field("verify_ssl", &self.verify_ssl)
            .field("elb_cookie_name", &self.elb_cookie_name)
            .field("debug", &self.debug)
            .finish()
    }
}

impl ForwarderConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let hec_host = env::var("HEC_HOST").map_err(|_| ConfigError::Missing("HEC_HOST"))?;
        let hec_token = env::var("HEC_TOKEN").map_err(|_| ConfigError::Missing("HEC_TOKEN"))?;
        let endpoint_type = match env::var("HEC_ENDPOINT_TYPE") {
            Ok(val) => val.parse()?,
            Err(_) => EndpointType::default(),
        };
        let source_type =
            env::var("SOURCE_TYPE").unwrap_or_else(|_| DEFAULT_SOURCE_TYPE.to_string());
        let ack_required = env_bool("ACK_REQUIRED", false);
        let ack_wait = Duration::from_secs(env_number("ACK_WAIT_SECS", DEFAULT_ACK_WAIT_SECS)?);
        let ack_retries = env_number("ACK_RETRIES", DEFAULT_ACK_RETRIES)?;
        let request_timeout = Duration::from_secs(env_number(
            "REQUEST_TIMEOUT",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?);
        let verify_ssl = env_bool("VERIFY_SSL", true);
        let elb_cookie_name = env::var("ELB_COOKIE_NAME")
            .ok()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        let debug = env_bool("DEBUG_DATA", false);

        let config = Self {
            hec_host,
            hec_token,
            endpoint_type,
            source_type,
            ack_required,
            ack_wait,
            ack_retries,
            request_timeout,
            verify_ssl,
            elb_cookie_name,
            debug,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let host = self.hec_host.trim();
        if host.is_empty() {
            return Err(ConfigError::Invalid("HEC_HOST cannot be empty".to_string()));
        }
        match reqwest::Url::parse(host) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(ConfigError::Invalid(format!(
                    "HEC_HOST must use http or https, got '{}'",
                    url.scheme()
                )))
            }
            Err(e) => {
                return Err(ConfigError::Invalid(format!(
                    "HEC_HOST '{host}' is not a valid URL: {e}"
                )))
            }
        }

        if self.hec_token.trim().is_empty() {
            return Err(ConfigError::Invalid("HEC_TOKEN cannot be empty".to_string()));
        }

        self.authorization_header()?;

        if self.source_type.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "SOURCE_TYPE cannot be empty".to_string(),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "REQUEST_TIMEOUT must be greater than 0".to_string(),
            ));
        }

        if self.ack_required && self.ack_wait.as_secs() < RECOMMENDED_MIN_ACK_WAIT_SECS {
            warn!(
                "HEC | ACK_WAIT_SECS={} is below the recommended {}s, acks may not be ready on the first poll",
                self.ack_wait.as_secs(),
                RECOMMENDED_MIN_ACK_WAIT_SECS
            );
        }

        Ok(())
    }

    /// Base URL of the collector, e.g. `https://host:8088/services/collector`
    #[must_use]
    pub fn collector_url(&self) -> String {
        format!("{}{COLLECTOR_PATH}", self.hec_host.trim().trim_end_matches('/'))
    }

    /// Value of the `Authorization` header sent on every HEC request.
    #[must_use]
    pub fn authorization(&self) -> String {
        format!("Splunk {}", self.hec_token)
    }

    /// `authorization()` as a header value, rejecting tokens with control
    /// characters such as a trailing newline.
    pub fn authorization_header(&self) -> Result<HeaderValue, ConfigError> {
        let mut value = HeaderValue::from_str(&self.authorization()).map_err(|_| {
            ConfigError::Invalid(
                "HEC_TOKEN contains characters not allowed in an HTTP header".to_string(),
            )
        })?;
        value.set_sensitive(true);
        Ok(value)
    }
}

/// Only a case-insensitive `true` enables a flag, anything else disables it.
fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|val| val.trim().to_lowercase() == "true")
        .unwrap_or(default)
}

fn env_number<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(val) => val.trim().parse::<T>().map_err(|_| {
            ConfigError::Invalid(format!(
                "{name} must be a non-negative integer, got '{val}'"
            ))
        }),
        Err(_) => Ok(default),
    }
}
