// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Single-shot submission of a formatted body to HEC.
//!
//! | mode  | URL                                          | channel                          |
//! |-------|----------------------------------------------|----------------------------------|
//! | raw   | `{base}/raw?channel={c}&sourcetype={t}`      | query parameter                  |
//! | event | `{base}/event`                               | `X-Splunk-Request-Channel` header |
//!
//! Submissions are never retried here. A 200 response is only a success
//! when its body reads `{"text":"Success",...}`; when indexer
//! acknowledgement is enabled on the token it also carries the `ackId`
//! that the [`crate::ack`] poller later confirms.

use crate::config::{EndpointType, ForwarderConfig};
use crate::error::ConfigError;
use crate::formatter::FormattedBody;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, SET_COOKIE};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub const CHANNEL_HEADER: &str = "X-Splunk-Request-Channel";
const SUCCESS_TEXT: &str = "Success";

/// Client generated id tying a submission to its acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Channel(Uuid);

impl Channel {
    #[must_use]
    pub fn new() -> Self {
        Channel(Uuid::new_v4())
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Load balancer cookie that pins ack polls to the indexer holding the ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAffinity {
    pub cookie_name: String,
    pub cookie_value: String,
}

impl SessionAffinity {
    /// Finds `cookie_name` among the `Set-Cookie` headers of a response.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap, cookie_name: &str) -> Option<Self> {
        headers.get_all(SET_COOKIE).iter().find_map(|value| {
            let value = value.to_str().ok()?;
            let pair = value.split(';').next()?;
            let (name, cookie_value) = pair.split_once('=')?;
            (name.trim() == cookie_name).then(|| SessionAffinity {
                cookie_name: cookie_name.to_string(),
                cookie_value: cookie_value.trim().to_string(),
            })
        })
    }

    /// Value of the `Cookie` request header.
    #[must_use]
    pub fn header_value(&self) -> String {
        format!("{}={}", self.cookie_name, self.cookie_value)
    }
}

/// A fully built submission, kept around for diagnostics.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub url: Url,
    pub headers: HeaderMap,
    pub body: String,
}

impl PreparedRequest {
    /// Headers as printable pairs, with the HEC token masked.
    #[must_use]
    pub fn redacted_headers(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .map(|(name, value)| {
                let value = if *name == AUTHORIZATION {
                    "Splunk <redacted>".to_string()
                } else {
                    value.to_str().unwrap_or_default().to_string()
                };
                (name.to_string(), value)
            })
            .collect()
    }
}

#[derive(Debug)]
pub enum SubmitResult {
    Accepted {
        /// Present when indexer acknowledgement is enabled on the token.
        ack_id: Option<u64>,
        affinity: Option<SessionAffinity>,
        response: String,
    },
    Failure {
        status: StatusCode,
        response: String,
    },
    ConnectionError(reqwest::Error),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HecResponse {
    text: String,
    #[serde(default)]
    ack_id: Option<u64>,
}

/// Parses `{collector}/{endpoint}` from the configured host.
pub(crate) fn collector_endpoint(
    config: &ForwarderConfig,
    endpoint: &str,
) -> Result<Url, ConfigError> {
    let url = format!("{}/{endpoint}", config.collector_url());
    Url::parse(&url).map_err(|e| ConfigError::Invalid(format!("'{url}' is not a valid URL: {e}")))
}

#[derive(Debug, Clone)]
pub struct HecClient {
    client: reqwest::Client,
    config: Arc<ForwarderConfig>,
    raw_url: Url,
    event_url: Url,
    authorization: HeaderValue,
}

impl HecClient {
    pub fn new(client: reqwest::Client, config: Arc<ForwarderConfig>) -> Result<Self, ConfigError> {
        Ok(HecClient {
            raw_url: collector_endpoint(&config, "raw")?,
            event_url: collector_endpoint(&config, "event")?,
            authorization: config.authorization_header()?,
            client,
            config,
        })
    }

    /// Builds the URL and headers for `body` on `channel`.
    #[must_use]
    pub fn prepare(&self, body: FormattedBody, channel: Channel) -> PreparedRequest {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, self.authorization.clone());

        let url = match body.endpoint_type {
            EndpointType::Raw => {
                let mut url = self.raw_url.clone();
                url.query_pairs_mut()
                    .append_pair("channel", &channel.to_string())
                    .append_pair("sourcetype", &self.config.source_type);
                url
            }
            EndpointType::Event => {
                if let Ok(value) = HeaderValue::from_str(&channel.to_string()) {
                    headers.insert(CHANNEL_HEADER, value);
                }
                self.event_url.clone()
            }
        };

        PreparedRequest {
            url,
            headers,
            body: body.body,
        }
    }

    /// Sends the submission exactly once.
    pub async fn submit(&self, request: &PreparedRequest) -> SubmitResult {
        let response = match self
            .client
            .post(request.url.clone())
            .headers(request.headers.clone())
            .body(request.body.clone())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return SubmitResult::ConnectionError(e),
        };

        let status = response.status();
        let affinity = self
            .config
            .elb_cookie_name
            .as_deref()
            .filter(|_| status == StatusCode::OK)
            .and_then(|name| {
                let affinity = SessionAffinity::from_headers(response.headers(), name);
                if affinity.is_none() {
                    warn!("HEC | Response carried no usable '{name}' cookie, polling acks without affinity");
                }
                affinity
            });

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) if status == StatusCode::OK => return SubmitResult::ConnectionError(e),
            Err(_) => String::new(),
        };

        if status != StatusCode::OK {
            return SubmitResult::Failure {
                status,
                response: text,
            };
        }

        match serde_json::from_str::<HecResponse>(&text) {
            Ok(parsed) if parsed.text == SUCCESS_TEXT => {
                debug!("HEC | Submission accepted, ack id {:?}", parsed.ack_id);
                SubmitResult::Accepted {
                    ack_id: parsed.ack_id,
                    affinity,
                    response: text,
                }
            }
            _ => SubmitResult::Failure {
                status,
                response: text,
            },
        }
    }
}
