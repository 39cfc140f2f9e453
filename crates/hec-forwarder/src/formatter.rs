// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns decoded log events into a HEC request body.
//!
//! Every event first goes through a [`Transform`]. The default
//! [`MessageLine`] keeps only the message followed by a newline. In raw mode
//! the transformed lines are sent as-is; in event mode each line is wrapped
//! in a `{"sourcetype":...,"event":...}` envelope.

use crate::config::EndpointType;
use crate::decoder::LogEvent;
use crate::error::FormatError;
use serde::Serialize;
use serde_json::value::RawValue;

/// Per-event customization hook.
///
/// Implementations may emit several newline-separated lines for one event;
/// in event mode each non-empty line becomes its own envelope.
pub trait Transform: Send + Sync {
    fn transform(&self, event: &LogEvent) -> String;
}

/// Emits `message + "\n"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageLine;

impl Transform for MessageLine {
    fn transform(&self, event: &LogEvent) -> String {
        let mut line = String::with_capacity(event.message.len() + 1);
        line.push_str(&event.message);
        line.push('\n');
        line
    }
}

impl<F> Transform for F
where
    F: Fn(&LogEvent) -> String + Send + Sync,
{
    fn transform(&self, event: &LogEvent) -> String {
        self(event)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedBody {
    pub endpoint_type: EndpointType,
    pub body: String,
    /// Raw mode: transformed events. Event mode: envelopes written.
    pub records: usize,
}

impl FormattedBody {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    sourcetype: &'a str,
    event: EventPayload<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum EventPayload<'a> {
    Json(&'a RawValue),
    Text(&'a str),
}

pub fn format(
    events: &[LogEvent],
    endpoint_type: EndpointType,
    source_type: &str,
    transform: &dyn Transform,
) -> Result<FormattedBody, FormatError> {
    let joined: String = events.iter().map(|e| transform.transform(e)).collect();

    match endpoint_type {
        EndpointType::Raw => Ok(FormattedBody {
            endpoint_type,
            body: joined,
            records: events.len(),
        }),
        EndpointType::Event => {
            let mut body = String::with_capacity(joined.len() + 64 * events.len());
            let mut records = 0;
            for line in joined.split('\n').filter(|line| !line.is_empty()) {
                write_envelope(&mut body, source_type, line)?;
                records += 1;
            }
            Ok(FormattedBody {
                endpoint_type,
                body,
                records,
            })
        }
    }
}

/// Lines that are valid JSON documents are embedded as-is, anything else
/// becomes a JSON string.
fn write_envelope(out: &mut String, source_type: &str, line: &str) -> Result<(), FormatError> {
    let parsed: Option<&RawValue> = serde_json::from_str(line).ok();
    let event = match parsed {
        Some(raw) => EventPayload::Json(raw),
        None => EventPayload::Text(line),
    };
    let envelope = serde_json::to_string(&Envelope {
        sourcetype: source_type,
        event,
    })?;
    out.push_str(&envelope);
    out.push('\n');
    Ok(())
}
