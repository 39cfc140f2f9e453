// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::{write::GzEncoder, Compression};
use hec_forwarder::forwarder::{AckFailureReason, SkipReason, Stage};
use hec_forwarder::{
    EndpointType, ForwardError, Forwarder, ForwarderConfig, LogEvent, Outcome,
};
use mockito::{Matcher, Server};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const HELLO_BATCH: &str = r#"{"messageType":"DATA_MESSAGE","logEvents":[{"id":"1","timestamp":1700000000000,"message":"hello"}]}"#;

fn encode_payload(json: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(json.as_bytes()).unwrap();
    STANDARD.encode(encoder.finish().unwrap()).into_bytes()
}

fn test_config(host: String) -> ForwarderConfig {
    ForwarderConfig {
        hec_host: host,
        hec_token: "test-token".to_string(),
        source_type: "mysource".to_string(),
        ack_wait: Duration::ZERO,
        request_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

fn forwarder(config: ForwarderConfig) -> Forwarder {
    Forwarder::new(Arc::new(config)).expect("failed to create forwarder")
}

#[tokio::test]
async fn test_raw_without_ack() {
    let mut server = Server::new_async().await;
    let submit = server
        .mock("POST", "/services/collector/raw")
        .match_query(Matcher::UrlEncoded("sourcetype".into(), "mysource".into()))
        .match_header("authorization", "Splunk test-token")
        .match_body("hello\n")
        .with_status(200)
        .with_body(r#"{"text":"Success","code":0,"ackId":3}"#)
        .expect(1)
        .create_async()
        .await;
    let ack = server
        .mock("POST", "/services/collector/ack")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let report = forwarder(test_config(server.url()))
        .forward(&encode_payload(HELLO_BATCH))
        .await
        .unwrap();

    assert_eq!(report.outcome, Outcome::Delivered);
    assert!(report.diagnostics.is_none());
    submit.assert_async().await;
    ack.assert_async().await;
}

#[tokio::test]
async fn test_event_without_ack() {
    let mut server = Server::new_async().await;
    let submit = server
        .mock("POST", "/services/collector/event")
        .match_header("authorization", "Splunk test-token")
        .match_header("x-splunk-request-channel", Matcher::Regex("^[0-9a-f-]{36}$".into()))
        .match_body("{\"sourcetype\":\"mysource\",\"event\":\"hello\"}\n")
        .with_status(200)
        .with_body(r#"{"text":"Success","code":0}"#)
        .expect(1)
        .create_async()
        .await;

    let config = ForwarderConfig {
        endpoint_type: EndpointType::Event,
        ..test_config(server.url())
    };
    let report = forwarder(config)
        .forward(&encode_payload(HELLO_BATCH))
        .await
        .unwrap();

    assert_eq!(report.outcome, Outcome::Delivered);
    submit.assert_async().await;
}

#[tokio::test]
async fn test_control_message_makes_no_http_call() {
    let mut server = Server::new_async().await;
    let any = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let json = r#"{"messageType":"CONTROL_MESSAGE","owner":"CloudwatchLogs","logEvents":[{"id":"","timestamp":1,"message":"CWL CONTROL MESSAGE"}]}"#;
    let report = forwarder(test_config(server.url()))
        .forward(&encode_payload(json))
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        Outcome::Skipped {
            reason: SkipReason::NotDataMessage
        }
    );
    any.assert_async().await;
}

#[tokio::test]
async fn test_empty_batch_makes_no_http_call() {
    let mut server = Server::new_async().await;
    let any = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let json = r#"{"messageType":"DATA_MESSAGE","logEvents":[]}"#;
    let report = forwarder(test_config(server.url()))
        .forward(&encode_payload(json))
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        Outcome::Skipped {
            reason: SkipReason::EmptyBatch
        }
    );
    any.assert_async().await;
}

#[tokio::test]
async fn test_ack_confirmed_with_session_affinity() {
    let mut server = Server::new_async().await;
    let submit = server
        .mock("POST", "/services/collector/event")
        .with_status(200)
        .with_header("set-cookie", "AWSELB=abc123; Path=/")
        .with_body(r#"{"text":"Success","code":0,"ackId":42}"#)
        .expect(1)
        .create_async()
        .await;
    let ack = server
        .mock("POST", "/services/collector/ack")
        .match_query(Matcher::Regex("^channel=[0-9a-f-]{36}$".into()))
        .match_header("authorization", "Splunk test-token")
        .match_header("cookie", "AWSELB=abc123")
        .match_body(r#"{"acks":[42]}"#)
        .with_status(200)
        .with_body(r#"{"acks":{"42":true}}"#)
        .expect(1)
        .create_async()
        .await;

    let config = ForwarderConfig {
        endpoint_type: EndpointType::Event,
        ack_required: true,
        elb_cookie_name: Some("AWSELB".to_string()),
        ..test_config(server.url())
    };
    let report = forwarder(config)
        .forward(&encode_payload(HELLO_BATCH))
        .await
        .unwrap();

    assert_eq!(report.outcome, Outcome::Acknowledged { ack_id: 42 });
    submit.assert_async().await;
    ack.assert_async().await;
}

#[tokio::test]
async fn test_ack_exhausted_reports_diagnostics() {
    let mut server = Server::new_async().await;
    let _submit = server
        .mock("POST", "/services/collector/raw")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"text":"Success","code":0,"ackId":9}"#)
        .create_async()
        .await;
    let ack = server
        .mock("POST", "/services/collector/ack")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"acks":{"9":false}}"#)
        .expect(3)
        .create_async()
        .await;

    let config = ForwarderConfig {
        ack_required: true,
        ack_retries: 2,
        debug: true,
        ..test_config(server.url())
    };
    let report = forwarder(config)
        .forward(&encode_payload(HELLO_BATCH))
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        Outcome::AckFailed {
            ack_id: Some(9),
            reason: AckFailureReason::Exhausted,
            attempts: 3,
            last_status: Some(200),
        }
    );
    assert!(report.outcome.is_accepted());

    let diagnostics = report.diagnostics.expect("debug mode attaches diagnostics");
    assert!(diagnostics.request_url.contains("/services/collector/raw?channel="));
    assert_eq!(diagnostics.request_body, "hello\n");
    assert!(diagnostics
        .request_headers
        .iter()
        .all(|(_, value)| !value.contains("test-token")));
    assert_eq!(diagnostics.submit_status, Some(200));
    assert_eq!(diagnostics.ack_retries, 2);
    assert_eq!(diagnostics.ack_attempts, Some(3));
    assert_eq!(diagnostics.last_ack_status, Some(200));
    assert_eq!(
        diagnostics.last_ack_response.as_deref(),
        Some(r#"{"acks":{"9":false}}"#)
    );
    ack.assert_async().await;
}

#[tokio::test]
async fn test_ingestion_failure_skips_ack() {
    let mut server = Server::new_async().await;
    let _submit = server
        .mock("POST", "/services/collector/event")
        .with_status(400)
        .with_body(r#"{"text":"Invalid data format","code":6,"invalid-event-number":0}"#)
        .create_async()
        .await;
    let ack = server
        .mock("POST", "/services/collector/ack")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let config = ForwarderConfig {
        endpoint_type: EndpointType::Event,
        ack_required: true,
        ..test_config(server.url())
    };
    let report = forwarder(config)
        .forward(&encode_payload(HELLO_BATCH))
        .await
        .unwrap();

    match report.outcome {
        Outcome::IngestionFailed {
            http_status,
            response,
        } => {
            assert_eq!(http_status, 400);
            assert!(response.contains("Invalid data format"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    ack.assert_async().await;
}

#[tokio::test]
async fn test_missing_ack_id_when_ack_required() {
    let mut server = Server::new_async().await;
    let _submit = server
        .mock("POST", "/services/collector/raw")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"text":"Success","code":0}"#)
        .create_async()
        .await;

    let config = ForwarderConfig {
        ack_required: true,
        ..test_config(server.url())
    };
    let report = forwarder(config)
        .forward(&encode_payload(HELLO_BATCH))
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        Outcome::AckFailed {
            ack_id: None,
            reason: AckFailureReason::MissingAckId,
            attempts: 0,
            last_status: None,
        }
    );
}

#[tokio::test]
async fn test_connection_error_on_submit() {
    let report = forwarder(test_config("http://127.0.0.1:9".to_string()))
        .forward(&encode_payload(HELLO_BATCH))
        .await
        .unwrap();

    assert!(matches!(
        report.outcome,
        Outcome::ConnectionError {
            stage: Stage::Submit,
            ..
        }
    ));
}

/// Reads one HTTP/1.1 request, headers and `content-length` body.
async fn read_request(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return;
            }
        }
    }
}

/// Answers the first request with `submit_response`, then closes every
/// later connection without replying.
async fn spawn_hec_dropping_acks(submit_response: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{submit_response}",
            submit_response.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
        drop(socket);

        while let Ok((socket, _)) = listener.accept().await {
            drop(socket);
        }
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_connection_error_on_ack() {
    let host = spawn_hec_dropping_acks(r#"{"text":"Success","code":0,"ackId":5}"#).await;
    let config = ForwarderConfig {
        ack_required: true,
        ack_retries: 3,
        debug: true,
        ..test_config(host)
    };
    let report = forwarder(config)
        .forward(&encode_payload(HELLO_BATCH))
        .await
        .unwrap();

    assert!(
        matches!(
            report.outcome,
            Outcome::ConnectionError {
                stage: Stage::Ack,
                ..
            }
        ),
        "unexpected outcome {:?}",
        report.outcome
    );
    assert!(!report.outcome.is_accepted());
    let diagnostics = report.diagnostics.unwrap();
    assert_eq!(diagnostics.submit_status, Some(200));
    assert_eq!(diagnostics.ack_attempts, Some(1));
}

#[test]
fn test_token_unusable_as_header_is_rejected() {
    let config = ForwarderConfig {
        hec_token: "test-token\n".to_string(),
        ..test_config("https://hec.example.com:8088".to_string())
    };
    assert!(matches!(
        Forwarder::new(Arc::new(config)),
        Err(ForwardError::Endpoint(_))
    ));
}

#[tokio::test]
async fn test_malformed_payload_is_an_error() {
    let result = forwarder(test_config("http://127.0.0.1:9".to_string()))
        .forward(b"definitely not base64")
        .await;

    assert!(matches!(result, Err(ForwardError::Decode(_))));
}

#[tokio::test]
async fn test_custom_transform_is_applied() {
    let mut server = Server::new_async().await;
    let submit = server
        .mock("POST", "/services/collector/raw")
        .match_query(Matcher::Any)
        .match_body("1700000000000 hello\n")
        .with_status(200)
        .with_body(r#"{"text":"Success","code":0}"#)
        .expect(1)
        .create_async()
        .await;

    let transform = |event: &LogEvent| format!("{} {}\n", event.timestamp, event.message);
    let forwarder =
        Forwarder::with_transform(Arc::new(test_config(server.url())), Arc::new(transform))
            .unwrap();
    let report = forwarder
        .forward(&encode_payload(HELLO_BATCH))
        .await
        .unwrap();

    assert_eq!(report.outcome, Outcome::Delivered);
    submit.assert_async().await;
}
