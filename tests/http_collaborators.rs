#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use secrecy::SecretString;
use serde_json::json;
use telemetry_sender::TelemetrySender;
use telemetry_sender::constants::{STORAGE_KEY, VERSION_HEADER};
use telemetry_sender::error::{Error, SourceError, TransportError};
use telemetry_sender::provider::{HttpUsageProvider, ProviderSettings, TelemetryProvider};
use telemetry_sender::store::{KeyValueStore, MemoryStore};
use telemetry_sender::transport::{DryRunTransport, HttpTransport, Transport};
use tokio::time::timeout;
use url::Url;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STATS_PATH: &str = "/api/telemetry/v2/clusters/_stats";
const SEND_PATH: &str = "/xpack/v2/send";

fn settings(server: &MockServer, timeout: Duration) -> ProviderSettings {
    ProviderSettings {
        source_url: Url::parse(&format!("{}{STATS_PATH}", server.uri())).expect("valid mock url"),
        token: None,
        collection_url: Url::parse(&format!("{}{SEND_PATH}", server.uri()))
            .expect("valid mock url"),
        version_label: "8.0.0".into(),
        opt_in: true,
        screenshot_mode: false,
        timeout,
        connect_timeout: Duration::from_secs(1),
        insecure_http: true,
    }
}

fn provider(server: &MockServer) -> HttpUsageProvider {
    HttpUsageProvider::new(settings(server, Duration::from_secs(2))).expect("provider")
}

fn transport() -> HttpTransport {
    HttpTransport::new(Duration::from_secs(2), Duration::from_secs(1), true).expect("transport")
}

fn report_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        HeaderName::from_static(VERSION_HEADER),
        HeaderValue::from_static("8.0.0"),
    );
    headers
}

#[tokio::test]
async fn fetch_payloads_keeps_strings_and_serializes_objects() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(STATS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            "hashed_cluster_usage_data1",
            { "cluster_uuid": "abc", "stats": { "nodes": 3 } }
        ])))
        .mount(&server)
        .await;

    let payloads = provider(&server).fetch_payloads().await.expect("payloads");
    assert_eq!(payloads.len(), 2);
    assert_eq!(payloads[0], "hashed_cluster_usage_data1");
    let second: serde_json::Value = serde_json::from_str(&payloads[1]).expect("json payload");
    assert_eq!(second["cluster_uuid"], "abc");
}

#[tokio::test]
async fn stats_request_payload_snapshot() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let _ = provider(&server).fetch_payloads().await;

    let requests = server.received_requests().await.expect("requests");
    assert!(requests[0].headers.contains_key("x-correlation-id"));
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).expect("json body");
    insta::assert_json_snapshot!("usage_stats_request", body);
}

#[tokio::test]
async fn bearer_token_is_forwarded() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["a"])))
        .expect(1)
        .mount(&server)
        .await;

    let mut settings = settings(&server, Duration::from_secs(2));
    settings.token = Some(SecretString::from("s3cret"));
    let provider = HttpUsageProvider::new(settings).expect("provider");

    assert_eq!(provider.fetch_payloads().await.expect("payloads"), vec!["a"]);
}

#[tokio::test]
async fn retries_exhaust_on_server_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = provider(&server)
        .fetch_payloads()
        .await
        .expect_err("should fail");
    match err {
        Error::Source(SourceError::RetryExhausted { .. }) => {}
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(server.received_requests().await.expect("requests").len(), 3);
}

#[tokio::test]
async fn client_errors_fail_without_retry() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let err = provider(&server)
        .fetch_payloads()
        .await
        .expect_err("should fail");
    match err {
        Error::Source(SourceError::HttpStatus { status }) => assert_eq!(status.as_u16(), 401),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn non_array_body_is_a_json_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "not": "a list" })))
        .mount(&server)
        .await;

    let err = provider(&server)
        .fetch_payloads()
        .await
        .expect_err("should fail");
    assert!(matches!(
        err,
        Error::Source(SourceError::Json { .. } | SourceError::RetryExhausted { .. })
    ));
}

#[tokio::test]
async fn timeouts_surface_as_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_millis(1500)),
        )
        .mount(&server)
        .await;

    let provider =
        HttpUsageProvider::new(settings(&server, Duration::from_millis(300))).expect("provider");

    let res = timeout(Duration::from_secs(5), provider.fetch_payloads()).await;
    let err = res.expect("timeout future").expect_err("should fail");
    assert!(matches!(
        err,
        Error::Source(SourceError::Request { .. } | SourceError::RetryExhausted { .. })
    ));
}

#[tokio::test]
async fn transport_posts_body_verbatim_with_headers() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .and(header("content-type", "application/json"))
        .and(header(VERSION_HEADER, "8.0.0"))
        .and(body_string("hashed_cluster_usage_data1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}{SEND_PATH}", server.uri())).expect("url");
    transport()
        .post(&url, report_headers(), "hashed_cluster_usage_data1".into())
        .await
        .expect("post");
}

#[tokio::test]
async fn transport_rejects_non_success_status() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}{SEND_PATH}", server.uri())).expect("url");
    let err = transport()
        .post(&url, report_headers(), "{}".into())
        .await
        .expect_err("should fail");
    assert!(matches!(
        err,
        Error::Transport(TransportError::HttpStatus { .. })
    ));
}

#[tokio::test]
async fn dry_run_transport_never_touches_the_network() {
    let url = Url::parse("https://collector.invalid/send").expect("url");
    DryRunTransport
        .post(&url, report_headers(), "payload".into())
        .await
        .expect("dry run always succeeds");
}

#[tokio::test]
async fn collector_failure_keeps_report_due() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(STATS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["A", "B"])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .and(body_string("A"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(SEND_PATH))
        .and(body_string("B"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let sender = TelemetrySender::new(
        Arc::new(provider(&server)),
        store.clone(),
        Arc::new(transport()),
    );

    sender.send_if_due().await;

    assert!(sender.last_reported().is_none());
    assert!(store.read(STORAGE_KEY).is_none());
    assert!(!sender.is_sending());
    assert!(sender.should_send_report());
}

#[tokio::test]
async fn opt_in_toggle_is_seen_by_the_next_check() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["A"])))
        .expect(0)
        .mount(&server)
        .await;

    let provider = Arc::new(provider(&server));
    let sender = TelemetrySender::new(
        provider.clone(),
        Arc::new(MemoryStore::new()),
        Arc::new(transport()),
    );
    assert!(sender.should_send_report());

    provider.set_opted_in(false);
    assert!(!provider.is_opted_in());
    assert!(!sender.should_send_report());
    sender.send_if_due().await;
    assert!(sender.last_reported().is_none());

    provider.set_opted_in(true);
    assert!(sender.should_send_report());
}
