use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::Result;
use crate::error::{ConfigError, Error, SourceError};

use super::TelemetryProvider;
use super::models::{StatsRequest, body_preview, payloads_from};

const MAX_ATTEMPTS: usize = 3;
const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub source_url: Url,
    pub token: Option<SecretString>,
    pub collection_url: Url,
    pub version_label: String,
    pub opt_in: bool,
    pub screenshot_mode: bool,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub insecure_http: bool,
}

/// Pulls hashed usage payloads from the stats endpoint of the host
/// application.
#[derive(Debug)]
pub struct HttpUsageProvider {
    http: reqwest::Client,
    source: Url,
    token: Option<SecretString>,
    collection: Url,
    version: String,
    opted_in: AtomicBool,
    screenshot_mode: bool,
    timeout: Duration,
}

enum Attempt {
    Retry(Duration),
    Fail(SourceError),
}

impl HttpUsageProvider {
    /// Build a provider from its settings.
    ///
    /// # Errors
    ///
    /// Returns an error if HTTPS is required but the source URL uses HTTP, or
    /// if the underlying HTTP client fails to build.
    pub fn new(settings: ProviderSettings) -> Result<Self> {
        if settings.source_url.scheme() != "https" && !settings.insecure_http {
            return Err(Error::Config(ConfigError::InvalidField {
                field: "source.url",
                message: "only https URLs are accepted without --insecure".to_string(),
            }));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.timeout)
            .user_agent(concat!("telemetry-sender/", env!("CARGO_PKG_VERSION")))
            .pool_idle_timeout(Duration::from_secs(30));

        if !settings.insecure_http {
            builder = builder.https_only(true);
        }

        let http = builder
            .build()
            .map_err(|err| SourceError::Client { source: err })?;

        Ok(Self {
            http,
            source: settings.source_url,
            token: settings.token,
            collection: settings.collection_url,
            version: settings.version_label,
            opted_in: AtomicBool::new(settings.opt_in),
            screenshot_mode: settings.screenshot_mode,
            timeout: settings.timeout,
        })
    }

    pub fn set_opted_in(&self, opted_in: bool) {
        self.opted_in.store(opted_in, Ordering::Release);
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(200))
            .with_multiplier(2.0)
            .with_randomization_factor(0.25)
            .with_max_interval(Duration::from_secs(2))
            .with_max_elapsed_time(Some(self.timeout))
            .build()
    }

    async fn fetch_once(
        &self,
        correlation_id: &str,
    ) -> std::result::Result<Vec<Value>, SourceError> {
        let mut request = self
            .http
            .post(self.source.clone())
            .header(CORRELATION_HEADER, correlation_id)
            .json(&StatsRequest { unencrypted: false });
        if let Some(token) = &self.token {
            request = request.header(
                AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            );
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::HttpStatus { status });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|err| SourceError::Json {
            message: format!(
                "error decoding response body: {err}; body preview: {}",
                body_preview(&body)
            ),
        })
    }
}

fn is_transient(err: &SourceError) -> bool {
    match err {
        SourceError::Request { .. } | SourceError::Json { .. } => true,
        SourceError::HttpStatus { status } => {
            status.is_server_error() || *status == StatusCode::REQUEST_TIMEOUT
        }
        SourceError::Client { .. } | SourceError::RetryExhausted { .. } => false,
    }
}

fn next_attempt(backoff: &mut ExponentialBackoff, attempt: usize, err: SourceError) -> Attempt {
    if !is_transient(&err) {
        return Attempt::Fail(err);
    }
    if attempt == MAX_ATTEMPTS {
        return Attempt::Fail(SourceError::RetryExhausted {
            source: Box::new(err),
        });
    }
    match backoff.next_backoff() {
        Some(delay) => {
            warn!(
                attempt,
                delay_ms = delay.as_millis(),
                error = %err,
                "retrying usage fetch"
            );
            Attempt::Retry(delay)
        }
        None => Attempt::Fail(err),
    }
}

#[async_trait]
impl TelemetryProvider for HttpUsageProvider {
    fn is_opted_in(&self) -> bool {
        self.opted_in.load(Ordering::Acquire)
    }

    fn is_screenshot_mode(&self) -> bool {
        self.screenshot_mode
    }

    fn collection_url(&self) -> Url {
        self.collection.clone()
    }

    fn version_label(&self) -> &str {
        &self.version
    }

    async fn fetch_payloads(&self) -> Result<Vec<String>> {
        let mut backoff = self.backoff();

        for attempt in 1..=MAX_ATTEMPTS {
            let correlation_id = Uuid::now_v7().to_string();
            let started = Instant::now();

            match self.fetch_once(&correlation_id).await {
                Ok(values) => {
                    debug!(
                        %correlation_id,
                        attempt,
                        clusters = values.len(),
                        latency_ms = started.elapsed().as_millis(),
                        "usage payloads fetched"
                    );
                    return Ok(payloads_from(values));
                }
                Err(err) => match next_attempt(&mut backoff, attempt, err) {
                    Attempt::Retry(delay) => sleep(delay).await,
                    Attempt::Fail(err) => return Err(err.into()),
                },
            }
        }
        unreachable!("retry loop should have returned before reaching this point")
    }
}
