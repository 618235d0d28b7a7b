use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use tracing::{debug, info};
use url::Url;

use crate::Result;
use crate::error::{ConfigError, Error, TransportError};

/// Delivers one report body to the collector.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, url: &Url, headers: HeaderMap, body: String) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport with the given timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client fails to build.
    pub fn new(timeout: Duration, connect_timeout: Duration, insecure_http: bool) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .user_agent(concat!("telemetry-sender/", env!("CARGO_PKG_VERSION")))
            .pool_idle_timeout(Duration::from_secs(30));

        if !insecure_http {
            builder = builder.https_only(true);
        }

        let http = builder
            .build()
            .map_err(|err| TransportError::Client { source: err })?;
        Ok(Self { http })
    }

    /// Reject plain HTTP collectors unless explicitly allowed.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a non-https URL without `insecure_http`.
    pub fn check_scheme(url: &Url, insecure_http: bool) -> Result<()> {
        if url.scheme() != "https" && !insecure_http {
            return Err(Error::Config(ConfigError::InvalidField {
                field: "telemetry.url",
                message: "only https URLs are accepted without --insecure".to_string(),
            }));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, url: &Url, headers: HeaderMap, body: String) -> Result<()> {
        let bytes = body.len();
        let response = self
            .http
            .post(url.clone())
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(TransportError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus { status }.into());
        }
        debug!(%url, %status, bytes, "report delivered");
        Ok(())
    }
}

/// Logs what would be sent and reports success.
#[derive(Clone, Copy, Debug, Default)]
pub struct DryRunTransport;

#[async_trait]
impl Transport for DryRunTransport {
    async fn post(&self, url: &Url, headers: HeaderMap, body: String) -> Result<()> {
        let header_names: Vec<&str> = headers
            .keys()
            .map(reqwest::header::HeaderName::as_str)
            .collect();
        info!(
            %url,
            headers = ?header_names,
            bytes = body.len(),
            "dry-run: would post usage report"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::HttpTransport;
    use url::Url;

    #[test]
    fn plain_http_requires_insecure_flag() {
        let url = match Url::parse("http://collector.local/send") {
            Ok(url) => url,
            Err(err) => panic!("valid url: {err}"),
        };
        assert!(HttpTransport::check_scheme(&url, false).is_err());
        assert!(HttpTransport::check_scheme(&url, true).is_ok());
    }
}
