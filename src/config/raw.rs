use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use reqwest::header::HeaderValue;
use secrecy::SecretString;
use serde::Deserialize;
use serde_with::serde_as;
use url::Url;

use crate::Result;
use crate::error::ConfigError;
use crate::types::SendUsageTo;

use super::defaults::{
    default_connect_timeout, default_http_timeout, default_opt_in, default_state_path,
    default_version_label,
};
use super::env::EnvSource;
use super::{Config, HumantimeDuration, SourceSettings, TelemetrySettings};

/// Layer the optional TOML file under `PREFIX__SECTION__KEY` variables.
pub(super) fn load(
    path: impl AsRef<Path>,
    env_prefix: &str,
    required: bool,
    env: &EnvSource,
) -> std::result::Result<RawConfig, ConfigError> {
    let path = path.as_ref();
    if required {
        std::fs::metadata(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
    }

    ::config::Config::builder()
        .add_source(::config::File::from(path).required(false))
        .add_source(
            ::config::Environment::with_prefix(env_prefix)
                .separator("__")
                .try_parsing(true)
                .source(env.snapshot()),
        )
        .build()
        .map_err(|err| ConfigError::Other(err.to_string()))?
        .try_deserialize()
        .map_err(|err| ConfigError::Parse(err.to_string()))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct RawConfig {
    #[serde(default)]
    pub(super) telemetry: RawTelemetry,
    #[serde(default)]
    pub(super) source: RawSource,
    #[serde(default)]
    pub(super) storage: RawStorage,
    #[serde(default)]
    pub(super) http: RawHttp,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawTelemetry {
    #[serde(default = "default_opt_in")]
    pub(super) opt_in: bool,
    #[serde(default)]
    pub(super) screenshot_mode: bool,
    #[serde(default)]
    pub(super) send_usage_to: Option<String>,
    #[serde(default)]
    pub(super) url: Option<String>,
    #[serde(default = "default_version_label")]
    pub(super) version: String,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct RawSource {
    pub(super) url: Option<String>,
    pub(super) token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawStorage {
    #[serde(default = "default_state_path")]
    pub(super) path: PathBuf,
}

#[serde_as]
#[derive(Debug, Deserialize)]
pub(super) struct RawHttp {
    #[serde(default = "default_http_timeout")]
    #[serde_as(as = "HumantimeDuration")]
    pub(super) timeout: Duration,
    #[serde(default = "default_connect_timeout")]
    #[serde_as(as = "HumantimeDuration")]
    pub(super) connect_timeout: Duration,
}

impl RawConfig {
    pub(super) fn apply_env_overrides(
        &mut self,
        env: &EnvSource,
    ) -> std::result::Result<(), ConfigError> {
        if let Some(opt_in) = env.boolean("TELEMETRY_OPT_IN")? {
            self.telemetry.opt_in = opt_in;
        }
        if let Some(screenshot) = env.boolean("TELEMETRY_SCREENSHOT_MODE")? {
            self.telemetry.screenshot_mode = screenshot;
        }
        if let Some(channel) = env.string("TELEMETRY_SEND_USAGE_TO")? {
            self.telemetry.send_usage_to = Some(channel);
        }
        if let Some(url) = env.string("TELEMETRY_URL")? {
            self.telemetry.url = Some(url);
        }
        if let Some(version) = env.string("TELEMETRY_VERSION")? {
            self.telemetry.version = version;
        }
        if let Some(url) = env.string("USAGE_SOURCE_URL")? {
            self.source.url = Some(url);
        }
        if let Some(token) = env.string("USAGE_SOURCE_TOKEN")? {
            self.source.token = Some(token);
        }
        if let Some(path) = env.path("TELEMETRY_STATE_PATH")? {
            self.storage.path = path;
        }
        if let Some(timeout) = env.duration("HTTP_TIMEOUT")? {
            self.http.timeout = timeout;
        }
        if let Some(timeout) = env.duration("HTTP_CONNECT_TIMEOUT")? {
            self.http.connect_timeout = timeout;
        }
        Ok(())
    }

    pub(super) fn validate_and_build(self) -> Result<Config> {
        let source_str = self.source.url.ok_or(ConfigError::MissingField {
            field: "source.url",
        })?;
        let source_url = parse_url("source.url", &source_str)?;

        let token = match self.source.token {
            Some(token) if token.trim().is_empty() => {
                return Err(ConfigError::InvalidField {
                    field: "source.token",
                    message: "token cannot be empty".to_string(),
                }
                .into());
            }
            token => token.map(SecretString::from),
        };

        let send_usage_to = match self.telemetry.send_usage_to.as_deref() {
            Some(raw) => SendUsageTo::from_str(raw).map_err(|message| {
                ConfigError::InvalidField {
                    field: "telemetry.send_usage_to",
                    message,
                }
            })?,
            None => SendUsageTo::default(),
        };
        let collection_url = match self.telemetry.url.as_deref() {
            Some(raw) => parse_url("telemetry.url", raw)?,
            None => parse_url("telemetry.send_usage_to", send_usage_to.collection_url())?,
        };

        let version_label = self.telemetry.version.trim().to_string();
        if version_label.is_empty() {
            return Err(ConfigError::InvalidField {
                field: "telemetry.version",
                message: "version label cannot be empty".to_string(),
            }
            .into());
        }
        if HeaderValue::from_str(&version_label).is_err() {
            return Err(ConfigError::InvalidField {
                field: "telemetry.version",
                message: "version label must be a valid HTTP header value".to_string(),
            }
            .into());
        }

        if self.storage.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidField {
                field: "storage.path",
                message: "state path cannot be empty".to_string(),
            }
            .into());
        }
        if self.http.timeout.is_zero() {
            return Err(ConfigError::InvalidField {
                field: "http.timeout",
                message: "timeout must be greater than zero".to_string(),
            }
            .into());
        }
        if self.http.connect_timeout.is_zero() {
            return Err(ConfigError::InvalidField {
                field: "http.connect_timeout",
                message: "timeout must be greater than zero".to_string(),
            }
            .into());
        }

        Ok(Config {
            telemetry: TelemetrySettings {
                opt_in: self.telemetry.opt_in,
                screenshot_mode: self.telemetry.screenshot_mode,
                send_usage_to,
                collection_url,
                version_label,
            },
            source: SourceSettings {
                url: source_url,
                token,
            },
            state_path: self.storage.path,
            http_connect_timeout: self.http.connect_timeout,
            http_request_timeout: self.http.timeout,
        })
    }
}

fn parse_url(field: &'static str, raw: &str) -> std::result::Result<Url, ConfigError> {
    Url::parse(raw.trim()).map_err(|err| ConfigError::InvalidField {
        field,
        message: err.to_string(),
    })
}

impl Default for RawTelemetry {
    fn default() -> Self {
        Self {
            opt_in: default_opt_in(),
            screenshot_mode: false,
            send_usage_to: None,
            url: None,
            version: default_version_label(),
        }
    }
}

impl Default for RawStorage {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

impl Default for RawHttp {
    fn default() -> Self {
        Self {
            timeout: default_http_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}
