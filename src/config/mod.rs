use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::Result;
use crate::error::Error as SenderError;
use crate::types::SendUsageTo;

mod defaults;
mod env;
mod raw;
mod serde;

use self::env::EnvSource;
use self::serde::HumantimeDuration;

const ENV_PREFIX: &str = "TELEMETRY_SENDER";

#[derive(Debug, Clone)]
pub struct Config {
    pub telemetry: TelemetrySettings,
    pub source: SourceSettings,
    pub state_path: PathBuf,
    pub http_connect_timeout: Duration,
    pub http_request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub opt_in: bool,
    pub screenshot_mode: bool,
    pub send_usage_to: SendUsageTo,
    pub collection_url: Url,
    pub version_label: String,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: Url,
    pub token: Option<SecretString>,
}

impl Config {
    /// Load configuration from a file and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration file cannot be parsed, when
    /// environment overrides are invalid, or when the resulting values fail
    /// validation.
    pub fn from_env_and_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::load(path.as_ref(), false, &EnvSource::Process)
    }

    /// Same as [`Config::from_env_and_file`], but the file must exist.
    ///
    /// # Errors
    ///
    /// Also fails when `path` cannot be read.
    pub fn from_env_and_required_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::load(path.as_ref(), true, &EnvSource::Process)
    }

    fn load(path: &Path, required: bool, env: &EnvSource) -> Result<Self> {
        let mut raw = raw::load(path, ENV_PREFIX, required, env).map_err(SenderError::from)?;
        raw.apply_env_overrides(env).map_err(SenderError::from)?;
        raw.validate_and_build()
    }
}
