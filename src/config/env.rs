use std::env::VarError;
use std::path::PathBuf;
use std::time::Duration;

use humantime::parse_duration;

use crate::error::ConfigError;

type Lookup<T> = std::result::Result<Option<T>, ConfigError>;

/// Where the loader reads variables from. `Fixed` keeps lookups off the
/// process environment.
#[derive(Debug)]
pub(super) enum EnvSource {
    Process,
    #[cfg_attr(not(test), allow(dead_code))]
    Fixed(::config::Map<String, String>),
}

impl EnvSource {
    fn var(&self, key: &str) -> std::result::Result<String, VarError> {
        match self {
            Self::Process => std::env::var(key),
            Self::Fixed(vars) => vars.get(key).cloned().ok_or(VarError::NotPresent),
        }
    }

    /// Snapshot handed to `config::Environment`; `None` means the process env.
    pub(super) fn snapshot(&self) -> Option<::config::Map<String, String>> {
        match self {
            Self::Process => None,
            Self::Fixed(vars) => Some(vars.clone()),
        }
    }

    /// Raw value of `key`; blank values count as unset.
    pub(super) fn string(&self, key: &'static str) -> Lookup<String> {
        match self.var(key) {
            Ok(value) if value.trim().is_empty() => Ok(None),
            Ok(value) => Ok(Some(value.trim().to_string())),
            Err(VarError::NotPresent) => Ok(None),
            Err(err) => Err(ConfigError::Other(format!("{key}: {err}"))),
        }
    }

    fn parse_with<T, E, F>(&self, key: &'static str, parse: F) -> Lookup<T>
    where
        F: FnOnce(&str) -> std::result::Result<T, E>,
        E: std::fmt::Display,
    {
        self.string(key)?
            .map(|value| {
                parse(&value).map_err(|err| ConfigError::InvalidField {
                    field: key,
                    message: err.to_string(),
                })
            })
            .transpose()
    }

    pub(super) fn path(&self, key: &'static str) -> Lookup<PathBuf> {
        Ok(self.string(key)?.map(PathBuf::from))
    }

    /// Accepts `1/0`, `yes/no`, `on/off` besides `true/false`.
    pub(super) fn boolean(&self, key: &'static str) -> Lookup<bool> {
        self.parse_with(key, |value| match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "y" | "on" => Ok(true),
            "0" | "false" | "no" | "n" | "off" => Ok(false),
            other => Err(format!("expected a boolean, got {other:?}")),
        })
    }

    pub(super) fn duration(&self, key: &'static str) -> Lookup<Duration> {
        self.parse_with(key, parse_duration)
    }
}
