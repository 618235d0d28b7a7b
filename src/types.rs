use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{PROD_COLLECTION_URL, STAGING_COLLECTION_URL};

/// Collection channel reports are routed to.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SendUsageTo {
    #[default]
    Prod,
    Staging,
}

impl SendUsageTo {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prod => "prod",
            Self::Staging => "staging",
        }
    }

    pub const fn collection_url(self) -> &'static str {
        match self {
            Self::Prod => PROD_COLLECTION_URL,
            Self::Staging => STAGING_COLLECTION_URL,
        }
    }
}

impl Display for SendUsageTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SendUsageTo {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Ok(Self::Prod),
            "staging" => Ok(Self::Staging),
            other => Err(format!("unknown send_usage_to channel: {other}")),
        }
    }
}

/// The record kept in the durable store between runs.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ReportRecord {
    #[serde(rename = "lastReport", deserialize_with = "deserialize_last_report")]
    pub last_report: String,
}

impl ReportRecord {
    pub fn new(last_report: impl Into<String>) -> Self {
        Self {
            last_report: last_report.into(),
        }
    }

    /// Best-effort decode: anything that is not a well-formed record is `None`.
    #[must_use]
    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    /// # Errors
    ///
    /// Only fails if `serde_json` cannot serialize a plain string field.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

fn deserialize_last_report<'de, D>(de: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Stamp {
        Str(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Stamp::deserialize(de)? {
        Stamp::Str(value) => value,
        Stamp::Int(value) => value.to_string(),
        Stamp::Float(value) => value.to_string(),
    })
}
