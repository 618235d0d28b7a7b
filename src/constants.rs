use std::time::Duration;

/// How often the dispatcher wakes up to check whether a report is due.
pub const CHECK_INTERVAL: Duration = Duration::from_millis(60_000);

/// Minimum age of the last report before a new one is sent (one day).
pub const REPORT_INTERVAL_MS: i64 = 86_400_000;

/// Key of the persisted `{"lastReport": ...}` record.
pub const STORAGE_KEY: &str = "telemetry.data";

pub const VERSION_HEADER: &str = "x-elastic-stack-version";

pub const PROD_COLLECTION_URL: &str = "https://telemetry.elastic.co/xpack/v2/send";
pub const STAGING_COLLECTION_URL: &str = "https://telemetry-staging.elastic.co/xpack/v2/send";
