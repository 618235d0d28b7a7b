use std::path::PathBuf;
use std::time::Duration;

pub(super) const fn default_opt_in() -> bool {
    true
}

pub(super) fn default_version_label() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

pub(super) fn default_state_path() -> PathBuf {
    PathBuf::from("telemetry-state.json")
}

pub(super) const fn default_http_timeout() -> Duration {
    Duration::from_secs(10)
}

pub(super) const fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}
