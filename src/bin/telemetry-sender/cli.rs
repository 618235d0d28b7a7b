use std::path::PathBuf;

use clap::{ArgAction, Parser};

#[allow(clippy::struct_excessive_bools)]
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Periodic usage telemetry sender", long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Run a single check (and a send if one is due), then exit.
    #[arg(long, action = ArgAction::SetTrue)]
    pub once: bool,

    /// Log what would be posted instead of contacting the collector.
    #[arg(long, action = ArgAction::SetTrue)]
    pub dry_run: bool,

    /// Keep the last-report state in memory instead of the state file.
    #[arg(long, action = ArgAction::SetTrue)]
    pub ephemeral: bool,

    /// Force telemetry off regardless of configuration.
    #[arg(long, action = ArgAction::SetTrue)]
    pub opt_out: bool,

    /// Screenshot mode: never send, never consult the opt-in setting.
    #[arg(long, action = ArgAction::SetTrue)]
    pub screenshot_mode: bool,

    /// Allow plain-HTTP URLs.
    #[arg(long, action = ArgAction::SetTrue)]
    pub insecure: bool,

    /// Emit JSON logs (requires `--features json-logs`).
    #[arg(long, action = ArgAction::SetTrue)]
    pub json_logs: bool,

    /// Explicit log filter (e.g. "telemetry_sender=debug").
    #[arg(long, value_name = "FILTER")]
    pub log_filter: Option<String>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
