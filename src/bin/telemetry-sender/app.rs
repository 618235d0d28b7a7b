use std::path::PathBuf;
use std::sync::Arc;

use telemetry_sender::Result;
use telemetry_sender::TelemetrySender;
use telemetry_sender::config::Config;
use telemetry_sender::logging::init_tracing;
use telemetry_sender::provider::{HttpUsageProvider, ProviderSettings};
use telemetry_sender::store::{FileStore, KeyValueStore, MemoryStore};
use telemetry_sender::transport::{DryRunTransport, HttpTransport, Transport};
use tokio::signal;
use tracing::{info, warn};

use super::cli::Cli;

const DEFAULT_CONFIG: &str = "telemetry-sender.toml";

pub async fn run(cli: Cli) -> Result<()> {
    init_tracing(cli.log_filter.as_deref(), cli.json_logs)?;

    let config = match cli.config.as_deref() {
        Some(path) => Config::from_env_and_required_file(path)?,
        None => Config::from_env_and_file(PathBuf::from(DEFAULT_CONFIG))?,
    };

    let sender = Arc::new(build_sender(&cli, config)?);

    if cli.once {
        sender.send_if_due().await;
        return Ok(());
    }

    sender.start_checking();
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "could not listen for shutdown signal");
    }
    info!("shutdown signal received, stopping checks");
    sender.stop_checking();

    Ok(())
}

pub(super) fn build_sender(cli: &Cli, config: Config) -> Result<TelemetrySender> {
    let mut telemetry = config.telemetry;
    if cli.opt_out {
        telemetry.opt_in = false;
    }
    if cli.screenshot_mode {
        telemetry.screenshot_mode = true;
    }

    let transport: Arc<dyn Transport> = if cli.dry_run {
        Arc::new(DryRunTransport)
    } else {
        HttpTransport::check_scheme(&telemetry.collection_url, cli.insecure)?;
        Arc::new(HttpTransport::new(
            config.http_request_timeout,
            config.http_connect_timeout,
            cli.insecure,
        )?)
    };

    let store: Arc<dyn KeyValueStore> = if cli.ephemeral {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(FileStore::new(config.state_path.clone()))
    };

    info!(
        collection_url = %telemetry.collection_url,
        channel = %telemetry.send_usage_to,
        version = %telemetry.version_label,
        opt_in = telemetry.opt_in,
        screenshot_mode = telemetry.screenshot_mode,
        state_path = %config.state_path.display(),
        ephemeral = cli.ephemeral,
        dry_run = cli.dry_run,
        "telemetry sender configured"
    );

    let provider = HttpUsageProvider::new(ProviderSettings {
        source_url: config.source.url,
        token: config.source.token,
        collection_url: telemetry.collection_url,
        version_label: telemetry.version_label,
        opt_in: telemetry.opt_in,
        screenshot_mode: telemetry.screenshot_mode,
        timeout: config.http_request_timeout,
        connect_timeout: config.http_connect_timeout,
        insecure_http: cli.insecure,
    })?;

    Ok(TelemetrySender::new(Arc::new(provider), store, transport))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::super::cli::Cli;
    use super::build_sender;
    use std::time::Duration;
    use telemetry_sender::config::{Config, SourceSettings, TelemetrySettings};
    use telemetry_sender::constants::{STORAGE_KEY, VERSION_HEADER};
    use telemetry_sender::store::{FileStore, KeyValueStore};
    use telemetry_sender::types::{ReportRecord, SendUsageTo};
    use url::Url;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base: &str, state_path: std::path::PathBuf) -> Config {
        Config {
            telemetry: TelemetrySettings {
                opt_in: true,
                screenshot_mode: false,
                send_usage_to: SendUsageTo::Prod,
                collection_url: Url::parse(&format!("{base}/xpack/v2/send")).unwrap(),
                version_label: "8.0.0".into(),
            },
            source: SourceSettings {
                url: Url::parse(&format!("{base}/api/telemetry/v2/clusters/_stats"))
                    .unwrap(),
                token: None,
            },
            state_path,
            http_connect_timeout: Duration::from_millis(200),
            http_request_timeout: Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn once_run_fetches_posts_and_persists() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/telemetry/v2/clusters/_stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                "hashed_cluster_usage_data1",
                "hashed_cluster_usage_data2"
            ])))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/xpack/v2/send"))
            .and(header(VERSION_HEADER, "8.0.0"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("state.json");
        let cli = Cli {
            once: true,
            insecure: true,
            ..Cli::default()
        };

        let sender = build_sender(&cli, config(&server.uri(), state_path.clone())).unwrap();
        sender.send_if_due().await;

        let stamp = sender.last_reported().unwrap();
        let stored = FileStore::new(state_path).read(STORAGE_KEY).unwrap();
        assert_eq!(ReportRecord::decode(&stored), Some(ReportRecord::new(stamp)));
    }

    #[tokio::test]
    async fn opt_out_flag_suppresses_everything() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cli = Cli {
            opt_out: true,
            insecure: true,
            ephemeral: true,
            ..Cli::default()
        };

        let config = config(&server.uri(), dir.path().join("state.json"));
        let sender = build_sender(&cli, config).unwrap();
        assert!(!sender.should_send_report());
        sender.send_if_due().await;
        assert!(sender.last_reported().is_none());
    }

    #[test]
    fn plain_http_collector_needs_insecure() {
        let dir = tempfile::tempdir().unwrap();
        let config = config("http://127.0.0.1:9", dir.path().join("state.json"));

        assert!(build_sender(&Cli::default(), config).is_err());
    }
}
