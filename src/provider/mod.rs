use async_trait::async_trait;
use url::Url;

use crate::Result;

pub(crate) mod http;
pub(crate) mod models;

pub use http::{HttpUsageProvider, ProviderSettings};

/// Everything the dispatcher needs to know about the host application.
#[async_trait]
pub trait TelemetryProvider: Send + Sync {
    fn is_opted_in(&self) -> bool;

    fn is_screenshot_mode(&self) -> bool;

    fn collection_url(&self) -> Url;

    fn version_label(&self) -> &str;

    /// One pre-serialized report body per cluster.
    async fn fetch_payloads(&self) -> Result<Vec<String>>;
}
