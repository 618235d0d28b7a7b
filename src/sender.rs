//! Periodic usage-report dispatcher.
//!
//! A [`TelemetrySender`] wakes up every [`CHECK_INTERVAL`], decides whether a
//! report is due and, if so, posts every payload the provider hands out. The
//! time of the last fully successful cycle is kept in the key-value store so
//! restarts do not re-send early.
//!
//! At most one cycle is in flight per sender. Overlapping calls are dropped,
//! never queued, and no error ever escapes a cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::Result;
use crate::constants::{CHECK_INTERVAL, REPORT_INTERVAL_MS, STORAGE_KEY, VERSION_HEADER};
use crate::error::TransportError;
use crate::provider::TelemetryProvider;
use crate::store::KeyValueStore;
use crate::transport::Transport;
use crate::types::ReportRecord;

pub struct TelemetrySender {
    provider: Arc<dyn TelemetryProvider>,
    store: Arc<dyn KeyValueStore>,
    transport: Arc<dyn Transport>,
    last_reported: RwLock<Option<String>>,
    is_sending: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
}

/// Clears the in-flight flag on every exit path, including cancellation.
struct SendingGuard<'a>(&'a AtomicBool);

impl<'a> SendingGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl TelemetrySender {
    /// Build a sender, adopting the last report time found in `store`.
    ///
    /// A missing or malformed record means "never reported".
    pub fn new(
        provider: Arc<dyn TelemetryProvider>,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let last_reported = store
            .read(STORAGE_KEY)
            .and_then(|raw| ReportRecord::decode(&raw))
            .map(|record| record.last_report);
        debug!(last_reported = ?last_reported, "telemetry sender initialised");

        Self {
            provider,
            store,
            transport,
            last_reported: RwLock::new(last_reported),
            is_sending: AtomicBool::new(false),
            timer: Mutex::new(None),
        }
    }

    pub fn last_reported(&self) -> Option<String> {
        self.last_reported
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_sending(&self) -> bool {
        self.is_sending.load(Ordering::Acquire)
    }

    /// Whether a report should go out now. Screenshot mode wins over
    /// everything and skips the opt-in lookup entirely.
    pub fn should_send_report(&self) -> bool {
        if self.provider.is_screenshot_mode() {
            return false;
        }
        if !self.provider.is_opted_in() {
            return false;
        }
        let last = self
            .last_reported
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        is_report_due(last.as_deref(), now_ms())
    }

    /// Run one dispatch cycle if none is in flight and a report is due.
    pub async fn send_if_due(&self) {
        if self.is_sending() {
            debug!("dispatch cycle already in flight; skipping");
            return;
        }
        if !self.should_send_report() {
            return;
        }
        let Some(_guard) = SendingGuard::try_acquire(&self.is_sending) else {
            debug!("lost race for dispatch cycle; skipping");
            return;
        };

        match self.dispatch().await {
            Ok(sent) => info!(clusters = sent, "usage report sent"),
            Err(err) => warn!(
                error = %err,
                retriable = err.is_retriable(),
                "usage report cycle failed; will retry on a later check"
            ),
        }
    }

    /// Poll [`Self::send_if_due`] every [`CHECK_INTERVAL`]. Only the first
    /// call registers a timer.
    pub fn start_checking(self: &Arc<Self>) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if timer.is_some() {
            debug!("telemetry checks already scheduled");
            return;
        }

        let sender = Arc::downgrade(self);
        *timer = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + CHECK_INTERVAL, CHECK_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(sender) = sender.upgrade() else {
                    break;
                };
                tokio::spawn(async move { sender.send_if_due().await });
            }
        }));
        info!(
            interval_ms = CHECK_INTERVAL.as_millis(),
            "telemetry checks scheduled"
        );
    }

    pub fn stop_checking(&self) {
        if let Some(handle) = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
            debug!("telemetry checks stopped");
        }
    }

    async fn dispatch(&self) -> Result<usize> {
        let payloads = self.provider.fetch_payloads().await?;
        let url = self.provider.collection_url();
        let headers = report_headers(self.provider.version_label())?;
        let total = payloads.len();

        // Every payload gets its own attempt; the cycle only counts if all landed.
        let mut first_error = None;
        for (cluster, payload) in payloads.into_iter().enumerate() {
            if let Err(err) = self.transport.post(&url, headers.clone(), payload).await {
                warn!(cluster, total, error = %err, "failed to post usage payload");
                first_error.get_or_insert(err);
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        self.record_success(now_ms());
        Ok(total)
    }

    fn record_success(&self, at_ms: i64) {
        let stamp = at_ms.to_string();
        *self
            .last_reported
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(stamp.clone());

        let persisted = ReportRecord::new(stamp)
            .encode()
            .map_err(crate::error::StoreError::from)
            .and_then(|raw| self.store.write(STORAGE_KEY, raw));
        if let Err(err) = persisted {
            warn!(error = %err, "could not persist last report time");
        }
    }
}

impl Drop for TelemetrySender {
    fn drop(&mut self) {
        if let Some(handle) = self
            .timer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// Elapsed-time half of the due check. Stamps without a leading integer
/// count as due; exactly one interval of age does not.
#[must_use]
pub fn is_report_due(last_reported: Option<&str>, now_ms: i64) -> bool {
    last_reported
        .and_then(leading_millis)
        .map_or(true, |last| now_ms.saturating_sub(last) > REPORT_INTERVAL_MS)
}

/// Integer prefix of a stored stamp, so `"1700000000000.5"` reads as
/// `1700000000000`. Saturates instead of overflowing.
fn leading_millis(raw: &str) -> Option<i64> {
    let raw = raw.trim_start();
    let (negative, digits) = match raw.as_bytes().first() {
        Some(b'-') => (true, &raw[1..]),
        Some(b'+') => (false, &raw[1..]),
        _ => (false, raw),
    };
    let digits: Vec<i64> = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .map(|digit| i64::from(digit - b'0'))
        .collect();
    if digits.is_empty() {
        return None;
    }
    let magnitude = digits
        .into_iter()
        .fold(0_i64, |acc, digit| acc.saturating_mul(10).saturating_add(digit));
    Some(if negative { -magnitude } else { magnitude })
}

fn report_headers(version_label: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let version = HeaderValue::from_str(version_label).map_err(|_| {
        TransportError::InvalidHeader {
            name: VERSION_HEADER,
        }
    })?;
    headers.insert(HeaderName::from_static(VERSION_HEADER), version);
    Ok(headers)
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
