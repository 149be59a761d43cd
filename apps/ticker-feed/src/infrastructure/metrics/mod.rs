//! Prometheus Metrics Module
//!
//! Exposes feed metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: realtime frames received by kind
//! - **Publishing**: ticker batches delivered by source
//! - **Connection**: socket state and reconnect attempts
//! - **Polling**: fallback fetches, failures and skipped ticks
//! - **Subscriptions**: wanted symbols and attached consumers
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::ticker::FeedSource;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling it again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "ticker_feed_frames_received_total",
        "Realtime frames received, by decoded kind"
    );
    describe_counter!(
        "ticker_feed_batches_published_total",
        "Ticker batches published to consumers, by source"
    );
    describe_counter!(
        "ticker_feed_tickers_published_total",
        "Ticker records published to consumers, by source"
    );

    describe_gauge!(
        "ticker_feed_connection_open",
        "1 while the realtime socket is open"
    );
    describe_counter!(
        "ticker_feed_reconnects_total",
        "Realtime reconnection attempts scheduled"
    );
    describe_counter!(
        "ticker_feed_sends_dropped_total",
        "Queued outbound commands dropped because the send queue was full"
    );

    describe_counter!(
        "ticker_feed_poll_fetches_total",
        "Polling fallback fetches, by outcome"
    );
    describe_counter!(
        "ticker_feed_poll_ticks_skipped_total",
        "Poll ticks skipped because a fetch was still in flight"
    );
    describe_histogram!(
        "ticker_feed_poll_fetch_seconds",
        "Polling fallback fetch latency"
    );

    describe_gauge!(
        "ticker_feed_wanted_symbols",
        "Symbols currently wanted by any consumer"
    );
    describe_gauge!("ticker_feed_consumers", "Attached consumers");
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for realtime frames.
#[derive(Debug, Clone, Copy)]
pub enum FrameKind {
    /// Ticker data.
    Tickers,
    /// Control acknowledgment.
    Control,
    /// Rejected by the codec.
    Malformed,
}

impl FrameKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Tickers => "tickers",
            Self::Control => "control",
            Self::Malformed => "malformed",
        }
    }
}

/// Record a realtime frame.
pub fn record_frame(kind: FrameKind) {
    counter!(
        "ticker_feed_frames_received_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a published batch.
pub fn record_batch_published(source: FeedSource, tickers: usize) {
    counter!(
        "ticker_feed_batches_published_total",
        "source" => source.as_str()
    )
    .increment(1);
    counter!(
        "ticker_feed_tickers_published_total",
        "source" => source.as_str()
    )
    .increment(tickers as u64);
}

/// Update the socket state gauge.
pub fn set_connection_open(open: bool) {
    gauge!("ticker_feed_connection_open").set(if open { 1.0 } else { 0.0 });
}

/// Record a scheduled reconnection attempt.
pub fn record_reconnect() {
    counter!("ticker_feed_reconnects_total").increment(1);
}

/// Record an outbound command dropped from the send queue.
pub fn record_send_dropped() {
    counter!("ticker_feed_sends_dropped_total").increment(1);
}

/// Record a finished polling fetch.
pub fn record_poll_fetch(success: bool, duration: Duration) {
    counter!(
        "ticker_feed_poll_fetches_total",
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
    histogram!("ticker_feed_poll_fetch_seconds").record(duration.as_secs_f64());
}

/// Record a skipped poll tick.
pub fn record_poll_skipped() {
    counter!("ticker_feed_poll_ticks_skipped_total").increment(1);
}

/// Update the wanted-symbol gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_wanted_symbols(count: usize) {
    gauge!("ticker_feed_wanted_symbols").set(count as f64);
}

/// Update the consumer gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_consumers(count: usize) {
    gauge!("ticker_feed_consumers").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
