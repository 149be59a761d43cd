//! Ticker Feed Binary
//!
//! Runs one feed session against the configured endpoints and logs every
//! batch it delivers. Useful for watching the realtime/polling hand-off
//! against a live backend.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ticker-feed
//! ```
//!
//! # Environment Variables
//!
//! - `TICKER_FEED_HOST`: Backend host, e.g. `prices.example.com` (default: localhost:8080)
//! - `TICKER_FEED_SECURE`: Use `wss`/`https` (default: false)
//! - `TICKER_FEED_STREAM_URL` / `TICKER_FEED_POLL_URL`: Explicit endpoint overrides
//! - `TICKER_FEED_SYMBOLS`: Comma-separated symbols to watch (default: all)
//! - `TICKER_FEED_POLL_INTERVAL_SECS`: Fallback poll period (default: 10)
//! - `TICKER_FEED_HEALTH_PORT`: Health check HTTP port, 0 disables (default: 8083)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`: Tracing export
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ticker_feed::infrastructure::health::{HealthServer, HealthServerState};
use ticker_feed::infrastructure::telemetry;
use ticker_feed::{
    FeedConfig, FeedHandle, HttpTickerSource, TickerFeed, WebSocketTransport, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting ticker feed");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = FeedConfig::from_env().context("invalid ticker feed configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let transport = Arc::new(WebSocketTransport::default());
    let source = Arc::new(HttpTickerSource::new(
        config.endpoints.poll_url.clone(),
        config.polling.timeout,
    )
    .context("failed to build polling client")?);

    let feed = TickerFeed::spawn(&config, transport, source);

    if config.server.health_port != 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            feed.shared_state(),
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    let watcher = tokio::spawn(watch_batches(feed.clone(), config.symbols.clone()));

    tracing::info!("Ticker feed ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, feed.close())
        .await
        .is_err()
    {
        tracing::warn!("Feed session did not close in time");
    }
    let _ = watcher.await;

    tracing::info!("Ticker feed stopped");
    Ok(())
}

/// Log every batch delivered to a consumer of `symbols`.
async fn watch_batches(feed: FeedHandle, symbols: Vec<String>) {
    let mut consumer = match feed.subscribe(&symbols).await {
        Ok(consumer) => consumer,
        Err(e) => {
            tracing::error!(error = %e, "Could not attach consumer");
            return;
        }
    };

    while let Some(batch) = consumer.recv().await {
        tracing::info!(
            source = %batch.source,
            stale = batch.stale,
            count = batch.tickers.len(),
            "Tickers"
        );
        for ticker in &batch.tickers {
            tracing::debug!(
                symbol = %ticker.symbol,
                price = %ticker.price,
                change_24h = ?ticker.change_24h,
                "Ticker"
            );
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &FeedConfig) {
    tracing::info!(
        stream_url = %config.endpoints.stream_url,
        poll_url = %config.endpoints.poll_url,
        symbols = config.symbols.len(),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        base_delay_ms = config.reconnect.base_delay.as_millis(),
        max_delay_ms = config.reconnect.max_delay.as_millis(),
        poll_interval_secs = config.polling.interval.as_secs(),
        stale_after_failures = config.polling.stale_after_failures,
        default_tickers = config.default_tickers.len(),
        "Feed tuning"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
