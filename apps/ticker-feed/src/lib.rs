#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_truncation
    )
)]

//! Ticker Feed - Resilient Market Data Client
//!
//! Keeps a continuously available stream of ticker prices for UI consumers.
//! One realtime WebSocket connection is held per session, reconnected with
//! capped exponential backoff, and backed by REST polling whenever it is
//! down. Consumers share the connection through ref-counted symbol
//! subscriptions that are replayed on every reconnect.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Ticker records and subscription bookkeeping
//!   - `ticker`: Tickers, batches and their source
//!   - `subscription`: Ref-counted wanted-set per consumer
//!
//! - **Application**: Port definitions
//!   - `ports`: Realtime transport and polling source interfaces
//!
//! - **Infrastructure**: Adapters and the feed core
//!   - `feed`: Codec, reconnect policy, connection manager, polling, session
//!   - `transport`: WebSocket and HTTP port adapters
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!   - `metrics` / `telemetry`: Prometheus metrics and tracing
//!
//! # Data Flow
//!
//! ```text
//!  WebSocket ──► ConnectionManager ─┐
//!                                   ├──► FeedSession ──► broadcast ──► Consumer 1
//!  REST poll ──► PollingFallback ───┘        │                   └──► Consumer N
//!                                      last-known / defaults
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Ticker types with no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and the feed core.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::subscription::{
    ConsumerId, SubscriptionChanges, SubscriptionRegistry, SubscriptionStats,
};
pub use domain::ticker::{FeedSource, Symbol, Ticker, TickerBatch, TickerError, canonical_symbol};

// Ports
pub use application::ports::{
    FetchError, LinkEvent, TickerSource, Transport, TransportError, TransportLink,
};

// Infrastructure config
pub use infrastructure::config::{
    ChannelSettings, ConfigError, Endpoints, FeedConfig, PollingSettings, ReconnectSettings,
    ServerSettings,
};

// Feed core
pub use infrastructure::feed::{
    Consumer, ConnectionState, FeedError, FeedHandle, FeedState, FeedStatus, TickerCodec,
    TickerFeed,
};

// Adapters
pub use infrastructure::transport::{HttpTickerSource, WebSocketTransport};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
