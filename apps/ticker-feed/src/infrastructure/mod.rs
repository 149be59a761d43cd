//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the feed session
//! that drives them.

/// Configuration loading and validation.
pub mod config;

/// Ticker feed core: codec, connection manager, polling fallback, session.
pub mod feed;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// WebSocket and HTTP adapters for the transport ports.
pub mod transport;
