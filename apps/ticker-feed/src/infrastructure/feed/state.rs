//! Shared Feed State
//!
//! Lock-light view of a running session for handles and the health server.
//! Written only by the session task; read from anywhere.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::domain::ticker::FeedSource;
use crate::infrastructure::feed::connection::ConnectionState;

/// Shared state for one feed session.
#[derive(Debug)]
pub struct FeedState {
    session_id: String,
    connection: RwLock<ConnectionState>,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    last_batch: RwLock<Option<(FeedSource, DateTime<Utc>)>>,
    polling: AtomicBool,
    closed: AtomicBool,
    reconnect_attempts: AtomicU32,
    wanted_symbols: AtomicUsize,
    consumers: AtomicUsize,
    frames_received: AtomicU64,
    decode_errors: AtomicU64,
    batches_published: AtomicU64,
}

impl FeedState {
    /// Create state for a new session.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            connection: RwLock::new(ConnectionState::Idle),
            last_connected_at: RwLock::new(None),
            last_error: RwLock::new(None),
            last_batch: RwLock::new(None),
            polling: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
            wanted_symbols: AtomicUsize::new(0),
            consumers: AtomicUsize::new(0),
            frames_received: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            batches_published: AtomicU64::new(0),
        }
    }

    /// Session identifier.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Set the connection state.
    pub fn set_connection(&self, state: ConnectionState) {
        *self.connection.write() = state;
        if state == ConnectionState::Open {
            *self.last_connected_at.write() = Some(Utc::now());
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            *self.last_error.write() = None;
        }
    }

    /// Record the latest transport or fetch error.
    pub fn set_error(&self, message: String) {
        *self.last_error.write() = Some(message);
    }

    /// Record the current reconnect attempt number.
    pub fn set_reconnect_attempts(&self, attempts: u32) {
        self.reconnect_attempts.store(attempts, Ordering::Relaxed);
    }

    /// Record whether the polling fallback is armed.
    pub fn set_polling(&self, armed: bool) {
        self.polling.store(armed, Ordering::Relaxed);
    }

    /// Mark the session closed.
    pub fn set_closed(&self) {
        self.closed.store(true, Ordering::Release);
        *self.connection.write() = ConnectionState::Idle;
        self.polling.store(false, Ordering::Relaxed);
    }

    /// Update subscription counts.
    pub fn set_subscriptions(&self, wanted_symbols: usize, consumers: usize) {
        self.wanted_symbols.store(wanted_symbols, Ordering::Relaxed);
        self.consumers.store(consumers, Ordering::Relaxed);
    }

    /// Count a realtime frame.
    pub fn record_frame(&self, malformed: bool) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        if malformed {
            self.decode_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a published batch.
    pub fn record_batch(&self, source: FeedSource, at: DateTime<Utc>) {
        self.batches_published.fetch_add(1, Ordering::Relaxed);
        *self.last_batch.write() = Some((source, at));
    }

    /// Current connection state.
    #[must_use]
    pub fn connection(&self) -> ConnectionState {
        *self.connection.read()
    }

    /// Whether the session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Point-in-time copy for reporting.
    #[must_use]
    pub fn snapshot(&self) -> FeedStatus {
        let last_batch = *self.last_batch.read();
        FeedStatus {
            session_id: self.session_id.clone(),
            connection: self.connection().as_str(),
            polling: self.polling.load(Ordering::Relaxed),
            closed: self.is_closed(),
            last_connected_at: *self.last_connected_at.read(),
            last_error: self.last_error.read().clone(),
            last_source: last_batch.map(|(source, _)| source),
            last_published_at: last_batch.map(|(_, at)| at),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            wanted_symbols: self.wanted_symbols.load(Ordering::Relaxed),
            consumers: self.consumers.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            batches_published: self.batches_published.load(Ordering::Relaxed),
        }
    }
}

/// Serializable session status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedStatus {
    /// Session identifier.
    pub session_id: String,
    /// Realtime connection state.
    pub connection: &'static str,
    /// Whether the polling fallback is armed.
    pub polling: bool,
    /// Whether the session was closed.
    pub closed: bool,
    /// Last successful open.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Latest transport or fetch error since the last open.
    pub last_error: Option<String>,
    /// Source of the latest published batch.
    pub last_source: Option<FeedSource>,
    /// When the latest batch was published.
    pub last_published_at: Option<DateTime<Utc>>,
    /// Consecutive reconnect attempts.
    pub reconnect_attempts: u32,
    /// Symbols wanted by any consumer.
    pub wanted_symbols: usize,
    /// Attached consumers.
    pub consumers: usize,
    /// Realtime frames received.
    pub frames_received: u64,
    /// Frames rejected by the codec.
    pub decode_errors: u64,
    /// Batches published.
    pub batches_published: u64,
}

impl FeedStatus {
    /// Whether the realtime link is open.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.connection == ConnectionState::Open.as_str()
    }

    /// Whether consumers have received any prices.
    #[must_use]
    pub const fn has_data(&self) -> bool {
        self.batches_published > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_clears_error_and_attempts() {
        let state = FeedState::new("s-1");
        state.set_reconnect_attempts(4);
        state.set_error("refused".to_string());

        state.set_connection(ConnectionState::Open);
        let status = state.snapshot();
        assert!(status.is_live());
        assert_eq!(status.reconnect_attempts, 0);
        assert!(status.last_error.is_none());
        assert!(status.last_connected_at.is_some());
    }

    #[test]
    fn counters_accumulate() {
        let state = FeedState::new("s-1");
        state.record_frame(false);
        state.record_frame(true);
        state.record_batch(FeedSource::Polling, Utc::now());

        let status = state.snapshot();
        assert_eq!(status.frames_received, 2);
        assert_eq!(status.decode_errors, 1);
        assert_eq!(status.last_source, Some(FeedSource::Polling));
        assert!(status.has_data());
    }

    #[test]
    fn close_resets_connection() {
        let state = FeedState::new("s-1");
        state.set_connection(ConnectionState::Open);
        state.set_polling(true);
        state.set_closed();

        let status = state.snapshot();
        assert!(status.closed);
        assert!(!status.polling);
        assert_eq!(status.connection, "idle");
    }
}
