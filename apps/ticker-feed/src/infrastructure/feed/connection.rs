//! Connection Manager
//!
//! Owns the single realtime link of a feed session and drives the
//! connect/retry state machine:
//!
//! ```text
//! Idle|Closed --connect()--> Connecting --ok--> Open
//! Connecting|Open --error/close--> Closed --timer--> Connecting
//! any --disconnect()--> Closing --> Idle
//! ```
//!
//! The manager never awaits. Connect attempts, link readers and reconnect
//! timers run as helper tasks that report back as [`ConnectionSignal`]s on
//! the session channel. Every signal carries the generation it was issued
//! under; `connect()` and `disconnect()` bump the generation so reports from
//! superseded attempts and timers are ignored.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{LinkEvent, Transport, TransportError, TransportLink};
use crate::infrastructure::feed::reconnect::{BackoffState, ReconnectConfig, ReconnectPolicy};
use crate::infrastructure::metrics;

/// Realtime connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not started, or stopped by `disconnect()`.
    Idle,
    /// A connect attempt is in flight.
    Connecting,
    /// The link is live.
    Open,
    /// `disconnect()` is tearing the link down.
    Closing,
    /// Lost; a reconnect may be scheduled.
    Closed,
}

impl ConnectionState {
    /// Label used in logs and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report from a helper task.
#[derive(Debug)]
pub enum ConnectionSignal {
    /// A connect attempt succeeded.
    Connected {
        /// Generation of the attempt.
        generation: u64,
        /// The new link.
        link: TransportLink,
    },
    /// A connect attempt failed.
    ConnectFailed {
        /// Generation of the attempt.
        generation: u64,
        /// Why.
        error: TransportError,
    },
    /// Something happened on the open link.
    Link {
        /// Generation of the link.
        generation: u64,
        /// The event.
        event: LinkEvent,
    },
    /// A reconnect timer fired.
    ReconnectDue {
        /// Generation the timer was scheduled under.
        generation: u64,
    },
}

/// Lifecycle and message events for observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The link is open.
    Opened,
    /// A text frame arrived.
    Message(String),
    /// The link closed or the attempt failed.
    Closed {
        /// Why.
        reason: String,
    },
    /// A transport error.
    Error(String),
    /// A reconnect is scheduled.
    Reconnecting {
        /// Consecutive failed attempts so far.
        attempt: u32,
        /// Wait before the next attempt.
        delay: Duration,
    },
}

/// What happened to a `send()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the open link.
    Sent,
    /// Queued until the next open.
    Queued,
    /// Queued; the oldest queued message was dropped to make room.
    QueuedDroppedOldest,
}

/// Connection manager for one feed session.
pub struct ConnectionManager {
    url: String,
    transport: Arc<dyn Transport>,
    signals: mpsc::UnboundedSender<ConnectionSignal>,
    shutdown: CancellationToken,
    state: ConnectionState,
    generation: u64,
    policy: ReconnectPolicy,
    outbound: Option<mpsc::UnboundedSender<String>>,
    pending: VecDeque<String>,
    pending_capacity: usize,
    connect_task: Option<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.url)
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create an idle manager.
    ///
    /// Helper tasks report on `signals` and stop when `shutdown` is cancelled.
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        transport: Arc<dyn Transport>,
        reconnect: ReconnectConfig,
        pending_capacity: usize,
        signals: mpsc::UnboundedSender<ConnectionSignal>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            url: url.into(),
            transport,
            signals,
            shutdown,
            state: ConnectionState::Idle,
            generation: 0,
            policy: ReconnectPolicy::new(reconnect),
            outbound: None,
            pending: VecDeque::new(),
            pending_capacity: pending_capacity.max(1),
            connect_task: None,
            reader_task: None,
            reconnect_task: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the link is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Current backoff position.
    #[must_use]
    pub const fn backoff(&self) -> BackoffState {
        self.policy.state()
    }

    /// Number of queued sends.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether a reconnect timer is armed.
    #[must_use]
    pub fn has_pending_reconnect(&self) -> bool {
        self.reconnect_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Start connecting.
    ///
    /// No-op while `Connecting` or `Open`. A pending reconnect timer is
    /// cancelled first. Returns whether an attempt was started.
    pub fn connect(&mut self) -> bool {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            return false;
        }

        self.cancel_reconnect();
        self.start_attempt();
        true
    }

    /// Tear down the link and stop retrying until the next `connect()`.
    ///
    /// Cancels the reconnect timer and any in-flight attempt, closes the link
    /// and drops queued sends.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Idle
            && self.connect_task.is_none()
            && self.reconnect_task.is_none()
            && self.pending.is_empty()
        {
            return;
        }

        self.state = ConnectionState::Closing;
        self.generation += 1;
        self.cancel_reconnect();
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        let was_open = self.release_link();
        let dropped = self.pending.len();
        self.pending.clear();
        self.policy.reset();
        self.state = ConnectionState::Idle;

        if was_open {
            metrics::set_connection_open(false);
        }
        tracing::debug!(url = %self.url, dropped, "Realtime connection stopped");
    }

    /// Send a text frame, or queue it until the next open.
    pub fn send(&mut self, message: String) -> SendOutcome {
        let message = match (&self.outbound, self.state) {
            (Some(outbound), ConnectionState::Open) => match outbound.send(message) {
                Ok(()) => return SendOutcome::Sent,
                Err(mpsc::error::SendError(message)) => message,
            },
            _ => message,
        };

        let outcome = if self.pending.len() >= self.pending_capacity {
            self.pending.pop_front();
            metrics::record_send_dropped();
            tracing::debug!(
                capacity = self.pending_capacity,
                "Send queue full, dropped oldest message"
            );
            SendOutcome::QueuedDroppedOldest
        } else {
            SendOutcome::Queued
        };
        self.pending.push_back(message);
        outcome
    }

    /// Write queued sends to the open link in order.
    ///
    /// Returns the number written.
    pub fn flush_pending(&mut self) -> usize {
        let Some(outbound) = self.outbound.as_ref().filter(|_| self.is_open()) else {
            return 0;
        };

        let mut flushed = 0;
        while let Some(message) = self.pending.pop_front() {
            if let Err(mpsc::error::SendError(message)) = outbound.send(message) {
                self.pending.push_front(message);
                break;
            }
            flushed += 1;
        }
        flushed
    }

    /// Apply a helper-task report.
    ///
    /// Stale reports (older generation, or a state that no longer expects
    /// them) are ignored and yield no events.
    pub fn handle(&mut self, signal: ConnectionSignal) -> Vec<ConnectionEvent> {
        match signal {
            ConnectionSignal::Connected { generation, link } => {
                if generation != self.generation || self.state != ConnectionState::Connecting {
                    tracing::trace!(generation, "Ignoring superseded connect result");
                    return Vec::new();
                }
                self.on_connected(link)
            }
            ConnectionSignal::ConnectFailed { generation, error } => {
                if generation != self.generation || self.state != ConnectionState::Connecting {
                    return Vec::new();
                }
                self.connect_task = None;
                tracing::warn!(url = %self.url, error = %error, "Realtime connect failed");
                let mut events = vec![ConnectionEvent::Error(error.to_string())];
                events.extend(self.on_lost(error.to_string()));
                events
            }
            ConnectionSignal::Link { generation, event } => {
                if generation != self.generation || self.state != ConnectionState::Open {
                    return Vec::new();
                }
                match event {
                    LinkEvent::Message(text) => vec![ConnectionEvent::Message(text)],
                    LinkEvent::Error(error) => {
                        tracing::warn!(url = %self.url, error = %error, "Realtime link error");
                        vec![ConnectionEvent::Error(error)]
                    }
                    LinkEvent::Closed { reason } => {
                        tracing::warn!(url = %self.url, reason = %reason, "Realtime link closed");
                        self.release_link();
                        metrics::set_connection_open(false);
                        self.on_lost(reason)
                    }
                }
            }
            ConnectionSignal::ReconnectDue { generation } => {
                if generation != self.generation || self.state != ConnectionState::Closed {
                    return Vec::new();
                }
                self.reconnect_task = None;
                self.start_attempt();
                Vec::new()
            }
        }
    }

    fn start_attempt(&mut self) {
        self.generation += 1;
        self.state = ConnectionState::Connecting;

        let generation = self.generation;
        let url = self.url.clone();
        let transport = Arc::clone(&self.transport);
        let signals = self.signals.clone();
        let shutdown = self.shutdown.clone();

        tracing::debug!(url = %url, generation, "Connecting realtime transport");
        self.connect_task = Some(tokio::spawn(async move {
            let signal = tokio::select! {
                () = shutdown.cancelled() => return,
                result = transport.connect(&url) => match result {
                    Ok(link) => ConnectionSignal::Connected { generation, link },
                    Err(error) => ConnectionSignal::ConnectFailed { generation, error },
                },
            };
            let _ = signals.send(signal);
        }));
    }

    fn on_connected(&mut self, link: TransportLink) -> Vec<ConnectionEvent> {
        let TransportLink { outbound, inbound } = link;
        self.connect_task = None;
        self.outbound = Some(outbound);
        self.state = ConnectionState::Open;
        self.policy.reset();
        self.reader_task = Some(spawn_reader(
            self.generation,
            inbound,
            self.signals.clone(),
            self.shutdown.clone(),
        ));
        metrics::set_connection_open(true);
        tracing::info!(url = %self.url, generation = self.generation, "Realtime transport open");
        vec![ConnectionEvent::Opened]
    }

    fn on_lost(&mut self, reason: String) -> Vec<ConnectionEvent> {
        self.state = ConnectionState::Closed;
        let mut events = vec![ConnectionEvent::Closed { reason }];

        let Some(delay) = self.policy.next_delay() else {
            tracing::warn!(
                url = %self.url,
                attempts = self.policy.attempt_count(),
                "Reconnect attempts exhausted, staying closed until connect()"
            );
            return events;
        };

        let attempt = self.policy.attempt_count();
        let generation = self.generation;
        let signals = self.signals.clone();
        let shutdown = self.shutdown.clone();
        self.reconnect_task = Some(tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = signals.send(ConnectionSignal::ReconnectDue { generation });
                }
            }
        }));

        metrics::record_reconnect();
        tracing::info!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Scheduling reconnect"
        );
        events.push(ConnectionEvent::Reconnecting { attempt, delay });
        events
    }

    /// Drop the live link. Returns whether one was open.
    fn release_link(&mut self) -> bool {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        self.outbound.take().is_some()
    }

    /// Cancel a pending reconnect timer, if any.
    pub fn cancel_reconnect(&mut self) {
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel_reconnect();
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        self.release_link();
    }
}

fn spawn_reader(
    generation: u64,
    mut inbound: mpsc::UnboundedReceiver<LinkEvent>,
    signals: mpsc::UnboundedSender<ConnectionSignal>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                () = shutdown.cancelled() => return,
                event = inbound.recv() => event,
            };

            let event = event.unwrap_or_else(|| LinkEvent::Closed {
                reason: "transport ended".to_string(),
            });
            let closed = matches!(event, LinkEvent::Closed { .. });
            if signals
                .send(ConnectionSignal::Link { generation, event })
                .is_err()
                || closed
            {
                return;
            }
        }
    })
}
