//! In-memory transport and polling source for driving feed sessions.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};

use ticker_feed::{
    FeedConfig, FetchError, LinkEvent, Ticker, TickerSource, Transport, TransportError,
    TransportLink,
};

pub const STREAM_URL: &str = "ws://feed.test/ws/market";
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Config with short, round timings.
pub fn test_config() -> FeedConfig {
    let mut config = FeedConfig::default();
    config.endpoints.stream_url = STREAM_URL.to_string();
    config.endpoints.poll_url = "http://feed.test/api/v1/prices".to_string();
    config.reconnect.base_delay = Duration::from_secs(1);
    config.reconnect.max_delay = Duration::from_secs(8);
    config.reconnect.multiplier = 2.0;
    config.reconnect.jitter = 0.0;
    config.polling.interval = POLL_INTERVAL;
    config.polling.stale_after_failures = 3;
    config
}

pub fn ticker(symbol: &str, price: i64) -> Ticker {
    Ticker::price_only(symbol, Decimal::new(price, 0)).unwrap()
}

// =============================================================================
// Transport
// =============================================================================

/// A pending `Transport::connect` call, answered by the test.
pub struct ConnectRequest {
    pub url: String,
    respond: oneshot::Sender<Result<TransportLink, TransportError>>,
}

impl ConnectRequest {
    /// Complete the handshake and hand back the server side of the link.
    pub fn accept(self) -> RemoteEnd {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let _ = self
            .respond
            .send(Ok(TransportLink::new(outbound_tx, events_rx)));
        RemoteEnd {
            sent: outbound_rx,
            events: events_tx,
        }
    }

    /// Fail the handshake.
    pub fn reject(self, reason: &str) {
        let _ = self
            .respond
            .send(Err(TransportError::ConnectFailed(reason.to_string())));
    }
}

/// Server side of an accepted link.
pub struct RemoteEnd {
    sent: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl RemoteEnd {
    /// Deliver a text frame to the client.
    pub fn push(&self, frame: &str) {
        let _ = self.events.send(LinkEvent::Message(frame.to_string()));
    }

    /// Close the link from the server side.
    pub fn close(&self, reason: &str) {
        let _ = self.events.send(LinkEvent::Closed {
            reason: reason.to_string(),
        });
    }

    /// Next frame the client wrote.
    pub async fn next_sent(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.sent.recv())
            .await
            .expect("no frame sent within 5s")
            .expect("client closed the link")
    }

    /// Next frame the client wrote, parsed as JSON.
    pub async fn next_command(&mut self) -> serde_json::Value {
        let text = self.next_sent().await;
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    /// Frames already written and not yet read.
    pub fn drain_sent(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.sent.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

/// Transport whose connect calls are answered by the test.
pub struct MockTransport {
    requests: mpsc::UnboundedSender<ConnectRequest>,
    connects: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ConnectRequest>) {
        let (requests, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                requests,
                connects: AtomicUsize::new(0),
            }),
            rx,
        )
    }

    /// Connect calls made so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &str) -> Result<TransportLink, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (respond, response) = oneshot::channel();
        self.requests
            .send(ConnectRequest {
                url: url.to_string(),
                respond,
            })
            .map_err(|_| TransportError::ConnectFailed("test harness gone".to_string()))?;
        response
            .await
            .unwrap_or_else(|_| Err(TransportError::ConnectFailed("request dropped".to_string())))
    }
}

/// Wait for the session's next connect call.
pub async fn next_request(requests: &mut mpsc::UnboundedReceiver<ConnectRequest>) -> ConnectRequest {
    tokio::time::timeout(Duration::from_secs(120), requests.recv())
        .await
        .expect("no connect attempt within 120s")
        .expect("transport dropped")
}

// =============================================================================
// Polling Source
// =============================================================================

/// Polling source that returns whatever the test last scripted.
pub struct ScriptedSource {
    response: Mutex<Result<Vec<Ticker>, FetchError>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn ok(tickers: Vec<Ticker>) -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(Ok(tickers)),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(Err(FetchError::Status { status: 503 })),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn respond_with(&self, tickers: Vec<Ticker>) {
        *self.response.lock() = Ok(tickers);
    }

    pub fn fail_with(&self, error: FetchError) {
        *self.response.lock() = Err(error);
    }

    /// Fetch calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TickerSource for ScriptedSource {
    async fn fetch(&self) -> Result<Vec<Ticker>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.lock().clone()
    }
}
