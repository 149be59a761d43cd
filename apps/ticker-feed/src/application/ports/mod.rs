//! Port Interfaces
//!
//! Defines the interfaces (ports) the feed session drives. Infrastructure
//! adapters implement them for real networks; tests implement them with
//! in-memory channels.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`Transport`]: opens realtime socket links
//! - [`TickerSource`]: request/response ticker snapshots for polling

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::ticker::Ticker;

// =============================================================================
// Realtime Transport
// =============================================================================

/// Something that happened on an open realtime link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A text frame arrived.
    Message(String),
    /// The link reported an error. A `Closed` event follows.
    Error(String),
    /// The link is gone.
    Closed {
        /// Human-readable close reason.
        reason: String,
    },
}

/// An open realtime link.
///
/// Frames written to `outbound` are sent in order. Dropping `outbound`
/// closes the link. `inbound` yields events until the link is closed; a
/// receiver that ends without a `Closed` event is treated as closed.
#[derive(Debug)]
pub struct TransportLink {
    /// Text frames to send.
    pub outbound: mpsc::UnboundedSender<String>,
    /// Events from the remote end.
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

impl TransportLink {
    /// Create a link from its two channel halves.
    #[must_use]
    pub const fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<LinkEvent>,
    ) -> Self {
        Self { outbound, inbound }
    }
}

/// Realtime transport errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection attempt failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    /// The endpoint URL is unusable.
    #[error("invalid endpoint {0}")]
    InvalidEndpoint(String),
}

/// Opens realtime links to a ticker endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a link to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the link cannot be established.
    async fn connect(&self, url: &str) -> Result<TransportLink, TransportError>;
}

// =============================================================================
// Polling Source
// =============================================================================

/// Polling fetch errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Network-level failure (DNS, refused, timeout).
    #[error("network error: {0}")]
    Network(String),
    /// The endpoint answered with a non-success status.
    #[error("endpoint returned status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },
    /// The body could not be decoded as a ticker list.
    #[error("invalid response body: {0}")]
    InvalidBody(String),
}

/// Request/response ticker snapshots.
#[async_trait]
pub trait TickerSource: Send + Sync {
    /// Fetch the current ticker list.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on network failure, non-success status, or an
    /// undecodable body.
    async fn fetch(&self) -> Result<Vec<Ticker>, FetchError>;
}
