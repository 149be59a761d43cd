//! WebSocket Transport
//!
//! [`Transport`] adapter over `tokio-tungstenite`. Each link runs one pump
//! task that owns both halves of the socket: text written to the link's
//! outbound channel goes out as text frames, inbound text frames come back
//! as [`LinkEvent::Message`]. Pings are answered by tungstenite and never
//! surface. Dropping the outbound sender sends a close frame and ends the pump.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{LinkEvent, Transport, TransportError, TransportLink};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport for the realtime ticker stream.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    connect_timeout: Duration,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl WebSocketTransport {
    /// Create a transport whose handshakes give up after `connect_timeout`.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<TransportLink, TransportError> {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(TransportError::InvalidEndpoint(url.to_string()));
        }

        tracing::debug!(url, "Opening WebSocket");
        let (socket, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(url))
                .await
                .map_err(|_| {
                    TransportError::ConnectFailed(format!(
                        "handshake timed out after {}s",
                        self.connect_timeout.as_secs()
                    ))
                })?
                .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(socket, outbound_rx, events_tx));

        Ok(TransportLink::new(outbound_tx, events_rx))
    }
}

async fn pump(
    socket: Socket,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let (mut write, mut read) = socket.split();

    loop {
        tokio::select! {
            outgoing = outbound.recv() => {
                let Some(text) = outgoing else {
                    let _ = write.send(Message::Close(None)).await;
                    let _ = write.close().await;
                    tracing::debug!("WebSocket closed by client");
                    return;
                };
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    let _ = events.send(LinkEvent::Error(e.to_string()));
                    let _ = events.send(LinkEvent::Closed { reason: e.to_string() });
                    return;
                }
            }
            incoming = read.next() => {
                let event = match incoming {
                    Some(Ok(Message::Text(text))) => LinkEvent::Message(text.as_str().to_owned()),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => LinkEvent::Message(text),
                        Err(_) => {
                            tracing::debug!(len = bytes.len(), "Ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_owned())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "server closed".to_string());
                        let _ = events.send(LinkEvent::Closed { reason });
                        return;
                    }
                    // tungstenite queues the pong for each ping itself.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = events.send(LinkEvent::Error(e.to_string()));
                        let _ = events.send(LinkEvent::Closed { reason: e.to_string() });
                        return;
                    }
                    None => {
                        let _ = events.send(LinkEvent::Closed {
                            reason: "stream ended".to_string(),
                        });
                        return;
                    }
                };

                if events.send(event).is_err() {
                    // Link dropped by its owner.
                    let _ = write.send(Message::Close(None)).await;
                    return;
                }
            }
        }
    }
}
