//! Ticker Feed Wire Messages
//!
//! Wire format types for the realtime socket and the polling endpoint.
//!
//! # Message Types
//!
//! ## Inbound (server → client)
//! - Ticker list: a JSON array of ticker objects
//! - Price update: `{"type": "price", "symbol": "BTCUSDT", "price": 67500.0}`
//! - Control ack: `{"type": "subscribed", "symbols": ["BTCUSDT"]}`
//!
//! ## Outbound (client → server)
//! - `{"type": "subscribe", "symbols": [...]}`
//! - `{"type": "unsubscribe", "symbols": [...]}`
//!
//! Ticker field names are accepted in both camelCase (`change24h`) and
//! snake_case (`change_24h`); the REST endpoint uses the latter.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::ticker::{Symbol, Ticker, TickerError};

// =============================================================================
// Inbound Messages
// =============================================================================

/// One ticker record as sent on the wire.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "symbol": "BTCUSDT",
///   "price": 67500.0,
///   "change_24h": 2.5,
///   "volume_24h": 28000000000.0,
///   "high_24h": 68000.0,
///   "low_24h": 66000.0,
///   "timestamp": 1718000000000
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerMessage {
    /// Symbol, any case.
    pub symbol: String,

    /// Last price.
    pub price: Decimal,

    /// 24h change in percent.
    #[serde(rename = "change24h", alias = "change_24h")]
    pub change_24h: Decimal,

    /// 24h volume.
    #[serde(rename = "volume24h", alias = "volume_24h")]
    pub volume_24h: Decimal,

    /// 24h high.
    #[serde(rename = "high24h", alias = "high_24h")]
    pub high_24h: Decimal,

    /// 24h low.
    #[serde(rename = "low24h", alias = "low_24h")]
    pub low_24h: Decimal,
}

impl TryFrom<TickerMessage> for Ticker {
    type Error = TickerError;

    fn try_from(msg: TickerMessage) -> Result<Self, Self::Error> {
        Self::new(
            &msg.symbol,
            msg.price,
            msg.change_24h,
            msg.volume_24h,
            msg.high_24h,
            msg.low_24h,
        )
    }
}

impl From<&Ticker> for TickerMessage {
    fn from(ticker: &Ticker) -> Self {
        Self {
            symbol: ticker.symbol.clone(),
            price: ticker.price,
            change_24h: ticker.change_24h,
            volume_24h: ticker.volume_24h,
            high_24h: ticker.high_24h,
            low_24h: ticker.low_24h,
        }
    }
}

/// Single-symbol price update.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "price", "symbol": "BTCUSDT", "price": 67500.0, "timestamp": "..."}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PriceUpdateMessage {
    /// Symbol, any case.
    pub symbol: String,
    /// Last price.
    pub price: Decimal,
}

/// Kind of control acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    /// Subscribe command accepted.
    Subscribed,
    /// Unsubscribe command accepted.
    Unsubscribed,
    /// Server greeting after connect.
    Welcome,
    /// Keep-alive answer.
    Pong,
    /// Server rejected a command.
    Error,
    /// Any other control type.
    #[serde(other)]
    Other,
}

/// Control acknowledgment.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "subscribed", "symbols": ["BTCUSDT", "ETHUSDT"]}
/// {"type": "error", "message": "unknown symbol FOO"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlAck {
    /// Ack kind.
    #[serde(rename = "type")]
    pub kind: ControlKind,

    /// Symbols the ack refers to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols: Vec<String>,

    /// Optional server message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// =============================================================================
// Outbound Messages
// =============================================================================

/// Client command action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandAction {
    /// Start streaming symbols.
    Subscribe,
    /// Stop streaming symbols.
    Unsubscribe,
}

/// Subscribe/unsubscribe command sent over the socket.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "subscribe", "symbols": ["BTCUSDT"]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCommand {
    /// Action.
    #[serde(rename = "type")]
    pub action: CommandAction,

    /// Symbols, canonical form.
    pub symbols: Vec<Symbol>,
}

impl ClientCommand {
    /// Create a subscribe command.
    #[must_use]
    pub fn subscribe(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            action: CommandAction::Subscribe,
            symbols: symbols.into_iter().collect(),
        }
    }

    /// Create an unsubscribe command.
    #[must_use]
    pub fn unsubscribe(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            action: CommandAction::Unsubscribe,
            symbols: symbols.into_iter().collect(),
        }
    }
}
