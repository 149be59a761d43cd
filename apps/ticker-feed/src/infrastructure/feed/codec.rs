//! Ticker Codec
//!
//! Decodes inbound frames from the realtime socket and the polling endpoint,
//! and encodes outbound subscription commands.
//!
//! Frames are inspected as raw JSON first so every failure is reported as a
//! [`CodecError`] instead of a panic or a partially applied frame. A frame with
//! one invalid ticker is rejected as a whole.
//!
//! Accepted inbound shapes:
//! ```json
//! [{"symbol":"BTCUSDT","price":67500,"change_24h":2.5,...}]
//! {"type":"price","symbol":"BTCUSDT","price":67500}
//! {"type":"subscribed","symbols":["BTCUSDT"]}
//! ```

use rust_decimal::Decimal;
use serde_json::{Map, Value};

use crate::domain::ticker::{Ticker, TickerError};
use crate::infrastructure::feed::messages::{
    ClientCommand, ControlAck, PriceUpdateMessage, TickerMessage,
};

/// Required ticker fields as `(camelCase, snake_case)` wire names.
const TICKER_FIELDS: [(&str, &str); 6] = [
    ("symbol", "symbol"),
    ("price", "price"),
    ("change24h", "change_24h"),
    ("volume24h", "volume_24h"),
    ("high24h", "high_24h"),
    ("low24h", "low_24h"),
];

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON, but not a ticker list or control object.
    #[error("unexpected frame shape: {0}")]
    UnexpectedShape(String),

    /// A required ticker field is absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// A numeric field holds something other than a number.
    #[error("field `{0}` is not numeric")]
    NonNumeric(&'static str),

    /// The record violates a ticker invariant.
    #[error(transparent)]
    InvalidTicker(#[from] TickerError),
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedFrame {
    /// Market data.
    Tickers(Vec<Ticker>),
    /// Subscription-control acknowledgment. Carries no data.
    Control(ControlAck),
}

/// JSON codec for the ticker feed.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickerCodec;

impl TickerCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one realtime frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] for invalid JSON, an unknown shape, a missing or
    /// non-numeric field, a negative price or an empty symbol.
    pub fn decode(&self, text: &str) -> Result<DecodedFrame, CodecError> {
        match serde_json::from_str::<Value>(text.trim())? {
            Value::Array(items) => Ok(DecodedFrame::Tickers(decode_tickers(items)?)),
            Value::Object(object) => decode_object(object),
            other => Err(CodecError::UnexpectedShape(format!(
                "expected JSON array or object, got {}",
                kind_of(&other)
            ))),
        }
    }

    /// Decode a polling endpoint body.
    ///
    /// Accepts a bare ticker list or an API envelope `{"data": [...]}`.
    ///
    /// # Errors
    ///
    /// Same as [`TickerCodec::decode`].
    pub fn decode_snapshot(&self, text: &str) -> Result<Vec<Ticker>, CodecError> {
        match serde_json::from_str::<Value>(text.trim())? {
            Value::Array(items) => decode_tickers(items),
            Value::Object(mut object) => match object.remove("data") {
                Some(Value::Array(items)) => decode_tickers(items),
                _ => Err(CodecError::UnexpectedShape(
                    "object without a `data` ticker list".to_string(),
                )),
            },
            other => Err(CodecError::UnexpectedShape(format!(
                "expected ticker list, got {}",
                kind_of(&other)
            ))),
        }
    }

    /// Encode an outbound command.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, command: &ClientCommand) -> Result<String, CodecError> {
        Ok(serde_json::to_string(command)?)
    }
}

fn decode_object(object: Map<String, Value>) -> Result<DecodedFrame, CodecError> {
    let kind = match object.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        Some(_) => {
            return Err(CodecError::UnexpectedShape(
                "`type` is not a string".to_string(),
            ));
        }
        None => {
            return Err(CodecError::UnexpectedShape(
                "object without a `type` field".to_string(),
            ));
        }
    };

    if kind == "price" {
        require_field(&object, ("symbol", "symbol"))?;
        require_numeric(&object, ("price", "price"))?;
        let update: PriceUpdateMessage = serde_json::from_value(Value::Object(object))?;
        let ticker = Ticker::price_only(&update.symbol, update.price)?;
        return Ok(DecodedFrame::Tickers(vec![ticker]));
    }

    let ack: ControlAck = serde_json::from_value(Value::Object(object))?;
    Ok(DecodedFrame::Control(ack))
}

fn decode_tickers(items: Vec<Value>) -> Result<Vec<Ticker>, CodecError> {
    items.into_iter().map(decode_ticker).collect()
}

fn decode_ticker(value: Value) -> Result<Ticker, CodecError> {
    let Value::Object(object) = value else {
        return Err(CodecError::UnexpectedShape(format!(
            "ticker entry is {}",
            kind_of(&value)
        )));
    };

    require_field(&object, TICKER_FIELDS[0])?;
    for names in &TICKER_FIELDS[1..] {
        require_numeric(&object, *names)?;
    }

    let msg: TickerMessage = serde_json::from_value(Value::Object(object))?;
    Ok(Ticker::try_from(msg)?)
}

fn lookup<'a>(object: &'a Map<String, Value>, (camel, snake): (&str, &str)) -> Option<&'a Value> {
    object.get(camel).or_else(|| object.get(snake))
}

fn require_field(
    object: &Map<String, Value>,
    names: (&'static str, &'static str),
) -> Result<(), CodecError> {
    match lookup(object, names) {
        Some(Value::String(_)) => Ok(()),
        Some(_) => Err(CodecError::UnexpectedShape(format!(
            "field `{}` is not a string",
            names.0
        ))),
        None => Err(CodecError::MissingField(names.0)),
    }
}

fn require_numeric(
    object: &Map<String, Value>,
    names: (&'static str, &'static str),
) -> Result<(), CodecError> {
    match lookup(object, names) {
        Some(Value::Number(_)) => Ok(()),
        Some(Value::String(s)) if s.parse::<Decimal>().is_ok() => Ok(()),
        Some(_) => Err(CodecError::NonNumeric(names.0)),
        None => Err(CodecError::MissingField(names.0)),
    }
}

const fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
