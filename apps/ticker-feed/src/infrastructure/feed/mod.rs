//! Ticker Feed
//!
//! The streaming client core: codec, reconnect policy, connection manager,
//! polling fallback and the session that composes them.

pub mod codec;
pub mod connection;
pub mod messages;
pub mod polling;
pub mod reconnect;
pub mod session;
pub mod state;

pub use codec::{CodecError, DecodedFrame, TickerCodec};
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState, SendOutcome};
pub use messages::{ClientCommand, ControlAck, ControlKind};
pub use polling::{PollOutcome, PollingFallback};
pub use reconnect::{BackoffState, ReconnectConfig, ReconnectPolicy};
pub use session::{Consumer, FeedError, FeedHandle, TickerFeed};
pub use state::{FeedState, FeedStatus};
