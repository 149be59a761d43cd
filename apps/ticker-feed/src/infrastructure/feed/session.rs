//! Feed Session
//!
//! Composes the connection manager, polling fallback, subscription registry
//! and codec into one logical ticker stream.
//!
//! A session is a single tokio task that owns every component and handles
//! consumer commands, connection signals and poll signals one at a time.
//! Realtime is authoritative while the link is open; polling is armed
//! whenever it is not, and disarmed before the subscription replay on every
//! open, so the two never deliver concurrently.
//!
//! # Usage
//!
//! ```rust,ignore
//! let feed = TickerFeed::spawn(&config, transport, source);
//! let mut consumer = feed.subscribe(["BTCUSDT"]).await?;
//! while let Some(batch) = consumer.recv().await {
//!     render(&batch.tickers, batch.stale);
//! }
//! feed.close().await;
//! ```

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::application::ports::{TickerSource, Transport};
use crate::domain::subscription::{ConsumerId, SubscriptionChanges, SubscriptionRegistry};
use crate::domain::ticker::{FeedSource, Symbol, Ticker, TickerBatch, canonical_symbol};
use crate::infrastructure::config::FeedConfig;
use crate::infrastructure::feed::codec::{DecodedFrame, TickerCodec};
use crate::infrastructure::feed::connection::{
    ConnectionEvent, ConnectionManager, ConnectionSignal, ConnectionState,
};
use crate::infrastructure::feed::messages::ClientCommand;
use crate::infrastructure::feed::polling::{PollOutcome, PollSignal, PollingFallback};
use crate::infrastructure::feed::reconnect::ReconnectConfig;
use crate::infrastructure::feed::state::{FeedState, FeedStatus};
use crate::infrastructure::metrics::{self, FrameKind};

/// Errors returned to feed handles and consumers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// The session has been closed.
    #[error("ticker feed session is closed")]
    Closed,
}

/// Commands from handles and consumers to the session task.
#[derive(Debug)]
enum FeedCommand {
    Subscribe {
        symbols: Vec<Symbol>,
        reply: oneshot::Sender<(ConsumerId, broadcast::Receiver<Arc<TickerBatch>>)>,
    },
    Add {
        consumer: ConsumerId,
        symbols: Vec<Symbol>,
    },
    Remove {
        consumer: ConsumerId,
        symbols: Vec<Symbol>,
    },
    Detach {
        consumer: ConsumerId,
    },
    Send {
        message: String,
    },
    Close {
        ack: oneshot::Sender<()>,
    },
}

/// Entry point for starting feed sessions.
#[derive(Debug, Clone, Copy)]
pub struct TickerFeed;

impl TickerFeed {
    /// Start a session: connect the realtime transport and arm the
    /// bootstrap poll.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(
        config: &FeedConfig,
        transport: Arc<dyn Transport>,
        source: Arc<dyn TickerSource>,
    ) -> FeedHandle {
        let session_id = uuid::Uuid::new_v4().to_string();
        let state = Arc::new(FeedState::new(session_id.clone()));
        let shutdown = CancellationToken::new();

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (connection_tx, connection_rx) = mpsc::unbounded_channel();
        let (poll_tx, poll_rx) = mpsc::unbounded_channel();
        let (publisher, _) = broadcast::channel(config.channels.broadcast_capacity.max(1));

        let session = FeedSession {
            connection: ConnectionManager::new(
                config.endpoints.stream_url.clone(),
                transport,
                ReconnectConfig::from_settings(&config.reconnect),
                config.channels.send_queue_capacity,
                connection_tx,
                shutdown.child_token(),
            ),
            polling: PollingFallback::new(
                source,
                config.polling.interval,
                poll_tx,
                shutdown.child_token(),
            ),
            registry: SubscriptionRegistry::new(),
            codec: TickerCodec::new(),
            publisher: Some(publisher),
            state: Arc::clone(&state),
            shutdown,
            defaults: config.default_tickers.clone(),
            stale_after_failures: config.polling.stale_after_failures.max(1),
            last_known: BTreeMap::new(),
            consecutive_failures: 0,
            last_poll_failed: false,
            realtime_failed: false,
            was_open: false,
            covered: false,
            next_consumer: 1,
            consumers: 0,
        };

        let span = tracing::info_span!("ticker_feed", session_id = %session_id);
        tokio::spawn(
            session
                .run(command_rx, connection_rx, poll_rx)
                .instrument(span),
        );

        FeedHandle {
            commands: command_tx,
            state,
        }
    }
}

/// Cloneable handle to a running session.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    commands: mpsc::UnboundedSender<FeedCommand>,
    state: Arc<FeedState>,
}

impl FeedHandle {
    /// Attach a consumer wanting `symbols`.
    ///
    /// An empty symbol list receives every published batch, even after
    /// later `add`/`remove` calls.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Closed`] if the session has been closed.
    pub async fn subscribe<I, S>(&self, symbols: I) -> Result<Consumer, FeedError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let symbols = canonical_list(symbols);
        let (reply, response) = oneshot::channel();
        self.commands
            .send(FeedCommand::Subscribe {
                symbols: symbols.clone(),
                reply,
            })
            .map_err(|_| FeedError::Closed)?;
        let (id, batches) = response.await.map_err(|_| FeedError::Closed)?;

        Ok(Consumer {
            id,
            wants_all: symbols.is_empty(),
            symbols: symbols.into_iter().collect(),
            batches,
            commands: self.commands.clone(),
            state: Arc::clone(&self.state),
        })
    }

    /// Send a raw text frame on the realtime link, queued while it is down.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Closed`] if the session has been closed.
    pub fn send_raw(&self, message: impl Into<String>) -> Result<(), FeedError> {
        self.commands
            .send(FeedCommand::Send {
                message: message.into(),
            })
            .map_err(|_| FeedError::Closed)
    }

    /// Tear the session down and wait for it to finish.
    ///
    /// Cancels the reconnect timer, disarms polling, closes the link, clears
    /// the registry and ends every consumer stream, in that order. Calling
    /// it again is a no-op.
    pub async fn close(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(FeedCommand::Close { ack }).is_ok() {
            let _ = done.await;
        }
    }

    /// Realtime connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.state.connection()
    }

    /// Whether the session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Point-in-time session status.
    #[must_use]
    pub fn status(&self) -> FeedStatus {
        self.state.snapshot()
    }

    /// Shared state, for the health server.
    #[must_use]
    pub fn shared_state(&self) -> Arc<FeedState> {
        Arc::clone(&self.state)
    }
}

/// One consumer's view of the feed.
///
/// Receives batches filtered to its own symbols. Dropping it releases its
/// symbols.
#[derive(Debug)]
pub struct Consumer {
    id: ConsumerId,
    wants_all: bool,
    symbols: HashSet<Symbol>,
    batches: broadcast::Receiver<Arc<TickerBatch>>,
    commands: mpsc::UnboundedSender<FeedCommand>,
    state: Arc<FeedState>,
}

impl Consumer {
    /// Consumer identifier.
    #[must_use]
    pub const fn id(&self) -> ConsumerId {
        self.id
    }

    /// Symbols this consumer wants, sorted.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.symbols.iter().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Want more symbols.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Closed`] if the session has been closed.
    pub fn add<I, S>(&mut self, symbols: I) -> Result<(), FeedError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let symbols = canonical_list(symbols);
        self.symbols.extend(symbols.iter().cloned());
        self.commands
            .send(FeedCommand::Add {
                consumer: self.id,
                symbols,
            })
            .map_err(|_| FeedError::Closed)
    }

    /// Stop wanting symbols.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Closed`] if the session has been closed.
    pub fn remove<I, S>(&mut self, symbols: I) -> Result<(), FeedError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let symbols = canonical_list(symbols);
        for symbol in &symbols {
            self.symbols.remove(symbol);
        }
        self.commands
            .send(FeedCommand::Remove {
                consumer: self.id,
                symbols,
            })
            .map_err(|_| FeedError::Closed)
    }

    /// Wait for the next batch for this consumer.
    ///
    /// Returns `None` once the session is closed.
    pub async fn recv(&mut self) -> Option<TickerBatch> {
        loop {
            if self.state.is_closed() {
                return None;
            }
            match self.batches.recv().await {
                Ok(batch) => {
                    if let Some(batch) = self.filter(&batch) {
                        return (!self.state.is_closed()).then_some(batch);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(consumer = self.id, skipped, "Consumer lagged, batches dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take an already-published batch without waiting.
    pub fn try_recv(&mut self) -> Option<TickerBatch> {
        loop {
            if self.state.is_closed() {
                return None;
            }
            match self.batches.try_recv() {
                Ok(batch) => {
                    if let Some(batch) = self.filter(&batch) {
                        return Some(batch);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(consumer = self.id, skipped, "Consumer lagged, batches dropped");
                }
                Err(_) => return None,
            }
        }
    }

    fn filter(&self, batch: &TickerBatch) -> Option<TickerBatch> {
        if self.wants_all {
            return Some(batch.clone());
        }
        let mine = batch.retain_symbols(|s| self.symbols.contains(s));
        if !mine.tickers.is_empty() {
            Some(mine)
        } else if batch.source == FeedSource::Default {
            Some(batch.clone())
        } else {
            None
        }
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        let _ = self.commands.send(FeedCommand::Detach { consumer: self.id });
    }
}

fn canonical_list<I, S>(symbols: I) -> Vec<Symbol>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut list: Vec<Symbol> = symbols
        .into_iter()
        .filter_map(|s| canonical_symbol(s.as_ref()))
        .collect();
    list.sort();
    list.dedup();
    list
}

// =============================================================================
// Session Task
// =============================================================================

struct FeedSession {
    connection: ConnectionManager,
    polling: PollingFallback,
    registry: SubscriptionRegistry,
    codec: TickerCodec,
    publisher: Option<broadcast::Sender<Arc<TickerBatch>>>,
    state: Arc<FeedState>,
    shutdown: CancellationToken,
    defaults: Vec<Ticker>,
    stale_after_failures: u32,
    last_known: BTreeMap<Symbol, Ticker>,
    consecutive_failures: u32,
    last_poll_failed: bool,
    /// A connect attempt failed or the link dropped, and it has not opened since.
    realtime_failed: bool,
    was_open: bool,
    /// Something was published since startup or the last realtime loss.
    covered: bool,
    next_consumer: ConsumerId,
    consumers: usize,
}

impl FeedSession {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<FeedCommand>,
        mut connection_signals: mpsc::UnboundedReceiver<ConnectionSignal>,
        mut poll_signals: mpsc::UnboundedReceiver<PollSignal>,
    ) {
        tracing::info!("Feed session started");
        self.connection.connect();
        self.state.set_connection(self.connection.state());
        self.polling.arm();
        self.state.set_polling(true);

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(FeedCommand::Close { ack }) => {
                        self.teardown();
                        let _ = ack.send(());
                        break;
                    }
                    Some(command) => self.on_command(command),
                    None => {
                        self.teardown();
                        break;
                    }
                },
                Some(signal) = connection_signals.recv() => {
                    for event in self.connection.handle(signal) {
                        self.on_connection_event(event);
                    }
                    self.state.set_connection(self.connection.state());
                }
                Some(signal) = poll_signals.recv() => {
                    if let Some(outcome) = self.polling.handle(signal) {
                        self.on_poll_outcome(outcome);
                    }
                }
            }
        }

        tracing::info!("Feed session closed");
    }

    fn on_command(&mut self, command: FeedCommand) {
        match command {
            FeedCommand::Subscribe { symbols, reply } => {
                let Some(receiver) = self.publisher.as_ref().map(broadcast::Sender::subscribe)
                else {
                    return;
                };
                let id = self.next_consumer;
                self.next_consumer += 1;
                if reply.send((id, receiver)).is_err() {
                    return;
                }
                self.consumers += 1;
                let changes = self.registry.add(id, &symbols);
                tracing::debug!(consumer = id, symbols = ?symbols, "Consumer attached");
                self.apply_changes(&changes);
            }
            FeedCommand::Add { consumer, symbols } => {
                let changes = self.registry.add(consumer, &symbols);
                self.apply_changes(&changes);
            }
            FeedCommand::Remove { consumer, symbols } => {
                let changes = self.registry.remove(consumer, &symbols);
                self.apply_changes(&changes);
            }
            FeedCommand::Detach { consumer } => {
                self.consumers = self.consumers.saturating_sub(1);
                let changes = self.registry.remove_consumer(consumer);
                tracing::debug!(consumer, "Consumer detached");
                self.apply_changes(&changes);
            }
            FeedCommand::Send { message } => {
                let outcome = self.connection.send(message);
                tracing::trace!(outcome = ?outcome, "Raw send");
            }
            FeedCommand::Close { .. } => {}
        }
    }

    /// Forward wanted-set transitions to an open link and refresh counters.
    ///
    /// While the link is down nothing is sent; the next open replays the
    /// full snapshot instead.
    fn apply_changes(&mut self, changes: &SubscriptionChanges) {
        if self.connection.is_open() {
            if !changes.unsubscribe.is_empty() {
                self.send_command(&ClientCommand::unsubscribe(
                    changes.unsubscribe.iter().cloned(),
                ));
            }
            if !changes.subscribe.is_empty() {
                self.send_command(&ClientCommand::subscribe(changes.subscribe.iter().cloned()));
            }
        }

        let stats = self.registry.stats();
        self.state.set_subscriptions(stats.symbol_count, self.consumers);
        metrics::set_wanted_symbols(stats.symbol_count);
        metrics::set_consumers(self.consumers);
    }

    fn send_command(&mut self, command: &ClientCommand) {
        match self.codec.encode(command) {
            Ok(text) => {
                self.connection.send(text);
            }
            Err(e) => tracing::error!(error = %e, "Failed to encode command"),
        }
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => {
                self.polling.disarm();
                self.state.set_polling(false);
                self.consecutive_failures = 0;
                self.last_poll_failed = false;
                self.realtime_failed = false;
                self.was_open = true;

                let snapshot = self.registry.snapshot();
                if !snapshot.is_empty() {
                    self.send_command(&ClientCommand::subscribe(snapshot));
                }
                let flushed = self.connection.flush_pending();
                tracing::info!(
                    symbols = self.registry.stats().symbol_count,
                    flushed,
                    "Feed live"
                );
            }
            ConnectionEvent::Message(text) => self.on_frame(&text),
            ConnectionEvent::Closed { reason } => {
                tracing::info!(reason = %reason, "Realtime down, polling fallback armed");
                self.realtime_failed = true;
                if std::mem::take(&mut self.was_open) {
                    self.covered = false;
                }
                self.polling.arm();
                self.state.set_polling(true);
                if !self.covered && self.last_poll_failed {
                    self.publish_defaults();
                }
            }
            ConnectionEvent::Error(error) => self.state.set_error(error),
            ConnectionEvent::Reconnecting { attempt, .. } => {
                self.state.set_reconnect_attempts(attempt);
            }
        }
    }

    fn on_frame(&mut self, text: &str) {
        match self.codec.decode(text) {
            Ok(DecodedFrame::Tickers(tickers)) => {
                metrics::record_frame(FrameKind::Tickers);
                self.state.record_frame(false);
                self.publish(tickers, FeedSource::Realtime);
            }
            Ok(DecodedFrame::Control(ack)) => {
                metrics::record_frame(FrameKind::Control);
                self.state.record_frame(false);
                tracing::debug!(kind = ?ack.kind, symbols = ?ack.symbols, "Control ack");
            }
            Err(e) => {
                metrics::record_frame(FrameKind::Malformed);
                self.state.record_frame(true);
                tracing::warn!(
                    error = %e,
                    frame = %text.chars().take(120).collect::<String>(),
                    "Dropping malformed frame"
                );
            }
        }
    }

    fn on_poll_outcome(&mut self, outcome: PollOutcome) {
        match outcome {
            PollOutcome::Tickers(tickers) => {
                self.consecutive_failures = 0;
                self.last_poll_failed = false;
                self.publish(tickers, FeedSource::Polling);
            }
            PollOutcome::Failed(error) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.last_poll_failed = true;
                self.state.set_error(error.to_string());

                if !self.covered {
                    // The realtime side gets its chance to fail first.
                    if self.realtime_failed {
                        self.publish_defaults();
                    }
                } else if self.consecutive_failures == self.stale_after_failures {
                    let cached = self.wanted(self.last_known.values().cloned().collect());
                    if cached.is_empty() {
                        self.publish_defaults();
                    } else {
                        tracing::warn!(
                            failures = self.consecutive_failures,
                            "Repeated poll failures, publishing last known prices"
                        );
                        self.publish(cached, FeedSource::LastKnown);
                    }
                }
            }
        }
    }

    fn publish_defaults(&mut self) {
        tracing::warn!(
            failures = self.consecutive_failures,
            "Realtime and polling both unavailable, publishing default set"
        );
        self.publish(self.defaults.clone(), FeedSource::Default);
    }

    /// Restrict tickers to the wanted-set when one exists.
    fn wanted(&self, tickers: Vec<Ticker>) -> Vec<Ticker> {
        if self.registry.is_empty() {
            return tickers;
        }
        tickers
            .into_iter()
            .filter(|t| self.registry.is_wanted(&t.symbol))
            .collect()
    }

    fn publish(&mut self, tickers: Vec<Ticker>, source: FeedSource) {
        let tickers = if source == FeedSource::Default {
            let wanted = self.wanted(tickers.clone());
            if wanted.is_empty() { tickers } else { wanted }
        } else {
            self.wanted(tickers)
        };
        if tickers.is_empty() {
            return;
        }

        if matches!(source, FeedSource::Realtime | FeedSource::Polling) {
            for ticker in &tickers {
                self.last_known.insert(ticker.symbol.clone(), ticker.clone());
            }
        }

        let count = tickers.len();
        let batch = TickerBatch::new(tickers, source);
        self.covered = true;
        self.state.record_batch(source, batch.received_at);
        metrics::record_batch_published(source, count);
        tracing::debug!(source = %source, count, stale = batch.stale, "Publishing tickers");

        if let Some(publisher) = &self.publisher {
            // No receivers is fine.
            let _ = publisher.send(Arc::new(batch));
        }
    }

    fn teardown(&mut self) {
        self.connection.cancel_reconnect();
        self.polling.disarm();
        self.connection.disconnect();
        self.registry.clear();
        self.consumers = 0;
        self.state.set_subscriptions(0, 0);
        self.state.set_closed();
        self.shutdown.cancel();
        self.publisher = None;
        metrics::set_wanted_symbols(0);
        metrics::set_consumers(0);
        tracing::info!("Feed session torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn ticker(symbol: &str) -> Ticker {
        Ticker::price_only(symbol, Decimal::ONE).unwrap()
    }

    fn consumer_with(symbols: &[&str]) -> (Consumer, broadcast::Sender<Arc<TickerBatch>>) {
        let (tx, rx) = broadcast::channel(8);
        let (commands, _) = mpsc::unbounded_channel();
        let consumer = Consumer {
            id: 1,
            wants_all: symbols.is_empty(),
            symbols: symbols.iter().map(|s| (*s).to_string()).collect(),
            batches: rx,
            commands,
            state: Arc::new(FeedState::new("test")),
        };
        (consumer, tx)
    }

    #[test]
    fn canonical_list_dedups_and_sorts() {
        assert_eq!(
            canonical_list(["eth", "BTC", " btc ", ""]),
            vec!["BTC".to_string(), "ETH".to_string()]
        );
    }

    #[test]
    fn consumer_filters_to_its_symbols() {
        let (mut consumer, tx) = consumer_with(&["BTC"]);
        tx.send(Arc::new(TickerBatch::new(
            vec![ticker("BTC"), ticker("ETH")],
            FeedSource::Realtime,
        )))
        .unwrap();

        let batch = consumer.try_recv().unwrap();
        assert_eq!(batch.tickers.len(), 1);
        assert_eq!(batch.tickers[0].symbol, "BTC");
    }

    #[test]
    fn consumer_skips_batches_without_its_symbols() {
        let (mut consumer, tx) = consumer_with(&["BTC"]);
        tx.send(Arc::new(TickerBatch::new(vec![ticker("ETH")], FeedSource::Polling)))
            .unwrap();
        assert!(consumer.try_recv().is_none());
    }

    #[test]
    fn default_batch_is_delivered_whole_when_nothing_matches() {
        let (mut consumer, tx) = consumer_with(&["DOGE"]);
        tx.send(Arc::new(TickerBatch::new(vec![ticker("BTC")], FeedSource::Default)))
            .unwrap();
        let batch = consumer.try_recv().unwrap();
        assert!(batch.stale);
        assert_eq!(batch.tickers.len(), 1);
    }

    #[test]
    fn consumer_without_symbols_gets_everything() {
        let (mut consumer, tx) = consumer_with(&[]);
        tx.send(Arc::new(TickerBatch::new(
            vec![ticker("BTC"), ticker("ETH")],
            FeedSource::Realtime,
        )))
        .unwrap();
        assert_eq!(consumer.try_recv().unwrap().tickers.len(), 2);
    }

    #[test]
    fn consumer_that_dropped_every_symbol_gets_only_defaults() {
        let (mut consumer, tx) = consumer_with(&["BTC"]);
        consumer.symbols.clear();
        tx.send(Arc::new(TickerBatch::new(vec![ticker("ETH")], FeedSource::Polling)))
            .unwrap();
        assert!(consumer.try_recv().is_none());

        tx.send(Arc::new(TickerBatch::new(vec![ticker("ETH")], FeedSource::Default)))
            .unwrap();
        assert_eq!(consumer.try_recv().unwrap().source, FeedSource::Default);
    }

    #[test]
    fn closed_state_ends_consumer_stream() {
        let (mut consumer, tx) = consumer_with(&[]);
        tx.send(Arc::new(TickerBatch::new(vec![ticker("BTC")], FeedSource::Realtime)))
            .unwrap();
        consumer.state.set_closed();
        assert!(consumer.try_recv().is_none());
    }
}
