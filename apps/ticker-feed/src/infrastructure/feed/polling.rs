//! Polling Fallback
//!
//! Fetches ticker snapshots on a fixed interval while the realtime link is
//! down. Arming fetches immediately (the first interval tick completes at
//! once); at most one fetch is in flight and ticks that land while one is
//! pending are skipped.
//!
//! Like the connection manager, the fallback never awaits. The interval
//! timer and fetches run as helper tasks that report [`PollSignal`]s tagged
//! with the arm generation, so results from a disarmed generation are
//! dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{FetchError, TickerSource};
use crate::domain::ticker::Ticker;
use crate::infrastructure::metrics;

/// Report from a polling helper task.
#[derive(Debug)]
pub enum PollSignal {
    /// The interval timer fired.
    Tick {
        /// Arm generation.
        generation: u64,
    },
    /// A fetch finished.
    Completed {
        /// Arm generation.
        generation: u64,
        /// Fetch result.
        result: Result<Vec<Ticker>, FetchError>,
        /// Fetch latency.
        elapsed: Duration,
    },
}

/// Result of a completed fetch for the current generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Fresh tickers.
    Tickers(Vec<Ticker>),
    /// The fetch failed; nothing new to publish.
    Failed(FetchError),
}

/// Interval-driven fallback fetcher.
pub struct PollingFallback {
    source: Arc<dyn TickerSource>,
    interval: Duration,
    signals: mpsc::UnboundedSender<PollSignal>,
    shutdown: CancellationToken,
    generation: u64,
    armed: bool,
    timer_task: Option<JoinHandle<()>>,
    fetch_task: Option<JoinHandle<()>>,
    skipped: u64,
}

impl std::fmt::Debug for PollingFallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingFallback")
            .field("interval", &self.interval)
            .field("armed", &self.armed)
            .field("generation", &self.generation)
            .field("fetching", &self.fetch_task.is_some())
            .field("skipped", &self.skipped)
            .finish_non_exhaustive()
    }
}

impl PollingFallback {
    /// Create a disarmed fallback.
    #[must_use]
    pub fn new(
        source: Arc<dyn TickerSource>,
        interval: Duration,
        signals: mpsc::UnboundedSender<PollSignal>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            source,
            interval,
            signals,
            shutdown,
            generation: 0,
            armed: false,
            timer_task: None,
            fetch_task: None,
            skipped: 0,
        }
    }

    /// Whether the interval timer is running.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    /// Whether a fetch is in flight.
    #[must_use]
    pub const fn is_fetching(&self) -> bool {
        self.fetch_task.is_some()
    }

    /// Ticks skipped because a fetch was still pending.
    #[must_use]
    pub const fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Start polling. The first fetch happens immediately.
    ///
    /// Returns `false` if already armed.
    pub fn arm(&mut self) -> bool {
        if self.armed {
            return false;
        }

        self.generation += 1;
        self.armed = true;

        let generation = self.generation;
        let period = self.interval;
        let signals = self.signals.clone();
        let shutdown = self.shutdown.clone();
        self.timer_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        if signals.send(PollSignal::Tick { generation }).is_err() {
                            return;
                        }
                    }
                }
            }
        }));

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Polling fallback armed"
        );
        true
    }

    /// Stop polling. Cancels the timer and aborts any in-flight fetch.
    ///
    /// Returns `false` if already disarmed.
    pub fn disarm(&mut self) -> bool {
        if !self.armed {
            return false;
        }

        self.armed = false;
        self.generation += 1;
        if let Some(task) = self.timer_task.take() {
            task.abort();
        }
        if let Some(task) = self.fetch_task.take() {
            task.abort();
        }

        tracing::info!("Polling fallback disarmed");
        true
    }

    /// Apply a helper-task report.
    ///
    /// Returns an outcome only for a fetch completed under the current
    /// generation.
    pub fn handle(&mut self, signal: PollSignal) -> Option<PollOutcome> {
        match signal {
            PollSignal::Tick { generation } => {
                if generation != self.generation || !self.armed {
                    return None;
                }
                if self.fetch_task.is_some() {
                    self.skipped += 1;
                    metrics::record_poll_skipped();
                    tracing::debug!(skipped = self.skipped, "Poll tick skipped, fetch in flight");
                    return None;
                }
                self.start_fetch();
                None
            }
            PollSignal::Completed {
                generation,
                result,
                elapsed,
            } => {
                if generation != self.generation || !self.armed {
                    tracing::trace!(generation, "Ignoring fetch from disarmed generation");
                    return None;
                }
                self.fetch_task = None;
                metrics::record_poll_fetch(result.is_ok(), elapsed);

                Some(match result {
                    Ok(tickers) => {
                        tracing::debug!(count = tickers.len(), "Poll fetch succeeded");
                        PollOutcome::Tickers(tickers)
                    }
                    Err(error) => {
                        tracing::warn!(error = %error, "Poll fetch failed");
                        PollOutcome::Failed(error)
                    }
                })
            }
        }
    }

    fn start_fetch(&mut self) {
        let generation = self.generation;
        let source = Arc::clone(&self.source);
        let signals = self.signals.clone();
        let shutdown = self.shutdown.clone();

        self.fetch_task = Some(tokio::spawn(async move {
            let started = Instant::now();
            let result = tokio::select! {
                () = shutdown.cancelled() => return,
                result = source.fetch() => result,
            };
            let _ = signals.send(PollSignal::Completed {
                generation,
                result,
                elapsed: started.elapsed(),
            });
        }));
    }
}

impl Drop for PollingFallback {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use mockall::mock;
    use rust_decimal::Decimal;

    use super::*;

    mock! {
        Source {}

        #[async_trait]
        impl TickerSource for Source {
            async fn fetch(&self) -> Result<Vec<Ticker>, FetchError>;
        }
    }

    fn fallback(
        source: Arc<dyn TickerSource>,
        interval_secs: u64,
    ) -> (PollingFallback, mpsc::UnboundedReceiver<PollSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            PollingFallback::new(
                source,
                Duration::from_secs(interval_secs),
                tx,
                CancellationToken::new(),
            ),
            rx,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn arm_fetches_immediately() {
        let mut source = MockSource::new();
        source
            .expect_fetch()
            .times(1)
            .returning(|| Ok(vec![Ticker::price_only("BTC", Decimal::ONE).unwrap()]));

        let (mut polling, mut rx) = fallback(Arc::new(source), 10);
        assert!(polling.arm());
        assert!(!polling.arm());

        let started = Instant::now();
        assert!(polling.handle(rx.recv().await.unwrap()).is_none());
        assert!(polling.is_fetching());

        let outcome = polling.handle(rx.recv().await.unwrap()).unwrap();
        assert!(matches!(outcome, PollOutcome::Tickers(ref t) if t.len() == 1));
        assert!(started.elapsed() < Duration::from_secs(1));
        polling.disarm();
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_reported_not_raised() {
        let mut source = MockSource::new();
        source
            .expect_fetch()
            .returning(|| Err(FetchError::Status { status: 503 }));

        let (mut polling, mut rx) = fallback(Arc::new(source), 10);
        polling.arm();
        let _ = polling.handle(rx.recv().await.unwrap());
        let outcome = polling.handle(rx.recv().await.unwrap()).unwrap();
        assert_eq!(
            outcome,
            PollOutcome::Failed(FetchError::Status { status: 503 })
        );
        assert!(polling.is_armed());
    }

    struct SlowSource {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl TickerSource for SlowSource {
        async fn fetch(&self) -> Result<Vec<Ticker>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_ticks_are_skipped() {
        let source = Arc::new(SlowSource {
            calls: AtomicUsize::new(0),
            delay: Duration::from_secs(25),
        });
        let (mut polling, mut rx) = fallback(source.clone(), 10);
        polling.arm();

        // Ticks at 0, 10, 20; the first fetch completes at 25.
        let mut outcomes = 0;
        while outcomes == 0 {
            if polling.handle(rx.recv().await.unwrap()).is_some() {
                outcomes += 1;
            }
        }

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(polling.skipped(), 2);
        assert!(!polling.is_fetching());
    }

    #[tokio::test(start_paused = true)]
    async fn disarm_drops_in_flight_result() {
        let source = Arc::new(SlowSource {
            calls: AtomicUsize::new(0),
            delay: Duration::from_secs(3),
        });
        let (mut polling, mut rx) = fallback(source.clone(), 10);
        polling.arm();
        let tick = rx.recv().await.unwrap();
        let stale_generation = polling.generation;
        assert!(polling.handle(tick).is_none());

        assert!(polling.disarm());
        assert!(!polling.disarm());
        assert!(!polling.is_fetching());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());

        let late = PollSignal::Completed {
            generation: stale_generation,
            result: Ok(Vec::new()),
            elapsed: Duration::ZERO,
        };
        assert!(polling.handle(late).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_starts_a_fresh_generation() {
        let mut source = MockSource::new();
        source.expect_fetch().times(2).returning(|| Ok(Vec::new()));

        let (mut polling, mut rx) = fallback(Arc::new(source), 10);
        polling.arm();
        let _ = polling.handle(rx.recv().await.unwrap());
        let _ = polling.handle(rx.recv().await.unwrap());
        polling.disarm();

        polling.arm();
        let _ = polling.handle(rx.recv().await.unwrap());
        let outcome = polling.handle(rx.recv().await.unwrap());
        assert_eq!(outcome, Some(PollOutcome::Tickers(Vec::new())));
        polling.disarm();
    }
}
