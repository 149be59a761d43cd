//! Ticker Types
//!
//! Canonical market data records handed to consumers. These types are
//! transport-agnostic: realtime frames, polled snapshots and the static
//! default set all end up as [`Ticker`] values wrapped in a [`TickerBatch`].

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// A symbol string in canonical form (trimmed, uppercase).
pub type Symbol = String;

/// Canonicalise a raw symbol.
///
/// Returns `None` when the symbol is empty after trimming.
#[must_use]
pub fn canonical_symbol(raw: &str) -> Option<Symbol> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_uppercase())
    }
}

// =============================================================================
// Ticker
// =============================================================================

/// Latest price/volume/change snapshot for one symbol.
///
/// A newer ticker supersedes any prior value for the same symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ticker {
    /// Canonical symbol.
    pub symbol: Symbol,
    /// Last traded price (never negative).
    pub price: Decimal,
    /// 24h change in percent.
    pub change_24h: Decimal,
    /// 24h traded volume.
    pub volume_24h: Decimal,
    /// 24h high.
    pub high_24h: Decimal,
    /// 24h low.
    pub low_24h: Decimal,
}

impl Ticker {
    /// Build a ticker, canonicalising the symbol and checking invariants.
    ///
    /// # Errors
    ///
    /// Returns [`TickerError`] if the symbol is empty or the price negative.
    pub fn new(
        symbol: &str,
        price: Decimal,
        change_24h: Decimal,
        volume_24h: Decimal,
        high_24h: Decimal,
        low_24h: Decimal,
    ) -> Result<Self, TickerError> {
        let symbol = canonical_symbol(symbol).ok_or(TickerError::EmptySymbol)?;
        if price.is_sign_negative() && !price.is_zero() {
            return Err(TickerError::NegativePrice { symbol, price });
        }

        Ok(Self {
            symbol,
            price,
            change_24h,
            volume_24h,
            high_24h,
            low_24h,
        })
    }

    /// A price-only update; the 24h statistics are zero.
    ///
    /// # Errors
    ///
    /// Same as [`Ticker::new`].
    pub fn price_only(symbol: &str, price: Decimal) -> Result<Self, TickerError> {
        Self::new(
            symbol,
            price,
            Decimal::ZERO,
            Decimal::ZERO,
            Decimal::ZERO,
            Decimal::ZERO,
        )
    }
}

/// Ticker invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TickerError {
    /// Symbol is empty after trimming.
    #[error("ticker symbol is empty")]
    EmptySymbol,
    /// Price is below zero.
    #[error("negative price {price} for {symbol}")]
    NegativePrice {
        /// Offending symbol.
        symbol: Symbol,
        /// Offending price.
        price: Decimal,
    },
}

// =============================================================================
// Batches
// =============================================================================

/// Where a batch of tickers came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedSource {
    /// Realtime socket frame.
    Realtime,
    /// Scheduled or bootstrap poll of the REST endpoint.
    Polling,
    /// Replay of the last-known-good cache after repeated poll failures.
    LastKnown,
    /// Configured static default set.
    Default,
}

impl FeedSource {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Realtime => "realtime",
            Self::Polling => "polling",
            Self::LastKnown => "last_known",
            Self::Default => "default",
        }
    }

    /// Whether data from this source is stale by definition.
    #[must_use]
    pub const fn is_stale(self) -> bool {
        matches!(self, Self::LastKnown | Self::Default)
    }
}

impl fmt::Display for FeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `onTickers` delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerBatch {
    /// Tickers in this delivery.
    pub tickers: Vec<Ticker>,
    /// Transport the tickers came from.
    pub source: FeedSource,
    /// Stale or fallback data, not live prices.
    pub stale: bool,
    /// When the session published the batch.
    pub received_at: DateTime<Utc>,
}

impl TickerBatch {
    /// Create a batch stamped with the current time.
    #[must_use]
    pub fn new(tickers: Vec<Ticker>, source: FeedSource) -> Self {
        Self {
            tickers,
            source,
            stale: source.is_stale(),
            received_at: Utc::now(),
        }
    }

    /// Whether the batch came from the realtime transport.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.source == FeedSource::Realtime
    }

    /// Find the ticker for a symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&Ticker> {
        self.tickers.iter().find(|t| t.symbol == symbol)
    }

    /// Copy of this batch keeping only symbols accepted by `wanted`.
    #[must_use]
    pub fn retain_symbols<F>(&self, wanted: F) -> Self
    where
        F: Fn(&str) -> bool,
    {
        Self {
            tickers: self
                .tickers
                .iter()
                .filter(|t| wanted(&t.symbol))
                .cloned()
                .collect(),
            source: self.source,
            stale: self.stale,
            received_at: self.received_at,
        }
    }
}

// =============================================================================
// Default Set
// =============================================================================

/// Built-in default tickers shown when no transport can deliver prices.
#[must_use]
pub fn builtin_default_tickers() -> Vec<Ticker> {
    // (symbol, price, change %, volume, high, low), prices in cents
    let rows: [(&str, i64, i64, i64, i64, i64); 5] = [
        ("BTCUSDT", 6_750_000, 250, 2_800_000_000_000, 6_800_000, 6_600_000),
        ("ETHUSDT", 345_000, -120, 1_500_000_000_000, 350_000, 340_000),
        ("BNBUSDT", 58_000, 80, 120_000_000_000, 59_000, 57_000),
        ("SOLUSDT", 14_500, 580, 250_000_000_000, 15_000, 13_800),
        ("XRPUSDT", 52, -50, 150_000_000_000, 53, 51),
    ];

    rows.iter()
        .map(|&(symbol, price, change, volume, high, low)| Ticker {
            symbol: symbol.to_string(),
            price: Decimal::new(price, 2),
            change_24h: Decimal::new(change, 2),
            volume_24h: Decimal::new(volume, 2),
            high_24h: Decimal::new(high, 2),
            low_24h: Decimal::new(low, 2),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_symbol_uppercases_and_trims() {
        assert_eq!(canonical_symbol(" btc "), Some("BTC".to_string()));
        assert_eq!(canonical_symbol("EthUsdt"), Some("ETHUSDT".to_string()));
        assert_eq!(canonical_symbol("   "), None);
    }

    #[test]
    fn ticker_rejects_negative_price() {
        let err = Ticker::price_only("BTC", Decimal::new(-1, 0)).unwrap_err();
        assert!(matches!(err, TickerError::NegativePrice { .. }));
    }

    #[test]
    fn ticker_accepts_zero_price() {
        let ticker = Ticker::price_only("dust", Decimal::ZERO).unwrap();
        assert_eq!(ticker.symbol, "DUST");
    }

    #[test]
    fn stale_flag_follows_source() {
        assert!(!TickerBatch::new(vec![], FeedSource::Realtime).stale);
        assert!(!TickerBatch::new(vec![], FeedSource::Polling).stale);
        assert!(TickerBatch::new(vec![], FeedSource::LastKnown).stale);
        assert!(TickerBatch::new(vec![], FeedSource::Default).stale);
    }

    #[test]
    fn builtin_defaults_are_valid() {
        let defaults = builtin_default_tickers();
        assert_eq!(defaults.len(), 5);
        assert_eq!(defaults[0].symbol, "BTCUSDT");
        assert_eq!(defaults[0].price, Decimal::new(67_500, 0));
        assert_eq!(defaults[4].price, Decimal::new(52, 2));
        assert!(defaults.iter().all(|t| !t.price.is_sign_negative()));
    }

    #[test]
    fn retain_symbols_filters_batch() {
        let batch = TickerBatch::new(builtin_default_tickers(), FeedSource::Default);
        let filtered = batch.retain_symbols(|s| s == "ETHUSDT");
        assert_eq!(filtered.tickers.len(), 1);
        assert!(filtered.get("ETHUSDT").is_some());
        assert!(filtered.stale);
    }
}
