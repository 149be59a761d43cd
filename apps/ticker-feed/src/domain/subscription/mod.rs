//! Subscription Registry
//!
//! Tracks which symbols consumers currently want streamed.
//!
//! # Design
//!
//! The registry tracks:
//! - Which symbols each consumer is subscribed to
//! - A reference count per symbol across consumers
//!
//! Only 0→1 and 1→0 transitions change the upstream wanted-set, so two
//! consumers sharing a symbol never cause a premature unsubscribe. The
//! registry is owned by a single feed session and mutated only through
//! [`SubscriptionRegistry::add`] / [`SubscriptionRegistry::remove`].

use std::collections::{BTreeSet, HashMap, HashSet};

use super::ticker::{Symbol, canonical_symbol};

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a consumer of the feed.
pub type ConsumerId = u64;

/// Changes to the upstream wanted-set caused by one registry call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Symbols that went from 0 to 1 consumers.
    pub subscribe: BTreeSet<Symbol>,
    /// Symbols that went from 1 to 0 consumers.
    pub unsubscribe: BTreeSet<Symbol>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }

    /// Create changes with only subscribes.
    #[must_use]
    pub fn subscribe_only(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            subscribe: symbols.into_iter().collect(),
            unsubscribe: BTreeSet::new(),
        }
    }

    /// Create changes with only unsubscribes.
    #[must_use]
    pub fn unsubscribe_only(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            subscribe: BTreeSet::new(),
            unsubscribe: symbols.into_iter().collect(),
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Number of wanted symbols.
    pub symbol_count: usize,
    /// Number of consumers holding at least one symbol.
    pub consumer_count: usize,
}

// =============================================================================
// Registry
// =============================================================================

/// Ref-counted wanted-set.
///
/// # Example
///
/// ```rust
/// use ticker_feed::domain::subscription::SubscriptionRegistry;
///
/// let mut registry = SubscriptionRegistry::new();
///
/// // Consumer 1 wants BTC - upstream subscribe needed
/// let changes = registry.add(1, &["btc".to_string()]);
/// assert!(changes.subscribe.contains("BTC"));
///
/// // Consumer 2 also wants BTC - no upstream change
/// assert!(registry.add(2, &["BTC".to_string()]).is_empty());
///
/// // Consumer 1 leaves - still wanted by consumer 2
/// assert!(registry.remove(1, &["BTC".to_string()]).is_empty());
///
/// // Consumer 2 leaves - upstream unsubscribe
/// let changes = registry.remove(2, &["BTC".to_string()]);
/// assert!(changes.unsubscribe.contains("BTC"));
/// assert!(registry.snapshot().is_empty());
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    /// Map from consumer ID to their subscribed symbols.
    consumer_symbols: HashMap<ConsumerId, HashSet<Symbol>>,
    /// Map from symbol to reference count.
    symbol_refcount: HashMap<Symbol, usize>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add symbols for a consumer.
    ///
    /// Symbols are canonicalised; empty ones are ignored. Returns the symbols
    /// whose refcount went 0→1.
    pub fn add(&mut self, consumer: ConsumerId, symbols: &[Symbol]) -> SubscriptionChanges {
        let consumer_set = self.consumer_symbols.entry(consumer).or_default();
        let mut new_upstream = BTreeSet::new();

        for symbol in symbols.iter().filter_map(|s| canonical_symbol(s)) {
            // Skip if consumer already subscribed
            if !consumer_set.insert(symbol.clone()) {
                continue;
            }

            let refcount = self.symbol_refcount.entry(symbol.clone()).or_insert(0);
            *refcount += 1;

            if *refcount == 1 {
                new_upstream.insert(symbol);
            }
        }

        if consumer_set.is_empty() {
            self.consumer_symbols.remove(&consumer);
        }

        SubscriptionChanges {
            subscribe: new_upstream,
            unsubscribe: BTreeSet::new(),
        }
    }

    /// Remove symbols for a consumer.
    ///
    /// Returns the symbols whose refcount went 1→0. Symbols the consumer
    /// never held are ignored.
    pub fn remove(&mut self, consumer: ConsumerId, symbols: &[Symbol]) -> SubscriptionChanges {
        let Some(consumer_set) = self.consumer_symbols.get_mut(&consumer) else {
            return SubscriptionChanges::default();
        };

        let mut released = Vec::new();
        for symbol in symbols.iter().filter_map(|s| canonical_symbol(s)) {
            if consumer_set.remove(&symbol) {
                released.push(symbol);
            }
        }

        if consumer_set.is_empty() {
            self.consumer_symbols.remove(&consumer);
        }

        SubscriptionChanges::unsubscribe_only(self.release(released))
    }

    /// Remove every symbol held by a consumer.
    pub fn remove_consumer(&mut self, consumer: ConsumerId) -> SubscriptionChanges {
        let Some(consumer_set) = self.consumer_symbols.remove(&consumer) else {
            return SubscriptionChanges::default();
        };

        SubscriptionChanges::unsubscribe_only(self.release(consumer_set))
    }

    /// The full wanted-set, sorted.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Symbol> {
        let mut symbols: Vec<_> = self.symbol_refcount.keys().cloned().collect();
        symbols.sort_unstable();
        symbols
    }

    /// Whether any consumer wants `symbol`.
    #[must_use]
    pub fn is_wanted(&self, symbol: &str) -> bool {
        self.symbol_refcount.contains_key(symbol)
    }

    /// Whether the wanted-set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbol_refcount.is_empty()
    }

    /// Symbols held by one consumer, sorted.
    #[must_use]
    pub fn consumer_symbols(&self, consumer: ConsumerId) -> Vec<Symbol> {
        let mut symbols: Vec<_> = self
            .consumer_symbols
            .get(&consumer)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        symbols.sort_unstable();
        symbols
    }

    /// Drop every subscription. Used at session teardown.
    pub fn clear(&mut self) {
        self.consumer_symbols.clear();
        self.symbol_refcount.clear();
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            symbol_count: self.symbol_refcount.len(),
            consumer_count: self.consumer_symbols.len(),
        }
    }

    fn release(&mut self, symbols: impl IntoIterator<Item = Symbol>) -> Vec<Symbol> {
        let mut remove_upstream = Vec::new();

        for symbol in symbols {
            if let Some(refcount) = self.symbol_refcount.get_mut(&symbol) {
                *refcount = refcount.saturating_sub(1);

                if *refcount == 0 {
                    self.symbol_refcount.remove(&symbol);
                    remove_upstream.push(symbol);
                }
            }
        }

        remove_upstream
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn syms(list: &[&str]) -> Vec<Symbol> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn add_new_symbol_subscribes_upstream() {
        let mut registry = SubscriptionRegistry::new();

        let changes = registry.add(1, &syms(&["BTC"]));

        assert!(changes.subscribe.contains("BTC"));
        assert!(changes.unsubscribe.is_empty());
    }

    #[test]
    fn add_shared_symbol_no_upstream_change() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(1, &syms(&["BTC"]));

        let changes = registry.add(2, &syms(&["BTC"]));

        assert!(changes.is_empty());
    }

    #[test]
    fn add_duplicate_for_same_consumer_counts_once() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(1, &syms(&["BTC"]));
        registry.add(1, &syms(&["btc"]));

        let changes = registry.remove(1, &syms(&["BTC"]));

        assert!(changes.unsubscribe.contains("BTC"));
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_with_remaining_consumer_keeps_symbol() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(1, &syms(&["BTC"]));
        registry.add(2, &syms(&["BTC"]));

        let changes = registry.remove(1, &syms(&["BTC"]));

        assert!(changes.is_empty());
        assert_eq!(registry.snapshot(), syms(&["BTC"]));
    }

    #[test]
    fn remove_unknown_consumer_is_noop() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(1, &syms(&["BTC"]));

        assert!(registry.remove(2, &syms(&["BTC"])).is_empty());
        assert!(registry.is_wanted("BTC"));
    }

    #[test]
    fn remove_consumer_releases_all_symbols() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(1, &syms(&["BTC", "ETH"]));
        registry.add(2, &syms(&["ETH"]));

        let changes = registry.remove_consumer(1);

        assert_eq!(changes.unsubscribe, BTreeSet::from(["BTC".to_string()]));
        assert_eq!(registry.snapshot(), syms(&["ETH"]));
        assert_eq!(registry.stats().consumer_count, 1);
    }

    #[test]
    fn empty_symbols_are_ignored() {
        let mut registry = SubscriptionRegistry::new();

        let changes = registry.add(1, &syms(&["", "  "]));

        assert!(changes.is_empty());
        assert_eq!(registry.stats(), SubscriptionStats::default());
    }

    #[test]
    fn snapshot_is_sorted_and_canonical() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(1, &syms(&["sol", "btc", "Eth"]));

        assert_eq!(registry.snapshot(), syms(&["BTC", "ETH", "SOL"]));
        assert_eq!(registry.consumer_symbols(1), syms(&["BTC", "ETH", "SOL"]));
    }

    #[test]
    fn clear_empties_everything() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(1, &syms(&["BTC"]));
        registry.add(2, &syms(&["ETH"]));

        registry.clear();

        assert!(registry.is_empty());
        assert!(registry.consumer_symbols(1).is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(ConsumerId, Vec<Symbol>),
        Remove(ConsumerId, Vec<Symbol>),
        Detach(ConsumerId),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let symbol = prop::sample::select(vec!["BTC", "ETH", "SOL", "XRP"]).prop_map(String::from);
        let symbols = prop::collection::vec(symbol, 0..4);
        let consumer = 0u64..4;
        prop_oneof![
            (consumer.clone(), symbols.clone()).prop_map(|(c, s)| Op::Add(c, s)),
            (consumer.clone(), symbols).prop_map(|(c, s)| Op::Remove(c, s)),
            consumer.prop_map(Op::Detach),
        ]
    }

    proptest! {
        /// Whatever sequence of calls happens, the snapshot equals the union of
        /// what each consumer still holds, and the emitted changes replay to it.
        #[test]
        fn snapshot_matches_net_consumer_sets(ops in prop::collection::vec(op_strategy(), 0..40)) {
            let mut registry = SubscriptionRegistry::new();
            let mut model: HashMap<ConsumerId, BTreeSet<Symbol>> = HashMap::new();
            let mut upstream: BTreeSet<Symbol> = BTreeSet::new();

            for op in ops {
                let changes = match op {
                    Op::Add(c, s) => {
                        model.entry(c).or_default().extend(s.iter().cloned());
                        registry.add(c, &s)
                    }
                    Op::Remove(c, s) => {
                        if let Some(held) = model.get_mut(&c) {
                            for sym in &s {
                                held.remove(sym);
                            }
                        }
                        registry.remove(c, &s)
                    }
                    Op::Detach(c) => {
                        model.remove(&c);
                        registry.remove_consumer(c)
                    }
                };
                for sym in changes.subscribe {
                    prop_assert!(upstream.insert(sym));
                }
                for sym in changes.unsubscribe {
                    prop_assert!(upstream.remove(&sym));
                }
            }

            let expected: BTreeSet<Symbol> = model.values().flatten().cloned().collect();
            let snapshot: BTreeSet<Symbol> = registry.snapshot().into_iter().collect();
            prop_assert_eq!(&snapshot, &expected);
            prop_assert_eq!(&upstream, &expected);
        }
    }
}
