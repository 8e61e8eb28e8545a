//! Order-book maintainer (§4.2 algorithmic contract, §9 "shared mutable
//! state"). One [`OrderBookStore`] per connector; lock-free reads via
//! `ArcSwap`, per-symbol sharding via `DashMap` — the same shape as the
//! `OrderBookManager` / `SharedOrderBook` pair recovered from the
//! order-book corpus, adapted from `Decimal` price keys to `f64` via
//! `OrderedFloat` since the rest of this engine is double-precision (§9
//! "Arithmetic").

use dashmap::DashMap;
use ordered_float::OrderedFloat;
use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::model::{OrderBook, PriceLevel, VenueId};

#[derive(Clone, Debug, Default)]
struct BookState {
    bids: BTreeMap<OrderedFloat<f64>, f64>,
    asks: BTreeMap<OrderedFloat<f64>, f64>,
    sequence_id: Option<u64>,
    timestamp: i64,
    initialized: bool,
}

impl BookState {
    fn to_model(&self, venue: VenueId, venue_symbol: &str, canonical: &str, is_snapshot: bool) -> OrderBook {
        OrderBook {
            venue,
            venue_symbol: venue_symbol.to_string(),
            canonical: canonical.to_string(),
            bids: self
                .bids
                .iter()
                .rev()
                .map(|(p, q)| PriceLevel { price: p.0, quantity: *q })
                .collect(),
            asks: self
                .asks
                .iter()
                .map(|(p, q)| PriceLevel { price: p.0, quantity: *q })
                .collect(),
            sequence_id: self.sequence_id,
            timestamp: self.timestamp,
            is_snapshot,
        }
    }
}

/// Outcome of applying an incremental delta, used by the caller to decide
/// whether a REST snapshot re-fetch is required (§4.2: "if a venue
/// provides sequence ids, gaps force a REST snapshot re-fetch").
#[derive(Debug, PartialEq, Eq)]
pub enum DeltaOutcome {
    Applied,
    SequenceGap,
    NotInitialized,
}

/// Per-venue store of order books, one entry per venue-native symbol.
#[derive(Clone)]
pub struct OrderBookStore {
    venue: VenueId,
    books: Arc<DashMap<String, Arc<ArcSwap<BookState>>>>,
}

impl OrderBookStore {
    pub fn new(venue: VenueId) -> Self {
        Self { venue, books: Arc::new(DashMap::new()) }
    }

    fn slot(&self, symbol: &str) -> Arc<ArcSwap<BookState>> {
        if let Some(entry) = self.books.get(symbol) {
            return entry.clone();
        }
        self.books
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(ArcSwap::from_pointee(BookState::default())))
            .clone()
    }

    /// Replaces the book entirely (§3 invariant 1: all levels `quantity >
    /// 0`; zero-quantity rows are simply not inserted).
    pub fn apply_snapshot(
        &self,
        symbol: &str,
        bids: &[(f64, f64)],
        asks: &[(f64, f64)],
        sequence_id: Option<u64>,
        timestamp: i64,
    ) {
        let mut state = BookState { sequence_id, timestamp, initialized: true, ..Default::default() };
        for &(price, qty) in bids {
            if qty > 0.0 {
                state.bids.insert(OrderedFloat(price), qty);
            }
        }
        for &(price, qty) in asks {
            if qty > 0.0 {
                state.asks.insert(OrderedFloat(price), qty);
            }
        }
        self.slot(symbol).store(Arc::new(state));
    }

    /// Applies an incremental delta. Positive quantity sets/updates a
    /// level; zero quantity deletes it (a delete of a non-existent level
    /// is a no-op, per §8's idempotence property).
    ///
    /// When `expected_sequence` is `Some`, a gap between it and
    /// `sequence_id` returns [`DeltaOutcome::SequenceGap`] without
    /// mutating state, signalling the caller to re-fetch a REST snapshot.
    pub fn apply_delta(
        &self,
        symbol: &str,
        bids: &[(f64, f64)],
        asks: &[(f64, f64)],
        sequence_id: Option<u64>,
        timestamp: i64,
    ) -> DeltaOutcome {
        let slot = self.slot(symbol);
        let current = slot.load();

        if !current.initialized {
            return DeltaOutcome::NotInitialized;
        }

        if let (Some(expected), Some(incoming)) = (current.sequence_id, sequence_id) {
            if incoming <= expected {
                // Stale/duplicate delta; ignore without treating as a gap.
                return DeltaOutcome::Applied;
            }
            if incoming > expected + 1 {
                return DeltaOutcome::SequenceGap;
            }
        }

        let mut next = (**current).clone();
        for &(price, qty) in bids {
            apply_level(&mut next.bids, price, qty);
        }
        for &(price, qty) in asks {
            apply_level(&mut next.asks, price, qty);
        }
        next.sequence_id = sequence_id.or(next.sequence_id);
        next.timestamp = timestamp;

        slot.store(Arc::new(next));
        DeltaOutcome::Applied
    }

    /// Current normalized view, or `None` if the book has never been
    /// initialized by a snapshot.
    pub fn get(&self, symbol: &str, canonical: &str) -> Option<OrderBook> {
        let entry = self.books.get(symbol)?;
        let state = entry.load();
        if !state.initialized {
            return None;
        }
        Some(state.to_model(self.venue, symbol, canonical, false))
    }

    pub fn symbols(&self) -> Vec<String> {
        self.books
            .iter()
            .filter(|e| e.value().load().initialized)
            .map(|e| e.key().clone())
            .collect()
    }
}

fn apply_level(side: &mut BTreeMap<OrderedFloat<f64>, f64>, price: f64, qty: f64) {
    let key = OrderedFloat(price);
    if qty <= 0.0 {
        side.remove(&key);
    } else {
        side.insert(key, qty);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_then_no_deltas_is_stable() {
        let store = OrderBookStore::new(VenueId::Binance);
        store.apply_snapshot("BTCUSDT", &[(100.0, 1.0), (99.0, 2.0)], &[(101.0, 1.0)], Some(5), 1000);
        let book = store.get("BTCUSDT", "BTC-USDT-PERP").unwrap();
        assert_eq!(book.bids[0].price, 100.0);
        assert_eq!(book.bids[1].price, 99.0);
        assert_eq!(book.asks[0].price, 101.0);
        assert_eq!(book.best_bid().unwrap().price, 100.0);
        assert_eq!(book.best_ask().unwrap().price, 101.0);
    }

    #[test]
    fn delete_of_nonexistent_level_is_noop() {
        let store = OrderBookStore::new(VenueId::Binance);
        store.apply_snapshot("BTCUSDT", &[(100.0, 1.0)], &[(101.0, 1.0)], Some(5), 1000);
        let outcome = store.apply_delta("BTCUSDT", &[(50.0, 0.0)], &[], Some(6), 1001);
        assert_eq!(outcome, DeltaOutcome::Applied);
        let book = store.get("BTCUSDT", "BTC-USDT-PERP").unwrap();
        assert_eq!(book.bids.len(), 1);
    }

    #[test]
    fn delta_positive_quantity_updates_level() {
        let store = OrderBookStore::new(VenueId::Binance);
        store.apply_snapshot("BTCUSDT", &[(100.0, 1.0)], &[(101.0, 1.0)], Some(1), 1000);
        store.apply_delta("BTCUSDT", &[(100.0, 5.0)], &[], Some(2), 1001);
        let book = store.get("BTCUSDT", "BTC-USDT-PERP").unwrap();
        assert_eq!(book.bids[0].quantity, 5.0);
    }

    #[test]
    fn zero_quantity_delta_deletes_level() {
        let store = OrderBookStore::new(VenueId::Binance);
        store.apply_snapshot("BTCUSDT", &[(100.0, 1.0), (99.0, 1.0)], &[], Some(1), 1000);
        store.apply_delta("BTCUSDT", &[(100.0, 0.0)], &[], Some(2), 1001);
        let book = store.get("BTCUSDT", "BTC-USDT-PERP").unwrap();
        assert_eq!(book.bids.len(), 1);
        assert_eq!(book.bids[0].price, 99.0);
    }

    #[test]
    fn sequence_gap_is_detected() {
        let store = OrderBookStore::new(VenueId::Binance);
        store.apply_snapshot("BTCUSDT", &[(100.0, 1.0)], &[(101.0, 1.0)], Some(10), 1000);
        let outcome = store.apply_delta("BTCUSDT", &[(100.0, 2.0)], &[], Some(15), 1001);
        assert_eq!(outcome, DeltaOutcome::SequenceGap);
        // State unchanged.
        let book = store.get("BTCUSDT", "BTC-USDT-PERP").unwrap();
        assert_eq!(book.bids[0].quantity, 1.0);
    }

    #[test]
    fn spread_bps_computed_exactly() {
        let store = OrderBookStore::new(VenueId::Binance);
        store.apply_snapshot("BTCUSDT", &[(42000.0, 1.0)], &[(42010.0, 1.0)], None, 1000);
        let book = store.get("BTCUSDT", "BTC-USDT-PERP").unwrap();
        let expected = (42010.0_f64 - 42000.0) / 42000.0 * 10_000.0;
        assert!((book.spread_bps().unwrap() - expected).abs() < 1e-9);
    }
}
