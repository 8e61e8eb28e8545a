//! Spread Discovery Engine (§4.4). Pairs venues quoting the same
//! canonical, computes fee-net spreads, ranks them into an authoritative
//! inventory, and derives the streaming subscription set those spreads
//! imply. Also applies live corrections from streaming order-book and
//! funding events without waiting for the next REST cycle.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::model::{Canonical, FundingRate, OrderBook, PreliminarySpread, SpreadInventory, VenueId};
use crate::rest_loader::TokenIndex;
use crate::util::now_ms;

/// Depth (in book levels) used to compute `min_depth_usd` for ranking
/// (§4.4: "min_depth_usd (as known from live books)").
const DEPTH_LEVELS_FOR_RANKING: usize = 10;

pub struct SpreadEngine {
    min_spread_bps: f64,
    inventory: ArcSwap<SpreadInventory>,
}

impl SpreadEngine {
    pub fn new(min_spread_bps: f64) -> Self {
        Self {
            min_spread_bps,
            inventory: ArcSwap::from_pointee(SpreadInventory { timestamp: 0, count: 0, spreads: Vec::new() }),
        }
    }

    pub fn inventory(&self) -> Arc<SpreadInventory> {
        self.inventory.load_full()
    }

    /// Pairing algorithm (§4.4): every ordered `(long, short)` venue pair
    /// sharing a canonical with a usable long-ask/short-bid. Replaces the
    /// inventory atomically and returns it.
    pub fn discover(&self, token_index: &TokenIndex) -> Arc<SpreadInventory> {
        let now = now_ms();
        let mut spreads = Vec::new();

        for token in token_index.tokens.values() {
            if token.exchanges.len() < 2 {
                continue;
            }

            for (&long_venue, long_view) in &token.exchanges {
                for (&short_venue, short_view) in &token.exchanges {
                    if long_venue == short_venue {
                        continue;
                    }

                    let long_price = long_view.ticker.ask.or(long_view.ticker.last);
                    let short_price = short_view.ticker.bid.or(short_view.ticker.last);
                    let (Some(long_price), Some(short_price)) = (long_price, short_price) else { continue };
                    if long_price <= 0.0 || short_price <= 0.0 {
                        continue;
                    }

                    let spread_percent = (short_price - long_price) / long_price * 100.0;
                    let spread_bps = spread_percent * 100.0;
                    if spread_bps < self.min_spread_bps {
                        continue;
                    }

                    let long_funding = long_view.funding.as_ref().map(|f| f.rate).unwrap_or(0.0);
                    let short_funding = short_view.funding.as_ref().map(|f| f.rate).unwrap_or(0.0);
                    let net_funding = short_funding - long_funding;

                    let estimated_pnl_bps =
                        spread_bps - (long_view.instrument.taker_fee + short_view.instrument.taker_fee) * 10_000.0;

                    let long_deposit_enabled = long_view.asset.as_ref().map(|a| a.deposit_enabled).unwrap_or(true);
                    let short_withdraw_enabled = short_view.asset.as_ref().map(|a| a.withdraw_enabled).unwrap_or(true);

                    let spread = PreliminarySpread {
                        id: spread_id(&token.canonical, long_venue, short_venue),
                        canonical: token.canonical.clone(),
                        long_exchange: long_venue,
                        short_exchange: short_venue,
                        long_symbol: long_view.instrument.venue_symbol.clone(),
                        short_symbol: short_view.instrument.venue_symbol.clone(),
                        long_price,
                        short_price,
                        spread_percent,
                        spread_bps,
                        long_funding,
                        short_funding,
                        net_funding,
                        long_deposit_enabled,
                        short_withdraw_enabled,
                        long_depth_usd: 0.0,
                        short_depth_usd: 0.0,
                        min_depth_usd: 0.0,
                        volume_24h: long_view.ticker.volume_24h.min(short_view.ticker.volume_24h),
                        estimated_pnl_bps,
                        score: 0.0,
                        updated_at: now,
                    };
                    spreads.push(spread);
                }
            }
        }

        for spread in &mut spreads {
            spread.score = score_of(spread);
        }
        rank(&mut spreads);

        let inventory = Arc::new(SpreadInventory { timestamp: now, count: spreads.len(), spreads });
        self.inventory.store(inventory.clone());
        inventory
    }

    /// Live correction (§4.4): an order-book event for a symbol currently
    /// referenced by the inventory updates that leg's price and
    /// recomputes `spread_bps`/`score` for every spread referencing it,
    /// without waiting for the next REST cycle.
    pub fn apply_orderbook_update(&self, book: &OrderBook) -> Arc<SpreadInventory> {
        let Some(price) = book.best_bid().zip(book.best_ask()) else { return self.inventory.load_full() };
        let (best_bid, best_ask) = price;
        let depth_usd = book.min_depth_usd(DEPTH_LEVELS_FOR_RANKING);

        let mut spreads = self.inventory.load().spreads.clone();
        let mut any_touched = false;

        for spread in &mut spreads {
            if spread.canonical != book.canonical {
                continue;
            }
            let mut touched = false;
            if spread.long_exchange == book.venue {
                spread.long_price = best_ask.price;
                spread.long_depth_usd = depth_usd;
                touched = true;
            }
            if spread.short_exchange == book.venue {
                spread.short_price = best_bid.price;
                spread.short_depth_usd = depth_usd;
                touched = true;
            }
            if touched {
                recompute(spread);
                any_touched = true;
            }
        }

        if !any_touched {
            return self.inventory.load_full();
        }

        let now = now_ms();
        let inventory = Arc::new(SpreadInventory { timestamp: now, count: spreads.len(), spreads });
        self.inventory.store(inventory.clone());
        inventory
    }

    /// Live correction for funding updates, analogous to order-book
    /// corrections (§4.4).
    pub fn apply_funding_update(&self, venue: VenueId, canonical: &Canonical, rate: &FundingRate) -> Arc<SpreadInventory> {
        let mut spreads = self.inventory.load().spreads.clone();
        let mut any_touched = false;

        for spread in &mut spreads {
            if &spread.canonical != canonical {
                continue;
            }
            let mut touched = false;
            if spread.long_exchange == venue {
                spread.long_funding = rate.rate;
                touched = true;
            }
            if spread.short_exchange == venue {
                spread.short_funding = rate.rate;
                touched = true;
            }
            if touched {
                spread.net_funding = spread.short_funding - spread.long_funding;
                spread.score = score_of(spread);
                any_touched = true;
            }
        }

        if !any_touched {
            return self.inventory.load_full();
        }

        let now = now_ms();
        let inventory = Arc::new(SpreadInventory { timestamp: now, count: spreads.len(), spreads });
        self.inventory.store(inventory.clone());
        inventory
    }

    /// The venue-symbol set implicated by the current inventory (§3
    /// invariant 4, §4.4 last paragraph): a venue symbol is subscribed iff
    /// at least one spread references it.
    pub fn symbols_needed(&self) -> HashMap<VenueId, Vec<String>> {
        let inventory = self.inventory.load();
        let mut by_venue: HashMap<VenueId, std::collections::HashSet<String>> = HashMap::new();

        for spread in &inventory.spreads {
            by_venue.entry(spread.long_exchange).or_default().insert(spread.long_symbol.clone());
            by_venue.entry(spread.short_exchange).or_default().insert(spread.short_symbol.clone());
        }

        by_venue.into_iter().map(|(v, set)| (v, set.into_iter().collect())).collect()
    }
}

fn recompute(spread: &mut PreliminarySpread) {
    if spread.long_price <= 0.0 {
        return;
    }
    spread.spread_percent = (spread.short_price - spread.long_price) / spread.long_price * 100.0;
    spread.spread_bps = spread.spread_percent * 100.0;
    spread.min_depth_usd = spread.long_depth_usd.min(spread.short_depth_usd);
    spread.score = score_of(spread);
    spread.updated_at = now_ms();
}

/// Composite ranking score (§4.4: "the exact weighting is a configuration
/// choice"). Favors wider net spreads, deeper books, and higher volume;
/// the one hard contract is that a strictly higher `estimated_pnl_bps` at
/// equal depth strictly dominates, which this weighting preserves since
/// `estimated_pnl_bps` is the dominant linear term.
fn score_of(spread: &PreliminarySpread) -> f64 {
    let depth_component = (1.0 + spread.min_depth_usd).ln() * 5.0;
    let volume_component = (1.0 + spread.volume_24h).ln() * 2.0;
    let funding_component = spread.net_funding * 10_000.0;
    spread.estimated_pnl_bps + depth_component + volume_component + funding_component
}

fn rank(spreads: &mut [PreliminarySpread]) {
    spreads.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.estimated_pnl_bps.partial_cmp(&a.estimated_pnl_bps).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.updated_at.cmp(&b.updated_at))
    });
}

fn spread_id(canonical: &str, long: VenueId, short: VenueId) -> String {
    format!("{canonical}:{}:{}", long.as_str(), short.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssetInfo, Instrument, PriceTicker};
    use crate::rest_loader::{ExchangeView, TokenData};

    fn instrument(venue: VenueId, symbol: &str, taker_fee: f64) -> Instrument {
        Instrument {
            venue,
            venue_symbol: symbol.to_string(),
            canonical: "BTC-USDT-PERP".to_string(),
            base: "BTC".to_string(),
            quote: "USDT".to_string(),
            tick_size: 0.1,
            lot_size: 0.001,
            contract_multiplier: 1.0,
            maker_fee: 0.0002,
            taker_fee,
            min_notional: 1.0,
        }
    }

    fn ticker(venue: VenueId, symbol: &str, bid: Option<f64>, ask: Option<f64>) -> PriceTicker {
        PriceTicker {
            venue,
            venue_symbol: symbol.to_string(),
            canonical: "BTC-USDT-PERP".to_string(),
            last: bid.or(ask),
            bid,
            ask,
            volume_24h: 1_000_000.0,
            timestamp: 1000,
        }
    }

    #[test]
    fn single_pair_spread_matches_scenario_1() {
        // spec.md §8 scenario 1.
        let mut exchanges = HashMap::new();
        exchanges.insert(
            VenueId::Binance,
            ExchangeView {
                instrument: instrument(VenueId::Binance, "BTCUSDT", 0.0005),
                ticker: ticker(VenueId::Binance, "BTCUSDT", None, Some(42001.0)),
                funding: None,
                asset: Some(AssetInfo::degraded_default(VenueId::Binance, "BTC".into(), 1000)),
            },
        );
        exchanges.insert(
            VenueId::Bybit,
            ExchangeView {
                instrument: instrument(VenueId::Bybit, "BTCUSDT", 0.0005),
                ticker: ticker(VenueId::Bybit, "BTCUSDT", Some(42010.0), None),
                funding: None,
                asset: Some(AssetInfo::degraded_default(VenueId::Bybit, "BTC".into(), 1000)),
            },
        );

        let mut tokens = HashMap::new();
        tokens.insert("BTC-USDT-PERP".to_string(), TokenData { canonical: "BTC-USDT-PERP".to_string(), exchanges });
        let index = TokenIndex { tokens };

        let engine = SpreadEngine::new(1.0);
        let inventory = engine.discover(&index);

        let forward = inventory
            .spreads
            .iter()
            .find(|s| s.long_exchange == VenueId::Binance && s.short_exchange == VenueId::Bybit)
            .expect("forward spread present");

        assert!((forward.spread_bps - 2.1428).abs() < 0.01);
        assert!((forward.estimated_pnl_bps - (-7.857)).abs() < 0.01);
    }

    #[test]
    fn single_venue_token_publishes_no_spread() {
        let mut exchanges = HashMap::new();
        exchanges.insert(
            VenueId::Binance,
            ExchangeView {
                instrument: instrument(VenueId::Binance, "BTCUSDT", 0.0005),
                ticker: ticker(VenueId::Binance, "BTCUSDT", Some(42000.0), Some(42001.0)),
                funding: None,
                asset: None,
            },
        );
        let mut tokens = HashMap::new();
        tokens.insert("BTC-USDT-PERP".to_string(), TokenData { canonical: "BTC-USDT-PERP".to_string(), exchanges });
        let index = TokenIndex { tokens };

        let engine = SpreadEngine::new(1.0);
        let inventory = engine.discover(&index);
        assert!(inventory.spreads.is_empty());
    }

    #[test]
    fn empty_token_index_yields_empty_inventory() {
        let engine = SpreadEngine::new(5.0);
        let inventory = engine.discover(&TokenIndex::default());
        assert_eq!(inventory.count, 0);
    }

    /// An order-book update for one venue must only recompute spreads that
    /// actually reference that venue as a leg — a third venue sharing the
    /// same canonical but absent from a given spread must leave it alone.
    #[test]
    fn orderbook_update_only_touches_spreads_referencing_that_leg() {
        use crate::model::{OrderBook, PriceLevel};

        let mut exchanges = HashMap::new();
        exchanges.insert(
            VenueId::Binance,
            ExchangeView {
                instrument: instrument(VenueId::Binance, "BTCUSDT", 0.0005),
                ticker: ticker(VenueId::Binance, "BTCUSDT", None, Some(42001.0)),
                funding: None,
                asset: None,
            },
        );
        exchanges.insert(
            VenueId::Bybit,
            ExchangeView {
                instrument: instrument(VenueId::Bybit, "BTCUSDT", 0.0005),
                ticker: ticker(VenueId::Bybit, "BTCUSDT", Some(42010.0), None),
                funding: None,
                asset: None,
            },
        );
        exchanges.insert(
            VenueId::Okx,
            ExchangeView {
                instrument: instrument(VenueId::Okx, "BTC-USDT-SWAP", 0.0005),
                ticker: ticker(VenueId::Okx, "BTC-USDT-SWAP", Some(42012.0), Some(42013.0)),
                funding: None,
                asset: None,
            },
        );

        let mut tokens = HashMap::new();
        tokens.insert("BTC-USDT-PERP".to_string(), TokenData { canonical: "BTC-USDT-PERP".to_string(), exchanges });
        let index = TokenIndex { tokens };

        let engine = SpreadEngine::new(1.0);
        engine.discover(&index);

        let unrelated_spread = engine
            .inventory()
            .spreads
            .iter()
            .find(|s| s.long_exchange == VenueId::Bybit && s.short_exchange == VenueId::Okx)
            .expect("bybit/okx spread present")
            .clone();

        let book = OrderBook {
            venue: VenueId::Binance,
            venue_symbol: "BTCUSDT".to_string(),
            canonical: "BTC-USDT-PERP".to_string(),
            bids: vec![PriceLevel { price: 42000.0, quantity: 1.0 }],
            asks: vec![PriceLevel { price: 42002.0, quantity: 1.0 }],
            sequence_id: None,
            timestamp: 2000,
            is_snapshot: true,
        };

        let updated = engine.apply_orderbook_update(&book);

        let touched = updated
            .spreads
            .iter()
            .find(|s| s.long_exchange == VenueId::Binance && s.short_exchange == VenueId::Bybit)
            .expect("binance/bybit spread present");
        assert_eq!(touched.long_price, 42002.0);

        let still_unrelated = updated
            .spreads
            .iter()
            .find(|s| s.long_exchange == VenueId::Bybit && s.short_exchange == VenueId::Okx)
            .expect("bybit/okx spread present");
        assert_eq!(still_unrelated.updated_at, unrelated_spread.updated_at);
        assert_eq!(still_unrelated.long_price, unrelated_spread.long_price);
        assert_eq!(still_unrelated.short_price, unrelated_spread.short_price);
    }
}
