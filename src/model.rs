//! Core data model shared across the ingest pipeline, spread engine, and
//! publisher.
//!
//! Mirrors the teacher's `schema.rs`: a small set of normalized structs
//! that every venue connector converts into at the boundary, so nothing
//! venue-specific leaks past the adapter layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Statically enumerated venue identifiers (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueId {
    Binance,
    Bybit,
    Okx,
    Kucoin,
    Mexc,
    Bitget,
    Gateio,
    Bingx,
    Coinex,
    Lbank,
    Htx,
}

impl VenueId {
    pub const ALL: [VenueId; 11] = [
        VenueId::Binance,
        VenueId::Bybit,
        VenueId::Okx,
        VenueId::Kucoin,
        VenueId::Mexc,
        VenueId::Bitget,
        VenueId::Gateio,
        VenueId::Bingx,
        VenueId::Coinex,
        VenueId::Lbank,
        VenueId::Htx,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VenueId::Binance => "binance",
            VenueId::Bybit => "bybit",
            VenueId::Okx => "okx",
            VenueId::Kucoin => "kucoin",
            VenueId::Mexc => "mexc",
            VenueId::Bitget => "bitget",
            VenueId::Gateio => "gateio",
            VenueId::Bingx => "bingx",
            VenueId::Coinex => "coinex",
            VenueId::Lbank => "lbank",
            VenueId::Htx => "htx",
        }
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VenueId {
    type Err = crate::error::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binance" => Ok(VenueId::Binance),
            "bybit" => Ok(VenueId::Bybit),
            "okx" => Ok(VenueId::Okx),
            "kucoin" => Ok(VenueId::Kucoin),
            "mexc" => Ok(VenueId::Mexc),
            "bitget" => Ok(VenueId::Bitget),
            "gateio" => Ok(VenueId::Gateio),
            "bingx" => Ok(VenueId::Bingx),
            "coinex" => Ok(VenueId::Coinex),
            "lbank" => Ok(VenueId::Lbank),
            "htx" => Ok(VenueId::Htx),
            other => Err(crate::error::EngineError::UnknownVenue(other.to_string())),
        }
    }
}

/// A venue-independent symbol identifier, e.g. `BTC-USDT-PERP`.
pub type Canonical = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub venue: VenueId,
    pub venue_symbol: String,
    pub canonical: Canonical,
    pub base: String,
    pub quote: String,
    pub tick_size: f64,
    pub lot_size: f64,
    pub contract_multiplier: f64,
    pub maker_fee: f64,
    pub taker_fee: f64,
    pub min_notional: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTicker {
    pub venue: VenueId,
    pub venue_symbol: String,
    pub canonical: Canonical,
    pub last: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub volume_24h: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingRate {
    pub venue: VenueId,
    pub venue_symbol: String,
    pub rate: f64,
    pub next_funding_time: i64,
    pub interval_hours: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetInfo {
    pub venue: VenueId,
    pub base_asset: String,
    pub deposit_enabled: bool,
    pub withdraw_enabled: bool,
    pub fee: f64,
    pub min: f64,
    pub timestamp: i64,
}

impl AssetInfo {
    /// Degraded-fidelity default used when a venue requires authenticated
    /// endpoints for full asset detail and no credentials were injected
    /// (§4.2): active contract implies enabled deposit/withdraw, zero fees.
    pub fn degraded_default(venue: VenueId, base_asset: String, timestamp: i64) -> Self {
        Self {
            venue,
            base_asset,
            deposit_enabled: true,
            withdraw_enabled: true,
            fee: 0.0,
            min: 0.0,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceLevel {
    pub price: f64,
    pub quantity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub venue: VenueId,
    pub venue_symbol: String,
    pub canonical: Canonical,
    /// Strictly price-descending.
    pub bids: Vec<PriceLevel>,
    /// Strictly price-ascending.
    pub asks: Vec<PriceLevel>,
    pub sequence_id: Option<u64>,
    pub timestamp: i64,
    pub is_snapshot: bool,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }

    /// `(best_ask - best_bid) / best_bid * 10_000`, per the invariant in §3.
    pub fn spread_bps(&self) -> Option<f64> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        if bid.price <= 0.0 {
            return None;
        }
        Some((ask.price - bid.price) / bid.price * 10_000.0)
    }

    /// Notional depth (in quote currency) available within `levels` of
    /// top-of-book on both sides — the smaller of the two sides, used by
    /// Spread Discovery's `min_depth_usd` ranking input.
    pub fn min_depth_usd(&self, levels: usize) -> f64 {
        let bid_depth: f64 = self.bids.iter().take(levels).map(|l| l.price * l.quantity).sum();
        let ask_depth: f64 = self.asks.iter().take(levels).map(|l| l.price * l.quantity).sum();
        bid_depth.min(ask_depth)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub venue: VenueId,
    pub venue_symbol: String,
    pub canonical: Canonical,
    pub price: f64,
    pub quantity: f64,
    pub side: TradeSide,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreliminarySpread {
    pub id: String,
    pub canonical: Canonical,
    pub long_exchange: VenueId,
    pub short_exchange: VenueId,
    pub long_symbol: String,
    pub short_symbol: String,
    pub long_price: f64,
    pub short_price: f64,
    pub spread_percent: f64,
    pub spread_bps: f64,
    pub long_funding: f64,
    pub short_funding: f64,
    pub net_funding: f64,
    pub long_deposit_enabled: bool,
    pub short_withdraw_enabled: bool,
    pub long_depth_usd: f64,
    pub short_depth_usd: f64,
    pub min_depth_usd: f64,
    pub volume_24h: f64,
    pub estimated_pnl_bps: f64,
    pub score: f64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpreadInventory {
    pub timestamp: i64,
    pub count: usize,
    pub spreads: Vec<PreliminarySpread>,
}
