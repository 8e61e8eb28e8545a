//! Per-venue pure/REST logic (§4.2, §9 "Dynamic JSON shapes"). Each venue
//! module implements [`VenueSpec`] with its own request/response structs;
//! nothing dynamically-typed escapes past `parse_message` /
//! `fetch_*`—callers only ever see the normalized [`crate::model`] types.
//!
//! [`crate::connectors::engine::GenericConnector`] is the single runtime
//! that drives every `VenueSpec` — REST calls, the WebSocket read loop,
//! heartbeats, subscription bookkeeping — so per-venue code stays limited
//! to "what does this venue's wire format look like".

use async_trait::async_trait;
use serde_json::Value;

use crate::connectors::connector::Credential;
use crate::error::Result;
use crate::model::{AssetInfo, FundingRate, Instrument, OrderBook, PriceTicker, Trade, VenueId};

/// One normalized event recovered from a raw WebSocket text frame.
/// `parse_message` may return zero, one, or several (e.g. a batched trade
/// frame fans out to several `Trade` events).
pub enum ParsedEvent {
    OrderBookSnapshot {
        venue_symbol: String,
        bids: Vec<(f64, f64)>,
        asks: Vec<(f64, f64)>,
        sequence_id: Option<u64>,
        timestamp: i64,
    },
    OrderBookDelta {
        venue_symbol: String,
        bids: Vec<(f64, f64)>,
        asks: Vec<(f64, f64)>,
        sequence_id: Option<u64>,
        timestamp: i64,
    },
    Trade(Trade),
    Funding(FundingRate),
    /// A peer keepalive that must be echoed back verbatim (or with a
    /// server-supplied timestamp reflected) before the venue drops the
    /// connection for being unresponsive — distinct from `Control` because
    /// it requires writing a reply frame, not just absorbing the one
    /// received.
    Reply(String),
    /// Acks, pongs, and other non-market frames — not an error.
    Control,
}

#[async_trait]
pub trait VenueSpec: Send + Sync + 'static {
    fn id(&self) -> VenueId;
    fn ws_url(&self) -> &'static str;
    fn rest_base_url(&self) -> &'static str;

    /// Depth used for the venue's streaming order-book channel, where the
    /// venue's subscription protocol requires specifying one up front.
    fn default_depth(&self) -> usize {
        50
    }

    async fn fetch_instruments(&self, http: &reqwest::Client) -> Result<Vec<Instrument>>;
    async fn fetch_price_tickers(&self, http: &reqwest::Client) -> Result<Vec<PriceTicker>>;
    async fn fetch_funding_rates(&self, http: &reqwest::Client) -> Result<Vec<FundingRate>>;

    /// Best-effort (§4.2): falls back to a degraded default when no
    /// credential is present and the venue needs auth for full detail.
    async fn fetch_asset_info(
        &self,
        http: &reqwest::Client,
        credential: Option<&Credential>,
    ) -> Result<Vec<AssetInfo>>;

    async fn fetch_orderbook_snapshot(
        &self,
        http: &reqwest::Client,
        venue_symbol: &str,
        depth: usize,
    ) -> Result<OrderBook>;

    fn build_subscribe_message(&self, venue_symbols: &[String]) -> Value;
    fn build_unsubscribe_message(&self, venue_symbols: &[String]) -> Value;

    /// An application-level heartbeat frame sent on every heartbeat tick,
    /// for venues whose protocol expects a client-initiated text ping on
    /// top of the WebSocket protocol ping/pong (§4.2 "Ping/keepalive").
    /// Returned as the raw text to write — not a `Value`, since some
    /// venues (OKX, Bitget) want the literal unquoted string `"ping"`
    /// rather than a JSON document. `None` means the venue's keepalive is
    /// entirely peer-initiated (see `parse_message` / `ParsedEvent::Reply`).
    fn heartbeat_payload(&self) -> Option<String> {
        None
    }

    /// Decodes a binary WebSocket frame into UTF-8 text, for venues that
    /// gzip-compress their application payload on top of the WebSocket
    /// transport (`tokio-tungstenite` only speaks permessage-deflate at
    /// the transport layer, so these venues' frames arrive as opaque
    /// `Message::Binary` otherwise). Default: binary frames carry no
    /// application data for this venue and are ignored.
    fn decode_binary_frame(&self, _bytes: &[u8]) -> Result<Option<String>> {
        Ok(None)
    }

    fn parse_message(&self, raw: &str) -> Result<Vec<ParsedEvent>>;
}
