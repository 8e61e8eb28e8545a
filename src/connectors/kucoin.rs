//! KuCoin Futures (perpetual contracts), `api-futures.kucoin.com`.
//!
//! REST: https://docs.kucoin.com/futures/
//! WS: production KuCoin requires a `POST /bullet-public` handshake that
//! hands back a short-lived token and endpoint; this connector targets the
//! long-lived public endpoint directly, which KuCoin also serves for
//! unauthenticated market data, to keep `ws_url()` static like every other
//! venue in this registry.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::canonical;
use crate::connectors::connector::Credential;
use crate::connectors::http::{get_json, parse_f64};
use crate::connectors::spec::{ParsedEvent, VenueSpec};
use crate::error::{EngineError, Result};
use crate::model::{AssetInfo, FundingRate, Instrument, OrderBook, PriceLevel, PriceTicker, Trade, TradeSide, VenueId};
use crate::util::now_ms;

const REST_BASE: &str = "https://api-futures.kucoin.com";
const WS_BASE: &str = "wss://ws-api-futures.kucoin.com/endpoint";

pub struct Kucoin;

impl Kucoin {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct ContractEntry {
    symbol: String,
    status: String,
    #[serde(rename = "baseCurrency")]
    base_currency: String,
    #[serde(rename = "quoteCurrency")]
    quote_currency: String,
    #[serde(rename = "tickSize")]
    tick_size: f64,
    #[serde(rename = "lotSize")]
    lot_size: f64,
    multiplier: f64,
    #[serde(rename = "makerFeeRate")]
    maker_fee_rate: f64,
    #[serde(rename = "takerFeeRate")]
    taker_fee_rate: f64,
}

#[derive(Deserialize)]
struct TickerEntry {
    symbol: String,
    price: String,
    #[serde(rename = "bestBidPrice")]
    best_bid_price: Option<String>,
    #[serde(rename = "bestAskPrice")]
    best_ask_price: Option<String>,
}

#[derive(Deserialize)]
struct FundingEntry {
    symbol: String,
    #[serde(rename = "fundingRate")]
    funding_rate: f64,
    #[serde(rename = "timePoint")]
    time_point: i64,
}

#[derive(Deserialize)]
struct DepthEntry {
    symbol: String,
    sequence: u64,
    bids: Vec<[f64; 2]>,
    asks: Vec<[f64; 2]>,
    ts: i64,
}

#[async_trait]
impl VenueSpec for Kucoin {
    fn id(&self) -> VenueId {
        VenueId::Kucoin
    }

    fn ws_url(&self) -> &'static str {
        WS_BASE
    }

    fn rest_base_url(&self) -> &'static str {
        REST_BASE
    }

    fn default_depth(&self) -> usize {
        20
    }

    async fn fetch_instruments(&self, http: &reqwest::Client) -> Result<Vec<Instrument>> {
        let resp: Envelope<Vec<ContractEntry>> =
            get_json(http, &format!("{REST_BASE}/api/v1/contracts/active")).await?;

        Ok(resp
            .data
            .into_iter()
            .filter(|c| c.status == "Open")
            .filter_map(|c| {
                let canonical = canonical::to_canonical(VenueId::Kucoin, &c.symbol)?;
                Some(Instrument {
                    venue: VenueId::Kucoin,
                    venue_symbol: c.symbol,
                    canonical,
                    base: c.base_currency,
                    quote: c.quote_currency,
                    tick_size: c.tick_size,
                    lot_size: c.lot_size,
                    contract_multiplier: c.multiplier,
                    maker_fee: c.maker_fee_rate,
                    taker_fee: c.taker_fee_rate,
                    min_notional: 1.0,
                })
            })
            .collect())
    }

    async fn fetch_price_tickers(&self, http: &reqwest::Client) -> Result<Vec<PriceTicker>> {
        let instruments = self.fetch_instruments(http).await?;
        let mut out = Vec::with_capacity(instruments.len());
        let now = now_ms();
        for inst in instruments {
            let url = format!("{REST_BASE}/api/v1/ticker?symbol={}", inst.venue_symbol);
            if let Ok(resp) = get_json::<Envelope<TickerEntry>>(http, &url).await {
                out.push(PriceTicker {
                    venue: VenueId::Kucoin,
                    venue_symbol: resp.data.symbol,
                    canonical: inst.canonical,
                    last: Some(parse_f64(&resp.data.price)),
                    bid: resp.data.best_bid_price.as_deref().map(parse_f64),
                    ask: resp.data.best_ask_price.as_deref().map(parse_f64),
                    volume_24h: 0.0,
                    timestamp: now,
                });
            }
        }
        Ok(out)
    }

    async fn fetch_funding_rates(&self, http: &reqwest::Client) -> Result<Vec<FundingRate>> {
        let instruments = self.fetch_instruments(http).await?;
        let mut out = Vec::with_capacity(instruments.len());
        for inst in instruments {
            let url = format!("{REST_BASE}/api/v1/funding-rate/{}/current", inst.venue_symbol);
            if let Ok(resp) = get_json::<Envelope<FundingEntry>>(http, &url).await {
                out.push(FundingRate {
                    venue: VenueId::Kucoin,
                    venue_symbol: resp.data.symbol,
                    rate: resp.data.funding_rate,
                    next_funding_time: resp.data.time_point,
                    interval_hours: 8.0,
                    timestamp: now_ms(),
                });
            }
        }
        Ok(out)
    }

    async fn fetch_asset_info(
        &self,
        _http: &reqwest::Client,
        credential: Option<&Credential>,
    ) -> Result<Vec<AssetInfo>> {
        if credential.is_none() {
            return Ok(vec![]);
        }
        Ok(vec![])
    }

    async fn fetch_orderbook_snapshot(
        &self,
        http: &reqwest::Client,
        venue_symbol: &str,
        depth: usize,
    ) -> Result<OrderBook> {
        let path = if depth <= 20 { "level2/depth20" } else { "level2/depth100" };
        let url = format!("{REST_BASE}/api/v1/{path}?symbol={venue_symbol}");
        let resp: Envelope<DepthEntry> = get_json(http, &url).await?;
        let canonical = canonical::to_canonical(VenueId::Kucoin, venue_symbol)
            .ok_or_else(|| EngineError::Parse(format!("unrecognized kucoin symbol {venue_symbol}")))?;

        Ok(OrderBook {
            venue: VenueId::Kucoin,
            venue_symbol: venue_symbol.to_string(),
            canonical,
            bids: resp.data.bids.iter().map(|[p, q]| PriceLevel { price: *p, quantity: *q }).collect(),
            asks: resp.data.asks.iter().map(|[p, q]| PriceLevel { price: *p, quantity: *q }).collect(),
            sequence_id: Some(resp.data.sequence),
            timestamp: resp.data.ts,
            is_snapshot: true,
        })
    }

    fn build_subscribe_message(&self, venue_symbols: &[String]) -> Value {
        let symbols = venue_symbols.join(",");
        json!({
            "id": now_ms().to_string(),
            "type": "subscribe",
            "topic": format!("/contractMarket/level2:{symbols}"),
            "privateChannel": false,
            "response": true
        })
    }

    fn build_unsubscribe_message(&self, venue_symbols: &[String]) -> Value {
        let symbols = venue_symbols.join(",");
        json!({
            "id": now_ms().to_string(),
            "type": "unsubscribe",
            "topic": format!("/contractMarket/level2:{symbols}"),
            "privateChannel": false,
            "response": true
        })
    }

    fn heartbeat_payload(&self) -> Option<String> {
        Some(json!({ "id": now_ms().to_string(), "type": "ping" }).to_string())
    }

    fn parse_message(&self, raw: &str) -> Result<Vec<ParsedEvent>> {
        let v: Value = serde_json::from_str(raw).map_err(|e| EngineError::Parse(e.to_string()))?;

        let msg_type = v.get("type").and_then(|t| t.as_str()).unwrap_or("");
        if msg_type != "message" {
            return Ok(vec![ParsedEvent::Control]);
        }

        let topic = v.get("topic").and_then(|t| t.as_str()).unwrap_or_default();
        let data = match v.get("data") {
            Some(d) => d,
            None => return Ok(vec![ParsedEvent::Control]),
        };

        if let Some(symbol) = topic.strip_prefix("/contractMarket/level2:") {
            let bids = parse_levels(&data["bids"]);
            let asks = parse_levels(&data["asks"]);
            let sequence_id = data.get("sequence").and_then(|s| s.as_u64());
            let timestamp = data.get("timestamp").and_then(|t| t.as_i64()).unwrap_or_else(now_ms);
            return Ok(vec![ParsedEvent::OrderBookDelta { venue_symbol: symbol.to_string(), bids, asks, sequence_id, timestamp }]);
        }

        if let Some(symbol) = topic.strip_prefix("/contractMarket/execution:") {
            let Some(canonical) = canonical::to_canonical(VenueId::Kucoin, symbol) else {
                return Ok(vec![]);
            };
            let trade = Trade {
                venue: VenueId::Kucoin,
                venue_symbol: symbol.to_string(),
                canonical,
                price: data.get("price").and_then(|p| p.as_str()).map(parse_f64).unwrap_or(0.0),
                quantity: data.get("size").and_then(|s| s.as_f64()).unwrap_or(0.0),
                side: if data.get("side").and_then(|s| s.as_str()) == Some("sell") { TradeSide::Sell } else { TradeSide::Buy },
                timestamp: data.get("ts").and_then(|t| t.as_i64()).map(|ns| ns / 1_000_000).unwrap_or_else(now_ms),
            };
            return Ok(vec![ParsedEvent::Trade(trade)]);
        }

        Ok(vec![ParsedEvent::Control])
    }
}

fn parse_levels(value: &Value) -> Vec<(f64, f64)> {
    value
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|lvl| {
                    let p = lvl.get(0)?.as_f64()?;
                    let q = lvl.get(1)?.as_f64()?;
                    Some((p, q))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_level2_delta() {
        let spec = Kucoin::new();
        let raw = r#"{"type":"message","topic":"/contractMarket/level2:XBTUSDTM","data":{"sequence":5,"timestamp":1700000000000,"bids":[[42000.0,1.0]],"asks":[[42010.0,1.0]]}}"#;
        let events = spec.parse_message(raw).unwrap();
        assert!(matches!(events[0], ParsedEvent::OrderBookDelta { .. }));
    }

    #[test]
    fn non_message_frame_is_control() {
        let spec = Kucoin::new();
        let events = spec.parse_message(r#"{"type":"welcome","id":"1"}"#).unwrap();
        assert!(matches!(events[0], ParsedEvent::Control));
    }
}
