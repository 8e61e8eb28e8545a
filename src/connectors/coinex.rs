//! CoinEx perpetual futures.
//!
//! REST: https://docs.coinex.com/api/v2/futures/market
//! WS: wss://socket.coinex.com/v2/futures — JSON-RPC-style `{method,
//! params, id}` request/response, `depth.update`/`deals.update` pushes.

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

const REST_BASE: &str = "https://api.coinex.com";
const WS_BASE: &str = "wss://socket.coinex.com/v2/futures";

pub struct Coinex;

impl Coinex {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct MarketEntry {
    market: String,
    #[serde(rename = "base_ccy")]
    base_ccy: String,
    #[serde(rename = "quote_ccy")]
    quote_ccy: String,
    #[serde(rename = "tick_size")]
    tick_size: String,
    #[serde(rename = "min_amount")]
    min_amount: String,
    #[serde(rename = "maker_fee_rate")]
    maker_fee_rate: String,
    #[serde(rename = "taker_fee_rate")]
    taker_fee_rate: String,
    #[serde(rename = "is_market_available")]
    is_market_available: bool,
}

#[derive(Deserialize)]
struct TickerEntry {
    market: String,
    last: String,
    volume: String,
}

#[derive(Deserialize)]
struct FundingEntry {
    market: String,
    #[serde(rename = "latest_funding_rate")]
    latest_funding_rate: String,
    #[serde(rename = "next_funding_time")]
    next_funding_time: i64,
}

#[derive(Deserialize)]
struct DepthEntry {
    depth: DepthLevels,
}

#[derive(Deserialize)]
struct DepthLevels {
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
    #[serde(rename = "updated_at")]
    updated_at: i64,
}

#[async_trait]
impl VenueSpec for Coinex {
    fn id(&self) -> VenueId {
        VenueId::Coinex
    }

    fn ws_url(&self) -> &'static str {
        WS_BASE
    }

    fn rest_base_url(&self) -> &'static str {
        REST_BASE
    }

    async fn fetch_instruments(&self, http: &reqwest::Client) -> Result<Vec<Instrument>> {
        let resp: Envelope<Vec<MarketEntry>> =
            get_json(http, &format!("{REST_BASE}/v2/futures/market")).await?;

        Ok(resp
            .data
            .into_iter()
            .filter(|m| m.is_market_available)
            .filter_map(|m| {
                let canonical = canonical::to_canonical(VenueId::Coinex, &m.market)?;
                Some(Instrument {
                    venue: VenueId::Coinex,
                    venue_symbol: m.market,
                    canonical,
                    base: m.base_ccy,
                    quote: m.quote_ccy,
                    tick_size: parse_f64(&m.tick_size),
                    lot_size: parse_f64(&m.min_amount),
                    contract_multiplier: 1.0,
                    maker_fee: parse_f64(&m.maker_fee_rate),
                    taker_fee: parse_f64(&m.taker_fee_rate),
                    min_notional: 1.0,
                })
            })
            .collect())
    }

    async fn fetch_price_tickers(&self, http: &reqwest::Client) -> Result<Vec<PriceTicker>> {
        let resp: Envelope<Vec<TickerEntry>> =
            get_json(http, &format!("{REST_BASE}/v2/futures/ticker")).await?;
        let now = now_ms();
        Ok(resp
            .data
            .into_iter()
            .filter_map(|t| {
                let canonical = canonical::to_canonical(VenueId::Coinex, &t.market)?;
                Some(PriceTicker {
                    venue: VenueId::Coinex,
                    venue_symbol: t.market,
                    canonical,
                    last: Some(parse_f64(&t.last)),
                    bid: None,
                    ask: None,
                    volume_24h: parse_f64(&t.volume),
                    timestamp: now,
                })
            })
            .collect())
    }

    async fn fetch_funding_rates(&self, http: &reqwest::Client) -> Result<Vec<FundingRate>> {
        let resp: Envelope<Vec<FundingEntry>> =
            get_json(http, &format!("{REST_BASE}/v2/futures/funding-rate")).await?;
        let now = now_ms();
        Ok(resp
            .data
            .into_iter()
            .map(|f| FundingRate {
                venue: VenueId::Coinex,
                venue_symbol: f.market,
                rate: parse_f64(&f.latest_funding_rate),
                next_funding_time: f.next_funding_time,
                interval_hours: 8.0,
                timestamp: now,
            })
            .collect())
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
        let limit = depth.clamp(5, 50);
        let url = format!("{REST_BASE}/v2/futures/depth?market={venue_symbol}&limit={limit}&interval=0");
        let resp: Envelope<DepthEntry> = get_json(http, &url).await?;
        let canonical = canonical::to_canonical(VenueId::Coinex, venue_symbol)
            .ok_or_else(|| EngineError::Parse(format!("unrecognized coinex symbol {venue_symbol}")))?;

        Ok(OrderBook {
            venue: VenueId::Coinex,
            venue_symbol: venue_symbol.to_string(),
            canonical,
            bids: resp.data.depth.bids.iter().map(|[p, q]| PriceLevel { price: parse_f64(p), quantity: parse_f64(q) }).collect(),
            asks: resp.data.depth.asks.iter().map(|[p, q]| PriceLevel { price: parse_f64(p), quantity: parse_f64(q) }).collect(),
            sequence_id: None,
            timestamp: resp.data.depth.updated_at,
            is_snapshot: true,
        })
    }

    fn build_subscribe_message(&self, venue_symbols: &[String]) -> Value {
        json!({
            "method": "depth.subscribe",
            "params": { "market_list": venue_symbols.iter().map(|s| json!([s, 50, "0", true])).collect::<Vec<_>>() },
            "id": now_ms()
        })
    }

    fn build_unsubscribe_message(&self, venue_symbols: &[String]) -> Value {
        json!({
            "method": "depth.unsubscribe",
            "params": { "market_list": venue_symbols },
            "id": now_ms()
        })
    }

    fn parse_message(&self, raw: &str) -> Result<Vec<ParsedEvent>> {
        let v: Value = serde_json::from_str(raw).map_err(|e| EngineError::Parse(e.to_string()))?;

        let method = match v.get("method").and_then(|m| m.as_str()) {
            Some(m) => m,
            None => return Ok(vec![ParsedEvent::Control]),
        };

        let params = match v.get("params") {
            Some(p) => p,
            None => return Ok(vec![ParsedEvent::Control]),
        };

        match method {
            "depth.update" => {
                let is_full = params.get(0).and_then(|b| b.as_bool()).unwrap_or(false);
                let depth = &params[1];
                let symbol = params.get(2).and_then(|s| s.as_str()).unwrap_or_default().to_string();
                let bids = parse_levels(&depth["bids"]);
                let asks = parse_levels(&depth["asks"]);
                let timestamp = now_ms();
                let event = if is_full {
                    ParsedEvent::OrderBookSnapshot { venue_symbol: symbol, bids, asks, sequence_id: None, timestamp }
                } else {
                    ParsedEvent::OrderBookDelta { venue_symbol: symbol, bids, asks, sequence_id: None, timestamp }
                };
                Ok(vec![event])
            }
            "deals.update" => {
                let symbol = params.get(0).and_then(|s| s.as_str()).unwrap_or_default().to_string();
                let Some(canonical) = canonical::to_canonical(VenueId::Coinex, &symbol) else { return Ok(vec![]) };
                let deals = params.get(1).and_then(|d| d.as_array()).cloned().unwrap_or_default();
                let mut events = Vec::with_capacity(deals.len());
                for d in deals {
                    events.push(ParsedEvent::Trade(Trade {
                        venue: VenueId::Coinex,
                        venue_symbol: symbol.clone(),
                        canonical: canonical.clone(),
                        price: d["price"].as_str().map(parse_f64).unwrap_or(0.0),
                        quantity: d["amount"].as_str().map(parse_f64).unwrap_or(0.0),
                        side: if d["type"].as_str() == Some("sell") { TradeSide::Sell } else { TradeSide::Buy },
                        timestamp: d["created_at"].as_i64().unwrap_or_else(now_ms),
                    }));
                }
                Ok(events)
            }
            _ => Ok(vec![ParsedEvent::Control]),
        }
    }
}

fn parse_levels(value: &Value) -> Vec<(f64, f64)> {
    value
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|lvl| {
                    let p = lvl.get(0)?.as_str()?;
                    let q = lvl.get(1)?.as_str()?;
                    Some((parse_f64(p), parse_f64(q)))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_depth_update() {
        let spec = Coinex::new();
        let raw = r#"{"method":"depth.update","params":[true,{"bids":[["42000","1"]],"asks":[["42010","1"]]},"BTCUSDT"],"id":null}"#;
        let events = spec.parse_message(raw).unwrap();
        assert!(matches!(events[0], ParsedEvent::OrderBookSnapshot { .. }));
    }
}
