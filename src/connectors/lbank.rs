//! LBank perpetual futures (`cf` API).
//!
//! REST: https://www.lbank.com/en-US/docs/index.html#futures
//! WS: wss://lbkperp.lbank.com/ws/V2 — `{"action":"subscribe","subscribe":
//! "depth"|"trade","pair":...}`, lowercased `base_quote` pairs throughout.

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

const REST_BASE: &str = "https://lbkperp.lbank.com";
const WS_BASE: &str = "wss://lbkperp.lbank.com/ws/V2";

pub struct Lbank;

impl Lbank {
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
    #[serde(rename = "symbol")]
    symbol: String,
    #[serde(rename = "baseCurrency")]
    base_currency: String,
    #[serde(rename = "quoteCurrency")]
    quote_currency: String,
    #[serde(rename = "priceTickSize")]
    price_tick_size: f64,
    #[serde(rename = "minQty")]
    min_qty: f64,
    #[serde(rename = "makerFee")]
    maker_fee: f64,
    #[serde(rename = "takerFee")]
    taker_fee: f64,
}

#[derive(Deserialize)]
struct TickerEntry {
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: f64,
    #[serde(rename = "bidPrice")]
    bid_price: Option<f64>,
    #[serde(rename = "askPrice")]
    ask_price: Option<f64>,
    volume: f64,
}

#[derive(Deserialize)]
struct FundingEntry {
    symbol: String,
    #[serde(rename = "fundingRate")]
    funding_rate: f64,
    #[serde(rename = "nextFundingTime")]
    next_funding_time: i64,
}

#[derive(Deserialize)]
struct DepthEntry {
    bids: Vec<[f64; 2]>,
    asks: Vec<[f64; 2]>,
    timestamp: i64,
}

#[async_trait]
impl VenueSpec for Lbank {
    fn id(&self) -> VenueId {
        VenueId::Lbank
    }

    fn ws_url(&self) -> &'static str {
        WS_BASE
    }

    fn rest_base_url(&self) -> &'static str {
        REST_BASE
    }

    async fn fetch_instruments(&self, http: &reqwest::Client) -> Result<Vec<Instrument>> {
        let resp: Envelope<Vec<ContractEntry>> =
            get_json(http, &format!("{REST_BASE}/cfd/openApi/v1/pub/instrument")).await?;

        Ok(resp
            .data
            .into_iter()
            .filter_map(|c| {
                let canonical = canonical::to_canonical(VenueId::Lbank, &c.symbol)?;
                Some(Instrument {
                    venue: VenueId::Lbank,
                    venue_symbol: c.symbol,
                    canonical,
                    base: c.base_currency,
                    quote: c.quote_currency,
                    tick_size: c.price_tick_size,
                    lot_size: c.min_qty,
                    contract_multiplier: 1.0,
                    maker_fee: c.maker_fee,
                    taker_fee: c.taker_fee,
                    min_notional: 1.0,
                })
            })
            .collect())
    }

    async fn fetch_price_tickers(&self, http: &reqwest::Client) -> Result<Vec<PriceTicker>> {
        let resp: Envelope<Vec<TickerEntry>> =
            get_json(http, &format!("{REST_BASE}/cfd/openApi/v1/pub/ticker")).await?;
        let now = now_ms();
        Ok(resp
            .data
            .into_iter()
            .filter_map(|t| {
                let canonical = canonical::to_canonical(VenueId::Lbank, &t.symbol)?;
                Some(PriceTicker {
                    venue: VenueId::Lbank,
                    venue_symbol: t.symbol,
                    canonical,
                    last: Some(t.last_price),
                    bid: t.bid_price,
                    ask: t.ask_price,
                    volume_24h: t.volume,
                    timestamp: now,
                })
            })
            .collect())
    }

    async fn fetch_funding_rates(&self, http: &reqwest::Client) -> Result<Vec<FundingRate>> {
        let resp: Envelope<Vec<FundingEntry>> =
            get_json(http, &format!("{REST_BASE}/cfd/openApi/v1/pub/fundingRate")).await?;
        let now = now_ms();
        Ok(resp
            .data
            .into_iter()
            .map(|f| FundingRate {
                venue: VenueId::Lbank,
                venue_symbol: f.symbol,
                rate: f.funding_rate,
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
        let limit = depth.clamp(5, 100);
        let url = format!("{REST_BASE}/cfd/openApi/v1/pub/depth?symbol={venue_symbol}&size={limit}");
        let resp: Envelope<DepthEntry> = get_json(http, &url).await?;
        let canonical = canonical::to_canonical(VenueId::Lbank, venue_symbol)
            .ok_or_else(|| EngineError::Parse(format!("unrecognized lbank symbol {venue_symbol}")))?;

        Ok(OrderBook {
            venue: VenueId::Lbank,
            venue_symbol: venue_symbol.to_string(),
            canonical,
            bids: resp.data.bids.iter().map(|[p, q]| PriceLevel { price: *p, quantity: *q }).collect(),
            asks: resp.data.asks.iter().map(|[p, q]| PriceLevel { price: *p, quantity: *q }).collect(),
            sequence_id: None,
            timestamp: resp.data.timestamp,
            is_snapshot: true,
        })
    }

    fn build_subscribe_message(&self, venue_symbols: &[String]) -> Value {
        json!({
            "action": "subscribe",
            "subscribe": "depth",
            "pair": venue_symbols,
            "depth": 20
        })
    }

    fn build_unsubscribe_message(&self, venue_symbols: &[String]) -> Value {
        json!({
            "action": "unsubscribe",
            "subscribe": "depth",
            "pair": venue_symbols
        })
    }

    fn heartbeat_payload(&self) -> Option<String> {
        Some(json!({ "action": "ping", "ping": now_ms().to_string() }).to_string())
    }

    fn parse_message(&self, raw: &str) -> Result<Vec<ParsedEvent>> {
        let v: Value = serde_json::from_str(raw).map_err(|e| EngineError::Parse(e.to_string()))?;

        let kind = match v.get("type").and_then(|t| t.as_str()) {
            Some(t) => t,
            None => return Ok(vec![ParsedEvent::Control]),
        };

        let symbol = v.get("pair").and_then(|p| p.as_str()).unwrap_or_default().to_string();

        match kind {
            "depth" => {
                let depth = v.get("depth").cloned().unwrap_or(Value::Null);
                let bids = parse_levels(&depth["bids"]);
                let asks = parse_levels(&depth["asks"]);
                let timestamp = v.get("TS").and_then(|t| t.as_i64()).unwrap_or_else(now_ms);
                Ok(vec![ParsedEvent::OrderBookSnapshot { venue_symbol: symbol, bids, asks, sequence_id: None, timestamp }])
            }
            "trade" => {
                let Some(canonical) = canonical::to_canonical(VenueId::Lbank, &symbol) else { return Ok(vec![]) };
                let trade = v.get("trade").cloned().unwrap_or(Value::Null);
                Ok(vec![ParsedEvent::Trade(Trade {
                    venue: VenueId::Lbank,
                    venue_symbol: symbol,
                    canonical,
                    price: trade["price"].as_f64().unwrap_or(0.0),
                    quantity: trade["volume"].as_f64().unwrap_or(0.0),
                    side: if trade["direction"].as_str() == Some("sell") { TradeSide::Sell } else { TradeSide::Buy },
                    timestamp: v.get("TS").and_then(|t| t.as_i64()).unwrap_or_else(now_ms),
                })])
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
    fn parses_depth_frame() {
        let spec = Lbank::new();
        let raw = r#"{"type":"depth","pair":"btc_usdt","TS":1700000000000,"depth":{"bids":[[42000.0,1.0]],"asks":[[42010.0,1.0]]}}"#;
        let events = spec.parse_message(raw).unwrap();
        assert!(matches!(events[0], ParsedEvent::OrderBookSnapshot { .. }));
    }
}
