//! BingX USDT-M perpetual futures (swap v2 API).
//!
//! REST: https://bingx-api.github.io/docs/#/en-us/swapV2/market-api
//! WS: wss://open-api-swap.bingx.com/swap-market — gzip-compressed binary
//! frames (inflated in `decode_binary_frame` below) carrying the same JSON
//! bodies as every other venue once decompressed; `Ping`/`Pong` text
//! frames outside the gzip envelope for keepalive.

use std::io::Read;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::canonical;
use crate::connectors::connector::Credential;
use crate::connectors::http::{get_json, parse_f64};
use crate::connectors::spec::{ParsedEvent, VenueSpec};
use crate::error::{EngineError, Result};
use crate::model::{AssetInfo, FundingRate, Instrument, OrderBook, PriceLevel, PriceTicker, Trade, TradeSide, VenueId};
use crate::util::now_ms;

const REST_BASE: &str = "https://open-api.bingx.com";
const WS_BASE: &str = "wss://open-api-swap.bingx.com/swap-market";

pub struct Bingx;

impl Bingx {
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
    status: i64,
    #[serde(rename = "asset")]
    asset: String,
    #[serde(rename = "currency")]
    currency: String,
    #[serde(rename = "pricePrecision")]
    price_precision: i32,
    #[serde(rename = "quantityPrecision")]
    quantity_precision: i32,
    #[serde(rename = "tradeMinQuantity")]
    trade_min_quantity: f64,
    #[serde(rename = "makerFeeRate")]
    maker_fee_rate: f64,
    #[serde(rename = "takerFeeRate")]
    taker_fee_rate: f64,
}

#[derive(Deserialize)]
struct TickerEntry {
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: String,
    #[serde(rename = "bidPrice")]
    bid_price: Option<String>,
    #[serde(rename = "askPrice")]
    ask_price: Option<String>,
    volume: String,
}

#[derive(Deserialize)]
struct FundingEntry {
    symbol: String,
    #[serde(rename = "lastFundingRate")]
    last_funding_rate: String,
    #[serde(rename = "nextFundingTime")]
    next_funding_time: i64,
}

#[derive(Deserialize)]
struct DepthEntry {
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
    #[serde(rename = "T")]
    t: i64,
}

#[async_trait]
impl VenueSpec for Bingx {
    fn id(&self) -> VenueId {
        VenueId::Bingx
    }

    fn ws_url(&self) -> &'static str {
        WS_BASE
    }

    fn rest_base_url(&self) -> &'static str {
        REST_BASE
    }

    async fn fetch_instruments(&self, http: &reqwest::Client) -> Result<Vec<Instrument>> {
        let resp: Envelope<Vec<ContractEntry>> =
            get_json(http, &format!("{REST_BASE}/openApi/swap/v2/quote/contracts")).await?;

        Ok(resp
            .data
            .into_iter()
            .filter(|c| c.status == 1)
            .filter_map(|c| {
                let canonical = canonical::to_canonical(VenueId::Bingx, &c.symbol)?;
                Some(Instrument {
                    venue: VenueId::Bingx,
                    venue_symbol: c.symbol,
                    canonical,
                    base: c.asset,
                    quote: c.currency,
                    tick_size: 10f64.powi(-c.price_precision),
                    lot_size: 10f64.powi(-c.quantity_precision),
                    contract_multiplier: 1.0,
                    maker_fee: c.maker_fee_rate,
                    taker_fee: c.taker_fee_rate,
                    min_notional: c.trade_min_quantity,
                })
            })
            .collect())
    }

    async fn fetch_price_tickers(&self, http: &reqwest::Client) -> Result<Vec<PriceTicker>> {
        let resp: Envelope<Vec<TickerEntry>> =
            get_json(http, &format!("{REST_BASE}/openApi/swap/v2/quote/ticker")).await?;
        let now = now_ms();
        Ok(resp
            .data
            .into_iter()
            .filter_map(|t| {
                let canonical = canonical::to_canonical(VenueId::Bingx, &t.symbol)?;
                Some(PriceTicker {
                    venue: VenueId::Bingx,
                    venue_symbol: t.symbol,
                    canonical,
                    last: Some(parse_f64(&t.last_price)),
                    bid: t.bid_price.as_deref().map(parse_f64),
                    ask: t.ask_price.as_deref().map(parse_f64),
                    volume_24h: parse_f64(&t.volume),
                    timestamp: now,
                })
            })
            .collect())
    }

    async fn fetch_funding_rates(&self, http: &reqwest::Client) -> Result<Vec<FundingRate>> {
        let resp: Envelope<Vec<FundingEntry>> =
            get_json(http, &format!("{REST_BASE}/openApi/swap/v2/quote/premiumIndex")).await?;
        let now = now_ms();
        Ok(resp
            .data
            .into_iter()
            .map(|f| FundingRate {
                venue: VenueId::Bingx,
                venue_symbol: f.symbol,
                rate: parse_f64(&f.last_funding_rate),
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
        let limit = depth.clamp(5, 1000);
        let url = format!("{REST_BASE}/openApi/swap/v2/quote/depth?symbol={venue_symbol}&limit={limit}");
        let resp: Envelope<DepthEntry> = get_json(http, &url).await?;
        let canonical = canonical::to_canonical(VenueId::Bingx, venue_symbol)
            .ok_or_else(|| EngineError::Parse(format!("unrecognized bingx symbol {venue_symbol}")))?;

        Ok(OrderBook {
            venue: VenueId::Bingx,
            venue_symbol: venue_symbol.to_string(),
            canonical,
            bids: resp.data.bids.iter().map(|[p, q]| PriceLevel { price: parse_f64(p), quantity: parse_f64(q) }).collect(),
            asks: resp.data.asks.iter().map(|[p, q]| PriceLevel { price: parse_f64(p), quantity: parse_f64(q) }).collect(),
            sequence_id: None,
            timestamp: resp.data.t,
            is_snapshot: true,
        })
    }

    fn build_subscribe_message(&self, venue_symbols: &[String]) -> Value {
        json!({
            "id": now_ms().to_string(),
            "reqType": "sub",
            "dataType": venue_symbols.iter().map(|s| format!("{s}@depth20")).collect::<Vec<_>>().join(",")
        })
    }

    fn build_unsubscribe_message(&self, venue_symbols: &[String]) -> Value {
        json!({
            "id": now_ms().to_string(),
            "reqType": "unsub",
            "dataType": venue_symbols.iter().map(|s| format!("{s}@depth20")).collect::<Vec<_>>().join(",")
        })
    }

    fn heartbeat_payload(&self) -> Option<String> {
        Some(json!({ "ping": now_ms() }).to_string())
    }

    fn decode_binary_frame(&self, bytes: &[u8]) -> Result<Option<String>> {
        let mut text = String::new();
        GzDecoder::new(bytes)
            .read_to_string(&mut text)
            .map_err(|e| EngineError::Parse(format!("gzip inflate failed: {e}")))?;
        Ok(Some(text))
    }

    fn parse_message(&self, raw: &str) -> Result<Vec<ParsedEvent>> {
        if raw == "Ping" {
            return Ok(vec![ParsedEvent::Reply("Pong".to_string())]);
        }
        if raw == "Pong" {
            return Ok(vec![ParsedEvent::Control]);
        }
        let v: Value = serde_json::from_str(raw).map_err(|e| EngineError::Parse(e.to_string()))?;

        let data_type = match v.get("dataType").and_then(|d| d.as_str()) {
            Some(d) => d,
            None => return Ok(vec![ParsedEvent::Control]),
        };

        let (symbol, kind) = match data_type.split_once('@') {
            Some((s, k)) => (s.to_string(), k),
            None => return Ok(vec![ParsedEvent::Control]),
        };

        let data = match v.get("data") {
            Some(d) => d,
            None => return Ok(vec![ParsedEvent::Control]),
        };

        if kind.starts_with("depth") {
            let bids = parse_levels(&data["bids"]);
            let asks = parse_levels(&data["asks"]);
            let timestamp = v.get("ts").and_then(|t| t.as_i64()).unwrap_or_else(now_ms);
            return Ok(vec![ParsedEvent::OrderBookSnapshot { venue_symbol: symbol, bids, asks, sequence_id: None, timestamp }]);
        }

        if kind == "trade" {
            let trades = data.as_array().cloned().unwrap_or_default();
            let mut events = Vec::with_capacity(trades.len());
            for t in trades {
                let Some(canonical) = canonical::to_canonical(VenueId::Bingx, &symbol) else { continue };
                events.push(ParsedEvent::Trade(Trade {
                    venue: VenueId::Bingx,
                    venue_symbol: symbol.clone(),
                    canonical,
                    price: t["p"].as_str().map(parse_f64).unwrap_or(0.0),
                    quantity: t["q"].as_str().map(parse_f64).unwrap_or(0.0),
                    side: if t["m"].as_bool().unwrap_or(false) { TradeSide::Sell } else { TradeSide::Buy },
                    timestamp: t["T"].as_i64().unwrap_or_else(now_ms),
                }));
            }
            return Ok(events);
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
    fn parses_depth_frame() {
        let spec = Bingx::new();
        let raw = r#"{"dataType":"BTC-USDT@depth20","ts":1700000000000,"data":{"bids":[["42000","1"]],"asks":[["42010","1"]]}}"#;
        let events = spec.parse_message(raw).unwrap();
        assert!(matches!(events[0], ParsedEvent::OrderBookSnapshot { .. }));
    }
}
