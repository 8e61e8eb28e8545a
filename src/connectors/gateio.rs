//! Gate.io USDT-settled perpetual futures.
//!
//! REST: https://www.gate.io/docs/developers/apiv4/en/#futures
//! WS: wss://fx-ws.gateio.ws/v4/ws/usdt — `futures.order_book_update` and
//! `futures.trades` channels, envelope shape `{time, channel, event,
//! payload}` shared with the spot API the teacher already speaks.

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

const REST_BASE: &str = "https://api.gateio.ws";
const WS_BASE: &str = "wss://fx-ws.gateio.ws/v4/ws/usdt";

pub struct Gateio;

impl Gateio {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Deserialize)]
struct ContractEntry {
    name: String,
    in_delisting: bool,
    #[serde(rename = "order_price_round")]
    order_price_round: String,
    #[serde(rename = "order_size_min")]
    order_size_min: f64,
    #[serde(rename = "quanto_multiplier")]
    quanto_multiplier: String,
    #[serde(rename = "maker_fee_rate")]
    maker_fee_rate: String,
    #[serde(rename = "taker_fee_rate")]
    taker_fee_rate: String,
    #[serde(rename = "funding_rate")]
    funding_rate: String,
    #[serde(rename = "funding_next_apply")]
    funding_next_apply: i64,
}

#[derive(Deserialize)]
struct TickerEntry {
    contract: String,
    last: String,
    #[serde(rename = "highest_bid")]
    highest_bid: Option<String>,
    #[serde(rename = "lowest_ask")]
    lowest_ask: Option<String>,
    volume_24h: String,
}

#[derive(Deserialize)]
struct DepthEntry {
    id: u64,
    current: f64,
    bids: Vec<GateLevel>,
    asks: Vec<GateLevel>,
}

#[derive(Deserialize)]
struct GateLevel {
    p: String,
    s: f64,
}

#[async_trait]
impl VenueSpec for Gateio {
    fn id(&self) -> VenueId {
        VenueId::Gateio
    }

    fn ws_url(&self) -> &'static str {
        WS_BASE
    }

    fn rest_base_url(&self) -> &'static str {
        REST_BASE
    }

    async fn fetch_instruments(&self, http: &reqwest::Client) -> Result<Vec<Instrument>> {
        let resp: Vec<ContractEntry> =
            get_json(http, &format!("{REST_BASE}/api/v4/futures/usdt/contracts")).await?;

        Ok(resp
            .into_iter()
            .filter(|c| !c.in_delisting)
            .filter_map(|c| {
                let canonical = canonical::to_canonical(VenueId::Gateio, &c.name)?;
                let (base, quote) = canonical.strip_suffix("-PERP")?.split_once('-')?;
                Some(Instrument {
                    venue: VenueId::Gateio,
                    venue_symbol: c.name,
                    canonical,
                    base: base.to_string(),
                    quote: quote.to_string(),
                    tick_size: parse_f64(&c.order_price_round),
                    lot_size: c.order_size_min,
                    contract_multiplier: parse_f64(&c.quanto_multiplier),
                    maker_fee: parse_f64(&c.maker_fee_rate),
                    taker_fee: parse_f64(&c.taker_fee_rate),
                    min_notional: 1.0,
                })
            })
            .collect())
    }

    async fn fetch_price_tickers(&self, http: &reqwest::Client) -> Result<Vec<PriceTicker>> {
        let resp: Vec<TickerEntry> = get_json(http, &format!("{REST_BASE}/api/v4/futures/usdt/tickers")).await?;
        let now = now_ms();
        Ok(resp
            .into_iter()
            .filter_map(|t| {
                let canonical = canonical::to_canonical(VenueId::Gateio, &t.contract)?;
                Some(PriceTicker {
                    venue: VenueId::Gateio,
                    venue_symbol: t.contract,
                    canonical,
                    last: Some(parse_f64(&t.last)),
                    bid: t.highest_bid.as_deref().map(parse_f64),
                    ask: t.lowest_ask.as_deref().map(parse_f64),
                    volume_24h: parse_f64(&t.volume_24h),
                    timestamp: now,
                })
            })
            .collect())
    }

    async fn fetch_funding_rates(&self, http: &reqwest::Client) -> Result<Vec<FundingRate>> {
        let resp: Vec<ContractEntry> =
            get_json(http, &format!("{REST_BASE}/api/v4/futures/usdt/contracts")).await?;
        let now = now_ms();
        Ok(resp
            .into_iter()
            .map(|c| FundingRate {
                venue: VenueId::Gateio,
                venue_symbol: c.name,
                rate: parse_f64(&c.funding_rate),
                next_funding_time: c.funding_next_apply * 1000,
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
        let limit = depth.clamp(1, 100);
        let url = format!("{REST_BASE}/api/v4/futures/usdt/order_book?contract={venue_symbol}&limit={limit}");
        let resp: DepthEntry = get_json(http, &url).await?;
        let canonical = canonical::to_canonical(VenueId::Gateio, venue_symbol)
            .ok_or_else(|| EngineError::Parse(format!("unrecognized gateio symbol {venue_symbol}")))?;

        Ok(OrderBook {
            venue: VenueId::Gateio,
            venue_symbol: venue_symbol.to_string(),
            canonical,
            bids: resp.bids.iter().map(|l| PriceLevel { price: parse_f64(&l.p), quantity: l.s }).collect(),
            asks: resp.asks.iter().map(|l| PriceLevel { price: parse_f64(&l.p), quantity: l.s }).collect(),
            sequence_id: Some(resp.id),
            timestamp: (resp.current * 1000.0) as i64,
            is_snapshot: true,
        })
    }

    fn build_subscribe_message(&self, venue_symbols: &[String]) -> Value {
        json!({
            "time": now_ms() / 1000,
            "channel": "futures.order_book_update",
            "event": "subscribe",
            "payload": venue_symbols.iter().map(|s| json!([s, "100ms"])).collect::<Vec<_>>()
        })
    }

    fn build_unsubscribe_message(&self, venue_symbols: &[String]) -> Value {
        json!({
            "time": now_ms() / 1000,
            "channel": "futures.order_book_update",
            "event": "unsubscribe",
            "payload": venue_symbols.iter().map(|s| json!([s, "100ms"])).collect::<Vec<_>>()
        })
    }

    fn parse_message(&self, raw: &str) -> Result<Vec<ParsedEvent>> {
        let v: Value = serde_json::from_str(raw).map_err(|e| EngineError::Parse(e.to_string()))?;

        let channel = match v.get("channel").and_then(|c| c.as_str()) {
            Some(c) => c,
            None => return Ok(vec![ParsedEvent::Control]),
        };
        let event = v.get("event").and_then(|e| e.as_str()).unwrap_or("");
        if event != "update" {
            return Ok(vec![ParsedEvent::Control]);
        }

        let result = match v.get("result") {
            Some(r) => r,
            None => return Ok(vec![ParsedEvent::Control]),
        };

        match channel {
            "futures.order_book_update" => {
                let symbol = result.get("s").and_then(|s| s.as_str()).unwrap_or_default().to_string();
                let bids = parse_levels(&result["b"]);
                let asks = parse_levels(&result["a"]);
                let sequence_id = result.get("u").and_then(|u| u.as_u64());
                let timestamp = result.get("t").and_then(|t| t.as_i64()).unwrap_or_else(now_ms);
                Ok(vec![ParsedEvent::OrderBookDelta { venue_symbol: symbol, bids, asks, sequence_id, timestamp }])
            }
            "futures.trades" => {
                let trades = result.as_array().cloned().unwrap_or_default();
                let mut events = Vec::with_capacity(trades.len());
                for t in trades {
                    let symbol = t["contract"].as_str().unwrap_or_default().to_string();
                    let Some(canonical) = canonical::to_canonical(VenueId::Gateio, &symbol) else { continue };
                    let size = t["size"].as_f64().unwrap_or(0.0);
                    events.push(ParsedEvent::Trade(Trade {
                        venue: VenueId::Gateio,
                        venue_symbol: symbol,
                        canonical,
                        price: t["price"].as_str().map(parse_f64).unwrap_or(0.0),
                        quantity: size.abs(),
                        side: if size < 0.0 { TradeSide::Sell } else { TradeSide::Buy },
                        timestamp: t["create_time_ms"].as_i64().unwrap_or_else(now_ms),
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
                    let p = lvl.get("p")?.as_str()?;
                    let q = lvl.get("s")?.as_f64()?;
                    Some((parse_f64(p), q))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_order_book_update() {
        let spec = Gateio::new();
        let raw = r#"{"time":1700000000,"channel":"futures.order_book_update","event":"update","result":{"s":"BTC_USDT","t":1700000000000,"u":5,"b":[{"p":"42000","s":1.0}],"a":[{"p":"42010","s":1.0}]}}"#;
        let events = spec.parse_message(raw).unwrap();
        assert!(matches!(events[0], ParsedEvent::OrderBookDelta { .. }));
    }
}
