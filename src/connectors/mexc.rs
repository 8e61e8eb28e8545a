//! MEXC USDT-margined futures (`contract.mexc.com`).
//!
//! REST: https://mexcdevelop.github.io/apidocs/contract_v1_en/
//! WS: wss://contract.mexc.com/edge — `sub.deal`/`sub.depth` methods,
//! `push.deal`/`push.depth` pushes, `{"method":"ping"}` keepalive.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::canonical;
use crate::connectors::connector::Credential;
use crate::connectors::http::get_json;
use crate::connectors::spec::{ParsedEvent, VenueSpec};
use crate::error::{EngineError, Result};
use crate::model::{AssetInfo, FundingRate, Instrument, OrderBook, PriceLevel, PriceTicker, Trade, TradeSide, VenueId};
use crate::util::now_ms;

const REST_BASE: &str = "https://contract.mexc.com";
const WS_BASE: &str = "wss://contract.mexc.com/edge";

pub struct Mexc;

impl Mexc {
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
    state: i64,
    #[serde(rename = "baseCoin")]
    base_coin: String,
    #[serde(rename = "quoteCoin")]
    quote_coin: String,
    #[serde(rename = "priceUnit")]
    price_unit: f64,
    #[serde(rename = "volUnit")]
    vol_unit: f64,
    #[serde(rename = "contractSize")]
    contract_size: f64,
    #[serde(rename = "makerFeeRate")]
    maker_fee_rate: f64,
    #[serde(rename = "takerFeeRate")]
    taker_fee_rate: f64,
}

#[derive(Deserialize)]
struct TickerEntry {
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: f64,
    #[serde(rename = "bid1")]
    bid1: f64,
    #[serde(rename = "ask1")]
    ask1: f64,
    volume24: f64,
    #[serde(rename = "fundingRate")]
    funding_rate: f64,
}

#[derive(Deserialize)]
struct FundingEntry {
    symbol: String,
    #[serde(rename = "fundingRate")]
    funding_rate: f64,
    #[serde(rename = "nextSettleTime")]
    next_settle_time: i64,
}

#[derive(Deserialize)]
struct DepthEntry {
    bids: Vec<[f64; 3]>,
    asks: Vec<[f64; 3]>,
    version: u64,
    timestamp: i64,
}

#[async_trait]
impl VenueSpec for Mexc {
    fn id(&self) -> VenueId {
        VenueId::Mexc
    }

    fn ws_url(&self) -> &'static str {
        WS_BASE
    }

    fn rest_base_url(&self) -> &'static str {
        REST_BASE
    }

    async fn fetch_instruments(&self, http: &reqwest::Client) -> Result<Vec<Instrument>> {
        let resp: Envelope<Vec<ContractEntry>> =
            get_json(http, &format!("{REST_BASE}/api/v1/contract/detail")).await?;

        Ok(resp
            .data
            .into_iter()
            .filter(|c| c.state == 0)
            .filter_map(|c| {
                let canonical = canonical::to_canonical(VenueId::Mexc, &c.symbol)?;
                Some(Instrument {
                    venue: VenueId::Mexc,
                    venue_symbol: c.symbol,
                    canonical,
                    base: c.base_coin,
                    quote: c.quote_coin,
                    tick_size: c.price_unit,
                    lot_size: c.vol_unit,
                    contract_multiplier: c.contract_size,
                    maker_fee: c.maker_fee_rate,
                    taker_fee: c.taker_fee_rate,
                    min_notional: 1.0,
                })
            })
            .collect())
    }

    async fn fetch_price_tickers(&self, http: &reqwest::Client) -> Result<Vec<PriceTicker>> {
        let resp: Envelope<Vec<TickerEntry>> = get_json(http, &format!("{REST_BASE}/api/v1/contract/ticker")).await?;
        let now = now_ms();
        Ok(resp
            .data
            .into_iter()
            .filter_map(|t| {
                let canonical = canonical::to_canonical(VenueId::Mexc, &t.symbol)?;
                Some(PriceTicker {
                    venue: VenueId::Mexc,
                    venue_symbol: t.symbol,
                    canonical,
                    last: Some(t.last_price),
                    bid: Some(t.bid1),
                    ask: Some(t.ask1),
                    volume_24h: t.volume24,
                    timestamp: now,
                })
            })
            .collect())
    }

    async fn fetch_funding_rates(&self, http: &reqwest::Client) -> Result<Vec<FundingRate>> {
        let instruments = self.fetch_instruments(http).await?;
        let mut out = Vec::with_capacity(instruments.len());
        for inst in instruments {
            let url = format!("{REST_BASE}/api/v1/contract/funding_rate/{}", inst.venue_symbol);
            if let Ok(resp) = get_json::<Envelope<FundingEntry>>(http, &url).await {
                out.push(FundingRate {
                    venue: VenueId::Mexc,
                    venue_symbol: resp.data.symbol,
                    rate: resp.data.funding_rate,
                    next_funding_time: resp.data.next_settle_time,
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
        let limit = depth.clamp(5, 100);
        let url = format!("{REST_BASE}/api/v1/contract/depth/{venue_symbol}?limit={limit}");
        let resp: Envelope<DepthEntry> = get_json(http, &url).await?;
        let canonical = canonical::to_canonical(VenueId::Mexc, venue_symbol)
            .ok_or_else(|| EngineError::Parse(format!("unrecognized mexc symbol {venue_symbol}")))?;

        Ok(OrderBook {
            venue: VenueId::Mexc,
            venue_symbol: venue_symbol.to_string(),
            canonical,
            bids: resp.data.bids.iter().map(|[p, q, _]| PriceLevel { price: *p, quantity: *q }).collect(),
            asks: resp.data.asks.iter().map(|[p, q, _]| PriceLevel { price: *p, quantity: *q }).collect(),
            sequence_id: Some(resp.data.version),
            timestamp: resp.data.timestamp,
            is_snapshot: true,
        })
    }

    fn build_subscribe_message(&self, venue_symbols: &[String]) -> Value {
        // MEXC's futures WS takes one symbol per `sub.*` call; the engine
        // sends a batched array and the connector fans it out per-symbol.
        json!({
            "method": "sub.batch",
            "param": {
                "channels": venue_symbols.iter().flat_map(|s| vec![
                    json!({ "method": "sub.deal", "param": { "symbol": s } }),
                    json!({ "method": "sub.depth", "param": { "symbol": s } }),
                ]).collect::<Vec<_>>()
            }
        })
    }

    fn build_unsubscribe_message(&self, venue_symbols: &[String]) -> Value {
        json!({
            "method": "unsub.batch",
            "param": {
                "channels": venue_symbols.iter().flat_map(|s| vec![
                    json!({ "method": "unsub.deal", "param": { "symbol": s } }),
                    json!({ "method": "unsub.depth", "param": { "symbol": s } }),
                ]).collect::<Vec<_>>()
            }
        })
    }

    fn heartbeat_payload(&self) -> Option<String> {
        Some(json!({ "method": "ping" }).to_string())
    }

    fn parse_message(&self, raw: &str) -> Result<Vec<ParsedEvent>> {
        let v: Value = serde_json::from_str(raw).map_err(|e| EngineError::Parse(e.to_string()))?;

        let channel = match v.get("channel").and_then(|c| c.as_str()) {
            Some(c) => c,
            None => return Ok(vec![ParsedEvent::Control]),
        };

        let symbol = v.get("symbol").and_then(|s| s.as_str()).unwrap_or_default().to_string();

        match channel {
            "push.deal" => {
                let trades = v.get("data").and_then(|d| d.as_array()).cloned().unwrap_or_default();
                let mut events = Vec::with_capacity(trades.len());
                for t in trades {
                    let Some(canonical) = canonical::to_canonical(VenueId::Mexc, &symbol) else { continue };
                    events.push(ParsedEvent::Trade(Trade {
                        venue: VenueId::Mexc,
                        venue_symbol: symbol.clone(),
                        canonical,
                        price: t["p"].as_f64().unwrap_or(0.0),
                        quantity: t["v"].as_f64().unwrap_or(0.0),
                        side: if t["T"].as_i64() == Some(2) { TradeSide::Sell } else { TradeSide::Buy },
                        timestamp: t["t"].as_i64().unwrap_or_else(now_ms),
                    }));
                }
                Ok(events)
            }
            "push.depth" => {
                let data = v.get("data").cloned().unwrap_or(Value::Null);
                let bids = parse_levels(&data["bids"]);
                let asks = parse_levels(&data["asks"]);
                let sequence_id = data.get("version").and_then(|s| s.as_u64());
                let timestamp = v.get("ts").and_then(|t| t.as_i64()).unwrap_or_else(now_ms);
                Ok(vec![ParsedEvent::OrderBookDelta { venue_symbol: symbol, bids, asks, sequence_id, timestamp }])
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
    fn parses_deal_push() {
        let spec = Mexc::new();
        let raw = r#"{"channel":"push.deal","symbol":"BTC_USDT","data":[{"p":42005.0,"v":0.1,"T":2,"t":1700000000000}]}"#;
        let events = spec.parse_message(raw).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn parses_depth_push() {
        let spec = Mexc::new();
        let raw = r#"{"channel":"push.depth","symbol":"BTC_USDT","ts":1700000000000,"data":{"version":5,"bids":[[42000.0,1.0]],"asks":[[42010.0,1.0]]}}"#;
        let events = spec.parse_message(raw).unwrap();
        assert!(matches!(events[0], ParsedEvent::OrderBookDelta { .. }));
    }
}
