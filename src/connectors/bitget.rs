//! Bitget USDT-M perpetual futures.
//!
//! REST: https://www.bitget.com/api-doc/contract/market/Get-All-Symbols
//! WS: wss://ws.bitget.com/v2/ws/public — `{"op":"subscribe","args":[{"instType":"USDT-FUTURES","channel":"books","instId":...}]}`.

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

const REST_BASE: &str = "https://api.bitget.com";
const WS_BASE: &str = "wss://ws.bitget.com/v2/ws/public";
const INST_TYPE: &str = "USDT-FUTURES";

pub struct Bitget;

impl Bitget {
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
    #[serde(rename = "baseCoin")]
    base_coin: String,
    #[serde(rename = "quoteCoin")]
    quote_coin: String,
    #[serde(rename = "pricePlace")]
    price_place: String,
    #[serde(rename = "sizeMultiplier")]
    size_multiplier: String,
    #[serde(rename = "makerFeeRate")]
    maker_fee_rate: String,
    #[serde(rename = "takerFeeRate")]
    taker_fee_rate: String,
    #[serde(rename = "minTradeUSDT")]
    min_trade_usdt: String,
    #[serde(rename = "symbolStatus")]
    symbol_status: String,
}

#[derive(Deserialize)]
struct TickerEntry {
    symbol: String,
    #[serde(rename = "lastPr")]
    last_pr: String,
    #[serde(rename = "bidPr")]
    bid_pr: String,
    #[serde(rename = "askPr")]
    ask_pr: String,
    #[serde(rename = "baseVolume")]
    base_volume: String,
    #[serde(rename = "fundingRate")]
    funding_rate: String,
    #[serde(rename = "nextFundingTime")]
    next_funding_time: String,
}

#[derive(Deserialize)]
struct DepthEntry {
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
    ts: String,
    seq: Option<u64>,
}

#[async_trait]
impl VenueSpec for Bitget {
    fn id(&self) -> VenueId {
        VenueId::Bitget
    }

    fn ws_url(&self) -> &'static str {
        WS_BASE
    }

    fn rest_base_url(&self) -> &'static str {
        REST_BASE
    }

    async fn fetch_instruments(&self, http: &reqwest::Client) -> Result<Vec<Instrument>> {
        let url = format!("{REST_BASE}/api/v2/mix/market/contracts?productType={INST_TYPE}");
        let resp: Envelope<Vec<ContractEntry>> = get_json(http, &url).await?;

        Ok(resp
            .data
            .into_iter()
            .filter(|c| c.symbol_status == "normal")
            .filter_map(|c| {
                let canonical = canonical::to_canonical(VenueId::Bitget, &c.symbol)?;
                let tick_size = 10f64.powi(-(c.price_place.parse::<i32>().unwrap_or(2)));
                Some(Instrument {
                    venue: VenueId::Bitget,
                    venue_symbol: c.symbol,
                    canonical,
                    base: c.base_coin,
                    quote: c.quote_coin,
                    tick_size,
                    lot_size: parse_f64(&c.size_multiplier),
                    contract_multiplier: 1.0,
                    maker_fee: parse_f64(&c.maker_fee_rate),
                    taker_fee: parse_f64(&c.taker_fee_rate),
                    min_notional: parse_f64(&c.min_trade_usdt),
                })
            })
            .collect())
    }

    async fn fetch_price_tickers(&self, http: &reqwest::Client) -> Result<Vec<PriceTicker>> {
        let url = format!("{REST_BASE}/api/v2/mix/market/tickers?productType={INST_TYPE}");
        let resp: Envelope<Vec<TickerEntry>> = get_json(http, &url).await?;
        let now = now_ms();
        Ok(resp
            .data
            .into_iter()
            .filter_map(|t| {
                let canonical = canonical::to_canonical(VenueId::Bitget, &t.symbol)?;
                Some(PriceTicker {
                    venue: VenueId::Bitget,
                    venue_symbol: t.symbol,
                    canonical,
                    last: Some(parse_f64(&t.last_pr)),
                    bid: Some(parse_f64(&t.bid_pr)),
                    ask: Some(parse_f64(&t.ask_pr)),
                    volume_24h: parse_f64(&t.base_volume),
                    timestamp: now,
                })
            })
            .collect())
    }

    async fn fetch_funding_rates(&self, http: &reqwest::Client) -> Result<Vec<FundingRate>> {
        let url = format!("{REST_BASE}/api/v2/mix/market/tickers?productType={INST_TYPE}");
        let resp: Envelope<Vec<TickerEntry>> = get_json(http, &url).await?;
        let now = now_ms();
        Ok(resp
            .data
            .into_iter()
            .map(|t| FundingRate {
                venue: VenueId::Bitget,
                venue_symbol: t.symbol,
                rate: parse_f64(&t.funding_rate),
                next_funding_time: t.next_funding_time.parse().unwrap_or(0),
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
        let url = format!(
            "{REST_BASE}/api/v2/mix/market/merge-depth?symbol={venue_symbol}&productType={INST_TYPE}&limit={limit}"
        );
        let resp: Envelope<DepthEntry> = get_json(http, &url).await?;
        let canonical = canonical::to_canonical(VenueId::Bitget, venue_symbol)
            .ok_or_else(|| EngineError::Parse(format!("unrecognized bitget symbol {venue_symbol}")))?;

        Ok(OrderBook {
            venue: VenueId::Bitget,
            venue_symbol: venue_symbol.to_string(),
            canonical,
            bids: resp.data.bids.iter().map(|[p, q]| PriceLevel { price: parse_f64(p), quantity: parse_f64(q) }).collect(),
            asks: resp.data.asks.iter().map(|[p, q]| PriceLevel { price: parse_f64(p), quantity: parse_f64(q) }).collect(),
            sequence_id: resp.data.seq,
            timestamp: parse_f64(&resp.data.ts) as i64,
            is_snapshot: true,
        })
    }

    fn build_subscribe_message(&self, venue_symbols: &[String]) -> Value {
        let args: Vec<Value> = venue_symbols
            .iter()
            .flat_map(|s| {
                vec![
                    json!({ "instType": INST_TYPE, "channel": "books", "instId": s }),
                    json!({ "instType": INST_TYPE, "channel": "trade", "instId": s }),
                ]
            })
            .collect();
        json!({ "op": "subscribe", "args": args })
    }

    fn build_unsubscribe_message(&self, venue_symbols: &[String]) -> Value {
        let args: Vec<Value> = venue_symbols
            .iter()
            .flat_map(|s| {
                vec![
                    json!({ "instType": INST_TYPE, "channel": "books", "instId": s }),
                    json!({ "instType": INST_TYPE, "channel": "trade", "instId": s }),
                ]
            })
            .collect();
        json!({ "op": "unsubscribe", "args": args })
    }

    fn heartbeat_payload(&self) -> Option<String> {
        Some("ping".to_string()) // Bitget expects the literal unquoted text "ping", not a JSON frame.
    }

    fn parse_message(&self, raw: &str) -> Result<Vec<ParsedEvent>> {
        if raw == "pong" {
            return Ok(vec![ParsedEvent::Control]);
        }
        let v: Value = serde_json::from_str(raw).map_err(|e| EngineError::Parse(e.to_string()))?;

        if v.get("event").is_some() {
            return Ok(vec![ParsedEvent::Control]);
        }

        let arg = match v.get("arg") {
            Some(a) => a,
            None => return Ok(vec![ParsedEvent::Control]),
        };
        let channel = arg.get("channel").and_then(|c| c.as_str()).unwrap_or_default();
        let inst_id = arg.get("instId").and_then(|i| i.as_str()).unwrap_or_default().to_string();
        let action = v.get("action").and_then(|a| a.as_str()).unwrap_or("snapshot");
        let data = match v.get("data").and_then(|d| d.as_array()) {
            Some(d) => d,
            None => return Ok(vec![ParsedEvent::Control]),
        };

        match channel {
            "books" => {
                let Some(entry) = data.first() else { return Ok(vec![]) };
                let bids = parse_levels(&entry["bids"]);
                let asks = parse_levels(&entry["asks"]);
                let timestamp = entry.get("ts").and_then(|t| t.as_str()).and_then(|s| s.parse().ok()).unwrap_or_else(now_ms);
                let sequence_id = entry.get("seq").and_then(|s| s.as_u64());
                let event = if action == "snapshot" {
                    ParsedEvent::OrderBookSnapshot { venue_symbol: inst_id, bids, asks, sequence_id, timestamp }
                } else {
                    ParsedEvent::OrderBookDelta { venue_symbol: inst_id, bids, asks, sequence_id, timestamp }
                };
                Ok(vec![event])
            }
            "trade" => {
                let mut events = Vec::with_capacity(data.len());
                for t in data {
                    let Some(canonical) = canonical::to_canonical(VenueId::Bitget, &inst_id) else { continue };
                    events.push(ParsedEvent::Trade(Trade {
                        venue: VenueId::Bitget,
                        venue_symbol: inst_id.clone(),
                        canonical,
                        price: t["price"].as_str().map(parse_f64).unwrap_or(0.0),
                        quantity: t["size"].as_str().map(parse_f64).unwrap_or(0.0),
                        side: if t["side"].as_str() == Some("sell") { TradeSide::Sell } else { TradeSide::Buy },
                        timestamp: t["ts"].as_str().and_then(|s| s.parse().ok()).unwrap_or_else(now_ms),
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
    fn parses_books_snapshot() {
        let spec = Bitget::new();
        let raw = r#"{"arg":{"instType":"USDT-FUTURES","channel":"books","instId":"BTCUSDT_UMCBL"},"action":"snapshot","data":[{"bids":[["42000","1"]],"asks":[["42010","1"]],"ts":"1700000000000","seq":5}]}"#;
        let events = spec.parse_message(raw).unwrap();
        assert!(matches!(events[0], ParsedEvent::OrderBookSnapshot { .. }));
    }
}
