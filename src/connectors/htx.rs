//! HTX (formerly Huobi) USDT-margined perpetual swaps.
//!
//! REST: https://huobiapi.github.io/docs/usdt_swap/v1/en/
//! WS: wss://api.hbdm.com/linear-swap-ws — gzip-compressed binary frames
//! (inflated in `decode_binary_frame` below), `sub`/`unsub` verbs,
//! `ping`/`pong` keepalive that echoes the peer's timestamp back verbatim.

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

const REST_BASE: &str = "https://api.hbdm.com";
const WS_BASE: &str = "wss://api.hbdm.com/linear-swap-ws";

pub struct Htx;

impl Htx {
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
    contract_code: String,
    symbol: String,
    #[serde(rename = "trade_partition")]
    trade_partition: String,
    #[serde(rename = "price_tick")]
    price_tick: f64,
    #[serde(rename = "contract_size")]
    contract_size: f64,
    contract_status: i64,
}

#[derive(Deserialize)]
struct TickerEntry {
    contract_code: String,
    close: f64,
    bid: Option<[f64; 2]>,
    ask: Option<[f64; 2]>,
    vol: f64,
}

#[derive(Deserialize)]
struct FundingEntry {
    contract_code: String,
    #[serde(rename = "funding_rate")]
    funding_rate: String,
    #[serde(rename = "funding_time")]
    funding_time: String,
}

#[derive(Deserialize)]
struct DepthTick {
    bids: Vec<[f64; 2]>,
    asks: Vec<[f64; 2]>,
    ts: i64,
    version: Option<u64>,
}

#[derive(Deserialize)]
struct DepthEntry {
    tick: DepthTick,
}

#[async_trait]
impl VenueSpec for Htx {
    fn id(&self) -> VenueId {
        VenueId::Htx
    }

    fn ws_url(&self) -> &'static str {
        WS_BASE
    }

    fn rest_base_url(&self) -> &'static str {
        REST_BASE
    }

    async fn fetch_instruments(&self, http: &reqwest::Client) -> Result<Vec<Instrument>> {
        let resp: Envelope<Vec<ContractEntry>> =
            get_json(http, &format!("{REST_BASE}/linear-swap-api/v1/swap_contract_info?support_margin_mode=cross")).await?;

        Ok(resp
            .data
            .into_iter()
            .filter(|c| c.contract_status == 1)
            .filter_map(|c| {
                let canonical = canonical::to_canonical(VenueId::Htx, &c.contract_code)?;
                let (base, quote) = canonical.strip_suffix("-PERP")?.split_once('-')?;
                Some(Instrument {
                    venue: VenueId::Htx,
                    venue_symbol: c.contract_code,
                    canonical,
                    base: base.to_string(),
                    quote: quote.to_string(),
                    tick_size: c.price_tick,
                    lot_size: 1.0,
                    contract_multiplier: c.contract_size,
                    maker_fee: 0.0002,
                    taker_fee: 0.0004,
                    min_notional: 1.0,
                })
            })
            .collect())
    }

    async fn fetch_price_tickers(&self, http: &reqwest::Client) -> Result<Vec<PriceTicker>> {
        let resp: Envelope<Vec<TickerEntry>> =
            get_json(http, &format!("{REST_BASE}/linear-swap-ex/market/detail/merged?support_margin_mode=cross")).await?;
        let now = now_ms();
        Ok(resp
            .data
            .into_iter()
            .filter_map(|t| {
                let canonical = canonical::to_canonical(VenueId::Htx, &t.contract_code)?;
                Some(PriceTicker {
                    venue: VenueId::Htx,
                    venue_symbol: t.contract_code,
                    canonical,
                    last: Some(t.close),
                    bid: t.bid.map(|b| b[0]),
                    ask: t.ask.map(|a| a[0]),
                    volume_24h: t.vol,
                    timestamp: now,
                })
            })
            .collect())
    }

    async fn fetch_funding_rates(&self, http: &reqwest::Client) -> Result<Vec<FundingRate>> {
        let resp: Envelope<Vec<FundingEntry>> =
            get_json(http, &format!("{REST_BASE}/linear-swap-api/v1/swap_batch_funding_rate")).await?;
        let now = now_ms();
        Ok(resp
            .data
            .into_iter()
            .map(|f| FundingRate {
                venue: VenueId::Htx,
                venue_symbol: f.contract_code,
                rate: parse_f64(&f.funding_rate),
                next_funding_time: f.funding_time.parse().unwrap_or(0),
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
        let step = if depth <= 20 { "step0" } else { "step1" };
        let url = format!("{REST_BASE}/linear-swap-ex/market/depth?contract_code={venue_symbol}&type={step}");
        let resp: DepthEntry = get_json(http, &url).await?;
        let canonical = canonical::to_canonical(VenueId::Htx, venue_symbol)
            .ok_or_else(|| EngineError::Parse(format!("unrecognized htx symbol {venue_symbol}")))?;

        Ok(OrderBook {
            venue: VenueId::Htx,
            venue_symbol: venue_symbol.to_string(),
            canonical,
            bids: resp.tick.bids.iter().map(|[p, q]| PriceLevel { price: *p, quantity: *q }).collect(),
            asks: resp.tick.asks.iter().map(|[p, q]| PriceLevel { price: *p, quantity: *q }).collect(),
            sequence_id: resp.tick.version,
            timestamp: resp.tick.ts,
            is_snapshot: true,
        })
    }

    fn build_subscribe_message(&self, venue_symbols: &[String]) -> Value {
        // Real HTX wants one `sub` frame per topic; batched here as an array
        // and split into individual frames by the transport layer.
        let topics: Vec<String> = venue_symbols.iter().map(|s| format!("market.{s}.depth.step0")).collect();
        json!({ "subs": topics, "id": now_ms().to_string() })
    }

    fn build_unsubscribe_message(&self, venue_symbols: &[String]) -> Value {
        let topics: Vec<String> = venue_symbols.iter().map(|s| format!("market.{s}.depth.step0")).collect();
        json!({ "unsubs": topics, "id": now_ms().to_string() })
    }

    fn heartbeat_payload(&self) -> Option<String> {
        None // HTX's ping is peer-initiated and carries a server timestamp the connector echoes back below.
    }

    fn decode_binary_frame(&self, bytes: &[u8]) -> Result<Option<String>> {
        let mut text = String::new();
        GzDecoder::new(bytes)
            .read_to_string(&mut text)
            .map_err(|e| EngineError::Parse(format!("gzip inflate failed: {e}")))?;
        Ok(Some(text))
    }

    fn parse_message(&self, raw: &str) -> Result<Vec<ParsedEvent>> {
        let v: Value = serde_json::from_str(raw).map_err(|e| EngineError::Parse(e.to_string()))?;

        if let Some(ts) = v.get("ping") {
            return Ok(vec![ParsedEvent::Reply(json!({ "pong": ts }).to_string())]);
        }

        let channel = match v.get("ch").and_then(|c| c.as_str()) {
            Some(c) => c,
            None => return Ok(vec![ParsedEvent::Control]),
        };

        let tick = match v.get("tick") {
            Some(t) => t,
            None => return Ok(vec![ParsedEvent::Control]),
        };

        let parts: Vec<&str> = channel.split('.').collect();
        let symbol = parts.get(1).copied().unwrap_or_default().to_string();

        if channel.contains(".depth.") {
            let bids = parse_levels(&tick["bids"]);
            let asks = parse_levels(&tick["asks"]);
            let sequence_id = tick.get("version").and_then(|v| v.as_u64());
            let timestamp = tick.get("ts").and_then(|t| t.as_i64()).unwrap_or_else(now_ms);
            return Ok(vec![ParsedEvent::OrderBookSnapshot { venue_symbol: symbol, bids, asks, sequence_id, timestamp }]);
        }

        if channel.contains(".trade.") {
            let Some(canonical) = canonical::to_canonical(VenueId::Htx, &symbol) else { return Ok(vec![]) };
            let data = tick.get("data").and_then(|d| d.as_array()).cloned().unwrap_or_default();
            let mut events = Vec::with_capacity(data.len());
            for d in data {
                events.push(ParsedEvent::Trade(Trade {
                    venue: VenueId::Htx,
                    venue_symbol: symbol.clone(),
                    canonical: canonical.clone(),
                    price: d["price"].as_f64().unwrap_or(0.0),
                    quantity: d["amount"].as_f64().unwrap_or(0.0),
                    side: if d["direction"].as_str() == Some("sell") { TradeSide::Sell } else { TradeSide::Buy },
                    timestamp: d["ts"].as_i64().unwrap_or_else(now_ms),
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
    fn parses_depth_tick() {
        let spec = Htx::new();
        let raw = r#"{"ch":"market.BTC-USDT.depth.step0","ts":1700000000000,"tick":{"bids":[[42000.0,1.0]],"asks":[[42010.0,1.0]],"ts":1700000000000,"version":5}}"#;
        let events = spec.parse_message(raw).unwrap();
        assert!(matches!(events[0], ParsedEvent::OrderBookSnapshot { .. }));
    }

    #[test]
    fn ping_echoes_timestamp_as_pong() {
        let spec = Htx::new();
        let events = spec.parse_message(r#"{"ping":1700000000000}"#).unwrap();
        match &events[0] {
            ParsedEvent::Reply(text) => assert_eq!(text, r#"{"pong":1700000000000}"#),
            _ => panic!("expected a Reply event"),
        }
    }

    #[test]
    fn inflates_gzip_binary_frame() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let spec = Htx::new();
        let raw = r#"{"ping":1700000000000}"#;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(raw.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let decoded = spec.decode_binary_frame(&compressed).unwrap().unwrap();
        assert_eq!(decoded, raw);
    }
}
