//! Bybit v5 linear (USDT) perpetual futures.
//!
//! REST: https://bybit-exchange.github.io/docs/v5/market/instrument
//! WS: wss://stream.bybit.com/v5/public/linear — `op: subscribe/unsubscribe`,
//! topics `orderbook.50.{symbol}` and `publicTrade.{symbol}`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::canonical;
use crate::connectors::connector::Credential;
use crate::connectors::http::{get_json, get_json_with_headers, parse_f64, sign_hmac_sha256};
use crate::connectors::spec::{ParsedEvent, VenueSpec};
use crate::error::{EngineError, Result};
use crate::model::{AssetInfo, FundingRate, Instrument, OrderBook, PriceLevel, PriceTicker, Trade, TradeSide, VenueId};
use crate::util::now_ms;

const REST_BASE: &str = "https://api.bybit.com";
const WS_BASE: &str = "wss://stream.bybit.com/v5/public/linear";

pub struct Bybit;

impl Bybit {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Deserialize)]
struct InstrumentsResult {
    list: Vec<InstrumentEntry>,
}

#[derive(Deserialize)]
struct InstrumentEntry {
    symbol: String,
    status: String,
    #[serde(rename = "contractType")]
    contract_type: String,
    #[serde(rename = "priceFilter")]
    price_filter: PriceFilter,
    #[serde(rename = "lotSizeFilter")]
    lot_size_filter: LotSizeFilter,
}

#[derive(Deserialize)]
struct PriceFilter {
    #[serde(rename = "tickSize")]
    tick_size: String,
}

#[derive(Deserialize)]
struct LotSizeFilter {
    #[serde(rename = "qtyStep")]
    qty_step: String,
}

#[derive(Deserialize)]
struct TickersResult {
    list: Vec<TickerEntry>,
}

#[derive(Deserialize)]
struct TickerEntry {
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: String,
    #[serde(rename = "bid1Price")]
    bid1_price: String,
    #[serde(rename = "ask1Price")]
    ask1_price: String,
    volume24h: String,
    #[serde(rename = "fundingRate")]
    funding_rate: String,
    #[serde(rename = "nextFundingTime")]
    next_funding_time: String,
}

#[derive(Deserialize)]
struct OrderbookResult {
    s: String,
    b: Vec<[String; 2]>,
    a: Vec<[String; 2]>,
    ts: i64,
    u: u64,
}

#[derive(Deserialize)]
struct CoinInfoResult {
    rows: Vec<CoinInfoEntry>,
}

#[derive(Deserialize)]
struct CoinInfoEntry {
    coin: String,
    #[serde(default)]
    chains: Vec<ChainEntry>,
}

#[derive(Deserialize)]
struct ChainEntry {
    #[serde(rename = "chainDeposit")]
    chain_deposit: String,
    #[serde(rename = "chainWithdraw")]
    chain_withdraw: String,
    #[serde(rename = "withdrawFee")]
    withdraw_fee: String,
    #[serde(rename = "withdrawMin")]
    withdraw_min: String,
}

#[async_trait]
impl VenueSpec for Bybit {
    fn id(&self) -> VenueId {
        VenueId::Bybit
    }

    fn ws_url(&self) -> &'static str {
        WS_BASE
    }

    fn rest_base_url(&self) -> &'static str {
        REST_BASE
    }

    async fn fetch_instruments(&self, http: &reqwest::Client) -> Result<Vec<Instrument>> {
        let resp: Envelope<InstrumentsResult> =
            get_json(http, &format!("{REST_BASE}/v5/market/instruments-info?category=linear")).await?;

        Ok(resp
            .result
            .list
            .into_iter()
            .filter(|i| i.contract_type == "LinearPerpetual" && i.status == "Trading")
            .filter_map(|i| {
                let canonical = canonical::to_canonical(VenueId::Bybit, &i.symbol)?;
                let (base, quote) = canonical.strip_suffix("-PERP")?.split_once('-')?;
                Some(Instrument {
                    venue: VenueId::Bybit,
                    venue_symbol: i.symbol,
                    canonical,
                    base: base.to_string(),
                    quote: quote.to_string(),
                    tick_size: parse_f64(&i.price_filter.tick_size),
                    lot_size: parse_f64(&i.lot_size_filter.qty_step),
                    contract_multiplier: 1.0,
                    maker_fee: 0.0001,
                    taker_fee: 0.0006,
                    min_notional: 5.0,
                })
            })
            .collect())
    }

    async fn fetch_price_tickers(&self, http: &reqwest::Client) -> Result<Vec<PriceTicker>> {
        let resp: Envelope<TickersResult> =
            get_json(http, &format!("{REST_BASE}/v5/market/tickers?category=linear")).await?;
        let now = now_ms();
        Ok(resp
            .result
            .list
            .into_iter()
            .filter_map(|t| {
                let canonical = canonical::to_canonical(VenueId::Bybit, &t.symbol)?;
                Some(PriceTicker {
                    venue: VenueId::Bybit,
                    venue_symbol: t.symbol,
                    canonical,
                    last: Some(parse_f64(&t.last_price)),
                    bid: Some(parse_f64(&t.bid1_price)),
                    ask: Some(parse_f64(&t.ask1_price)),
                    volume_24h: parse_f64(&t.volume24h),
                    timestamp: now,
                })
            })
            .collect())
    }

    async fn fetch_funding_rates(&self, http: &reqwest::Client) -> Result<Vec<FundingRate>> {
        let resp: Envelope<TickersResult> =
            get_json(http, &format!("{REST_BASE}/v5/market/tickers?category=linear")).await?;
        let now = now_ms();
        Ok(resp
            .result
            .list
            .into_iter()
            .map(|t| FundingRate {
                venue: VenueId::Bybit,
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
        http: &reqwest::Client,
        credential: Option<&Credential>,
    ) -> Result<Vec<AssetInfo>> {
        // `/v5/asset/coin/query-info` requires Bybit's v5 signing scheme:
        // HMAC-SHA256 over `timestamp + api_key + recv_window + query_string`,
        // sent as headers rather than folded into the URL (§4.2).
        let Some(credential) = credential else {
            return Ok(vec![]);
        };

        let timestamp = now_ms().to_string();
        let recv_window = "5000";
        let prehash = format!("{timestamp}{}{recv_window}", credential.api_key);
        let signature = sign_hmac_sha256(&credential.api_secret, &prehash);

        let url = format!("{REST_BASE}/v5/asset/coin/query-info");
        let headers = [
            ("X-BAPI-API-KEY", credential.api_key.as_str()),
            ("X-BAPI-TIMESTAMP", timestamp.as_str()),
            ("X-BAPI-RECV-WINDOW", recv_window),
            ("X-BAPI-SIGN", signature.as_str()),
        ];
        let resp: Envelope<CoinInfoResult> = get_json_with_headers(http, &url, &headers).await?;

        let now = now_ms();
        Ok(resp
            .result
            .rows
            .into_iter()
            .map(|c| {
                let chain = c.chains.first();
                AssetInfo {
                    venue: VenueId::Bybit,
                    base_asset: c.coin,
                    deposit_enabled: chain.map(|c| c.chain_deposit == "1").unwrap_or(true),
                    withdraw_enabled: chain.map(|c| c.chain_withdraw == "1").unwrap_or(true),
                    fee: chain.map(|c| parse_f64(&c.withdraw_fee)).unwrap_or(0.0),
                    min: chain.map(|c| parse_f64(&c.withdraw_min)).unwrap_or(0.0),
                    timestamp: now,
                }
            })
            .collect())
    }

    async fn fetch_orderbook_snapshot(
        &self,
        http: &reqwest::Client,
        venue_symbol: &str,
        depth: usize,
    ) -> Result<OrderBook> {
        let limit = depth.clamp(1, 200);
        let url = format!("{REST_BASE}/v5/market/orderbook?category=linear&symbol={venue_symbol}&limit={limit}");
        let resp: Envelope<OrderbookResult> = get_json(http, &url).await?;
        let canonical = canonical::to_canonical(VenueId::Bybit, venue_symbol)
            .ok_or_else(|| EngineError::Parse(format!("unrecognized bybit symbol {venue_symbol}")))?;

        Ok(OrderBook {
            venue: VenueId::Bybit,
            venue_symbol: venue_symbol.to_string(),
            canonical,
            bids: resp.result.b.iter().map(|[p, q]| PriceLevel { price: parse_f64(p), quantity: parse_f64(q) }).collect(),
            asks: resp.result.a.iter().map(|[p, q]| PriceLevel { price: parse_f64(p), quantity: parse_f64(q) }).collect(),
            sequence_id: Some(resp.result.u),
            timestamp: resp.result.ts,
            is_snapshot: true,
        })
    }

    fn build_subscribe_message(&self, venue_symbols: &[String]) -> Value {
        let args: Vec<String> = venue_symbols
            .iter()
            .flat_map(|s| vec![format!("orderbook.50.{s}"), format!("publicTrade.{s}")])
            .collect();
        json!({ "op": "subscribe", "args": args })
    }

    fn build_unsubscribe_message(&self, venue_symbols: &[String]) -> Value {
        let args: Vec<String> = venue_symbols
            .iter()
            .flat_map(|s| vec![format!("orderbook.50.{s}"), format!("publicTrade.{s}")])
            .collect();
        json!({ "op": "unsubscribe", "args": args })
    }

    fn heartbeat_payload(&self) -> Option<String> {
        Some(json!({ "op": "ping" }).to_string())
    }

    fn parse_message(&self, raw: &str) -> Result<Vec<ParsedEvent>> {
        let v: Value = serde_json::from_str(raw).map_err(|e| EngineError::Parse(e.to_string()))?;

        if v.get("op").is_some() || v.get("success").is_some() {
            return Ok(vec![ParsedEvent::Control]);
        }

        let topic = match v.get("topic").and_then(|t| t.as_str()) {
            Some(t) => t,
            None => return Ok(vec![ParsedEvent::Control]),
        };
        let data = match v.get("data") {
            Some(d) => d,
            None => return Ok(vec![ParsedEvent::Control]),
        };
        let msg_type = v.get("type").and_then(|t| t.as_str()).unwrap_or("delta");

        if let Some(symbol) = topic.strip_prefix("orderbook.50.") {
            let bids = parse_levels(&data["b"]);
            let asks = parse_levels(&data["a"]);
            let sequence_id = data["u"].as_u64();
            let timestamp = v["ts"].as_i64().unwrap_or_else(now_ms);
            let event = if msg_type == "snapshot" {
                ParsedEvent::OrderBookSnapshot { venue_symbol: symbol.to_string(), bids, asks, sequence_id, timestamp }
            } else {
                ParsedEvent::OrderBookDelta { venue_symbol: symbol.to_string(), bids, asks, sequence_id, timestamp }
            };
            return Ok(vec![event]);
        }

        if topic.starts_with("publicTrade.") {
            let trades = data.as_array().cloned().unwrap_or_default();
            let mut events = Vec::with_capacity(trades.len());
            for t in trades {
                let venue_symbol = t["s"].as_str().unwrap_or_default().to_string();
                let Some(canonical) = canonical::to_canonical(VenueId::Bybit, &venue_symbol) else { continue };
                events.push(ParsedEvent::Trade(Trade {
                    venue: VenueId::Bybit,
                    venue_symbol,
                    canonical,
                    price: t["p"].as_str().map(parse_f64).unwrap_or(0.0),
                    quantity: t["v"].as_str().map(parse_f64).unwrap_or(0.0),
                    side: if t["S"].as_str() == Some("Sell") { TradeSide::Sell } else { TradeSide::Buy },
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
    fn parses_snapshot_vs_delta() {
        let spec = Bybit::new();
        let snapshot = r#"{"topic":"orderbook.50.BTCUSDT","type":"snapshot","ts":1700000000000,"data":{"s":"BTCUSDT","b":[["42000","1"]],"a":[["42010","1"]],"u":5}}"#;
        let events = spec.parse_message(snapshot).unwrap();
        assert!(matches!(events[0], ParsedEvent::OrderBookSnapshot { .. }));

        let delta = r#"{"topic":"orderbook.50.BTCUSDT","type":"delta","ts":1700000000001,"data":{"s":"BTCUSDT","b":[["42000","2"]],"a":[],"u":6}}"#;
        let events = spec.parse_message(delta).unwrap();
        assert!(matches!(events[0], ParsedEvent::OrderBookDelta { .. }));
    }

    #[test]
    fn parses_trade_batch() {
        let spec = Bybit::new();
        let raw = r#"{"topic":"publicTrade.BTCUSDT","data":[{"s":"BTCUSDT","p":"42005","v":"0.1","S":"Sell","T":1700000000000}]}"#;
        let events = spec.parse_message(raw).unwrap();
        assert_eq!(events.len(), 1);
    }
}
