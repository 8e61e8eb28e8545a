//! Binance USDT-M perpetual futures (`fapi`/`fstream`).
//!
//! REST: https://binance-docs.github.io/apidocs/futures/en/
//! WS: combined stream endpoint, one `SUBSCRIBE`/`UNSUBSCRIBE` frame per
//! diff, depth updates delivered with a `U`/`u` sequence window.

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

const REST_BASE: &str = "https://fapi.binance.com";
const WS_BASE: &str = "wss://fstream.binance.com/ws";
/// Wallet/capital endpoints live on the spot host, not `fapi` (§4.2:
/// "many venues require authenticated endpoints for full detail").
const SPOT_REST_BASE: &str = "https://api.binance.com";

pub struct Binance;

impl Binance {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize)]
struct SymbolInfo {
    symbol: String,
    #[serde(rename = "contractType")]
    contract_type: String,
    status: String,
    filters: Vec<Value>,
}

#[derive(Deserialize)]
struct TickerEntry {
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: String,
    #[serde(rename = "bidPrice")]
    bid_price: String,
    #[serde(rename = "askPrice")]
    ask_price: String,
    volume: String,
}

#[derive(Deserialize)]
struct PremiumIndexEntry {
    symbol: String,
    #[serde(rename = "lastFundingRate")]
    last_funding_rate: String,
    #[serde(rename = "nextFundingTime")]
    next_funding_time: i64,
}

#[derive(Deserialize)]
struct CapitalConfigEntry {
    coin: String,
    #[serde(rename = "depositAllEnable")]
    deposit_all_enable: bool,
    #[serde(rename = "withdrawAllEnable")]
    withdraw_all_enable: bool,
    /// Per-network withdraw fee list; the first network's fee stands in
    /// for a single `fee` field (§4.2's model carries one fee per asset).
    #[serde(rename = "networkList", default)]
    network_list: Vec<NetworkEntry>,
}

#[derive(Deserialize)]
struct NetworkEntry {
    #[serde(rename = "withdrawFee")]
    withdraw_fee: String,
    #[serde(rename = "withdrawMin")]
    withdraw_min: String,
}

#[derive(Deserialize)]
struct DepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    last_update_id: u64,
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

#[async_trait]
impl VenueSpec for Binance {
    fn id(&self) -> VenueId {
        VenueId::Binance
    }

    fn ws_url(&self) -> &'static str {
        WS_BASE
    }

    fn rest_base_url(&self) -> &'static str {
        REST_BASE
    }

    async fn fetch_instruments(&self, http: &reqwest::Client) -> Result<Vec<Instrument>> {
        let resp: ExchangeInfoResponse =
            get_json(http, &format!("{REST_BASE}/fapi/v1/exchangeInfo")).await?;

        Ok(resp
            .symbols
            .into_iter()
            .filter(|s| s.contract_type == "PERPETUAL" && s.status == "TRADING")
            .filter_map(|s| {
                let canonical = canonical::to_canonical(VenueId::Binance, &s.symbol)?;
                let (base, quote) = canonical.strip_suffix("-PERP")?.split_once('-')?;
                let tick_size = s
                    .filters
                    .iter()
                    .find(|f| f.get("filterType").and_then(|v| v.as_str()) == Some("PRICE_FILTER"))
                    .and_then(|f| f.get("tickSize").and_then(|v| v.as_str()))
                    .map(parse_f64)
                    .unwrap_or(0.0);
                let lot_size = s
                    .filters
                    .iter()
                    .find(|f| f.get("filterType").and_then(|v| v.as_str()) == Some("LOT_SIZE"))
                    .and_then(|f| f.get("stepSize").and_then(|v| v.as_str()))
                    .map(parse_f64)
                    .unwrap_or(0.0);
                Some(Instrument {
                    venue: VenueId::Binance,
                    venue_symbol: s.symbol,
                    canonical,
                    base: base.to_string(),
                    quote: quote.to_string(),
                    tick_size,
                    lot_size,
                    contract_multiplier: 1.0,
                    maker_fee: 0.0002,
                    taker_fee: 0.0005,
                    min_notional: 5.0,
                })
            })
            .collect())
    }

    async fn fetch_price_tickers(&self, http: &reqwest::Client) -> Result<Vec<PriceTicker>> {
        let resp: Vec<TickerEntry> = get_json(http, &format!("{REST_BASE}/fapi/v1/ticker/24hr")).await?;
        let now = now_ms();
        Ok(resp
            .into_iter()
            .filter_map(|t| {
                let canonical = canonical::to_canonical(VenueId::Binance, &t.symbol)?;
                Some(PriceTicker {
                    venue: VenueId::Binance,
                    venue_symbol: t.symbol,
                    canonical,
                    last: Some(parse_f64(&t.last_price)),
                    bid: Some(parse_f64(&t.bid_price)),
                    ask: Some(parse_f64(&t.ask_price)),
                    volume_24h: parse_f64(&t.volume),
                    timestamp: now,
                })
            })
            .collect())
    }

    async fn fetch_funding_rates(&self, http: &reqwest::Client) -> Result<Vec<FundingRate>> {
        let resp: Vec<PremiumIndexEntry> =
            get_json(http, &format!("{REST_BASE}/fapi/v1/premiumIndex")).await?;
        let now = now_ms();
        Ok(resp
            .into_iter()
            .map(|p| FundingRate {
                venue: VenueId::Binance,
                venue_symbol: p.symbol,
                rate: parse_f64(&p.last_funding_rate),
                next_funding_time: p.next_funding_time,
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
        // Deposit/withdraw status requires a signed `/sapi/v1/capital/config/getall`
        // call; without credentials we degrade rather than fail (§4.2).
        let Some(credential) = credential else {
            return Ok(vec![]);
        };

        let timestamp = now_ms();
        let query = format!("timestamp={timestamp}&recvWindow=5000");
        let signature = sign_hmac_sha256(&credential.api_secret, &query);
        let url = format!("{SPOT_REST_BASE}/sapi/v1/capital/config/getall?{query}&signature={signature}");

        let entries: Vec<CapitalConfigEntry> =
            get_json_with_headers(http, &url, &[("X-MBX-APIKEY", &credential.api_key)]).await?;

        let now = now_ms();
        Ok(entries
            .into_iter()
            .map(|e| {
                let network = e.network_list.first();
                AssetInfo {
                    venue: VenueId::Binance,
                    base_asset: e.coin,
                    deposit_enabled: e.deposit_all_enable,
                    withdraw_enabled: e.withdraw_all_enable,
                    fee: network.map(|n| parse_f64(&n.withdraw_fee)).unwrap_or(0.0),
                    min: network.map(|n| parse_f64(&n.withdraw_min)).unwrap_or(0.0),
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
        let limit = depth.clamp(5, 1000);
        let url = format!("{REST_BASE}/fapi/v1/depth?symbol={venue_symbol}&limit={limit}");
        let snap: DepthSnapshot = get_json(http, &url).await?;
        let canonical = canonical::to_canonical(VenueId::Binance, venue_symbol)
            .ok_or_else(|| EngineError::Parse(format!("unrecognized binance symbol {venue_symbol}")))?;

        Ok(OrderBook {
            venue: VenueId::Binance,
            venue_symbol: venue_symbol.to_string(),
            canonical,
            bids: snap
                .bids
                .iter()
                .map(|[p, q]| PriceLevel { price: parse_f64(p), quantity: parse_f64(q) })
                .collect(),
            asks: snap
                .asks
                .iter()
                .map(|[p, q]| PriceLevel { price: parse_f64(p), quantity: parse_f64(q) })
                .collect(),
            sequence_id: Some(snap.last_update_id),
            timestamp: now_ms(),
            is_snapshot: true,
        })
    }

    fn build_subscribe_message(&self, venue_symbols: &[String]) -> Value {
        let streams: Vec<String> = venue_symbols
            .iter()
            .flat_map(|s| {
                let lower = s.to_lowercase();
                vec![format!("{lower}@depth@100ms"), format!("{lower}@aggTrade")]
            })
            .collect();
        json!({ "method": "SUBSCRIBE", "params": streams, "id": now_ms() })
    }

    fn build_unsubscribe_message(&self, venue_symbols: &[String]) -> Value {
        let streams: Vec<String> = venue_symbols
            .iter()
            .flat_map(|s| {
                let lower = s.to_lowercase();
                vec![format!("{lower}@depth@100ms"), format!("{lower}@aggTrade")]
            })
            .collect();
        json!({ "method": "UNSUBSCRIBE", "params": streams, "id": now_ms() })
    }

    fn parse_message(&self, raw: &str) -> Result<Vec<ParsedEvent>> {
        let v: Value = serde_json::from_str(raw).map_err(|e| EngineError::Parse(e.to_string()))?;

        if v.get("result").is_some() || v.get("id").is_some() {
            return Ok(vec![ParsedEvent::Control]);
        }

        let event = match v.get("e").and_then(|e| e.as_str()) {
            Some(e) => e,
            None => return Ok(vec![ParsedEvent::Control]),
        };

        match event {
            "depthUpdate" => {
                let symbol = v["s"].as_str().unwrap_or_default().to_string();
                let bids = parse_levels(&v["b"]);
                let asks = parse_levels(&v["a"]);
                let sequence_id = v["u"].as_u64();
                let timestamp = v["E"].as_i64().unwrap_or_else(now_ms);
                Ok(vec![ParsedEvent::OrderBookDelta { venue_symbol: symbol, bids, asks, sequence_id, timestamp }])
            }
            "aggTrade" => {
                let venue_symbol = v["s"].as_str().unwrap_or_default().to_string();
                let Some(canonical) = canonical::to_canonical(VenueId::Binance, &venue_symbol) else {
                    return Ok(vec![]);
                };
                let trade = Trade {
                    venue: VenueId::Binance,
                    venue_symbol,
                    canonical,
                    price: v["p"].as_str().map(parse_f64).unwrap_or(0.0),
                    quantity: v["q"].as_str().map(parse_f64).unwrap_or(0.0),
                    side: if v["m"].as_bool().unwrap_or(false) { TradeSide::Sell } else { TradeSide::Buy },
                    timestamp: v["T"].as_i64().unwrap_or_else(now_ms),
                };
                Ok(vec![ParsedEvent::Trade(trade)])
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
        let spec = Binance::new();
        let raw = r#"{"e":"depthUpdate","E":1700000000000,"s":"BTCUSDT","U":100,"u":101,"b":[["42000.00","1.5"]],"a":[["42010.00","2.0"]]}"#;
        let events = spec.parse_message(raw).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            ParsedEvent::OrderBookDelta { venue_symbol, bids, asks, .. } => {
                assert_eq!(venue_symbol, "BTCUSDT");
                assert_eq!(bids[0], (42000.0, 1.5));
                assert_eq!(asks[0], (42010.0, 2.0));
            }
            _ => panic!("expected OrderBookDelta"),
        }
    }

    #[test]
    fn parses_agg_trade() {
        let spec = Binance::new();
        let raw = r#"{"e":"aggTrade","E":1700000000000,"T":1700000000000,"s":"BTCUSDT","p":"42005.00","q":"0.1","m":true}"#;
        let events = spec.parse_message(raw).unwrap();
        match &events[0] {
            ParsedEvent::Trade(t) => {
                assert_eq!(t.price, 42005.0);
                matches!(t.side, TradeSide::Sell);
            }
            _ => panic!("expected Trade"),
        }
    }

    #[test]
    fn unknown_frame_is_control() {
        let spec = Binance::new();
        let events = spec.parse_message(r#"{"result":null,"id":1}"#).unwrap();
        assert!(matches!(events[0], ParsedEvent::Control));
    }
}
