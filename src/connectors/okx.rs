//! OKX v5 public API, `SWAP` instrument family (USDT-margined perpetuals).
//!
//! REST: https://www.okx.com/docs-v5/en/#public-data-rest-api
//! WS: wss://ws.okx.com:8443/ws/v5/public — `books` (depth-400, snapshot +
//! incremental) and `trades` channels, subscribed via `{channel, instId}` args.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::canonical;
use crate::connectors::connector::Credential;
use crate::connectors::http::{get_json, get_json_with_headers, parse_f64, sign_hmac_sha256_base64};
use crate::connectors::spec::{ParsedEvent, VenueSpec};
use crate::error::{EngineError, Result};
use crate::model::{AssetInfo, FundingRate, Instrument, OrderBook, PriceLevel, PriceTicker, Trade, TradeSide, VenueId};
use crate::util::now_ms;

const REST_BASE: &str = "https://www.okx.com";
const WS_BASE: &str = "wss://ws.okx.com:8443/ws/v5/public";

pub struct Okx;

impl Okx {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: Vec<T>,
}

#[derive(Deserialize)]
struct InstrumentEntry {
    #[serde(rename = "instId")]
    inst_id: String,
    #[serde(rename = "instType")]
    inst_type: String,
    state: String,
    #[serde(rename = "tickSz")]
    tick_sz: String,
    #[serde(rename = "lotSz")]
    lot_sz: String,
    #[serde(rename = "ctVal")]
    ct_val: String,
}

#[derive(Deserialize)]
struct TickerEntry {
    #[serde(rename = "instId")]
    inst_id: String,
    last: String,
    #[serde(rename = "bidPx")]
    bid_px: String,
    #[serde(rename = "askPx")]
    ask_px: String,
    #[serde(rename = "vol24h")]
    vol24h: String,
}

#[derive(Deserialize)]
struct CurrencyEntry {
    ccy: String,
    #[serde(rename = "canDep")]
    can_dep: bool,
    #[serde(rename = "canWd")]
    can_wd: bool,
    #[serde(rename = "minFee")]
    min_fee: String,
    #[serde(rename = "minWd")]
    min_wd: String,
}

#[derive(Deserialize)]
struct FundingEntry {
    #[serde(rename = "instId")]
    inst_id: String,
    #[serde(rename = "fundingRate")]
    funding_rate: String,
    #[serde(rename = "nextFundingTime")]
    next_funding_time: String,
}

#[derive(Deserialize)]
struct BookEntry {
    bids: Vec<[String; 4]>,
    asks: Vec<[String; 4]>,
    ts: String,
    #[serde(rename = "seqId")]
    seq_id: Option<u64>,
}

#[async_trait]
impl VenueSpec for Okx {
    fn id(&self) -> VenueId {
        VenueId::Okx
    }

    fn ws_url(&self) -> &'static str {
        WS_BASE
    }

    fn rest_base_url(&self) -> &'static str {
        REST_BASE
    }

    async fn fetch_instruments(&self, http: &reqwest::Client) -> Result<Vec<Instrument>> {
        let resp: Envelope<InstrumentEntry> =
            get_json(http, &format!("{REST_BASE}/api/v5/public/instruments?instType=SWAP")).await?;

        Ok(resp
            .data
            .into_iter()
            .filter(|i| i.state == "live")
            .filter_map(|i| {
                let canonical = canonical::to_canonical(VenueId::Okx, &i.inst_id)?;
                let (base, quote) = canonical.strip_suffix("-PERP")?.split_once('-')?;
                Some(Instrument {
                    venue: VenueId::Okx,
                    venue_symbol: i.inst_id,
                    canonical,
                    base: base.to_string(),
                    quote: quote.to_string(),
                    tick_size: parse_f64(&i.tick_sz),
                    lot_size: parse_f64(&i.lot_sz),
                    contract_multiplier: parse_f64(&i.ct_val),
                    maker_fee: 0.0002,
                    taker_fee: 0.0005,
                    min_notional: 1.0,
                })
            })
            .collect())
    }

    async fn fetch_price_tickers(&self, http: &reqwest::Client) -> Result<Vec<PriceTicker>> {
        let resp: Envelope<TickerEntry> =
            get_json(http, &format!("{REST_BASE}/api/v5/market/tickers?instType=SWAP")).await?;
        let now = now_ms();
        Ok(resp
            .data
            .into_iter()
            .filter_map(|t| {
                let canonical = canonical::to_canonical(VenueId::Okx, &t.inst_id)?;
                Some(PriceTicker {
                    venue: VenueId::Okx,
                    venue_symbol: t.inst_id,
                    canonical,
                    last: Some(parse_f64(&t.last)),
                    bid: Some(parse_f64(&t.bid_px)),
                    ask: Some(parse_f64(&t.ask_px)),
                    volume_24h: parse_f64(&t.vol24h),
                    timestamp: now,
                })
            })
            .collect())
    }

    async fn fetch_funding_rates(&self, http: &reqwest::Client) -> Result<Vec<FundingRate>> {
        let instruments = self.fetch_instruments(http).await?;
        let mut rates = Vec::with_capacity(instruments.len());
        for inst in instruments {
            let url = format!("{REST_BASE}/api/v5/public/funding-rate?instId={}", inst.venue_symbol);
            let resp: Envelope<FundingEntry> = get_json(http, &url).await?;
            if let Some(f) = resp.data.into_iter().next() {
                rates.push(FundingRate {
                    venue: VenueId::Okx,
                    venue_symbol: f.inst_id,
                    rate: parse_f64(&f.funding_rate),
                    next_funding_time: f.next_funding_time.parse().unwrap_or(0),
                    interval_hours: 8.0,
                    timestamp: now_ms(),
                });
            }
        }
        Ok(rates)
    }

    async fn fetch_asset_info(
        &self,
        http: &reqwest::Client,
        credential: Option<&Credential>,
    ) -> Result<Vec<AssetInfo>> {
        // `/api/v5/asset/currencies` needs OKX's signing scheme: base64
        // HMAC-SHA256 over `timestamp + method + requestPath`, plus a
        // passphrase header — OKX is the one venue in this set whose API
        // key carries a third secret beyond key/secret (§4.2).
        let Some(credential) = credential else {
            return Ok(vec![]);
        };
        let Some(passphrase) = credential.passphrase.as_deref() else {
            tracing::warn!("okx credential missing passphrase, skipping authenticated asset info");
            return Ok(vec![]);
        };

        let request_path = "/api/v5/asset/currencies";
        let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let prehash = format!("{timestamp}GET{request_path}");
        let signature = sign_hmac_sha256_base64(&credential.api_secret, &prehash);

        let url = format!("{REST_BASE}{request_path}");
        let headers = [
            ("OK-ACCESS-KEY", credential.api_key.as_str()),
            ("OK-ACCESS-SIGN", signature.as_str()),
            ("OK-ACCESS-TIMESTAMP", timestamp.as_str()),
            ("OK-ACCESS-PASSPHRASE", passphrase),
        ];
        let resp: Envelope<CurrencyEntry> = get_json_with_headers(http, &url, &headers).await?;

        let now = now_ms();
        Ok(resp
            .data
            .into_iter()
            .map(|c| AssetInfo {
                venue: VenueId::Okx,
                base_asset: c.ccy,
                deposit_enabled: c.can_dep,
                withdraw_enabled: c.can_wd,
                fee: parse_f64(&c.min_fee),
                min: parse_f64(&c.min_wd),
                timestamp: now,
            })
            .collect())
    }

    async fn fetch_orderbook_snapshot(
        &self,
        http: &reqwest::Client,
        venue_symbol: &str,
        depth: usize,
    ) -> Result<OrderBook> {
        let sz = depth.clamp(1, 400);
        let url = format!("{REST_BASE}/api/v5/market/books?instId={venue_symbol}&sz={sz}");
        let resp: Envelope<BookEntry> = get_json(http, &url).await?;
        let book = resp
            .data
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Parse(format!("empty okx book for {venue_symbol}")))?;
        let canonical = canonical::to_canonical(VenueId::Okx, venue_symbol)
            .ok_or_else(|| EngineError::Parse(format!("unrecognized okx symbol {venue_symbol}")))?;

        Ok(OrderBook {
            venue: VenueId::Okx,
            venue_symbol: venue_symbol.to_string(),
            canonical,
            bids: book.bids.iter().map(|[p, q, _, _]| PriceLevel { price: parse_f64(p), quantity: parse_f64(q) }).collect(),
            asks: book.asks.iter().map(|[p, q, _, _]| PriceLevel { price: parse_f64(p), quantity: parse_f64(q) }).collect(),
            sequence_id: book.seq_id,
            timestamp: parse_f64(&book.ts) as i64,
            is_snapshot: true,
        })
    }

    fn build_subscribe_message(&self, venue_symbols: &[String]) -> Value {
        let args: Vec<Value> = venue_symbols
            .iter()
            .flat_map(|s| {
                vec![
                    json!({ "channel": "books", "instId": s }),
                    json!({ "channel": "trades", "instId": s }),
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
                    json!({ "channel": "books", "instId": s }),
                    json!({ "channel": "trades", "instId": s }),
                ]
            })
            .collect();
        json!({ "op": "unsubscribe", "args": args })
    }

    fn heartbeat_payload(&self) -> Option<String> {
        Some("ping".to_string()) // OKX expects the literal unquoted text "ping", not a JSON frame.
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
                let sequence_id = entry.get("seqId").and_then(|s| s.as_u64());
                let timestamp = entry.get("ts").and_then(|t| t.as_str()).and_then(|s| s.parse().ok()).unwrap_or_else(now_ms);
                let event = if action == "snapshot" {
                    ParsedEvent::OrderBookSnapshot { venue_symbol: inst_id, bids, asks, sequence_id, timestamp }
                } else {
                    ParsedEvent::OrderBookDelta { venue_symbol: inst_id, bids, asks, sequence_id, timestamp }
                };
                Ok(vec![event])
            }
            "trades" => {
                let mut events = Vec::with_capacity(data.len());
                for t in data {
                    let Some(canonical) = canonical::to_canonical(VenueId::Okx, &inst_id) else { continue };
                    events.push(ParsedEvent::Trade(Trade {
                        venue: VenueId::Okx,
                        venue_symbol: inst_id.clone(),
                        canonical,
                        price: t["px"].as_str().map(parse_f64).unwrap_or(0.0),
                        quantity: t["sz"].as_str().map(parse_f64).unwrap_or(0.0),
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
    fn parses_book_snapshot() {
        let spec = Okx::new();
        let raw = r#"{"arg":{"channel":"books","instId":"BTC-USDT-SWAP"},"action":"snapshot","data":[{"bids":[["42000","1","0","1"]],"asks":[["42010","1","0","1"]],"ts":"1700000000000","seqId":9}]}"#;
        let events = spec.parse_message(raw).unwrap();
        assert!(matches!(events[0], ParsedEvent::OrderBookSnapshot { .. }));
    }

    #[test]
    fn parses_trades() {
        let spec = Okx::new();
        let raw = r#"{"arg":{"channel":"trades","instId":"BTC-USDT-SWAP"},"data":[{"px":"42005","sz":"0.1","side":"buy","ts":"1700000000000"}]}"#;
        let events = spec.parse_message(raw).unwrap();
        assert_eq!(events.len(), 1);
    }
}
