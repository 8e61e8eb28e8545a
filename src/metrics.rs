//! Metrics Collector (§4.8): counters, gauges, and histograms exported
//! over HTTP alongside a liveness check, using the `metrics` facade and
//! `metrics-exporter-prometheus` — the same stack as the `arbiter` /
//! `cooprefr-bettersys` corpus entries, replacing the teacher's in-process
//! `AtomicUsize` struct with a real `/metrics` surface as §6 requires.

use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

use crate::model::VenueId;

/// Installs the global Prometheus recorder and returns a handle whose
/// `render()` backs `GET /metrics`. Must be called exactly once, early in
/// the process lifecycle (mirrors the teacher's one-time rustls
/// `CryptoProvider::install_default` discipline in `main.rs`).
pub fn install() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Serves `/metrics` and `/health` on `port` until the process exits.
pub async fn serve(handle: PrometheusHandle, port: u16) -> std::io::Result<()> {
    let app = Router::new()
        .route("/metrics", get(move || { let handle = handle.clone(); async move { handle.render() } }))
        .route("/health", get(|| async { "OK" }));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "metrics server listening");
    axum::serve(listener, app).await
}

pub fn record_ws_connect(venue: VenueId) {
    metrics::counter!("ws_connections_opened_total", "venue" => venue.as_str()).increment(1);
    metrics::gauge!("connection_status", "venue" => venue.as_str()).set(1.0);
}

pub fn record_ws_disconnect(venue: VenueId) {
    metrics::gauge!("connection_status", "venue" => venue.as_str()).set(0.0);
}

pub fn record_reconnect(venue: VenueId) {
    metrics::counter!("reconnects_total", "venue" => venue.as_str()).increment(1);
}

pub fn record_connection_error(venue: VenueId) {
    metrics::counter!("connection_errors_total", "venue" => venue.as_str()).increment(1);
}

pub fn record_orderbook_update(venue: VenueId, symbol: &str, bid_depth: usize, ask_depth: usize) {
    metrics::counter!("orderbook_updates_total", "venue" => venue.as_str()).increment(1);
    metrics::gauge!("orderbook_depth", "venue" => venue.as_str(), "symbol" => symbol.to_string(), "side" => "bid")
        .set(bid_depth as f64);
    metrics::gauge!("orderbook_depth", "venue" => venue.as_str(), "symbol" => symbol.to_string(), "side" => "ask")
        .set(ask_depth as f64);
}

pub fn record_best_bid_ask(venue: VenueId, symbol: &str, bid: f64, ask: f64, spread_bps: f64) {
    metrics::gauge!("best_bid", "venue" => venue.as_str(), "symbol" => symbol.to_string()).set(bid);
    metrics::gauge!("best_ask", "venue" => venue.as_str(), "symbol" => symbol.to_string()).set(ask);
    metrics::gauge!("spread_bps", "venue" => venue.as_str(), "symbol" => symbol.to_string()).set(spread_bps);
}

pub fn record_trade(venue: VenueId) {
    metrics::counter!("trades_total", "venue" => venue.as_str()).increment(1);
}

pub fn record_funding_update(venue: VenueId, symbol: &str, rate: f64) {
    metrics::counter!("funding_updates_total", "venue" => venue.as_str()).increment(1);
    metrics::gauge!("funding_rate", "venue" => venue.as_str(), "symbol" => symbol.to_string()).set(rate);
}

pub fn record_parse_error(venue: VenueId) {
    metrics::counter!("parse_errors_total", "venue" => venue.as_str()).increment(1);
}

pub fn record_staleness(venue: VenueId) {
    metrics::counter!("staleness_events_total", "venue" => venue.as_str()).increment(1);
}

pub fn set_subscribed_symbols(venue: VenueId, count: usize) {
    metrics::gauge!("subscribed_symbols", "venue" => venue.as_str()).set(count as f64);
}

pub fn record_rest_fetch(venue: VenueId, endpoint: &'static str, duration_secs: f64, success: bool) {
    metrics::histogram!("rest_fetch_duration_seconds", "venue" => venue.as_str(), "endpoint" => endpoint)
        .record(duration_secs);
    if !success {
        metrics::counter!("rest_fetch_errors_total", "venue" => venue.as_str(), "endpoint" => endpoint).increment(1);
    }
}

pub fn record_publish(duration_secs: f64, success: bool) {
    metrics::histogram!("publish_duration_seconds").record(duration_secs);
    if !success {
        metrics::counter!("publish_errors_total").increment(1);
    }
}

pub fn record_message_latency(venue: VenueId, latency_secs: f64) {
    metrics::histogram!("message_latency_seconds", "venue" => venue.as_str()).record(latency_secs);
}

pub fn record_spread_discovery_duration(duration_secs: f64) {
    metrics::histogram!("spread_discovery_duration_seconds").record(duration_secs);
}

pub fn set_preliminary_spreads_found(n: usize) {
    metrics::gauge!("preliminary_spreads_found").set(n as f64);
}
