// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility (§2):
//
// - config:       environment-driven settings (§6)
// - error:        crate-wide error type (§7)
// - model:        normalized data model shared by every subsystem (§3)
// - canonical:    the Canonicalizer (§4.1)
// - connectors:   the uniform venue contract, generic runtime, per-venue
//                 wire logic, and the registry factory (§4.2)
// - orderbook:    the order-book maintainer (§4.2 algorithmic contract)
// - rest_loader:  the REST Loader / Phase 1 (§4.3)
// - spread:       the Spread Discovery Engine (§4.4)
// - streaming:    the Streaming Manager / Phase 2 (§4.5)
// - publisher:    the Publisher (§4.6)
// - credentials:  the Credentials Client (§4.7)
// - metrics:      the Metrics Collector (§4.8)
// - util:         small shared helpers
//
mod canonical;
mod config;
mod connectors;
mod credentials;
mod error;
mod metrics;
mod model;
mod orderbook;
mod publisher;
mod rest_loader;
mod spread;
mod streaming;
mod util;

use std::collections::HashMap;
use std::sync::Arc;

use rustls::crypto::{ring, CryptoProvider};
use tokio::sync::mpsc;

use config::Settings;
use connectors::connector::ConnectorError;
use connectors::registry::build_connectors;
use credentials::CredentialsClient;
use model::{FundingRate, OrderBook, Trade, VenueId};
use publisher::Publisher;
use spread::SpreadEngine;

const EVENT_CHANNEL_CAPACITY: usize = 4_096;

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Supervisor / Entrypoint (§2): wires every component together, runs the
// REST Loader once to bootstrap the token index, opens the streaming
// subscriptions Spread Discovery says are needed, and then keeps the
// process alive until a shutdown signal arrives.
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // rustls >= 0.23 requires an explicit CryptoProvider installed exactly
    // once, as early as possible in the process lifecycle.
    CryptoProvider::install_default(ring::default_provider())
        .expect("failed to install rustls CryptoProvider");

    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let settings = Settings::from_env()?;
    tracing::info!(
        exchanges = ?settings.enabled_exchanges,
        two_phase = settings.use_two_phase,
        "starting perp-spread-engine"
    );

    // Metrics Collector (§4.8): install the recorder before anything else
    // can emit a metric, then serve /metrics and /health in the background.
    let metrics_handle = metrics::install();
    let metrics_port = settings.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::serve(metrics_handle, metrics_port).await {
            tracing::error!(error = %e, "metrics server exited");
        }
    });

    // Publisher: fail fast if the key/value store is unreachable at
    // startup (§6: "nonzero fatal if ... the key/value store is
    // unreachable at startup").
    let publisher = Arc::new(Publisher::new(&settings.redis_host, settings.redis_port)?);
    publisher.ping().await?;
    tracing::info!(host = %settings.redis_host, port = settings.redis_port, "connected to key/value store");

    // Venue Connectors, one per enabled venue (§4.2). Zero connectors is a
    // fatal startup condition (§6); `Settings::from_env` already rejects an
    // empty `ENABLED_EXCHANGES`, and the registry is total over `VenueId`,
    // so this branch only guards against a future regression there.
    let connectors = build_connectors(&settings.enabled_exchanges);
    if connectors.is_empty() {
        anyhow::bail!("no connectors could be constructed for ENABLED_EXCHANGES");
    }

    // Credentials Client (§4.7): optional. Absent configuration simply
    // means every connector runs on public endpoints only.
    if settings.credentials_configured() {
        let client = CredentialsClient::new(
            settings.backend_api_url.clone().unwrap(),
            settings.service_secret.clone().unwrap(),
        );
        credentials::install_credentials(&client, &connectors).await;
    } else {
        tracing::info!("credentials endpoint not configured, running all connectors on public endpoints");
    }

    // Handler channels (§9 "Handler callbacks -> channels"): one channel
    // per event kind, shared by every connector, consumed by dedicated
    // dispatch tasks below.
    let (ob_tx, ob_rx) = mpsc::channel::<OrderBook>(EVENT_CHANNEL_CAPACITY);
    let (trade_tx, trade_rx) = mpsc::channel::<Trade>(EVENT_CHANNEL_CAPACITY);
    let (funding_tx, funding_rx) = mpsc::channel::<FundingRate>(EVENT_CHANNEL_CAPACITY);
    let (err_tx, err_rx) = mpsc::channel::<ConnectorError>(EVENT_CHANNEL_CAPACITY);

    for (_, connector) in &connectors {
        connector.set_orderbook_handler(ob_tx.clone());
        connector.set_trade_handler(trade_tx.clone());
        connector.set_funding_handler(funding_tx.clone());
        connector.set_error_handler(err_tx.clone());
    }
    drop((ob_tx, trade_tx, funding_tx, err_tx));

    let spread_engine = Arc::new(SpreadEngine::new(settings.min_spread_bps));
    let streaming_manager = Arc::new(streaming::StreamingManager::new(connectors.clone()));
    let shutdown = streaming_manager.shutdown_handle();

    // Phase 1: REST Loader bootstrap (§4.3 steps 1-4) and the first spread
    // discovery cycle.
    let index = rest_loader::load_once(&connectors).await;
    let inventory = spread_engine.discover(&index);
    metrics::set_preliminary_spreads_found(inventory.count);
    publisher.publish_inventory(&inventory).await;

    // Phase 2: open streaming subscriptions for exactly the symbols the
    // first cycle's inventory implicates (§3 invariant 4), or subscribe to
    // every instrument per venue in legacy mode.
    if settings.use_two_phase {
        streaming_manager.connect_for_spreads(spread_engine.symbols_needed()).await;
    } else {
        connect_legacy(&connectors).await;
    }

    // Dispatch tasks: forward normalized events to the Publisher and feed
    // live corrections back into Spread Discovery.
    tokio::spawn(run_orderbook_dispatch(ob_rx, publisher.clone(), spread_engine.clone()));
    tokio::spawn(run_trade_dispatch(trade_rx, publisher.clone()));
    tokio::spawn(run_funding_dispatch(funding_rx, spread_engine.clone(), index_canonical_lookup(&index)));
    tokio::spawn(run_error_log(err_rx));

    // Periodic REST refresh (§4.3: "default 30s") feeds back into
    // discovery and subscription reconciliation (§4.5 `update_subscriptions`).
    let (refresh_tx, mut refresh_rx) = mpsc::channel(1);
    tokio::spawn(rest_loader::start_periodic_refresh(
        connectors.clone(),
        settings.refresh_interval,
        refresh_tx,
        shutdown.clone(),
    ));

    {
        let spread_engine = spread_engine.clone();
        let streaming_manager = streaming_manager.clone();
        let publisher = publisher.clone();
        let use_two_phase = settings.use_two_phase;
        tokio::spawn(async move {
            while let Some(index) = refresh_rx.recv().await {
                let inventory = spread_engine.discover(&index);
                metrics::set_preliminary_spreads_found(inventory.count);
                publisher.publish_inventory(&inventory).await;
                if use_two_phase {
                    streaming_manager.update_subscriptions(spread_engine.symbols_needed()).await;
                }
            }
        });
    }

    // Streaming Manager monitor tick (§4.5 `monitor_connections`): re-dials
    // disconnected venues and flags staleness on a fixed interval.
    {
        let streaming_manager = streaming_manager.clone();
        let interval = settings.staleness_threshold;
        tokio::spawn(async move {
            streaming_manager.monitor_connections(interval).await;
        });
    }

    // Block until an external shutdown signal arrives, then tear down
    // gracefully (§5 cancellation contract; `disconnect_all` is
    // idempotent).
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, disconnecting");
    streaming_manager.disconnect_all().await;

    Ok(())
}

/// Legacy single-phase mode (§4.2 `connect`): each connector subscribes to
/// every instrument it currently lists rather than a discovery-derived
/// subset. Per-venue failures are logged but never abort the fleet (§4.5).
async fn connect_legacy(connectors: &[(VenueId, Arc<dyn connectors::VenueConnector>)]) {
    for (venue, connector) in connectors {
        let venue = *venue;
        let connector = connector.clone();
        tokio::spawn(async move {
            if let Err(e) = connector.connect().await {
                tracing::error!(venue = venue.as_str(), error = %e, "legacy connect failed");
            }
        });
    }
}

/// Maps `(venue, venue-native-symbol) -> canonical` from the last REST
/// snapshot's instrument list, since funding events only carry the
/// venue-native symbol, not the canonical (§4.4 "Live corrections").
fn index_canonical_lookup(index: &rest_loader::TokenIndex) -> HashMap<(VenueId, String), String> {
    let mut map = HashMap::new();
    for token in index.tokens.values() {
        for (venue, view) in &token.exchanges {
            map.insert((*venue, view.instrument.venue_symbol.clone()), token.canonical.clone());
        }
    }
    map
}

/// Order-book dispatch (§4.6, §4.4 "Live corrections"): every normalized
/// order-book event is both published and fed back into Spread Discovery
/// so a streaming update can supersede the REST snapshot without waiting
/// for the next refresh cycle (spec.md §8 scenario 2).
async fn run_orderbook_dispatch(
    mut rx: mpsc::Receiver<OrderBook>,
    publisher: Arc<Publisher>,
    spread_engine: Arc<SpreadEngine>,
) {
    while let Some(book) = rx.recv().await {
        publisher.publish_orderbook(&book).await;
        let inventory = spread_engine.apply_orderbook_update(&book);
        metrics::set_preliminary_spreads_found(inventory.count);
    }
}

async fn run_trade_dispatch(mut rx: mpsc::Receiver<Trade>, publisher: Arc<Publisher>) {
    while let Some(trade) = rx.recv().await {
        publisher.publish_trade(&trade).await;
    }
}

/// Funding dispatch (§4.4 "Live corrections", analogous to order-book
/// updates): resolves the venue-native symbol to a canonical via the last
/// REST snapshot before applying the correction. A funding update for a
/// symbol not present in that snapshot (e.g. a brand-new listing) is
/// dropped; the next REST refresh will pick it up.
async fn run_funding_dispatch(
    mut rx: mpsc::Receiver<FundingRate>,
    spread_engine: Arc<SpreadEngine>,
    canonical_lookup: HashMap<(VenueId, String), String>,
) {
    while let Some(rate) = rx.recv().await {
        let Some(canonical) = canonical_lookup.get(&(rate.venue, rate.venue_symbol.clone())) else {
            continue;
        };
        spread_engine.apply_funding_update(rate.venue, canonical, &rate);
    }
}

/// Error dispatch (§7): connection and protocol errors surfaced by any
/// connector become log events; the associated metric was already
/// recorded at the point of failure. Errors never propagate to another
/// venue or abort the pipeline.
async fn run_error_log(mut rx: mpsc::Receiver<ConnectorError>) {
    while let Some(err) = rx.recv().await {
        tracing::warn!(venue = err.venue.as_str(), message = %err.message, "connector error");
    }
}
