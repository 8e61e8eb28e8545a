//! Streaming Manager / Phase 2 (§4.5). Opens, tracks, and reconciles
//! per-venue streaming subscriptions against the symbol set the Spread
//! Discovery Engine says is implicated by the current inventory; detects
//! staleness and re-dials disconnected venues on a monitor tick.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use crate::connectors::VenueConnector;
use crate::metrics;
use crate::model::VenueId;
use crate::util::now_ms;

const STALENESS_THRESHOLD_MS: i64 = 30_000;

/// Per-venue subscription bookkeeping (§4.5 "State"). The active set is
/// the manager's source of truth for what *should* be subscribed, used to
/// recover a connector's symbols on reconnect even if the Connector's own
/// internal subscription set was lost along with the socket.
struct VenueState {
    connector: Arc<dyn VenueConnector>,
    active: HashSet<String>,
}

pub struct StreamingManager {
    venues: Mutex<HashMap<VenueId, VenueState>>,
    shutdown: Arc<Notify>,
}

impl StreamingManager {
    pub fn new(connectors: Vec<(VenueId, Arc<dyn VenueConnector>)>) -> Self {
        let venues = connectors
            .into_iter()
            .map(|(venue, connector)| (venue, VenueState { connector, active: HashSet::new() }))
            .collect();
        Self { venues: Mutex::new(venues), shutdown: Arc::new(Notify::new()) }
    }

    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// `connect_for_spreads` (§4.5): fan out, each Connector opens its
    /// socket and subscribes to exactly the given symbols. Per-venue
    /// errors are logged but never abort the fleet.
    pub async fn connect_for_spreads(&self, targets: HashMap<VenueId, Vec<String>>) {
        let mut venues = self.venues.lock().await;
        for (venue, symbols) in targets {
            let Some(state) = venues.get_mut(&venue) else {
                tracing::warn!(venue = venue.as_str(), "spread references an unconfigured venue, skipping");
                continue;
            };
            state.active = symbols.iter().cloned().collect();
            let connector = state.connector.clone();
            let symbols_owned = symbols.clone();
            tokio::spawn(async move {
                if let Err(e) = connector.connect_for_symbols(&symbols_owned).await {
                    tracing::error!(venue = venue.as_str(), error = %e, "connect_for_symbols failed");
                }
            });
        }
    }

    /// `update_subscriptions` (§4.5): diff against current state, issuing
    /// `subscribe(added)` / `unsubscribe(removed)`. A venue whose diff is
    /// empty on both sides issues no calls (§8 idempotence property).
    pub async fn update_subscriptions(&self, targets: HashMap<VenueId, Vec<String>>) {
        let mut venues = self.venues.lock().await;

        for (venue, state) in venues.iter_mut() {
            let desired: HashSet<String> = targets.get(venue).cloned().unwrap_or_default().into_iter().collect();

            let added: Vec<String> = desired.difference(&state.active).cloned().collect();
            let removed: Vec<String> = state.active.difference(&desired).cloned().collect();

            if added.is_empty() && removed.is_empty() {
                continue;
            }

            if !state.connector.is_connected() && !desired.is_empty() {
                // Not yet streaming this venue at all; open fresh rather
                // than diffing against an empty socket.
                state.active = desired.clone();
                let connector = state.connector.clone();
                let venue = *venue;
                let symbols = desired.into_iter().collect::<Vec<_>>();
                tokio::spawn(async move {
                    if let Err(e) = connector.connect_for_symbols(&symbols).await {
                        tracing::error!(venue = venue.as_str(), error = %e, "connect_for_symbols failed");
                    }
                });
                continue;
            }

            if !added.is_empty() {
                if let Err(e) = state.connector.subscribe(&added).await {
                    tracing::warn!(venue = venue.as_str(), error = %e, "subscribe failed");
                }
            }
            if !removed.is_empty() {
                if let Err(e) = state.connector.unsubscribe(&removed).await {
                    tracing::warn!(venue = venue.as_str(), error = %e, "unsubscribe failed");
                }
            }
            state.active = desired;
        }
    }

    /// `monitor_connections` (§4.5): every `interval`, for each venue with
    /// a non-empty active set, re-dial if disconnected and flag staleness.
    /// Runs until `shutdown_handle()` is notified.
    pub async fn monitor_connections(self: &Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.monitor_tick().await,
                _ = self.shutdown.notified() => break,
            }
        }
    }

    async fn monitor_tick(&self) {
        let mut venues = self.venues.lock().await;
        for (venue, state) in venues.iter_mut() {
            if state.active.is_empty() {
                continue;
            }

            if !state.connector.is_connected() {
                tracing::info!(venue = venue.as_str(), "reconnecting disconnected venue");
                let connector = state.connector.clone();
                let symbols: Vec<String> = state.active.iter().cloned().collect();
                let venue = *venue;
                tokio::spawn(async move {
                    if let Err(e) = connector.connect_for_symbols(&symbols).await {
                        tracing::error!(venue = venue.as_str(), error = %e, "reconnect failed");
                    }
                });
                continue;
            }

            if let Some(last) = state.connector.last_message_time() {
                if now_ms() - last > STALENESS_THRESHOLD_MS {
                    tracing::warn!(venue = venue.as_str(), "stream stale, flagging for reconnect");
                    metrics::record_staleness(*venue);
                    state.connector.disconnect().await;
                }
            }
        }
    }

    /// Graceful shutdown (§4.5): disconnects every venue and stops the
    /// monitor loop. Idempotent.
    pub async fn disconnect_all(&self) {
        self.shutdown.notify_waiters();
        let venues = self.venues.lock().await;
        for state in venues.values() {
            state.connector.disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::connector::{ConnectorError, Credential};
    use crate::error::Result;
    use crate::model::{AssetInfo, FundingRate, Instrument, OrderBook, PriceTicker, Trade};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    struct FakeConnector {
        connected: AtomicBool,
    }

    #[async_trait]
    impl VenueConnector for FakeConnector {
        fn id(&self) -> VenueId {
            VenueId::Binance
        }
        async fn fetch_instruments(&self) -> Result<Vec<Instrument>> {
            Ok(vec![])
        }
        async fn fetch_price_tickers(&self) -> Result<Vec<PriceTicker>> {
            Ok(vec![])
        }
        async fn fetch_funding_rates(&self) -> Result<Vec<FundingRate>> {
            Ok(vec![])
        }
        async fn fetch_asset_info(&self) -> Result<Vec<AssetInfo>> {
            Ok(vec![])
        }
        async fn fetch_orderbook_snapshot(&self, _symbol: &str, _depth: usize) -> Result<OrderBook> {
            unimplemented!()
        }
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn connect_for_symbols(&self, _symbols: &[String]) -> Result<()> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn subscribe(&self, _symbols: &[String]) -> Result<()> {
            Ok(())
        }
        async fn unsubscribe(&self, _symbols: &[String]) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        fn last_message_time(&self) -> Option<i64> {
            Some(now_ms())
        }
        fn set_orderbook_handler(&self, _tx: mpsc::Sender<OrderBook>) {}
        fn set_trade_handler(&self, _tx: mpsc::Sender<Trade>) {}
        fn set_funding_handler(&self, _tx: mpsc::Sender<FundingRate>) {}
        fn set_error_handler(&self, _tx: mpsc::Sender<ConnectorError>) {}
        fn set_credentials(&self, _credential: Credential) {}
    }

    #[tokio::test]
    async fn unchanged_subscription_set_issues_no_calls() {
        let connector: Arc<dyn VenueConnector> = Arc::new(FakeConnector { connected: AtomicBool::new(true) });
        let manager = StreamingManager::new(vec![(VenueId::Binance, connector)]);

        let mut targets = HashMap::new();
        targets.insert(VenueId::Binance, vec!["BTCUSDT".to_string()]);
        manager.update_subscriptions(targets.clone()).await;
        // Second call with the same set should be a no-op (no panics, no reconnect spawn).
        manager.update_subscriptions(targets).await;
    }
}
