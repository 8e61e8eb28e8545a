//! REST Loader / Phase 1 (§4.3). Fans out every configured connector's
//! REST mode in parallel, merges the per-venue results into a
//! per-canonical token index, and feeds it to the Spread Discovery
//! Engine. Runs once at startup and again on every periodic refresh tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Notify};

use crate::connectors::VenueConnector;
use crate::model::{AssetInfo, Canonical, FundingRate, Instrument, PriceTicker, VenueId};

/// One venue's merged view of a single canonical token (§4.3 step 3).
#[derive(Debug, Clone)]
pub struct ExchangeView {
    pub instrument: Instrument,
    pub ticker: PriceTicker,
    pub funding: Option<FundingRate>,
    pub asset: Option<AssetInfo>,
}

#[derive(Debug, Clone)]
pub struct TokenData {
    pub canonical: Canonical,
    pub exchanges: HashMap<VenueId, ExchangeView>,
}

/// Snapshot handed to Spread Discovery; replaced atomically on each cycle
/// (§5 "the token index ... are replaced atomically per discovery cycle").
#[derive(Debug, Clone, Default)]
pub struct TokenIndex {
    pub tokens: HashMap<Canonical, TokenData>,
}

impl TokenIndex {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

struct VenueResult {
    venue: VenueId,
    instruments: Vec<Instrument>,
    tickers: HashMap<String, PriceTicker>,
    funding: HashMap<String, FundingRate>,
    assets: HashMap<String, AssetInfo>,
}

/// Drives one connector's REST mode end to end (§4.3 step 1): instruments,
/// tickers, funding, asset info, in that order; any individual endpoint
/// failure is logged and degrades gracefully rather than aborting the
/// venue.
async fn load_venue(venue: VenueId, connector: &Arc<dyn VenueConnector>) -> VenueResult {
    let instruments = match connector.fetch_instruments().await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(venue = venue.as_str(), error = %e, "fetch_instruments failed");
            Vec::new()
        }
    };

    let tickers: HashMap<String, PriceTicker> = match connector.fetch_price_tickers().await {
        Ok(v) => v.into_iter().map(|t| (t.venue_symbol.clone(), t)).collect(),
        Err(e) => {
            tracing::warn!(venue = venue.as_str(), error = %e, "fetch_price_tickers failed");
            HashMap::new()
        }
    };

    let funding: HashMap<String, FundingRate> = match connector.fetch_funding_rates().await {
        Ok(v) => v.into_iter().map(|f| (f.venue_symbol.clone(), f)).collect(),
        Err(e) => {
            tracing::warn!(venue = venue.as_str(), error = %e, "fetch_funding_rates failed");
            HashMap::new()
        }
    };

    let assets: HashMap<String, AssetInfo> = match connector.fetch_asset_info().await {
        Ok(v) => v.into_iter().map(|a| (a.base_asset.clone(), a)).collect(),
        Err(e) => {
            tracing::warn!(venue = venue.as_str(), error = %e, "fetch_asset_info failed");
            HashMap::new()
        }
    };

    VenueResult { venue, instruments, tickers, funding, assets }
}

/// Runs Phase 1 once across every connector, in parallel, and merges the
/// results into a [`TokenIndex`] (§4.3 steps 2-3). Never fails: a venue
/// that returns nothing simply contributes nothing.
pub async fn load_once(connectors: &[(VenueId, Arc<dyn VenueConnector>)]) -> TokenIndex {
    let started = Instant::now();

    let futures = connectors.iter().map(|(venue, connector)| load_venue(*venue, connector));
    let results = futures_util::future::join_all(futures).await;

    let mut index = TokenIndex::default();

    for result in results {
        let VenueResult { venue, instruments, tickers, funding, assets } = result;

        for instrument in instruments {
            let Some(ticker) = tickers.get(&instrument.venue_symbol).cloned() else {
                // No ticker published for this instrument this cycle; skip,
                // Spread Discovery can't price a leg it has no quote for.
                continue;
            };

            let funding = funding.get(&instrument.venue_symbol).cloned();
            let asset = assets.get(&instrument.base).cloned().or_else(|| {
                Some(AssetInfo::degraded_default(venue, instrument.base.clone(), ticker.timestamp))
            });

            let canonical = instrument.canonical.clone();
            let view = ExchangeView { instrument, ticker, funding, asset };

            index
                .tokens
                .entry(canonical.clone())
                .or_insert_with(|| TokenData { canonical, exchanges: HashMap::new() })
                .exchanges
                .insert(venue, view);
        }
    }

    tracing::info!(
        tokens = index.tokens.len(),
        duration_ms = started.elapsed().as_millis() as u64,
        "REST loader cycle complete"
    );

    index
}

/// Starts the periodic refresh timer (§4.3: "default 30s"). Each tick
/// re-runs [`load_once`] and sends the resulting index down `tx`; the
/// receiving side (the Supervisor) feeds it to Spread Discovery and lets
/// the Streaming Manager reconcile subscriptions. Exits when `shutdown` is
/// notified.
pub async fn start_periodic_refresh(
    connectors: Vec<(VenueId, Arc<dyn VenueConnector>)>,
    interval: Duration,
    tx: mpsc::Sender<TokenIndex>,
    shutdown: Arc<Notify>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; the caller already ran load_once for startup

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let index = load_once(&connectors).await;
                if tx.send(index).await.is_err() {
                    tracing::warn!("REST refresh receiver dropped, stopping periodic refresh");
                    break;
                }
            }
            _ = shutdown.notified() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_connector_set_yields_empty_index() {
        let index = TokenIndex::default();
        assert!(index.is_empty());
    }
}
