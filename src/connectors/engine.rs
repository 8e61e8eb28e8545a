//! Generic connector runtime (§4.2, §5). One [`GenericConnector<S>`] per
//! venue — parameterized over a [`VenueSpec`] — drives the REST calls,
//! the WebSocket read loop, the heartbeat loop, and handler dispatch
//! identically for every venue. This is the `runner.rs` idea from the
//! teacher generalized from a single hardcoded loop into one reusable
//! engine shared by all eleven venues, per §9's "composition, not an
//! inheritance hierarchy" design note.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::canonical;
use crate::connectors::connector::{
    Credential, ConnectionStatus, ConnectionState, ConnectorError, Handlers, VenueConnector,
};
use crate::connectors::spec::{ParsedEvent, VenueSpec};
use crate::error::{EngineError, Result};
use crate::metrics;
use crate::model::{OrderBook, Trade};
use crate::orderbook::{DeltaOutcome, OrderBookStore};
use crate::util::now_ms;

const WS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

pub struct GenericConnector<S: VenueSpec> {
    spec: S,
    http: reqwest::Client,
    status: ConnectionStatus,
    handlers: Mutex<Handlers>,
    store: OrderBookStore,
    subscribed: Mutex<HashSet<String>>,
    credential: Mutex<Option<Credential>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    shutdown: Arc<Notify>,
}

impl<S: VenueSpec> GenericConnector<S> {
    pub fn new(spec: S) -> Self {
        let venue = spec.id();
        Self {
            spec,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("failed to build reqwest client"),
            status: ConnectionStatus::new(),
            handlers: Mutex::new(Handlers::default()),
            store: OrderBookStore::new(venue),
            subscribed: Mutex::new(HashSet::new()),
            credential: Mutex::new(None),
            outbound: Mutex::new(None),
            shutdown: Arc::new(Notify::new()),
        }
    }

    async fn emit_error(&self, message: String) {
        metrics::record_connection_error(self.spec.id());
        let handlers = self.handlers.lock().await;
        if let Some(tx) = &handlers.error {
            let _ = tx
                .send(ConnectorError { venue: self.spec.id(), message })
                .await;
        }
    }

    /// Drives one connection's lifetime: handshake, subscribe, then a
    /// single select loop multiplexing inbound frames, outbound
    /// (subscribe/unsubscribe/heartbeat) frames, and the heartbeat
    /// ticker. Runs entirely on `&self` — no task spawning, so no `Arc<Self>`
    /// or `Clone` bound is needed on `GenericConnector`.
    async fn start(&self, symbols: Vec<String>) -> Result<()> {
        self.status.set(ConnectionState::Connecting);

        let (ws, _resp) = timeout(WS_HANDSHAKE_TIMEOUT, connect_async(self.spec.ws_url()))
            .await
            .map_err(|_| EngineError::WebSocket(tokio_tungstenite::tungstenite::Error::Io(
                std::io::Error::new(std::io::ErrorKind::TimedOut, "websocket handshake timed out"),
            )))
            .and_then(|r| r.map_err(EngineError::from))?;

        let (mut write, mut read) = ws.split();

        let sub = self.spec.build_subscribe_message(&symbols);
        write.send(Message::Text(sub.to_string().into())).await.map_err(EngineError::from)?;

        {
            let mut subscribed = self.subscribed.lock().await;
            subscribed.extend(symbols.iter().cloned());
        }
        metrics::set_subscribed_symbols(self.spec.id(), self.subscribed.lock().await.len());

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        *self.outbound.lock().await = Some(out_tx);

        self.status.set(ConnectionState::Connected);
        self.status.touch(now_ms());
        metrics::record_ws_connect(self.spec.id());

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

        // Read loop (§5 "Per (venue, symbol) order-book event stream:
        // strictly sequential").
        let result = loop {
            tokio::select! {
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.status.touch(now_ms());
                            self.handle_frame(&text).await;
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            self.status.touch(now_ms());
                            match self.spec.decode_binary_frame(&bytes) {
                                Ok(Some(text)) => self.handle_frame(&text).await,
                                Ok(None) => {}
                                Err(e) => {
                                    tracing::warn!(venue = self.spec.id().as_str(), error = %e, "failed to inflate binary frame");
                                    metrics::record_parse_error(self.spec.id());
                                }
                            }
                        }
                        Some(Ok(_)) => {} // ping/pong/close handled by tungstenite
                        Some(Err(e)) => break Err(EngineError::from(e)),
                        None => break Err(EngineError::WebSocket(
                            tokio_tungstenite::tungstenite::Error::ConnectionClosed,
                        )),
                    }
                }
                Some(msg) = out_rx.recv() => {
                    if write.send(msg).await.is_err() {
                        break Err(EngineError::WebSocket(
                            tokio_tungstenite::tungstenite::Error::ConnectionClosed,
                        ));
                    }
                }
                _ = heartbeat.tick() => {
                    if let Some(payload) = self.spec.heartbeat_payload() {
                        if write.send(Message::Text(payload.into())).await.is_err() {
                            break Err(EngineError::WebSocket(
                                tokio_tungstenite::tungstenite::Error::ConnectionClosed,
                            ));
                        }
                    }
                }
                _ = self.shutdown.notified() => break Ok(()),
            }
        };

        *self.outbound.lock().await = None;
        self.status.set(ConnectionState::Disconnected);
        metrics::record_ws_disconnect(self.spec.id());

        if let Err(e) = &result {
            self.emit_error(e.to_string()).await;
        }
        result
    }

    async fn send_raw(&self, msg: Message) -> Result<()> {
        let guard = self.outbound.lock().await;
        match &*guard {
            Some(tx) => tx.send(msg).map_err(|_| EngineError::Publish("connector writer closed".into())),
            None => Err(EngineError::Publish("connector not connected".into())),
        }
    }

    async fn handle_frame(&self, raw: &str) {
        let events = match self.spec.parse_message(raw) {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(venue = self.spec.id().as_str(), error = %e, "parse error, dropping message");
                metrics::record_parse_error(self.spec.id());
                return;
            }
        };

        for event in events {
            self.dispatch_event(event).await;
        }
    }

    async fn dispatch_event(&self, event: ParsedEvent) {
        match event {
            ParsedEvent::OrderBookSnapshot { venue_symbol, bids, asks, sequence_id, timestamp } => {
                self.store.apply_snapshot(&venue_symbol, &bids, &asks, sequence_id, timestamp);
                self.forward_orderbook(&venue_symbol).await;
            }
            ParsedEvent::OrderBookDelta { venue_symbol, bids, asks, sequence_id, timestamp } => {
                match self.store.apply_delta(&venue_symbol, &bids, &asks, sequence_id, timestamp) {
                    DeltaOutcome::Applied => self.forward_orderbook(&venue_symbol).await,
                    DeltaOutcome::SequenceGap => {
                        tracing::warn!(
                            venue = self.spec.id().as_str(),
                            symbol = %venue_symbol,
                            "sequence gap, re-fetching snapshot"
                        );
                        self.refetch_snapshot(&venue_symbol).await;
                    }
                    DeltaOutcome::NotInitialized => {
                        self.refetch_snapshot(&venue_symbol).await;
                    }
                }
            }
            ParsedEvent::Trade(trade) => {
                metrics::record_trade(self.spec.id());
                let handlers = self.handlers.lock().await;
                if let Some(tx) = &handlers.trade {
                    let _ = tx.send(trade).await;
                }
            }
            ParsedEvent::Funding(rate) => {
                metrics::record_funding_update(self.spec.id(), &rate.venue_symbol, rate.rate);
                let handlers = self.handlers.lock().await;
                if let Some(tx) = &handlers.funding {
                    let _ = tx.send(rate).await;
                }
            }
            ParsedEvent::Reply(text) => {
                if let Err(e) = self.send_raw(Message::Text(text.into())).await {
                    tracing::warn!(venue = self.spec.id().as_str(), error = %e, "failed to send keepalive reply");
                }
            }
            ParsedEvent::Control => {}
        }
    }

    async fn refetch_snapshot(&self, venue_symbol: &str) {
        match self.fetch_orderbook_snapshot(venue_symbol, self.spec.default_depth()).await {
            Ok(book) => {
                self.store.apply_snapshot(
                    venue_symbol,
                    &book.bids.iter().map(|l| (l.price, l.quantity)).collect::<Vec<_>>(),
                    &book.asks.iter().map(|l| (l.price, l.quantity)).collect::<Vec<_>>(),
                    book.sequence_id,
                    book.timestamp,
                );
                self.forward_orderbook(venue_symbol).await;
            }
            Err(e) => {
                tracing::warn!(venue = self.spec.id().as_str(), symbol = venue_symbol, error = %e, "snapshot re-fetch failed");
            }
        }
    }

    async fn forward_orderbook(&self, venue_symbol: &str) {
        let Some(canonical) = canonical::to_canonical(self.spec.id(), venue_symbol) else {
            metrics::record_parse_error(self.spec.id());
            return;
        };
        let Some(book) = self.store.get(venue_symbol, &canonical) else {
            return;
        };

        metrics::record_orderbook_update(self.spec.id(), venue_symbol, book.bids.len(), book.asks.len());
        if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
            if let Some(bps) = book.spread_bps() {
                metrics::record_best_bid_ask(self.spec.id(), venue_symbol, bid.price, ask.price, bps);
            }
        }

        let handlers = self.handlers.lock().await;
        if let Some(tx) = &handlers.orderbook {
            let _ = tx.send(book).await;
        }
    }
}

#[async_trait]
impl<S: VenueSpec> VenueConnector for GenericConnector<S> {
    fn id(&self) -> crate::model::VenueId {
        self.spec.id()
    }

    async fn fetch_instruments(&self) -> Result<Vec<crate::model::Instrument>> {
        let start = std::time::Instant::now();
        let result = self.spec.fetch_instruments(&self.http).await;
        metrics::record_rest_fetch(self.spec.id(), "instruments", start.elapsed().as_secs_f64(), result.is_ok());
        result
    }

    async fn fetch_price_tickers(&self) -> Result<Vec<crate::model::PriceTicker>> {
        let start = std::time::Instant::now();
        let result = self.spec.fetch_price_tickers(&self.http).await;
        metrics::record_rest_fetch(self.spec.id(), "tickers", start.elapsed().as_secs_f64(), result.is_ok());
        result
    }

    async fn fetch_funding_rates(&self) -> Result<Vec<crate::model::FundingRate>> {
        let start = std::time::Instant::now();
        let result = self.spec.fetch_funding_rates(&self.http).await;
        metrics::record_rest_fetch(self.spec.id(), "funding", start.elapsed().as_secs_f64(), result.is_ok());
        result
    }

    async fn fetch_asset_info(&self) -> Result<Vec<crate::model::AssetInfo>> {
        let start = std::time::Instant::now();
        let credential = self.credential.lock().await.clone();
        let result = self.spec.fetch_asset_info(&self.http, credential.as_ref()).await;
        metrics::record_rest_fetch(self.spec.id(), "asset_info", start.elapsed().as_secs_f64(), result.is_ok());
        result
    }

    async fn fetch_orderbook_snapshot(&self, symbol: &str, depth: usize) -> Result<OrderBook> {
        let start = std::time::Instant::now();
        let result = self.spec.fetch_orderbook_snapshot(&self.http, symbol, depth).await;
        metrics::record_rest_fetch(self.spec.id(), "orderbook_snapshot", start.elapsed().as_secs_f64(), result.is_ok());
        result
    }

    /// Legacy/single-phase mode (§4.2): subscribes to every instrument the
    /// venue currently lists, rather than a spread-discovery-derived subset.
    async fn connect(&self) -> Result<()> {
        let instruments = self.fetch_instruments().await?;
        let symbols: Vec<String> = instruments.into_iter().map(|i| i.venue_symbol).collect();
        self.connect_for_symbols(&symbols).await
    }

    async fn connect_for_symbols(&self, symbols: &[String]) -> Result<()> {
        self.start(symbols.to_vec()).await
    }

    async fn subscribe(&self, symbols: &[String]) -> Result<()> {
        let msg = self.spec.build_subscribe_message(symbols);
        self.send_raw(Message::Text(msg.to_string().into())).await?;
        let mut subscribed = self.subscribed.lock().await;
        subscribed.extend(symbols.iter().cloned());
        metrics::set_subscribed_symbols(self.spec.id(), subscribed.len());
        Ok(())
    }

    async fn unsubscribe(&self, symbols: &[String]) -> Result<()> {
        let msg = self.spec.build_unsubscribe_message(symbols);
        self.send_raw(Message::Text(msg.to_string().into())).await?;
        let mut subscribed = self.subscribed.lock().await;
        for s in symbols {
            subscribed.remove(s);
        }
        metrics::set_subscribed_symbols(self.spec.id(), subscribed.len());
        Ok(())
    }

    async fn disconnect(&self) {
        self.shutdown.notify_waiters();
        self.status.set(ConnectionState::Disconnected);
    }

    fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    fn last_message_time(&self) -> Option<i64> {
        self.status.last_message_time()
    }

    fn set_orderbook_handler(&self, tx: mpsc::Sender<OrderBook>) {
        if let Ok(mut h) = self.handlers.try_lock() {
            h.orderbook = Some(tx);
        }
    }

    fn set_trade_handler(&self, tx: mpsc::Sender<Trade>) {
        if let Ok(mut h) = self.handlers.try_lock() {
            h.trade = Some(tx);
        }
    }

    fn set_funding_handler(&self, tx: mpsc::Sender<crate::model::FundingRate>) {
        if let Ok(mut h) = self.handlers.try_lock() {
            h.funding = Some(tx);
        }
    }

    fn set_error_handler(&self, tx: mpsc::Sender<ConnectorError>) {
        if let Ok(mut h) = self.handlers.try_lock() {
            h.error = Some(tx);
        }
    }

    fn set_credentials(&self, credential: Credential) {
        if let Ok(mut c) = self.credential.try_lock() {
            *c = Some(credential);
        }
    }
}
