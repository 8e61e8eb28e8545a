//! The uniform `VenueConnector` contract (§4.2) and the state machine that
//! governs its connection lifecycle (§4.5: `idle -> connecting ->
//! connected <-> disconnected -> closed`).

use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::model::{AssetInfo, FundingRate, Instrument, OrderBook, PriceTicker, Trade, VenueId};

#[derive(Debug, Clone)]
pub struct Credential {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Idle = 0,
    Connecting = 1,
    Connected = 2,
    Disconnected = 3,
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Disconnected,
            4 => ConnectionState::Closed,
            _ => ConnectionState::Idle,
        }
    }
}

/// Shared atomic connection status, read/written by the connector's own
/// tasks and polled by the Streaming Manager's monitor tick.
#[derive(Default)]
pub struct ConnectionStatus {
    state: AtomicU8,
    last_message_time: AtomicI64,
}

impl ConnectionStatus {
    pub fn new() -> Self {
        Self { state: AtomicU8::new(ConnectionState::Idle as u8), last_message_time: AtomicI64::new(0) }
    }

    pub fn set(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_connected(&self) -> bool {
        self.get() == ConnectionState::Connected
    }

    pub fn touch(&self, timestamp_ms: i64) {
        self.last_message_time.store(timestamp_ms, Ordering::SeqCst);
    }

    pub fn last_message_time(&self) -> Option<i64> {
        let v = self.last_message_time.load(Ordering::SeqCst);
        if v == 0 { None } else { Some(v) }
    }
}

/// Error events surfaced on the error handler channel (§4.2, §7:
/// "Streaming read errors cause disconnect and rely on the Streaming
/// Manager").
#[derive(Debug, Clone)]
pub struct ConnectorError {
    pub venue: VenueId,
    pub message: String,
}

/// Handler channel slots a connector forwards normalized events to.
/// Registering a handler replaces any previous one.
pub struct Handlers {
    pub orderbook: Option<mpsc::Sender<OrderBook>>,
    pub trade: Option<mpsc::Sender<Trade>>,
    pub funding: Option<mpsc::Sender<FundingRate>>,
    pub error: Option<mpsc::Sender<ConnectorError>>,
}

impl Default for Handlers {
    fn default() -> Self {
        Self { orderbook: None, trade: None, funding: None, error: None }
    }
}

/// Uniform per-venue contract (§4.2). Every venue implementation is a
/// data-driven variant keyed by [`VenueId`] — no implementation
/// inheritance, only composition (see `connectors::engine::GenericConnector`).
#[async_trait]
pub trait VenueConnector: Send + Sync {
    fn id(&self) -> VenueId;

    async fn fetch_instruments(&self) -> Result<Vec<Instrument>>;
    async fn fetch_price_tickers(&self) -> Result<Vec<PriceTicker>>;
    async fn fetch_funding_rates(&self) -> Result<Vec<FundingRate>>;
    async fn fetch_asset_info(&self) -> Result<Vec<AssetInfo>>;
    async fn fetch_orderbook_snapshot(&self, symbol: &str, depth: usize) -> Result<OrderBook>;

    /// Legacy mode: open the socket and subscribe to every configured
    /// symbol.
    async fn connect(&self) -> Result<()>;
    /// Two-phase mode: open the socket and subscribe only to `symbols`.
    async fn connect_for_symbols(&self, symbols: &[String]) -> Result<()>;

    async fn subscribe(&self, symbols: &[String]) -> Result<()>;
    async fn unsubscribe(&self, symbols: &[String]) -> Result<()>;
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;
    fn last_message_time(&self) -> Option<i64>;

    fn set_orderbook_handler(&self, tx: mpsc::Sender<OrderBook>);
    fn set_trade_handler(&self, tx: mpsc::Sender<Trade>);
    fn set_funding_handler(&self, tx: mpsc::Sender<FundingRate>);
    fn set_error_handler(&self, tx: mpsc::Sender<ConnectorError>);

    /// Injects credentials for authenticated REST (rare, optional, §4.2).
    fn set_credentials(&self, credential: Credential);
}
