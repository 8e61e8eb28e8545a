//! Publisher (§4.6). Writes order-book updates, trade events, and the
//! spread inventory to Redis streams/keys consumable by downstream
//! readers. Writes are best-effort: a failure is counted and logged, never
//! propagated back to the producer (§7 "publish error: count, continue").

use std::time::Instant;

use redis::AsyncCommands;

use crate::metrics;
use crate::model::{OrderBook, PreliminarySpread, SpreadInventory, Trade};

const ORDERBOOK_STREAM_CAP: usize = 1_000;
const TRADES_STREAM_CAP: usize = 10_000;
const SPREAD_DATA_TTL_SECS: u64 = 300;
const SPREADS_LIST_TTL_SECS: u64 = 30;

pub struct Publisher {
    client: redis::Client,
}

impl Publisher {
    pub fn new(redis_host: &str, redis_port: u16) -> crate::error::Result<Self> {
        let url = format!("redis://{redis_host}:{redis_port}");
        let client = redis::Client::open(url).map_err(|e| crate::error::EngineError::Publish(e.to_string()))?;
        Ok(Self { client })
    }

    async fn connection(&self) -> crate::error::Result<redis::aio::MultiplexedConnection> {
        self.client.get_multiplexed_async_connection().await.map_err(|e| crate::error::EngineError::Publish(e.to_string()))
    }

    /// `orderbook:<venue>:<symbol>` append-only stream, capped at ~1 000
    /// entries, plus a broadcast publish for live readers (§4.6, §9's
    /// decision on the broadcast/key-only open question: both are written,
    /// the stream for replay/catch-up, the broadcast for live fan-out).
    pub async fn publish_orderbook(&self, book: &OrderBook) {
        let started = Instant::now();
        let result = self.try_publish_orderbook(book).await;
        metrics::record_publish(started.elapsed().as_secs_f64(), result.is_ok());
        if let Err(e) = result {
            tracing::warn!(venue = book.venue.as_str(), symbol = %book.venue_symbol, error = %e, "orderbook publish failed");
        }
    }

    async fn try_publish_orderbook(&self, book: &OrderBook) -> crate::error::Result<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(book).map_err(|e| crate::error::EngineError::Publish(e.to_string()))?;
        let stream_key = format!("orderbook:{}:{}", book.venue.as_str(), book.venue_symbol);

        let _: String = conn
            .xadd_maxlen(&stream_key, redis::streams::StreamMaxlen::Approx(ORDERBOOK_STREAM_CAP), "*", &[("data", payload.as_str())])
            .await
            .map_err(|e| crate::error::EngineError::Publish(e.to_string()))?;

        let _: () = conn
            .publish(&stream_key, payload)
            .await
            .map_err(|e| crate::error::EngineError::Publish(e.to_string()))?;

        Ok(())
    }

    /// `trades:<venue>:<symbol>` append-only stream, capped at ~10 000.
    pub async fn publish_trade(&self, trade: &Trade) {
        let started = Instant::now();
        let result = self.try_publish_trade(trade).await;
        metrics::record_publish(started.elapsed().as_secs_f64(), result.is_ok());
        if let Err(e) = result {
            tracing::warn!(venue = trade.venue.as_str(), symbol = %trade.venue_symbol, error = %e, "trade publish failed");
        }
    }

    async fn try_publish_trade(&self, trade: &Trade) -> crate::error::Result<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(trade).map_err(|e| crate::error::EngineError::Publish(e.to_string()))?;
        let stream_key = format!("trades:{}:{}", trade.venue.as_str(), trade.venue_symbol);

        let _: String = conn
            .xadd_maxlen(&stream_key, redis::streams::StreamMaxlen::Approx(TRADES_STREAM_CAP), "*", &[("data", payload.as_str())])
            .await
            .map_err(|e| crate::error::EngineError::Publish(e.to_string()))?;

        Ok(())
    }

    /// Per-spread key (`spread:data:<id>`, TTL 5 min) plus a broadcast on
    /// `spread:<id>` (§4.6).
    pub async fn publish_spread(&self, spread: &PreliminarySpread) {
        let started = Instant::now();
        let result = self.try_publish_spread(spread).await;
        metrics::record_publish(started.elapsed().as_secs_f64(), result.is_ok());
        if let Err(e) = result {
            tracing::warn!(spread_id = %spread.id, error = %e, "spread publish failed");
        }
    }

    async fn try_publish_spread(&self, spread: &PreliminarySpread) -> crate::error::Result<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(spread).map_err(|e| crate::error::EngineError::Publish(e.to_string()))?;
        let key = format!("spread:data:{}", spread.id);

        let _: () = conn.set_ex(&key, payload.as_str(), SPREAD_DATA_TTL_SECS).await.map_err(|e| crate::error::EngineError::Publish(e.to_string()))?;
        let _: () = conn.sadd("spreads:active", &spread.id).await.map_err(|e| crate::error::EngineError::Publish(e.to_string()))?;
        let _: () = conn
            .publish(format!("spread:{}", spread.id), payload)
            .await
            .map_err(|e| crate::error::EngineError::Publish(e.to_string()))?;

        Ok(())
    }

    /// `spreads:list` (TTL 30 s) plus publishing every constituent spread
    /// individually (§4.6). Replaces `spreads:active` with exactly the ids
    /// present in this cycle's inventory.
    pub async fn publish_inventory(&self, inventory: &SpreadInventory) {
        let started = Instant::now();
        let result = self.try_publish_inventory(inventory).await;
        metrics::record_publish(started.elapsed().as_secs_f64(), result.is_ok());
        if let Err(e) = result {
            tracing::warn!(error = %e, "inventory publish failed");
        }

        for spread in &inventory.spreads {
            self.publish_spread(spread).await;
        }
    }

    async fn try_publish_inventory(&self, inventory: &SpreadInventory) -> crate::error::Result<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(inventory).map_err(|e| crate::error::EngineError::Publish(e.to_string()))?;

        let _: () = conn.set_ex("spreads:list", payload, SPREADS_LIST_TTL_SECS).await.map_err(|e| crate::error::EngineError::Publish(e.to_string()))?;

        let _: () = conn.del("spreads:active").await.map_err(|e| crate::error::EngineError::Publish(e.to_string()))?;
        if !inventory.spreads.is_empty() {
            let ids: Vec<&str> = inventory.spreads.iter().map(|s| s.id.as_str()).collect();
            let _: () = conn.sadd("spreads:active", ids).await.map_err(|e| crate::error::EngineError::Publish(e.to_string()))?;
        }

        Ok(())
    }

    /// Startup liveness check (§6 "nonzero fatal if ... the key/value store
    /// is unreachable at startup").
    pub async fn ping(&self) -> crate::error::Result<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await.map_err(|e| crate::error::EngineError::Publish(e.to_string()))?;
        Ok(())
    }
}
