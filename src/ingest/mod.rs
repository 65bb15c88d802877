//! Venue and oracle ingest (spec.md §4.3).
//!
//! `VenueAdapter` generalizes `scrapers/polymarket_api.rs::PolymarketScraper`
//! (reqwest client, rate limiter, defensive JSON parsing) into the abstract
//! contract spec.md §4.8 names. `OracleSource` follows the same polling
//! shape for a reference-price feed. Streaming sources use
//! `tokio_tungstenite` the way `edge/receiver.rs` connects to a venue
//! WebSocket, generalized away from any one wire format.

mod oracle_agent;
mod polymarket;
mod reference_oracle;
mod venue_watcher;

pub use oracle_agent::OracleAgent;
pub use polymarket::PolymarketAdapter;
pub use reference_oracle::ReferenceOracle;
pub use venue_watcher::VenueWatcher;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::models::{Market, Order, OracleData, OrderBook, Trade, TradeRequest};

#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn venue(&self) -> &str;

    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    fn is_connected(&self) -> bool;

    async fn get_markets(&self) -> Result<Vec<Market>>;
    async fn get_order_book(&self, market_id: &str, outcome: &str) -> Result<Option<OrderBook>>;
    async fn place_order(&self, request: &TradeRequest) -> Result<Trade>;
    async fn get_balance(&self) -> Result<Decimal>;

    async fn get_order_status(&self, _order_id: &str) -> Result<Option<Order>> {
        Ok(None)
    }
    async fn cancel_order(&self, _order_id: &str) -> Result<bool> {
        Ok(false)
    }
    async fn get_open_orders(&self) -> Result<Vec<Order>> {
        Ok(Vec::new())
    }
}

#[async_trait]
pub trait OracleSource: Send + Sync {
    fn source(&self) -> &str;

    async fn get_current(&self, symbol: &str) -> Result<OracleData>;

    /// Streaming oracles override this; the default reports no streaming
    /// support so `OracleAgent` falls back to polling (spec.md §4.3).
    fn supports_streaming(&self) -> bool {
        false
    }

    async fn stream(&self) -> Result<BoxStream<'static, OracleData>> {
        Ok(Box::pin(futures_util::stream::empty()))
    }
}
