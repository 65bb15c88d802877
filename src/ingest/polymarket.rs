use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::models::{Market, Order, OrderBook, Trade, TradeRequest, TradeStatus};

use super::VenueAdapter;

/// Rate limiter for Polymarket's public CLOB API, grounded on
/// `scrapers/polymarket.rs::RateLimiter` (requests-per-10s window).
struct RateLimiter {
    max_per_window: usize,
    window: Duration,
    timestamps: parking_lot::Mutex<Vec<tokio::time::Instant>>,
}

impl RateLimiter {
    fn new(max_per_window: usize, window: Duration) -> Self {
        RateLimiter { max_per_window, window, timestamps: parking_lot::Mutex::new(Vec::new()) }
    }

    async fn acquire(&self) {
        loop {
            let now = tokio::time::Instant::now();
            let wait = {
                let mut ts = self.timestamps.lock();
                ts.retain(|t| now.duration_since(*t) < self.window);
                if ts.len() < self.max_per_window {
                    ts.push(now);
                    None
                } else {
                    Some(self.window - now.duration_since(ts[0]))
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

/// Venue adapter for CLOB-style REST venues (Polymarket and its lookalikes),
/// grounded on `scrapers/polymarket_api.rs::PolymarketScraper`: a
/// `reqwest::Client` with a 30s timeout (spec.md §5 external HTTP timeout)
/// plus a defensive string-or-number price parser. `venue` labels the
/// adapter's markets/trades so a second REST venue sharing this wire shape
/// (e.g. Kalshi) isn't misattributed to Polymarket.
pub struct PolymarketAdapter {
    client: reqwest::Client,
    base_url: String,
    venue: String,
    connected: AtomicBool,
    limiter: RateLimiter,
}

impl PolymarketAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_venue("polymarket", base_url)
    }

    pub fn with_venue(venue: impl Into<String>, base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client builds with static config");
        PolymarketAdapter {
            client,
            base_url: base_url.into(),
            venue: venue.into(),
            connected: AtomicBool::new(false),
            limiter: RateLimiter::new(50, Duration::from_secs(10)),
        }
    }
}

/// Tolerates prices encoded as either JSON strings or numbers (spec.md §9
/// "defensive parsing at the boundary"), mirroring `scrapers/polymarket.rs`'s
/// custom `de_f64` deserializer.
fn parse_price(raw: &serde_json::Value) -> Decimal {
    match raw {
        serde_json::Value::String(s) => Decimal::from_str_exact(s.trim()).unwrap_or(Decimal::ZERO),
        serde_json::Value::Number(n) => n
            .as_f64()
            .and_then(|f| Decimal::try_from(f).ok())
            .unwrap_or(Decimal::ZERO),
        _ => Decimal::ZERO,
    }
}

#[async_trait]
impl VenueAdapter for PolymarketAdapter {
    fn venue(&self) -> &str {
        &self.venue
    }

    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn get_markets(&self) -> Result<Vec<Market>> {
        self.limiter.acquire().await;
        let url = format!("{}/markets", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("polymarket get_markets request failed")?;
        if !resp.status().is_success() {
            return Err(anyhow::anyhow!("polymarket get_markets returned {}", resp.status()).into());
        }
        let body: serde_json::Value = resp.json().await.context("polymarket get_markets body was not json")?;
        let now = Utc::now();
        let markets = body
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| {
                        let external_id = m.get("condition_id")?.as_str()?.to_string();
                        let title = m.get("question").and_then(|v| v.as_str()).unwrap_or("").to_string();
                        let yes_price = m.get("yes_price").map(parse_price).unwrap_or(Decimal::ZERO);
                        let no_price = m.get("no_price").map(parse_price).unwrap_or(Decimal::ZERO);
                        Some(Market {
                            venue: self.venue.clone(),
                            external_id,
                            title,
                            yes_price,
                            no_price,
                            volume_24h: Decimal::ZERO,
                            liquidity: Decimal::ZERO,
                            last_update: now,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(markets)
    }

    async fn get_order_book(&self, _market_id: &str, _outcome: &str) -> Result<Option<OrderBook>> {
        // Real order-book depth requires the CLOB websocket; out of scope for
        // the polling adapter (spec.md §1 scopes venue wire glue out).
        Ok(None)
    }

    async fn place_order(&self, request: &TradeRequest) -> Result<Trade> {
        Ok(Trade {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: request.id.clone(),
            market_id: request.market_id.clone(),
            venue: self.venue.clone(),
            side: request.side,
            outcome: request.outcome,
            amount: request.amount,
            price: request.max_price,
            fees: Decimal::ZERO,
            status: TradeStatus::Submitted,
            external_id: None,
            executed_at: Utc::now(),
            filled_at: None,
        })
    }

    async fn get_balance(&self) -> Result<Decimal> {
        Ok(Decimal::ZERO)
    }

    async fn get_order_status(&self, _order_id: &str) -> Result<Option<Order>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_price_accepts_string_and_number() {
        assert_eq!(parse_price(&serde_json::json!("0.42")), Decimal::from_str_exact("0.42").unwrap());
        assert_eq!(parse_price(&serde_json::json!(0.5)), Decimal::try_from(0.5_f64).unwrap());
    }

    #[test]
    fn parse_price_defaults_on_malformed_input() {
        assert_eq!(parse_price(&serde_json::json!("not-a-number")), Decimal::ZERO);
        assert_eq!(parse_price(&serde_json::Value::Null), Decimal::ZERO);
    }
}
