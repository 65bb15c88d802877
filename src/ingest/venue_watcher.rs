use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::time::Instant;
use tracing::warn;

use crate::agent::Agent;
use crate::bus::{Bus, BusRecord};
use crate::error::Result;

use super::VenueAdapter;

/// Polls `adapter.get_markets()` on an interval, diffs against the last seen
/// YES price per market, and publishes changed markets (spec.md §4.3).
pub struct VenueWatcher {
    adapter: Arc<dyn VenueAdapter>,
    interval: Duration,
    last_poll: Mutex<Instant>,
    last_prices: Mutex<HashMap<String, Decimal>>,
}

impl VenueWatcher {
    pub fn new(adapter: Arc<dyn VenueAdapter>, interval: Duration) -> Self {
        VenueWatcher {
            adapter,
            interval,
            last_poll: Mutex::new(Instant::now() - interval),
            last_prices: Mutex::new(HashMap::new()),
        }
    }

    fn due(&self) -> bool {
        let mut last = self.last_poll.lock();
        if last.elapsed() >= self.interval {
            *last = Instant::now();
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl Agent for VenueWatcher {
    fn name(&self) -> &str {
        self.adapter.venue()
    }

    fn subscriptions(&self) -> Vec<String> {
        Vec::new()
    }

    async fn handle(&self, _channel: &str, _record: BusRecord, _bus: &dyn Bus) -> Result<()> {
        Ok(())
    }

    async fn tick(&self, bus: &dyn Bus) -> Result<()> {
        if !self.due() {
            return Ok(());
        }

        let markets = match self.adapter.get_markets().await {
            Ok(m) => m,
            Err(e) => {
                // Transient external errors are logged and the agent continues
                // (spec.md §7: "Log; retry at next poll; no fail").
                warn!(venue = self.adapter.venue(), error = %e, "get_markets_failed");
                return Ok(());
            }
        };

        let mut changed = Vec::new();
        {
            let mut last_prices = self.last_prices.lock();
            for market in &markets {
                let id = market.id();
                let changed_price = last_prices.get(&id).map(|p| *p != market.yes_price).unwrap_or(true);
                if changed_price {
                    last_prices.insert(id, market.yes_price);
                    changed.push(market);
                }
            }
        }

        let channel = format!("venue.{}.prices", self.adapter.venue());
        for market in &changed {
            let mut record = BusRecord::new();
            record.insert("market_id".to_string(), market.id());
            record.insert("venue".to_string(), market.venue.clone());
            record.insert("title".to_string(), market.title.clone());
            record.insert("yes_price".to_string(), market.yes_price.to_string());
            record.insert("no_price".to_string(), market.no_price.clone().to_string());
            record.insert("last_update".to_string(), market.last_update.to_rfc3339());
            bus.publish(&channel, record).await?;
        }

        let roster_channel = format!("venue.{}.markets", self.adapter.venue());
        let mut roster = BusRecord::new();
        roster.insert("count".to_string(), markets.len().to_string());
        for (i, market) in markets.iter().take(50).enumerate() {
            roster.insert(format!("market_{i}"), market.id());
        }
        bus.publish(&roster_channel, roster).await?;

        Ok(())
    }
}
