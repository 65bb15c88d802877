use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::warn;

use crate::agent::Agent;
use crate::bus::{Bus, BusRecord};
use crate::error::Result;

use super::OracleSource;

/// Polls `oracle.get_current(symbol)` for each configured symbol on an
/// interval and publishes `oracle.{source}.{symbol}` (spec.md §4.3).
pub struct OracleAgent {
    oracle: Arc<dyn OracleSource>,
    symbols: Vec<String>,
    interval: Duration,
    last_poll: Mutex<Instant>,
}

impl OracleAgent {
    pub fn new(oracle: Arc<dyn OracleSource>, symbols: Vec<String>, interval: Duration) -> Self {
        OracleAgent { oracle, symbols, interval, last_poll: Mutex::new(Instant::now() - interval) }
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
impl Agent for OracleAgent {
    fn name(&self) -> &str {
        self.oracle.source()
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

        for symbol in &self.symbols {
            let data = match self.oracle.get_current(symbol).await {
                Ok(d) => d,
                Err(e) => {
                    warn!(source = self.oracle.source(), symbol, error = %e, "oracle_poll_failed");
                    continue;
                }
            };

            let mut record = BusRecord::new();
            record.insert("source".to_string(), data.source.clone());
            record.insert("symbol".to_string(), data.symbol.clone());
            record.insert("value".to_string(), data.value.to_string());
            record.insert("timestamp".to_string(), data.timestamp.to_rfc3339());
            for (k, v) in &data.metadata {
                record.insert(format!("meta_{k}"), v.clone());
            }

            let channel = format!("oracle.{}.{}", data.source, data.symbol);
            bus.publish(&channel, record).await?;
        }
        Ok(())
    }
}
