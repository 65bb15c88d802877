//! Opportunity scanner (spec.md §4.5).
//!
//! Grounded on `arbitrage/engine.rs::ArbitrageEngine`'s shape: a struct
//! holding indexed state plus pure scoring functions (see `formulas.rs`).

mod formulas;

pub use formulas::{cross_platform_edge, fair_value, multi_outcome_edge, oracle_lag_edge, single_condition_mispricing};

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::debug;

use crate::agent::Agent;
use crate::bus::{Bus, BusRecord};
use crate::error::Result;
use crate::fees::fee_estimate;
use crate::matcher::OracleMappingSink;
use crate::models::{venue_of, Market, MultiOutcomeMarket, Opportunity, OpportunityType, Outcome};

#[derive(Debug, Clone)]
struct Threshold {
    threshold: Decimal,
    direction: String,
    oracle_symbol: String,
}

#[derive(Default)]
struct ScannerState {
    markets: HashMap<String, Market>,
    multi_outcome_markets: HashMap<String, MultiOutcomeMarket>,
    oracle_values: HashMap<String, crate::models::OracleData>,
    market_oracle_map: HashMap<String, String>,
    market_thresholds: HashMap<String, Threshold>,
    matched_markets: HashMap<String, Vec<String>>,
    market_to_event: HashMap<String, String>,
}

pub struct ScannerConfig {
    pub min_edge_pct: Decimal,
    pub min_signal_strength: f64,
}

pub struct Scanner {
    state: parking_lot::Mutex<ScannerState>,
    config: ScannerConfig,
    active_venues: Vec<String>,
    active_oracles: Vec<String>,
    oracle_symbols: Vec<String>,
}

impl Scanner {
    pub fn new(config: ScannerConfig, active_venues: Vec<String>, active_oracles: Vec<String>, oracle_symbols: Vec<String>) -> Self {
        Scanner { state: parking_lot::Mutex::new(ScannerState::default()), config, active_venues, active_oracles, oracle_symbols }
    }

    /// Registers two market ids as the same underlying event for the
    /// cross-platform check (spec.md §4.5 indices). Not part of the matcher
    /// contract; wired by whatever component groups markets by event (e.g.
    /// the market matcher extended for cross-venue titles, or static config).
    pub fn register_event_mapping(&self, market_id: &str, event_id: &str) {
        let mut state = self.state.lock();
        state.market_to_event.insert(market_id.to_string(), event_id.to_string());
        state.matched_markets.entry(event_id.to_string()).or_default().push(market_id.to_string());
    }

    fn net_edge_passes(&self, venue: &str, gross_edge: Decimal) -> bool {
        let net = gross_edge.abs() - fee_estimate(venue);
        net >= self.config.min_edge_pct
    }

    fn opportunity(
        &self,
        opp_type: OpportunityType,
        markets: Vec<String>,
        oracle_source: Option<String>,
        oracle_value: Option<Decimal>,
        expected_edge: Decimal,
        signal_strength: f64,
        metadata: HashMap<String, String>,
    ) -> Opportunity {
        Opportunity {
            id: uuid::Uuid::new_v4().to_string(),
            opp_type,
            markets,
            oracle_source,
            oracle_value,
            expected_edge,
            signal_strength,
            detected_at: Utc::now(),
            expires_at: None,
            metadata,
        }
    }

    async fn publish_opportunity(&self, bus: &dyn Bus, opp: Opportunity) -> Result<()> {
        let mut record = BusRecord::new();
        record.insert("id".to_string(), opp.id.clone());
        record.insert("type".to_string(), opp.opp_type.to_string());
        record.insert("markets".to_string(), opp.markets.join(","));
        if let Some(s) = &opp.oracle_source {
            record.insert("oracle_source".to_string(), s.clone());
        }
        if let Some(v) = opp.oracle_value {
            record.insert("oracle_value".to_string(), v.to_string());
        }
        record.insert("expected_edge".to_string(), opp.expected_edge.to_string());
        record.insert("signal_strength".to_string(), opp.signal_strength.to_string());
        record.insert("detected_at".to_string(), opp.detected_at.to_rfc3339());
        for (k, v) in &opp.metadata {
            record.insert(format!("meta_{k}"), v.clone());
        }
        bus.publish("opportunities.detected", record).await?;
        Ok(())
    }

    fn run_oracle_lag_check(&self, market_id: &str) -> Option<(Decimal, f64, String, Decimal)> {
        let state = self.state.lock();
        let market = state.markets.get(market_id)?;
        let threshold = state.market_thresholds.get(market_id)?;
        let oracle = state.oracle_values.get(&threshold.oracle_symbol)?;
        let (fair_yes, signal) = fair_value(oracle.value, threshold.threshold, &threshold.direction);
        let edge = oracle_lag_edge(market.yes_price, fair_yes, signal, self.config.min_edge_pct, self.config.min_signal_strength)?;
        Some((edge, signal, threshold.oracle_symbol.clone(), oracle.value))
    }

    async fn handle_single_market_checks(&self, bus: &dyn Bus, market_id: &str) -> Result<()> {
        let (yes, no, venue) = {
            let state = self.state.lock();
            let m = match state.markets.get(market_id) {
                Some(m) => m,
                None => return Ok(()),
            };
            (m.yes_price, m.no_price, m.venue.clone())
        };

        if let Some((edge, signal)) = single_condition_mispricing(yes, no, self.config.min_edge_pct, self.config.min_signal_strength) {
            if self.net_edge_passes(&venue, edge) {
                let mut metadata = HashMap::new();
                metadata.insert("arb_type".to_string(), "single_condition".to_string());
                metadata.insert("yes".to_string(), yes.to_string());
                metadata.insert("no".to_string(), no.to_string());
                metadata.insert("sum".to_string(), (yes + no).to_string());
                let opp = self.opportunity(OpportunityType::Mispricing, vec![market_id.to_string()], None, None, edge, signal, metadata);
                self.publish_opportunity(bus, opp).await?;
            }
        }

        if let Some((edge, signal, symbol, oracle_value)) = self.run_oracle_lag_check(market_id) {
            if self.net_edge_passes(&venue, edge) {
                let mut metadata = HashMap::new();
                metadata.insert("arb_type".to_string(), "oracle_lag".to_string());
                metadata.insert("current_yes".to_string(), yes.to_string());
                let opp = self.opportunity(
                    OpportunityType::OracleLag,
                    vec![market_id.to_string()],
                    Some(symbol),
                    Some(oracle_value),
                    edge,
                    signal,
                    metadata,
                );
                self.publish_opportunity(bus, opp).await?;
            }
        }

        let cross: Option<Vec<(String, Decimal)>> = {
            let state = self.state.lock();
            state.market_to_event.get(market_id).and_then(|event_id| {
                let siblings = state.matched_markets.get(event_id)?;
                if siblings.len() < 2 {
                    return None;
                }
                Some(siblings.iter().filter_map(|id| state.markets.get(id).map(|m| (m.venue.clone(), m.yes_price))).collect())
            })
        };

        if let Some(prices) = cross {
            let refs: Vec<(&str, Decimal)> = prices.iter().map(|(v, p)| (v.as_str(), *p)).collect();
            if let Some((edge, buy_yes_venue, buy_no_venue)) = cross_platform_edge(&refs, self.config.min_edge_pct, self.config.min_signal_strength) {
                if self.net_edge_passes(buy_yes_venue, edge) {
                    let mut metadata = HashMap::new();
                    metadata.insert("arb_type".to_string(), "cross_platform".to_string());
                    metadata.insert("buy_yes_venue".to_string(), buy_yes_venue.to_string());
                    metadata.insert("buy_no_venue".to_string(), buy_no_venue.to_string());
                    let signal = (edge * Decimal::new(5, 0)).min(Decimal::ONE).to_string().parse().unwrap_or(0.0);
                    let opp = self.opportunity(
                        OpportunityType::CrossPlatform,
                        vec![market_id.to_string()],
                        None,
                        None,
                        edge,
                        signal,
                        metadata,
                    );
                    self.publish_opportunity(bus, opp).await?;
                }
            }
        }

        Ok(())
    }

    async fn handle_venue_price(&self, bus: &dyn Bus, record: &BusRecord) -> Result<()> {
        let market_id = match record.get("market_id") {
            Some(v) => v.clone(),
            None => return Ok(()),
        };
        let yes_price = record.get("yes_price").and_then(|v| Decimal::from_str_exact(v).ok()).unwrap_or_default();
        let no_price = record.get("no_price").and_then(|v| Decimal::from_str_exact(v).ok()).unwrap_or_default();
        let venue = record.get("venue").cloned().unwrap_or_else(|| venue_of(&market_id).to_string());
        let title = record.get("title").cloned().unwrap_or_default();

        {
            let mut state = self.state.lock();
            let external_id = market_id.rsplit_once(':').map(|(_, id)| id.to_string()).unwrap_or_else(|| market_id.clone());
            state.markets.insert(
                market_id.clone(),
                Market { venue, external_id, title, yes_price, no_price, volume_24h: Decimal::ZERO, liquidity: Decimal::ZERO, last_update: Utc::now() },
            );
        }

        self.handle_single_market_checks(bus, &market_id).await
    }

    async fn handle_venue_multi(&self, bus: &dyn Bus, record: &BusRecord) -> Result<()> {
        let market_id = match record.get("market_id") {
            Some(v) => v.clone(),
            None => return Ok(()),
        };
        let venue = record.get("venue").cloned().unwrap_or_else(|| venue_of(&market_id).to_string());
        let count: usize = record.get("outcome_count").and_then(|v| v.parse().ok()).unwrap_or(0);
        let mut outcomes = Vec::with_capacity(count);
        for i in 0..count {
            let name = record.get(&format!("outcome_{i}_name")).cloned().unwrap_or_default();
            let price = record.get(&format!("outcome_{i}_price")).and_then(|v| Decimal::from_str_exact(v).ok()).unwrap_or_default();
            outcomes.push(Outcome { name, price });
        }

        let price_sum: Decimal = outcomes.iter().map(|o| o.price).sum();
        let external_id = market_id.rsplit_once(':').map(|(_, id)| id.to_string()).unwrap_or_else(|| market_id.clone());
        {
            let mut state = self.state.lock();
            state.multi_outcome_markets.insert(
                market_id.clone(),
                MultiOutcomeMarket { venue: venue.clone(), external_id, outcomes: outcomes.clone(), last_update: Utc::now() },
            );
        }

        let edge = multi_outcome_edge(price_sum);
        if edge > Decimal::ZERO && self.net_edge_passes(&venue, edge) {
            let signal: f64 = (edge * Decimal::new(5, 0)).min(Decimal::ONE).to_string().parse().unwrap_or(0.0);
            if signal >= self.config.min_signal_strength {
                let mut metadata = HashMap::new();
                metadata.insert("arb_type".to_string(), "multi_outcome".to_string());
                metadata.insert("outcome_count".to_string(), outcomes.len().to_string());
                for (i, o) in outcomes.iter().enumerate() {
                    metadata.insert(format!("outcome_{i}_name"), o.name.clone());
                    metadata.insert(format!("outcome_{i}_price"), o.price.to_string());
                }
                let opp = self.opportunity(OpportunityType::Mispricing, vec![market_id.clone()], None, None, edge, signal, metadata);
                self.publish_opportunity(bus, opp).await?;
            }
        }
        Ok(())
    }

    async fn handle_oracle_update(&self, bus: &dyn Bus, record: &BusRecord) -> Result<()> {
        let source = record.get("source").cloned().unwrap_or_default();
        let symbol = match record.get("symbol") {
            Some(v) => v.clone(),
            None => return Ok(()),
        };
        let value = record.get("value").and_then(|v| Decimal::from_str_exact(v).ok()).unwrap_or_default();
        let timestamp = record.get("timestamp").and_then(|v| chrono::DateTime::parse_from_rfc3339(v).ok()).map(|d| d.with_timezone(&Utc)).unwrap_or_else(Utc::now);

        let affected: Vec<String> = {
            let mut state = self.state.lock();
            state.oracle_values.insert(
                symbol.clone(),
                crate::models::OracleData { source, symbol: symbol.clone(), value, timestamp, metadata: HashMap::new() },
            );
            state
                .market_thresholds
                .iter()
                .filter(|(mid, t)| t.oracle_symbol == symbol && state.markets.contains_key(mid.as_str()))
                .map(|(mid, _)| mid.clone())
                .collect()
        };

        for market_id in affected {
            if let Some((edge, signal, oracle_symbol, oracle_value)) = self.run_oracle_lag_check(&market_id) {
                let (venue, current_yes) = {
                    let state = self.state.lock();
                    let m = state.markets.get(&market_id);
                    (m.map(|m| m.venue.clone()).unwrap_or_default(), m.map(|m| m.yes_price).unwrap_or_default())
                };
                if self.net_edge_passes(&venue, edge) {
                    let mut metadata = HashMap::new();
                    metadata.insert("arb_type".to_string(), "oracle_lag".to_string());
                    metadata.insert("current_yes".to_string(), current_yes.to_string());
                    let opp = self.opportunity(
                        OpportunityType::OracleLag,
                        vec![market_id.clone()],
                        Some(oracle_symbol),
                        Some(oracle_value),
                        edge,
                        signal,
                        metadata,
                    );
                    self.publish_opportunity(bus, opp).await?;
                }
            }
        }
        Ok(())
    }
}

impl OracleMappingSink for Scanner {
    fn register_market_oracle_mapping(&self, market_id: &str, oracle_symbol: &str, threshold: Decimal, direction: &str) {
        let mut state = self.state.lock();
        state.market_oracle_map.insert(market_id.to_string(), oracle_symbol.to_string());
        state.market_thresholds.insert(
            market_id.to_string(),
            Threshold { threshold, direction: direction.to_string(), oracle_symbol: oracle_symbol.to_string() },
        );
    }
}

#[async_trait]
impl Agent for Scanner {
    fn name(&self) -> &str {
        "scanner"
    }

    fn subscriptions(&self) -> Vec<String> {
        let mut channels = Vec::new();
        for venue in &self.active_venues {
            channels.push(format!("venue.{venue}.prices"));
            channels.push(format!("venue.{venue}.multi"));
        }
        for source in &self.active_oracles {
            for symbol in &self.oracle_symbols {
                channels.push(format!("oracle.{source}.{symbol}"));
            }
        }
        channels
    }

    async fn handle(&self, channel: &str, record: BusRecord, bus: &dyn Bus) -> Result<()> {
        debug!(channel, "scanner_handle");
        if channel.ends_with(".multi") {
            self.handle_venue_multi(bus, &record).await
        } else if channel.starts_with("venue.") {
            self.handle_venue_price(bus, &record).await
        } else if channel.starts_with("oracle.") {
            self.handle_oracle_update(bus, &record).await
        } else {
            Ok(())
        }
    }
}
