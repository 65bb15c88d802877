//! Capital allocator (spec.md §4.9): scores strategies by P&L and win rate,
//! rebalances every `rebalance_interval_trades` fills.
//!
//! New relative to the teacher, which allocates a single vault rather than
//! running a multi-strategy tournament; grounded in style on
//! `risk.rs::RiskManager`'s pattern of a small stateful scorer with a
//! `*_state()` snapshot accessor, and on
//! `signals/wallet_analytics.rs::compute_curve_win_rate_profit_factor`'s
//! `wins / (wins + losses)` win-rate convention.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;

use crate::agent::Agent;
use crate::bus::{Bus, BusRecord};
use crate::error::Result;
use crate::execution::{parse_realized_pnl, parse_trade_result};
use crate::models::TradeStatus;

pub struct AllocatorConfig {
    pub initial_bankroll: Decimal,
    /// Fractions of 1 (spec.md §4.9: "Σ = 1 after normalization").
    pub min_allocation_pct: Decimal,
    pub max_allocation_pct: Decimal,
    pub rebalance_interval_trades: u64,
    pub strategies: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StrategyPerformance {
    pub total_pnl: Decimal,
    pub trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
}

struct AllocatorState {
    performance: HashMap<String, StrategyPerformance>,
    allocations: HashMap<String, Decimal>,
    total_capital: Decimal,
    trades_since_rebalance: u64,
}

pub struct Allocator {
    config: AllocatorConfig,
    state: Mutex<AllocatorState>,
}

#[derive(Debug, Clone)]
pub struct AllocatorSnapshot {
    pub total_capital: Decimal,
    pub strategies: HashMap<String, (StrategyPerformance, Decimal)>,
    pub trades_since_rebalance: u64,
}

fn decimal_to_f64(d: Decimal) -> f64 {
    d.to_string().parse().unwrap_or(0.0)
}

fn f64_to_decimal(f: f64) -> Decimal {
    Decimal::from_str_exact(&format!("{f:.10}")).unwrap_or_default()
}

impl Allocator {
    pub fn new(config: AllocatorConfig) -> Self {
        let n = config.strategies.len().max(1);
        let equal_share = Decimal::ONE / Decimal::from(n);
        let performance = config.strategies.iter().map(|s| (s.clone(), StrategyPerformance::default())).collect();
        let allocations = config.strategies.iter().map(|s| (s.clone(), equal_share)).collect();
        let total_capital = config.initial_bankroll;
        Allocator { config, state: Mutex::new(AllocatorState { performance, allocations, total_capital, trades_since_rebalance: 0 }) }
    }

    fn score(&self, perf: &StrategyPerformance) -> f64 {
        if perf.trades == 0 {
            return 0.1;
        }
        let pnl_score = (decimal_to_f64(perf.total_pnl) / 100.0 + 1.0).max(0.0);
        let win_rate_bonus = (perf.wins as f64 / perf.trades as f64) * 0.5;
        (pnl_score + win_rate_bonus).max(0.1)
    }

    /// Rebalance algorithm (spec.md §4.9 steps 1-3). Returns the new
    /// allocation map, fractions summing to 1.
    fn rebalance(&self, state: &mut AllocatorState) -> HashMap<String, Decimal> {
        let scores: HashMap<String, f64> = state.performance.iter().map(|(name, perf)| (name.clone(), self.score(perf))).collect();
        let sum: f64 = scores.values().sum();

        let min = decimal_to_f64(self.config.min_allocation_pct);
        let max = decimal_to_f64(self.config.max_allocation_pct);

        let raw: HashMap<String, f64> = if sum <= 0.0 {
            let n = scores.len().max(1) as f64;
            scores.keys().map(|k| (k.clone(), 1.0 / n)).collect()
        } else {
            scores.iter().map(|(k, s)| (k.clone(), s / sum)).collect()
        };

        let clipped: HashMap<String, f64> = raw.into_iter().map(|(k, v)| (k, v.clamp(min, max))).collect();
        let clipped_sum: f64 = clipped.values().sum();
        let normalized: HashMap<String, Decimal> = if clipped_sum > 0.0 {
            clipped.into_iter().map(|(k, v)| (k, f64_to_decimal(v / clipped_sum))).collect()
        } else {
            let n = clipped.len().max(1) as f64;
            clipped.into_iter().map(|(k, _)| (k, f64_to_decimal(1.0 / n))).collect()
        };

        state.allocations = normalized.clone();
        normalized
    }

    async fn handle_trade_result(&self, bus: &dyn Bus, record: &BusRecord) -> Result<()> {
        let trade = match parse_trade_result(record) {
            Some(t) => t,
            None => return Ok(()),
        };
        if trade.status != TradeStatus::Filled {
            return Ok(());
        }
        let strategy = match record.get("strategy") {
            Some(s) => s.clone(),
            None => return Ok(()),
        };
        let pnl = parse_realized_pnl(record).unwrap_or(Decimal::ZERO);

        let should_rebalance = {
            let mut state = self.state.lock();
            let perf = state.performance.entry(strategy.clone()).or_default();
            perf.total_pnl += pnl;
            perf.trades += 1;
            if pnl >= Decimal::ZERO {
                perf.wins += 1;
                perf.largest_win = perf.largest_win.max(pnl);
            } else {
                perf.losses += 1;
                perf.largest_loss = perf.largest_loss.min(pnl);
            }
            state.total_capital += pnl;
            state.trades_since_rebalance += 1;
            state.trades_since_rebalance >= self.config.rebalance_interval_trades
        };

        if should_rebalance {
            self.trigger_rebalance(bus).await?;
        }
        Ok(())
    }

    async fn trigger_rebalance(&self, bus: &dyn Bus) -> Result<()> {
        let (allocations, total_capital) = {
            let mut state = self.state.lock();
            let allocations = self.rebalance(&mut state);
            state.trades_since_rebalance = 0;
            (allocations, state.total_capital)
        };

        info!(?allocations, %total_capital, "allocator_rebalanced");
        for (strategy, pct) in &allocations {
            let mut record = BusRecord::new();
            record.insert("strategy".to_string(), strategy.clone());
            record.insert("allocation_pct".to_string(), (*pct * Decimal::from(100)).to_string());
            record.insert("total_capital".to_string(), total_capital.to_string());
            record.insert("updated_at".to_string(), Utc::now().to_rfc3339());
            bus.publish("allocations.update", record).await?;
        }
        Ok(())
    }

    pub fn get_state_snapshot(&self) -> AllocatorSnapshot {
        let state = self.state.lock();
        let strategies = state
            .performance
            .iter()
            .map(|(name, perf)| {
                let alloc = *state.allocations.get(name).unwrap_or(&dec!(0));
                (name.clone(), (perf.clone(), alloc))
            })
            .collect();
        AllocatorSnapshot { total_capital: state.total_capital, strategies, trades_since_rebalance: state.trades_since_rebalance }
    }
}

#[async_trait]
impl Agent for Allocator {
    fn name(&self) -> &str {
        "capital-allocator"
    }

    fn subscriptions(&self) -> Vec<String> {
        vec!["trade.results".to_string()]
    }

    async fn handle(&self, _channel: &str, record: BusRecord, bus: &dyn Bus) -> Result<()> {
        self.handle_trade_result(bus, &record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AllocatorConfig {
        AllocatorConfig {
            initial_bankroll: dec!(500),
            min_allocation_pct: dec!(0.05),
            max_allocation_pct: dec!(0.50),
            rebalance_interval_trades: 2,
            strategies: vec!["oracle-sniper".to_string(), "cross-platform".to_string()],
        }
    }

    fn result_record(strategy: &str, pnl: Decimal) -> BusRecord {
        let mut record = BusRecord::new();
        record.insert("id".to_string(), "t1".to_string());
        record.insert("request_id".to_string(), "r1".to_string());
        record.insert("market_id".to_string(), "polymarket:m1".to_string());
        record.insert("venue".to_string(), "polymarket".to_string());
        record.insert("side".to_string(), "BUY".to_string());
        record.insert("outcome".to_string(), "YES".to_string());
        record.insert("amount".to_string(), "100".to_string());
        record.insert("price".to_string(), "0.5".to_string());
        record.insert("fees".to_string(), "0.1".to_string());
        record.insert("status".to_string(), "FILLED".to_string());
        record.insert("executed_at".to_string(), Utc::now().to_rfc3339());
        record.insert("strategy".to_string(), strategy.to_string());
        record.insert("realized_pnl".to_string(), pnl.to_string());
        record
    }

    #[test]
    fn new_strategy_scores_at_floor() {
        let allocator = Allocator::new(config());
        let perf = StrategyPerformance::default();
        assert_eq!(allocator.score(&perf), 0.1);
    }

    #[test]
    fn profitable_consistent_strategy_scores_above_floor() {
        let allocator = Allocator::new(config());
        let perf = StrategyPerformance { total_pnl: dec!(50), trades: 10, wins: 8, losses: 2, ..Default::default() };
        let score = allocator.score(&perf);
        assert!(score > 0.1);
        // pnl_score = 50/100 + 1 = 1.5; win_rate_bonus = 0.8 * 0.5 = 0.4 => 1.9
        assert!((score - 1.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn rebalance_fires_after_interval_and_sums_to_one() {
        let bus = crate::bus::SqliteBus::open_in_memory().unwrap();
        let allocator = Allocator::new(config());

        allocator.handle("trade.results", result_record("oracle-sniper", dec!(20)), &bus).await.unwrap();
        allocator.handle("trade.results", result_record("cross-platform", dec!(-5)), &bus).await.unwrap();

        let snapshot = allocator.get_state_snapshot();
        let sum: Decimal = snapshot.strategies.values().map(|(_, pct)| *pct).sum();
        assert!((sum - Decimal::ONE).abs() < dec!(0.0001));
        assert_eq!(snapshot.trades_since_rebalance, 0);
    }

    #[tokio::test]
    async fn allocations_respect_min_and_max_clip() {
        let bus = crate::bus::SqliteBus::open_in_memory().unwrap();
        let mut cfg = config();
        cfg.min_allocation_pct = dec!(0.30);
        cfg.max_allocation_pct = dec!(0.70);
        let allocator = Allocator::new(cfg);

        allocator.handle("trade.results", result_record("oracle-sniper", dec!(1000)), &bus).await.unwrap();
        allocator.handle("trade.results", result_record("cross-platform", dec!(-1000)), &bus).await.unwrap();

        let snapshot = allocator.get_state_snapshot();
        for (_, pct) in snapshot.strategies.values() {
            assert!(*pct >= dec!(0.30) - dec!(0.0001) && *pct <= dec!(0.70) + dec!(0.0001));
        }
    }

    #[tokio::test]
    async fn non_filled_results_are_ignored() {
        let bus = crate::bus::SqliteBus::open_in_memory().unwrap();
        let allocator = Allocator::new(config());
        let mut rejected = result_record("oracle-sniper", dec!(0));
        rejected.insert("status".to_string(), "REJECTED".to_string());
        allocator.handle("trade.results", rejected, &bus).await.unwrap();

        let snapshot = allocator.get_state_snapshot();
        assert_eq!(snapshot.strategies.get("oracle-sniper").unwrap().0.trades, 0);
    }
}
