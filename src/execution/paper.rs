use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use crate::agent::Agent;
use crate::bus::{Bus, BusRecord};
use crate::error::Result;
use crate::models::{Trade, TradeStatus};
use crate::persistence::{NewPaperTrade, Repository};
use crate::risk::parse_decision;

use super::{publish_trade_result, PendingRequests};

const RECENT_TRADES_CAPACITY: usize = 50;

/// Running execution counters, grounded on
/// `vault/paper_ledger.rs::VaultPaperLedger::execution_stats`.
#[derive(Debug, Clone, Default)]
pub struct PaperLedgerStats {
    pub trade_count: u64,
    pub reject_count: u64,
    pub total_fees: Decimal,
}

pub struct PaperExecutor {
    repo: Arc<Repository>,
    pending: PendingRequests,
    stats: Mutex<PaperLedgerStats>,
    recent_trades: Mutex<VecDeque<Trade>>,
}

impl PaperExecutor {
    pub fn new(repo: Arc<Repository>) -> Self {
        PaperExecutor { repo, pending: PendingRequests::new(), stats: Mutex::new(PaperLedgerStats::default()), recent_trades: Mutex::new(VecDeque::new()) }
    }

    pub fn stats(&self) -> PaperLedgerStats {
        self.stats.lock().clone()
    }

    pub fn recent_trades(&self) -> Vec<Trade> {
        self.recent_trades.lock().iter().cloned().collect()
    }

    fn remember_trade(&self, trade: Trade) {
        let mut recent = self.recent_trades.lock();
        if recent.len() == RECENT_TRADES_CAPACITY {
            recent.pop_back();
        }
        recent.push_front(trade);
    }

    async fn handle_decision(&self, bus: &dyn Bus, record: &BusRecord) -> Result<()> {
        let decision = match parse_decision(record) {
            Some(d) => d,
            None => return Ok(()),
        };
        let request = match self.pending.take(&decision.request_id) {
            Some(r) => r,
            None => {
                warn!(request_id = %decision.request_id, "no_pending_request_for_decision");
                return Ok(());
            }
        };

        let venue = crate::models::venue_of(&request.market_id).to_string();

        if !decision.approved {
            let inserted = self.repo.insert_trade(NewPaperTrade {
                opportunity_id: request.opportunity_id.clone(),
                opportunity_type: "UNKNOWN".to_string(),
                market_id: request.market_id.clone(),
                venue: venue.clone(),
                side: request.side,
                outcome: request.outcome,
                quantity: request.amount,
                price: request.max_price,
                fees: Decimal::ZERO,
                expected_edge: request.expected_edge,
                strategy_id: Some(request.strategy.clone()),
                risk_approved: false,
                risk_rejection_reason: decision.rule_triggered.clone(),
                status: TradeStatus::Rejected,
            })?;
            if inserted.is_none() {
                return Ok(());
            }
            self.stats.lock().reject_count += 1;

            let trade = Trade {
                id: uuid::Uuid::new_v4().to_string(),
                request_id: request.id.clone(),
                market_id: request.market_id.clone(),
                venue,
                side: request.side,
                outcome: request.outcome,
                amount: request.amount,
                price: request.max_price,
                fees: Decimal::ZERO,
                status: TradeStatus::Rejected,
                external_id: None,
                executed_at: Utc::now(),
                filled_at: None,
            };
            return publish_trade_result(bus, &trade, &request.strategy, None, Some(&decision.reason)).await;
        }

        // Synthetic paper fill: fills instantly at the strategy's requested
        // max_price, with a flat 10bps fee and a flat 5% expected-edge P&L
        // estimate (no live fill data exists to compute a real realized P&L
        // in paper mode).
        let fees = request.amount * dec!(0.001);
        let realized_pnl = request.amount * dec!(0.05);

        let inserted = self.repo.insert_trade(NewPaperTrade {
            opportunity_id: request.opportunity_id.clone(),
            opportunity_type: "UNKNOWN".to_string(),
            market_id: request.market_id.clone(),
            venue: venue.clone(),
            side: request.side,
            outcome: request.outcome,
            quantity: request.amount,
            price: request.max_price,
            fees,
            expected_edge: request.expected_edge,
            strategy_id: Some(request.strategy.clone()),
            risk_approved: true,
            risk_rejection_reason: None,
            status: TradeStatus::Filled,
        })?;

        let trade_id = match inserted {
            Some(id) => id,
            None => return Ok(()),
        };
        self.repo.update_trade_result(&trade_id, TradeStatus::Filled, Some(request.max_price), Some(realized_pnl))?;

        {
            let mut stats = self.stats.lock();
            stats.trade_count += 1;
            stats.total_fees += fees;
        }

        let trade = Trade {
            id: trade_id,
            request_id: request.id.clone(),
            market_id: request.market_id.clone(),
            venue,
            side: request.side,
            outcome: request.outcome,
            amount: request.amount,
            price: request.max_price,
            fees,
            status: TradeStatus::Filled,
            external_id: None,
            executed_at: Utc::now(),
            filled_at: Some(Utc::now()),
        };
        self.remember_trade(trade.clone());
        info!(request_id = %request.id, strategy = %request.strategy, realized_pnl = %realized_pnl, "paper_trade_filled");
        publish_trade_result(bus, &trade, &request.strategy, Some(realized_pnl), None).await
    }
}

#[async_trait]
impl Agent for PaperExecutor {
    fn name(&self) -> &str {
        "paper-executor"
    }

    fn subscriptions(&self) -> Vec<String> {
        vec!["trade.requests".to_string(), "trade.decisions".to_string()]
    }

    async fn recover(&self) -> Result<()> {
        let open = self.repo.get_open_trades()?;
        if !open.is_empty() {
            info!(count = open.len(), "paper_executor_recovered_open_trades");
        }
        Ok(())
    }

    async fn handle(&self, channel: &str, record: BusRecord, bus: &dyn Bus) -> Result<()> {
        match channel {
            "trade.requests" => {
                self.pending.remember(&record);
                Ok(())
            }
            "trade.decisions" => self.handle_decision(bus, &record).await,
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SqliteBus;
    use crate::models::{OutcomeSide, Side, TradeRequest};

    fn request() -> TradeRequest {
        TradeRequest {
            id: "r1".to_string(),
            opportunity_id: "o1".to_string(),
            strategy: "oracle-sniper".to_string(),
            market_id: "polymarket:m1".to_string(),
            side: Side::Buy,
            outcome: OutcomeSide::Yes,
            amount: dec!(100),
            max_price: dec!(0.5),
            expected_edge: dec!(0.4),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn approved_decision_records_fill_and_publishes_result() {
        let bus = SqliteBus::open_in_memory().unwrap();
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        let executor = PaperExecutor::new(repo);

        let req = request();
        executor.handle("trade.requests", {
            let mut r = BusRecord::new();
            r.insert("id".to_string(), req.id.clone());
            r.insert("opportunity_id".to_string(), req.opportunity_id.clone());
            r.insert("strategy".to_string(), req.strategy.clone());
            r.insert("market_id".to_string(), req.market_id.clone());
            r.insert("side".to_string(), req.side.to_string());
            r.insert("outcome".to_string(), req.outcome.to_string());
            r.insert("amount".to_string(), req.amount.to_string());
            r.insert("max_price".to_string(), req.max_price.to_string());
            r.insert("expected_edge".to_string(), req.expected_edge.to_string());
            r.insert("created_at".to_string(), req.created_at.to_rfc3339());
            r
        }, &bus).await.unwrap();

        let mut decision = BusRecord::new();
        decision.insert("request_id".to_string(), "r1".to_string());
        decision.insert("approved".to_string(), "true".to_string());
        decision.insert("reason".to_string(), "approved".to_string());
        decision.insert("decided_at".to_string(), Utc::now().to_rfc3339());

        executor.handle("trade.decisions", decision, &bus).await.unwrap();
        assert_eq!(executor.stats().trade_count, 1);
        assert_eq!(executor.recent_trades().len(), 1);

        let report = executor.repo.get_daily_summary(1).unwrap();
        assert_eq!(report.closed, 1);
        assert_eq!(report.wins, 1);

        let (_, result) = bus.consume("trade.results", 0, 10).await.unwrap().pop().unwrap();
        assert_eq!(result.get("strategy").unwrap(), "oracle-sniper");
    }

    #[tokio::test]
    async fn rejected_decision_persists_and_does_not_increment_trade_count() {
        let bus = SqliteBus::open_in_memory().unwrap();
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        let executor = PaperExecutor::new(repo);

        let mut req = request();
        req.expected_edge = dec!(0.01);
        executor.handle("trade.requests", {
            let mut r = BusRecord::new();
            r.insert("id".to_string(), req.id.clone());
            r.insert("opportunity_id".to_string(), req.opportunity_id.clone());
            r.insert("strategy".to_string(), req.strategy.clone());
            r.insert("market_id".to_string(), req.market_id.clone());
            r.insert("side".to_string(), req.side.to_string());
            r.insert("outcome".to_string(), req.outcome.to_string());
            r.insert("amount".to_string(), req.amount.to_string());
            r.insert("max_price".to_string(), req.max_price.to_string());
            r.insert("expected_edge".to_string(), req.expected_edge.to_string());
            r.insert("created_at".to_string(), req.created_at.to_rfc3339());
            r
        }, &bus).await.unwrap();

        let mut decision = BusRecord::new();
        decision.insert("request_id".to_string(), "r1".to_string());
        decision.insert("approved".to_string(), "false".to_string());
        decision.insert("reason".to_string(), "rule 'minimum_profit' triggered".to_string());
        decision.insert("rule_triggered".to_string(), "minimum_profit".to_string());
        decision.insert("decided_at".to_string(), Utc::now().to_rfc3339());

        executor.handle("trade.decisions", decision, &bus).await.unwrap();
        assert_eq!(executor.stats().trade_count, 0);
        assert_eq!(executor.stats().reject_count, 1);
    }

    #[tokio::test]
    async fn unknown_request_id_is_ignored_not_an_error() {
        let bus = SqliteBus::open_in_memory().unwrap();
        let repo = Arc::new(Repository::open_in_memory().unwrap());
        let executor = PaperExecutor::new(repo);

        let mut decision = BusRecord::new();
        decision.insert("request_id".to_string(), "ghost".to_string());
        decision.insert("approved".to_string(), "true".to_string());
        decision.insert("reason".to_string(), "approved".to_string());
        decision.insert("decided_at".to_string(), Utc::now().to_rfc3339());

        assert!(executor.handle("trade.decisions", decision, &bus).await.is_ok());
        assert_eq!(executor.stats().trade_count, 0);
    }
}
