//! Strategy agents (spec.md §4.6).
//!
//! The pluggable-strategy shape (a small trait implementors fill in, owned by
//! a runtime wrapper that handles the surrounding plumbing) is grounded on
//! `backtest_v2/strategy.rs::Strategy`/`StrategyFactory`: there the wrapper is
//! the backtest/live event loop; here `StrategyRuntime` plays that role,
//! additionally tracking the `allocation_pct`/`total_capital` state pushed by
//! `allocations.update` (spec.md §4.6 `available_capital` sizing input).

mod oracle_sniper;

pub use oracle_sniper::OracleSniper;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::agent::Agent;
use crate::bus::{Bus, BusRecord};
use crate::error::Result;
use crate::models::{OutcomeSide, Side, TradeRequest};

/// Sizing parameters a concrete strategy emits when it decides to trade.
pub struct TradeParams {
    pub side: Side,
    pub outcome: OutcomeSide,
    pub max_price: Decimal,
    pub amount: Decimal,
}

/// Shared allocation state every strategy agent reads before sizing
/// (spec.md §4.6 `allocations.update` subscription).
#[derive(Clone, Copy)]
pub struct Allocation {
    pub allocation_pct: Decimal,
    pub total_capital: Decimal,
}

impl Default for Allocation {
    fn default() -> Self {
        Allocation { allocation_pct: Decimal::ZERO, total_capital: Decimal::ZERO }
    }
}

/// Per-strategy decision contract (spec.md §4.6). Implementors only decide
/// whether and how to size a trade; the wrapper `StrategyRuntime` owns the
/// bus wiring, allocation bookkeeping and auto-filtering.
pub trait StrategyLogic: Send + Sync {
    fn name(&self) -> &str;

    /// Which opportunity types this strategy accepts; opportunities of
    /// other types are never passed to `evaluate`.
    fn accepts(&self, opp_type: &crate::models::OpportunityType) -> bool;

    fn max_position_pct(&self) -> Decimal;

    /// Returns `None` to silently drop the opportunity (spec.md §7:
    /// "Strategy returns null — not an error").
    fn evaluate(&self, opportunity: &OpportunityView, available_capital: Decimal) -> Option<TradeParams>;
}

/// Flat view of an `opportunities.detected` record, parsed once per message.
pub struct OpportunityView {
    pub id: String,
    pub opp_type: crate::models::OpportunityType,
    pub market_id: String,
    pub expected_edge: Decimal,
    pub signal_strength: f64,
    pub metadata: HashMap<String, String>,
}

fn parse_opportunity(record: &BusRecord) -> Option<OpportunityView> {
    let id = record.get("id")?.clone();
    let opp_type: crate::models::OpportunityType = record.get("type")?.parse().ok()?;
    let market_id = record.get("markets")?.split(',').next()?.to_string();
    let expected_edge = record.get("expected_edge").and_then(|v| Decimal::from_str_exact(v).ok())?;
    let signal_strength = record.get("signal_strength").and_then(|v| v.parse().ok())?;
    let metadata = record
        .iter()
        .filter_map(|(k, v)| k.strip_prefix("meta_").map(|stripped| (stripped.to_string(), v.clone())))
        .collect();
    Some(OpportunityView { id, opp_type, market_id, expected_edge, signal_strength, metadata })
}

/// Wraps a `StrategyLogic` into an `Agent`: subscribes to
/// `opportunities.detected` and `allocations.update`, auto-filters by
/// `(min_edge, min_signal)` before calling `evaluate`, and emits
/// `TradeRequest`s on `trade.requests` (spec.md §4.6).
pub struct StrategyRuntime<L: StrategyLogic> {
    logic: L,
    allocation: Mutex<Allocation>,
    min_edge_pct: Decimal,
    min_signal_strength: f64,
}

impl<L: StrategyLogic> StrategyRuntime<L> {
    pub fn new(logic: L, min_edge_pct: Decimal, min_signal_strength: f64) -> Self {
        StrategyRuntime { logic, allocation: Mutex::new(Allocation::default()), min_edge_pct, min_signal_strength }
    }

    fn available_capital(&self) -> Decimal {
        let alloc = *self.allocation.lock();
        alloc.total_capital * (alloc.allocation_pct / Decimal::from(100))
    }

    async fn handle_opportunity(&self, bus: &dyn Bus, record: &BusRecord) -> Result<()> {
        let opp = match parse_opportunity(record) {
            Some(o) => o,
            None => return Ok(()),
        };

        if opp.expected_edge.abs() < self.min_edge_pct || opp.signal_strength < self.min_signal_strength {
            return Ok(());
        }
        if !self.logic.accepts(&opp.opp_type) {
            return Ok(());
        }

        let available = self.available_capital();
        let params = match self.logic.evaluate(&opp, available) {
            Some(p) => p,
            None => return Ok(()),
        };

        let capped_amount = params.amount.min(available * self.logic.max_position_pct() / Decimal::from(100));

        let request = TradeRequest {
            id: uuid::Uuid::new_v4().to_string(),
            opportunity_id: opp.id,
            strategy: self.logic.name().to_string(),
            market_id: opp.market_id,
            side: params.side,
            outcome: params.outcome,
            amount: capped_amount,
            max_price: params.max_price,
            expected_edge: opp.expected_edge,
            created_at: Utc::now(),
        };

        publish_trade_request(bus, &request).await
    }

    fn handle_allocation_update(&self, record: &BusRecord) {
        if record.get("strategy").map(String::as_str) != Some(self.logic.name()) {
            return;
        }
        let allocation_pct = record.get("allocation_pct").and_then(|v| Decimal::from_str_exact(v).ok());
        let total_capital = record.get("total_capital").and_then(|v| Decimal::from_str_exact(v).ok());
        if let (Some(pct), Some(capital)) = (allocation_pct, total_capital) {
            *self.allocation.lock() = Allocation { allocation_pct: pct, total_capital: capital };
        }
    }
}

pub async fn publish_trade_request(bus: &dyn Bus, request: &TradeRequest) -> Result<()> {
    let mut record = BusRecord::new();
    record.insert("id".to_string(), request.id.clone());
    record.insert("opportunity_id".to_string(), request.opportunity_id.clone());
    record.insert("strategy".to_string(), request.strategy.clone());
    record.insert("market_id".to_string(), request.market_id.clone());
    record.insert("side".to_string(), request.side.to_string());
    record.insert("outcome".to_string(), request.outcome.to_string());
    record.insert("amount".to_string(), request.amount.to_string());
    record.insert("max_price".to_string(), request.max_price.to_string());
    record.insert("expected_edge".to_string(), request.expected_edge.to_string());
    record.insert("created_at".to_string(), request.created_at.to_rfc3339());
    bus.publish("trade.requests", record).await?;
    Ok(())
}

pub fn parse_trade_request(record: &BusRecord) -> Option<TradeRequest> {
    Some(TradeRequest {
        id: record.get("id")?.clone(),
        opportunity_id: record.get("opportunity_id")?.clone(),
        strategy: record.get("strategy")?.clone(),
        market_id: record.get("market_id")?.clone(),
        side: record.get("side")?.parse().ok()?,
        outcome: record.get("outcome")?.parse().ok()?,
        amount: Decimal::from_str_exact(record.get("amount")?).ok()?,
        max_price: Decimal::from_str_exact(record.get("max_price")?).ok()?,
        expected_edge: Decimal::from_str_exact(record.get("expected_edge")?).ok()?,
        created_at: record.get("created_at").and_then(|v| chrono::DateTime::parse_from_rfc3339(v).ok()).map(|d| d.with_timezone(&Utc)).unwrap_or_else(Utc::now),
    })
}

#[async_trait]
impl<L: StrategyLogic + 'static> Agent for StrategyRuntime<L> {
    fn name(&self) -> &str {
        self.logic.name()
    }

    fn subscriptions(&self) -> Vec<String> {
        vec!["opportunities.detected".to_string(), "allocations.update".to_string()]
    }

    async fn handle(&self, channel: &str, record: BusRecord, bus: &dyn Bus) -> Result<()> {
        match channel {
            "opportunities.detected" => self.handle_opportunity(bus, &record).await,
            "allocations.update" => {
                self.handle_allocation_update(&record);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

pub type OpportunityMetadataMap = HashMap<String, String>;
