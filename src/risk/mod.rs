//! Risk gate (spec.md §4.7).
//!
//! The high-water-mark/drawdown bookkeeping shape (`peak`, `equity`,
//! `current_drawdown`) is grounded on `risk.rs::DrawdownMonitor` in the
//! teacher, generalized from a 0.5x throttle multiplier into the spec's
//! halt-and-reject semantics. VWAP walk-the-book logic is grounded on the
//! `OrderBook` type used by `scrapers/polymarket.rs`.

mod vwap;

pub use vwap::vwap_for_size;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::info;

use crate::agent::Agent;
use crate::bus::{Bus, BusRecord};
use crate::error::Result;
use crate::models::{venue_of, OrderBook, RiskDecision, TradeRequest};
use crate::strategy::parse_trade_request;

pub struct RiskConfig {
    pub initial_bankroll: Decimal,
    pub position_limit_pct: Decimal,
    pub platform_limit_pct: Decimal,
    pub daily_loss_limit_pct: Decimal,
    pub drawdown_limit_pct: Decimal,
    pub min_profit_threshold: Decimal,
}

struct RiskState {
    halted: bool,
    current_value: Decimal,
    high_water_mark: Decimal,
    daily_pnl: Decimal,
    last_reset_date: NaiveDate,
    positions: HashMap<String, Decimal>,
    platform_exposure: HashMap<String, Decimal>,
}

/// Orderbook snapshots keyed by `market_id`, refreshed by whatever ingest
/// component publishes depth (spec.md §4.7 rule 8: "when an order book is
/// available"). Absent entries simply skip the slippage guard.
pub struct RiskGate {
    config: RiskConfig,
    state: Mutex<RiskState>,
    order_books: Mutex<HashMap<String, OrderBook>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskOutcome {
    Approved,
    Rejected(&'static str),
}

impl RiskGate {
    pub fn new(config: RiskConfig) -> Self {
        let bankroll = config.initial_bankroll;
        RiskGate {
            config,
            state: Mutex::new(RiskState {
                halted: false,
                current_value: bankroll,
                high_water_mark: bankroll,
                daily_pnl: Decimal::ZERO,
                last_reset_date: Utc::now().date_naive(),
                positions: HashMap::new(),
                platform_exposure: HashMap::new(),
            }),
            order_books: Mutex::new(HashMap::new()),
        }
    }

    pub fn update_order_book(&self, book: OrderBook) {
        self.order_books.lock().insert(book.market_id.clone(), book);
    }

    /// `record_pnl` (spec.md §4.7): updates equity and the HWM ratchet.
    /// HWM never decreases (invariant 5, spec.md §8).
    pub fn record_pnl(&self, delta: Decimal) {
        let mut state = self.state.lock();
        state.current_value += delta;
        state.daily_pnl += delta;
        if state.current_value > state.high_water_mark {
            state.high_water_mark = state.current_value;
        }
    }

    fn maybe_daily_reset(&self, state: &mut RiskState) {
        let today = Utc::now().date_naive();
        if today != state.last_reset_date {
            state.daily_pnl = Decimal::ZERO;
            state.last_reset_date = today;
        }
    }

    /// Ordered rule evaluation (spec.md §4.7). Returns the decision plus the
    /// rule name that fired, or `None` on approval.
    pub fn evaluate(&self, request: &TradeRequest) -> (RiskOutcome, Option<&'static str>) {
        let mut state = self.state.lock();

        // Rule 1: system halt.
        if state.halted {
            return (RiskOutcome::Rejected("system_halt"), Some("system_halt"));
        }

        // Rule 2: daily reset (side effect, not a rejection).
        self.maybe_daily_reset(&mut state);

        // Rule 3: drawdown halt.
        let floor = state.high_water_mark * (Decimal::ONE - self.config.drawdown_limit_pct / Decimal::from(100));
        if state.current_value < floor {
            state.halted = true;
            return (RiskOutcome::Rejected("drawdown_halt"), Some("drawdown_halt"));
        }

        // Rule 4: daily loss limit.
        let daily_loss_floor = -(self.config.initial_bankroll * self.config.daily_loss_limit_pct / Decimal::from(100));
        if state.daily_pnl < daily_loss_floor {
            return (RiskOutcome::Rejected("daily_loss_limit"), Some("daily_loss_limit"));
        }

        // Rule 5: position limit.
        let current_position = *state.positions.get(&request.market_id).unwrap_or(&Decimal::ZERO);
        let new_position = current_position + request.amount;
        let position_cap = self.config.initial_bankroll * self.config.position_limit_pct / Decimal::from(100);
        if new_position > position_cap {
            return (RiskOutcome::Rejected("position_limit"), Some("position_limit"));
        }

        // Rule 6: platform limit.
        let venue = venue_of(&request.market_id).to_string();
        let current_exposure = *state.platform_exposure.get(&venue).unwrap_or(&Decimal::ZERO);
        let new_exposure = current_exposure + request.amount;
        let platform_cap = self.config.initial_bankroll * self.config.platform_limit_pct / Decimal::from(100);
        if new_exposure > platform_cap {
            return (RiskOutcome::Rejected("platform_limit"), Some("platform_limit"));
        }

        // Rule 7: minimum profit threshold (signed, per the redesign flag).
        let signed_profit = request.amount * request.expected_edge;
        if signed_profit < self.config.min_profit_threshold {
            return (RiskOutcome::Rejected("minimum_profit"), Some("minimum_profit"));
        }

        // Rule 8: slippage guard, only when a book is cached for this market.
        if let Some(book) = self.order_books.lock().get(&request.market_id) {
            let side_levels = match request.side {
                crate::models::Side::Buy => &book.asks,
                crate::models::Side::Sell => &book.bids,
            };
            match vwap_for_size(side_levels, request.amount) {
                None => return (RiskOutcome::Rejected("slippage_guard"), Some("slippage_guard")),
                Some(vwap) => {
                    let slippage = vwap - request.max_price;
                    if slippage > Decimal::ZERO && slippage > request.expected_edge.abs() * Decimal::new(5, 1) {
                        return (RiskOutcome::Rejected("slippage_guard"), Some("slippage_guard"));
                    }
                }
            }
        }

        state.positions.insert(request.market_id.clone(), new_position);
        state.platform_exposure.insert(venue, new_exposure);
        (RiskOutcome::Approved, None)
    }

    pub fn snapshot(&self) -> RiskSnapshot {
        let state = self.state.lock();
        RiskSnapshot {
            current_value: state.current_value,
            high_water_mark: state.high_water_mark,
            daily_pnl: state.daily_pnl,
            initial_bankroll: self.config.initial_bankroll,
            positions: state.positions.clone(),
            platform_exposure: state.platform_exposure.clone(),
            halted: state.halted,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskSnapshot {
    pub current_value: Decimal,
    pub high_water_mark: Decimal,
    pub daily_pnl: Decimal,
    pub initial_bankroll: Decimal,
    pub positions: HashMap<String, Decimal>,
    pub platform_exposure: HashMap<String, Decimal>,
    pub halted: bool,
}

async fn publish_decision(bus: &dyn Bus, decision: &RiskDecision) -> Result<()> {
    let mut record = BusRecord::new();
    record.insert("request_id".to_string(), decision.request_id.clone());
    record.insert("approved".to_string(), decision.approved.to_string());
    record.insert("reason".to_string(), decision.reason.clone());
    if let Some(r) = &decision.rule_triggered {
        record.insert("rule_triggered".to_string(), r.clone());
    }
    record.insert("decided_at".to_string(), decision.decided_at.to_rfc3339());
    bus.publish("trade.decisions", record).await?;
    if decision.approved {
        bus.publish("trade.approved", record_for_approved(decision)).await?;
    }
    Ok(())
}

fn record_for_approved(decision: &RiskDecision) -> BusRecord {
    let mut record = BusRecord::new();
    record.insert("request_id".to_string(), decision.request_id.clone());
    record
}

pub fn parse_decision(record: &BusRecord) -> Option<RiskDecision> {
    Some(RiskDecision {
        request_id: record.get("request_id")?.clone(),
        approved: record.get("approved")?.parse().ok()?,
        reason: record.get("reason").cloned().unwrap_or_default(),
        rule_triggered: record.get("rule_triggered").cloned(),
        decided_at: record.get("decided_at").and_then(|v| chrono::DateTime::parse_from_rfc3339(v).ok()).map(|d| d.with_timezone(&Utc)).unwrap_or_else(Utc::now),
    })
}

#[async_trait]
impl Agent for RiskGate {
    fn name(&self) -> &str {
        "risk-gate"
    }

    fn subscriptions(&self) -> Vec<String> {
        vec!["trade.requests".to_string()]
    }

    async fn handle(&self, _channel: &str, record: BusRecord, bus: &dyn Bus) -> Result<()> {
        let request = match parse_trade_request(&record) {
            Some(r) => r,
            None => return Ok(()),
        };

        let (outcome, rule) = self.evaluate(&request);
        let approved = matches!(outcome, RiskOutcome::Approved);
        let reason = match rule {
            Some(r) => format!("rule '{r}' triggered"),
            None => "approved".to_string(),
        };
        info!(request_id = %request.id, approved, rule = rule.unwrap_or("none"), "risk_decision");

        let decision = RiskDecision {
            request_id: request.id,
            approved,
            reason,
            rule_triggered: rule.map(|r| r.to_string()),
            decided_at: Utc::now(),
        };
        publish_decision(bus, &decision).await
    }
}
