//! Trade execution (spec.md §4.8): paper and live modes behind one wire
//! contract on `trade.results`.
//!
//! Grounded on `vault/execution.rs::{OrderRequest, OrderAck, ExecutionAdapter}`
//! for the request/ack shape, generalized into the bus-driven agent model;
//! `vault/paper_ledger.rs::VaultPaperLedger` for the paper fill simulation
//! and its running counters.

mod live;
mod paper;

pub use live::LiveExecutor;
pub use paper::{PaperExecutor, PaperLedgerStats};

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::bus::{Bus, BusRecord};
use crate::error::Result;
use crate::models::{OutcomeSide, Side, Trade, TradeRequest, TradeStatus};
use crate::strategy::parse_trade_request;

/// Holds `TradeRequest`s seen on `trade.requests` until a matching decision
/// or approval arrives — `trade.decisions`/`trade.approved` only carry the
/// `request_id`, not the full request (spec.md §4.7 wire format).
#[derive(Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<String, TradeRequest>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        PendingRequests::default()
    }

    pub fn remember(&self, record: &BusRecord) {
        if let Some(request) = parse_trade_request(record) {
            self.inner.lock().insert(request.id.clone(), request);
        }
    }

    /// Removes and returns the cached request, if any (single-use: a
    /// request is only ever acted on once).
    pub fn take(&self, request_id: &str) -> Option<TradeRequest> {
        self.inner.lock().remove(request_id)
    }
}

pub async fn publish_trade_result(bus: &dyn Bus, trade: &Trade, strategy: &str, realized_pnl: Option<Decimal>, error: Option<&str>) -> Result<()> {
    let mut record = BusRecord::new();
    record.insert("id".to_string(), trade.id.clone());
    record.insert("request_id".to_string(), trade.request_id.clone());
    record.insert("strategy".to_string(), strategy.to_string());
    record.insert("market_id".to_string(), trade.market_id.clone());
    record.insert("venue".to_string(), trade.venue.clone());
    record.insert("side".to_string(), trade.side.to_string());
    record.insert("outcome".to_string(), trade.outcome.to_string());
    record.insert("amount".to_string(), trade.amount.to_string());
    record.insert("price".to_string(), trade.price.to_string());
    record.insert("fees".to_string(), trade.fees.to_string());
    record.insert("status".to_string(), trade.status.to_string());
    record.insert("executed_at".to_string(), trade.executed_at.to_rfc3339());
    if let Some(ext) = &trade.external_id {
        record.insert("external_id".to_string(), ext.clone());
    }
    if let Some(pnl) = realized_pnl {
        record.insert("realized_pnl".to_string(), pnl.to_string());
    }
    if let Some(err) = error {
        record.insert("error".to_string(), err.to_string());
    }
    bus.publish("trade.results", record).await?;
    Ok(())
}

pub fn parse_trade_result(record: &BusRecord) -> Option<Trade> {
    Some(Trade {
        id: record.get("id")?.clone(),
        request_id: record.get("request_id")?.clone(),
        market_id: record.get("market_id")?.clone(),
        venue: record.get("venue")?.clone(),
        side: record.get("side")?.parse::<Side>().ok()?,
        outcome: record.get("outcome")?.parse::<OutcomeSide>().ok()?,
        amount: Decimal::from_str_exact(record.get("amount")?).ok()?,
        price: Decimal::from_str_exact(record.get("price")?).ok()?,
        fees: Decimal::from_str_exact(record.get("fees")?).ok()?,
        status: record.get("status")?.parse::<TradeStatus>().ok()?,
        external_id: record.get("external_id").cloned(),
        executed_at: record.get("executed_at").and_then(|v| chrono::DateTime::parse_from_rfc3339(v).ok()).map(|d| d.with_timezone(&Utc)).unwrap_or_else(Utc::now),
        filled_at: None,
    })
}

pub fn parse_realized_pnl(record: &BusRecord) -> Option<Decimal> {
    record.get("realized_pnl").and_then(|v| Decimal::from_str_exact(v).ok())
}
