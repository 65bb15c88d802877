//! Core data model (spec.md §3).
//!
//! Monetary values are `rust_decimal::Decimal`; binary floats are reserved
//! for dimensionless scores (signal strength, confidence) the way the
//! teacher's `risk.rs::RiskLevel`/`confidence` fields do. Timestamps are
//! always `DateTime<Utc>`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// `venue:external_id` identifier shared by markets, trades and orders.
pub fn market_id(venue: &str, external_id: &str) -> String {
    format!("{venue}:{external_id}")
}

/// Split a `market_id` back into its venue prefix, used by the risk gate's
/// per-platform exposure check (spec.md §4.7 rule 6).
pub fn venue_of(market_id: &str) -> &str {
    market_id.split(':').next().unwrap_or(market_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", match self { Side::Buy => "BUY", Side::Sell => "SELL" })
    }
}

impl FromStr for Side {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => Err(format!("unknown side '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeSide {
    Yes,
    No,
}

impl fmt::Display for OutcomeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", match self { OutcomeSide::Yes => "YES", OutcomeSide::No => "NO" })
    }
}

impl FromStr for OutcomeSide {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "YES" => Ok(OutcomeSide::Yes),
            "NO" => Ok(OutcomeSide::No),
            other => Err(format!("unknown outcome '{other}'")),
        }
    }
}

/// A binary prediction market (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub venue: String,
    pub external_id: String,
    pub title: String,
    pub yes_price: Decimal,
    pub no_price: Decimal,
    pub volume_24h: Decimal,
    pub liquidity: Decimal,
    pub last_update: DateTime<Utc>,
}

impl Market {
    pub fn id(&self) -> String {
        market_id(&self.venue, &self.external_id)
    }

    /// Invariant 1 (spec.md §8): `0 <= yes_price <= 1` and `0 <= no_price <= 1`.
    pub fn prices_valid(&self) -> bool {
        let zero = Decimal::ZERO;
        let one = Decimal::ONE;
        self.yes_price >= zero && self.yes_price <= one && self.no_price >= zero && self.no_price <= one
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub name: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiOutcomeMarket {
    pub venue: String,
    pub external_id: String,
    pub outcomes: Vec<Outcome>,
    pub last_update: DateTime<Utc>,
}

impl MultiOutcomeMarket {
    pub fn id(&self) -> String {
        market_id(&self.venue, &self.external_id)
    }

    pub fn price_sum(&self) -> Decimal {
        self.outcomes.iter().map(|o| o.price).sum()
    }

    /// `arbitrage_edge = max(0, 1 - price_sum)` (spec.md §3).
    pub fn arbitrage_edge(&self) -> Decimal {
        (Decimal::ONE - self.price_sum()).max(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleData {
    pub source: String,
    pub symbol: String,
    pub value: Decimal,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub market_id: String,
    /// Descending price.
    pub bids: Vec<OrderBookLevel>,
    /// Ascending price.
    pub asks: Vec<OrderBookLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Invariant 2 (spec.md §8): bids strictly descending, asks strictly
    /// ascending, `best_bid <= best_ask` when both exist.
    pub fn is_valid(&self) -> bool {
        let bids_ok = self.bids.windows(2).all(|w| w[0].price > w[1].price);
        let asks_ok = self.asks.windows(2).all(|w| w[0].price < w[1].price);
        let crossed_ok = match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => b <= a,
            _ => true,
        };
        bids_ok && asks_ok && crossed_ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityType {
    CrossPlatform,
    OracleLag,
    Temporal,
    Mispricing,
}

impl fmt::Display for OpportunityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpportunityType::CrossPlatform => "CROSS_PLATFORM",
            OpportunityType::OracleLag => "ORACLE_LAG",
            OpportunityType::Temporal => "TEMPORAL",
            OpportunityType::Mispricing => "MISPRICING",
        };
        write!(f, "{s}")
    }
}

impl FromStr for OpportunityType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CROSS_PLATFORM" => Ok(OpportunityType::CrossPlatform),
            "ORACLE_LAG" => Ok(OpportunityType::OracleLag),
            "TEMPORAL" => Ok(OpportunityType::Temporal),
            "MISPRICING" => Ok(OpportunityType::Mispricing),
            other => Err(format!("unknown opportunity type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    #[serde(rename = "type")]
    pub opp_type: OpportunityType,
    pub markets: Vec<String>,
    pub oracle_source: Option<String>,
    pub oracle_value: Option<Decimal>,
    /// May be negative (signals direction).
    pub expected_edge: Decimal,
    pub signal_strength: f64,
    pub detected_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRequest {
    pub id: String,
    pub opportunity_id: String,
    pub strategy: String,
    pub market_id: String,
    pub side: Side,
    pub outcome: OutcomeSide,
    pub amount: Decimal,
    pub max_price: Decimal,
    pub expected_edge: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskDecision {
    pub request_id: String,
    pub approved: bool,
    pub reason: String,
    pub rule_triggered: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Pending,
    Approved,
    Rejected,
    Submitted,
    Filled,
    Partial,
    Cancelled,
    Failed,
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeStatus::Pending => "PENDING",
            TradeStatus::Approved => "APPROVED",
            TradeStatus::Rejected => "REJECTED",
            TradeStatus::Submitted => "SUBMITTED",
            TradeStatus::Filled => "FILLED",
            TradeStatus::Partial => "PARTIAL",
            TradeStatus::Cancelled => "CANCELLED",
            TradeStatus::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TradeStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "PENDING" => TradeStatus::Pending,
            "APPROVED" => TradeStatus::Approved,
            "REJECTED" => TradeStatus::Rejected,
            "SUBMITTED" => TradeStatus::Submitted,
            "FILLED" => TradeStatus::Filled,
            "PARTIAL" => TradeStatus::Partial,
            "CANCELLED" => TradeStatus::Cancelled,
            "FAILED" => TradeStatus::Failed,
            other => return Err(format!("unknown trade status '{other}'")),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub request_id: String,
    pub market_id: String,
    pub venue: String,
    pub side: Side,
    pub outcome: OutcomeSide,
    pub amount: Decimal,
    pub price: Decimal,
    pub fees: Decimal,
    pub status: TradeStatus,
    pub external_id: Option<String>,
    pub executed_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

/// Live-trading order (spec.md §3) — unused in paper mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub external_id: Option<String>,
    pub venue: String,
    pub token_id: String,
    pub side: Side,
    pub order_type: OrderType,
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub filled_amount: Decimal,
    pub average_price: Option<Decimal>,
    pub status: OrderStatus,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn market_prices_valid() {
        let m = Market {
            venue: "polymarket".into(),
            external_id: "m1".into(),
            title: "t".into(),
            yes_price: dec!(0.4),
            no_price: dec!(0.5),
            volume_24h: Decimal::ZERO,
            liquidity: Decimal::ZERO,
            last_update: Utc::now(),
        };
        assert!(m.prices_valid());
        assert_eq!(m.id(), "polymarket:m1");
    }

    #[test]
    fn order_book_validity() {
        let ob = OrderBook {
            market_id: "polymarket:m1".into(),
            bids: vec![
                OrderBookLevel { price: dec!(0.50), size: dec!(100) },
                OrderBookLevel { price: dec!(0.48), size: dec!(100) },
            ],
            asks: vec![
                OrderBookLevel { price: dec!(0.52), size: dec!(100) },
                OrderBookLevel { price: dec!(0.55), size: dec!(100) },
            ],
        };
        assert!(ob.is_valid());
        assert_eq!(ob.best_bid(), Some(dec!(0.50)));
        assert_eq!(ob.best_ask(), Some(dec!(0.52)));
    }

    #[test]
    fn order_book_rejects_crossed_book() {
        let ob = OrderBook {
            market_id: "polymarket:m1".into(),
            bids: vec![OrderBookLevel { price: dec!(0.60), size: dec!(10) }],
            asks: vec![OrderBookLevel { price: dec!(0.55), size: dec!(10) }],
        };
        assert!(!ob.is_valid());
    }

    #[test]
    fn multi_outcome_edge() {
        let m = MultiOutcomeMarket {
            venue: "polymarket".into(),
            external_id: "e1".into(),
            outcomes: vec![
                Outcome { name: "A".into(), price: dec!(0.30) },
                Outcome { name: "B".into(), price: dec!(0.28) },
                Outcome { name: "C".into(), price: dec!(0.30) },
            ],
            last_update: Utc::now(),
        };
        assert_eq!(m.price_sum(), dec!(0.88));
        assert_eq!(m.arbitrage_edge(), dec!(0.12));
    }

    #[test]
    fn venue_of_splits_prefix() {
        assert_eq!(venue_of("kalshi:abc"), "kalshi");
        assert_eq!(venue_of("noprefix"), "noprefix");
    }
}
