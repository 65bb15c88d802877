use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::agent::Agent;
use crate::bus::{Bus, BusRecord};
use crate::error::Result;
use crate::ingest::VenueAdapter;
use crate::models::venue_of;

use super::{publish_trade_result, PendingRequests};

/// Routes approved trades to the venue's `VenueAdapter` (spec.md §4.8 live
/// mode), grounded on `vault/execution.rs::PolymarketClobAdapter::place_order`
/// generalized behind the venue-agnostic `VenueAdapter` trait.
pub struct LiveExecutor {
    venues: HashMap<String, Arc<dyn VenueAdapter>>,
    pending: PendingRequests,
}

impl LiveExecutor {
    pub fn new(venues: HashMap<String, Arc<dyn VenueAdapter>>) -> Self {
        LiveExecutor { venues, pending: PendingRequests::new() }
    }

    async fn handle_approval(&self, bus: &dyn Bus, record: &BusRecord) -> Result<()> {
        let request_id = match record.get("request_id") {
            Some(id) => id.clone(),
            None => return Ok(()),
        };
        let request = match self.pending.take(&request_id) {
            Some(r) => r,
            None => {
                error!(request_id = %request_id, "no_pending_request_for_approval");
                return Ok(());
            }
        };

        let venue_name = venue_of(&request.market_id).to_string();
        let adapter = match self.venues.get(&venue_name) {
            Some(a) => a.clone(),
            None => {
                error!(venue = %venue_name, "no_venue_adapter_configured");
                return Ok(());
            }
        };

        match adapter.place_order(&request).await {
            Ok(trade) => {
                info!(request_id = %request.id, venue = %venue_name, status = %trade.status, "live_order_placed");
                publish_trade_result(bus, &trade, &request.strategy, None, None).await
            }
            Err(e) => {
                error!(request_id = %request.id, venue = %venue_name, error = %e, "live_order_failed");
                let trade = crate::models::Trade {
                    id: uuid::Uuid::new_v4().to_string(),
                    request_id: request.id.clone(),
                    market_id: request.market_id.clone(),
                    venue: venue_name,
                    side: request.side,
                    outcome: request.outcome,
                    amount: request.amount,
                    price: request.max_price,
                    fees: rust_decimal::Decimal::ZERO,
                    status: crate::models::TradeStatus::Failed,
                    external_id: None,
                    executed_at: chrono::Utc::now(),
                    filled_at: None,
                };
                publish_trade_result(bus, &trade, &request.strategy, None, Some(&e.to_string())).await
            }
        }
    }
}

#[async_trait]
impl Agent for LiveExecutor {
    fn name(&self) -> &str {
        "live-executor"
    }

    fn subscriptions(&self) -> Vec<String> {
        vec!["trade.requests".to_string(), "trade.approved".to_string()]
    }

    async fn handle(&self, channel: &str, record: BusRecord, bus: &dyn Bus) -> Result<()> {
        match channel {
            "trade.requests" => {
                self.pending.remember(&record);
                Ok(())
            }
            "trade.approved" => self.handle_approval(bus, &record).await,
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SqliteBus;
    use crate::models::{Market, OrderBook, OutcomeSide, Side, Trade, TradeRequest, TradeStatus};
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct StubAdapter {
        venue: String,
    }

    #[async_trait]
    impl VenueAdapter for StubAdapter {
        fn venue(&self) -> &str {
            &self.venue
        }
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
        async fn get_markets(&self) -> Result<Vec<Market>> {
            Ok(Vec::new())
        }
        async fn get_order_book(&self, _market_id: &str, _outcome: &str) -> Result<Option<OrderBook>> {
            Ok(None)
        }
        async fn place_order(&self, request: &TradeRequest) -> Result<Trade> {
            Ok(Trade {
                id: "t1".to_string(),
                request_id: request.id.clone(),
                market_id: request.market_id.clone(),
                venue: self.venue.clone(),
                side: request.side,
                outcome: request.outcome,
                amount: request.amount,
                price: request.max_price,
                fees: Decimal::ZERO,
                status: TradeStatus::Submitted,
                external_id: Some("ext-1".to_string()),
                executed_at: Utc::now(),
                filled_at: None,
            })
        }
        async fn get_balance(&self) -> Result<Decimal> {
            Ok(Decimal::ZERO)
        }
    }

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
    async fn approval_places_order_with_matching_venue_adapter() {
        let bus = SqliteBus::open_in_memory().unwrap();
        let mut venues: HashMap<String, Arc<dyn VenueAdapter>> = HashMap::new();
        venues.insert("polymarket".to_string(), Arc::new(StubAdapter { venue: "polymarket".to_string() }));
        let executor = LiveExecutor::new(venues);

        let req = request();
        let mut req_record = BusRecord::new();
        req_record.insert("id".to_string(), req.id.clone());
        req_record.insert("opportunity_id".to_string(), req.opportunity_id.clone());
        req_record.insert("strategy".to_string(), req.strategy.clone());
        req_record.insert("market_id".to_string(), req.market_id.clone());
        req_record.insert("side".to_string(), req.side.to_string());
        req_record.insert("outcome".to_string(), req.outcome.to_string());
        req_record.insert("amount".to_string(), req.amount.to_string());
        req_record.insert("max_price".to_string(), req.max_price.to_string());
        req_record.insert("expected_edge".to_string(), req.expected_edge.to_string());
        req_record.insert("created_at".to_string(), req.created_at.to_rfc3339());
        executor.handle("trade.requests", req_record, &bus).await.unwrap();

        let mut approved = BusRecord::new();
        approved.insert("request_id".to_string(), "r1".to_string());
        executor.handle("trade.approved", approved, &bus).await.unwrap();
    }

    #[tokio::test]
    async fn missing_venue_adapter_is_logged_not_an_error() {
        let bus = SqliteBus::open_in_memory().unwrap();
        let executor = LiveExecutor::new(HashMap::new());

        let req = request();
        let mut req_record = BusRecord::new();
        req_record.insert("id".to_string(), req.id.clone());
        req_record.insert("opportunity_id".to_string(), req.opportunity_id.clone());
        req_record.insert("strategy".to_string(), req.strategy.clone());
        req_record.insert("market_id".to_string(), req.market_id.clone());
        req_record.insert("side".to_string(), req.side.to_string());
        req_record.insert("outcome".to_string(), req.outcome.to_string());
        req_record.insert("amount".to_string(), req.amount.to_string());
        req_record.insert("max_price".to_string(), req.max_price.to_string());
        req_record.insert("expected_edge".to_string(), req.expected_edge.to_string());
        req_record.insert("created_at".to_string(), req.created_at.to_rfc3339());
        executor.handle("trade.requests", req_record, &bus).await.unwrap();

        let mut approved = BusRecord::new();
        approved.insert("request_id".to_string(), "r1".to_string());
        assert!(executor.handle("trade.approved", approved, &bus).await.is_ok());
    }
}
