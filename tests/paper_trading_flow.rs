//! End-to-end paper trading flow: oracle feed -> scanner -> strategy ->
//! risk gate -> paper executor -> allocator, driven through the real bus
//! wire contracts rather than calling internal helpers directly, in the
//! style of `tests/backtest_run_integration.rs` in the teacher (an
//! integration test that exercises the library crate's public surface
//! directly instead of shelling out to the built binary).

use std::sync::Arc;

use chrono::Utc;
use rust_decimal_macros::dec;

use predictbot_core::agent::Agent;
use predictbot_core::allocator::{Allocator, AllocatorConfig};
use predictbot_core::bus::{Bus, BusRecord, SqliteBus};
use predictbot_core::execution::PaperExecutor;
use predictbot_core::matcher::OracleMappingSink;
use predictbot_core::persistence::Repository;
use predictbot_core::risk::{RiskConfig, RiskGate};
use predictbot_core::scanner::{Scanner, ScannerConfig};
use predictbot_core::strategy::{OracleSniper, StrategyRuntime};

#[tokio::test]
async fn full_paper_trading_pipeline_fills_a_trade() {
    let bus = SqliteBus::open_in_memory().unwrap();

    let scanner = Scanner::new(
        ScannerConfig { min_edge_pct: dec!(0.01), min_signal_strength: 0.01 },
        vec!["polymarket".to_string()],
        vec!["chainlink".to_string()],
        vec!["BTC".to_string()],
    );
    scanner.register_market_oracle_mapping("polymarket:btc-100k", "BTC", dec!(100000), "above");

    let mut price = BusRecord::new();
    price.insert("market_id".to_string(), "polymarket:btc-100k".to_string());
    price.insert("venue".to_string(), "polymarket".to_string());
    price.insert("title".to_string(), "Will BTC reach $100,000?".to_string());
    price.insert("yes_price".to_string(), "0.75".to_string());
    price.insert("no_price".to_string(), "0.25".to_string());
    scanner.handle("venue.polymarket.prices", price, &bus).await.unwrap();

    let mut oracle_update = BusRecord::new();
    oracle_update.insert("source".to_string(), "chainlink".to_string());
    oracle_update.insert("symbol".to_string(), "BTC".to_string());
    oracle_update.insert("value".to_string(), "105000".to_string());
    oracle_update.insert("timestamp".to_string(), Utc::now().to_rfc3339());
    scanner.handle("oracle.chainlink.BTC", oracle_update, &bus).await.unwrap();

    let (_, opp_record) = bus
        .consume("opportunities.detected", 0, 10)
        .await
        .unwrap()
        .pop()
        .expect("scanner should have emitted an oracle-lag opportunity");
    assert_eq!(opp_record.get("type").unwrap(), "ORACLE_LAG");

    let strategy = StrategyRuntime::new(OracleSniper::default(), dec!(0.01), 0.01);
    let mut allocation = BusRecord::new();
    allocation.insert("strategy".to_string(), "oracle-sniper".to_string());
    allocation.insert("allocation_pct".to_string(), "100".to_string());
    allocation.insert("total_capital".to_string(), "1000".to_string());
    strategy.handle("allocations.update", allocation, &bus).await.unwrap();
    strategy.handle("opportunities.detected", opp_record, &bus).await.unwrap();

    let (_, request_record) = bus
        .consume("trade.requests", 0, 10)
        .await
        .unwrap()
        .pop()
        .expect("strategy should have sized and published a trade request");
    assert_eq!(request_record.get("strategy").unwrap(), "oracle-sniper");

    let risk_gate = RiskGate::new(RiskConfig {
        initial_bankroll: dec!(1000),
        position_limit_pct: dec!(10),
        platform_limit_pct: dec!(50),
        daily_loss_limit_pct: dec!(10),
        drawdown_limit_pct: dec!(20),
        min_profit_threshold: dec!(0.05),
    });
    risk_gate.handle("trade.requests", request_record.clone(), &bus).await.unwrap();

    let (_, decision_record) = bus
        .consume("trade.decisions", 0, 10)
        .await
        .unwrap()
        .pop()
        .expect("risk gate should have decided on the request");
    assert_eq!(decision_record.get("approved").unwrap(), "true");

    let repo = Arc::new(Repository::open_in_memory().unwrap());
    let executor = PaperExecutor::new(repo.clone());
    executor.handle("trade.requests", request_record, &bus).await.unwrap();
    executor.handle("trade.decisions", decision_record, &bus).await.unwrap();

    assert_eq!(executor.stats().trade_count, 1);
    let summary = repo.get_daily_summary(1).unwrap();
    assert_eq!(summary.closed, 1);
    assert_eq!(summary.wins, 1);
    assert!(summary.realized_pnl > dec!(0));

    let allocator = Allocator::new(AllocatorConfig {
        initial_bankroll: dec!(1000),
        min_allocation_pct: dec!(0.05),
        max_allocation_pct: dec!(1.0),
        rebalance_interval_trades: 5,
        strategies: vec!["oracle-sniper".to_string()],
    });
    let (_, result_record) = bus
        .consume("trade.results", 0, 10)
        .await
        .unwrap()
        .pop()
        .expect("paper executor should have published a fill result");
    allocator.handle("trade.results", result_record, &bus).await.unwrap();

    let snapshot = allocator.get_state_snapshot();
    assert_eq!(snapshot.strategies.get("oracle-sniper").unwrap().0.trades, 1);
}

#[tokio::test]
async fn minimum_profit_rejection_never_reaches_the_executor() {
    let bus = SqliteBus::open_in_memory().unwrap();

    let risk_gate = RiskGate::new(RiskConfig {
        initial_bankroll: dec!(500),
        position_limit_pct: dec!(10),
        platform_limit_pct: dec!(50),
        daily_loss_limit_pct: dec!(10),
        drawdown_limit_pct: dec!(20),
        min_profit_threshold: dec!(0.05),
    });

    let mut request = BusRecord::new();
    request.insert("id".to_string(), "r1".to_string());
    request.insert("opportunity_id".to_string(), "o1".to_string());
    request.insert("strategy".to_string(), "oracle-sniper".to_string());
    request.insert("market_id".to_string(), "polymarket:m1".to_string());
    request.insert("side".to_string(), "BUY".to_string());
    request.insert("outcome".to_string(), "YES".to_string());
    request.insert("amount".to_string(), "1.00".to_string());
    request.insert("max_price".to_string(), "0.5".to_string());
    request.insert("expected_edge".to_string(), "0.02".to_string());
    request.insert("created_at".to_string(), Utc::now().to_rfc3339());

    risk_gate.handle("trade.requests", request.clone(), &bus).await.unwrap();

    let (_, decision_record) = bus.consume("trade.decisions", 0, 10).await.unwrap().pop().unwrap();
    assert_eq!(decision_record.get("approved").unwrap(), "false");
    assert_eq!(decision_record.get("rule_triggered").unwrap(), "minimum_profit");

    let repo = Arc::new(Repository::open_in_memory().unwrap());
    let executor = PaperExecutor::new(repo.clone());
    executor.handle("trade.requests", request, &bus).await.unwrap();
    executor.handle("trade.decisions", decision_record, &bus).await.unwrap();

    assert_eq!(executor.stats().trade_count, 0);
    assert_eq!(executor.stats().reject_count, 1);
    assert!(bus.consume("trade.approved", 0, 10).await.unwrap().is_empty());
}
