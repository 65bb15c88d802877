//! CLI entry point, grounded on `main.rs::main`'s `#[tokio::main]` shape and
//! `init_tracing()`'s `EnvFilter` setup, with a `clap` derive surface modeled
//! on `bin/dataset_inspect.rs::Cli`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use predictbot_core::agent::Orchestrator;
use predictbot_core::allocator::{Allocator, AllocatorConfig};
use predictbot_core::bus::{Bus, SqliteBus};
use predictbot_core::config::Config;
use predictbot_core::execution::{LiveExecutor, PaperExecutor};
use predictbot_core::ingest::{OracleAgent, OracleSource, PolymarketAdapter, ReferenceOracle, VenueAdapter, VenueWatcher};
use predictbot_core::matcher::{MatcherAgent, NullLlmParser};
use predictbot_core::persistence::Repository;
use predictbot_core::risk::{RiskConfig, RiskGate};
use predictbot_core::scanner::{Scanner, ScannerConfig};
use predictbot_core::strategy::{OracleSniper, StrategyRuntime};

#[derive(Parser)]
#[command(name = "predictbot", version, about = "Automated prediction-market arbitrage engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the orchestrator and run until interrupted.
    Pilot,
    /// Print a paper-trading performance report.
    Report {
        #[arg(long, default_value_t = 1)]
        days: i64,
        #[arg(long)]
        json: bool,
    },
    /// Print the build version.
    Version,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();
}

fn build_venue_adapter(venue: &str) -> Option<Arc<dyn VenueAdapter>> {
    match venue {
        "polymarket" => Some(Arc::new(PolymarketAdapter::new("https://clob.polymarket.com")) as Arc<dyn VenueAdapter>),
        "kalshi" => Some(Arc::new(PolymarketAdapter::with_venue("kalshi", "https://trading-api.kalshi.com")) as Arc<dyn VenueAdapter>),
        other => {
            tracing::warn!(venue = other, "unknown_venue_skipped");
            None
        }
    }
}

fn build_oracle_source(oracle: &str) -> Arc<dyn OracleSource> {
    Arc::new(ReferenceOracle::new(oracle, "https://oracle.example.com"))
}

async fn run_pilot(config: Config) -> anyhow::Result<()> {
    let bus: Arc<dyn Bus> = Arc::new(SqliteBus::open(&config.database_path)?);
    let repo = Arc::new(Repository::open(&config.database_path)?);

    let venues: HashMap<String, Arc<dyn VenueAdapter>> = config
        .active_venues
        .iter()
        .filter_map(|v| build_venue_adapter(v).map(|a| (v.clone(), a)))
        .collect();

    let scan_interval = Duration::from_secs(config.scan_interval_secs);

    let scanner = Arc::new(Scanner::new(
        ScannerConfig { min_edge_pct: config.min_edge_pct, min_signal_strength: config.min_signal_strength },
        config.active_venues.clone(),
        config.active_oracles.clone(),
        config.oracle_symbols.clone(),
    ));

    let strategies = vec!["oracle-sniper".to_string()];

    let mut orchestrator = Orchestrator::new(bus.clone());

    for adapter in venues.values() {
        orchestrator.spawn(Arc::new(VenueWatcher::new(adapter.clone(), scan_interval)));
    }

    for oracle_name in &config.active_oracles {
        let oracle = build_oracle_source(oracle_name);
        orchestrator.spawn(Arc::new(OracleAgent::new(oracle, config.oracle_symbols.clone(), scan_interval)));
    }

    orchestrator.spawn(Arc::new(MatcherAgent::new(
        venues.values().cloned().collect(),
        scanner.clone(),
        Arc::new(NullLlmParser),
        scan_interval * 4,
    )));

    orchestrator.spawn(scanner);

    orchestrator.spawn(Arc::new(StrategyRuntime::new(OracleSniper::default(), config.min_edge_pct, config.min_signal_strength)));

    orchestrator.spawn(Arc::new(RiskGate::new(RiskConfig {
        initial_bankroll: config.initial_bankroll,
        position_limit_pct: config.position_limit_pct,
        platform_limit_pct: config.platform_limit_pct,
        daily_loss_limit_pct: config.daily_loss_limit_pct,
        drawdown_limit_pct: config.drawdown_limit_pct,
        min_profit_threshold: config.min_profit_threshold,
    })));

    if config.paper_trading {
        orchestrator.spawn(Arc::new(PaperExecutor::new(repo.clone())));
    } else {
        orchestrator.spawn(Arc::new(LiveExecutor::new(venues.clone())));
    }

    orchestrator.spawn(Arc::new(Allocator::new(AllocatorConfig {
        initial_bankroll: config.initial_bankroll,
        min_allocation_pct: config.min_allocation_pct,
        max_allocation_pct: config.max_allocation_pct,
        rebalance_interval_trades: config.rebalance_interval_trades,
        strategies,
    })));

    tracing::info!(
        paper_trading = config.paper_trading,
        venues = ?config.active_venues,
        oracles = ?config.active_oracles,
        "predictbot_started"
    );

    orchestrator.run_until_shutdown().await;
    Ok(())
}

fn print_report(config: &Config, days: i64, json: bool) -> anyhow::Result<()> {
    let repo = Repository::open(&config.database_path)?;
    let summary = repo.get_daily_summary(days)?;

    if json {
        let mut line = format!(
            "{{\"days\":{days},\"total\":{},\"open\":{},\"closed\":{},\"realized_pnl\":{},\"wins\":{},\"losses\":{},\"win_rate\":{},\"rejections\":{}}}",
            summary.total, summary.open, summary.closed, summary.realized_pnl, summary.wins, summary.losses, summary.win_rate, summary.rejections
        );
        line.push('\n');
        print!("{line}");
    } else {
        println!("Report — last {days} day(s)");
        println!("  total trades:   {}", summary.total);
        println!("  open:           {}", summary.open);
        println!("  closed:         {}", summary.closed);
        println!("  realized P&L:   {}", summary.realized_pnl);
        println!("  wins / losses:  {} / {}", summary.wins, summary.losses);
        println!("  win rate:       {:.1}%", summary.win_rate * 100.0);
        println!("  rejections:     {}", summary.rejections);
        for t in &summary.by_opportunity_type {
            println!("    {:<16} {}", t.opportunity_type, t.count);
        }
        for r in &summary.risk_rejections {
            println!("    rejected ({}): {}", r.reason, r.count);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Command::Pilot => run_pilot(config).await,
        Command::Report { days, json } => print_report(&config, days, json),
        Command::Version => {
            println!("predictbot {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
