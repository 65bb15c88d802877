//! Runtime configuration (spec.md §6).
//!
//! Loaded once at startup with `Config::from_env()`, following
//! `models.rs::Config::from_env` in the teacher: `dotenv::dotenv().ok()` then
//! `std::env::var(..).unwrap_or_else(..)` / `.parse().unwrap_or(default)` per
//! field, rather than a derive-based config crate.

use std::collections::HashMap;
use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Per-venue credential bundle. `Display` masks secrets so logging a `Config`
/// (or a `VenueCredentials`) never leaks them, following the teacher's
/// practice of never printing `api_secret`/`private_key` fields directly.
#[derive(Clone)]
pub struct VenueCredentials {
    pub venue: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub private_key: Option<String>,
}

impl VenueCredentials {
    fn from_env(venue: &str) -> Self {
        let prefix = venue.to_ascii_uppercase();
        VenueCredentials {
            venue: venue.to_string(),
            api_key: std::env::var(format!("{prefix}_API_KEY")).ok(),
            api_secret: std::env::var(format!("{prefix}_API_SECRET")).ok(),
            private_key: std::env::var(format!("{prefix}_PRIVATE_KEY")).ok(),
        }
    }
}

impl fmt::Debug for VenueCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VenueCredentials")
            .field("venue", &self.venue)
            .field("api_key", &self.api_key.as_ref().map(|_| "****"))
            .field("api_secret", &self.api_secret.as_ref().map(|_| "****"))
            .field("private_key", &self.private_key.as_ref().map(|_| "****"))
            .finish()
    }
}

impl fmt::Display for VenueCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{key={}}}", self.venue, if self.api_key.is_some() { "****" } else { "none" })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the sqlite file backing the message bus and the repository.
    pub database_path: String,

    pub initial_bankroll: Decimal,
    pub position_limit_pct: Decimal,
    pub platform_limit_pct: Decimal,
    pub daily_loss_limit_pct: Decimal,
    pub drawdown_limit_pct: Decimal,
    pub min_profit_threshold: Decimal,
    pub min_edge_pct: Decimal,
    pub min_signal_strength: f64,

    pub paper_trading: bool,

    pub active_venues: Vec<String>,
    pub active_oracles: Vec<String>,
    pub oracle_symbols: Vec<String>,
    pub venue_credentials: HashMap<String, VenueCredentials>,

    pub scan_interval_secs: u64,
    pub rebalance_interval_trades: u64,
    pub min_allocation_pct: Decimal,
    pub max_allocation_pct: Decimal,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_decimal_or(key: &str, default: Decimal) -> Decimal {
    std::env::var(key)
        .ok()
        .and_then(|v| Decimal::from_str_exact(&v).ok())
        .unwrap_or(default)
}

fn env_list_or(key: &str, default: &[&str]) -> Vec<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_else(|| default.iter().map(|s| s.to_string()).collect())
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let active_venues = env_list_or("ACTIVE_VENUES", &["polymarket", "kalshi"]);
        let active_oracles = env_list_or("ACTIVE_ORACLES", &["chainlink"]);
        let oracle_symbols = env_list_or("ORACLE_SYMBOLS", &["BTC", "ETH", "SOL"]);

        let venue_credentials = active_venues
            .iter()
            .map(|v| (v.clone(), VenueCredentials::from_env(v)))
            .collect();

        Config {
            database_path: std::env::var("DATABASE_PATH").unwrap_or_else(|_| "predictbot.db".to_string()),

            initial_bankroll: env_decimal_or("INITIAL_BANKROLL", dec!(500)),
            position_limit_pct: env_decimal_or("POSITION_LIMIT_PCT", dec!(10)),
            platform_limit_pct: env_decimal_or("PLATFORM_LIMIT_PCT", dec!(50)),
            daily_loss_limit_pct: env_decimal_or("DAILY_LOSS_LIMIT_PCT", dec!(10)),
            drawdown_limit_pct: env_decimal_or("DRAWDOWN_LIMIT_PCT", dec!(20)),
            min_profit_threshold: env_decimal_or("MIN_PROFIT_THRESHOLD", dec!(0.05)),
            min_edge_pct: env_decimal_or("MIN_EDGE_PCT", dec!(0.02)),
            min_signal_strength: env_or("MIN_SIGNAL_STRENGTH", 0.50),

            paper_trading: env_or("PAPER_TRADING", true),

            active_venues,
            active_oracles,
            oracle_symbols,
            venue_credentials,

            scan_interval_secs: env_or("SCAN_INTERVAL_SECS", 5),
            rebalance_interval_trades: env_or("REBALANCE_INTERVAL_TRADES", 10),
            min_allocation_pct: env_decimal_or("MIN_ALLOCATION_PCT", dec!(0.05)),
            max_allocation_pct: env_decimal_or("MAX_ALLOCATION_PCT", dec!(0.50)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        // Clear any env leakage from the test harness so defaults are exercised.
        for key in [
            "DATABASE_PATH", "INITIAL_BANKROLL", "POSITION_LIMIT_PCT", "PLATFORM_LIMIT_PCT",
            "DAILY_LOSS_LIMIT_PCT", "DRAWDOWN_LIMIT_PCT", "MIN_PROFIT_THRESHOLD", "MIN_EDGE_PCT",
            "MIN_SIGNAL_STRENGTH", "PAPER_TRADING", "ACTIVE_VENUES", "ACTIVE_ORACLES",
        ] {
            std::env::remove_var(key);
        }
        let cfg = Config::from_env();
        assert_eq!(cfg.initial_bankroll, dec!(500));
        assert_eq!(cfg.position_limit_pct, dec!(10));
        assert_eq!(cfg.platform_limit_pct, dec!(50));
        assert_eq!(cfg.daily_loss_limit_pct, dec!(10));
        assert_eq!(cfg.drawdown_limit_pct, dec!(20));
        assert_eq!(cfg.min_profit_threshold, dec!(0.05));
        assert_eq!(cfg.min_edge_pct, dec!(0.02));
        assert!((cfg.min_signal_strength - 0.50).abs() < f64::EPSILON);
        assert!(cfg.paper_trading);
        assert_eq!(cfg.active_venues, vec!["polymarket", "kalshi"]);
    }

    #[test]
    fn credentials_mask_secrets_in_debug() {
        std::env::set_var("POLYMARKET_API_KEY", "secret123");
        let creds = VenueCredentials::from_env("polymarket");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("secret123"));
        std::env::remove_var("POLYMARKET_API_KEY");
    }
}
