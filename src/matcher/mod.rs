//! Market title matcher (spec.md §4.4).
//!
//! New relative to the teacher (it never parses market titles into oracle
//! thresholds) but built in its style: defensive, testable pure functions
//! (`is_crypto_market`, regex extraction) the way `risk.rs`'s calculators are
//! small and independently unit-tested, plus a trait-object external
//! collaborator (`LlmMarketParser`) left unimplemented behind a stub default,
//! matching `scrapers/polymarket_api.rs::fetch_active_markets`'s pattern of
//! an adapter method that is not wired to a real backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use rust_decimal::Decimal;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::agent::Agent;
use crate::bus::{Bus, BusRecord};
use crate::error::Result;
use crate::ingest::VenueAdapter;
use crate::models::Market;

/// `(alias_substring, canonical_symbol)`. Matched case-insensitively.
const ASSET_ALIASES: &[(&str, &str)] = &[
    ("btc", "BTC"),
    ("bitcoin", "BTC"),
    ("eth", "ETH"),
    ("ethereum", "ETH"),
    ("sol", "SOL"),
    ("solana", "SOL"),
];

static THRESHOLD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(above|over|reach|reaches|below|under)\D{0,12}\$?([0-9][0-9,]*)").unwrap()
});

/// Case-insensitive substring match against the asset-alias table
/// (spec.md §4.4 step 1).
pub fn is_crypto_market(title: &str) -> Option<&'static str> {
    let lower = title.to_lowercase();
    ASSET_ALIASES.iter().find(|(alias, _)| lower.contains(alias)).map(|(_, symbol)| *symbol)
}

fn direction_from_word(word: &str) -> Option<&'static str> {
    match word.to_lowercase().as_str() {
        "above" | "over" | "reach" | "reaches" => Some("above"),
        "below" | "under" => Some("below"),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct ParsedMarket {
    pub market_id: String,
    pub oracle_symbol: String,
    pub threshold: Decimal,
    pub direction: String,
    pub parse_method: String,
}

#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    pub total: usize,
    pub matched: usize,
    pub skipped: usize,
    pub failed: usize,
    pub parsed: Vec<ParsedMarket>,
}

/// Receives successful title parses; implemented by the scanner
/// (`register_market_oracle_mapping`, spec.md §4.4).
pub trait OracleMappingSink: Send + Sync {
    fn register_market_oracle_mapping(&self, market_id: &str, oracle_symbol: &str, threshold: Decimal, direction: &str);
}

#[async_trait]
pub trait LlmMarketParser: Send + Sync {
    /// `titles` and the returned `Vec` must be the same length and aligned
    /// to input order; `None` entries mean no mapping (spec.md §4.4 step 3).
    async fn parse_batch(&self, titles: &[String]) -> Result<Vec<Option<ParsedMarket>>>;
}

/// Default fallback when no LLM is configured: every batch fails, logged
/// once per call rather than crashing (spec.md §4.4 "on any LLM error: log
/// and treat all unparsed as failed").
pub struct NullLlmParser;

#[async_trait]
impl LlmMarketParser for NullLlmParser {
    async fn parse_batch(&self, titles: &[String]) -> Result<Vec<Option<ParsedMarket>>> {
        warn!(count = titles.len(), "llm_market_parser_unavailable");
        Ok(vec![None; titles.len()])
    }
}

fn try_regex_parse(market: &Market, symbol: &'static str) -> Option<ParsedMarket> {
    let caps = THRESHOLD_RE.captures(&market.title)?;
    let direction = direction_from_word(&caps[1])?;
    let raw_threshold = caps[2].replace(',', "");
    let threshold = Decimal::from_str_exact(&raw_threshold).ok()?;
    Some(ParsedMarket {
        market_id: market.id(),
        oracle_symbol: symbol.to_string(),
        threshold,
        direction: direction.to_string(),
        parse_method: "regex".to_string(),
    })
}

/// Runs the full matching pass (spec.md §4.4 algorithm) and registers every
/// successful parse with `sink`.
pub async fn match_markets(
    markets: &[Market],
    sink: &dyn OracleMappingSink,
    llm: &dyn LlmMarketParser,
) -> Result<MatchResult> {
    let mut result = MatchResult { total: markets.len(), ..Default::default() };

    let mut llm_candidates: Vec<&Market> = Vec::new();

    for market in markets {
        let symbol = match is_crypto_market(&market.title) {
            Some(s) => s,
            None => {
                result.skipped += 1;
                continue;
            }
        };

        match try_regex_parse(market, symbol) {
            Some(parsed) => {
                sink.register_market_oracle_mapping(&parsed.market_id, &parsed.oracle_symbol, parsed.threshold, &parsed.direction);
                result.matched += 1;
                result.parsed.push(parsed);
            }
            None => llm_candidates.push(market),
        }
    }

    if !llm_candidates.is_empty() {
        let titles: Vec<String> = llm_candidates.iter().map(|m| m.title.clone()).collect();
        match llm.parse_batch(&titles).await {
            Ok(parses) => {
                for (market, parsed) in llm_candidates.iter().zip(parses.into_iter()) {
                    match parsed {
                        Some(mut p) => {
                            p.market_id = market.id();
                            p.parse_method = "llm".to_string();
                            sink.register_market_oracle_mapping(&p.market_id, &p.oracle_symbol, p.threshold, &p.direction);
                            result.matched += 1;
                            result.parsed.push(p);
                        }
                        None => result.failed += 1,
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "llm_market_parser_batch_failed");
                result.failed += llm_candidates.len();
            }
        }
    }

    Ok(result)
}

/// Drives `match_markets` on an interval across every configured venue
/// (spec.md §4.4), publishing once to `sink` (the scanner) per successful
/// parse. Polling cadence mirrors `ingest::VenueWatcher`'s `due()` gate.
pub struct MatcherAgent<S: OracleMappingSink + Send + Sync> {
    venues: Vec<Arc<dyn VenueAdapter>>,
    sink: Arc<S>,
    llm: Arc<dyn LlmMarketParser>,
    interval: Duration,
    last_poll: Mutex<Instant>,
}

impl<S: OracleMappingSink + Send + Sync> MatcherAgent<S> {
    pub fn new(venues: Vec<Arc<dyn VenueAdapter>>, sink: Arc<S>, llm: Arc<dyn LlmMarketParser>, interval: Duration) -> Self {
        MatcherAgent { venues, sink, llm, interval, last_poll: Mutex::new(Instant::now() - interval) }
    }

    fn due(&self) -> bool {
        let mut last = self.last_poll.lock();
        if last.elapsed() >= self.interval {
            *last = Instant::now();
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl<S: OracleMappingSink + Send + Sync + 'static> Agent for MatcherAgent<S> {
    fn name(&self) -> &str {
        "market-matcher"
    }

    fn subscriptions(&self) -> Vec<String> {
        Vec::new()
    }

    async fn handle(&self, _channel: &str, _record: BusRecord, _bus: &dyn Bus) -> Result<()> {
        Ok(())
    }

    async fn tick(&self, _bus: &dyn Bus) -> Result<()> {
        if !self.due() {
            return Ok(());
        }
        for venue in &self.venues {
            let markets = match venue.get_markets().await {
                Ok(m) => m,
                Err(e) => {
                    warn!(venue = venue.venue(), error = %e, "matcher_get_markets_failed");
                    continue;
                }
            };
            match match_markets(&markets, self.sink.as_ref(), self.llm.as_ref()).await {
                Ok(result) => info!(venue = venue.venue(), matched = result.matched, skipped = result.skipped, failed = result.failed, "market_matching_pass"),
                Err(e) => warn!(venue = venue.venue(), error = %e, "market_matching_failed"),
            }
        }
        Ok(())
    }
}
