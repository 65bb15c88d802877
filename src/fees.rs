//! Per-venue fee estimation (spec.md §4.5 net-edge filtering).
//!
//! Grounded on `arbitrage/fees.rs::FeeCalculator` in the teacher: a flat-rate
//! table keyed by venue name with a conservative fallback for unknown venues.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Flat-rate fee estimate for taking liquidity on `venue`, expressed as the
/// same edge units as `gross_edge` (spec.md §4.5: `net_edge = gross_edge -
/// fee_estimate(venue)`).
pub fn fee_estimate(venue: &str) -> Decimal {
    match venue {
        "polymarket" => dec!(0.02),
        "kalshi" => dec!(0.01),
        _ => dec!(0.03),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_venues_have_distinct_rates() {
        assert_eq!(fee_estimate("polymarket"), dec!(0.02));
        assert_eq!(fee_estimate("kalshi"), dec!(0.01));
    }

    #[test]
    fn unknown_venue_uses_conservative_default() {
        assert_eq!(fee_estimate("unknown-venue"), dec!(0.03));
    }
}
