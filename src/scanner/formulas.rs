//! Pure scoring functions for the opportunity scanner (spec.md §4.5).
//!
//! Kept free of bus/state concerns and unit-tested per scenario, following
//! `arbitrage/engine.rs::calculate_confidence`'s shape in the teacher: small
//! deterministic functions, each independently verifiable.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Single-condition mispricing check (spec.md §4.5 step 2).
/// Returns `(edge, signal)` when `edge > 0` and both thresholds pass.
pub fn single_condition_mispricing(
    yes_price: Decimal,
    no_price: Decimal,
    min_edge_pct: Decimal,
    min_signal_strength: f64,
) -> Option<(Decimal, f64)> {
    let edge = Decimal::ONE - (yes_price + no_price);
    if edge <= Decimal::ZERO || edge < min_edge_pct {
        return None;
    }
    let signal = (edge * dec!(5)).min(Decimal::ONE);
    let signal_f64 = decimal_to_f64(signal);
    if signal_f64 < min_signal_strength {
        return None;
    }
    Some((edge, signal_f64))
}

/// `arbitrage_edge = max(0, 1 - price_sum)` (spec.md §3/§4.5 multi-outcome).
pub fn multi_outcome_edge(price_sum: Decimal) -> Decimal {
    (Decimal::ONE - price_sum).max(Decimal::ZERO)
}

/// Oracle-lag fair-value ramp (spec.md §4.5).
/// `direction` is `"above"` or `"below"`. Returns `(fair_yes, signal)`.
pub fn fair_value(oracle_value: Decimal, threshold: Decimal, direction: &str) -> (Decimal, f64) {
    if threshold.is_zero() {
        return (dec!(0.5), 0.0);
    }
    let d = ((oracle_value - threshold) / threshold).abs();
    let condition_met = match direction {
        "above" => oracle_value > threshold,
        "below" => oracle_value < threshold,
        _ => false,
    };

    let fair_yes = if condition_met && d > dec!(0.05) {
        dec!(0.95)
    } else if condition_met {
        dec!(0.5) + d * dec!(10)
    } else if d > dec!(0.05) {
        dec!(0.05)
    } else {
        dec!(0.5) - d * dec!(10)
    };

    let signal = decimal_to_f64((d * dec!(10)).min(Decimal::ONE));
    (fair_yes, signal)
}

/// Oracle-lag check (spec.md §4.5 step 3): `edge = fair_yes - current_yes`.
pub fn oracle_lag_edge(
    current_yes: Decimal,
    fair_yes: Decimal,
    signal: f64,
    min_edge_pct: Decimal,
    min_signal_strength: f64,
) -> Option<Decimal> {
    let edge = fair_yes - current_yes;
    if edge.abs() < min_edge_pct || signal < min_signal_strength {
        return None;
    }
    Some(edge)
}

/// Cross-platform check (spec.md §4.5 step 4) across YES prices quoted by
/// different venues for the same event. Returns
/// `(edge, buy_yes_venue, buy_no_venue)`: buy YES where it's cheapest, buy NO
/// (equivalently, sell YES) where YES is most expensive.
pub fn cross_platform_edge<'a>(
    prices: &[(&'a str, Decimal)],
    min_edge_pct: Decimal,
    min_signal_strength: f64,
) -> Option<(Decimal, &'a str, &'a str)> {
    if prices.len() < 2 {
        return None;
    }
    let min = prices.iter().min_by_key(|(_, p)| *p)?;
    let max = prices.iter().max_by_key(|(_, p)| *p)?;
    let edge = max.1 - min.1;
    if edge < min_edge_pct {
        return None;
    }
    let signal = decimal_to_f64((edge * dec!(5)).min(Decimal::ONE));
    if signal < min_signal_strength {
        return None;
    }
    Some((edge, min.0, max.0))
}

fn decimal_to_f64(d: Decimal) -> f64 {
    d.to_string().parse().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_single_condition_mispricing() {
        let (edge, signal) = single_condition_mispricing(dec!(0.40), dec!(0.50), dec!(0.01), 0.01).unwrap();
        assert_eq!(edge, dec!(0.10));
        assert!(signal > 0.0);
    }

    #[test]
    fn yes_plus_no_exactly_one_emits_nothing() {
        assert!(single_condition_mispricing(dec!(0.5), dec!(0.5), dec!(0.01), 0.01).is_none());
    }

    #[test]
    fn s2_multi_outcome_edge() {
        let sum = dec!(0.30) + dec!(0.28) + dec!(0.30);
        assert_eq!(multi_outcome_edge(sum), dec!(0.12));
    }

    #[test]
    fn s3_oracle_lag_high_confidence() {
        // d = 6000/100000 = 0.06, strictly above the 0.05 ramp boundary.
        let (fair_yes, signal) = fair_value(dec!(106000), dec!(100000), "above");
        assert_eq!(fair_yes, dec!(0.95));
        assert_eq!(signal, 1.0);
        let edge = oracle_lag_edge(dec!(0.50), fair_yes, signal, dec!(0.01), 0.01).unwrap();
        assert!(edge > dec!(0.40));
    }

    #[test]
    fn d_exactly_at_five_percent_boundary_uses_ramp_not_high_confidence() {
        // spec.md: `d > 0.05` -> 0.95; `d <= 0.05` -> ramp. d == 0.05 is the
        // ramp branch, not the high-confidence cap.
        let (fair_yes, _signal) = fair_value(dec!(105000), dec!(100000), "above");
        assert_eq!(fair_yes, dec!(0.5) + dec!(0.05) * dec!(10));
    }

    #[test]
    fn oracle_value_exactly_at_threshold_is_uncertain() {
        let (fair_yes, signal) = fair_value(dec!(100000), dec!(100000), "above");
        assert_eq!(fair_yes, dec!(0.5));
        assert_eq!(signal, 0.0);
    }

    #[test]
    fn s4_cross_platform_edge() {
        let prices = [("kalshi", dec!(0.52)), ("polymarket", dec!(0.60))];
        let (edge, buy_yes, buy_no) = cross_platform_edge(&prices, dec!(0.01), 0.01).unwrap();
        assert_eq!(edge, dec!(0.08));
        assert_eq!(buy_yes, "kalshi");
        assert_eq!(buy_no, "polymarket");
    }

    #[test]
    fn ramp_below_five_percent_distance() {
        // threshold=100000, oracle=102000 -> d=0.02 (<=0.05), condition met (above)
        let (fair_yes, _signal) = fair_value(dec!(102000), dec!(100000), "above");
        assert_eq!(fair_yes, dec!(0.5) + dec!(0.02) * dec!(10));
    }
}
