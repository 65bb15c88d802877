use rust_decimal::Decimal;

use crate::models::OrderBookLevel;

/// Volume-weighted average price for filling `amount` by walking `levels`
/// in order (spec.md §8 invariant 7). Returns `None` when the book has
/// insufficient total size to fill `amount` (spec.md §4.7 rule 8).
pub fn vwap_for_size(levels: &[OrderBookLevel], amount: Decimal) -> Option<Decimal> {
    if amount <= Decimal::ZERO {
        return None;
    }
    let total_size: Decimal = levels.iter().map(|l| l.size).sum();
    if amount > total_size {
        return None;
    }

    let mut remaining = amount;
    let mut notional = Decimal::ZERO;
    for level in levels {
        if remaining <= Decimal::ZERO {
            break;
        }
        let filled = remaining.min(level.size);
        notional += level.price * filled;
        remaining -= filled;
    }
    Some(notional / amount)
}
