use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::{OpportunityType, OutcomeSide, Side};

use super::{OpportunityView, StrategyLogic, TradeParams};

/// Reference strategy (spec.md §4.6): accepts only `ORACLE_LAG`
/// opportunities, derives side from the edge's sign, and scales position
/// size by signal strength.
pub struct OracleSniper {
    pub max_position_pct: Decimal,
}

impl Default for OracleSniper {
    fn default() -> Self {
        OracleSniper { max_position_pct: dec!(10) }
    }
}

impl StrategyLogic for OracleSniper {
    fn name(&self) -> &str {
        "oracle-sniper"
    }

    fn accepts(&self, opp_type: &OpportunityType) -> bool {
        matches!(opp_type, OpportunityType::OracleLag)
    }

    fn max_position_pct(&self) -> Decimal {
        self.max_position_pct
    }

    fn evaluate(&self, opportunity: &OpportunityView, available_capital: Decimal) -> Option<TradeParams> {
        let current_yes = opportunity
            .metadata
            .get("current_yes")
            .and_then(|v| Decimal::from_str_exact(v).ok())
            .unwrap_or(dec!(0.5));

        let (outcome, max_price) = if opportunity.expected_edge > Decimal::ZERO {
            (OutcomeSide::Yes, current_yes)
        } else {
            (OutcomeSide::No, Decimal::ONE - current_yes)
        };

        let signal_weight = Decimal::from_str_exact(&opportunity.signal_strength.to_string()).unwrap_or(Decimal::ZERO);
        let size = available_capital * (self.max_position_pct / Decimal::from(100)) * signal_weight;
        if size <= Decimal::ZERO {
            return None;
        }

        Some(TradeParams { side: Side::Buy, outcome, max_price, amount: size })
    }
}
