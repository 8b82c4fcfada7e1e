use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Fee schedule for an instrument: `flat + per_lot * size + pct% * notional`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub flat: Decimal,
    pub per_lot: Decimal,
    /// Percentage of notional (2.0 means 2%).
    pub pct: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            flat: Decimal::ZERO,
            per_lot: Decimal::ZERO,
            pct: Decimal::ZERO,
        }
    }
}

impl FeeSchedule {
    pub fn total(&self, size: Decimal, price: Decimal) -> Decimal {
        let notional = size * price;
        self.flat + self.per_lot * size + self.pct / Decimal::from(100u32) * notional
    }
}

/// Size constraints imposed by the venue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DealingRules {
    pub min_size: Decimal,
    pub max_size: Decimal,
    pub size_step: Decimal,
}

impl Default for DealingRules {
    fn default() -> Self {
        Self {
            min_size: Decimal::new(1, 2),   // 0.01
            max_size: Decimal::from(1000u32),
            size_step: Decimal::new(1, 2),  // 0.01
        }
    }
}

/// Static execution-cost configuration for one instrument.
///
/// `half_spread` and `slippage` are in price units and applied per side:
/// buys fill above the bar close, sells below it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub half_spread: Decimal,
    pub slippage: Decimal,
    #[serde(default)]
    pub fees: FeeSchedule,
    #[serde(default)]
    pub dealing: DealingRules,
}

impl Default for InstrumentSpec {
    fn default() -> Self {
        Self {
            half_spread: Decimal::new(1, 4), // 0.0001
            slippage: Decimal::new(1, 4),    // 0.0001
            fees: FeeSchedule::default(),
            dealing: DealingRules::default(),
        }
    }
}
