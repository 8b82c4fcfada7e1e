use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A confirmed (or simulated) execution against an order.
///
/// Fills are immutable facts: they are appended to the ledger and never
/// mutated. An order may accumulate several fills (partial closes).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: Uuid,
    pub symbol: String,
    pub ts: DateTime<Utc>,
    pub price: Decimal,
    pub size: Decimal,
    /// True when this fill closes (part of) an existing position.
    pub is_close: bool,
    /// Realized P&L, present on closing fills.
    pub pnl: Option<Decimal>,
    pub fees: Decimal,
    pub strategy_id: String,
}

impl Fill {
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }
}
