use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::order::Side;

/// An open holding in one instrument.
///
/// In live mode the broker-reported position is authoritative: the local
/// store is reconciled *to* it, never the reverse. In backtests the
/// portfolio owns the truth.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Broker deal id in live mode, engine-assigned id in backtests.
    pub position_id: String,
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub unrealized_pnl: Decimal,
    pub strategy_id: String,
    /// Maximum adverse excursion over the holding period.
    pub mae: Decimal,
    /// Maximum favorable excursion over the holding period.
    pub mfe: Decimal,
    pub bars_held: u32,
    /// Order that opened this position; absent for positions discovered at
    /// the broker (opened externally).
    pub source_order_id: Option<Uuid>,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        position_id: &str,
        symbol: &str,
        side: Side,
        size: Decimal,
        entry_price: Decimal,
        entry_time: DateTime<Utc>,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        strategy_id: &str,
    ) -> Self {
        Self {
            position_id: position_id.to_string(),
            symbol: symbol.to_string(),
            side,
            size,
            entry_price,
            entry_time,
            stop_loss,
            take_profit,
            unrealized_pnl: Decimal::ZERO,
            strategy_id: strategy_id.to_string(),
            mae: Decimal::ZERO,
            mfe: Decimal::ZERO,
            bars_held: 0,
            source_order_id: None,
        }
    }

    pub fn is_long(&self) -> bool {
        self.side == Side::Buy
    }

    pub fn is_short(&self) -> bool {
        self.side == Side::Sell
    }

    pub fn notional(&self) -> Decimal {
        self.size * self.entry_price
    }

    /// Recompute unrealized P&L at the given mark and track MAE/MFE.
    pub fn update_unrealized(&mut self, mark: Decimal) -> Decimal {
        self.unrealized_pnl = if self.is_long() {
            (mark - self.entry_price) * self.size
        } else {
            (self.entry_price - mark) * self.size
        };
        if self.unrealized_pnl < self.mae {
            self.mae = self.unrealized_pnl;
        }
        if self.unrealized_pnl > self.mfe {
            self.mfe = self.unrealized_pnl;
        }
        self.unrealized_pnl
    }

    pub fn stop_loss_hit(&self, price: Decimal) -> bool {
        match self.stop_loss {
            None => false,
            Some(sl) => {
                if self.is_long() {
                    price <= sl
                } else {
                    price >= sl
                }
            }
        }
    }

    pub fn take_profit_hit(&self, price: Decimal) -> bool {
        match self.take_profit {
            None => false,
            Some(tp) => {
                if self.is_long() {
                    price >= tp
                } else {
                    price <= tp
                }
            }
        }
    }

    /// Realized P&L if closed at `exit_price`, after `fees`.
    pub fn realized_pnl(&self, exit_price: Decimal, fees: Decimal) -> Decimal {
        let gross = if self.is_long() {
            (exit_price - self.entry_price) * self.size
        } else {
            (self.entry_price - exit_price) * self.size
        };
        gross - fees
    }
}
