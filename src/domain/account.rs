use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::domain::position::Position;

/// Snapshot of account state fed to the risk engine.
///
/// The snapshot carries its own `refreshed_at`; the router refuses to risk
/// check against a snapshot older than the configured TTL and refreshes
/// from the broker first.
#[derive(Clone, Debug)]
pub struct AccountState {
    pub balance: Decimal,
    /// Realized P&L since UTC midnight. Negative when losing.
    pub realized_pnl_today: Decimal,
    pub open_positions: Vec<Position>,
    /// Fill timestamps used for the trailing-hour trade rate limit.
    pub recent_trades: Vec<DateTime<Utc>>,
    /// Last known price per symbol, used for exposure estimates.
    pub marks: HashMap<String, Decimal>,
    pub refreshed_at: DateTime<Utc>,
}

impl AccountState {
    pub fn open_position_count(&self) -> usize {
        self.open_positions.len()
    }

    /// Notional exposure currently held in `symbol`.
    pub fn symbol_exposure(&self, symbol: &str) -> Decimal {
        self.open_positions
            .iter()
            .filter(|p| p.symbol == symbol)
            .map(|p| p.notional())
            .sum()
    }

    /// Last mark for `symbol`; falls back to 1 so exposure checks degrade
    /// to size-based caps when no price has been seen yet.
    pub fn mark(&self, symbol: &str) -> Decimal {
        self.marks.get(symbol).copied().unwrap_or(Decimal::ONE)
    }

    pub fn trades_in_last_hour(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::hours(1);
        self.recent_trades.iter().filter(|ts| **ts > cutoff).count()
    }

    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.refreshed_at > ttl
    }
}
