//! Portfolio accounting for backtests.
//!
//! Tracks cash, open positions, realized/unrealized P&L and the equity
//! curve, all in exact decimal arithmetic so thousands of simulated fills
//! cannot accumulate rounding drift.
//!
//! Invariant: equity = cash + sum(unrealized P&L).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{Position, Side};

/// Single point on the equity curve. The curve itself is append-only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub ts: DateTime<Utc>,
    pub equity: Decimal,
    pub cash: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub drawdown: Decimal,
    pub drawdown_pct: Decimal,
    pub high_water_mark: Decimal,
}

/// A completed round trip (entry + exit).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: Uuid,
    pub symbol: String,
    pub strategy_id: String,
    pub side: Side,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub size: Decimal,
    pub pnl: Decimal,
    pub pnl_pct: Decimal,
    pub mae: Decimal,
    pub mfe: Decimal,
    pub bars_held: u32,
    /// "signal", "stop_loss", "take_profit"
    pub exit_reason: String,
}

pub struct Portfolio {
    pub initial_cash: Decimal,
    pub cash: Decimal,
    /// Keyed by "symbol:strategy" so independent strategies never share a
    /// position slot.
    positions: HashMap<String, Position>,
    pub closed_trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
    pub realized_pnl: Decimal,
    pub high_water_mark: Decimal,
    marks: HashMap<String, Decimal>,
}

fn key(symbol: &str, strategy_id: &str) -> String {
    format!("{}:{}", symbol, strategy_id)
}

impl Portfolio {
    pub fn new(initial_cash: Decimal) -> Self {
        Self {
            initial_cash,
            cash: initial_cash,
            positions: HashMap::new(),
            closed_trades: Vec::new(),
            equity_curve: Vec::new(),
            realized_pnl: Decimal::ZERO,
            high_water_mark: initial_cash,
            marks: HashMap::new(),
        }
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions.values().map(|p| p.unrealized_pnl).sum()
    }

    pub fn equity(&self) -> Decimal {
        self.cash + self.unrealized_pnl()
    }

    pub fn drawdown(&self) -> Decimal {
        (self.high_water_mark - self.equity()).max(Decimal::ZERO)
    }

    pub fn drawdown_pct(&self) -> Decimal {
        if self.high_water_mark <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.drawdown() / self.high_water_mark
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn position(&self, symbol: &str, strategy_id: &str) -> Option<&Position> {
        self.positions.get(&key(symbol, strategy_id))
    }

    pub fn open_positions(&self) -> Vec<Position> {
        let mut all: Vec<Position> = self.positions.values().cloned().collect();
        all.sort_by(|a, b| a.position_id.cmp(&b.position_id));
        all
    }

    pub fn symbol_exposure(&self, symbol: &str) -> Decimal {
        self.positions
            .values()
            .filter(|p| p.symbol == symbol)
            .map(|p| p.size * self.marks.get(symbol).copied().unwrap_or(p.entry_price))
            .sum()
    }

    /// Update marks and recompute unrealized P&L; advances the high-water
    /// mark when equity makes a new high.
    pub fn update_marks(&mut self, prices: &HashMap<String, Decimal>) {
        for (symbol, price) in prices {
            self.marks.insert(symbol.clone(), *price);
        }
        for position in self.positions.values_mut() {
            if let Some(price) = prices.get(&position.symbol) {
                position.update_unrealized(*price);
            }
        }
        let equity = self.equity();
        if equity > self.high_water_mark {
            self.high_water_mark = equity;
        }
    }

    pub fn open_position(&mut self, position: Position) {
        debug!(
            "[PORTFOLIO] opened {:?} {} ({}) {} @ {}",
            position.side, position.symbol, position.strategy_id, position.size, position.entry_price
        );
        let k = key(&position.symbol, &position.strategy_id);
        self.positions.insert(k, position);
    }

    /// Close a position and realize its P&L. Returns the trade record, or
    /// None when there is nothing to close.
    #[allow(clippy::too_many_arguments)]
    pub fn close_position(
        &mut self,
        symbol: &str,
        strategy_id: &str,
        exit_price: Decimal,
        exit_time: DateTime<Utc>,
        exit_reason: &str,
        fees: Decimal,
        trade_id: Uuid,
    ) -> Option<TradeRecord> {
        let k = key(symbol, strategy_id);
        let position = match self.positions.remove(&k) {
            Some(p) => p,
            None => {
                warn!("[PORTFOLIO] no position to close for {}", k);
                return None;
            }
        };

        let pnl = position.realized_pnl(exit_price, fees);
        let basis = position.entry_price * position.size;
        let pnl_pct = if basis > Decimal::ZERO {
            pnl / basis
        } else {
            Decimal::ZERO
        };

        let trade = TradeRecord {
            trade_id,
            symbol: symbol.to_string(),
            strategy_id: strategy_id.to_string(),
            side: position.side,
            entry_time: position.entry_time,
            exit_time,
            entry_price: position.entry_price,
            exit_price,
            size: position.size,
            pnl,
            pnl_pct,
            mae: position.mae,
            mfe: position.mfe,
            bars_held: position.bars_held,
            exit_reason: exit_reason.to_string(),
        };

        self.cash += pnl;
        self.realized_pnl += pnl;
        self.closed_trades.push(trade.clone());

        debug!(
            "[PORTFOLIO] closed {:?} {} ({}): pnl={}",
            trade.side, symbol, strategy_id, pnl
        );

        Some(trade)
    }

    pub fn record_equity_point(&mut self, ts: DateTime<Utc>) -> EquityPoint {
        let point = EquityPoint {
            ts,
            equity: self.equity(),
            cash: self.cash,
            unrealized_pnl: self.unrealized_pnl(),
            realized_pnl: self.realized_pnl,
            drawdown: self.drawdown(),
            drawdown_pct: self.drawdown_pct(),
            high_water_mark: self.high_water_mark,
        };
        self.equity_curve.push(point.clone());
        point
    }

    pub fn increment_bars_held(&mut self, symbol: &str) {
        for position in self.positions.values_mut() {
            if position.symbol == symbol {
                position.bars_held += 1;
            }
        }
    }

    /// Positions whose stop-loss or take-profit level is crossed by the
    /// given price. Returns (symbol, strategy, position_id, reason).
    pub fn exits_triggered(
        &self,
        symbol: &str,
        price: Decimal,
    ) -> Vec<(String, String, String, &'static str)> {
        let mut triggered: Vec<(String, String, String, &'static str)> = self
            .positions
            .values()
            .filter(|p| p.symbol == symbol)
            .filter_map(|p| {
                if p.stop_loss_hit(price) {
                    Some((
                        p.symbol.clone(),
                        p.strategy_id.clone(),
                        p.position_id.clone(),
                        "stop_loss",
                    ))
                } else if p.take_profit_hit(price) {
                    Some((
                        p.symbol.clone(),
                        p.strategy_id.clone(),
                        p.position_id.clone(),
                        "take_profit",
                    ))
                } else {
                    None
                }
            })
            .collect();
        triggered.sort_by(|a, b| a.2.cmp(&b.2));
        triggered
    }
}
