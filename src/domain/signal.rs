use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What a strategy wants to do on the current bar.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
    Hold,
}

/// Per-bar output of a strategy.
///
/// Ephemeral: a signal lives for exactly one bar. It carries no broker
/// fields; sizing and routing happen downstream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalIntent {
    pub direction: Direction,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub reason_codes: Vec<String>,
}

impl SignalIntent {
    pub fn hold(reason: &str) -> Self {
        Self {
            direction: Direction::Hold,
            stop_loss: None,
            take_profit: None,
            reason_codes: vec![reason.to_string()],
        }
    }

    pub fn entry(
        direction: Direction,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        reason: &str,
    ) -> Self {
        Self {
            direction,
            stop_loss,
            take_profit,
            reason_codes: vec![reason.to_string()],
        }
    }

    pub fn is_hold(&self) -> bool {
        self.direction == Direction::Hold
    }
}
