//! Position sizing: fixed size or risk-per-trade from stop distance.

use rust_decimal::Decimal;
use tracing::debug;

use crate::config::{SizingMethod, SizingSettings};
use crate::domain::{DealingRules, SignalIntent};

#[derive(Clone, Debug, PartialEq)]
pub struct SizeResult {
    pub size: Decimal,
    pub method_used: SizingMethod,
    pub risk_amount: Decimal,
    pub stop_distance: Decimal,
    pub rejection_reason: Option<String>,
}

impl SizeResult {
    pub fn is_valid(&self) -> bool {
        self.rejection_reason.is_none() && self.size > Decimal::ZERO
    }
}

fn round_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    (value / step).round() * step
}

/// Size a signal at the current price.
///
/// `risk_per_trade`: size = (equity * risk_pct) / stop_distance, so a stop
/// hit loses exactly the configured fraction of equity. Falls back to the
/// fixed size when the signal has no stop.
pub fn position_size(
    signal: &SignalIntent,
    equity: Decimal,
    current_price: Decimal,
    settings: &SizingSettings,
    dealing: &DealingRules,
) -> SizeResult {
    if settings.method == SizingMethod::FixedSize {
        let size = round_to_step(settings.fixed_size, dealing.size_step).max(dealing.min_size);
        return SizeResult {
            size,
            method_used: SizingMethod::FixedSize,
            risk_amount: Decimal::ZERO,
            stop_distance: Decimal::ZERO,
            rejection_reason: None,
        };
    }

    let stop_loss = match signal.stop_loss {
        Some(sl) => sl,
        None => {
            debug!("[SIZING] no stop loss in signal, falling back to fixed size");
            let size =
                round_to_step(settings.fixed_size, dealing.size_step).max(dealing.min_size);
            return SizeResult {
                size,
                method_used: SizingMethod::FixedSize,
                risk_amount: Decimal::ZERO,
                stop_distance: Decimal::ZERO,
                rejection_reason: None,
            };
        }
    };

    let stop_distance = (current_price - stop_loss).abs();
    if stop_distance <= Decimal::ZERO {
        return SizeResult {
            size: Decimal::ZERO,
            method_used: SizingMethod::RiskPerTrade,
            risk_amount: Decimal::ZERO,
            stop_distance,
            rejection_reason: Some("stop loss distance is zero".to_string()),
        };
    }

    let risk_amount = equity * settings.risk_per_trade_pct / Decimal::from(100u32);
    let size = round_to_step(risk_amount / stop_distance, dealing.size_step)
        .max(dealing.min_size);

    SizeResult {
        size,
        method_used: SizingMethod::RiskPerTrade,
        risk_amount,
        stop_distance,
        rejection_reason: None,
    }
}
