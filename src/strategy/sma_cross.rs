use rust_decimal::Decimal;

use crate::domain::{Bar, Direction, Position, SignalIntent};
use crate::error::StrategyError;
use crate::strategy::Strategy;

/// Moving-average crossover, the reference strategy used for wiring and
/// tests. Long when the fast SMA crosses above the slow one, exit on the
/// cross back down. Stop loss and take profit are percentage offsets from
/// the signal bar close.
pub struct SmaCross {
    id: String,
    fast: usize,
    slow: usize,
    stop_loss_pct: Decimal,
    take_profit_pct: Decimal,
}

impl SmaCross {
    pub fn new(fast: usize, slow: usize, stop_loss_pct: Decimal, take_profit_pct: Decimal) -> Self {
        Self {
            id: format!("sma_cross_{}_{}", fast, slow),
            fast,
            slow,
            stop_loss_pct,
            take_profit_pct,
        }
    }

    fn sma(bars: &[Bar], period: usize) -> Decimal {
        let window = &bars[bars.len() - period..];
        let sum: Decimal = window.iter().map(|b| b.close).sum();
        sum / Decimal::from(period as u64)
    }
}

impl Strategy for SmaCross {
    fn id(&self) -> &str {
        &self.id
    }

    fn warmup_bars(&self) -> usize {
        self.slow + 1
    }

    fn generate_signal(
        &self,
        bars: &[Bar],
        current_position: Option<&Position>,
    ) -> Result<SignalIntent, StrategyError> {
        let need = self.slow + 1;
        if bars.len() < need {
            return Err(StrategyError::InsufficientData {
                have: bars.len(),
                need,
            });
        }

        let prev = &bars[..bars.len() - 1];
        let fast_now = Self::sma(bars, self.fast);
        let slow_now = Self::sma(bars, self.slow);
        let fast_prev = Self::sma(prev, self.fast);
        let slow_prev = Self::sma(prev, self.slow);

        let crossed_up = fast_prev <= slow_prev && fast_now > slow_now;
        let crossed_down = fast_prev >= slow_prev && fast_now < slow_now;

        let close = bars[bars.len() - 1].close;
        let pct = Decimal::from(100u32);

        if crossed_up && current_position.is_none() {
            let sl = close * (Decimal::ONE - self.stop_loss_pct / pct);
            let tp = close * (Decimal::ONE + self.take_profit_pct / pct);
            return Ok(SignalIntent::entry(
                Direction::Buy,
                Some(sl),
                Some(tp),
                "sma_cross_up",
            ));
        }

        if crossed_down && current_position.is_some() {
            return Ok(SignalIntent::entry(
                Direction::Sell,
                None,
                None,
                "sma_cross_down",
            ));
        }

        Ok(SignalIntent::hold("no_cross"))
    }
}
