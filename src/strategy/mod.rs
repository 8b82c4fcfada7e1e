pub mod sma_cross;

pub use sma_cross::SmaCross;

use crate::domain::{Bar, Position, SignalIntent};
use crate::error::StrategyError;

/// The single capability every strategy implements.
///
/// Strategies are stateless functions of past-and-current bars: the engine
/// hands over `bars[..=current]` and never exposes a later index, which is
/// what makes backtests reproducible and live/backtest parity possible.
pub trait Strategy: Send + Sync {
    /// Identifier used for attribution in orders, fills, and artefacts.
    fn id(&self) -> &str;

    /// Bars required before the strategy may emit a non-hold signal.
    fn warmup_bars(&self) -> usize {
        100
    }

    fn generate_signal(
        &self,
        bars: &[Bar],
        current_position: Option<&Position>,
    ) -> Result<SignalIntent, StrategyError>;
}
