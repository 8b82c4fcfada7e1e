pub mod artifacts;
pub mod engine;
pub mod metrics;
pub mod portfolio;
pub mod sizing;

pub use engine::{BacktestEngine, BacktestRequest, BacktestResult};
pub use metrics::MetricsSummary;
pub use portfolio::{EquityPoint, Portfolio, TradeRecord};

#[cfg(test)]
mod portfolio_tests;
