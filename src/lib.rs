//! tradedesk - bar-driven algorithmic trading core
//!
//! One substrate, two modes: deterministic backtesting against simulated
//! fills, and live/paper trading against a broker adapter. Strategy code
//! and the execution router never know which mode they run in; only the
//! broker adapter differs.

pub mod backtest;
pub mod broker;
pub mod bus;
pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod events;
pub mod services;
pub mod strategy;

// Re-export commonly used types
pub use bus::EventBus;
pub use config::AppConfig;
pub use events::{DriftEvent, DriftKind, Event, StatusSnapshot};

#[cfg(test)]
mod config_tests;
