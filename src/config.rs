use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

use crate::domain::instrument::{DealingRules, FeeSchedule, InstrumentSpec};

/// Hard limits enforced by the risk engine, applied identically in
/// backtest and live mode.
#[derive(Clone, Debug, Deserialize)]
pub struct RiskLimits {
    pub require_stop_loss: bool,
    pub max_position_size: Decimal,
    pub max_concurrent_positions: usize,
    /// Daily realized loss as a percentage of balance (2.0 means 2%).
    pub max_daily_loss_pct: Decimal,
    pub max_trades_per_hour: usize,
    pub per_symbol_exposure_cap: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            require_stop_loss: true,
            max_position_size: Decimal::from(5u32),
            max_concurrent_positions: 5,
            max_daily_loss_pct: Decimal::from(2u32),
            max_trades_per_hour: 20,
            per_symbol_exposure_cap: Decimal::from(100_000u32),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExecutionSettings {
    pub require_arm_confirmation: bool,
    pub close_on_kill_switch: bool,
    pub reconcile_interval_secs: u64,
    pub submit_timeout_ms: u64,
    /// Account snapshots older than this are refreshed before risk checks.
    pub balance_ttl_secs: i64,
    /// Window inside which a repeated intent_id is rejected as a duplicate.
    pub dedup_window_secs: i64,
    /// Consecutive broker errors that trip the kill switch.
    pub broker_error_threshold: u32,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            require_arm_confirmation: true,
            close_on_kill_switch: false,
            reconcile_interval_secs: 5,
            submit_timeout_ms: 5000,
            balance_ttl_secs: 300,
            dedup_window_secs: 60,
            broker_error_threshold: 5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMethod {
    FixedSize,
    RiskPerTrade,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SizingSettings {
    pub method: SizingMethod,
    pub fixed_size: Decimal,
    /// Risk per trade as % of equity (0.5 means 0.5%).
    pub risk_per_trade_pct: Decimal,
}

impl Default for SizingSettings {
    fn default() -> Self {
        Self {
            method: SizingMethod::FixedSize,
            fixed_size: Decimal::ONE,
            risk_per_trade_pct: Decimal::new(5, 1), // 0.5
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct BacktestSettings {
    pub initial_cash: Decimal,
    pub warmup_bars: usize,
    pub seed: u64,
    /// Extra per-fill slippage drawn uniformly from [-jitter, +jitter],
    /// derived from the run seed. Zero disables it.
    #[serde(default)]
    pub slippage_jitter: Decimal,
    pub artefacts_dir: Option<String>,
    /// JSON file of bars for the bundled backtest runner.
    #[serde(default)]
    pub bars_file: Option<String>,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            initial_cash: Decimal::from(10_000u32),
            warmup_bars: 100,
            seed: 42,
            slippage_jitter: Decimal::ZERO,
            artefacts_dir: None,
            bars_file: None,
        }
    }
}

/// Per-instrument overrides; anything omitted falls back to `defaults`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct InstrumentOverride {
    pub half_spread: Option<Decimal>,
    pub slippage: Option<Decimal>,
    pub fees: Option<FeeSchedule>,
    pub dealing: Option<DealingRules>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub mode: String, // "backtest" | "paper"
    pub symbols: Vec<String>,
    pub timeframe: String,

    #[serde(default)]
    pub risk: RiskLimits,
    #[serde(default)]
    pub execution: ExecutionSettings,
    #[serde(default)]
    pub sizing: SizingSettings,
    #[serde(default)]
    pub backtest: BacktestSettings,

    #[serde(default)]
    pub defaults: Option<InstrumentSpec>,
    #[serde(default)]
    pub instruments: HashMap<String, InstrumentOverride>,
}

impl AppConfig {
    pub fn load() -> Self {
        let config_path = "config.yaml";
        let content = fs::read_to_string(config_path).expect("Failed to read config.yaml");

        // Strip BOM if present
        let content = content.strip_prefix("\u{feff}").unwrap_or(&content);

        let config: AppConfig = serde_yaml::from_str(content).expect("Failed to parse config.yaml");
        config
    }

    /// Effective instrument spec for a symbol: defaults overlaid with any
    /// per-symbol override.
    pub fn instrument_spec(&self, symbol: &str) -> InstrumentSpec {
        let mut spec = self.defaults.clone().unwrap_or_default();
        if let Some(ov) = self.instruments.get(symbol) {
            if let Some(v) = ov.half_spread {
                spec.half_spread = v;
            }
            if let Some(v) = ov.slippage {
                spec.slippage = v;
            }
            if let Some(v) = &ov.fees {
                spec.fees = v.clone();
            }
            if let Some(v) = &ov.dealing {
                spec.dealing = v.clone();
            }
        }
        spec
    }

    /// Instrument spec table for every configured symbol.
    pub fn instrument_table(&self) -> HashMap<String, InstrumentSpec> {
        self.symbols
            .iter()
            .map(|s| (s.clone(), self.instrument_spec(s)))
            .collect()
    }
}
