//! Configuration parsing tests.

#[cfg(test)]
mod config_tests {
    use rust_decimal_macros::dec;

    use crate::config::{AppConfig, SizingMethod};

    const SAMPLE: &str = r#"
mode: backtest
symbols:
  - EURUSD
  - GBPUSD
timeframe: 1m

risk:
  require_stop_loss: true
  max_position_size: 5.0
  max_concurrent_positions: 3
  max_daily_loss_pct: 2.0
  max_trades_per_hour: 10
  per_symbol_exposure_cap: 50000.0

sizing:
  method: risk_per_trade
  fixed_size: 1.0
  risk_per_trade_pct: 0.5

backtest:
  initial_cash: 10000.0
  warmup_bars: 50
  seed: 7
  artefacts_dir: data/runs

defaults:
  half_spread: 0.0001
  slippage: 0.00005

instruments:
  GBPUSD:
    half_spread: 0.0002
"#;

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(config.mode, "backtest");
        assert_eq!(config.symbols.len(), 2);
        assert!(config.risk.require_stop_loss);
        assert_eq!(config.risk.max_concurrent_positions, 3);
        assert_eq!(config.risk.max_daily_loss_pct, dec!(2.0));
        assert_eq!(config.sizing.method, SizingMethod::RiskPerTrade);
        assert_eq!(config.backtest.seed, 7);
        assert_eq!(config.backtest.initial_cash, dec!(10000));
    }

    #[test]
    fn test_execution_defaults_applied() {
        let config: AppConfig = serde_yaml::from_str(SAMPLE).unwrap();
        // Execution section omitted entirely: defaults kick in.
        assert!(config.execution.require_arm_confirmation);
        assert_eq!(config.execution.dedup_window_secs, 60);
        assert_eq!(config.execution.broker_error_threshold, 5);
    }

    #[test]
    fn test_instrument_override_overlays_defaults() {
        let config: AppConfig = serde_yaml::from_str(SAMPLE).unwrap();

        let eur = config.instrument_spec("EURUSD");
        assert_eq!(eur.half_spread, dec!(0.0001));
        assert_eq!(eur.slippage, dec!(0.00005));

        // Override changes half_spread but keeps the default slippage.
        let gbp = config.instrument_spec("GBPUSD");
        assert_eq!(gbp.half_spread, dec!(0.0002));
        assert_eq!(gbp.slippage, dec!(0.00005));
    }

    #[test]
    fn test_unknown_symbol_gets_defaults() {
        let config: AppConfig = serde_yaml::from_str(SAMPLE).unwrap();
        let spec = config.instrument_spec("USDJPY");
        assert_eq!(spec.half_spread, dec!(0.0001));
    }
}
