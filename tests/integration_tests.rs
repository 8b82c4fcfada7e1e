//! Integration tests for the trading core.
//! These verify that router, risk engine, simulator, ledger, and
//! reconciliation work together the way a session would drive them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use tradedesk::backtest::{BacktestEngine, BacktestRequest};
use tradedesk::broker::{BrokerAdapter, FillModel, SimBroker};
use tradedesk::bus::EventBus;
use tradedesk::config::{
    AppConfig, BacktestSettings, ExecutionSettings, RiskLimits, SizingMethod, SizingSettings,
};
use tradedesk::data::{ExecutionLedger, MemoryBarSource};
use tradedesk::domain::{
    Bar, DealingRules, FeeSchedule, InstrumentSpec, OrderIntent, Side, Timeframe,
};
use tradedesk::services::reconciliation::{PositionStore, Reconciler};
use tradedesk::services::risk::RiskEngine;
use tradedesk::services::router::{ExecutionRouter, RouteOutcome};
use tradedesk::services::safety::SafetyContext;
use tradedesk::strategy::{SmaCross, Strategy};

fn bar(symbol: &str, minute: i64, close: Decimal) -> Bar {
    let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
    Bar {
        symbol: symbol.to_string(),
        timeframe: Timeframe::M1,
        open_ts: ts,
        open: close,
        high: close + dec!(0.0005),
        low: close - dec!(0.0005),
        close,
        volume: dec!(1000),
    }
}

fn limits() -> RiskLimits {
    RiskLimits {
        require_stop_loss: true,
        max_position_size: dec!(5),
        max_concurrent_positions: 5,
        max_daily_loss_pct: dec!(2),
        max_trades_per_hour: 100,
        per_symbol_exposure_cap: dec!(100000),
    }
}

fn instrument(half_spread: Decimal, slippage: Decimal) -> InstrumentSpec {
    InstrumentSpec {
        half_spread,
        slippage,
        fees: FeeSchedule::default(),
        dealing: DealingRules::default(),
    }
}

fn sim_broker(half_spread: Decimal, slippage: Decimal) -> Arc<SimBroker> {
    let mut specs = HashMap::new();
    specs.insert("EURUSD".to_string(), instrument(half_spread, slippage));
    Arc::new(SimBroker::new(FillModel::new(specs), dec!(10000)))
}

fn router(ledger: Arc<ExecutionLedger>, bus: EventBus) -> Arc<ExecutionRouter> {
    Arc::new(ExecutionRouter::new(
        ExecutionSettings::default(),
        RiskEngine::new(limits()),
        Arc::new(SafetyContext::new()),
        ledger,
        bus,
        Arc::new(PositionStore::new()),
    ))
}

fn intent(size: Decimal) -> OrderIntent {
    OrderIntent::new(
        "EURUSD",
        Side::Buy,
        size,
        Some(dec!(1.09)),
        Some(dec!(1.13)),
        "test_bot",
        Utc::now(),
    )
}

/// Signal -> risk -> submit -> fill -> ledger, against the simulator.
#[tokio::test]
async fn test_signal_to_fill_flow() {
    let bus = EventBus::new(256);
    let ledger = Arc::new(ExecutionLedger::in_memory("it_flow"));
    let r = router(ledger.clone(), bus);

    let sim = sim_broker(dec!(0.0002), dec!(0.0001));
    sim.set_mark("EURUSD", dec!(1.1000), Utc::now());

    r.connect(sim.clone(), false).await.unwrap();
    r.arm(true).unwrap();

    let outcome = r.route_intent(intent(dec!(1))).await;
    let (order, fill) = match outcome {
        RouteOutcome::Filled { order, fill } => (order, fill),
        other => panic!("expected fill, got {:?}", other),
    };

    // Fill price model: 1.1000 + 0.0002 + 0.0001 = 1.1003
    assert_eq!(fill.price, dec!(1.1003));
    assert_eq!(order.status, tradedesk::domain::OrderStatus::Filled);

    // Full audit trail, in order.
    let types: Vec<String> = ledger
        .entries()
        .iter()
        .map(|e| e.entry_type.clone())
        .collect();
    assert_eq!(types, vec!["intent", "submission", "ack", "fill"]);

    // The simulator and the router agree on the open position.
    assert_eq!(r.positions().count(), 1);
    assert_eq!(sim.positions().await.unwrap().len(), 1);
}

/// Oversized intent is capped by risk, then filled at the capped size.
#[tokio::test]
async fn test_risk_caps_size_before_submission() {
    let bus = EventBus::new(256);
    let ledger = Arc::new(ExecutionLedger::in_memory("it_cap"));
    let r = router(ledger, bus);

    let sim = sim_broker(dec!(0.0002), dec!(0.0001));
    sim.set_mark("EURUSD", dec!(1.1000), Utc::now());
    r.connect(sim, false).await.unwrap();
    r.arm(true).unwrap();

    match r.route_intent(intent(dec!(50))).await {
        RouteOutcome::Filled { order, fill } => {
            assert_eq!(order.size, dec!(5));
            assert_eq!(fill.size, dec!(5));
        }
        other => panic!("expected fill, got {:?}", other),
    }
}

/// Daily-loss breach: intent rejected, kill switch trips, reset does not
/// re-arm, explicit arm restores the pipeline.
#[tokio::test]
async fn test_daily_loss_kill_switch_cycle() {
    let bus = EventBus::new(256);
    let ledger = Arc::new(ExecutionLedger::in_memory("it_kill"));
    let r = router(ledger.clone(), bus);

    let sim = sim_broker(dec!(0.0002), dec!(0.0001));
    sim.set_mark("EURUSD", dec!(1.1000), Utc::now());
    r.connect(sim, false).await.unwrap();
    r.arm(true).unwrap();

    // Balance 10000, limit 2%: realized loss of 205 breaches.
    r.account().update_balance(dec!(10000), Utc::now());
    r.account().set_realized_pnl_today(dec!(-205));

    match r.route_intent(intent(dec!(1))).await {
        RouteOutcome::Rejected { code, .. } => assert_eq!(code, "daily_loss_limit_reached"),
        other => panic!("expected rejection, got {:?}", other),
    }
    assert!(r.safety().kill_switch.is_active());
    assert!(!r.safety().is_armed());
    assert_eq!(ledger.entries_of("kill_switch").len(), 1);

    // Manual reset: switch clears, still disarmed.
    r.reset_kill_switch("user");
    assert!(!r.safety().kill_switch.is_active());
    assert!(!r.safety().is_armed());

    // Recover the day and arm explicitly; orders flow again.
    r.account().set_realized_pnl_today(Decimal::ZERO);
    r.arm(true).unwrap();
    assert!(matches!(
        r.route_intent(intent(dec!(1))).await,
        RouteOutcome::Filled { .. }
    ));
}

/// Reconciliation against the simulator: a fill tracked by the router
/// produces no drift; an externally closed position produces `removed`
/// drift and clears local state.
#[tokio::test]
async fn test_reconciliation_after_fills() {
    let bus = EventBus::new(256);
    let ledger = Arc::new(ExecutionLedger::in_memory("it_recon"));
    let r = router(ledger.clone(), bus.clone());

    let sim = sim_broker(dec!(0.0002), dec!(0.0001));
    sim.set_mark("EURUSD", dec!(1.1000), Utc::now());
    r.connect(sim.clone(), false).await.unwrap();
    r.arm(true).unwrap();

    let outcome = r.route_intent(intent(dec!(1))).await;
    let order = match outcome {
        RouteOutcome::Filled { order, .. } => order,
        other => panic!("expected fill, got {:?}", other),
    };

    // Local view and broker view already agree: no drift.
    let drift = Reconciler::reconcile_once(
        sim.as_ref(),
        &r.positions(),
        &ledger,
        &bus,
    )
    .await
    .unwrap();
    assert!(drift.is_empty());

    // Close at the broker directly, as if from another terminal.
    let broker_ref = order.broker_ref.unwrap();
    sim.close(&broker_ref, None).await.unwrap();

    let drift = Reconciler::reconcile_once(
        sim.as_ref(),
        &r.positions(),
        &ledger,
        &bus,
    )
    .await
    .unwrap();
    assert_eq!(drift.len(), 1);
    assert_eq!(drift[0].kind, tradedesk::DriftKind::Removed);
    assert_eq!(r.positions().count(), 0);
}

/// Full backtest through the shared router substrate.
#[tokio::test]
async fn test_backtest_end_to_end() {
    let config = AppConfig {
        mode: "backtest".to_string(),
        symbols: vec!["EURUSD".to_string()],
        timeframe: "1m".to_string(),
        risk: RiskLimits {
            require_stop_loss: true,
            max_position_size: dec!(100),
            max_concurrent_positions: 10,
            max_daily_loss_pct: dec!(50),
            max_trades_per_hour: 1000,
            per_symbol_exposure_cap: dec!(1000000),
        },
        execution: ExecutionSettings::default(),
        sizing: SizingSettings {
            method: SizingMethod::FixedSize,
            fixed_size: dec!(1),
            risk_per_trade_pct: dec!(0.5),
        },
        backtest: BacktestSettings {
            initial_cash: dec!(10000),
            warmup_bars: 20,
            seed: 7,
            slippage_jitter: Decimal::ZERO,
            artefacts_dir: None,
            bars_file: None,
        },
        defaults: None,
        instruments: HashMap::new(),
    };
    let request = BacktestRequest::from_config(&config).unwrap();

    let source = Arc::new(MemoryBarSource::new());
    let bars: Vec<Bar> = (0..240)
        .map(|i| {
            let phase = i % 60;
            let offset = if phase < 30 { phase } else { 60 - phase };
            bar("EURUSD", i, dec!(1.1) + Decimal::new(offset, 3))
        })
        .collect();
    source.insert_series(bars);

    let strategies: Vec<Arc<dyn Strategy>> =
        vec![Arc::new(SmaCross::new(5, 15, Decimal::ONE, dec!(2)))];
    let engine = BacktestEngine::new(config, source, strategies, EventBus::new(1024));
    let result = engine.run(request).await.unwrap();

    assert!(result.ok);
    assert_eq!(result.equity_curve.len(), 240);
    assert!(!result.orders.is_empty());
    assert!(!result.trades.is_empty());
    // Every trade references a completed round trip with a reason.
    for trade in &result.trades {
        assert!(trade.exit_time >= trade.entry_time);
        assert!(!trade.exit_reason.is_empty());
    }
    // Metrics come from the same trades the result carries.
    assert_eq!(result.metrics.total_trades, result.trades.len());
}

/// Artefacts land on disk, keyed by run id.
#[tokio::test]
async fn test_backtest_writes_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig {
        mode: "backtest".to_string(),
        symbols: vec!["EURUSD".to_string()],
        timeframe: "1m".to_string(),
        risk: RiskLimits {
            require_stop_loss: true,
            max_position_size: dec!(100),
            max_concurrent_positions: 10,
            max_daily_loss_pct: dec!(50),
            max_trades_per_hour: 1000,
            per_symbol_exposure_cap: dec!(1000000),
        },
        execution: ExecutionSettings::default(),
        sizing: SizingSettings {
            method: SizingMethod::FixedSize,
            fixed_size: dec!(1),
            risk_per_trade_pct: dec!(0.5),
        },
        backtest: BacktestSettings {
            initial_cash: dec!(10000),
            warmup_bars: 20,
            seed: 7,
            slippage_jitter: Decimal::ZERO,
            artefacts_dir: Some(dir.path().to_string_lossy().to_string()),
            bars_file: None,
        },
        defaults: None,
        instruments: HashMap::new(),
    };
    let request = BacktestRequest::from_config(&config).unwrap();

    let source = Arc::new(MemoryBarSource::new());
    let bars: Vec<Bar> = (0..120)
        .map(|i| {
            let phase = i % 60;
            let offset = if phase < 30 { phase } else { 60 - phase };
            bar("EURUSD", i, dec!(1.1) + Decimal::new(offset, 3))
        })
        .collect();
    source.insert_series(bars);

    let strategies: Vec<Arc<dyn Strategy>> =
        vec![Arc::new(SmaCross::new(5, 15, Decimal::ONE, dec!(2)))];
    let engine = BacktestEngine::new(config, source, strategies, EventBus::new(1024));
    let result = engine.run(request).await.unwrap();

    let run_dir = dir.path().join(&result.run_id);
    assert!(run_dir.join("manifest.json").exists());
    assert!(run_dir.join("equity_curve.jsonl").exists());
    assert!(run_dir.join("trades.json").exists());
    assert!(run_dir.join("orders.json").exists());
    assert!(run_dir.join("metrics.json").exists());

    let manifest: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(run_dir.join("manifest.json")).unwrap())
            .unwrap();
    assert_eq!(manifest["seed"], 7);
    assert_eq!(manifest["run_id"], serde_json::json!(result.run_id));

    let equity_lines = std::fs::read_to_string(run_dir.join("equity_curve.jsonl")).unwrap();
    assert_eq!(equity_lines.lines().count(), result.equity_curve.len());
}
