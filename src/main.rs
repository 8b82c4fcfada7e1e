use std::path::PathBuf;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{error, info};

use tradedesk::backtest::{BacktestEngine, BacktestRequest};
use tradedesk::broker::{FillModel, SimBroker};
use tradedesk::bus::EventBus;
use tradedesk::config::AppConfig;
use tradedesk::data::{ExecutionLedger, MemoryBarSource};
use tradedesk::domain::Bar;
use tradedesk::services::reconciliation::PositionStore;
use tradedesk::services::risk::RiskEngine;
use tradedesk::services::router::ExecutionRouter;
use tradedesk::services::safety::SafetyContext;
use tradedesk::services::signal_runner::SignalRunner;
use tradedesk::strategy::{SmaCross, Strategy};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Setup Logging
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!("Starting tradedesk...");

    let config = AppConfig::load();
    info!("Loaded configuration: mode={}, symbols={:?}", config.mode, config.symbols);

    let bus = EventBus::new(1024);
    let strategies: Vec<Arc<dyn Strategy>> = vec![Arc::new(SmaCross::new(
        10,
        30,
        Decimal::ONE,
        Decimal::from(2u32),
    ))];

    match config.mode.as_str() {
        "backtest" => {
            let source = Arc::new(MemoryBarSource::new());
            match &config.backtest.bars_file {
                Some(path) => {
                    let content = std::fs::read_to_string(path)?;
                    let bars: Vec<Bar> = serde_json::from_str(&content)?;
                    info!("Loaded {} bars from {}", bars.len(), path);
                    source.insert_series(bars);
                }
                None => {
                    error!("backtest mode needs backtest.bars_file in config.yaml");
                    return Ok(());
                }
            }

            let request = BacktestRequest::from_config(&config)?;
            let engine = BacktestEngine::new(config, source, strategies, bus);
            let result = engine.run(request).await?;

            info!(
                "Backtest {} finished: {} trades, total return {:.2}, sharpe {:.2}, win rate {:.1}%",
                result.run_id,
                result.metrics.total_trades,
                result.metrics.total_return,
                result.metrics.sharpe_ratio,
                result.metrics.win_rate * 100.0
            );
            for warning in &result.warnings {
                info!("warning: {}", warning);
            }
            if !result.artefact_paths.is_empty() {
                info!("Artefacts written: {:?}", result.artefact_paths);
            }
        }
        "paper" => {
            // Paper trading: the same router, pointed at the simulator. A
            // real-time bar feed publishes Event::Bar onto the bus; the
            // signal runner takes it from there.
            let run_id = format!("paper_{}", chrono::Utc::now().format("%Y%m%d_%H%M%S"));
            let artefacts_dir = config
                .backtest
                .artefacts_dir
                .clone()
                .unwrap_or_else(|| "data/runs".to_string());
            let manifest = serde_json::json!({
                "run_id": run_id.clone(),
                "mode": "paper",
                "symbols": config.symbols.clone(),
                "started_at": chrono::Utc::now(),
            });
            let ledger = Arc::new(ExecutionLedger::file_backed(
                &PathBuf::from(artefacts_dir),
                &run_id,
                &manifest,
            )?);

            let safety = Arc::new(SafetyContext::new());
            let positions = Arc::new(PositionStore::new());
            let router = Arc::new(ExecutionRouter::new(
                config.execution.clone(),
                RiskEngine::new(config.risk.clone()),
                safety,
                ledger,
                bus.clone(),
                positions,
            ));

            let paper_broker = Arc::new(SimBroker::new(
                FillModel::new(config.instrument_table()),
                config.backtest.initial_cash,
            ));
            router.connect(paper_broker, true).await?;

            let runner = SignalRunner::new(bus.clone(), router.clone(), strategies, config);
            runner.start().await;

            info!("Paper session {} ready; arm with confirm=true to submit orders", run_id);
            info!("Status: {:?}", serde_json::to_string(&router.status())?);

            tokio::signal::ctrl_c().await?;
            info!("Shutting down paper session");
            router.disconnect().await;
        }
        other => {
            error!("Unknown mode '{}' (expected backtest|paper)", other);
        }
    }

    Ok(())
}
