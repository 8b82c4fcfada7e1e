//! Deterministic bar-driven backtest orchestrator.
//!
//! Drives Bar -> Strategy -> Router -> Portfolio strictly in timestamp
//! order across all symbols. Intents flow through the same
//! [`ExecutionRouter`] and state machine as live trading, against the
//! [`SimBroker`] adapter; the router never knows which mode it is in.
//!
//! Determinism: no wall clock or I/O in the bar loop, "now" is always the
//! bar timestamp, and intent/trade ids derive from the run seed, so a
//! fixed (bars, strategies, config, seed) input produces byte-identical
//! equity curve, trade list, and metrics.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backtest::artifacts::{
    write_run_artifacts, RunManifest, StrategyResult, ENGINE_VERSION,
};
use crate::backtest::metrics::{compute_metrics_summary, MetricsSummary};
use crate::backtest::portfolio::{EquityPoint, Portfolio, TradeRecord};
use crate::backtest::sizing::position_size;
use crate::broker::{FillModel, SimBroker};
use crate::bus::EventBus;
use crate::config::AppConfig;
use crate::data::{merge_bars, BarSource, ExecutionLedger};
use crate::domain::{Bar, Direction, Order, OrderIntent, Position, Side, SignalIntent, Timeframe};
use crate::error::EngineError;
use crate::events::Event;
use crate::services::reconciliation::PositionStore;
use crate::services::risk::RiskEngine;
use crate::services::router::{ExecutionRouter, RouteOutcome};
use crate::services::safety::SafetyContext;
use crate::strategy::Strategy;

/// Ids derived from the run seed: same seed, same sequence.
struct DeterministicIds {
    seed: u64,
    counter: u64,
}

impl DeterministicIds {
    fn new(seed: u64) -> Self {
        Self { seed, counter: 0 }
    }

    fn next(&mut self) -> Uuid {
        self.counter += 1;
        Uuid::from_u64_pair(self.seed, self.counter)
    }
}

#[derive(Clone, Debug)]
pub struct BacktestRequest {
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    pub initial_cash: Decimal,
    pub warmup_bars: usize,
    pub seed: u64,
    pub artefacts_dir: Option<PathBuf>,
}

impl BacktestRequest {
    pub fn from_config(config: &AppConfig) -> Result<Self, EngineError> {
        let timeframe = Timeframe::parse(&config.timeframe)
            .ok_or_else(|| EngineError::Config(format!("invalid timeframe: {}", config.timeframe)))?;
        Ok(Self {
            symbols: config.symbols.clone(),
            timeframe,
            initial_cash: config.backtest.initial_cash,
            warmup_bars: config.backtest.warmup_bars,
            seed: config.backtest.seed,
            artefacts_dir: config.backtest.artefacts_dir.clone().map(PathBuf::from),
        })
    }
}

#[derive(Clone, Debug)]
pub struct BacktestResult {
    pub run_id: String,
    pub ok: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub metrics: MetricsSummary,
    pub per_strategy: Vec<StrategyResult>,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<TradeRecord>,
    pub orders: Vec<Order>,
    pub warnings: Vec<String>,
    pub artefact_paths: HashMap<String, String>,
    pub engine_version: String,
}

pub struct BacktestEngine {
    config: AppConfig,
    source: Arc<dyn BarSource>,
    strategies: Vec<Arc<dyn Strategy>>,
    bus: EventBus,
    cancel: Arc<AtomicBool>,
}

impl BacktestEngine {
    pub fn new(
        config: AppConfig,
        source: Arc<dyn BarSource>,
        strategies: Vec<Arc<dyn Strategy>>,
        bus: EventBus,
    ) -> Self {
        Self {
            config,
            source,
            strategies,
            bus,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for cooperative cancellation; checked between bars, never
    /// mid-transition.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub async fn run(&self, request: BacktestRequest) -> Result<BacktestResult, EngineError> {
        let run_id = format!("bt_{}", &Uuid::new_v4().simple().to_string()[..8]);
        let started_at = Utc::now();
        let mut warnings: Vec<String> = Vec::new();

        info!(
            "[BACKTEST] starting run {}: {} strategies, {} symbols",
            run_id,
            self.strategies.len(),
            request.symbols.len()
        );

        // Load and merge bars.
        let mut series: Vec<Vec<Bar>> = Vec::new();
        for symbol in &request.symbols {
            let bars = self.source.next_bars(symbol, request.timeframe, None);
            if bars.is_empty() {
                warnings.push(format!("no bars found for {}", symbol));
                warn!("[BACKTEST] no bars found for {}", symbol);
                continue;
            }
            if bars.len() < request.warmup_bars {
                warnings.push(format!(
                    "insufficient bars for {}: {} < {}",
                    symbol,
                    bars.len(),
                    request.warmup_bars
                ));
                continue;
            }
            series.push(bars);
        }
        let merged = merge_bars(series);

        // Shared substrate: the same router, risk engine, and state machine
        // live trading uses, pointed at the simulator.
        let ledger = Arc::new(ExecutionLedger::in_memory(&run_id));
        let safety = Arc::new(SafetyContext::new());
        let positions = Arc::new(PositionStore::new());
        let router = ExecutionRouter::new(
            self.config.execution.clone(),
            RiskEngine::new(self.config.risk.clone()),
            safety.clone(),
            ledger.clone(),
            self.bus.clone(),
            positions.clone(),
        );
        let sim = Arc::new(
            SimBroker::new(
                FillModel::new(self.config.instrument_table()),
                request.initial_cash,
            )
            .with_jitter(request.seed, self.config.backtest.slippage_jitter),
        );
        router.connect(sim.clone(), false).await?;
        router.arm(true)?;

        let mut ids = DeterministicIds::new(request.seed);
        let mut portfolio = Portfolio::new(request.initial_cash);
        let mut history: HashMap<String, Vec<Bar>> = HashMap::new();
        let mut disabled: HashSet<(String, String)> = HashSet::new();
        let mut orders: Vec<Order> = Vec::new();
        let mut current_day: Option<NaiveDate> = None;
        let mut day_start_realized = Decimal::ZERO;
        let mut bars_processed = 0usize;

        for bar in &merged {
            if self.cancel.load(Ordering::SeqCst) {
                warnings.push("run cancelled".to_string());
                warn!("[BACKTEST] run {} cancelled", run_id);
                break;
            }
            bars_processed += 1;
            let symbol = bar.symbol.clone();
            let close = bar.close;
            let ts = bar.open_ts;

            history.entry(symbol.clone()).or_default().push(bar.clone());
            sim.set_mark(&symbol, close, ts);
            router.account().set_mark(&symbol, close);

            // Daily realized P&L resets at UTC midnight.
            let day = ts.date_naive();
            if current_day != Some(day) {
                current_day = Some(day);
                day_start_realized = portfolio.realized_pnl;
            }

            let mut marks = HashMap::new();
            marks.insert(symbol.clone(), close);
            portfolio.update_marks(&marks);

            // Stop-loss / take-profit exits against the new close.
            for (sym, strat, position_id, reason) in portfolio.exits_triggered(&symbol, close) {
                match router.close_position(&position_id, None).await {
                    Ok(fill) => {
                        portfolio.close_position(
                            &sym, &strat, fill.price, ts, reason, fill.fees,
                            ids.next(),
                        );
                    }
                    Err(e) => {
                        warnings.push(format!("exit failed for {}: {}", position_id, e));
                        warn!("[BACKTEST] exit failed for {}: {}", position_id, e);
                    }
                }
            }

            portfolio.increment_bars_held(&symbol);

            for strategy in &self.strategies {
                let strategy_id = strategy.id().to_string();
                if disabled.contains(&(symbol.clone(), strategy_id.clone())) {
                    continue;
                }
                let bars_so_far = &history[&symbol];
                let warmup = request.warmup_bars.max(strategy.warmup_bars());
                let position = portfolio.position(&symbol, &strategy_id).cloned();

                // Strategies only ever see bars[0..=current]; before warmup
                // the engine forces a hold.
                let signal = if bars_so_far.len() < warmup {
                    SignalIntent::hold("warmup")
                } else {
                    match strategy.generate_signal(bars_so_far, position.as_ref()) {
                        Ok(s) => s,
                        Err(e) => {
                            // A failing strategy is disabled for this symbol
                            // only; the rest of the run continues.
                            let msg = format!(
                                "strategy {} disabled for {}: {}",
                                strategy_id, symbol, e
                            );
                            warn!("[BACKTEST] {}", msg);
                            warnings.push(msg);
                            disabled.insert((symbol.clone(), strategy_id.clone()));
                            continue;
                        }
                    }
                };

                if signal.is_hold() {
                    continue;
                }
                self.bus
                    .publish(Event::Signal {
                        symbol: symbol.clone(),
                        strategy_id: strategy_id.clone(),
                        intent: signal.clone(),
                    })
                    .ok();

                // Opposite signal closes the open position.
                if let Some(pos) = &position {
                    let closes = (pos.is_long() && signal.direction == Direction::Sell)
                        || (pos.is_short() && signal.direction == Direction::Buy);
                    if closes {
                        match router.close_position(&pos.position_id, None).await {
                            Ok(fill) => {
                                portfolio.close_position(
                                    &symbol,
                                    &strategy_id,
                                    fill.price,
                                    ts,
                                    "signal",
                                    fill.fees,
                                    ids.next(),
                                );
                            }
                            Err(e) => {
                                warnings
                                    .push(format!("close failed for {}: {}", pos.position_id, e));
                            }
                        }
                    }
                    continue;
                }

                // Entry: size it, then route through risk and the broker.
                let side = match Side::try_from(signal.direction) {
                    Ok(s) => s,
                    Err(_) => continue,
                };
                let spec = self.config.instrument_spec(&symbol);
                let sized = position_size(
                    &signal,
                    portfolio.equity(),
                    close,
                    &self.config.sizing,
                    &spec.dealing,
                );
                if !sized.is_valid() {
                    if let Some(reason) = sized.rejection_reason {
                        warnings.push(format!("sizing failed for {}/{}: {}", symbol, strategy_id, reason));
                    }
                    continue;
                }

                let intent = OrderIntent::with_id(
                    ids.next(),
                    &symbol,
                    side,
                    sized.size,
                    signal.stop_loss,
                    signal.take_profit,
                    &strategy_id,
                    ts,
                );

                // Push the portfolio view into the router so risk evaluates
                // fresh state; bar time is "now", so it is never stale.
                router.account().update_balance(portfolio.equity(), ts);
                router
                    .account()
                    .set_realized_pnl_today(portfolio.realized_pnl - day_start_realized);

                match router.route_intent(intent).await {
                    RouteOutcome::Filled { order, fill }
                    | RouteOutcome::PartiallyFilled { order, fill } => {
                        portfolio.cash -= fill.fees;
                        let mut pos = Position::open(
                            order.broker_ref.as_deref().unwrap_or("?"),
                            &symbol,
                            order.side,
                            fill.size,
                            fill.price,
                            ts,
                            order.sl_price,
                            order.tp_price,
                            &strategy_id,
                        );
                        pos.source_order_id = Some(order.order_id);
                        pos.update_unrealized(close);
                        portfolio.open_position(pos);
                        orders.push(order);
                    }
                    RouteOutcome::Accepted { order } => {
                        orders.push(order);
                    }
                    RouteOutcome::Rejected { code, .. } => {
                        // Rejected intents are discarded, not promoted; the
                        // ledger rejection record is the audit trail.
                        debug!(
                            "[BACKTEST] intent rejected for {}/{}: {}",
                            symbol, strategy_id, code
                        );
                    }
                    RouteOutcome::Failed { order, error } => {
                        warnings.push(format!("submission failed for {}: {}", symbol, error));
                        orders.push(order);
                    }
                }
            }

            portfolio.record_equity_point(ts);
        }

        let bars_per_day = request.timeframe.bars_per_day();
        let metrics = compute_metrics_summary(
            &portfolio.equity_curve,
            &portfolio.closed_trades,
            request.initial_cash,
            None,
            bars_per_day,
        );

        let per_strategy: Vec<StrategyResult> = self
            .strategies
            .iter()
            .map(|s| {
                let id = s.id();
                let trades: Vec<&TradeRecord> = portfolio
                    .closed_trades
                    .iter()
                    .filter(|t| t.strategy_id == id)
                    .collect();
                let mut symbols_traded: Vec<String> =
                    trades.iter().map(|t| t.symbol.clone()).collect();
                symbols_traded.sort();
                symbols_traded.dedup();
                StrategyResult {
                    strategy_id: id.to_string(),
                    symbols_traded,
                    metrics: compute_metrics_summary(
                        &portfolio.equity_curve,
                        &portfolio.closed_trades,
                        request.initial_cash,
                        Some(id),
                        bars_per_day,
                    ),
                    trades_count: trades.len(),
                    orders_count: orders.iter().filter(|o| o.strategy_id == id).count(),
                }
            })
            .collect();

        let manifest = RunManifest {
            run_id: run_id.clone(),
            engine_version: ENGINE_VERSION.to_string(),
            created_at: started_at,
            seed: request.seed,
            symbols: request.symbols.clone(),
            timeframe: request.timeframe,
            strategies: self.strategies.iter().map(|s| s.id().to_string()).collect(),
            initial_cash: request.initial_cash,
            warmup_bars: request.warmup_bars,
            bars_processed,
        };

        let mut artefact_paths = HashMap::new();
        if let Some(base_dir) = &request.artefacts_dir {
            artefact_paths = write_run_artifacts(
                base_dir,
                &run_id,
                &manifest,
                &portfolio.equity_curve,
                &portfolio.closed_trades,
                &orders,
                &metrics,
                &per_strategy,
                &warnings,
            )?;
        }

        router.disconnect().await;

        let completed_at = Utc::now();
        info!(
            "[BACKTEST] run {} completed: {} trades, sharpe={:.2}, max_dd={:.2}%",
            run_id,
            portfolio.closed_trades.len(),
            metrics.sharpe_ratio,
            metrics.max_drawdown_pct * 100.0
        );

        Ok(BacktestResult {
            run_id,
            ok: true,
            started_at,
            completed_at,
            metrics,
            per_strategy,
            equity_curve: portfolio.equity_curve,
            trades: portfolio.closed_trades,
            orders,
            warnings,
            artefact_paths,
            engine_version: ENGINE_VERSION.to_string(),
        })
    }
}
