//! Live-mode strategy runner.
//!
//! Subscribes to bar events, maintains a bounded per-symbol history, and
//! drives the same signal -> sizing -> intent -> router pipeline the
//! backtest engine uses. Signals are processed sequentially inside one
//! task, so no two intents for the same symbol/strategy race each other;
//! order submission happens inside the router with its own bounded
//! timeout and never blocks bar ingestion for other subscribers.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backtest::sizing::position_size;
use crate::bus::EventBus;
use crate::config::AppConfig;
use crate::domain::{Bar, Direction, OrderIntent, Side};
use crate::events::Event;
use crate::services::router::ExecutionRouter;
use crate::strategy::Strategy;

pub struct SignalRunner {
    bus: EventBus,
    router: Arc<ExecutionRouter>,
    strategies: Vec<Arc<dyn Strategy>>,
    config: AppConfig,
    history_limit: usize,
}

impl SignalRunner {
    pub fn new(
        bus: EventBus,
        router: Arc<ExecutionRouter>,
        strategies: Vec<Arc<dyn Strategy>>,
        config: AppConfig,
    ) -> Self {
        Self {
            bus,
            router,
            strategies,
            config,
            history_limit: 500,
        }
    }

    pub async fn start(self) {
        let mut rx = self.bus.subscribe();

        tokio::spawn(async move {
            info!("[SIGNAL] strategy runner started ({} strategies)", self.strategies.len());
            let mut history: HashMap<String, Vec<Bar>> = HashMap::new();

            while let Ok(event) = rx.recv().await {
                let bar = match event {
                    Event::Bar(bar) => bar,
                    _ => continue,
                };
                let symbol = bar.symbol.clone();
                let close = bar.close;
                let ts = bar.open_ts;

                let series = history.entry(symbol.clone()).or_default();
                series.push(bar);
                if series.len() > self.history_limit {
                    series.remove(0);
                }

                self.router.account().set_mark(&symbol, close);

                for strategy in &self.strategies {
                    let strategy_id = strategy.id().to_string();
                    let series = &history[&symbol];
                    if series.len() < strategy.warmup_bars() {
                        continue;
                    }

                    let position = self
                        .router
                        .positions()
                        .all()
                        .into_iter()
                        .find(|p| p.symbol == symbol && p.strategy_id == strategy_id);

                    let signal = match strategy.generate_signal(series, position.as_ref()) {
                        Ok(s) => s,
                        Err(e) => {
                            warn!("[SIGNAL] {} failed on {}: {}", strategy_id, symbol, e);
                            continue;
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

                    if let Some(pos) = &position {
                        let closes = (pos.is_long() && signal.direction == Direction::Sell)
                            || (pos.is_short() && signal.direction == Direction::Buy);
                        if closes {
                            if let Err(e) =
                                self.router.close_position(&pos.position_id, None).await
                            {
                                warn!(
                                    "[SIGNAL] close failed for {}: {}",
                                    pos.position_id, e
                                );
                            }
                        }
                        continue;
                    }

                    let side = match Side::try_from(signal.direction) {
                        Ok(s) => s,
                        Err(_) => continue,
                    };
                    let spec = self.config.instrument_spec(&symbol);
                    let sized = position_size(
                        &signal,
                        self.router.account().balance(),
                        close,
                        &self.config.sizing,
                        &spec.dealing,
                    );
                    if !sized.is_valid() {
                        debug!("[SIGNAL] sizing invalid for {}/{}", symbol, strategy_id);
                        continue;
                    }

                    let intent = OrderIntent::new(
                        &symbol,
                        side,
                        sized.size,
                        signal.stop_loss,
                        signal.take_profit,
                        &strategy_id,
                        ts,
                    );
                    let outcome = self.router.route_intent(intent).await;
                    if let Some(code) = outcome.rejection_code() {
                        debug!("[SIGNAL] intent rejected for {}: {}", symbol, code);
                    }
                }
            }
        });
    }
}
