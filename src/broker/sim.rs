//! Deterministic broker simulation.
//!
//! Fill prices are a pure function of (order, current bar close, instrument
//! spec, jitter): buys fill at `close + half_spread + slippage`, sells at
//! `close - half_spread - slippage`. The model never consults `bar.high` or
//! `bar.low` to grant intrabar fills it cannot prove occurred between open
//! and close; that is a known, deliberate approximation kept for
//! comparability with historical runs, not a bug to fix.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::broker::{AccountSummary, AckStatus, BrokerAdapter, BrokerFill, BrokerPosition, OrderAck};
use crate::domain::{InstrumentSpec, Order, Side};
use crate::error::BrokerError;

/// Priced execution for one order against one bar.
#[derive(Clone, Debug, PartialEq)]
pub struct FillQuote {
    pub price: Decimal,
    pub half_spread: Decimal,
    pub slippage: Decimal,
    pub fees: Decimal,
}

/// Static per-instrument cost model. No state is carried between calls
/// beyond this configuration.
#[derive(Clone, Debug, Default)]
pub struct FillModel {
    specs: HashMap<String, InstrumentSpec>,
    default_spec: InstrumentSpec,
}

impl FillModel {
    pub fn new(specs: HashMap<String, InstrumentSpec>) -> Self {
        Self {
            specs,
            default_spec: InstrumentSpec::default(),
        }
    }

    pub fn spec(&self, symbol: &str) -> &InstrumentSpec {
        self.specs.get(symbol).unwrap_or(&self.default_spec)
    }

    /// Price a fill at the given bar close. `jitter` is extra slippage in
    /// price units (positive worsens the fill, negative improves it).
    pub fn quote(
        &self,
        symbol: &str,
        side: Side,
        bar_close: Decimal,
        size: Decimal,
        jitter: Decimal,
    ) -> FillQuote {
        let spec = self.spec(symbol);
        let slippage = spec.slippage + jitter;
        let price = match side {
            Side::Buy => bar_close + spec.half_spread + slippage,
            Side::Sell => bar_close - spec.half_spread - slippage,
        };
        FillQuote {
            price,
            half_spread: spec.half_spread,
            slippage,
            fees: spec.fees.total(size, price),
        }
    }

    /// Validate size against the instrument's dealing rules.
    pub fn validate_size(&self, symbol: &str, size: Decimal) -> Result<(), String> {
        let rules = &self.spec(symbol).dealing;
        if size < rules.min_size {
            return Err(format!("size {} below minimum {}", size, rules.min_size));
        }
        if size > rules.max_size {
            return Err(format!("size {} above maximum {}", size, rules.max_size));
        }
        if rules.size_step > Decimal::ZERO {
            let steps = size / rules.size_step;
            if steps != steps.trunc() {
                return Err(format!(
                    "size {} not a multiple of step {}",
                    size, rules.size_step
                ));
            }
        }
        Ok(())
    }
}

/// Broker adapter backed by [`FillModel`]. Used for backtests and paper
/// trading; fills happen instantly at the last mark set via `set_mark`.
pub struct SimBroker {
    model: FillModel,
    marks: DashMap<String, (Decimal, DateTime<Utc>)>,
    positions: DashMap<String, BrokerPosition>,
    balance: Mutex<Decimal>,
    jitter_rng: Mutex<Option<StdRng>>,
    jitter_amount: Decimal,
    seq: AtomicU64,
}

impl SimBroker {
    pub fn new(model: FillModel, initial_balance: Decimal) -> Self {
        Self {
            model,
            marks: DashMap::new(),
            positions: DashMap::new(),
            balance: Mutex::new(initial_balance),
            jitter_rng: Mutex::new(None),
            jitter_amount: Decimal::ZERO,
            seq: AtomicU64::new(0),
        }
    }

    /// Enable seeded slippage jitter. The seed comes from the run manifest,
    /// so jittered runs stay reproducible.
    pub fn with_jitter(mut self, seed: u64, amount: Decimal) -> Self {
        if amount > Decimal::ZERO {
            self.jitter_rng = Mutex::new(Some(StdRng::seed_from_u64(seed)));
            self.jitter_amount = amount;
        }
        self
    }

    /// Update the execution mark for a symbol (the current bar's close).
    pub fn set_mark(&self, symbol: &str, price: Decimal, ts: DateTime<Utc>) {
        self.marks.insert(symbol.to_string(), (price, ts));
    }

    fn draw_jitter(&self) -> Decimal {
        if self.jitter_amount == Decimal::ZERO {
            return Decimal::ZERO;
        }
        let mut guard = self.jitter_rng.lock().unwrap();
        match guard.as_mut() {
            Some(rng) => {
                let f: f64 = rng.gen_range(-1.0..=1.0);
                (self.jitter_amount * Decimal::from_f64(f).unwrap_or_default()).round_dp(8)
            }
            None => Decimal::ZERO,
        }
    }

    fn next_ref(&self) -> String {
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        format!("SIM-{:06}", n)
    }

    fn mark_for(&self, symbol: &str) -> Result<(Decimal, DateTime<Utc>), BrokerError> {
        self.marks
            .get(symbol)
            .map(|m| *m.value())
            .ok_or_else(|| BrokerError::NoMarketData {
                symbol: symbol.to_string(),
            })
    }
}

#[async_trait]
impl BrokerAdapter for SimBroker {
    fn name(&self) -> &'static str {
        "sim"
    }

    async fn account(&self) -> Result<AccountSummary, BrokerError> {
        Ok(AccountSummary {
            account_id: "SIM".to_string(),
            balance: *self.balance.lock().unwrap(),
            currency: "USD".to_string(),
        })
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        Ok(self.positions.iter().map(|p| p.value().clone()).collect())
    }

    async fn submit(&self, order: &Order) -> Result<OrderAck, BrokerError> {
        let (mark, mark_ts) = self.mark_for(&order.symbol)?;

        if let Err(reason) = self.model.validate_size(&order.symbol, order.size) {
            return Ok(OrderAck {
                broker_ref: self.next_ref(),
                status: AckStatus::Rejected,
                fill: None,
                reason: Some(reason),
            });
        }

        let quote = self
            .model
            .quote(&order.symbol, order.side, mark, order.size, self.draw_jitter());
        let broker_ref = self.next_ref();

        self.positions.insert(
            broker_ref.clone(),
            BrokerPosition {
                position_id: broker_ref.clone(),
                symbol: order.symbol.clone(),
                side: order.side,
                size: order.size,
                entry_price: quote.price,
                opened_at: mark_ts,
                unrealized_pnl: Some(Decimal::ZERO),
            },
        );

        Ok(OrderAck {
            broker_ref,
            status: AckStatus::Accepted,
            fill: Some(BrokerFill {
                price: quote.price,
                size: order.size,
                fees: quote.fees,
                ts: mark_ts,
            }),
            reason: None,
        })
    }

    async fn close(
        &self,
        position_id: &str,
        size: Option<Decimal>,
    ) -> Result<OrderAck, BrokerError> {
        let (_, position) =
            self.positions
                .remove(position_id)
                .ok_or_else(|| BrokerError::PositionNotFound {
                    position_id: position_id.to_string(),
                })?;

        let (mark, mark_ts) = self.mark_for(&position.symbol)?;
        let close_size = size.unwrap_or(position.size).min(position.size);

        // Closing takes the other side of the book.
        let quote = self.model.quote(
            &position.symbol,
            position.side.opposite(),
            mark,
            close_size,
            self.draw_jitter(),
        );

        let gross = match position.side {
            Side::Buy => (quote.price - position.entry_price) * close_size,
            Side::Sell => (position.entry_price - quote.price) * close_size,
        };
        {
            let mut balance = self.balance.lock().unwrap();
            *balance += gross - quote.fees;
        }

        let remaining = position.size - close_size;
        if remaining > Decimal::ZERO {
            let mut rest = position.clone();
            rest.size = remaining;
            self.positions.insert(position_id.to_string(), rest);
        }

        Ok(OrderAck {
            broker_ref: position_id.to_string(),
            status: AckStatus::Accepted,
            fill: Some(BrokerFill {
                price: quote.price,
                size: close_size,
                fees: quote.fees,
                ts: mark_ts,
            }),
            reason: None,
        })
    }
}
