//! Execution router: signal-to-broker pipeline and order state machine.
//!
//! The router owns the full lifecycle of an order: idempotency registration,
//! risk evaluation, the connected/armed/kill-switch gate, submission with a
//! bounded timeout, and ledger records for every step. It holds a
//! [`BrokerAdapter`] behind the shared trait and never branches on whether
//! that adapter is the simulator or a live client.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::{AccountSummary, AckStatus, BrokerAdapter};
use crate::bus::EventBus;
use crate::config::ExecutionSettings;
use crate::data::ExecutionLedger;
use crate::domain::{AccountState, Fill, Order, OrderIntent, OrderStatus, Position};
use crate::error::{BrokerError, ControlError, EngineError, TransitionError};
use crate::events::{Event, StatusSnapshot};
use crate::services::reconciliation::{PositionStore, Reconciler};
use crate::services::risk::{RiskEngine, RiskVerdict};
use crate::services::safety::SafetyContext;

/// Result of routing one intent.
#[derive(Clone, Debug)]
pub enum RouteOutcome {
    Filled { order: Order, fill: Fill },
    PartiallyFilled { order: Order, fill: Fill },
    /// Acknowledged by the broker, fill still pending.
    Accepted { order: Order },
    Rejected {
        intent_id: Uuid,
        code: String,
        reason: String,
        /// Absent for duplicates, which never produce a second order.
        order: Option<Order>,
    },
    Failed { order: Order, error: String },
}

impl RouteOutcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self, RouteOutcome::Rejected { .. })
    }

    pub fn rejection_code(&self) -> Option<&str> {
        match self {
            RouteOutcome::Rejected { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Mutable account view maintained by the router.
///
/// Live mode refreshes the balance from the broker on a TTL; backtests push
/// the portfolio state in before every bar, so the snapshot handed to the
/// risk engine is never stale in either mode.
#[derive(Default)]
pub struct AccountTracker {
    balance: Mutex<Decimal>,
    realized_pnl_today: Mutex<Decimal>,
    refreshed_at: Mutex<Option<DateTime<Utc>>>,
    trade_times: Mutex<Vec<DateTime<Utc>>>,
    marks: DashMap<String, Decimal>,
}

impl AccountTracker {
    pub fn balance(&self) -> Decimal {
        *self.balance.lock().unwrap()
    }

    pub fn update_balance(&self, balance: Decimal, as_of: DateTime<Utc>) {
        *self.balance.lock().unwrap() = balance;
        *self.refreshed_at.lock().unwrap() = Some(as_of);
    }

    pub fn set_realized_pnl_today(&self, pnl: Decimal) {
        *self.realized_pnl_today.lock().unwrap() = pnl;
    }

    pub fn add_realized_pnl(&self, pnl: Decimal) {
        *self.realized_pnl_today.lock().unwrap() += pnl;
        *self.balance.lock().unwrap() += pnl;
    }

    pub fn record_trade(&self, ts: DateTime<Utc>) {
        let mut times = self.trade_times.lock().unwrap();
        times.push(ts);
        // Keep a little more than the rate-limit window.
        let cutoff = ts - ChronoDuration::hours(2);
        times.retain(|t| *t > cutoff);
    }

    pub fn set_mark(&self, symbol: &str, price: Decimal) {
        self.marks.insert(symbol.to_string(), price);
    }

    fn snapshot(&self, open_positions: Vec<Position>) -> AccountState {
        AccountState {
            balance: self.balance(),
            realized_pnl_today: *self.realized_pnl_today.lock().unwrap(),
            open_positions,
            recent_trades: self.trade_times.lock().unwrap().clone(),
            marks: self
                .marks
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            refreshed_at: self
                .refreshed_at
                .lock()
                .unwrap()
                .unwrap_or_else(Utc::now),
        }
    }
}

struct TrackedOrder {
    order: Order,
    registered_at: DateTime<Utc>,
}

enum Registration {
    New,
    Duplicate { age_secs: i64 },
}

pub struct ExecutionRouter {
    settings: ExecutionSettings,
    risk: RiskEngine,
    safety: Arc<SafetyContext>,
    ledger: Arc<ExecutionLedger>,
    bus: EventBus,
    positions: Arc<PositionStore>,
    account: AccountTracker,
    broker: Mutex<Option<Arc<dyn BrokerAdapter>>>,
    orders: DashMap<Uuid, TrackedOrder>,
    consecutive_broker_errors: AtomicU32,
    recon_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutionRouter {
    pub fn new(
        settings: ExecutionSettings,
        risk: RiskEngine,
        safety: Arc<SafetyContext>,
        ledger: Arc<ExecutionLedger>,
        bus: EventBus,
        positions: Arc<PositionStore>,
    ) -> Self {
        Self {
            settings,
            risk,
            safety,
            ledger,
            bus,
            positions,
            account: AccountTracker::default(),
            broker: Mutex::new(None),
            orders: DashMap::new(),
            consecutive_broker_errors: AtomicU32::new(0),
            recon_handle: Mutex::new(None),
        }
    }

    pub fn account(&self) -> &AccountTracker {
        &self.account
    }

    pub fn positions(&self) -> Arc<PositionStore> {
        self.positions.clone()
    }

    pub fn ledger(&self) -> Arc<ExecutionLedger> {
        self.ledger.clone()
    }

    pub fn safety(&self) -> Arc<SafetyContext> {
        self.safety.clone()
    }

    pub fn order_for_intent(&self, intent_id: &Uuid) -> Option<Order> {
        self.orders.get(intent_id).map(|t| t.order.clone())
    }

    fn broker_adapter(&self) -> Result<Arc<dyn BrokerAdapter>, ControlError> {
        self.broker
            .lock()
            .unwrap()
            .clone()
            .ok_or(ControlError::NotConnected)
    }

    // ------------------------------------------------------------------
    // Control surface
    // ------------------------------------------------------------------

    /// Connect to a broker. Fetches the account for an initial balance and
    /// (in live mode) starts the reconciliation loop.
    pub async fn connect(
        &self,
        broker: Arc<dyn BrokerAdapter>,
        start_reconciliation: bool,
    ) -> Result<AccountSummary, EngineError> {
        if self.safety.is_connected() {
            return Err(ControlError::AlreadyConnected.into());
        }

        let summary = broker.account().await?;
        self.account.update_balance(summary.balance, Utc::now());
        *self.broker.lock().unwrap() = Some(broker.clone());
        self.safety.set_connected(true);

        if start_reconciliation {
            let handle = Reconciler::spawn(
                broker,
                self.positions.clone(),
                self.ledger.clone(),
                self.bus.clone(),
                std::time::Duration::from_secs(self.settings.reconcile_interval_secs),
            );
            *self.recon_handle.lock().unwrap() = Some(handle);
        }

        self.bus
            .publish(Event::ExecutionStatus {
                connected: true,
                armed: false,
            })
            .ok();

        info!(
            "[ROUTER] connected to {}: account={}, balance={}",
            self.broker_adapter().map(|b| b.name()).unwrap_or("?"),
            summary.account_id,
            summary.balance
        );
        Ok(summary)
    }

    pub async fn disconnect(&self) {
        if let Some(handle) = self.recon_handle.lock().unwrap().take() {
            handle.abort();
        }
        if self.safety.is_armed() {
            self.disarm();
        }
        self.safety.set_connected(false);
        *self.broker.lock().unwrap() = None;
        self.ledger.finalize();
        self.bus
            .publish(Event::ExecutionStatus {
                connected: false,
                armed: false,
            })
            .ok();
        info!("[ROUTER] disconnected from broker");
    }

    /// Arm execution. Requires an explicit confirmation flag; a kill-switch
    /// reset never re-arms on its own.
    pub fn arm(&self, confirm: bool) -> Result<(), ControlError> {
        if !self.safety.is_connected() {
            return Err(ControlError::NotConnected);
        }
        if self.settings.require_arm_confirmation && !confirm {
            return Err(ControlError::ConfirmationRequired);
        }
        if self.safety.kill_switch.is_active() {
            return Err(ControlError::KillSwitchActive);
        }
        self.safety.arm();
        self.bus
            .publish(Event::ExecutionStatus {
                connected: true,
                armed: true,
            })
            .ok();
        warn!("[ROUTER] execution ARMED");
        Ok(())
    }

    pub fn disarm(&self) {
        self.safety.disarm();
        self.bus
            .publish(Event::ExecutionStatus {
                connected: self.safety.is_connected(),
                armed: false,
            })
            .ok();
        info!("[ROUTER] execution DISARMED");
    }

    pub async fn activate_kill_switch(&self, reason: &str, by: &str) {
        self.trip_kill_switch(reason, by).await;
    }

    /// Manual reset. Leaves the router disarmed: re-arming requires a fresh
    /// `arm(confirm=true)` call.
    pub fn reset_kill_switch(&self, by: &str) {
        if self.safety.kill_switch.reset(by).is_some() {
            self.ledger.record_kill_switch(false, "reset", by);
            self.bus
                .publish(Event::KillSwitchReset { by: by.to_string() })
                .ok();
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            connected: self.safety.is_connected(),
            armed: self.safety.is_armed(),
            kill_switch_active: self.safety.kill_switch.is_active(),
            open_positions: self.positions.count(),
            balance: self.account.balance(),
        }
    }

    // ------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------

    /// Route one intent through idempotency, risk, the safety gate, and the
    /// broker. Every path leaves a ledger record.
    pub async fn route_intent(&self, intent: OrderIntent) -> RouteOutcome {
        let now = intent.created_at;

        // Idempotency: the first registration for an intent_id wins; a
        // repeat inside the dedup window (or while the first is still in
        // flight) is rejected without touching risk or the broker.
        let mut order = Order::from_intent(&intent);
        match self.register(&intent, &order, now) {
            Registration::Duplicate { age_secs } => {
                let reason = format!("duplicate intent_id (seen {}s ago)", age_secs);
                warn!("[ROUTER] {} {}", intent.intent_id, reason);
                self.ledger
                    .record_rejection(&intent, "duplicate_intent", &reason);
                self.publish_rejection(&intent, "duplicate_intent", &reason);
                return RouteOutcome::Rejected {
                    intent_id: intent.intent_id,
                    code: "duplicate_intent".to_string(),
                    reason,
                    order: None,
                };
            }
            Registration::New => {}
        }

        self.ledger.record_intent(&intent);
        self.bus
            .publish(Event::IntentCreated {
                intent_id: intent.intent_id,
                symbol: intent.symbol.clone(),
                side: intent.side,
                size: intent.requested_size,
            })
            .ok();

        if let Err(e) = self.apply_transition(&mut order, OrderStatus::RiskPending, now) {
            return RouteOutcome::Failed {
                order,
                error: e.to_string(),
            };
        }

        // Basic validation before risk.
        if intent.requested_size <= Decimal::ZERO {
            let reason = format!("size {} must be positive", intent.requested_size);
            return self.reject(&intent, order, "invalid_size", &reason, now);
        }

        // Early kill-switch check: while the switch is active nothing gets
        // past the intent record, not even into risk evaluation. The
        // submission gate re-checks it atomically later.
        if self.safety.kill_switch.is_active() {
            let reason = self
                .safety
                .kill_switch
                .activation()
                .map(|a| format!("kill switch active since {}: {}", a.activated_at, a.reason))
                .unwrap_or_else(|| "kill switch active".to_string());
            return self.reject(&intent, order, "kill_switch_active", &reason, now);
        }

        // Refresh the account view when the snapshot is stale; risk checks
        // against a stale balance are a correctness bug, not a shortcut.
        if let Err(reason) = self.ensure_fresh_account(now).await {
            return self.reject(&intent, order, "account_refresh_failed", &reason, now);
        }

        let account = self.account.snapshot(self.positions.all());
        match self.risk.evaluate(&intent, &account, now) {
            RiskVerdict::Rejected {
                rejection,
                trip_kill_switch,
            } => {
                let outcome = self.reject(
                    &intent,
                    order,
                    rejection.code(),
                    &rejection.to_string(),
                    now,
                );
                if trip_kill_switch {
                    self.trip_kill_switch(rejection.code(), "risk_engine").await;
                }
                outcome
            }
            RiskVerdict::Approved { size, reason_codes } => {
                if !reason_codes.is_empty() {
                    debug!(
                        "[ROUTER] risk adjustments for {}: {:?}",
                        intent.intent_id, reason_codes
                    );
                }
                order.size = size;
                self.submit(intent, order, now).await
            }
        }
    }

    /// Close (part of) a position through the broker adapter. Closing
    /// reduces exposure and is not risk gated.
    pub async fn close_position(
        &self,
        position_id: &str,
        size: Option<Decimal>,
    ) -> Result<Fill, EngineError> {
        let broker = self.broker_adapter()?;
        let position = self
            .positions
            .get(position_id)
            .ok_or_else(|| BrokerError::PositionNotFound {
                position_id: position_id.to_string(),
            })?;

        let ack = broker.close(position_id, size).await?;
        let fill = match ack.fill {
            None => {
                return Err(BrokerError::Rejected {
                    reason: ack
                        .reason
                        .unwrap_or_else(|| "close not filled".to_string()),
                }
                .into())
            }
            Some(bf) => {
                let pnl = position.realized_pnl(bf.price, bf.fees);
                Fill {
                    order_id: position.source_order_id.unwrap_or_else(|| {
                        Uuid::new_v5(&Uuid::NAMESPACE_OID, position_id.as_bytes())
                    }),
                    symbol: position.symbol.clone(),
                    ts: bf.ts,
                    price: bf.price,
                    size: bf.size,
                    is_close: true,
                    pnl: Some(pnl),
                    fees: bf.fees,
                    strategy_id: position.strategy_id.clone(),
                }
            }
        };

        if fill.size >= position.size {
            self.positions.remove(position_id);
        } else if let Some(mut rest) = self.positions.remove(position_id) {
            rest.size -= fill.size;
            self.positions.insert(rest);
        }

        if let Some(pnl) = fill.pnl {
            self.account.add_realized_pnl(pnl);
        }
        self.account.record_trade(fill.ts);
        self.ledger.record_fill(&fill);
        self.bus.publish(Event::OrderFilled(fill.clone())).ok();

        Ok(fill)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn register(&self, intent: &OrderIntent, order: &Order, now: DateTime<Utc>) -> Registration {
        let window = ChronoDuration::seconds(self.settings.dedup_window_secs);
        match self.orders.entry(intent.intent_id) {
            Entry::Occupied(mut entry) => {
                let age = now - entry.get().registered_at;
                let active = !entry.get().order.status.is_terminal();
                if active || age <= window {
                    Registration::Duplicate {
                        age_secs: age.num_seconds(),
                    }
                } else {
                    // Terminal and outside the window: treat as a fresh try.
                    entry.insert(TrackedOrder {
                        order: order.clone(),
                        registered_at: now,
                    });
                    Registration::New
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(TrackedOrder {
                    order: order.clone(),
                    registered_at: now,
                });
                Registration::New
            }
        }
    }

    fn store_order(&self, order: &Order) {
        if let Some(mut tracked) = self.orders.get_mut(&order.intent_id) {
            tracked.order = order.clone();
        }
    }

    fn apply_transition(
        &self,
        order: &mut Order,
        to: OrderStatus,
        ts: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        match order.transition(to, ts) {
            Ok(()) => {
                self.store_order(order);
                Ok(())
            }
            Err(e) => {
                error!("[ROUTER] {}", e);
                self.ledger
                    .record_error(&e.to_string(), Some(order.intent_id), Some(order.order_id));
                Err(e)
            }
        }
    }

    fn publish_rejection(&self, intent: &OrderIntent, code: &str, reason: &str) {
        self.bus
            .publish(Event::OrderRejected {
                intent_id: intent.intent_id,
                code: code.to_string(),
                reason: reason.to_string(),
            })
            .ok();
    }

    fn reject(
        &self,
        intent: &OrderIntent,
        mut order: Order,
        code: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> RouteOutcome {
        order.rejection_reason = Some(reason.to_string());
        if let Err(e) = self.apply_transition(&mut order, OrderStatus::Rejected, now) {
            return RouteOutcome::Failed {
                order,
                error: e.to_string(),
            };
        }
        self.ledger.record_rejection(intent, code, reason);
        self.publish_rejection(intent, code, reason);
        info!("[ROUTER] rejected {} ({}): {}", intent.intent_id, code, reason);
        RouteOutcome::Rejected {
            intent_id: intent.intent_id,
            code: code.to_string(),
            reason: reason.to_string(),
            order: Some(order),
        }
    }

    async fn ensure_fresh_account(&self, now: DateTime<Utc>) -> Result<(), String> {
        let ttl = ChronoDuration::seconds(self.settings.balance_ttl_secs);
        let stale = self
            .account
            .snapshot(Vec::new())
            .is_stale(now, ttl);
        if !stale {
            return Ok(());
        }
        let broker = match self.broker_adapter() {
            Ok(b) => b,
            Err(_) => return Err("account stale and no broker connected".to_string()),
        };
        match broker.account().await {
            Ok(summary) => {
                warn!(
                    "[ROUTER] account balance was stale, refreshed to {}",
                    summary.balance
                );
                self.account.update_balance(summary.balance, now);
                Ok(())
            }
            Err(e) => Err(format!("account refresh failed: {}", e)),
        }
    }

    async fn submit(
        &self,
        intent: OrderIntent,
        mut order: Order,
        now: DateTime<Utc>,
    ) -> RouteOutcome {
        // The gate is checked atomically right before the submission
        // decision; a failing gate means the broker is never called.
        if let Err(gate) = self.safety.check_submission_allowed() {
            return self.reject(&intent, order, gate.code(), &gate.to_string(), now);
        }

        let broker = match self.broker_adapter() {
            Ok(b) => b,
            Err(e) => return self.reject(&intent, order, "not_connected", &e.to_string(), now),
        };

        if let Err(e) = self.apply_transition(&mut order, OrderStatus::Submitted, now) {
            return RouteOutcome::Failed {
                order,
                error: e.to_string(),
            };
        }
        self.ledger.record_submission(&order);
        self.bus
            .publish(Event::OrderSubmitted {
                intent_id: order.intent_id,
                order_id: order.order_id,
                symbol: order.symbol.clone(),
            })
            .ok();

        let timeout_ms = self.settings.submit_timeout_ms;
        let result = match timeout(
            std::time::Duration::from_millis(timeout_ms),
            broker.submit(&order),
        )
        .await
        {
            Err(_) => Err(BrokerError::Timeout { timeout_ms }),
            Ok(r) => r,
        };

        match result {
            Err(e) => self.submit_failed(order, e.to_string(), now).await,
            Ok(ack) if ack.status == AckStatus::Rejected => {
                let reason = ack
                    .reason
                    .unwrap_or_else(|| "rejected by broker".to_string());
                self.consecutive_broker_errors.store(0, Ordering::SeqCst);
                self.submit_failed(order, reason, now).await
            }
            Ok(ack) => {
                self.consecutive_broker_errors.store(0, Ordering::SeqCst);
                order.broker_ref = Some(ack.broker_ref.clone());
                if let Err(e) = self.apply_transition(&mut order, OrderStatus::Acknowledged, now) {
                    return RouteOutcome::Failed {
                        order,
                        error: e.to_string(),
                    };
                }
                self.ledger.record_ack(&order, &ack.broker_ref);
                self.bus
                    .publish(Event::OrderAcknowledged {
                        intent_id: order.intent_id,
                        order_id: order.order_id,
                        broker_ref: ack.broker_ref.clone(),
                    })
                    .ok();

                match ack.fill {
                    None => RouteOutcome::Accepted { order },
                    Some(bf) => {
                        let partial = bf.size < order.size;
                        let next = if partial {
                            OrderStatus::PartiallyFilled
                        } else {
                            OrderStatus::Filled
                        };
                        order.fill_price = Some(bf.price);
                        if let Err(e) = self.apply_transition(&mut order, next, bf.ts) {
                            return RouteOutcome::Failed {
                                order,
                                error: e.to_string(),
                            };
                        }

                        let fill = Fill {
                            order_id: order.order_id,
                            symbol: order.symbol.clone(),
                            ts: bf.ts,
                            price: bf.price,
                            size: bf.size,
                            is_close: false,
                            pnl: None,
                            fees: bf.fees,
                            strategy_id: order.strategy_id.clone(),
                        };
                        self.ledger.record_fill(&fill);
                        self.account.record_trade(bf.ts);
                        self.bus.publish(Event::OrderFilled(fill.clone())).ok();

                        // Track locally right away; in live mode the next
                        // reconciliation pass overwrites this with broker
                        // truth.
                        let mut position = Position::open(
                            &ack.broker_ref,
                            &order.symbol,
                            order.side,
                            bf.size,
                            bf.price,
                            bf.ts,
                            order.sl_price,
                            order.tp_price,
                            &order.strategy_id,
                        );
                        position.source_order_id = Some(order.order_id);
                        self.positions.insert(position);

                        if partial {
                            RouteOutcome::PartiallyFilled { order, fill }
                        } else {
                            RouteOutcome::Filled { order, fill }
                        }
                    }
                }
            }
        }
    }

    async fn submit_failed(
        &self,
        mut order: Order,
        error_msg: String,
        now: DateTime<Utc>,
    ) -> RouteOutcome {
        error!("[ROUTER] submission failed for {}: {}", order.order_id, error_msg);
        order.rejection_reason = Some(error_msg.clone());
        // A transition failure here means the order was already terminal;
        // apply_transition has logged and ledger-recorded it.
        let _ = self.apply_transition(&mut order, OrderStatus::SubmitFailed, now);
        self.ledger
            .record_error(&error_msg, Some(order.intent_id), Some(order.order_id));
        self.bus
            .publish(Event::SubmitFailed {
                intent_id: order.intent_id,
                order_id: order.order_id,
                error: error_msg.clone(),
            })
            .ok();

        // Repeated broker failures escalate to the kill switch.
        let streak = self.consecutive_broker_errors.fetch_add(1, Ordering::SeqCst) + 1;
        if streak >= self.settings.broker_error_threshold {
            self.trip_kill_switch("repeated_broker_errors", "router").await;
        }

        RouteOutcome::Failed {
            order,
            error: error_msg,
        }
    }

    async fn trip_kill_switch(&self, reason: &str, by: &str) {
        if !self.safety.kill_switch.activate(reason, by) {
            return;
        }
        self.safety.disarm();
        self.ledger.record_kill_switch(true, reason, by);
        self.bus
            .publish(Event::KillSwitchActivated {
                reason: reason.to_string(),
                by: by.to_string(),
                at: Utc::now(),
            })
            .ok();

        if self.settings.close_on_kill_switch {
            self.close_all_positions().await;
        }
    }

    async fn close_all_positions(&self) {
        let positions = self.positions.all();
        if positions.is_empty() {
            return;
        }
        warn!(
            "[ROUTER] kill switch: liquidating {} open positions",
            positions.len()
        );
        for position in positions {
            let mut closed = false;
            for attempt in 1..=3u32 {
                match self.close_position(&position.position_id, None).await {
                    Ok(_) => {
                        closed = true;
                        break;
                    }
                    Err(e) => {
                        error!(
                            "[ROUTER] failed to close {} (attempt {}/3): {}",
                            position.position_id, attempt, e
                        );
                    }
                }
            }
            if !closed {
                error!(
                    "[ROUTER] kill switch: position {} could not be closed",
                    position.position_id
                );
            }
        }
    }
}
