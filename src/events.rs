use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Bar, Fill, Side, SignalIntent};

/// How a reconciliation difference is classified.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftKind {
    /// Position exists at the broker but not locally (opened externally).
    Added,
    /// Position tracked locally but gone at the broker (closed externally).
    Removed,
    /// Same position, different size (partial close).
    Changed,
}

/// A detected discrepancy between local and broker position state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriftEvent {
    pub kind: DriftKind,
    pub position_id: String,
    pub symbol: String,
    pub local_size: Option<Decimal>,
    pub broker_size: Option<Decimal>,
}

/// Snapshot of execution state exposed to the control surface.
#[derive(Clone, Debug, Serialize)]
pub struct StatusSnapshot {
    pub connected: bool,
    pub armed: bool,
    pub kill_switch_active: bool,
    pub open_positions: usize,
    pub balance: Decimal,
}

// Global event enum carried on the bus.
#[derive(Clone, Debug)]
pub enum Event {
    Bar(Bar),
    Signal {
        symbol: String,
        strategy_id: String,
        intent: SignalIntent,
    },
    IntentCreated {
        intent_id: Uuid,
        symbol: String,
        side: Side,
        size: Decimal,
    },
    OrderSubmitted {
        intent_id: Uuid,
        order_id: Uuid,
        symbol: String,
    },
    OrderAcknowledged {
        intent_id: Uuid,
        order_id: Uuid,
        broker_ref: String,
    },
    OrderRejected {
        intent_id: Uuid,
        code: String,
        reason: String,
    },
    SubmitFailed {
        intent_id: Uuid,
        order_id: Uuid,
        error: String,
    },
    OrderFilled(Fill),
    Drift(DriftEvent),
    KillSwitchActivated {
        reason: String,
        by: String,
        at: DateTime<Utc>,
    },
    KillSwitchReset {
        by: String,
    },
    ExecutionStatus {
        connected: bool,
        armed: bool,
    },
}
