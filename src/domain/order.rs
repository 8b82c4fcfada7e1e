use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::signal::Direction;
use crate::error::{TransitionError, ValidationError};

/// Order direction. Unlike [`Direction`], a side is never `Hold`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl TryFrom<Direction> for Side {
    type Error = ValidationError;

    fn try_from(d: Direction) -> Result<Self, Self::Error> {
        match d {
            Direction::Buy => Ok(Side::Buy),
            Direction::Sell => Ok(Side::Sell),
            Direction::Hold => Err(ValidationError::HoldNotRoutable),
        }
    }
}

/// A proposed trade, created from a non-hold signal.
///
/// `intent_id` is the idempotency key: the router rejects a second intent
/// with the same id inside the dedup window without touching the broker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderIntent {
    pub intent_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub requested_size: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub strategy_id: String,
    pub created_at: DateTime<Utc>,
}

impl OrderIntent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: &str,
        side: Side,
        requested_size: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        strategy_id: &str,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self::with_id(
            Uuid::new_v4(),
            symbol,
            side,
            requested_size,
            stop_loss,
            take_profit,
            strategy_id,
            created_at,
        )
    }

    /// Construct with an explicit id. Backtests use this to derive ids from
    /// the run seed so repeated runs are byte-identical.
    #[allow(clippy::too_many_arguments)]
    pub fn with_id(
        intent_id: Uuid,
        symbol: &str,
        side: Side,
        requested_size: Decimal,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
        strategy_id: &str,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            intent_id,
            symbol: symbol.to_string(),
            side,
            requested_size,
            stop_loss,
            take_profit,
            strategy_id: strategy_id.to_string(),
            created_at,
        }
    }
}

/// Order lifecycle states.
///
/// Created -> RiskPending -> {Rejected | Submitted}
/// Submitted -> {Acknowledged | SubmitFailed}
/// Acknowledged -> {Filled | PartiallyFilled}
/// PartiallyFilled -> Filled
///
/// Terminal: Rejected, Filled, SubmitFailed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Created,
    RiskPending,
    Rejected,
    Submitted,
    Acknowledged,
    PartiallyFilled,
    Filled,
    SubmitFailed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Rejected | OrderStatus::Filled | OrderStatus::SubmitFailed
        )
    }
}

/// Whether `from -> to` is a legal lifecycle transition.
pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Created, RiskPending)
            | (RiskPending, Rejected)
            | (RiskPending, Submitted)
            | (Submitted, Acknowledged)
            | (Submitted, SubmitFailed)
            | (Acknowledged, Filled)
            | (Acknowledged, PartiallyFilled)
            | (PartiallyFilled, Filled)
    )
}

/// A risk-approved, broker-addressed order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Uuid,
    pub intent_id: Uuid,
    pub symbol: String,
    pub side: Side,
    /// Size after risk capping.
    pub size: Decimal,
    pub status: OrderStatus,
    pub fill_price: Option<Decimal>,
    pub sl_price: Option<Decimal>,
    pub tp_price: Option<Decimal>,
    pub strategy_id: String,
    pub created_at: DateTime<Utc>,
    /// Broker-assigned reference, set on acknowledgement.
    pub broker_ref: Option<String>,
    pub rejection_reason: Option<String>,
    pub status_history: Vec<(OrderStatus, DateTime<Utc>)>,
}

impl Order {
    /// Derive an order from its intent. The order id is a v5 UUID of the
    /// intent id, so deterministic intents yield deterministic orders.
    pub fn from_intent(intent: &OrderIntent) -> Self {
        Self {
            order_id: Uuid::new_v5(&Uuid::NAMESPACE_OID, intent.intent_id.as_bytes()),
            intent_id: intent.intent_id,
            symbol: intent.symbol.clone(),
            side: intent.side,
            size: intent.requested_size,
            status: OrderStatus::Created,
            fill_price: None,
            sl_price: intent.stop_loss,
            tp_price: intent.take_profit,
            strategy_id: intent.strategy_id.clone(),
            created_at: intent.created_at,
            broker_ref: None,
            rejection_reason: None,
            status_history: Vec::new(),
        }
    }

    /// Apply a lifecycle transition, recording the previous state.
    pub fn transition(
        &mut self,
        to: OrderStatus,
        ts: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if !can_transition(self.status, to) {
            return Err(TransitionError {
                order_id: self.order_id,
                from: self.status,
                to,
            });
        }
        self.status_history.push((self.status, ts));
        self.status = to;
        Ok(())
    }
}
