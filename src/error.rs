//! Error taxonomy for the trading core.
//!
//! Structured, typed errors instead of generic Box<dyn Error>. Every path
//! that can refuse an order names its reason; nothing is silently dropped.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::order::OrderStatus;

/// Malformed intent, rejected locally before it can reach risk or broker.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("hold signals are not routable")]
    HoldNotRoutable,

    #[error("order size {size} for {symbol} must be positive")]
    NonPositiveSize { symbol: String, size: Decimal },

    #[error("duplicate intent_id {intent_id} (seen {age_secs}s ago)")]
    DuplicateIntent { intent_id: Uuid, age_secs: i64 },
}

/// Risk engine rejection with a stable reason code per check.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RiskRejection {
    #[error("stop loss is required but not provided")]
    MissingStopLoss,

    #[error("max concurrent positions ({limit}) reached")]
    MaxPositionsReached { limit: usize },

    #[error("daily loss {loss} reached {limit_pct}% of balance {balance}")]
    DailyLossLimitReached {
        loss: Decimal,
        limit_pct: Decimal,
        balance: Decimal,
    },

    #[error("trade rate limit ({limit}/hour) reached")]
    TradeRateLimitExceeded { limit: usize },

    #[error("exposure for {symbol} would reach cap {cap}")]
    SymbolExposureCapExceeded { symbol: String, cap: Decimal },
}

impl RiskRejection {
    /// Stable machine-readable reason code, recorded in the ledger.
    pub fn code(&self) -> &'static str {
        match self {
            RiskRejection::MissingStopLoss => "missing_stop_loss",
            RiskRejection::MaxPositionsReached { .. } => "max_positions_reached",
            RiskRejection::DailyLossLimitReached { .. } => "daily_loss_limit_reached",
            RiskRejection::TradeRateLimitExceeded { .. } => "trade_rate_limit_exceeded",
            RiskRejection::SymbolExposureCapExceeded { .. } => "symbol_exposure_cap_exceeded",
        }
    }
}

/// Illegal order state-machine transition. A programming or integration
/// bug: logged as an error and fails the specific order only.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid order transition {from:?} -> {to:?} for order {order_id}")]
pub struct TransitionError {
    pub order_id: Uuid,
    pub from: OrderStatus,
    pub to: OrderStatus,
}

/// Failures surfaced by a broker adapter. Always typed; adapters must not
/// let raw transport errors cross into router logic.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrokerError {
    #[error("not connected to broker")]
    NotConnected,

    #[error("broker submission timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("order rejected by broker: {reason}")]
    Rejected { reason: String },

    #[error("authentication failed: {reason}")]
    AuthFailed { reason: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("position not found: {position_id}")]
    PositionNotFound { position_id: String },

    #[error("no market data for {symbol}")]
    NoMarketData { symbol: String },
}

/// Failure inside a strategy. Isolates that symbol/strategy pair for the
/// rest of the run; never aborts the whole run or sweep.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrategyError {
    #[error("not enough data: have {have}, need {need}")]
    InsufficientData { have: usize, need: usize },

    #[error("strategy failed: {message}")]
    Failed { message: String },
}

/// Control-surface errors (connect/arm/disarm lifecycle).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlError {
    #[error("not connected to broker")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("arm confirmation required (confirm=true)")]
    ConfirmationRequired,

    #[error("kill switch is active")]
    KillSwitchActive,
}

/// Top-level engine error.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
