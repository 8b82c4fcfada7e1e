pub mod sim;

pub use sim::{FillModel, FillQuote, SimBroker};


use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{Order, Side};
use crate::error::BrokerError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountSummary {
    pub account_id: String,
    pub balance: Decimal,
    pub currency: String,
}

/// A position as the broker reports it. This is the authoritative view in
/// live mode; reconciliation overwrites local state with it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub position_id: String,
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub opened_at: DateTime<Utc>,
    pub unrealized_pnl: Option<Decimal>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckStatus {
    Accepted,
    Rejected,
}

#[derive(Clone, Debug)]
pub struct BrokerFill {
    pub price: Decimal,
    pub size: Decimal,
    pub fees: Decimal,
    pub ts: DateTime<Utc>,
}

/// Broker response to a submission or close.
#[derive(Clone, Debug)]
pub struct OrderAck {
    pub broker_ref: String,
    pub status: AckStatus,
    pub fill: Option<BrokerFill>,
    pub reason: Option<String>,
}

/// The single contract both execution backends implement: the deterministic
/// simulator and the live client. Router code never branches on which one
/// it holds.
///
/// Implementations surface failures as typed [`BrokerError`]s; panics or raw
/// transport errors must never cross this boundary.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn account(&self) -> Result<AccountSummary, BrokerError>;

    async fn positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;

    async fn submit(&self, order: &Order) -> Result<OrderAck, BrokerError>;

    /// Close (part of) an open position. `size: None` closes it fully.
    async fn close(
        &self,
        position_id: &str,
        size: Option<Decimal>,
    ) -> Result<OrderAck, BrokerError>;
}
