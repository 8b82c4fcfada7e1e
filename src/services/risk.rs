//! Risk engine: the hard gate in front of every order.
//!
//! `evaluate` is a pure, synchronous function of the intent, an account
//! snapshot, and the configured limits. Checks run in a fixed order and the
//! first failure wins, which keeps rejection reasons deterministic and lets
//! tests assert on exactly which limit fired.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use crate::config::RiskLimits;
use crate::domain::{AccountState, OrderIntent};
use crate::error::RiskRejection;

/// Outcome of risk evaluation.
#[derive(Clone, Debug, PartialEq)]
pub enum RiskVerdict {
    Approved {
        /// Size after capping; may be smaller than requested.
        size: Decimal,
        reason_codes: Vec<String>,
    },
    Rejected {
        rejection: RiskRejection,
        /// Set on a daily-loss breach: the router must trip the kill switch.
        trip_kill_switch: bool,
    },
}

impl RiskVerdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, RiskVerdict::Approved { .. })
    }
}

pub struct RiskEngine {
    limits: RiskLimits,
}

impl RiskEngine {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Validate an intent against all limits.
    ///
    /// Check order (fixed):
    /// 1. stop loss required and missing -> reject
    /// 2. size above max position size -> cap, continue
    /// 3. open position count at limit -> reject
    /// 4. daily realized loss at limit -> reject and trip kill switch
    /// 5. trailing-hour trade count at limit -> reject
    /// 6. per-symbol exposure at cap -> reject
    pub fn evaluate(
        &self,
        intent: &OrderIntent,
        account: &AccountState,
        now: DateTime<Utc>,
    ) -> RiskVerdict {
        let mut reason_codes: Vec<String> = Vec::new();

        // 1. Stop loss requirement
        if self.limits.require_stop_loss && intent.stop_loss.is_none() {
            return RiskVerdict::Rejected {
                rejection: RiskRejection::MissingStopLoss,
                trip_kill_switch: false,
            };
        }

        // 2. Cap to max position size (not a rejection)
        let mut size = intent.requested_size;
        if size > self.limits.max_position_size {
            size = self.limits.max_position_size;
            reason_codes.push("size_capped_to_max".to_string());
            debug!(
                "[RISK] size capped: {} -> {} ({})",
                intent.requested_size, size, intent.symbol
            );
        }

        // 3. Concurrent position count
        if account.open_position_count() >= self.limits.max_concurrent_positions {
            return RiskVerdict::Rejected {
                rejection: RiskRejection::MaxPositionsReached {
                    limit: self.limits.max_concurrent_positions,
                },
                trip_kill_switch: false,
            };
        }

        // 4. Daily loss limit; a breach is the automatic kill-switch trigger
        if account.balance > Decimal::ZERO {
            let loss = (-account.realized_pnl_today).max(Decimal::ZERO);
            let threshold =
                account.balance * self.limits.max_daily_loss_pct / Decimal::from(100u32);
            if loss >= threshold && threshold > Decimal::ZERO {
                return RiskVerdict::Rejected {
                    rejection: RiskRejection::DailyLossLimitReached {
                        loss,
                        limit_pct: self.limits.max_daily_loss_pct,
                        balance: account.balance,
                    },
                    trip_kill_switch: true,
                };
            }
        }

        // 5. Trade rate limit (trailing hour)
        if account.trades_in_last_hour(now) >= self.limits.max_trades_per_hour {
            return RiskVerdict::Rejected {
                rejection: RiskRejection::TradeRateLimitExceeded {
                    limit: self.limits.max_trades_per_hour,
                },
                trip_kill_switch: false,
            };
        }

        // 6. Per-symbol exposure cap
        let existing = account.symbol_exposure(&intent.symbol);
        let proposed = size * account.mark(&intent.symbol);
        if existing + proposed >= self.limits.per_symbol_exposure_cap {
            return RiskVerdict::Rejected {
                rejection: RiskRejection::SymbolExposureCapExceeded {
                    symbol: intent.symbol.clone(),
                    cap: self.limits.per_symbol_exposure_cap,
                },
                trip_kill_switch: false,
            };
        }

        RiskVerdict::Approved { size, reason_codes }
    }
}
