//! Risk engine tests: check order, capping, and each rejection reason.

use std::collections::HashMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::RiskLimits;
use crate::domain::{AccountState, OrderIntent, Position, Side};
use crate::error::RiskRejection;
use crate::services::risk::{RiskEngine, RiskVerdict};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

fn limits() -> RiskLimits {
    RiskLimits {
        require_stop_loss: true,
        max_position_size: dec!(5),
        max_concurrent_positions: 3,
        max_daily_loss_pct: dec!(2),
        max_trades_per_hour: 10,
        per_symbol_exposure_cap: dec!(100000),
    }
}

fn position(symbol: &str, size: Decimal, entry: Decimal) -> Position {
    Position::open(
        &format!("DEAL-{}", symbol),
        symbol,
        Side::Buy,
        size,
        entry,
        now(),
        Some(entry * dec!(0.99)),
        None,
        "test_bot",
    )
}

fn account(balance: Decimal, pnl_today: Decimal, positions: Vec<Position>) -> AccountState {
    AccountState {
        balance,
        realized_pnl_today: pnl_today,
        open_positions: positions,
        recent_trades: Vec::new(),
        marks: HashMap::new(),
        refreshed_at: now(),
    }
}

fn intent(size: Decimal, stop_loss: Option<Decimal>) -> OrderIntent {
    OrderIntent::new("EURUSD", Side::Buy, size, stop_loss, None, "test_bot", now())
}

fn rejection(verdict: RiskVerdict) -> (RiskRejection, bool) {
    match verdict {
        RiskVerdict::Rejected {
            rejection,
            trip_kill_switch,
        } => (rejection, trip_kill_switch),
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[test]
fn missing_stop_loss_rejected() {
    let engine = RiskEngine::new(limits());
    let verdict = engine.evaluate(&intent(dec!(1), None), &account(dec!(10000), dec!(0), vec![]), now());
    let (rej, trip) = rejection(verdict);
    assert_eq!(rej, RiskRejection::MissingStopLoss);
    assert_eq!(rej.code(), "missing_stop_loss");
    assert!(!trip);
}

#[test]
fn stop_loss_check_wins_over_later_checks() {
    // Intent violates the position-count limit too, but check 1 fires
    // first: the ordering is fixed.
    let engine = RiskEngine::new(limits());
    let positions = vec![
        position("A", dec!(1), dec!(1)),
        position("B", dec!(1), dec!(1)),
        position("C", dec!(1), dec!(1)),
    ];
    let verdict = engine.evaluate(
        &intent(dec!(1), None),
        &account(dec!(10000), dec!(-500), positions),
        now(),
    );
    let (rej, _) = rejection(verdict);
    assert_eq!(rej, RiskRejection::MissingStopLoss);
}

#[test]
fn oversized_order_is_capped_not_rejected() {
    let engine = RiskEngine::new(limits());
    let verdict = engine.evaluate(
        &intent(dec!(12), Some(dec!(1.09))),
        &account(dec!(10000), dec!(0), vec![]),
        now(),
    );
    match verdict {
        RiskVerdict::Approved { size, reason_codes } => {
            assert_eq!(size, dec!(5));
            assert!(reason_codes.contains(&"size_capped_to_max".to_string()));
        }
        other => panic!("expected approval, got {:?}", other),
    }
}

#[test]
fn max_positions_rejected() {
    let engine = RiskEngine::new(limits());
    let positions = vec![
        position("A", dec!(1), dec!(1)),
        position("B", dec!(1), dec!(1)),
        position("C", dec!(1), dec!(1)),
    ];
    let verdict = engine.evaluate(
        &intent(dec!(1), Some(dec!(1.09))),
        &account(dec!(10000), dec!(0), positions),
        now(),
    );
    let (rej, trip) = rejection(verdict);
    assert_eq!(rej, RiskRejection::MaxPositionsReached { limit: 3 });
    assert!(!trip);
}

#[test]
fn daily_loss_breach_rejects_and_trips_kill_switch() {
    // Balance 10000, limit 2% -> threshold 200. Loss of 205 breaches.
    let engine = RiskEngine::new(limits());
    let verdict = engine.evaluate(
        &intent(dec!(1), Some(dec!(1.09))),
        &account(dec!(10000), dec!(-205), vec![]),
        now(),
    );
    let (rej, trip) = rejection(verdict);
    assert_eq!(rej.code(), "daily_loss_limit_reached");
    assert!(trip);
}

#[test]
fn daily_loss_under_limit_approved() {
    let engine = RiskEngine::new(limits());
    let verdict = engine.evaluate(
        &intent(dec!(1), Some(dec!(1.09))),
        &account(dec!(10000), dec!(-199), vec![]),
        now(),
    );
    assert!(verdict.is_approved());
}

#[test]
fn daily_profit_never_trips_loss_limit() {
    let engine = RiskEngine::new(limits());
    let verdict = engine.evaluate(
        &intent(dec!(1), Some(dec!(1.09))),
        &account(dec!(10000), dec!(500), vec![]),
        now(),
    );
    assert!(verdict.is_approved());
}

#[test]
fn trade_rate_limit_rejected() {
    let engine = RiskEngine::new(limits());
    let mut acct = account(dec!(10000), dec!(0), vec![]);
    acct.recent_trades = (0..10).map(|i| now() - Duration::minutes(i)).collect();
    let verdict = engine.evaluate(&intent(dec!(1), Some(dec!(1.09))), &acct, now());
    let (rej, _) = rejection(verdict);
    assert_eq!(rej, RiskRejection::TradeRateLimitExceeded { limit: 10 });
}

#[test]
fn trades_older_than_an_hour_do_not_count() {
    let engine = RiskEngine::new(limits());
    let mut acct = account(dec!(10000), dec!(0), vec![]);
    acct.recent_trades = (0..10)
        .map(|i| now() - Duration::minutes(61 + i))
        .collect();
    let verdict = engine.evaluate(&intent(dec!(1), Some(dec!(1.09))), &acct, now());
    assert!(verdict.is_approved());
}

#[test]
fn symbol_exposure_cap_rejected() {
    let engine = RiskEngine::new(limits());
    let mut acct = account(
        dec!(1000000),
        dec!(0),
        vec![position("EURUSD", dec!(96), dec!(1000))],
    );
    acct.marks.insert("EURUSD".to_string(), dec!(1000));
    // Existing 96_000 + proposed 4 * 1000 reaches the 100_000 cap.
    let verdict = engine.evaluate(&intent(dec!(4), Some(dec!(990))), &acct, now());
    let (rej, _) = rejection(verdict);
    assert_eq!(rej.code(), "symbol_exposure_cap_exceeded");
}

#[test]
fn exposure_in_other_symbols_does_not_count() {
    let engine = RiskEngine::new(limits());
    let mut acct = account(
        dec!(1000000),
        dec!(0),
        vec![position("GBPUSD", dec!(96), dec!(1000))],
    );
    acct.marks.insert("EURUSD".to_string(), dec!(1000));
    let verdict = engine.evaluate(&intent(dec!(4), Some(dec!(990))), &acct, now());
    assert!(verdict.is_approved());
}
