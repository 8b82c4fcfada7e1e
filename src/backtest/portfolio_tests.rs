//! Portfolio accounting tests.

use std::collections::HashMap;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use crate::backtest::portfolio::Portfolio;
use crate::domain::{Position, Side};

fn ts() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn long_position(id: &str, entry: Decimal, size: Decimal) -> Position {
    Position::open(
        id,
        "EURUSD",
        Side::Buy,
        size,
        entry,
        ts(),
        Some(entry - dec!(0.01)),
        Some(entry + dec!(0.02)),
        "test_bot",
    )
}

fn marks(price: Decimal) -> HashMap<String, Decimal> {
    let mut m = HashMap::new();
    m.insert("EURUSD".to_string(), price);
    m
}

#[test]
fn equity_is_cash_plus_unrealized() {
    let mut portfolio = Portfolio::new(dec!(10000));
    assert_eq!(portfolio.equity(), dec!(10000));

    portfolio.open_position(long_position("P1", dec!(1.10), dec!(100)));
    portfolio.update_marks(&marks(dec!(1.12)));

    // Unrealized: (1.12 - 1.10) * 100 = 2
    assert_eq!(portfolio.unrealized_pnl(), dec!(2));
    assert_eq!(portfolio.equity(), dec!(10002));
    assert_eq!(portfolio.cash, dec!(10000));
}

#[test]
fn closing_realizes_pnl_into_cash() {
    let mut portfolio = Portfolio::new(dec!(10000));
    portfolio.open_position(long_position("P1", dec!(1.10), dec!(100)));
    portfolio.update_marks(&marks(dec!(1.12)));

    let trade = portfolio
        .close_position(
            "EURUSD",
            "test_bot",
            dec!(1.12),
            ts(),
            "signal",
            dec!(0.5),
            Uuid::new_v4(),
        )
        .unwrap();

    // (1.12 - 1.10) * 100 - 0.5 fees = 1.5
    assert_eq!(trade.pnl, dec!(1.5));
    assert_eq!(portfolio.cash, dec!(10001.5));
    assert_eq!(portfolio.realized_pnl, dec!(1.5));
    assert_eq!(portfolio.position_count(), 0);
    assert_eq!(portfolio.equity(), dec!(10001.5));
}

#[test]
fn short_position_profits_when_price_falls() {
    let mut portfolio = Portfolio::new(dec!(10000));
    let mut position = long_position("P1", dec!(1.10), dec!(100));
    position.side = Side::Sell;
    position.stop_loss = Some(dec!(1.12));
    position.take_profit = Some(dec!(1.05));
    portfolio.open_position(position);
    portfolio.update_marks(&marks(dec!(1.08)));

    assert_eq!(portfolio.unrealized_pnl(), dec!(2));
}

#[test]
fn close_without_position_returns_none() {
    let mut portfolio = Portfolio::new(dec!(10000));
    assert!(portfolio
        .close_position(
            "EURUSD",
            "test_bot",
            dec!(1.1),
            ts(),
            "signal",
            Decimal::ZERO,
            Uuid::new_v4(),
        )
        .is_none());
}

#[test]
fn drawdown_tracks_high_water_mark() {
    let mut portfolio = Portfolio::new(dec!(10000));
    portfolio.open_position(long_position("P1", dec!(1.10), dec!(1000)));

    portfolio.update_marks(&marks(dec!(1.12)));
    assert_eq!(portfolio.high_water_mark, dec!(10020));
    assert_eq!(portfolio.drawdown(), Decimal::ZERO);

    portfolio.update_marks(&marks(dec!(1.11)));
    // Equity fell from 10020 to 10010.
    assert_eq!(portfolio.drawdown(), dec!(10));
    assert!(portfolio.drawdown_pct() > Decimal::ZERO);
}

#[test]
fn equity_curve_is_append_only() {
    let mut portfolio = Portfolio::new(dec!(10000));
    portfolio.record_equity_point(ts());
    portfolio.record_equity_point(ts() + chrono::Duration::minutes(1));

    assert_eq!(portfolio.equity_curve.len(), 2);
    assert_eq!(portfolio.equity_curve[0].equity, dec!(10000));
}

#[test]
fn exits_trigger_on_stop_loss_and_take_profit() {
    let mut portfolio = Portfolio::new(dec!(10000));
    // Long from 1.10, SL 1.09, TP 1.12.
    portfolio.open_position(long_position("P1", dec!(1.10), dec!(100)));

    assert!(portfolio.exits_triggered("EURUSD", dec!(1.10)).is_empty());

    let sl = portfolio.exits_triggered("EURUSD", dec!(1.085));
    assert_eq!(sl.len(), 1);
    assert_eq!(sl[0].3, "stop_loss");

    let tp = portfolio.exits_triggered("EURUSD", dec!(1.125));
    assert_eq!(tp.len(), 1);
    assert_eq!(tp[0].3, "take_profit");
}

#[test]
fn mae_and_mfe_track_excursions() {
    let mut portfolio = Portfolio::new(dec!(10000));
    portfolio.open_position(long_position("P1", dec!(1.10), dec!(100)));

    portfolio.update_marks(&marks(dec!(1.095)));
    portfolio.update_marks(&marks(dec!(1.115)));
    portfolio.update_marks(&marks(dec!(1.105)));

    let trade = portfolio
        .close_position(
            "EURUSD",
            "test_bot",
            dec!(1.105),
            ts(),
            "signal",
            Decimal::ZERO,
            Uuid::new_v4(),
        )
        .unwrap();

    // Worst: (1.095-1.10)*100 = -0.5; best: (1.115-1.10)*100 = 1.5
    assert_eq!(trade.mae, dec!(-0.5));
    assert_eq!(trade.mfe, dec!(1.5));
}

#[test]
fn positions_are_keyed_per_strategy() {
    let mut portfolio = Portfolio::new(dec!(10000));
    let mut a = long_position("P1", dec!(1.10), dec!(1));
    a.strategy_id = "bot_a".to_string();
    let mut b = long_position("P2", dec!(1.10), dec!(1));
    b.strategy_id = "bot_b".to_string();
    portfolio.open_position(a);
    portfolio.open_position(b);

    assert_eq!(portfolio.position_count(), 2);
    assert!(portfolio.position("EURUSD", "bot_a").is_some());
    assert!(portfolio.position("EURUSD", "bot_b").is_some());
    assert!(portfolio.position("EURUSD", "bot_c").is_none());
}
