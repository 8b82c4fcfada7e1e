//! Performance metrics computed once per completed run.
//!
//! Closed-form definitions over the realized returns series: Sharpe,
//! Sortino, Calmar, max drawdown, win rate, profit factor, expectancy.
//! Money stays decimal everywhere else; the ratio math here runs in f64
//! on returns derived from the decimal equity curve.

use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::backtest::portfolio::{EquityPoint, TradeRecord};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const RISK_FREE_RATE: f64 = 0.0;
/// Cap for ratios that would otherwise divide by zero volatility.
const RATIO_CAP: f64 = 99.99;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub strategy_id: Option<String>,

    // Returns
    pub total_return: f64,
    pub total_return_pct: f64,
    pub cagr: f64,

    // Risk
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub max_drawdown_duration_bars: usize,
    pub volatility: f64,

    // Trading
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub expectancy: f64,
    pub avg_trade_pnl: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub avg_bars_held: f64,
    pub time_in_market_pct: f64,
}

fn dec_f64(d: rust_decimal::Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

/// Period-over-period returns from the equity curve.
pub fn calculate_returns(equity_curve: &[EquityPoint]) -> Vec<f64> {
    if equity_curve.len() < 2 {
        return Vec::new();
    }
    equity_curve
        .windows(2)
        .map(|w| {
            let prev = dec_f64(w[0].equity);
            let curr = dec_f64(w[1].equity);
            if prev > 0.0 {
                (curr - prev) / prev
            } else {
                0.0
            }
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|r| (r - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    if variance > 0.0 {
        variance.sqrt()
    } else {
        0.0
    }
}

pub fn sharpe_ratio(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let excess = mean(returns) - RISK_FREE_RATE / periods_per_year;
    let std_dev = sample_std_dev(returns);
    if std_dev <= 0.0 {
        // Zero volatility: sign of the excess return, capped.
        return if excess > 0.0 {
            RATIO_CAP
        } else if excess < 0.0 {
            -RATIO_CAP
        } else {
            0.0
        };
    }
    excess / std_dev * periods_per_year.sqrt()
}

pub fn sortino_ratio(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let excess = mean(returns) - RISK_FREE_RATE / periods_per_year;
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    if downside.is_empty() {
        return if excess > 0.0 { RATIO_CAP } else { 0.0 };
    }
    let downside_dev =
        (downside.iter().map(|r| r.powi(2)).sum::<f64>() / downside.len() as f64).sqrt();
    if downside_dev <= 0.0 {
        return 0.0;
    }
    excess / downside_dev * periods_per_year.sqrt()
}

/// Max drawdown over the curve: (absolute, fraction, duration in bars).
pub fn max_drawdown(equity_curve: &[EquityPoint]) -> (f64, f64, usize) {
    if equity_curve.len() < 2 {
        return (0.0, 0.0, 0);
    }
    let mut max_dd = 0.0f64;
    let mut max_dd_pct = 0.0f64;
    let mut max_duration = 0usize;
    let mut current_duration = 0usize;
    let mut high_water = dec_f64(equity_curve[0].equity);

    for point in equity_curve {
        let equity = dec_f64(point.equity);
        if equity > high_water {
            high_water = equity;
            current_duration = 0;
        } else {
            current_duration += 1;
            let dd = high_water - equity;
            let dd_pct = if high_water > 0.0 { dd / high_water } else { 0.0 };
            if dd > max_dd {
                max_dd = dd;
            }
            if dd_pct > max_dd_pct {
                max_dd_pct = dd_pct;
            }
            if current_duration > max_duration {
                max_duration = current_duration;
            }
        }
    }
    (max_dd, max_dd_pct, max_duration)
}

pub fn calmar_ratio(total_return_pct: f64, max_drawdown_pct: f64, years: f64) -> f64 {
    if max_drawdown_pct <= 0.0 || years <= 0.0 {
        return 0.0;
    }
    let cagr = (1.0 + total_return_pct).powf(1.0 / years) - 1.0;
    cagr / max_drawdown_pct
}

pub fn volatility(returns: &[f64], periods_per_year: f64) -> f64 {
    sample_std_dev(returns) * periods_per_year.sqrt()
}

/// Complete metrics summary from the equity curve and trade list.
///
/// `bars_per_day` drives annualization (1440 for 1-minute bars).
pub fn compute_metrics_summary(
    equity_curve: &[EquityPoint],
    trades: &[TradeRecord],
    initial_cash: rust_decimal::Decimal,
    strategy_id: Option<&str>,
    bars_per_day: u32,
) -> MetricsSummary {
    let filtered: Vec<&TradeRecord> = match strategy_id {
        None => trades.iter().collect(),
        Some(id) => trades.iter().filter(|t| t.strategy_id == id).collect(),
    };

    let returns = calculate_returns(equity_curve);
    let initial = dec_f64(initial_cash);
    let final_equity = equity_curve
        .last()
        .map(|p| dec_f64(p.equity))
        .unwrap_or(initial);
    let total_return = final_equity - initial;
    let total_return_pct = if initial > 0.0 {
        total_return / initial
    } else {
        0.0
    };

    let periods_per_year = bars_per_day as f64 * TRADING_DAYS_PER_YEAR;
    let num_bars = equity_curve.len();
    let years = (num_bars as f64 / periods_per_year).max(1.0 / 365.0);

    let cagr = if initial > 0.0 && final_equity > 0.0 {
        (final_equity / initial).powf(1.0 / years) - 1.0
    } else {
        0.0
    };

    let (max_dd, max_dd_pct, max_dd_duration) = max_drawdown(equity_curve);

    let wins: Vec<f64> = filtered
        .iter()
        .map(|t| dec_f64(t.pnl))
        .filter(|p| *p > 0.0)
        .collect();
    let losses: Vec<f64> = filtered
        .iter()
        .map(|t| dec_f64(t.pnl))
        .filter(|p| *p < 0.0)
        .collect();

    let total_trades = filtered.len();
    let winning_trades = wins.len();
    let losing_trades = losses.len();
    let win_rate = if total_trades > 0 {
        winning_trades as f64 / total_trades as f64
    } else {
        0.0
    };
    let gross_profit: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().map(|l| l.abs()).sum();
    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        999.99
    } else {
        0.0
    };
    let avg_win = if winning_trades > 0 {
        gross_profit / winning_trades as f64
    } else {
        0.0
    };
    let avg_loss = if losing_trades > 0 {
        gross_loss / losing_trades as f64
    } else {
        0.0
    };
    let loss_rate = if total_trades > 0 {
        losing_trades as f64 / total_trades as f64
    } else {
        0.0
    };
    let expectancy = win_rate * avg_win - loss_rate * avg_loss;
    let avg_trade_pnl = if total_trades > 0 {
        (gross_profit - gross_loss) / total_trades as f64
    } else {
        0.0
    };
    let largest_win = wins.iter().copied().fold(0.0f64, f64::max);
    let largest_loss = losses.iter().copied().fold(0.0f64, f64::min);
    let total_bars_held: u32 = filtered.iter().map(|t| t.bars_held).sum();
    let avg_bars_held = if total_trades > 0 {
        total_bars_held as f64 / total_trades as f64
    } else {
        0.0
    };
    let time_in_market_pct = if num_bars > 0 {
        total_bars_held as f64 / num_bars as f64
    } else {
        0.0
    };

    MetricsSummary {
        strategy_id: strategy_id.map(|s| s.to_string()),
        total_return,
        total_return_pct,
        cagr,
        sharpe_ratio: sharpe_ratio(&returns, periods_per_year),
        sortino_ratio: sortino_ratio(&returns, periods_per_year),
        calmar_ratio: calmar_ratio(total_return_pct, max_dd_pct, years),
        max_drawdown: max_dd,
        max_drawdown_pct: max_dd_pct,
        max_drawdown_duration_bars: max_dd_duration,
        volatility: volatility(&returns, periods_per_year),
        total_trades,
        winning_trades,
        losing_trades,
        win_rate,
        profit_factor,
        expectancy,
        avg_trade_pnl,
        avg_win,
        avg_loss,
        largest_win,
        largest_loss,
        avg_bars_held,
        time_in_market_pct,
    }
}
