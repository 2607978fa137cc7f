//! Performance metrics for backtesting.
//!
//! This module provides tools to calculate:
//! - Total return
//! - Max drawdown
//! - Profit factor
//! - Sharpe ratio
//! - Win rate
//!
//! It needs to enable `metrics` feature to use it.

use std::fmt;

use crate::BasisPoints;
use crate::engine::{BacktestResult, Trade};

/// Summary statistics of a finished run.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// Starting cash.
    pub initial_equity: f64,
    /// Equity after any forced close.
    pub final_equity: f64,
    /// `final_equity - initial_equity`.
    pub net_pnl: f64,
    /// Sum of entry and exit fees over all trades.
    pub fees_paid: f64,
    /// Net return in percent.
    pub total_return_pct: f64,
    /// Largest recorded drawdown in percent.
    pub max_drawdown_pct: f64,
    /// Number of closed trades.
    pub num_trades: usize,
    /// Share of trades with positive net P&L, in percent.
    pub win_rate_pct: f64,
    /// Gross profits over gross losses; infinite without losses.
    pub profit_factor: f64,
    /// Sharpe ratio of per-point equity returns (risk-free rate 0).
    pub sharpe_ratio: f64,
}

impl Report {
    /// Computes the report of `result` for a run that started with `initial_cash`.
    pub fn new(result: &BacktestResult, initial_cash: f64) -> Self {
        let final_equity = result.final_equity;
        Self {
            initial_equity: initial_cash,
            final_equity,
            net_pnl: final_equity - initial_cash,
            fees_paid: result.trades.iter().map(|t| t.fee_total).sum(),
            total_return_pct: if initial_cash != 0.0 {
                initial_cash.change(final_equity)
            } else {
                0.0
            },
            max_drawdown_pct: max_drawdown(&result.drawdown),
            num_trades: result.trades.len(),
            win_rate_pct: win_rate(&result.trades),
            profit_factor: profit_factor(&result.trades),
            sharpe_ratio: sharpe_ratio(initial_cash, &result.equity, 0.0),
        }
    }
}

/// Largest drawdown fraction in `drawdowns`, in percent.
pub fn max_drawdown(drawdowns: &[f64]) -> f64 {
    drawdowns.iter().copied().fold(0.0, f64::max) * 100.0
}

/// Computes the profit factor.
pub fn profit_factor(trades: &[Trade]) -> f64 {
    let (gains, losses) = trades.iter().fold((0.0, 0.0), |(gains, losses), trade| {
        if trade.pnl > 0.0 {
            (gains + trade.pnl, losses)
        } else {
            (gains, losses + trade.pnl.abs())
        }
    });

    if losses == 0.0 {
        return f64::INFINITY;
    }
    gains / losses
}

/// Computes the Sharpe ratio, a measure of risk-adjusted return.
///
/// Returns are taken between consecutive equity points, the first one against `initial`.
/// The result is `NaN` when there are no returns or they do not vary.
pub fn sharpe_ratio(initial: f64, equity: &[f64], risk_free_rate: f64) -> f64 {
    let mut previous = initial;
    let returns: Vec<f64> = equity
        .iter()
        .map(|&value| {
            let ret = (value - previous) / previous;
            previous = value;
            ret
        })
        .collect();

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let std_dev = (returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n).sqrt();
    if std_dev == 0.0 {
        return f64::NAN;
    }
    (mean - risk_free_rate) / std_dev
}

/// Computes the win rate as a percentage of winning trades.
pub fn win_rate(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let wins = trades.iter().filter(|t| t.is_win()).count();
    wins as f64 / trades.len() as f64 * 100.0
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Backtest Metrics ===")?;
        writeln!(f, "Initial Equity: {:.2}", self.initial_equity)?;
        writeln!(f, "Final Equity: {:.2}", self.final_equity)?;
        writeln!(f, "Net P&L: {:.2}", self.net_pnl)?;
        writeln!(f, "Fees paid: {:.2}", self.fees_paid)?;
        #[allow(clippy::writeln_empty_string)]
        writeln!(f, "")?;
        writeln!(f, "Total Return: {:.2}%", self.total_return_pct)?;
        writeln!(f, "Max Drawdown: {:.2}%", self.max_drawdown_pct)?;
        writeln!(f, "Trades: {}", self.num_trades)?;
        writeln!(f, "Win Rate: {:.2}%", self.win_rate_pct)?;
        writeln!(f, "Profit Factor: {:.2}", self.profit_factor)?;
        writeln!(f, "Sharpe Ratio (risk-free rate = 0.0): {:.2}", self.sharpe_ratio)
    }
}

#[cfg(test)]
fn create_trade(pnl: f64) -> Trade {
    use crate::engine::PositionSide;

    Trade {
        side: PositionSide::Long,
        size: 1.0,
        entry_ts: 0,
        entry_price: 100.0,
        exit_ts: 60_000,
        exit_price: 100.0 + pnl,
        pnl,
        fee_total: 0.5,
        bars_held: 1,
    }
}

#[cfg(test)]
#[test]
fn max_drawdown_of_series() {
    assert_eq!(max_drawdown(&[0.0, 0.1, 0.25, 0.05]), 25.0);
    assert_eq!(max_drawdown(&[]), 0.0);
}

#[cfg(test)]
#[test]
fn profit_factor_cases() {
    assert_eq!(profit_factor(&[create_trade(20.0), create_trade(-10.0)]), 2.0);
    assert_eq!(profit_factor(&[create_trade(20.0)]), f64::INFINITY);
    assert_eq!(profit_factor(&[]), f64::INFINITY);
}

#[cfg(test)]
#[test]
fn sharpe_ratio_cases() {
    let sharpe = sharpe_ratio(10_000.0, &[10_000.0, 10_500.0, 10_300.0, 10_700.0], 0.0);
    assert!(sharpe > 0.0 && sharpe < 1.0);
    assert!(sharpe_ratio(10_000.0, &[], 0.0).is_nan());
    assert!(sharpe_ratio(10_000.0, &[10_000.0, 10_000.0], 0.0).is_nan());
}

#[cfg(test)]
#[test]
fn win_rate_cases() {
    assert_eq!(win_rate(&[create_trade(20.0), create_trade(-10.0)]), 50.0);
    assert_eq!(win_rate(&[create_trade(20.0)]), 100.0);
    assert_eq!(win_rate(&[]), 0.0);
}

#[cfg(test)]
#[test]
fn report_from_result() {
    let result = BacktestResult {
        equity_ts: vec![0, 1, 2],
        equity: vec![1_000.0, 1_100.0, 990.0],
        drawdown: vec![0.0, 0.0, 0.1],
        position_size: vec![0.0; 3],
        price: vec![10.0; 3],
        trades: vec![create_trade(20.0), create_trade(-10.0)],
        final_equity: 1_010.0,
        ..Default::default()
    };
    let report = Report::new(&result, 1_000.0);

    assert_eq!(report.net_pnl, 10.0);
    assert!((report.total_return_pct - 1.0).abs() < 1e-9);
    assert!((report.max_drawdown_pct - 10.0).abs() < 1e-9);
    assert_eq!(report.fees_paid, 1.0);
    assert_eq!(report.num_trades, 2);
    assert_eq!(report.win_rate_pct, 50.0);
    assert_eq!(report.profit_factor, 2.0);
    assert!(report.to_string().contains("Win Rate: 50.00%"));
}
