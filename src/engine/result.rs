use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::{LogEntry, LogLevel, Order, Trade};

/// How a run terminated.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// All bars up to the end of the window were processed.
    Done,
    /// The cancel flag was observed at a poll point.
    Canceled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => write!(f, "DONE"),
            Self::Canceled => write!(f, "CANCELED"),
        }
    }
}

/// One recorded point of the equity curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquityPoint {
    /// Bar timestamp.
    pub ts: i64,
    /// Marked equity at the bar close.
    pub equity: f64,
    /// Drawdown from peak equity, as a fraction.
    pub drawdown: f64,
    /// Signed position size after settlement.
    pub position_size: f64,
    /// Bar close price.
    pub price: f64,
}

/// Accumulated output of a run.
///
/// The five curve arrays always have the same length; use [`BacktestResult::points`]
/// to iterate them together.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BacktestResult {
    /// Timestamps of the recorded bars.
    pub equity_ts: Vec<i64>,
    /// Equity at each recorded bar.
    pub equity: Vec<f64>,
    /// Drawdown at each recorded bar.
    pub drawdown: Vec<f64>,
    /// Signed position size at each recorded bar.
    pub position_size: Vec<f64>,
    /// Close price at each recorded bar.
    pub price: Vec<f64>,
    /// Filled and rejected orders, in settlement order.
    pub orders: Vec<Order>,
    /// Closed trades, forced closes included.
    pub trades: Vec<Trade>,
    /// Structured run log.
    pub logs: Vec<LogEntry>,
    /// Portfolio equity once the run is over, after any forced close.
    pub final_equity: f64,
}

impl BacktestResult {
    pub(crate) fn push_point(&mut self, point: EquityPoint) {
        self.equity_ts.push(point.ts);
        self.equity.push(point.equity);
        self.drawdown.push(point.drawdown);
        self.position_size.push(point.position_size);
        self.price.push(point.price);
    }

    /// Returns the number of recorded equity points.
    pub fn len(&self) -> usize {
        self.equity_ts.len()
    }

    /// Returns `true` if no equity point was recorded.
    pub fn is_empty(&self) -> bool {
        self.equity_ts.is_empty()
    }

    /// Iterates over the recorded equity points.
    pub fn points(&self) -> impl Iterator<Item = EquityPoint> + '_ {
        (0..self.len()).map(|i| EquityPoint {
            ts: self.equity_ts[i],
            equity: self.equity[i],
            drawdown: self.drawdown[i],
            position_size: self.position_size[i],
            price: self.price[i],
        })
    }

    /// Returns the last recorded equity, if any.
    ///
    /// Forced closes happen after the last point is recorded, so this does not include
    /// their exit fee; see [`BacktestResult::final_equity`] for the settled value.
    pub fn last_equity(&self) -> Option<f64> {
        self.equity.last().copied()
    }

    /// Returns the log entries at `level`.
    pub fn logs_at(&self, level: LogLevel) -> impl Iterator<Item = &LogEntry> {
        self.logs.iter().filter(move |entry| entry.level == level)
    }

    /// Sum of the net P&L of every trade.
    pub fn realized_pnl(&self) -> f64 {
        self.trades.iter().map(|t| t.pnl).sum()
    }

    /// Serializes the result to pretty-printed JSON.
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> crate::errors::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
#[test]
fn arrays_stay_parallel() {
    let mut result = BacktestResult::default();
    for ts in 0..3 {
        result.push_point(EquityPoint {
            ts,
            equity: 100.0 + ts as f64,
            drawdown: 0.0,
            position_size: 1.0,
            price: 10.0,
        });
    }

    assert_eq!(result.len(), 3);
    assert_eq!(result.equity.len(), result.drawdown.len());
    assert_eq!(result.price.len(), result.position_size.len());
    assert_eq!(result.last_equity(), Some(102.0));
    assert_eq!(result.points().nth(1).map(|p| p.ts), Some(1));
}

#[cfg(test)]
#[test]
fn status_display() {
    assert_eq!(RunStatus::Done.to_string(), "DONE");
    assert_eq!(RunStatus::Canceled.to_string(), "CANCELED");
}
