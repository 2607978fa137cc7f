#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::Position;

/// Cash and equity bookkeeping for a single-position run.
///
/// Cash moves only on fees and realized P&L; equity is cash plus the open position's
/// unrealized P&L, recomputed by [`Portfolio::mark_to_market`].
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    cash: f64,
    equity: f64,
    drawdown: f64,
    max_drawdown: f64,
    peak_equity: f64,
}

impl Portfolio {
    /// Creates a portfolio where cash, equity and peak equity all start at `initial_cash`.
    pub fn new(initial_cash: f64) -> Self {
        Self {
            cash: initial_cash,
            equity: initial_cash,
            drawdown: 0.0,
            max_drawdown: 0.0,
            peak_equity: initial_cash,
        }
    }

    /// Returns the cash balance.
    pub fn cash(&self) -> f64 {
        self.cash
    }

    /// Returns the marked equity.
    pub fn equity(&self) -> f64 {
        self.equity
    }

    /// Returns the current drawdown as a fraction of peak equity.
    pub fn drawdown(&self) -> f64 {
        self.drawdown
    }

    /// Returns the largest drawdown seen so far.
    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }

    /// Returns the highest equity seen so far.
    pub fn peak_equity(&self) -> f64 {
        self.peak_equity
    }

    /// Charges a fee against cash.
    pub(crate) fn sub_fee(&mut self, fee: f64) {
        self.cash -= fee;
    }

    /// Books realized P&L into cash.
    pub(crate) fn add_pnl(&mut self, pnl: f64) {
        self.cash += pnl;
    }

    /// Recomputes equity at `price` and updates drawdown statistics.
    pub fn mark_to_market(&mut self, position: &Position, price: f64) {
        self.equity = self.cash + position.unrealized_pnl(price);
        self.update_drawdown();
    }

    fn update_drawdown(&mut self) {
        if self.equity > self.peak_equity {
            self.peak_equity = self.equity;
        }
        self.drawdown = if self.peak_equity > 0.0 {
            (self.peak_equity - self.equity) / self.peak_equity
        } else {
            0.0
        };
        if self.drawdown > self.max_drawdown {
            self.max_drawdown = self.drawdown;
        }
    }
}

#[cfg(test)]
#[test]
fn new_portfolio() {
    let portfolio = Portfolio::new(1000.0);
    assert_eq!(portfolio.cash(), 1000.0);
    assert_eq!(portfolio.equity(), 1000.0);
    assert_eq!(portfolio.peak_equity(), 1000.0);
    assert_eq!(portfolio.drawdown(), 0.0);
}

#[cfg(test)]
#[test]
fn mark_flat_equals_cash() {
    let mut portfolio = Portfolio::new(1000.0);
    portfolio.sub_fee(1.0);
    portfolio.mark_to_market(&Position::default(), 50.0);
    assert_eq!(portfolio.equity(), 999.0);
    assert_eq!(portfolio.drawdown(), 0.001);
}

#[cfg(test)]
#[test]
fn drawdown_tracks_peak() {
    use crate::engine::OrderSide;

    let mut portfolio = Portfolio::new(10_000.0);
    let mut position = Position::default();
    position.open(OrderSide::Buy, 100.0, 100.0, 0, 0.0);

    portfolio.mark_to_market(&position, 120.0); // 12_000
    assert_eq!(portfolio.peak_equity(), 12_000.0);
    assert_eq!(portfolio.drawdown(), 0.0);

    portfolio.mark_to_market(&position, 90.0); // 9_000
    assert_eq!(portfolio.drawdown(), 0.25);
    assert_eq!(portfolio.max_drawdown(), 0.25);

    portfolio.mark_to_market(&position, 110.0); // 11_000
    assert!(portfolio.drawdown() < 0.25);
    assert_eq!(portfolio.max_drawdown(), 0.25);
    assert_eq!(portfolio.peak_equity(), 12_000.0);
}

#[cfg(test)]
#[test]
fn non_positive_peak_has_no_drawdown() {
    let mut portfolio = Portfolio::new(0.0);
    portfolio.sub_fee(5.0);
    portfolio.mark_to_market(&Position::default(), 1.0);
    assert_eq!(portfolio.equity(), -5.0);
    assert_eq!(portfolio.drawdown(), 0.0);
}
