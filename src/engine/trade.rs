#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::PositionSide;

/// A closed round trip. Created exactly once per position close.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    /// Direction of the closed position.
    pub side: PositionSide,
    /// Absolute size of the closed position.
    pub size: f64,
    /// Entry bar timestamp.
    pub entry_ts: i64,
    /// Entry fill price.
    pub entry_price: f64,
    /// Exit bar timestamp.
    pub exit_ts: i64,
    /// Exit fill price.
    pub exit_price: f64,
    /// Net P&L: gross P&L minus `fee_total`.
    pub pnl: f64,
    /// Entry fee plus exit fee.
    pub fee_total: f64,
    /// Number of bars the position was held, at least 1.
    pub bars_held: u64,
}

impl Trade {
    /// Returns the P&L before fees.
    pub fn gross_pnl(&self) -> f64 {
        self.pnl + self.fee_total
    }

    /// Returns `true` if the net P&L is strictly positive.
    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }
}

#[cfg(test)]
#[test]
fn gross_pnl_adds_back_fees() {
    let trade = Trade {
        side: PositionSide::Long,
        size: 1.0,
        entry_ts: 1,
        entry_price: 11.0,
        exit_ts: 2,
        exit_price: 12.0,
        pnl: 0.77,
        fee_total: 0.23,
        bars_held: 1,
    };
    assert!((trade.gross_pnl() - 1.0).abs() < 1e-12);
    assert!(trade.is_win());
}
