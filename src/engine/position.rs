use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::OrderSide;

/// Direction of an open position.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionSide {
    /// Positive size.
    Long,
    /// Negative size.
    Short,
}

impl PositionSide {
    /// Returns the order side that increases a position of this direction.
    pub fn entry_side(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Sell,
        }
    }

    /// Returns the order side that closes a position of this direction.
    pub fn exit_side(self) -> OrderSide {
        self.entry_side().opposite()
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// The single net position of a run. A size of `0.0` means flat.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    size: f64,
    entry_price: Option<f64>,
    entry_ts: Option<i64>,
    // Entry commission; the exit commission is only known on close.
    entry_fee_total: f64,
}

impl Position {
    /// Returns the signed size.
    pub fn size(&self) -> f64 {
        self.size
    }

    /// Returns the entry fill price, if a position is open.
    pub fn entry_price(&self) -> Option<f64> {
        self.entry_price
    }

    /// Returns the entry bar timestamp, if a position is open.
    pub fn entry_ts(&self) -> Option<i64> {
        self.entry_ts
    }

    /// Returns the commission paid on entry.
    pub fn entry_fee_total(&self) -> f64 {
        self.entry_fee_total
    }

    /// Returns `true` when no position is open.
    pub fn is_flat(&self) -> bool {
        self.size == 0.0
    }

    /// Returns the direction, or `None` when flat.
    pub fn side(&self) -> Option<PositionSide> {
        if self.size > 0.0 {
            Some(PositionSide::Long)
        } else if self.size < 0.0 {
            Some(PositionSide::Short)
        } else {
            None
        }
    }

    /// Returns `true` if an order on `side` would add to the open position.
    pub fn is_same_direction(&self, side: OrderSide) -> bool {
        self.side().is_some_and(|s| s.entry_side() == side)
    }

    /// Unrealized P&L at `price`.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        match self.entry_price {
            Some(entry_price) if !self.is_flat() => self.size * (price - entry_price),
            _ => 0.0,
        }
    }

    /// Opens a position from a fill.
    pub(crate) fn open(&mut self, side: OrderSide, size: f64, price: f64, ts: i64, fee: f64) {
        self.size = side.sign() * size;
        self.entry_price = Some(price);
        self.entry_ts = Some(ts);
        self.entry_fee_total = fee;
    }

    /// Resets the position to flat, entry fields included.
    pub fn close(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
#[test]
fn flat_by_default() {
    let position = Position::default();
    assert!(position.is_flat());
    assert_eq!(position.side(), None);
    assert_eq!(position.unrealized_pnl(100.0), 0.0);
}

#[cfg(test)]
#[test]
fn open_long_and_short() {
    let mut position = Position::default();
    position.open(OrderSide::Buy, 2.0, 10.0, 1, 0.1);
    assert_eq!(position.size(), 2.0);
    assert_eq!(position.side(), Some(PositionSide::Long));
    assert_eq!(position.unrealized_pnl(12.0), 4.0);
    assert!(position.is_same_direction(OrderSide::Buy));
    assert!(!position.is_same_direction(OrderSide::Sell));

    position.open(OrderSide::Sell, 2.0, 10.0, 1, 0.1);
    assert_eq!(position.size(), -2.0);
    assert_eq!(position.side(), Some(PositionSide::Short));
    assert_eq!(position.unrealized_pnl(12.0), -4.0);
    assert_eq!(position.side().unwrap().exit_side(), OrderSide::Buy);
}

#[cfg(test)]
#[test]
fn close_resets_everything() {
    let mut position = Position::default();
    position.open(OrderSide::Buy, 1.0, 11.0, 1, 0.11);
    position.close();

    assert!(position.is_flat());
    assert_eq!(position.entry_price(), None);
    assert_eq!(position.entry_ts(), None);
    assert_eq!(position.entry_fee_total(), 0.0);
}
