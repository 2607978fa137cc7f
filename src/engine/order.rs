use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Run-unique identifier handed back to the strategy when an intent is queued.
pub type OrderId = u64;

/// Represents the side of a filled or rejected order.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderSide {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Returns `+1.0` for buys and `-1.0` for sells.
    pub fn sign(self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// What a strategy asked for. `Flatten` is resolved against the position at settlement.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentKind {
    /// Buy `size` units.
    Buy,
    /// Sell `size` units.
    Sell,
    /// Close whatever position is open when the intent settles.
    Flatten,
}

impl IntentKind {
    /// Lowercase verb used in run log messages.
    pub fn verb(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Flatten => "flatten",
        }
    }
}

/// A queued order intent, waiting for the next bar's open.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderIntent {
    /// Identifier returned to the strategy.
    pub id: OrderId,
    /// Requested action.
    pub kind: IntentKind,
    /// Requested size; `0.0` for flatten.
    pub size: f64,
    /// Timestamp of the bar during which the intent was issued.
    pub submitted_ts: i64,
}

/// Lifecycle status of an order.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderStatus {
    /// Created, not yet resolved.
    #[default]
    Submitted,
    /// Executed at `fill_price`.
    Filled,
    /// Refused; see `reason`.
    Rejected,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted => write!(f, "SUBMITTED"),
            Self::Filled => write!(f, "FILLED"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Why an order was rejected.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Size is non-finite or not strictly positive.
    InvalidSize,
    /// Notional exceeds `equity × leverage`.
    Margin,
}

impl RejectReason {
    /// Returns the reason code (`invalid_size`, `margin`).
    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidSize => "invalid_size",
            Self::Margin => "margin",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A resolved order, as recorded in the backtest result.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    /// Identifier of the intent this order came from.
    pub id: OrderId,
    /// Timestamp of the bar the intent was issued on.
    pub submitted_ts: i64,
    /// Resolved side (flatten intents take the side opposite to the position).
    pub side: OrderSide,
    /// Requested size (unsigned).
    pub size: f64,
    /// Current status.
    pub status: OrderStatus,
    /// Rejection reason, if rejected.
    pub reason: Option<RejectReason>,
    /// Settlement bar timestamp, if filled.
    pub fill_ts: Option<i64>,
    /// Fill price after slippage, if filled.
    pub fill_price: Option<f64>,
    /// Commission charged, if filled.
    pub fee: Option<f64>,
}

impl From<(OrderId, i64, OrderSide, f64)> for Order {
    fn from((id, submitted_ts, side, size): (OrderId, i64, OrderSide, f64)) -> Self {
        Self {
            id,
            submitted_ts,
            side,
            size,
            status: OrderStatus::Submitted,
            reason: None,
            fill_ts: None,
            fill_price: None,
            fee: None,
        }
    }
}

impl Order {
    /// Marks the order as rejected.
    pub(crate) fn reject(&mut self, reason: RejectReason) {
        self.status = OrderStatus::Rejected;
        self.reason = Some(reason);
    }

    /// Marks the order as filled.
    pub(crate) fn fill(&mut self, ts: i64, price: f64, fee: f64) {
        self.status = OrderStatus::Filled;
        self.fill_ts = Some(ts);
        self.fill_price = Some(price);
        self.fee = Some(fee);
    }

    /// Returns `true` if the order was filled.
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    /// Returns `true` if the order was rejected.
    pub fn is_rejected(&self) -> bool {
        self.status == OrderStatus::Rejected
    }

    /// Returns the signed size (`+` for buys, `-` for sells).
    pub fn signed_size(&self) -> f64 {
        self.side.sign() * self.size
    }
}

#[cfg(test)]
#[test]
fn create_simple_order() {
    let order: Order = (1, 0, OrderSide::Buy, 2.0).into();

    assert_eq!(order.id, 1);
    assert_eq!(order.size, 2.0);
    assert_eq!(order.status, OrderStatus::Submitted);
    assert_eq!(order.signed_size(), 2.0);
    assert!(order.reason.is_none());
    assert!(order.fill_price.is_none());
}

#[cfg(test)]
#[test]
fn reject_order() {
    let mut order: Order = (1, 0, OrderSide::Sell, 100.0).into();
    order.reject(RejectReason::Margin);

    assert!(order.is_rejected());
    assert_eq!(order.reason, Some(RejectReason::Margin));
    assert_eq!(order.reason.unwrap().to_string(), "margin");
    assert!(order.fee.is_none());
}

#[cfg(test)]
#[test]
fn fill_order() {
    let mut order: Order = (7, 0, OrderSide::Sell, 1.5).into();
    order.fill(60_000, 12.0, 0.18);

    assert!(order.is_filled());
    assert_eq!(order.fill_ts, Some(60_000));
    assert_eq!(order.fill_price, Some(12.0));
    assert_eq!(order.fee, Some(0.18));
    assert_eq!(order.signed_size(), -1.5);
}

#[cfg(test)]
#[test]
fn side_display_and_opposite() {
    assert_eq!(OrderSide::Buy.to_string(), "BUY");
    assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
    assert_eq!(OrderStatus::Rejected.to_string(), "REJECTED");
    assert_eq!(RejectReason::InvalidSize.code(), "invalid_size");
}
