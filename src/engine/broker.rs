//! Fill, fee and margin model.
//!
//! All functions are pure: they compute prices and admissibility, the runner applies them.

use std::cmp::Ordering;

use crate::BasisPoints;
use crate::engine::{OrderSide, RejectReason};

/// Moves `reference_price` against the order side by `slippage_bps`.
///
/// Buys fill above the reference, sells below it.
///
/// ### Example
/// ```rust
/// use bts_replay::engine::{OrderSide, compute_fill_price};
///
/// assert_eq!(compute_fill_price(100.0, OrderSide::Buy, 100.0), 101.0);
/// assert_eq!(compute_fill_price(100.0, OrderSide::Sell, 100.0), 99.0);
/// ```
pub fn compute_fill_price(reference_price: f64, side: OrderSide, slippage_bps: f64) -> f64 {
    match side {
        OrderSide::Buy => reference_price.add_bps(slippage_bps),
        OrderSide::Sell => reference_price.sub_bps(slippage_bps),
    }
}

/// Commission for a fill: `|size| × price × commission_bps / 10000`.
pub fn compute_fee(size: f64, price: f64, commission_bps: f64) -> f64 {
    (size.abs() * price).bps_of(commission_bps)
}

/// Checks whether an order may be filled.
///
/// ### Returns
/// `Err(RejectReason::InvalidSize)` if `size` is non-finite or not positive,
/// `Err(RejectReason::Margin)` if `|size| × price` exceeds `equity × leverage`
/// (or cannot be compared), `Ok(())` otherwise.
pub fn can_fill(size: f64, price: f64, equity: f64, leverage: f64) -> Result<(), RejectReason> {
    if !size.is_finite() || size <= 0.0 {
        return Err(RejectReason::InvalidSize);
    }
    let notional = size.abs() * price;
    match notional.partial_cmp(&(equity * leverage)) {
        Some(Ordering::Less | Ordering::Equal) => Ok(()),
        Some(Ordering::Greater) | None => Err(RejectReason::Margin),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_price_without_slippage() {
        assert_eq!(compute_fill_price(11.0, OrderSide::Buy, 0.0), 11.0);
        assert_eq!(compute_fill_price(11.0, OrderSide::Sell, 0.0), 11.0);
    }

    #[test]
    fn fill_price_moves_against_side() {
        assert!((compute_fill_price(14.0, OrderSide::Sell, 100.0) - 13.86).abs() < 1e-12);
        assert!((compute_fill_price(14.0, OrderSide::Buy, 100.0) - 14.14).abs() < 1e-12);
    }

    #[test]
    fn fee_uses_absolute_size() {
        assert!((compute_fee(1.0, 11.0, 100.0) - 0.11).abs() < 1e-12);
        assert!((compute_fee(-2.0, 10.0, 50.0) - 0.1).abs() < 1e-12);
        assert_eq!(compute_fee(1.0, 11.0, 0.0), 0.0);
    }

    #[test]
    fn can_fill_invalid_size() {
        assert_eq!(can_fill(0.0, 10.0, 1000.0, 1.0), Err(RejectReason::InvalidSize));
        assert_eq!(can_fill(-1.0, 10.0, 1000.0, 1.0), Err(RejectReason::InvalidSize));
        assert_eq!(can_fill(f64::NAN, 10.0, 1000.0, 1.0), Err(RejectReason::InvalidSize));
        assert_eq!(can_fill(f64::INFINITY, 10.0, 1000.0, 1.0), Err(RejectReason::InvalidSize));
    }

    #[test]
    fn can_fill_margin() {
        assert_eq!(can_fill(100.0, 11.0, 10.0, 1.0), Err(RejectReason::Margin));
        assert_eq!(can_fill(1.0, 10.0, 10.0, 1.0), Ok(()));
        assert_eq!(can_fill(2.0, 10.0, 10.0, 2.0), Ok(()));
        assert_eq!(can_fill(1.0, f64::NAN, 10.0, 1.0), Err(RejectReason::Margin));
    }
}
