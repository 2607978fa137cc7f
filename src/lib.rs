//! # BTS Replay: deterministic bar-replay backtesting
//!
//! **BTS Replay** replays historical OHLCV bars against a strategy and produces fills, trades,
//! an equity curve and drawdown statistics. Execution is **lookahead-free**: an order issued while
//! bar *i* is being processed always settles at the open of bar *i + 1*.
//!
//! ## Core Components
//! | Component            | Description                                                                         |
//! |----------------------|-------------------------------------------------------------------------------------|
//! | **`Bar`**            | One OHLCV candle with a millisecond timestamp.                                      |
//! | **`RunConfig`**      | Per-run parameters: window, cash, leverage, commission and slippage in bps.         |
//! | **`Strategy`**       | Trait with optional hooks (`on_init`, `on_bar`, `on_order`, `on_trade`, `on_finish`).|
//! | **`StrategyContext`**| Per-bar API: order intents, sizing helpers, memoized indicators, structured log.   |
//! | **`Backtest`**       | The event loop: deferred settlement, forced closes, cooperative cancellation.       |
//! | **`BacktestResult`** | Parallel equity/drawdown/position/price arrays, orders, trades and logs.           |
//! | **`Report`**         | Summary metrics: return, max drawdown, win rate, profit factor, Sharpe ratio.       |
//! | **`Optimizer`**      | Parallel parameter sweeps over independent runs.                                    |
//!
//! ## Execution model
//! - One net position per run. A same-direction order while a position is open is not filled.
//! - Fill price = open of the settlement bar, moved against the order side by `slippage_bps`.
//! - Fee = `|size| × price × commission_bps / 10000`, charged on entry and on exit.
//! - Orders whose notional exceeds `equity × leverage` are rejected with reason `margin`.
//! - Bars before `start_ts` are warmup: the strategy runs, order intents are dropped.
//!
//! ## Getting Started
//! ```rust
//! use bts_replay::prelude::*;
//!
//! let bars: Vec<Bar> = vec![
//!     (0, 10.0, 12.0, 9.0, 11.0, 100.0).into(),
//!     (1, 11.0, 13.0, 10.0, 12.0, 100.0).into(),
//!     (2, 12.0, 14.0, 11.0, 13.0, 100.0).into(),
//!     (3, 13.0, 15.0, 12.0, 14.0, 100.0).into(),
//! ];
//! let config = RunConfig {
//!     start_ts: 0,
//!     end_ts: 3,
//!     initial_cash: 1_000.0,
//!     ..Default::default()
//! };
//!
//! let mut backtest = Backtest::new(bars, config).unwrap();
//! let (result, status) = backtest
//!     .run_with(|ctx, index| {
//!         if index == 0 {
//!             ctx.buy(1.0);
//!         }
//!         if index == 1 {
//!             ctx.flatten();
//!         }
//!     })
//!     .unwrap();
//!
//! assert_eq!(status, RunStatus::Done);
//! assert_eq!(result.trades.len(), 1);
//! assert_eq!(result.trades[0].entry_price, 11.0);
//! assert_eq!(result.trades[0].exit_price, 12.0);
//! ```
//!
//! ## Error Handling
//! Strategy mistakes never abort a run: invalid sizes and excess leverage become `REJECTED`
//! orders, unsupported calls become one-time warnings in the run log. The only fatal
//! precondition of a run is a bar series shorter than two bars.
//!
//! ## License
//! MIT
#![warn(missing_docs)]

/// Core engine components: bars, orders, positions, portfolio, context and the runner.
pub mod engine;

/// Error types for the library.
pub mod errors;

/// Fixed indicator registry and the built-in indicator library.
pub mod indicators;

/// Utility functions and helpers.
pub mod utils;

/// Performance metrics: return, drawdown, Sharpe ratio, win rate, etc.
#[cfg(feature = "metrics")]
pub mod metrics;

/// Strategy parameter optimization.
#[cfg(feature = "optimizer")]
pub mod optimizer;

/// Re-exports of commonly used types and traits for convenience.
pub mod prelude {
    pub use super::*;
    pub use crate::engine::*;
    pub use crate::errors::*;
    pub use crate::indicators::*;

    #[cfg(feature = "metrics")]
    pub use crate::metrics::*;

    #[cfg(feature = "optimizer")]
    pub use crate::optimizer::*;
}

use std::ops::{Add, Div, Mul, Sub};

/// Number of basis points in one unit.
pub const BPS_SCALE: f64 = 10_000.0;

/// Trait for basis-point calculations on prices and notionals.
///
/// Commission and slippage are both expressed in basis points (1 bp = 0.01%).
pub trait BasisPoints<Rhs = Self> {
    /// Increases the value by the given number of basis points.
    ///
    /// ### Arguments
    /// * `bps` - Basis points to add (e.g., 100.0 for 1%).
    ///
    /// ### Returns
    /// The value moved up by `bps`.
    fn add_bps(self, bps: Rhs) -> Self;

    /// Decreases the value by the given number of basis points.
    ///
    /// ### Arguments
    /// * `bps` - Basis points to subtract (e.g., 100.0 for 1%).
    ///
    /// ### Returns
    /// The value moved down by `bps`.
    fn sub_bps(self, bps: Rhs) -> Self;

    /// Returns `bps` basis points of the value.
    fn bps_of(self, bps: Self) -> Self;

    /// Calculates the percentage change between two values.
    fn change(self, new: Self) -> Self;
}

impl BasisPoints for f64 {
    fn add_bps(self, bps: Self) -> Self {
        self.mul(1.0.add(bps.div(BPS_SCALE)))
    }

    fn sub_bps(self, bps: Self) -> Self {
        self.mul(1.0.sub(bps.div(BPS_SCALE)))
    }

    fn bps_of(self, bps: Self) -> Self {
        self.mul(bps).div(BPS_SCALE)
    }

    fn change(self, new: Self) -> Self {
        new.sub(self).div(self).mul(100.0)
    }
}

#[cfg(test)]
mod bps {
    use super::*;

    #[test]
    fn add() {
        assert_eq!(101.0, 100.0.add_bps(100.0))
    }

    #[test]
    fn sub() {
        assert_eq!(99.0, 100.0.sub_bps(100.0))
    }

    #[test]
    fn bps_of() {
        assert_eq!(0.5, 1000.0.bps_of(5.0))
    }

    #[test]
    fn change() {
        assert_eq!(10.0, 100.0.change(110.0))
    }

    #[test]
    fn zero_bps_is_identity() {
        assert_eq!(11.0, 11.0.add_bps(0.0));
        assert_eq!(11.0, 11.0.sub_bps(0.0));
    }
}
