//! Core engine components.
//!
//! This module provides the fundamental types for bar replay:
//! - `Bar`: OHLCV input data.
//! - `Order` / `OrderIntent`: what a strategy asked for and how it was resolved.
//! - `Position` / `Portfolio`: single net position, cash, equity and drawdown.
//! - `StrategyContext`: the API handed to strategy hooks.
//! - `Backtest`: the event loop.

mod backtest;
mod bar;
mod broker;
mod config;
mod context;
mod order;
mod portfolio;
mod position;
mod result;
mod strategy;
mod trade;

pub use backtest::*;
pub use bar::*;
pub use broker::*;
pub use config::*;
pub use context::*;
pub use order::*;
pub use portfolio::*;
pub use position::*;
pub use result::*;
pub use strategy::*;
pub use trade::*;
