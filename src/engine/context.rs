use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt,
    sync::Arc,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::{Bar, IntentKind, OrderId, OrderIntent, ParamValue, Params, Portfolio, Position};
use crate::indicators::{IndicatorLibrary, IndicatorProxy};

/// Severity of a run log entry.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Informational.
    Info,
    /// Strategy misuse or ignored action.
    Warn,
    /// Strategy-reported error.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warn => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// One structured run log entry.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Severity.
    pub level: LogLevel,
    /// Message text.
    pub message: String,
    /// Timestamp the entry refers to.
    pub ts: i64,
    /// Bar the entry was emitted on, if any.
    pub bar_ts: Option<i64>,
}

/// Append-only run log. Every entry is also emitted as a `tracing` event.
#[derive(Debug, Default)]
pub struct StrategyLogger {
    entries: Vec<LogEntry>,
}

impl StrategyLogger {
    /// Appends an `INFO` entry.
    pub fn info(&mut self, message: impl Into<String>, ts: i64, bar_ts: Option<i64>) {
        self.log(LogLevel::Info, message, ts, bar_ts)
    }

    /// Appends a `WARN` entry.
    pub fn warn(&mut self, message: impl Into<String>, ts: i64, bar_ts: Option<i64>) {
        self.log(LogLevel::Warn, message, ts, bar_ts)
    }

    /// Appends an `ERROR` entry.
    pub fn error(&mut self, message: impl Into<String>, ts: i64, bar_ts: Option<i64>) {
        self.log(LogLevel::Error, message, ts, bar_ts)
    }

    /// Appends an entry at `level`.
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>, ts: i64, bar_ts: Option<i64>) {
        let message = message.into();
        match level {
            LogLevel::Info => tracing::info!(target: "bts_replay::strategy", ts, ?bar_ts, "{message}"),
            LogLevel::Warn => tracing::warn!(target: "bts_replay::strategy", ts, ?bar_ts, "{message}"),
            LogLevel::Error => tracing::error!(target: "bts_replay::strategy", ts, ?bar_ts, "{message}"),
        }
        self.entries.push(LogEntry {
            level,
            message,
            ts,
            bar_ts,
        });
    }

    /// Returns the entries logged so far.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub(crate) fn take(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.entries)
    }
}

/// Position sizing helpers, evaluated against the current bar.
#[derive(Debug, Clone, Copy)]
pub struct SizeHelper {
    equity: f64,
    leverage: f64,
    close: Option<f64>,
}

impl SizeHelper {
    /// Returns `units` unchanged.
    pub fn fixed(&self, units: f64) -> f64 {
        units
    }

    /// Units worth `pct` of leveraged equity at the current close.
    ///
    /// ### Arguments
    /// * `pct` - Fraction of equity, e.g. `0.5` for half.
    ///
    /// ### Returns
    /// `equity × pct × leverage / close`, or `0.0` when no positive close is available.
    pub fn percent_equity(&self, pct: f64) -> f64 {
        match self.close {
            Some(close) if close > 0.0 => self.equity * pct * self.leverage / close,
            _ => 0.0,
        }
    }
}

/// The per-bar API handed to strategy hooks.
///
/// Orders are intents: they are queued here and settled by the runner at the next bar's
/// open. While the runner processes warmup bars, intents are dropped and each verb logs a
/// single warning.
pub struct StrategyContext {
    bars: Arc<[Bar]>,
    params: Params,
    /// Strategy scratch state, kept for the whole run.
    pub state: HashMap<String, ParamValue>,
    pub(crate) position: Position,
    pub(crate) portfolio: Portfolio,
    leverage: f64,
    pending: VecDeque<OrderIntent>,
    next_id: OrderId,
    ind: IndicatorProxy,
    logger: StrategyLogger,
    trading_enabled: bool,
    warned: HashSet<&'static str>,
    current_index: Option<usize>,
}

impl fmt::Debug for StrategyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyContext")
            .field("current_index", &self.current_index)
            .field("position", &self.position)
            .field("portfolio", &self.portfolio)
            .field("pending", &self.pending.len())
            .field("trading_enabled", &self.trading_enabled)
            .finish()
    }
}

impl StrategyContext {
    /// Creates a context for a run over `bars`.
    pub fn new(
        bars: Arc<[Bar]>,
        params: Params,
        initial_cash: f64,
        leverage: f64,
        library: Arc<dyn IndicatorLibrary>,
    ) -> Self {
        Self {
            ind: IndicatorProxy::new(Arc::clone(&bars), library),
            bars,
            params,
            state: HashMap::new(),
            position: Position::default(),
            portfolio: Portfolio::new(initial_cash),
            leverage,
            pending: VecDeque::new(),
            next_id: 1,
            logger: StrategyLogger::default(),
            trading_enabled: true,
            warned: HashSet::new(),
            current_index: None,
        }
    }

    /// Returns the whole bar series.
    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    /// Returns the current bar index, `None` before the first bar.
    pub fn index(&self) -> Option<usize> {
        self.current_index
    }

    /// Returns the current bar, `None` before the first bar.
    pub fn bar(&self) -> Option<&Bar> {
        self.current_index.and_then(|i| self.bars.get(i))
    }

    /// Returns the resolved strategy parameters.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Returns the open position.
    pub fn position(&self) -> &Position {
        &self.position
    }

    /// Returns the portfolio.
    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    /// Returns the configured leverage.
    pub fn leverage(&self) -> f64 {
        self.leverage
    }

    /// Returns `false` while warmup bars are processed.
    pub fn trading_enabled(&self) -> bool {
        self.trading_enabled
    }

    /// Returns the sizing helpers for the current bar.
    pub fn size(&self) -> SizeHelper {
        SizeHelper {
            equity: self.portfolio.equity(),
            leverage: self.leverage,
            close: self.bar().map(Bar::close),
        }
    }

    /// Returns the memoizing indicator proxy.
    pub fn ind(&mut self) -> &mut IndicatorProxy {
        &mut self.ind
    }

    /// Returns the run log.
    pub fn logger(&mut self) -> &mut StrategyLogger {
        &mut self.logger
    }

    /// Queues a buy of `size` units for the next bar's open.
    ///
    /// ### Returns
    /// The order id, or `None` if the intent was dropped.
    pub fn buy(&mut self, size: f64) -> Option<OrderId> {
        self.enqueue(IntentKind::Buy, size)
    }

    /// Queues a sell of `size` units for the next bar's open.
    pub fn sell(&mut self, size: f64) -> Option<OrderId> {
        self.enqueue(IntentKind::Sell, size)
    }

    /// Queues a close of the open position. Does nothing when already flat.
    pub fn flatten(&mut self) -> Option<OrderId> {
        if self.trading_enabled && self.position.is_flat() {
            return None;
        }
        self.enqueue(IntentKind::Flatten, 0.0)
    }

    /// Order cancellation is not supported; logs a warning once per run.
    pub fn cancel(&mut self, _id: OrderId) {
        if let Some(ts) = self.bar().map(Bar::ts) {
            self.warn_once("cancel", "cancel not supported", ts);
        }
    }

    /// Drains the queued intents in submission order.
    pub fn pop_orders(&mut self) -> Vec<OrderIntent> {
        self.pending.drain(..).collect()
    }

    fn enqueue(&mut self, kind: IntentKind, size: f64) -> Option<OrderId> {
        let ts = self.bar()?.ts();
        if !self.trading_enabled {
            let message = match kind {
                IntentKind::Buy => "trading disabled, buy ignored",
                IntentKind::Sell => "trading disabled, sell ignored",
                IntentKind::Flatten => "trading disabled, flatten ignored",
            };
            self.warn_once(kind.verb(), message, ts);
            return None;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.pending.push_back(OrderIntent {
            id,
            kind,
            size,
            submitted_ts: ts,
        });
        Some(id)
    }

    /// Logs `message` at `WARN` unless `tag` already warned during this run.
    pub(crate) fn warn_once(&mut self, tag: &'static str, message: &str, ts: i64) {
        if self.warned.insert(tag) {
            self.logger.warn(message, ts, Some(ts));
        }
    }

    pub(crate) fn set_bar_index(&mut self, index: usize) {
        self.current_index = Some(index);
    }

    pub(crate) fn set_trading_enabled(&mut self, enabled: bool) {
        self.trading_enabled = enabled;
    }

    pub(crate) fn take_logs(&mut self) -> Vec<LogEntry> {
        self.logger.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::Builtin;

    fn context() -> StrategyContext {
        let bars: Arc<[Bar]> = Arc::new([
            (0, 10.0, 12.0, 9.0, 11.0, 100.0).into(),
            (1, 11.0, 13.0, 10.0, 12.0, 100.0).into(),
        ]);
        StrategyContext::new(bars, Params::new(), 1_000.0, 2.0, Arc::new(Builtin))
    }

    #[test]
    fn intents_before_first_bar_are_ignored() {
        let mut ctx = context();
        assert_eq!(ctx.buy(1.0), None);
        assert!(ctx.pop_orders().is_empty());
        assert!(ctx.logger().entries().is_empty());
    }

    #[test]
    fn intents_are_fifo_with_sequential_ids() {
        let mut ctx = context();
        ctx.set_bar_index(1);
        assert_eq!(ctx.buy(1.0), Some(1));
        assert_eq!(ctx.sell(2.0), Some(2));

        let orders = ctx.pop_orders();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].kind, IntentKind::Buy);
        assert_eq!(orders[1].size, 2.0);
        assert_eq!(orders[1].submitted_ts, 1);
        assert!(ctx.pop_orders().is_empty());
    }

    #[test]
    fn flatten_when_flat_is_noop() {
        let mut ctx = context();
        ctx.set_bar_index(0);
        assert_eq!(ctx.flatten(), None);
        assert!(ctx.pop_orders().is_empty());
        assert!(ctx.logger().entries().is_empty());
    }

    #[test]
    fn disabled_trading_warns_once_per_verb() {
        let mut ctx = context();
        ctx.set_bar_index(0);
        ctx.set_trading_enabled(false);
        for _ in 0..3 {
            ctx.buy(1.0);
            ctx.flatten();
        }
        ctx.sell(1.0);

        assert!(ctx.pop_orders().is_empty());
        let messages: Vec<_> = ctx.logger().entries().iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            [
                "trading disabled, buy ignored",
                "trading disabled, flatten ignored",
                "trading disabled, sell ignored"
            ]
        );
        assert!(ctx.logger().entries().iter().all(|e| e.level == LogLevel::Warn));
    }

    #[test]
    fn cancel_warns_once() {
        let mut ctx = context();
        ctx.set_bar_index(0);
        ctx.cancel(1);
        ctx.cancel(2);
        assert_eq!(ctx.take_logs().len(), 1);
    }

    #[test]
    fn percent_equity_sizing() {
        let mut ctx = context();
        assert_eq!(ctx.size().percent_equity(0.5), 0.0);

        ctx.set_bar_index(0);
        // 1000 * 0.5 * 2 / 11
        assert!((ctx.size().percent_equity(0.5) - 1_000.0 / 11.0).abs() < 1e-9);
        assert_eq!(ctx.size().fixed(3.0), 3.0);
    }

    #[test]
    fn zero_close_sizes_to_zero() {
        let bars: Arc<[Bar]> = Arc::new([(0, 0.0, 0.0, 0.0, 0.0, 0.0).into(), (1, 1.0, 1.0, 1.0, 1.0, 0.0).into()]);
        let mut ctx = StrategyContext::new(bars, Params::new(), 100.0, 1.0, Arc::new(Builtin));
        ctx.set_bar_index(0);
        assert_eq!(ctx.size().percent_equity(1.0), 0.0);
    }

    #[test]
    fn logger_records_levels() {
        let mut ctx = context();
        ctx.logger().info("hello", 5, None);
        ctx.logger().error("boom", 6, Some(6));
        let logs = ctx.take_logs();
        assert_eq!(logs[0].level, LogLevel::Info);
        assert_eq!(logs[1].level.to_string(), "ERROR");
        assert_eq!(logs[1].bar_ts, Some(6));
        assert!(ctx.logger().entries().is_empty());
    }
}
