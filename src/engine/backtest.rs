use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tracing::{debug, info};

use crate::{
    engine::*,
    errors::{Error, Result},
    indicators::{Builtin, IndicatorLibrary},
};

/// Number of bars between two cancellation polls and progress reports.
pub const POLL_EVERY: usize = 100;

/// Cooperative cancellation handle.
///
/// Clones share the same flag, so one can be moved to another thread and set there.
/// The runner only observes it every [`POLL_EVERY`] bars.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Progress callback, called with `(index, bar_count)`.
pub type ProgressFn = Box<dyn FnMut(usize, usize) + Send>;

/// The bar-replay runner.
///
/// A `Backtest` holds the read-only inputs of a run; every call to [`Backtest::run`]
/// builds a fresh context, so the same instance can replay several strategies.
pub struct Backtest {
    bars: Arc<[Bar]>,
    config: RunConfig,
    cancel: Option<CancelFlag>,
    progress: Option<ProgressFn>,
    library: Arc<dyn IndicatorLibrary>,
}

impl std::fmt::Debug for Backtest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backtest")
            .field("bars", &self.bars.len())
            .field("config", &self.config)
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl Backtest {
    /// Creates a runner.
    ///
    /// ### Arguments
    /// * `bars` - Bars ordered by strictly increasing timestamp.
    /// * `config` - Run parameters.
    ///
    /// ### Returns
    /// The runner, or [`Error::NotEnoughBars`] when fewer than two bars are given: a run
    /// needs at least one decision bar and one settlement bar.
    pub fn new(bars: impl Into<Arc<[Bar]>>, config: RunConfig) -> Result<Self> {
        let bars = bars.into();
        if bars.len() < 2 {
            return Err(Error::NotEnoughBars(bars.len()));
        }

        Ok(Self {
            bars,
            config,
            cancel: None,
            progress: None,
            library: Arc::new(Builtin),
        })
    }

    /// Sets the cancellation flag polled during the run.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Sets the progress callback.
    pub fn with_progress(mut self, progress: impl FnMut(usize, usize) + Send + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Replaces the built-in indicator library.
    pub fn with_indicators(mut self, library: Arc<dyn IndicatorLibrary>) -> Self {
        self.library = library;
        self
    }

    /// Returns the bars.
    pub fn bars(&self) -> &Arc<[Bar]> {
        &self.bars
    }

    /// Returns the run configuration.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Runs a closure as an `on_bar`-only strategy with no parameters.
    pub fn run_with<F>(&mut self, func: F) -> Result<(BacktestResult, RunStatus)>
    where
        F: FnMut(&mut StrategyContext, usize),
    {
        self.run(&mut OnBar(func), &Params::new())
    }

    /// Replays the bars against `strategy`.
    ///
    /// `params` are overrides resolved against the strategy schema before any simulation
    /// state exists. From then on the run always completes with [`RunStatus::Done`] or
    /// [`RunStatus::Canceled`]; strategy mistakes become rejected orders or log warnings.
    ///
    /// ### Example
    /// ```rust
    /// use bts_replay::prelude::*;
    ///
    /// let bars = bts_replay::utils::random_walk_bars(300, 42, 100.0);
    /// let mut backtest = Backtest::new(bars, RunConfig::default()).unwrap();
    /// let (result, status) = backtest
    ///     .run_with(|ctx, index| {
    ///         if index % 20 == 0 {
    ///             ctx.buy(1.0);
    ///         } else if index % 20 == 10 {
    ///             ctx.flatten();
    ///         }
    ///     })
    ///     .unwrap();
    ///
    /// assert_eq!(status, RunStatus::Done);
    /// assert_eq!(result.equity.len(), 299);
    /// assert_eq!(result.trades.len(), 15);
    /// ```
    pub fn run<S>(&mut self, strategy: &mut S, params: &Params) -> Result<(BacktestResult, RunStatus)>
    where
        S: Strategy + ?Sized,
    {
        let params = strategy.schema().resolve(params)?;
        let bars = Arc::clone(&self.bars);
        let config = &self.config;
        let n = bars.len();

        let mut ctx = StrategyContext::new(
            Arc::clone(&bars),
            params,
            config.initial_cash,
            config.leverage,
            Arc::clone(&self.library),
        );
        let mut result = BacktestResult::default();
        let mut pending: Vec<OrderIntent> = Vec::new();
        let mut status = RunStatus::Done;
        let mut last_index = 0;

        info!(
            symbol = %config.symbol,
            timeframe = %config.timeframe,
            bars = n,
            start_ts = config.start_ts,
            end_ts = config.end_ts,
            "backtest started"
        );

        strategy.on_init(&mut ctx);

        for i in 0..n - 1 {
            last_index = i;
            if i % POLL_EVERY == 0 {
                if self.cancel.as_ref().is_some_and(CancelFlag::is_canceled) {
                    status = RunStatus::Canceled;
                    break;
                }
                if let Some(progress) = self.progress.as_mut() {
                    progress(i, n);
                }
            }

            ctx.set_bar_index(i);
            let bar = bars[i];
            if bar.ts() > config.end_ts {
                break;
            }

            let settling = std::mem::take(&mut pending);
            for intent in settling {
                settle(config, &bars, strategy, &mut ctx, &mut result, intent, &bar);
            }

            ctx.portfolio.mark_to_market(&ctx.position, bar.close());
            if bar.ts() >= config.start_ts && bar.ts() <= config.end_ts {
                result.push_point(EquityPoint {
                    ts: bar.ts(),
                    equity: ctx.portfolio.equity(),
                    drawdown: ctx.portfolio.drawdown(),
                    position_size: ctx.position.size(),
                    price: bar.close(),
                });
            }

            ctx.set_trading_enabled(bar.ts() >= config.start_ts);
            strategy.on_bar(&mut ctx, i);
            ctx.set_trading_enabled(true);

            pending = ctx.pop_orders();
        }

        let anchor = match status {
            RunStatus::Canceled => {
                let limit = config.end_ts.min(bars[last_index].ts());
                Some(last_at_or_before(&bars, limit).unwrap_or(last_index))
            }
            RunStatus::Done if config.close_on_finish => last_at_or_before(&bars, config.end_ts),
            RunStatus::Done => None,
        };
        if let Some(anchor) = anchor
            && !ctx.position.is_flat()
        {
            force_close(config, &mut ctx, &mut result, &bars[anchor]);
        }

        if !pending.is_empty() {
            debug!(count = pending.len(), "discarding unsettled order intents");
        }
        strategy.on_finish(&mut ctx);
        result.logs = ctx.take_logs();
        result.final_equity = ctx.portfolio.equity();

        info!(
            %status,
            orders = result.orders.len(),
            trades = result.trades.len(),
            final_equity = result.final_equity,
            "backtest finished"
        );
        Ok((result, status))
    }
}

/// Replays `bars` against `strategy` in one call.
///
/// ### Arguments
/// * `bars` - Bars ordered by strictly increasing timestamp.
/// * `strategy` - The strategy to run.
/// * `params` - Parameter overrides.
/// * `config` - Run parameters.
/// * `cancel` - Optional cancellation flag.
/// * `progress` - Optional progress callback.
pub fn run_backtest<S>(
    bars: impl Into<Arc<[Bar]>>,
    strategy: &mut S,
    params: &Params,
    config: RunConfig,
    cancel: Option<CancelFlag>,
    progress: Option<ProgressFn>,
) -> Result<(BacktestResult, RunStatus)>
where
    S: Strategy + ?Sized,
{
    let mut backtest = Backtest::new(bars, config)?;
    backtest.cancel = cancel;
    backtest.progress = progress;
    backtest.run(strategy, params)
}

/// Index of the rightmost bar with `ts <= limit`.
fn last_at_or_before(bars: &[Bar], limit: i64) -> Option<usize> {
    bars.partition_point(|bar| bar.ts() <= limit).checked_sub(1)
}

/// Settles one intent at the open of `bar`.
fn settle<S>(
    config: &RunConfig,
    bars: &[Bar],
    strategy: &mut S,
    ctx: &mut StrategyContext,
    result: &mut BacktestResult,
    intent: OrderIntent,
    bar: &Bar,
) where
    S: Strategy + ?Sized,
{
    let ts = bar.ts();
    let (side, size) = match intent.kind {
        IntentKind::Buy => (OrderSide::Buy, intent.size),
        IntentKind::Sell => (OrderSide::Sell, intent.size),
        IntentKind::Flatten => match ctx.position.side() {
            Some(side) => (side.exit_side(), ctx.position.size().abs()),
            None => return,
        },
    };
    let mut order = Order::from((intent.id, intent.submitted_ts, side, size));

    let fill_price = compute_fill_price(bar.open(), side, config.slippage_bps);
    if let Err(reason) = can_fill(size, fill_price, ctx.portfolio.equity(), config.leverage) {
        debug!(id = order.id, %side, size, fill_price, %reason, "order rejected");
        order.reject(reason);
        result.orders.push(order.clone());
        strategy.on_order(ctx, &order);
        return;
    }

    let fee = compute_fee(size, fill_price, config.commission_bps);
    match ctx.position.side() {
        None => {
            order.fill(ts, fill_price, fee);
            ctx.position.open(side, size, fill_price, ts, fee);
            ctx.portfolio.sub_fee(fee);
            ctx.portfolio.mark_to_market(&ctx.position, fill_price);
            debug!(id = order.id, %side, size, fill_price, fee, "position opened");
        }
        Some(_) if ctx.position.is_same_direction(side) => {
            ctx.warn_once("scaling", "scaling not supported", ts);
            return;
        }
        Some(position_side) => {
            order.fill(ts, fill_price, fee);
            let held = bars_held(bars, ctx, ts);
            let trade = close_trade(ctx, position_side, fill_price, fee, ts, held);
            debug!(id = order.id, %side, pnl = trade.pnl, "position closed");
            result.trades.push(trade.clone());
            strategy.on_trade(ctx, &trade);
            ctx.position.close();
            ctx.portfolio.mark_to_market(&ctx.position, fill_price);
        }
    }

    result.orders.push(order.clone());
    strategy.on_order(ctx, &order);
}

fn bars_held(bars: &[Bar], ctx: &StrategyContext, exit_ts: i64) -> u64 {
    let interval = (bars[1].ts() - bars[0].ts()).max(1);
    let entry_ts = ctx.position.entry_ts().unwrap_or(exit_ts);
    u64::try_from((exit_ts - entry_ts) / interval).unwrap_or(0).max(1)
}

/// Books the exit of the open position into cash and builds its trade.
fn close_trade(
    ctx: &mut StrategyContext,
    side: PositionSide,
    exit_price: f64,
    exit_fee: f64,
    exit_ts: i64,
    bars_held: u64,
) -> Trade {
    let position = ctx.position;
    let entry_price = position.entry_price().unwrap_or(exit_price);
    let gross_pnl = (exit_price - entry_price) * position.size();
    ctx.portfolio.add_pnl(gross_pnl);
    ctx.portfolio.sub_fee(exit_fee);

    let fee_total = position.entry_fee_total() + exit_fee;
    Trade {
        side,
        size: position.size().abs(),
        entry_ts: position.entry_ts().unwrap_or(exit_ts),
        entry_price,
        exit_ts,
        exit_price,
        pnl: gross_pnl - fee_total,
        fee_total,
        bars_held,
    }
}

/// Closes the open position at the close of `anchor`, outside the order flow.
fn force_close(config: &RunConfig, ctx: &mut StrategyContext, result: &mut BacktestResult, anchor: &Bar) {
    let Some(side) = ctx.position.side() else {
        return;
    };
    let fill_price = compute_fill_price(anchor.close(), side.exit_side(), config.slippage_bps);
    let fee = compute_fee(ctx.position.size(), fill_price, config.commission_bps);
    let trade = close_trade(ctx, side, fill_price, fee, anchor.ts(), 1);
    debug!(exit_ts = anchor.ts(), exit_price = fill_price, pnl = trade.pnl, "forced close");

    result.trades.push(trade);
    ctx.position.close();
    ctx.portfolio.mark_to_market(&ctx.position, fill_price);
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, atomic::AtomicUsize};

    use super::*;

    fn get_data() -> Vec<Bar> {
        vec![
            (0, 10.0, 12.0, 9.0, 11.0, 100.0).into(),
            (1, 11.0, 13.0, 10.0, 12.0, 100.0).into(),
            (2, 12.0, 14.0, 11.0, 13.0, 100.0).into(),
            (3, 13.0, 15.0, 12.0, 14.0, 100.0).into(),
        ]
    }

    // Rising bars one minute apart: open = 100 + i, close = 100.5 + i.
    fn get_ramp(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let open = 100.0 + i as f64;
                (i as i64 * 60_000, open, open + 1.0, open - 1.0, open + 0.5, 10.0).into()
            })
            .collect()
    }

    fn config() -> RunConfig {
        RunConfig {
            start_ts: 0,
            end_ts: 3,
            initial_cash: 1_000.0,
            ..Default::default()
        }
    }

    fn buy_then_flatten(ctx: &mut StrategyContext, index: usize) {
        match index {
            0 => {
                ctx.buy(1.0);
            }
            1 => {
                ctx.flatten();
            }
            _ => {}
        }
    }

    fn close_enough(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    /// Records every hook invocation.
    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl Strategy for Recorder {
        fn on_init(&mut self, ctx: &mut StrategyContext) {
            self.events.push("init".into());
            assert_eq!(ctx.buy(1.0), None);
        }

        fn on_bar(&mut self, ctx: &mut StrategyContext, index: usize) {
            self.events.push(format!("bar {index}"));
            buy_then_flatten(ctx, index);
        }

        fn on_order(&mut self, _ctx: &mut StrategyContext, order: &Order) {
            self.events.push(format!("order {} {}", order.side, order.status));
        }

        fn on_trade(&mut self, _ctx: &mut StrategyContext, trade: &Trade) {
            self.events.push(format!("trade {}", trade.side));
        }

        fn on_finish(&mut self, ctx: &mut StrategyContext) {
            self.events.push("finish".into());
            assert!(ctx.position().is_flat());
        }
    }

    #[test]
    fn not_enough_bars() {
        let bars = vec![Bar::from((0, 1.0, 1.0, 1.0, 1.0, 1.0))];
        assert!(matches!(Backtest::new(bars, config()), Err(Error::NotEnoughBars(1))));
        assert!(matches!(Backtest::new(Vec::new(), config()), Err(Error::NotEnoughBars(0))));
    }

    #[test]
    fn scenario_simple_round_trip() {
        let mut bt = Backtest::new(get_data(), config()).unwrap();
        let (result, status) = bt.run_with(buy_then_flatten).unwrap();

        assert_eq!(status, RunStatus::Done);
        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.side, PositionSide::Long);
        assert_eq!(trade.entry_price, 11.0);
        assert_eq!(trade.exit_price, 12.0);
        assert_eq!(trade.pnl, 1.0);
        assert_eq!(trade.fee_total, 0.0);

        assert_eq!(result.orders.len(), 2);
        assert!(result.orders.iter().all(Order::is_filled));
        assert_eq!(result.orders[0].id, 1);
        assert_eq!(result.orders[1].side, OrderSide::Sell);
        assert_eq!(result.equity_ts, vec![0, 1, 2]);
        assert_eq!(result.final_equity, 1_001.0);
    }

    #[test]
    fn scenario_commission() {
        let config = RunConfig {
            commission_bps: 100.0,
            ..config()
        };
        let mut bt = Backtest::new(get_data(), config).unwrap();
        let (result, _) = bt.run_with(buy_then_flatten).unwrap();

        let trade = &result.trades[0];
        assert!(close_enough(trade.fee_total, 0.23));
        assert!(close_enough(trade.pnl, 0.77));
        assert!(close_enough(trade.gross_pnl(), 1.0));
        assert!(close_enough(result.orders[0].fee.unwrap(), 0.11));
        assert!(close_enough(result.orders[1].fee.unwrap(), 0.12));
        assert!(close_enough(result.last_equity().unwrap(), 1_000.77));
        assert!(close_enough(result.final_equity, 1_000.77));
    }

    #[test]
    fn scenario_forced_close_with_slippage() {
        let config = RunConfig {
            slippage_bps: 100.0,
            ..config()
        };
        let mut bt = Backtest::new(get_data(), config).unwrap();
        let (result, status) = bt
            .run_with(|ctx, index| {
                if index == 0 {
                    ctx.buy(1.0);
                }
            })
            .unwrap();

        assert_eq!(status, RunStatus::Done);
        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert!(close_enough(trade.entry_price, 11.11));
        assert!(close_enough(trade.exit_price, 13.86));
        assert_eq!(trade.exit_ts, 3);
        assert_eq!(trade.bars_held, 1);
        // forced closes are not orders
        assert_eq!(result.orders.len(), 1);
    }

    #[test]
    fn scenario_margin_rejection() {
        let config = RunConfig {
            initial_cash: 10.0,
            ..config()
        };
        let mut bt = Backtest::new(get_data(), config).unwrap();
        let (result, _) = bt
            .run_with(|ctx, index| {
                if index == 0 {
                    ctx.buy(100.0);
                }
            })
            .unwrap();

        assert!(result.trades.is_empty());
        assert_eq!(result.orders.len(), 1);
        assert!(result.orders[0].is_rejected());
        assert_eq!(result.orders[0].reason, Some(RejectReason::Margin));
        assert!(result.orders[0].fill_price.is_none());
        assert!(result.equity.iter().all(|e| *e == 10.0));
        assert!(result.position_size.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn scenario_warmup_drops_intents() {
        let config = RunConfig {
            start_ts: 2,
            ..config()
        };
        let mut bt = Backtest::new(get_data(), config).unwrap();
        let (result, _) = bt
            .run_with(|ctx, index| {
                if index < 2 {
                    ctx.buy(1.0);
                    ctx.flatten();
                }
            })
            .unwrap();

        assert!(result.orders.is_empty());
        assert!(result.trades.is_empty());
        let warnings: Vec<_> = result.logs_at(LogLevel::Warn).map(|e| e.message.as_str()).collect();
        assert_eq!(
            warnings,
            ["trading disabled, buy ignored", "trading disabled, flatten ignored"]
        );
        assert_eq!(result.equity_ts, vec![2]);
    }

    #[test]
    fn short_round_trip_loses_on_rise() {
        let mut bt = Backtest::new(get_data(), config()).unwrap();
        let (result, _) = bt
            .run_with(|ctx, index| match index {
                0 => {
                    ctx.sell(1.0);
                }
                1 => {
                    ctx.flatten();
                }
                _ => {}
            })
            .unwrap();

        let trade = &result.trades[0];
        assert_eq!(trade.side, PositionSide::Short);
        assert_eq!(trade.size, 1.0);
        assert_eq!(trade.pnl, -1.0);
        assert_eq!(result.orders[1].side, OrderSide::Buy);
        assert_eq!(result.position_size, vec![0.0, -1.0, 0.0]);
    }

    #[test]
    fn end_ts_is_a_hard_boundary() {
        let config = RunConfig {
            end_ts: 1,
            ..config()
        };
        let mut bt = Backtest::new(get_data(), config).unwrap();
        let mut seen = Vec::new();
        let (result, status) = bt
            .run_with(|ctx, index| {
                seen.push(index);
                if index == 0 {
                    ctx.buy(1.0);
                }
            })
            .unwrap();

        assert_eq!(status, RunStatus::Done);
        assert_eq!(seen, vec![0, 1]);
        assert_eq!(result.equity_ts, vec![0, 1]);
        // forced close anchored at the last bar inside the window
        assert_eq!(result.trades[0].exit_ts, 1);
        assert_eq!(result.trades[0].exit_price, 12.0);
    }

    #[test]
    fn orders_fill_at_next_open() {
        let bars = get_ramp(6);
        let mut bt = Backtest::new(bars.clone(), RunConfig::default()).unwrap();
        let (result, _) = bt
            .run_with(|ctx, index| {
                if index == 2 {
                    ctx.buy(1.0);
                }
            })
            .unwrap();

        let order = &result.orders[0];
        assert_eq!(order.submitted_ts, bars[2].ts());
        assert_eq!(order.fill_ts, Some(bars[3].ts()));
        assert_eq!(order.fill_price, Some(bars[3].open()));
    }

    #[test]
    fn invalid_sizes_are_rejected() {
        let mut bt = Backtest::new(get_data(), config()).unwrap();
        let (result, _) = bt
            .run_with(|ctx, index| {
                if index == 0 {
                    ctx.buy(0.0);
                    ctx.sell(f64::NAN);
                    ctx.buy(-1.0);
                }
            })
            .unwrap();

        assert_eq!(result.orders.len(), 3);
        for order in &result.orders {
            assert!(order.is_rejected());
            assert_eq!(order.reason, Some(RejectReason::InvalidSize));
        }
    }

    #[test]
    fn scaling_is_skipped_and_warned_once() {
        let mut bt = Backtest::new(get_ramp(6), RunConfig::default()).unwrap();
        let (result, _) = bt
            .run_with(|ctx, index| {
                if index < 3 {
                    ctx.buy(1.0);
                }
            })
            .unwrap();

        // only the opening order is recorded
        assert_eq!(result.orders.len(), 1);
        assert_eq!(result.position_size[3], 1.0);
        let warnings: Vec<_> = result.logs_at(LogLevel::Warn).collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].message, "scaling not supported");
        assert_eq!(warnings[0].bar_ts, Some(120_000));
    }

    /// Submits a fixed list of buy sizes per bar and records order and trade hooks.
    struct BuyScript {
        sizes: Vec<Vec<f64>>,
        events: Vec<String>,
    }

    impl Strategy for BuyScript {
        fn on_bar(&mut self, ctx: &mut StrategyContext, index: usize) {
            for size in self.sizes.get(index).into_iter().flatten() {
                ctx.buy(*size);
            }
        }

        fn on_order(&mut self, _ctx: &mut StrategyContext, order: &Order) {
            let event = match order.reason {
                Some(reason) => format!("order {} {reason}", order.status),
                None => format!("order {} {}", order.side, order.status),
            };
            self.events.push(event);
        }

        fn on_trade(&mut self, _ctx: &mut StrategyContext, trade: &Trade) {
            self.events.push(format!("trade {}", trade.side));
        }
    }

    #[test]
    fn only_resolved_orders_reach_hooks() {
        let mut script = BuyScript {
            sizes: vec![vec![0.0, 1e9, 1.0], vec![1.0]],
            events: Vec::new(),
        };
        let mut bt = Backtest::new(get_ramp(6), RunConfig::default()).unwrap();
        let (result, status) = bt.run(&mut script, &Params::new()).unwrap();

        assert_eq!(status, RunStatus::Done);
        assert_eq!(
            script.events,
            ["order REJECTED invalid_size", "order REJECTED margin", "order BUY FILLED"]
        );
        assert_eq!(result.orders.len(), 3);
        // the forced close books a trade without calling `on_trade`
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].bars_held, 1);
    }

    #[test]
    fn opposite_order_closes_whole_position() {
        let mut bt = Backtest::new(get_ramp(6), RunConfig::default()).unwrap();
        let (result, _) = bt
            .run_with(|ctx, index| match index {
                0 => {
                    ctx.buy(2.0);
                }
                1 => {
                    ctx.sell(1.0);
                }
                _ => {}
            })
            .unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].size, 2.0);
        assert_eq!(result.position_size[2], 0.0);
    }

    #[test]
    fn bars_held_counts_intervals() {
        let mut bt = Backtest::new(get_ramp(8), RunConfig::default()).unwrap();
        let (result, _) = bt
            .run_with(|ctx, index| match index {
                0 => {
                    ctx.buy(1.0);
                }
                3 => {
                    ctx.flatten();
                }
                _ => {}
            })
            .unwrap();

        let trade = &result.trades[0];
        assert_eq!(trade.entry_ts, 60_000);
        assert_eq!(trade.exit_ts, 240_000);
        assert_eq!(trade.bars_held, 3);
    }

    #[test]
    fn hooks_are_called_in_order() {
        let mut bt = Backtest::new(get_data(), config()).unwrap();
        let mut recorder = Recorder::default();
        bt.run(&mut recorder, &Params::new()).unwrap();

        assert_eq!(
            recorder.events,
            [
                "init",
                "bar 0",
                "order BUY FILLED",
                "bar 1",
                "trade LONG",
                "order SELL FILLED",
                "bar 2",
                "finish"
            ]
        );
    }

    #[test]
    fn keeps_position_open_without_close_on_finish() {
        let config = RunConfig {
            close_on_finish: false,
            ..config()
        };
        let mut bt = Backtest::new(get_data(), config).unwrap();
        let (result, _) = bt
            .run_with(|ctx, index| {
                if index == 0 {
                    ctx.buy(1.0);
                }
            })
            .unwrap();

        assert!(result.trades.is_empty());
        assert_eq!(result.position_size.last(), Some(&1.0));
        // marked at the close of bar 2
        assert_eq!(result.final_equity, 1_002.0);
    }

    #[test]
    fn cancel_forces_close_at_current_bar() {
        let bars = get_ramp(250);
        let cancel = CancelFlag::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let progress_cancel = cancel.clone();
        let progress_calls = Arc::clone(&calls);
        let mut bt = Backtest::new(bars.clone(), RunConfig::default())
            .unwrap()
            .with_cancel_flag(cancel)
            .with_progress(move |i, n| {
                progress_calls.lock().unwrap().push((i, n));
                if i == 100 {
                    progress_cancel.cancel();
                }
            });

        let (result, status) = bt
            .run_with(|ctx, index| {
                if index == 0 {
                    ctx.buy(1.0);
                }
            })
            .unwrap();

        assert_eq!(status, RunStatus::Canceled);
        assert_eq!(*calls.lock().unwrap(), vec![(0, 250), (100, 250)]);
        assert_eq!(result.len(), 200);
        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.exit_ts, bars[200].ts());
        assert_eq!(trade.exit_price, bars[200].close());
        assert_eq!(trade.bars_held, 1);
    }

    #[test]
    fn cancel_seen_past_end_anchors_at_end() {
        let bars = get_ramp(250);
        let cancel = CancelFlag::new();
        let config = RunConfig {
            end_ts: bars[99].ts() + 30_000,
            ..Default::default()
        };

        let progress_cancel = cancel.clone();
        let mut bt = Backtest::new(bars.clone(), config)
            .unwrap()
            .with_cancel_flag(cancel)
            .with_progress(move |_, _| progress_cancel.cancel());

        let (result, status) = bt
            .run_with(|ctx, index| {
                if index == 0 {
                    ctx.buy(1.0);
                }
            })
            .unwrap();

        // bar 100 is past the window, but the poll comes first
        assert_eq!(status, RunStatus::Canceled);
        assert_eq!(result.len(), 100);
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].exit_ts, bars[99].ts());
        assert_eq!(result.trades[0].exit_price, bars[99].close());
    }

    #[test]
    fn cancel_before_first_bar() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let bars_seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&bars_seen);

        let mut recorder = Recorder::default();
        let (result, status) = run_backtest(
            get_data(),
            &mut recorder,
            &Params::new(),
            config(),
            Some(cancel),
            Some(Box::new(move |_, _| {
                counter.fetch_add(1, Ordering::Relaxed);
            })),
        )
        .unwrap();

        assert_eq!(status, RunStatus::Canceled);
        assert!(result.is_empty());
        assert_eq!(bars_seen.load(Ordering::Relaxed), 0);
        assert_eq!(recorder.events, ["init", "finish"]);
    }

    #[test]
    fn pending_intents_on_last_decision_bar_are_discarded() {
        let mut bt = Backtest::new(get_data(), config()).unwrap();
        let (result, _) = bt
            .run_with(|ctx, index| {
                if index == 2 {
                    ctx.buy(1.0);
                }
            })
            .unwrap();

        assert!(result.orders.is_empty());
        assert!(result.trades.is_empty());
    }

    #[test]
    fn cancel_warns_once_per_run() {
        let mut bt = Backtest::new(get_data(), config()).unwrap();
        let (result, _) = bt.run_with(|ctx, index| ctx.cancel(index as u64)).unwrap();

        let warnings: Vec<_> = result.logs_at(LogLevel::Warn).collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].message, "cancel not supported");
    }

    #[test]
    fn invalid_params_are_refused_before_running() {
        struct WithSchema;
        impl Strategy for WithSchema {
            fn schema(&self) -> Schema {
                Schema::new(vec![ParamSpec::new("length", 10i64).range(1.0, 100.0)])
            }
        }

        let mut bt = Backtest::new(get_data(), config()).unwrap();
        let params = Params::from([("length", 0i64)]);
        assert!(bt.run(&mut WithSchema, &params).is_err());
        assert!(bt.run(&mut WithSchema, &Params::new()).is_ok());
    }

    #[test]
    fn runs_are_deterministic() {
        let bars: Arc<[Bar]> = crate::utils::random_walk_bars(500, 3, 250.0).into();
        let config = RunConfig {
            commission_bps: 5.0,
            slippage_bps: 2.0,
            ..Default::default()
        };

        let run = || {
            let mut bt = Backtest::new(Arc::clone(&bars), config.clone()).unwrap();
            bt.run_with(|ctx, index| {
                let fast = ctx.ind().ema(crate::indicators::Source::Close, 5);
                let slow = ctx.ind().ema(crate::indicators::Source::Close, 20);
                if fast[index] > slow[index] && ctx.position().is_flat() {
                    let size = ctx.size().percent_equity(0.5);
                    ctx.buy(size);
                } else if fast[index] < slow[index] {
                    ctx.flatten();
                }
            })
            .unwrap()
            .0
        };

        let (a, b) = (run(), run());
        assert_eq!(a.equity, b.equity);
        let tuples = |r: &BacktestResult| {
            r.trades
                .iter()
                .map(|t| (t.entry_price, t.exit_price, t.pnl))
                .collect::<Vec<_>>()
        };
        assert_eq!(tuples(&a), tuples(&b));
        assert!(!a.trades.is_empty());
    }

    #[test]
    fn last_bar_lookup() {
        let bars = get_data();
        assert_eq!(last_at_or_before(&bars, -1), None);
        assert_eq!(last_at_or_before(&bars, 0), Some(0));
        assert_eq!(last_at_or_before(&bars, 2), Some(2));
        assert_eq!(last_at_or_before(&bars, i64::MAX), Some(3));
    }
}
