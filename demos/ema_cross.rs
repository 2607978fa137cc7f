use bts_replay::prelude::*;
use tracing_subscriber::EnvFilter;

/// Long when the fast EMA is above the slow one, flat otherwise.
struct EmaCross {
    trades: usize,
}

impl Strategy for EmaCross {
    fn schema(&self) -> Schema {
        Schema::new(vec![
            ParamSpec::new("fast", 12i64).range(1.0, 200.0).describe("fast EMA length"),
            ParamSpec::new("slow", 26i64).range(2.0, 400.0).describe("slow EMA length"),
            ParamSpec::new("risk", 0.5).range(0.0, 1.0).describe("fraction of equity per entry"),
        ])
    }

    fn on_init(&mut self, ctx: &mut StrategyContext) {
        ctx.state.insert("crosses".to_owned(), ParamValue::Int(0));
    }

    fn on_bar(&mut self, ctx: &mut StrategyContext, index: usize) {
        let params = ctx.params();
        let (fast, slow, risk) = (
            params.get_usize("fast").unwrap_or(12),
            params.get_usize("slow").unwrap_or(26),
            params.get_f64("risk").unwrap_or(0.5),
        );
        let fast = ctx.ind().ema(Source::Close, fast);
        let slow = ctx.ind().ema(Source::Close, slow);
        if index == 0 {
            return;
        }

        let crossed_up = fast[index - 1] <= slow[index - 1] && fast[index] > slow[index];
        let crossed_down = fast[index - 1] >= slow[index - 1] && fast[index] < slow[index];
        if crossed_up || crossed_down {
            if let Some(ParamValue::Int(n)) = ctx.state.get_mut("crosses") {
                *n += 1;
            }
        }

        if crossed_up && ctx.position().is_flat() {
            let size = ctx.size().percent_equity(risk);
            ctx.buy(size);
        } else if crossed_down {
            ctx.flatten();
        }
    }

    fn on_trade(&mut self, ctx: &mut StrategyContext, trade: &Trade) {
        self.trades += 1;
        let message = format!("{} closed, pnl {:.2} after {} bars", trade.side, trade.pnl, trade.bars_held);
        ctx.logger().info(message, trade.exit_ts, Some(trade.exit_ts));
    }

    fn on_finish(&mut self, ctx: &mut StrategyContext) {
        let crosses = ctx.state.get("crosses").and_then(ParamValue::as_i64).unwrap_or(0);
        tracing::info!(crosses, trades = self.trades, "strategy finished");
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let bars = bts_replay::utils::random_walk_bars(5_000, 42, 100.0);
    let config = RunConfig {
        symbol: "DEMO".to_owned(),
        timeframe: "1m".to_owned(),
        start_ts: bars[200].ts(),
        commission_bps: 5.0,
        slippage_bps: 2.0,
        ..Default::default()
    };
    config.validate()?;

    let initial_cash = config.initial_cash;
    let mut backtest = Backtest::new(bars, config)?;
    let mut strategy = EmaCross { trades: 0 };
    let params = Params::from([("fast", 9i64), ("slow", 21i64)]);
    let (result, status) = backtest.run(&mut strategy, &params)?;

    println!("status: {status}");
    #[cfg(feature = "metrics")]
    println!("{}", Report::new(&result, initial_cash));
    #[cfg(not(feature = "metrics"))]
    println!("final equity: {:.2} (initial {initial_cash:.2})", result.final_equity);

    Ok(())
}
