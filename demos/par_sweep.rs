use bts_replay::prelude::*;

struct Lengths;

impl ParameterCombination for Lengths {
    type Output = (i64, i64);

    fn generate() -> Vec<Self::Output> {
        (5..=20)
            .step_by(5)
            .flat_map(|fast| (30..=90).step_by(10).map(move |slow| (fast, slow)))
            .collect()
    }
}

struct Crossover;

impl Strategy for Crossover {
    fn schema(&self) -> Schema {
        Schema::new(vec![ParamSpec::new("fast", 10i64), ParamSpec::new("slow", 50i64)])
    }

    fn on_bar(&mut self, ctx: &mut StrategyContext, index: usize) {
        let (Some(fast), Some(slow)) = (ctx.params().get_usize("fast"), ctx.params().get_usize("slow")) else {
            return;
        };
        let fast = ctx.ind().sma(Source::Close, fast);
        let slow = ctx.ind().sma(Source::Close, slow);
        if fast[index] > slow[index] {
            ctx.buy(ctx.size().percent_equity(0.9));
        } else if fast[index] < slow[index] {
            ctx.flatten();
        }
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let bars = bts_replay::utils::random_walk_bars(20_000, 7, 100.0);
    let config = RunConfig {
        commission_bps: 4.0,
        ..Default::default()
    };

    let optimizer = Optimizer::<Lengths>::new(bars, config);
    let mut results =
        optimizer.with(|&(fast, slow)| Ok((Crossover, Params::from([("fast", fast), ("slow", slow)]))))?;
    results.sort_by(|a, b| b.1.total_cmp(&a.1));

    for ((fast, slow), equity, status) in results.iter().take(5) {
        println!("fast={fast:>2} slow={slow:>2} equity={equity:.2} ({status})");
    }
    Ok(())
}
