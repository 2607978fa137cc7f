//! Indicator registry, built-in implementations and the per-run memoizing proxy.
//!
//! Every series returned here has one value per bar, `NaN` where the indicator is not
//! yet defined. A length below 1 yields an all-`NaN` series.

use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::Bar;
use crate::errors::{Error, Result};

/// Bar field an indicator reads.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// Open price.
    Open,
    /// High price.
    High,
    /// Low price.
    Low,
    /// Close price.
    Close,
    /// Volume.
    Volume,
}

impl Source {
    /// Reads this field from a bar.
    pub fn of(self, bar: &Bar) -> f64 {
        match self {
            Self::Open => bar.open(),
            Self::High => bar.high(),
            Self::Low => bar.low(),
            Self::Close => bar.close(),
            Self::Volume => bar.volume(),
        }
    }
}

/// The fixed set of indicator functions.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorFn {
    /// Simple moving average.
    Sma,
    /// Exponential moving average, seeded with the first value.
    Ema,
    /// Wilder's moving average (`alpha = 1 / length`).
    Rma,
    /// Linearly weighted moving average.
    Wma,
    /// Relative strength index.
    Rsi,
    /// Population standard deviation over a window.
    Stdev,
    /// Rolling maximum.
    Highest,
    /// Rolling minimum.
    Lowest,
    /// Difference with the value `length` bars ago.
    Momentum,
    /// Percent change from the value `length` bars ago.
    Roc,
    /// Average true range, reads high, low and close.
    Atr,
}

impl IndicatorFn {
    /// Every registered function.
    pub const ALL: [Self; 11] = [
        Self::Sma,
        Self::Ema,
        Self::Rma,
        Self::Wma,
        Self::Rsi,
        Self::Stdev,
        Self::Highest,
        Self::Lowest,
        Self::Momentum,
        Self::Roc,
        Self::Atr,
    ];

    /// Registry name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Sma => "sma",
            Self::Ema => "ema",
            Self::Rma => "rma",
            Self::Wma => "wma",
            Self::Rsi => "rsi",
            Self::Stdev => "stdev",
            Self::Highest => "highest",
            Self::Lowest => "lowest",
            Self::Momentum => "momentum",
            Self::Roc => "roc",
            Self::Atr => "atr",
        }
    }

    /// Number of input series.
    pub fn input_count(self) -> usize {
        match self {
            Self::Atr => 3,
            _ => 1,
        }
    }

    /// Number of numeric arguments. All functions take a single length.
    pub fn arg_count(self) -> usize {
        1
    }
}

impl fmt::Display for IndicatorFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IndicatorFn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|func| func.name() == lower)
            .ok_or_else(|| Error::UnknownIndicator(s.to_owned()))
    }
}

/// A technical indicator library.
///
/// `inputs` holds one column per source, each as long as the bar series;
/// implementations must return a series of that same length.
pub trait IndicatorLibrary: Send + Sync {
    /// Computes `func` over `inputs` with numeric `args`.
    fn compute(&self, func: IndicatorFn, inputs: &[&[f64]], args: &[f64]) -> Result<Vec<f64>>;
}

/// The built-in indicator library.
#[derive(Debug, Clone, Copy, Default)]
pub struct Builtin;

impl IndicatorLibrary for Builtin {
    fn compute(&self, func: IndicatorFn, inputs: &[&[f64]], args: &[f64]) -> Result<Vec<f64>> {
        check_arity(func, "inputs", func.input_count(), inputs.len())?;
        check_arity(func, "args", func.arg_count(), args.len())?;

        let length = to_length(args[0]);
        let values = inputs[0];
        Ok(match func {
            IndicatorFn::Sma => sma(values, length),
            IndicatorFn::Ema => ema(values, length),
            IndicatorFn::Rma => rma(values, length),
            IndicatorFn::Wma => wma(values, length),
            IndicatorFn::Rsi => rsi(values, length),
            IndicatorFn::Stdev => stdev(values, length),
            IndicatorFn::Highest => highest(values, length),
            IndicatorFn::Lowest => lowest(values, length),
            IndicatorFn::Momentum => momentum(values, length),
            IndicatorFn::Roc => roc(values, length),
            IndicatorFn::Atr => atr(inputs[0], inputs[1], inputs[2], length),
        })
    }
}

fn check_arity(func: IndicatorFn, what: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(Error::IndicatorArgs {
            name: func.name(),
            what,
            expected,
            got,
        });
    }
    Ok(())
}

// Non-finite and sub-1 lengths map to 0, which every function treats as undefined.
fn to_length(arg: f64) -> usize {
    if arg.is_finite() && arg >= 1.0 { arg as usize } else { 0 }
}

fn nan_series(n: usize) -> Vec<f64> {
    vec![f64::NAN; n]
}

/// Simple moving average. `NaN` inputs count as zero.
pub fn sma(values: &[f64], length: usize) -> Vec<f64> {
    let mut out = nan_series(values.len());
    if length == 0 {
        return out;
    }
    let mut sum = 0.0;
    for (i, v) in values.iter().enumerate() {
        sum += if v.is_nan() { 0.0 } else { *v };
        if i >= length {
            let old = values[i - length];
            sum -= if old.is_nan() { 0.0 } else { old };
        }
        if i + 1 >= length {
            out[i] = sum / length as f64;
        }
    }
    out
}

fn smoothed(values: &[f64], length: usize, alpha: f64) -> Vec<f64> {
    let mut out = nan_series(values.len());
    if length == 0 {
        return out;
    }
    let mut current = f64::NAN;
    for (slot, v) in out.iter_mut().zip(values) {
        if !v.is_nan() {
            current = if current.is_nan() { *v } else { alpha * v + (1.0 - alpha) * current };
        }
        *slot = current;
    }
    out
}

/// Exponential moving average with `alpha = 2 / (length + 1)`, seeded with the first value.
pub fn ema(values: &[f64], length: usize) -> Vec<f64> {
    smoothed(values, length, 2.0 / (length as f64 + 1.0))
}

/// Wilder's moving average with `alpha = 1 / length`, seeded with the first value.
pub fn rma(values: &[f64], length: usize) -> Vec<f64> {
    smoothed(values, length, 1.0 / length as f64)
}

fn rolling(values: &[f64], length: usize, f: impl Fn(&[f64]) -> Option<f64>) -> Vec<f64> {
    let mut out = nan_series(values.len());
    if length == 0 || length > values.len() {
        return out;
    }
    for (i, window) in values.windows(length).enumerate() {
        if let Some(v) = f(window) {
            out[i + length - 1] = v;
        }
    }
    out
}

/// Linearly weighted moving average. Windows containing `NaN` stay undefined.
pub fn wma(values: &[f64], length: usize) -> Vec<f64> {
    let weight_sum = length as f64 * (length as f64 + 1.0) / 2.0;
    rolling(values, length, |window| {
        if window.iter().any(|v| v.is_nan()) {
            return None;
        }
        let dot: f64 = window.iter().enumerate().map(|(w, v)| (w + 1) as f64 * v).sum();
        Some(dot / weight_sum)
    })
}

/// Relative strength index over Wilder-smoothed gains and losses. The first value is `NaN`.
pub fn rsi(values: &[f64], length: usize) -> Vec<f64> {
    let mut out = nan_series(values.len());
    if length == 0 || values.len() < 2 {
        return out;
    }
    let (gains, losses): (Vec<f64>, Vec<f64>) = values
        .windows(2)
        .map(|w| {
            let diff = w[1] - w[0];
            (if diff > 0.0 { diff } else { 0.0 }, if diff < 0.0 { -diff } else { 0.0 })
        })
        .unzip();
    let avg_gain = rma(&gains, length);
    let avg_loss = rma(&losses, length);
    for (i, (gain, loss)) in avg_gain.iter().zip(&avg_loss).enumerate() {
        if *loss != 0.0 {
            out[i + 1] = 100.0 - 100.0 / (1.0 + gain / loss);
        }
    }
    out
}

/// Population standard deviation. Windows containing `NaN` stay undefined.
pub fn stdev(values: &[f64], length: usize) -> Vec<f64> {
    rolling(values, length, |window| {
        if window.iter().any(|v| v.is_nan()) {
            return None;
        }
        let n = window.len() as f64;
        let mean = window.iter().sum::<f64>() / n;
        let var = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(var.sqrt())
    })
}

/// Rolling maximum, ignoring `NaN`.
pub fn highest(values: &[f64], length: usize) -> Vec<f64> {
    rolling(values, length, |window| {
        let max = window.iter().copied().fold(f64::NAN, f64::max);
        (!max.is_nan()).then_some(max)
    })
}

/// Rolling minimum, ignoring `NaN`.
pub fn lowest(values: &[f64], length: usize) -> Vec<f64> {
    rolling(values, length, |window| {
        let min = window.iter().copied().fold(f64::NAN, f64::min);
        (!min.is_nan()).then_some(min)
    })
}

/// `values[i] - values[i - length]`.
pub fn momentum(values: &[f64], length: usize) -> Vec<f64> {
    let mut out = nan_series(values.len());
    if length == 0 {
        return out;
    }
    for i in length..values.len() {
        out[i] = values[i] - values[i - length];
    }
    out
}

/// Percent change from `values[i - length]`; undefined where the base is zero.
pub fn roc(values: &[f64], length: usize) -> Vec<f64> {
    let mut out = nan_series(values.len());
    if length == 0 {
        return out;
    }
    for i in length..values.len() {
        let prev = values[i - length];
        if prev != 0.0 {
            out[i] = (values[i] - prev) / prev * 100.0;
        }
    }
    out
}

/// Average true range: Wilder-smoothed true range, where the first true range is `high - low`.
pub fn atr(high: &[f64], low: &[f64], close: &[f64], length: usize) -> Vec<f64> {
    let n = high.len().min(low.len()).min(close.len());
    let true_range: Vec<f64> = (0..n)
        .map(|i| {
            let range = high[i] - low[i];
            if i == 0 {
                range
            } else {
                let prev_close = close[i - 1];
                range.max((high[i] - prev_close).abs()).max((low[i] - prev_close).abs())
            }
        })
        .collect();
    rma(&true_range, length)
}

/// Memoization key: function identity, input sources and the bit patterns of the arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndicatorKey {
    func: IndicatorFn,
    sources: Vec<Source>,
    args: Vec<u64>,
}

impl IndicatorKey {
    /// Builds a key.
    pub fn new(func: IndicatorFn, sources: &[Source], args: &[f64]) -> Self {
        Self {
            func,
            sources: sources.to_vec(),
            args: args.iter().map(|a| a.to_bits()).collect(),
        }
    }
}

/// Per-run indicator front end. Each distinct call is computed once and shared afterwards.
pub struct IndicatorProxy {
    bars: Arc<[Bar]>,
    library: Arc<dyn IndicatorLibrary>,
    cache: HashMap<IndicatorKey, Arc<[f64]>>,
}

impl fmt::Debug for IndicatorProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndicatorProxy")
            .field("bars", &self.bars.len())
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl IndicatorProxy {
    /// Creates a proxy over `bars` backed by `library`.
    pub fn new(bars: Arc<[Bar]>, library: Arc<dyn IndicatorLibrary>) -> Self {
        Self {
            bars,
            library,
            cache: HashMap::new(),
        }
    }

    /// Number of memoized series.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Computes (or returns the memoized) `func` over the given sources.
    ///
    /// ### Arguments
    /// * `func` - Registered indicator function.
    /// * `sources` - One bar field per expected input series.
    /// * `args` - Numeric arguments, e.g. `[14.0]` for a length.
    ///
    /// ### Returns
    /// The series, one value per bar, or [`Error::IndicatorArgs`] if the library refuses
    /// the call. Failures are not memoized.
    pub fn call(&mut self, func: IndicatorFn, sources: &[Source], args: &[f64]) -> Result<Arc<[f64]>> {
        let key = IndicatorKey::new(func, sources, args);
        if let Some(series) = self.cache.get(&key) {
            return Ok(Arc::clone(series));
        }

        let columns: Vec<Vec<f64>> = sources
            .iter()
            .map(|source| self.bars.iter().map(|bar| source.of(bar)).collect())
            .collect();
        let inputs: Vec<&[f64]> = columns.iter().map(Vec::as_slice).collect();
        let series: Arc<[f64]> = align(self.library.compute(func, &inputs, args)?, self.bars.len()).into();

        self.cache.insert(key, Arc::clone(&series));
        Ok(series)
    }

    fn call_or_nan(&mut self, func: IndicatorFn, sources: &[Source], args: &[f64]) -> Arc<[f64]> {
        self.call(func, sources, args).unwrap_or_else(|err| {
            tracing::warn!(indicator = %func, error = %err, "indicator failed, using NaN series");
            nan_series(self.bars.len()).into()
        })
    }

    /// Simple moving average of `source`.
    pub fn sma(&mut self, source: Source, length: usize) -> Arc<[f64]> {
        self.call_or_nan(IndicatorFn::Sma, &[source], &[length as f64])
    }

    /// Exponential moving average of `source`.
    pub fn ema(&mut self, source: Source, length: usize) -> Arc<[f64]> {
        self.call_or_nan(IndicatorFn::Ema, &[source], &[length as f64])
    }

    /// Wilder's moving average of `source`.
    pub fn rma(&mut self, source: Source, length: usize) -> Arc<[f64]> {
        self.call_or_nan(IndicatorFn::Rma, &[source], &[length as f64])
    }

    /// Weighted moving average of `source`.
    pub fn wma(&mut self, source: Source, length: usize) -> Arc<[f64]> {
        self.call_or_nan(IndicatorFn::Wma, &[source], &[length as f64])
    }

    /// Relative strength index of `source`.
    pub fn rsi(&mut self, source: Source, length: usize) -> Arc<[f64]> {
        self.call_or_nan(IndicatorFn::Rsi, &[source], &[length as f64])
    }

    /// Standard deviation of `source`.
    pub fn stdev(&mut self, source: Source, length: usize) -> Arc<[f64]> {
        self.call_or_nan(IndicatorFn::Stdev, &[source], &[length as f64])
    }

    /// Rolling maximum of `source`.
    pub fn highest(&mut self, source: Source, length: usize) -> Arc<[f64]> {
        self.call_or_nan(IndicatorFn::Highest, &[source], &[length as f64])
    }

    /// Rolling minimum of `source`.
    pub fn lowest(&mut self, source: Source, length: usize) -> Arc<[f64]> {
        self.call_or_nan(IndicatorFn::Lowest, &[source], &[length as f64])
    }

    /// Momentum of `source`.
    pub fn momentum(&mut self, source: Source, length: usize) -> Arc<[f64]> {
        self.call_or_nan(IndicatorFn::Momentum, &[source], &[length as f64])
    }

    /// Rate of change of `source`, in percent.
    pub fn roc(&mut self, source: Source, length: usize) -> Arc<[f64]> {
        self.call_or_nan(IndicatorFn::Roc, &[source], &[length as f64])
    }

    /// Average true range.
    pub fn atr(&mut self, length: usize) -> Arc<[f64]> {
        self.call_or_nan(
            IndicatorFn::Atr,
            &[Source::High, Source::Low, Source::Close],
            &[length as f64],
        )
    }
}

// Libraries may return fewer values (unpadded warmup) or more; keep the tail, pad the head.
fn align(mut series: Vec<f64>, n: usize) -> Vec<f64> {
    if series.len() > n {
        series.drain(..series.len() - n);
    } else if series.len() < n {
        let mut padded = nan_series(n - series.len());
        padded.append(&mut series);
        series = padded;
    }
    series
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close_enough(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn bars(closes: &[f64]) -> Arc<[Bar]> {
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| Bar::from((i as i64, *c, c + 1.0, c - 1.0, *c, 10.0)))
            .collect()
    }

    #[test]
    fn sma_values() {
        let out = sma(&[1.0, 2.0, 3.0, 4.0], 2);
        assert!(out[0].is_nan());
        assert_eq!(&out[1..], &[1.5, 2.5, 3.5]);
    }

    #[test]
    fn non_positive_length_is_all_nan() {
        let values = [1.0, 2.0, 3.0];
        for func in IndicatorFn::ALL {
            let inputs = vec![&values[..]; func.input_count()];
            let out = Builtin.compute(func, &inputs, &[0.0]).unwrap();
            assert_eq!(out.len(), 3);
            assert!(out.iter().all(|v| v.is_nan()), "{func} should be all NaN");
        }
    }

    #[test]
    fn oversized_length_does_not_panic() {
        let values = [1.0, 2.0, 3.0];
        for func in IndicatorFn::ALL {
            let inputs = vec![&values[..]; func.input_count()];
            for length in [4.0, 5e9, 1e300] {
                let out = Builtin.compute(func, &inputs, &[length]).unwrap();
                assert_eq!(out.len(), 3);
                // smoothed averages are seeded with the first value
                let windowed = !matches!(func, IndicatorFn::Ema | IndicatorFn::Rma | IndicatorFn::Rsi | IndicatorFn::Atr);
                if windowed {
                    assert!(out.iter().all(|v| v.is_nan()), "{func}({length}) should be all NaN");
                }
            }
        }
    }

    #[test]
    fn proxy_survives_huge_wma_length() {
        let mut proxy = IndicatorProxy::new(bars(&[1.0, 2.0, 3.0, 4.0]), Arc::new(Builtin));
        assert!(proxy.wma(Source::Close, 5_000_000_000).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn ema_matches_ta() {
        use ta::{Next, indicators::ExponentialMovingAverage};

        let values = [10.0, 11.0, 12.5, 11.0, 13.0, 14.0, 12.0, 15.0];
        let mut reference = ExponentialMovingAverage::new(3).unwrap();
        for (ours, v) in ema(&values, 3).iter().zip(values) {
            assert!(close_enough(*ours, reference.next(v)));
        }
    }

    #[test]
    fn sma_matches_ta_once_window_is_full() {
        use ta::{Next, indicators::SimpleMovingAverage};

        let values = [10.0, 11.0, 12.5, 11.0, 13.0, 14.0, 12.0, 15.0];
        let mut reference = SimpleMovingAverage::new(4).unwrap();
        for (i, (ours, v)) in sma(&values, 4).iter().zip(values).enumerate() {
            let expected = reference.next(v);
            if i >= 3 {
                assert!(close_enough(*ours, expected));
            }
        }
    }

    #[test]
    fn rsi_bounds() {
        let values = [1.0, 2.0, 1.5, 3.0, 2.0, 4.0, 3.5];
        let out = rsi(&values, 3);
        assert!(out[0].is_nan());
        assert!(out[1].is_nan());
        assert!(out[2..].iter().all(|v| (0.0..=100.0).contains(v)));
        assert!(rsi(&[1.0, 2.0, 3.0], 2)[1..].iter().all(|v| v.is_nan()));
    }

    #[test]
    fn rolling_extremes_and_momentum() {
        let values = [3.0, 1.0, 4.0, 1.0, 5.0];
        assert_eq!(&highest(&values, 2)[1..], &[3.0, 4.0, 4.0, 5.0]);
        assert_eq!(&lowest(&values, 3)[2..], &[1.0, 1.0, 1.0]);
        assert_eq!(&momentum(&values, 1)[1..], &[-2.0, 3.0, -3.0, 4.0]);
        assert!(roc(&[0.0, 1.0], 1)[1].is_nan());
        assert!(highest(&values, 9).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn wma_and_stdev() {
        let out = wma(&[1.0, 2.0, 3.0], 3);
        assert!(close_enough(out[2], (1.0 + 4.0 + 9.0) / 6.0));
        let out = stdev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], 8);
        assert!(close_enough(out[7], 2.0));
    }

    #[test]
    fn atr_first_range() {
        let out = atr(&[12.0, 13.0], &[9.0, 10.0], &[11.0, 12.0], 2);
        assert_eq!(out[0], 3.0);
        assert!(close_enough(out[1], 3.0));
    }

    #[test]
    fn arity_errors() {
        let values = [1.0, 2.0];
        let err = Builtin.compute(IndicatorFn::Atr, &[&values[..]], &[2.0]).unwrap_err();
        assert!(matches!(
            err,
            Error::IndicatorArgs {
                name: "atr",
                what: "inputs",
                expected: 3,
                got: 1
            }
        ));
        assert!(Builtin.compute(IndicatorFn::Sma, &[&values[..]], &[]).is_err());
    }

    #[test]
    fn parse_names() {
        assert_eq!("EMA".parse::<IndicatorFn>().unwrap(), IndicatorFn::Ema);
        assert!("vwap".parse::<IndicatorFn>().is_err());
    }

    #[test]
    fn proxy_memoizes() {
        let mut proxy = IndicatorProxy::new(bars(&[1.0, 2.0, 3.0, 4.0]), Arc::new(Builtin));
        let a = proxy.sma(Source::Close, 2);
        let b = proxy.sma(Source::Close, 2);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(proxy.cached(), 1);

        proxy.sma(Source::Open, 2);
        proxy.ema(Source::Close, 2);
        assert_eq!(proxy.cached(), 3);
    }

    #[test]
    fn proxy_errors() {
        let mut proxy = IndicatorProxy::new(bars(&[1.0, 2.0, 3.0]), Arc::new(Builtin));
        assert!(proxy.call(IndicatorFn::Atr, &[Source::Close], &[2.0]).is_err());
        assert_eq!(proxy.cached(), 0);

        let atr = proxy.atr(2);
        assert_eq!(atr.len(), 3);
        assert_eq!(atr[0], 2.0);
    }

    #[test]
    fn proxy_aligns_short_library_output() {
        struct Short;
        impl IndicatorLibrary for Short {
            fn compute(&self, _: IndicatorFn, _: &[&[f64]], _: &[f64]) -> Result<Vec<f64>> {
                Ok(vec![7.0])
            }
        }

        let mut proxy = IndicatorProxy::new(bars(&[1.0, 2.0, 3.0]), Arc::new(Short));
        let out = proxy.sma(Source::Close, 1);
        assert_eq!(out.len(), 3);
        assert!(out[0].is_nan() && out[1].is_nan());
        assert_eq!(out[2], 7.0);
    }
}
