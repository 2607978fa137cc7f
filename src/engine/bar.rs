use chrono::{DateTime, Utc};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// One OHLCV bar. `ts` is the bar open time in milliseconds since the Unix epoch.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    #[cfg_attr(feature = "serde", serde(alias = "ts_ms", alias = "open_time"))]
    ts: i64,
    #[cfg_attr(feature = "serde", serde(alias = "open_price"))]
    open: f64,
    #[cfg_attr(feature = "serde", serde(alias = "high_price"))]
    high: f64,
    #[cfg_attr(feature = "serde", serde(alias = "low_price"))]
    low: f64,
    #[cfg_attr(feature = "serde", serde(alias = "close_price"))]
    close: f64,
    volume: f64,
}

impl From<(i64, f64, f64, f64, f64, f64)> for Bar {
    fn from((ts, open, high, low, close, volume): (i64, f64, f64, f64, f64, f64)) -> Self {
        Self {
            ts,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

impl Bar {
    /// Returns the bar timestamp in milliseconds.
    pub fn ts(&self) -> i64 {
        self.ts
    }

    /// Returns the bar timestamp as a UTC datetime, if it is representable.
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.ts)
    }

    /// Returns the open price.
    pub fn open(&self) -> f64 {
        self.open
    }

    /// Returns the high price.
    pub fn high(&self) -> f64 {
        self.high
    }

    /// Returns the low price.
    pub fn low(&self) -> f64 {
        self.low
    }

    /// Returns the close price.
    pub fn close(&self) -> f64 {
        self.close
    }

    /// Returns the volume.
    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Checks that a series is usable for replay: finite prices and strictly increasing timestamps.
    pub fn validate_series(bars: &[Bar]) -> Result<()> {
        for (i, bar) in bars.iter().enumerate() {
            if ![bar.open, bar.high, bar.low, bar.close, bar.volume]
                .iter()
                .all(|v| v.is_finite())
            {
                return Err(Error::InvalidBar(format!("non-finite value at index {i}")));
            }
            if i > 0 && bar.ts <= bars[i - 1].ts {
                return Err(Error::InvalidBar(format!(
                    "timestamps must be strictly increasing (index {i}: {} after {})",
                    bar.ts,
                    bars[i - 1].ts
                )));
            }
        }
        Ok(())
    }
}

/// Builder for [`Bar`] with validation on `build`.
#[derive(Debug, Default)]
pub struct BarBuilder {
    ts: Option<i64>,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: f64,
}

impl BarBuilder {
    /// Starts a new builder.
    pub fn builder() -> Self {
        Self::default()
    }

    /// Sets the timestamp (ms).
    pub fn ts(mut self, ts: i64) -> Self {
        self.ts = Some(ts);
        self
    }

    /// Sets the timestamp from a datetime.
    pub fn datetime(mut self, datetime: DateTime<Utc>) -> Self {
        self.ts = Some(datetime.timestamp_millis());
        self
    }

    /// Sets the open price.
    pub fn open(mut self, open: f64) -> Self {
        self.open = Some(open);
        self
    }

    /// Sets the high price.
    pub fn high(mut self, high: f64) -> Self {
        self.high = Some(high);
        self
    }

    /// Sets the low price.
    pub fn low(mut self, low: f64) -> Self {
        self.low = Some(low);
        self
    }

    /// Sets the close price.
    pub fn close(mut self, close: f64) -> Self {
        self.close = Some(close);
        self
    }

    /// Sets the volume (defaults to 0).
    pub fn volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }

    /// Builds the bar.
    ///
    /// ### Returns
    /// The bar, or [`Error::InvalidBar`] if a field is missing, non-finite, or `high < low`.
    pub fn build(self) -> Result<Bar> {
        let missing = |field: &str| Error::InvalidBar(format!("missing `{field}`"));
        let bar = Bar {
            ts: self.ts.ok_or_else(|| missing("ts"))?,
            open: self.open.ok_or_else(|| missing("open"))?,
            high: self.high.ok_or_else(|| missing("high"))?,
            low: self.low.ok_or_else(|| missing("low"))?,
            close: self.close.ok_or_else(|| missing("close"))?,
            volume: self.volume,
        };
        Bar::validate_series(std::slice::from_ref(&bar))?;
        if bar.high < bar.low {
            return Err(Error::InvalidBar(format!("high {} below low {}", bar.high, bar.low)));
        }
        Ok(bar)
    }
}

#[cfg(test)]
#[test]
fn build_bar() {
    let bar = BarBuilder::builder()
        .ts(60_000)
        .open(10.0)
        .high(12.0)
        .low(9.0)
        .close(11.0)
        .volume(100.0)
        .build()
        .unwrap();

    assert_eq!(bar, Bar::from((60_000, 10.0, 12.0, 9.0, 11.0, 100.0)));
    assert_eq!(bar.datetime().unwrap().timestamp(), 60);
}

#[cfg(test)]
#[test]
fn build_bar_missing_field() {
    let result = BarBuilder::builder().ts(0).open(1.0).high(1.0).low(1.0).build();
    assert!(matches!(result, Err(Error::InvalidBar(_))));
}

#[cfg(test)]
#[test]
fn build_bar_high_below_low() {
    let result = BarBuilder::builder().ts(0).open(1.0).high(1.0).low(2.0).close(1.5).build();
    assert!(matches!(result, Err(Error::InvalidBar(_))));
}

#[cfg(test)]
#[test]
fn validate_series_rejects_unordered_ts() {
    let bars: Vec<Bar> = vec![
        (1, 10.0, 12.0, 9.0, 11.0, 100.0).into(),
        (1, 11.0, 13.0, 10.0, 12.0, 100.0).into(),
    ];
    assert!(matches!(Bar::validate_series(&bars), Err(Error::InvalidBar(_))));
}

#[cfg(test)]
#[test]
fn validate_series_rejects_nan() {
    let bars: Vec<Bar> = vec![(1, 10.0, f64::NAN, 9.0, 11.0, 100.0).into()];
    assert!(Bar::validate_series(&bars).is_err());
}
