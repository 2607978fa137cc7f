use std::{fmt, str::FromStr};

use chrono::TimeDelta;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Bar interval such as `1m`, `15m`, `4h`, `1d` or `1w`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeframe(TimeDelta);

impl Timeframe {
    /// Returns the interval as a duration.
    pub fn duration(&self) -> TimeDelta {
        self.0
    }

    /// Returns the interval in milliseconds.
    pub fn as_millis(&self) -> i64 {
        self.0.num_milliseconds()
    }
}

impl FromStr for Timeframe {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let unknown = || Error::UnknownTimeframe(s.to_owned());
        let split = s.find(|c: char| !c.is_ascii_digit()).ok_or_else(unknown)?;
        let (amount, unit) = s.split_at(split);
        let amount: i64 = amount.parse().map_err(|_| unknown())?;
        if amount <= 0 {
            return Err(unknown());
        }
        let delta = match unit {
            "s" => TimeDelta::try_seconds(amount),
            "m" => TimeDelta::try_minutes(amount),
            "h" => TimeDelta::try_hours(amount),
            "d" => TimeDelta::try_days(amount),
            "w" => TimeDelta::try_weeks(amount),
            _ => None,
        };
        delta.map(Self).ok_or_else(unknown)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.num_seconds();
        match secs {
            s if s % 604_800 == 0 => write!(f, "{}w", s / 604_800),
            s if s % 86_400 == 0 => write!(f, "{}d", s / 86_400),
            s if s % 3_600 == 0 => write!(f, "{}h", s / 3_600),
            s if s % 60 == 0 => write!(f, "{}m", s / 60),
            s => write!(f, "{s}s"),
        }
    }
}

/// Immutable parameters of a single backtest run.
///
/// `start_ts` and `end_ts` are inclusive millisecond bounds of the recorded window;
/// bars before `start_ts` are warmup. Commission and slippage are in basis points.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Instrument symbol, informational.
    pub symbol: String,
    /// Bar interval, e.g. `5m`.
    pub timeframe: String,
    /// First recorded timestamp (inclusive).
    pub start_ts: i64,
    /// Last recorded timestamp (inclusive). Bars after it are never processed.
    pub end_ts: i64,
    /// Number of bars to load before `start_ts` for indicator priming.
    pub warmup_bars: u32,
    /// Starting cash.
    pub initial_cash: f64,
    /// Maximum notional as a multiple of equity.
    pub leverage: f64,
    /// Commission in basis points, charged on entry and exit.
    pub commission_bps: f64,
    /// Slippage in basis points, applied against the order side.
    pub slippage_bps: f64,
    /// Force-close an open position at the last bar at-or-before `end_ts`.
    pub close_on_finish: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            symbol: String::new(),
            timeframe: "1m".to_owned(),
            start_ts: 0,
            end_ts: i64::MAX,
            warmup_bars: 0,
            initial_cash: 10_000.0,
            leverage: 1.0,
            commission_bps: 0.0,
            slippage_bps: 0.0,
            close_on_finish: true,
        }
    }
}

impl RunConfig {
    /// Parses the configured timeframe.
    pub fn parsed_timeframe(&self) -> Result<Timeframe> {
        self.timeframe.parse()
    }

    /// Returns the first timestamp a data loader should fetch so that `warmup_bars`
    /// bars precede `start_ts`.
    pub fn warmup_start_ts(&self) -> Result<i64> {
        let interval = self.parsed_timeframe()?.as_millis();
        Ok(self
            .start_ts
            .saturating_sub(interval.saturating_mul(i64::from(self.warmup_bars))))
    }

    /// Checks value ranges. The runner itself never fails on these; callers building a
    /// config from user input use this to refuse nonsense early.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));
        if self.start_ts > self.end_ts {
            return invalid(format!("start_ts {} after end_ts {}", self.start_ts, self.end_ts));
        }
        if !self.initial_cash.is_finite() || self.initial_cash <= 0.0 {
            return invalid(format!("initial_cash must be positive (got: {})", self.initial_cash));
        }
        if !self.leverage.is_finite() || self.leverage <= 0.0 {
            return invalid(format!("leverage must be positive (got: {})", self.leverage));
        }
        for (name, value) in [
            ("commission_bps", self.commission_bps),
            ("slippage_bps", self.slippage_bps),
        ] {
            if !value.is_finite() || value < 0.0 {
                return invalid(format!("{name} must be non-negative (got: {value})"));
            }
        }
        self.parsed_timeframe().map(|_| ())
    }

    /// Reads a config from a JSON file. Missing fields take their default.
    #[cfg(feature = "serde")]
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use std::{fs::File, io::BufReader};

        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
#[test]
fn parse_timeframes() {
    assert_eq!("1m".parse::<Timeframe>().unwrap().as_millis(), 60_000);
    assert_eq!("15m".parse::<Timeframe>().unwrap().as_millis(), 900_000);
    assert_eq!("4h".parse::<Timeframe>().unwrap().as_millis(), 14_400_000);
    assert_eq!("1d".parse::<Timeframe>().unwrap().as_millis(), 86_400_000);
    assert_eq!("1w".parse::<Timeframe>().unwrap().to_string(), "1w");
    assert_eq!("90m".parse::<Timeframe>().unwrap().to_string(), "90m");
}

#[cfg(test)]
#[test]
fn parse_bad_timeframes() {
    for bad in ["", "m", "0m", "5x", "-1h", "1.5h"] {
        assert!(
            matches!(bad.parse::<Timeframe>(), Err(Error::UnknownTimeframe(_))),
            "{bad} should not parse"
        );
    }
}

#[cfg(test)]
#[test]
fn warmup_start() {
    let config = RunConfig {
        timeframe: "5m".to_owned(),
        start_ts: 10_000_000,
        warmup_bars: 10,
        ..Default::default()
    };
    assert_eq!(config.warmup_start_ts().unwrap(), 10_000_000 - 10 * 300_000);
}

#[cfg(test)]
#[test]
fn validate_config() {
    assert!(RunConfig::default().validate().is_ok());

    let config = RunConfig {
        leverage: 0.0,
        ..Default::default()
    };
    assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

    let config = RunConfig {
        start_ts: 5,
        end_ts: 4,
        ..Default::default()
    };
    assert!(config.validate().is_err());

    let config = RunConfig {
        slippage_bps: -1.0,
        ..Default::default()
    };
    assert!(config.validate().is_err());
}
