use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::engine::Bar;

/// Bar interval used by [`random_walk_bars`]: one minute.
pub const RANDOM_WALK_INTERVAL_MS: i64 = 60_000;

/// Generates `n` one-minute bars following a seeded random walk.
///
/// The same `seed` always yields the same series, which keeps demos and tests reproducible.
/// Each bar opens at the previous close; moves are at most ±1% per bar.
///
/// ### Arguments
/// * `n` - Number of bars.
/// * `seed` - Random generator seed.
/// * `start_price` - Open of the first bar.
///
/// ### Returns
/// Bars with timestamps `0, 60_000, 120_000, ...`.
pub fn random_walk_bars(n: usize, seed: u64, start_price: f64) -> Vec<Bar> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut price = start_price;
    let mut ts = 0;

    let mut bars = Vec::with_capacity(n);
    for _ in 0..n {
        let open = price;
        let close = open * (1.0 + rng.random_range(-0.01..0.01));
        let high = open.max(close) * (1.0 + rng.random_range(0.0..0.005));
        let low = open.min(close) * (1.0 - rng.random_range(0.0..0.005));
        let volume = rng.random_range(1.0..100.0);

        bars.push(Bar::from((ts, open, high, low, close, volume)));
        price = close;
        ts += RANDOM_WALK_INTERVAL_MS;
    }
    bars
}

/// Reads bars from a JSON array file and checks that they are replayable.
///
/// Accepts both the short field names (`ts`, `open`, ...) and exchange-style names
/// (`open_time`, `open_price`, ...).
#[cfg(feature = "serde")]
pub fn bars_from_json_file(path: impl AsRef<std::path::Path>) -> crate::errors::Result<Vec<Bar>> {
    use std::{fs::File, io::BufReader};

    let reader = BufReader::new(File::open(path)?);
    let bars: Vec<Bar> = serde_json::from_reader(reader)?;
    Bar::validate_series(&bars)?;
    Ok(bars)
}

#[cfg(test)]
#[test]
fn random_walk_is_reproducible() {
    let a = random_walk_bars(50, 7, 100.0);
    let b = random_walk_bars(50, 7, 100.0);
    let c = random_walk_bars(50, 8, 100.0);

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a[0].open(), 100.0);
    assert_eq!(a[49].ts(), 49 * RANDOM_WALK_INTERVAL_MS);
    assert!(Bar::validate_series(&a).is_ok());
    for bar in &a {
        assert!(bar.low() <= bar.open().min(bar.close()));
        assert!(bar.high() >= bar.open().max(bar.close()));
    }
    for pair in a.windows(2) {
        assert_eq!(pair[1].open(), pair[0].close());
    }
}

#[cfg(all(test, feature = "serde"))]
#[test]
fn read_bars_from_json() {
    let path = std::env::temp_dir().join("bts_replay_bars_test.json");
    std::fs::write(
        &path,
        r#"[
            {"open_time": 0, "open_price": 10.0, "high_price": 12.0, "low_price": 9.0, "close_price": 11.0, "volume": 1.0},
            {"ts": 60000, "open": 11.0, "high": 13.0, "low": 10.0, "close": 12.0, "volume": 2.0}
        ]"#,
    )
    .unwrap();

    let bars = bars_from_json_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(bars.len(), 2);
    assert_eq!(bars[0].close(), 11.0);
    assert_eq!(bars[1].ts(), 60_000);
}
