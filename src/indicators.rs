//! Rolling window indicators
//!
//! Derived per-bar values used by the breakout detector. Every function takes
//! the full bar slice plus an index and only reads the window it needs, so the
//! same code serves the backtest scan and the live loop.

use rayon::prelude::*;

use crate::Bar;

/// Mean of `f(bar)` over `bars[end + 1 - period..=end]`
///
/// Returns `None` when the window does not fit.
pub fn rolling_mean(
    bars: &[Bar],
    end: usize,
    period: usize,
    f: impl Fn(&Bar) -> f64,
) -> Option<f64> {
    if period == 0 || end >= bars.len() || end + 1 < period {
        return None;
    }
    let sum: f64 = bars[end + 1 - period..=end].iter().map(f).sum();
    Some(sum / period as f64)
}

/// Volume ratio at `index`: rolling mean quote volume / current quote volume.
///
/// The rolling window ends at (and includes) the current bar. `None` before the
/// window fills or when the current bar traded nothing.
pub fn volume_ratio_at(bars: &[Bar], index: usize, window: usize) -> Option<f64> {
    let mean = rolling_mean(bars, index, window, |b| b.quote_volume)?;
    let current = bars[index].quote_volume;
    if current == 0.0 {
        return None;
    }
    let ratio = mean / current;
    ratio.is_finite().then_some(ratio)
}

/// Volume ratio for every bar of the series.
///
/// Each index only reads its own window, so the work is split across the
/// rayon pool; output order matches input order.
pub fn volume_ratios(bars: &[Bar], window: usize) -> Vec<Option<f64>> {
    (0..bars.len())
        .into_par_iter()
        .map(|i| volume_ratio_at(bars, i, window))
        .collect()
}

/// Consolidation box preceding a candidate bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxRange {
    pub box_high: f64,
    pub box_low: f64,
    pub avg_range: f64,
}

impl BoxRange {
    pub fn width(&self) -> f64 {
        self.box_high - self.box_low
    }
}

/// Box high/low over the `box_window` bars before `index` and mean high-low
/// range over the `avg_range_window` bars before `index`. The bar at `index`
/// itself is excluded from both.
pub fn box_range(
    bars: &[Bar],
    index: usize,
    box_window: usize,
    avg_range_window: usize,
) -> Option<BoxRange> {
    if box_window == 0 || index < box_window || index < avg_range_window || index > bars.len() {
        return None;
    }

    let window = &bars[index - box_window..index];
    let box_high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let box_low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    let avg_range = rolling_mean(bars, index - 1, avg_range_window, Bar::range)?;

    Some(BoxRange {
        box_high,
        box_low,
        avg_range,
    })
}

/// True when the values are strictly increasing or strictly decreasing
pub fn is_strictly_monotonic(values: &[f64]) -> bool {
    if values.len() < 2 {
        return false;
    }
    let rising = values.windows(2).all(|w| w[1] > w[0]);
    let falling = values.windows(2).all(|w| w[1] < w[0]);
    rising || falling
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bars_with_volume(volumes: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        volumes
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                Bar::new(
                    start + Duration::minutes(i as i64),
                    100.0,
                    100.0 + i as f64,
                    100.0 - i as f64,
                    100.0,
                    v,
                )
            })
            .collect()
    }

    #[test]
    fn test_rolling_mean() {
        let bars = bars_with_volume(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(rolling_mean(&bars, 1, 3, |b| b.quote_volume), None);
        assert_eq!(rolling_mean(&bars, 2, 3, |b| b.quote_volume), Some(2.0));
        assert_eq!(rolling_mean(&bars, 4, 3, |b| b.quote_volume), Some(4.0));
        assert_eq!(rolling_mean(&bars, 5, 3, |b| b.quote_volume), None);
    }

    #[test]
    fn test_volume_ratio_includes_current_bar() {
        let bars = bars_with_volume(&[10.0, 10.0, 10.0, 40.0]);
        // mean(10, 10, 40) / 40 = 0.5
        assert_eq!(volume_ratio_at(&bars, 3, 3), Some(0.5));
        assert_eq!(volume_ratio_at(&bars, 1, 3), None);
    }

    #[test]
    fn test_volume_ratio_zero_volume_is_undefined() {
        let bars = bars_with_volume(&[10.0, 10.0, 0.0]);
        assert_eq!(volume_ratio_at(&bars, 2, 3), None);
    }

    #[test]
    fn test_parallel_ratios_match_sequential() {
        let volumes: Vec<f64> = (0..500).map(|i| 100.0 + (i % 17) as f64 * 3.0).collect();
        let bars = bars_with_volume(&volumes);
        let parallel = volume_ratios(&bars, 20);
        let sequential: Vec<_> = (0..bars.len()).map(|i| volume_ratio_at(&bars, i, 20)).collect();
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn test_box_range_excludes_current_bar() {
        let bars = bars_with_volume(&[1.0; 8]);
        // bar i has high 100+i, low 100-i
        let r = box_range(&bars, 6, 3, 4).unwrap();
        assert_eq!(r.box_high, 105.0);
        assert_eq!(r.box_low, 95.0);
        // ranges of bars 2..=5 are 4, 6, 8, 10
        assert_eq!(r.avg_range, 7.0);
        assert_eq!(r.width(), 10.0);
    }

    #[test]
    fn test_box_range_needs_history() {
        let bars = bars_with_volume(&[1.0; 8]);
        assert!(box_range(&bars, 3, 3, 4).is_none());
        assert!(box_range(&bars, 2, 3, 2).is_none());
    }

    #[test]
    fn test_strict_monotonic() {
        assert!(is_strictly_monotonic(&[1.0, 2.0, 3.0]));
        assert!(is_strictly_monotonic(&[3.0, 2.0, 1.0]));
        assert!(!is_strictly_monotonic(&[1.0, 1.0, 2.0]));
        assert!(!is_strictly_monotonic(&[1.0, 3.0, 2.0]));
        assert!(!is_strictly_monotonic(&[1.0]));
    }
}
