//! Trading Strategies Module
//!
//! Setup detectors and their shared abstractions.

pub mod box_breakout;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::indicators::volume_ratios;
use crate::{Bar, Setup};

pub use box_breakout::{BoxBreakoutConfig, BoxBreakoutDetector, BracketPrices};

/// Borrowed bar series plus the per-bar values computed once before scanning
#[derive(Debug, Clone)]
pub struct MarketSeries<'a> {
    bars: &'a [Bar],
    volume_ratios: Vec<Option<f64>>,
}

impl<'a> MarketSeries<'a> {
    pub fn new(bars: &'a [Bar], volume_window: usize) -> Self {
        Self {
            bars,
            volume_ratios: volume_ratios(bars, volume_window),
        }
    }

    pub fn bars(&self) -> &'a [Bar] {
        self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn volume_ratio(&self, index: usize) -> Option<f64> {
        self.volume_ratios.get(index).copied().flatten()
    }
}

/// First filter that turned a candidate index down
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    OutOfRange,
    Liquidity,
    Cooldown,
    Trend,
    Consolidation,
    CandleBody,
    VolumeSpike,
    Centering,
    NoBreakout,
    Unconfirmed,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Rejection::OutOfRange => "out of range",
            Rejection::Liquidity => "liquidity",
            Rejection::Cooldown => "cooldown",
            Rejection::Trend => "trend",
            Rejection::Consolidation => "consolidation",
            Rejection::CandleBody => "candle body",
            Rejection::VolumeSpike => "volume spike",
            Rejection::Centering => "centering",
            Rejection::NoBreakout => "no breakout",
            Rejection::Unconfirmed => "unconfirmed",
        };
        f.write_str(name)
    }
}

/// Setup detector trait
///
/// Implementations are pure: the answer depends only on the series, the index
/// and the cooldown marker passed in.
pub trait SetupDetector: Send + Sync {
    fn name(&self) -> &'static str;

    /// First index that has enough history for every filter
    fn warmup(&self) -> usize;

    /// Bars after the candidate that the decision reads
    fn confirm_bars(&self) -> usize;

    /// Bars needed before `warmup` can be evaluated in a live window
    fn required_history(&self) -> usize {
        self.warmup() + self.confirm_bars() + 1
    }

    /// Precompute per-bar values for a series
    fn prepare<'a>(&self, bars: &'a [Bar]) -> MarketSeries<'a>;

    /// Evaluate one index, naming the first failed filter on rejection
    fn evaluate(
        &self,
        series: &MarketSeries<'_>,
        index: usize,
        last_exit_index: Option<usize>,
    ) -> Result<Setup, Rejection>;

    fn detect(
        &self,
        series: &MarketSeries<'_>,
        index: usize,
        last_exit_index: Option<usize>,
    ) -> Option<Setup> {
        self.evaluate(series, index, last_exit_index).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_market_series_ratio_lookup() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars: Vec<Bar> = (0..5)
            .map(|i| Bar::new(start + Duration::minutes(i), 1.0, 1.0, 1.0, 1.0, 10.0))
            .collect();
        let series = MarketSeries::new(&bars, 3);
        assert_eq!(series.len(), 5);
        assert_eq!(series.volume_ratio(1), None);
        assert_eq!(series.volume_ratio(2), Some(1.0));
        assert_eq!(series.volume_ratio(99), None);
    }

    #[test]
    fn test_rejection_ordering_follows_filter_chain() {
        assert!(Rejection::Liquidity < Rejection::Cooldown);
        assert!(Rejection::Centering < Rejection::NoBreakout);
        assert_eq!(Rejection::CandleBody.to_string(), "candle body");
    }
}
