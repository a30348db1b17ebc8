//! Box Breakout Detector
//!
//! Filter chain, evaluated in order, first failure wins:
//! liquidity, cooldown, trend, consolidation, candle body, volume spike,
//! centering. Survivors become a setup when the close leaves the box in the
//! direction of the body and the next bars confirm it.

use tracing::debug;

use crate::indicators::{box_range, is_strictly_monotonic};
use crate::strategies::{MarketSeries, Rejection, SetupDetector};
use crate::{Bar, Setup, Side};

use super::config::BoxBreakoutConfig;

/// Target and stop for an entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BracketPrices {
    pub take_profit: f64,
    pub stop_loss: f64,
}

impl BracketPrices {
    pub fn for_entry(side: Side, entry_price: f64, config: &BoxBreakoutConfig) -> Self {
        match side {
            Side::Long => Self {
                take_profit: entry_price * config.long_take_profit,
                stop_loss: entry_price * config.long_stop_loss,
            },
            Side::Short => Self {
                take_profit: entry_price * config.short_take_profit,
                stop_loss: entry_price * config.short_stop_loss,
            },
        }
    }

    /// True when `price` sits strictly between stop and target
    pub fn contains(&self, price: f64) -> bool {
        let lo = self.take_profit.min(self.stop_loss);
        let hi = self.take_profit.max(self.stop_loss);
        price > lo && price < hi
    }
}

pub struct BoxBreakoutDetector {
    config: BoxBreakoutConfig,
}

impl BoxBreakoutDetector {
    pub fn new(config: BoxBreakoutConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BoxBreakoutConfig {
        &self.config
    }

    fn passes_cooldown(&self, index: usize, last_exit_index: Option<usize>) -> bool {
        match last_exit_index {
            None => true,
            Some(last) => index as i64 - last as i64 > self.config.cooldown_bars as i64,
        }
    }

    fn passes_body(&self, bar: &Bar) -> bool {
        let full_range = bar.range();
        if full_range == 0.0 {
            return false;
        }
        let body = bar.body();
        (body / full_range).abs() >= self.config.min_body_ratio
            && body.abs() >= full_range * self.config.min_body_range_fraction
    }

    fn passes_volume_spike(&self, bar: &Bar, prev: &Bar) -> bool {
        if prev.quote_volume == 0.0 {
            return false;
        }
        bar.quote_volume / prev.quote_volume >= self.config.min_volume_spike
    }

    fn passes_centering(&self, bar: &Bar) -> bool {
        let mid = (bar.high + bar.low) / 2.0;
        (bar.close - mid).abs() / bar.close <= self.config.max_center_offset
    }

    fn breakout_side(&self, bar: &Bar, box_high: f64, box_low: f64) -> Option<Side> {
        let body = bar.body();
        if bar.close > box_high && body > 0.0 {
            Some(Side::Long)
        } else if bar.close < box_low && body < 0.0 {
            Some(Side::Short)
        } else {
            None
        }
    }

    fn is_confirmed(&self, side: Side, entry: f64, ahead: &[Bar]) -> bool {
        match side {
            Side::Long => {
                let max_high = ahead.iter().map(|b| b.high).fold(f64::MIN, f64::max);
                max_high >= entry * self.config.long_confirmation
            }
            Side::Short => {
                let min_low = ahead.iter().map(|b| b.low).fold(f64::MAX, f64::min);
                min_low <= entry * self.config.short_confirmation
            }
        }
    }
}

impl SetupDetector for BoxBreakoutDetector {
    fn name(&self) -> &'static str {
        "box_breakout"
    }

    fn warmup(&self) -> usize {
        self.config.warmup()
    }

    fn confirm_bars(&self) -> usize {
        self.config.confirm_bars
    }

    fn prepare<'a>(&self, bars: &'a [Bar]) -> MarketSeries<'a> {
        MarketSeries::new(bars, self.config.volume_window)
    }

    fn evaluate(
        &self,
        series: &MarketSeries<'_>,
        index: usize,
        last_exit_index: Option<usize>,
    ) -> Result<Setup, Rejection> {
        let bars = series.bars();
        let cfg = &self.config;

        if index < self.warmup() || index + cfg.confirm_bars >= bars.len() {
            return Err(Rejection::OutOfRange);
        }

        // Undefined ratio (window not full, zero volume) fails too
        match series.volume_ratio(index) {
            Some(ratio) if ratio >= cfg.min_volume_ratio => {}
            _ => return Err(Rejection::Liquidity),
        }

        if !self.passes_cooldown(index, last_exit_index) {
            return Err(Rejection::Cooldown);
        }

        let closes: Vec<f64> = bars[index + 1 - cfg.trend_window..=index]
            .iter()
            .map(|b| b.close)
            .collect();
        if !is_strictly_monotonic(&closes) {
            return Err(Rejection::Trend);
        }

        let range = box_range(bars, index, cfg.box_window, cfg.avg_range_window)
            .ok_or(Rejection::OutOfRange)?;
        if range.width() >= range.avg_range * cfg.consolidation_ratio {
            return Err(Rejection::Consolidation);
        }

        let bar = &bars[index];
        if !self.passes_body(bar) {
            return Err(Rejection::CandleBody);
        }

        if !self.passes_volume_spike(bar, &bars[index - 1]) {
            return Err(Rejection::VolumeSpike);
        }

        if !self.passes_centering(bar) {
            return Err(Rejection::Centering);
        }

        let side = self
            .breakout_side(bar, range.box_high, range.box_low)
            .ok_or(Rejection::NoBreakout)?;

        let entry_price = bar.close;
        let ahead = &bars[index + 1..=index + cfg.confirm_bars];
        if !self.is_confirmed(side, entry_price, ahead) {
            return Err(Rejection::Unconfirmed);
        }

        let brackets = BracketPrices::for_entry(side, entry_price, cfg);
        debug!(
            index,
            %side,
            entry_price,
            box_high = range.box_high,
            box_low = range.box_low,
            take_profit = brackets.take_profit,
            stop_loss = brackets.stop_loss,
            "Breakout setup detected"
        );

        Ok(Setup {
            index,
            timestamp: bar.timestamp,
            side,
            entry_price,
            take_profit_price: brackets.take_profit,
            stop_loss_price: brackets.stop_loss,
        })
    }
}
