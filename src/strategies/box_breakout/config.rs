//! Box Breakout Configuration

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoxBreakoutConfig {
    /// Bars forming the consolidation box before the candidate (default: 5)
    pub box_window: usize,

    /// Bars averaged for the typical high-low range (default: 20)
    pub avg_range_window: usize,

    /// Rolling window for the volume ratio (default: 20)
    pub volume_window: usize,

    /// Closes that must move strictly one way, current bar included (default: 3)
    pub trend_window: usize,

    /// Look-ahead bars that must confirm the breakout (default: 3)
    pub confirm_bars: usize,

    /// Monitoring horizon; bars 1..horizon after entry are checked (default: 30)
    pub horizon: usize,

    /// Bars after an exit during which entries are blocked (default: 3)
    pub cooldown_bars: usize,

    /// Minimum rolling-mean / current quote volume (default: 1.0)
    pub min_volume_ratio: f64,

    /// Box width must stay below avg_range times this (default: 0.8)
    pub consolidation_ratio: f64,

    /// Minimum |body| / range (default: 0.5)
    pub min_body_ratio: f64,

    /// Minimum |body| as a fraction of range (default: 0.1)
    pub min_body_range_fraction: f64,

    /// Minimum current / previous quote volume (default: 1.5)
    pub min_volume_spike: f64,

    /// Maximum |close - mid| / close (default: 0.025)
    pub max_center_offset: f64,

    pub long_confirmation: f64,
    pub short_confirmation: f64,
    pub long_take_profit: f64,
    pub long_stop_loss: f64,
    pub short_take_profit: f64,
    pub short_stop_loss: f64,
}

impl Default for BoxBreakoutConfig {
    fn default() -> Self {
        Self {
            box_window: 5,
            avg_range_window: 20,
            volume_window: 20,
            trend_window: 3,
            confirm_bars: 3,
            horizon: 30,
            cooldown_bars: 3,
            min_volume_ratio: 1.0,
            consolidation_ratio: 0.8,
            min_body_ratio: 0.5,
            min_body_range_fraction: 0.1,
            min_volume_spike: 1.5,
            max_center_offset: 0.025,
            long_confirmation: 1.001,
            short_confirmation: 0.999,
            long_take_profit: 1.005,
            long_stop_loss: 0.997,
            short_take_profit: 0.995,
            short_stop_loss: 1.003,
        }
    }
}

impl BoxBreakoutConfig {
    /// First index at which every look-back window is filled
    pub fn warmup(&self) -> usize {
        self.box_window
            .max(self.avg_range_window)
            .max(self.volume_window.saturating_sub(1))
            .max(self.trend_window.saturating_sub(1))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("box_window", self.box_window),
            ("avg_range_window", self.avg_range_window),
            ("volume_window", self.volume_window),
            ("confirm_bars", self.confirm_bars),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroWindow(field));
            }
        }

        if self.trend_window < 2 {
            return Err(ConfigError::WindowTooShort {
                field: "trend_window",
                min: 2,
                value: self.trend_window,
            });
        }
        if self.horizon < 2 {
            return Err(ConfigError::WindowTooShort {
                field: "horizon",
                min: 2,
                value: self.horizon,
            });
        }

        for (field, value) in [
            ("min_volume_ratio", self.min_volume_ratio),
            ("consolidation_ratio", self.consolidation_ratio),
            ("min_body_ratio", self.min_body_ratio),
            ("min_body_range_fraction", self.min_body_range_fraction),
            ("min_volume_spike", self.min_volume_spike),
            ("max_center_offset", self.max_center_offset),
            ("long_confirmation", self.long_confirmation),
            ("short_confirmation", self.short_confirmation),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidThreshold { field, value });
            }
        }

        // Targets and stops as multipliers of entry
        for (field, value, above) in [
            ("long_take_profit", self.long_take_profit, true),
            ("long_stop_loss", self.long_stop_loss, false),
            ("short_take_profit", self.short_take_profit, false),
            ("short_stop_loss", self.short_stop_loss, true),
        ] {
            let ok = value.is_finite()
                && value > 0.0
                && if above { value > 1.0 } else { value < 1.0 };
            if !ok {
                return Err(ConfigError::BracketSide { field, value });
            }
        }

        Ok(())
    }
}
