//! Box Breakout Strategy
//!
//! Entry when a strong, volume-backed candle closes outside a tight 5-bar box
//! and the next bars confirm the move. Exits are a fixed bracket.

mod config;
mod detector;

pub use config::BoxBreakoutConfig;
pub use detector::{BoxBreakoutDetector, BracketPrices};

use crate::config::ConfigError;

/// Create a detector from config, validating it first
pub fn create(config: &BoxBreakoutConfig) -> Result<BoxBreakoutDetector, ConfigError> {
    config.validate()?;
    Ok(BoxBreakoutDetector::new(config.clone()))
}
