//! Box Breakout Scalper
//!
//! Minute-bar breakout strategy for crypto perpetual futures: a pure setup
//! detector, a bracket-order backtester with leveraged accounting, a grid
//! optimizer, and a live polling loop that reuses the same detector.

pub mod backtest;
pub mod binance;
pub mod common;
pub mod config;
pub mod data;
pub mod indicators;
pub mod live;
pub mod optimizer;
pub mod strategies;
pub mod types;

pub use config::Config;
pub use types::*;
