//! Binance USDT-M futures integration
//!
//! Public market data for downloads and paper trading, signed account and
//! order endpoints for live trading.

pub mod auth;
mod client;
mod types;

pub use auth::Credentials;
pub use client::{BinanceFuturesClient, TriggerKind, MAINNET_BASE_URL, TESTNET_BASE_URL};
pub use types::*;
