//! Venue seam for the live loop

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::binance::{PositionInfo, SymbolFilters};
use crate::{Bar, Side};

/// Market entry plus the two closing triggers.
///
/// Prices are raw; each venue quantizes them when submitting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BracketOrder {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    /// Latest traded price when the order was built
    pub reference_price: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
}

/// Everything the live loop needs from a trading venue
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Most recent klines, oldest first; the last one may still be forming
    async fn recent_bars(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Bar>>;

    async fn available_balance(&self, asset: &str) -> Result<f64>;

    async fn position(&self, symbol: &str) -> Result<PositionInfo>;

    /// Fails when the symbol does not exist or has no filters
    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters>;

    /// Margin type and leverage for the symbol
    async fn configure_account(&self, symbol: &str, leverage: u32, margin_type: &str) -> Result<()>;

    async fn place_bracket_order(&self, order: &BracketOrder) -> Result<()>;

    async fn cancel_all_orders(&self, symbol: &str) -> Result<()>;
}
