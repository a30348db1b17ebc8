//! Real order routing through the Binance futures client

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::exchange::{BracketOrder, Exchange};
use crate::binance::{BinanceFuturesClient, PositionInfo, SymbolFilters, TriggerKind};
use crate::Bar;

pub struct BinanceExchange {
    client: BinanceFuturesClient,
    filters: RwLock<HashMap<String, SymbolFilters>>,
}

impl BinanceExchange {
    pub fn new(client: BinanceFuturesClient) -> Self {
        Self {
            client,
            filters: RwLock::new(HashMap::new()),
        }
    }

    async fn cached_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        if let Some(filters) = self.filters.read().await.get(symbol) {
            return Ok(*filters);
        }
        self.symbol_filters(symbol).await
    }
}

#[async_trait]
impl Exchange for BinanceExchange {
    async fn recent_bars(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Bar>> {
        let klines = self
            .client
            .get_klines(symbol, interval, None, None, Some(limit as u32))
            .await?;
        Ok(klines.iter().filter_map(|k| k.to_bar()).collect())
    }

    async fn available_balance(&self, asset: &str) -> Result<f64> {
        self.client.available_balance(asset).await
    }

    async fn position(&self, symbol: &str) -> Result<PositionInfo> {
        self.client.position(symbol).await
    }

    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        let filters = self.client.symbol_filters(symbol).await?;
        self.filters.write().await.insert(symbol.to_string(), filters);
        Ok(filters)
    }

    async fn configure_account(
        &self,
        symbol: &str,
        leverage: u32,
        margin_type: &str,
    ) -> Result<()> {
        // Rejected when already set, or while a position is open
        if let Err(e) = self.client.change_margin_type(symbol, margin_type).await {
            warn!("Margin type not changed: {:#}", e);
        }
        self.client
            .change_leverage(symbol, leverage)
            .await
            .with_context(|| format!("Failed to set leverage {}x on {}", leverage, symbol))
    }

    async fn place_bracket_order(&self, order: &BracketOrder) -> Result<()> {
        let filters = self.cached_filters(&order.symbol).await?;
        let take_profit = filters
            .round_price(order.take_profit)
            .context("Take-profit price not representable")?;
        let stop_loss = filters
            .round_price(order.stop_loss)
            .context("Stop-loss price not representable")?;

        let entry = self
            .client
            .place_market_order(&order.symbol, order.side, order.quantity)
            .await
            .context("Market entry failed")?;
        info!(order_id = entry.order_id, "Entry order accepted");

        self.client
            .place_close_trigger(&order.symbol, order.side, TriggerKind::TakeProfit, take_profit)
            .await
            .context("Entry filled but take-profit order failed")?;
        self.client
            .place_close_trigger(&order.symbol, order.side, TriggerKind::Stop, stop_loss)
            .await
            .context("Entry filled but stop-loss order failed")?;

        info!(%take_profit, %stop_loss, "Brackets placed");
        Ok(())
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<()> {
        self.client.cancel_all_orders(symbol).await
    }
}
