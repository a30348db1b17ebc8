//! Paper trading venue
//!
//! Real market data, simulated account. An open position is resolved against
//! each newly closed bar with the same stop-first rule and fee model the
//! backtester uses.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::info;

use super::exchange::{BracketOrder, Exchange};
use crate::backtest::{bracket_hit, price_return};
use crate::binance::{decimal_to_f64, BinanceFuturesClient, PositionInfo, SymbolFilters};
use crate::{Bar, Outcome, Side};

#[derive(Debug, Clone, PartialEq)]
pub struct PaperPosition {
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    /// Only bars opening after this are checked against the brackets
    pub opened_after: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaperFill {
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub outcome: Outcome,
    pub net: f64,
    pub exit_time: DateTime<Utc>,
}

#[derive(Debug)]
struct PaperState {
    balance: f64,
    position: Option<PaperPosition>,
    last_closed_bar: Option<DateTime<Utc>>,
    fills: Vec<PaperFill>,
}

pub struct PaperExchange {
    client: BinanceFuturesClient,
    fee_rate: f64,
    state: Mutex<PaperState>,
}

impl PaperExchange {
    pub fn new(client: BinanceFuturesClient, initial_balance: f64, fee_rate: f64) -> Self {
        Self {
            client,
            fee_rate,
            state: Mutex::new(PaperState {
                balance: initial_balance,
                position: None,
                last_closed_bar: None,
                fills: Vec::new(),
            }),
        }
    }

    pub async fn balance(&self) -> f64 {
        self.state.lock().await.balance
    }

    pub async fn fills(&self) -> Vec<PaperFill> {
        self.state.lock().await.fills.clone()
    }

    /// Feed freshly fetched bars (last one still forming) into the simulated
    /// account. Returns the fill if the open position was closed.
    pub async fn on_bars(&self, bars: &[Bar]) -> Option<PaperFill> {
        let closed = bars.split_last().map(|(_, closed)| closed).unwrap_or(&[]);
        let mut state = self.state.lock().await;
        if let Some(last) = closed.last() {
            state.last_closed_bar = Some(last.timestamp);
        }

        let position = state.position.clone()?;
        let hit = closed
            .iter()
            .filter(|b| b.timestamp > position.opened_after)
            .find_map(|b| {
                bracket_hit(position.side, b, position.take_profit, position.stop_loss)
                    .map(|(outcome, price)| (outcome, price, b.timestamp))
            });
        let (outcome, exit_price, exit_time) = hit?;

        let notional = position.quantity * position.entry_price;
        let profit = notional * price_return(position.side, position.entry_price, exit_price);
        let fee = notional * self.fee_rate * 2.0;
        let net = profit - fee;
        state.balance += net;
        state.position = None;

        let fill = PaperFill {
            side: position.side,
            entry_price: position.entry_price,
            exit_price,
            outcome,
            net,
            exit_time,
        };
        info!(
            side = %fill.side,
            outcome = %fill.outcome,
            exit = fill.exit_price,
            net = fill.net,
            balance = state.balance,
            "[PAPER] Position closed"
        );
        state.fills.push(fill.clone());
        Some(fill)
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn recent_bars(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Bar>> {
        let klines = self
            .client
            .get_klines(symbol, interval, None, None, Some(limit as u32))
            .await?;
        let bars: Vec<Bar> = klines.iter().filter_map(|k| k.to_bar()).collect();
        self.on_bars(&bars).await;
        Ok(bars)
    }

    async fn available_balance(&self, _asset: &str) -> Result<f64> {
        Ok(self.state.lock().await.balance)
    }

    async fn position(&self, _symbol: &str) -> Result<PositionInfo> {
        let state = self.state.lock().await;
        Ok(match &state.position {
            Some(p) => PositionInfo {
                amount: match p.side {
                    Side::Long => p.quantity,
                    Side::Short => -p.quantity,
                },
                entry_price: p.entry_price,
            },
            None => PositionInfo::default(),
        })
    }

    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        self.client.symbol_filters(symbol).await
    }

    async fn configure_account(
        &self,
        symbol: &str,
        leverage: u32,
        margin_type: &str,
    ) -> Result<()> {
        info!("[PAPER] {} leverage {}x, margin {}", symbol, leverage, margin_type);
        Ok(())
    }

    async fn place_bracket_order(&self, order: &BracketOrder) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.position.is_some() {
            bail!("Paper account already holds a position");
        }
        let Some(opened_after) = state.last_closed_bar else {
            bail!("No market data seen yet");
        };

        state.position = Some(PaperPosition {
            side: order.side,
            quantity: decimal_to_f64(order.quantity),
            entry_price: order.reference_price,
            take_profit: order.take_profit,
            stop_loss: order.stop_loss,
            opened_after,
        });
        info!(
            side = %order.side,
            qty = %order.quantity,
            entry = order.reference_price,
            take_profit = order.take_profit,
            stop_loss = order.stop_loss,
            "[PAPER] Position opened"
        );
        Ok(())
    }

    async fn cancel_all_orders(&self, _symbol: &str) -> Result<()> {
        Ok(())
    }
}
