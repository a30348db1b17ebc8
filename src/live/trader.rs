//! Live trading loop
//!
//! One cycle: fetch recent klines, read position and balance, detect a flat
//! transition, evaluate the detector on the newest bar that already has its
//! confirmation bars, and submit at most one bracketed entry.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::exchange::{BracketOrder, Exchange};
use crate::binance::SymbolFilters;
use crate::config::{AccountConfig, LiveConfig};
use crate::strategies::{BoxBreakoutDetector, BracketPrices, Rejection, SetupDetector};
use crate::Bar;

/// Why a detected setup was not traded
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    InsufficientBars { have: usize, need: usize },
    NoBalance,
    BelowMinQty { quantity: String },
    PriceOutsideBrackets { price: f64 },
}

/// What one cycle did
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Candidate bar already evaluated
    Idle,
    Rejected(Rejection),
    InPosition,
    Skipped(SkipReason),
    Entered(BracketOrder),
}

pub struct LiveTrader<E: Exchange> {
    exchange: E,
    detector: BoxBreakoutDetector,
    account: AccountConfig,
    live: LiveConfig,
    filters: Option<SymbolFilters>,
    was_in_position: bool,
    last_exit_time: Option<DateTime<Utc>>,
    last_candidate: Option<DateTime<Utc>>,
    last_heartbeat: Option<Instant>,
}

impl<E: Exchange> LiveTrader<E> {
    pub fn new(
        exchange: E,
        detector: BoxBreakoutDetector,
        account: AccountConfig,
        live: LiveConfig,
    ) -> Self {
        Self {
            exchange,
            detector,
            account,
            live,
            filters: None,
            was_in_position: false,
            last_exit_time: None,
            last_candidate: None,
            last_heartbeat: None,
        }
    }

    pub fn exchange(&self) -> &E {
        &self.exchange
    }

    /// Symbol check, filters and account setup. Any failure here is fatal.
    pub async fn startup(&mut self) -> Result<()> {
        let symbol = self.live.symbol.clone();
        let filters = self
            .exchange
            .symbol_filters(&symbol)
            .await
            .with_context(|| format!("Startup check failed for {}", symbol))?;
        info!(
            %symbol,
            step_size = %filters.step_size,
            min_qty = %filters.min_qty,
            tick_size = %filters.tick_size,
            "Symbol filters loaded"
        );
        self.filters = Some(filters);

        self.exchange
            .configure_account(&symbol, self.account.leverage, &self.live.margin_type)
            .await
            .context("Failed to configure leverage/margin")?;

        let position = self.exchange.position(&symbol).await?;
        self.was_in_position = position.is_open();
        if self.was_in_position {
            warn!(
                amount = position.amount,
                entry = position.entry_price,
                "Starting with an open position; no entries until it closes"
            );
        }
        Ok(())
    }

    fn heartbeat(&mut self, balance: f64, price: f64, in_position: bool) {
        let due = self
            .last_heartbeat
            .map_or(true, |t| t.elapsed() >= Duration::from_secs(self.live.log_interval_secs));
        if due {
            info!(
                symbol = %self.live.symbol,
                balance,
                asset = self.live.quote_asset(),
                price,
                in_position,
                "Bot running"
            );
            self.last_heartbeat = Some(Instant::now());
        }
    }

    /// Cooldown marker mapped into the current window
    fn last_exit_index(&self, closed: &[Bar]) -> Option<usize> {
        let exit = self.last_exit_time?;
        closed.iter().rposition(|b| b.timestamp <= exit)
    }

    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let Some(filters) = self.filters else {
            bail!("run_cycle called before startup");
        };
        let symbol = self.live.symbol.clone();

        let bars = self
            .exchange
            .recent_bars(&symbol, &self.live.interval, self.live.lookback)
            .await
            .context("Failed to fetch klines")?;
        let Some((forming, closed)) = bars.split_last() else {
            bail!("Exchange returned no klines");
        };
        let price = forming.close;

        let position = self.exchange.position(&symbol).await?;
        let in_position = position.is_open();
        let balance = self
            .exchange
            .available_balance(self.live.quote_asset())
            .await?;

        self.heartbeat(balance, price, in_position);

        if self.was_in_position && !in_position {
            info!("[FLAT] Position closed, cancelling leftover orders");
            if let Err(e) = self.exchange.cancel_all_orders(&symbol).await {
                warn!("Failed to cancel open orders: {:#}", e);
            }
            self.last_exit_time = closed.last().map(|b| b.timestamp);
        }
        self.was_in_position = in_position;

        if in_position {
            return Ok(CycleOutcome::InPosition);
        }

        let need = self.detector.required_history();
        if closed.len() < need {
            return Ok(CycleOutcome::Skipped(SkipReason::InsufficientBars {
                have: closed.len(),
                need,
            }));
        }

        let index = closed.len() - 1 - self.detector.confirm_bars();
        let candidate_time = closed[index].timestamp;
        if self.last_candidate == Some(candidate_time) {
            return Ok(CycleOutcome::Idle);
        }
        self.last_candidate = Some(candidate_time);

        let series = self.detector.prepare(closed);
        let setup = match self.detector.evaluate(&series, index, self.last_exit_index(closed)) {
            Ok(setup) => setup,
            Err(rejection) => {
                debug!(%candidate_time, %rejection, "No setup");
                return Ok(CycleOutcome::Rejected(rejection));
            }
        };

        let brackets = BracketPrices {
            take_profit: setup.take_profit_price,
            stop_loss: setup.stop_loss_price,
        };
        if !brackets.contains(price) {
            info!(price, take_profit = brackets.take_profit, stop_loss = brackets.stop_loss,
                "[SKIP] Price already outside brackets");
            return Ok(CycleOutcome::Skipped(SkipReason::PriceOutsideBrackets { price }));
        }

        if balance <= 0.0 {
            info!("[SKIP] No {} balance available", self.live.quote_asset());
            return Ok(CycleOutcome::Skipped(SkipReason::NoBalance));
        }

        let notional = balance * self.live.risk_pct * self.account.leverage as f64;
        let quantity = filters
            .floor_quantity(notional / price)
            .context("Quantity not representable")?;
        if !filters.meets_min_qty(quantity) {
            info!(%quantity, min_qty = %filters.min_qty, "[SKIP] Quantity below minimum");
            return Ok(CycleOutcome::Skipped(SkipReason::BelowMinQty {
                quantity: quantity.to_string(),
            }));
        }

        let order = BracketOrder {
            symbol: symbol.clone(),
            side: setup.side,
            quantity,
            reference_price: price,
            take_profit: setup.take_profit_price,
            stop_loss: setup.stop_loss_price,
        };
        info!(
            side = %order.side,
            %quantity,
            price,
            setup_entry = setup.entry_price,
            take_profit = order.take_profit,
            stop_loss = order.stop_loss,
            "[ENTRY] Submitting bracketed entry"
        );
        self.exchange.place_bracket_order(&order).await?;
        self.was_in_position = true;

        Ok(CycleOutcome::Entered(order))
    }

    /// Poll until Ctrl+C. Failed cycles are logged and the loop continues.
    pub async fn run(&mut self) -> Result<()> {
        self.startup().await?;

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C, initiating shutdown...");
                    let _ = shutdown_tx.send(()).await;
                }
                Err(e) => error!("Error setting up signal handler: {}", e),
            }
        });

        let mut ticker = interval(Duration::from_secs(self.live.poll_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Starting trading loop...");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(outcome) => debug!(?outcome, "Cycle complete"),
                        Err(e) => error!("Trading cycle error: {:#}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, exiting trading loop");
                    break;
                }
            }
        }
        Ok(())
    }
}
