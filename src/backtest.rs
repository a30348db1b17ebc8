//! Backtesting engine
//!
//! Sequential scan over a bar series: detect a setup, resolve it against the
//! following bars under a fixed bracket, settle the account, repeat.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{AccountConfig, ConfigError};
use crate::strategies::{
    box_breakout, BoxBreakoutConfig, BoxBreakoutDetector, Rejection, SetupDetector,
};
use crate::{Bar, Config, Outcome, PerformanceMetrics, Setup, Side, Trade};

#[derive(Debug, Error, PartialEq)]
pub enum BacktestError {
    #[error("insufficient data: {bars} bars, need at least {required}")]
    InsufficientData { bars: usize, required: usize },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// How a setup played out over its monitoring window
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    Resolved {
        outcome: Outcome,
        exit_index: usize,
        exit_price: f64,
    },
    /// Window exhausted without touching either level
    Timeout,
    /// Series ended before the window was exhausted
    OutOfRange,
}

/// Check one bar against a bracket. The stop is checked first, so a bar that
/// spans both levels counts as a stop-out. Returns the level that fired.
pub fn bracket_hit(
    side: Side,
    bar: &Bar,
    take_profit: f64,
    stop_loss: f64,
) -> Option<(Outcome, f64)> {
    match side {
        Side::Long => {
            if bar.low <= stop_loss {
                Some((Outcome::StopLoss, stop_loss))
            } else if bar.high >= take_profit {
                Some((Outcome::TakeProfit, take_profit))
            } else {
                None
            }
        }
        Side::Short => {
            if bar.high >= stop_loss {
                Some((Outcome::StopLoss, stop_loss))
            } else if bar.low <= take_profit {
                Some((Outcome::TakeProfit, take_profit))
            } else {
                None
            }
        }
    }
}

/// Walk bars `setup.index + j` for `j in 1..horizon` until a level fires
pub fn resolve(bars: &[Bar], setup: &Setup, horizon: usize) -> Resolution {
    for j in 1..horizon {
        let idx = setup.index + j;
        let Some(bar) = bars.get(idx) else {
            return Resolution::OutOfRange;
        };
        if let Some((outcome, exit_price)) =
            bracket_hit(setup.side, bar, setup.take_profit_price, setup.stop_loss_price)
        {
            return Resolution::Resolved {
                outcome,
                exit_index: idx,
                exit_price,
            };
        }
    }
    Resolution::Timeout
}

/// Signed price return as a fraction
pub fn price_return(side: Side, entry_price: f64, exit_price: f64) -> f64 {
    match side {
        Side::Long => (exit_price - entry_price) / entry_price,
        Side::Short => (entry_price - exit_price) / entry_price,
    }
}

/// Cash effect of one round trip on a leveraged balance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settlement {
    pub notional: f64,
    pub profit: f64,
    pub fee: f64,
    pub net: f64,
}

impl Settlement {
    pub fn compute(balance: f64, account: &AccountConfig, price_return: f64) -> Self {
        let notional = balance * account.leverage as f64;
        let fee = notional * account.fee_rate * 2.0;
        let profit = notional * price_return;
        Self {
            notional,
            profit,
            fee,
            net: profit - fee,
        }
    }
}

/// Mutable state of a simulation run
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationState {
    pub balance: f64,
    pub last_exit_index: Option<usize>,
    pub daily_trade_counts: BTreeMap<NaiveDate, u32>,
}

impl SimulationState {
    pub fn new(initial_balance: f64) -> Self {
        Self {
            balance: initial_balance,
            last_exit_index: None,
            daily_trade_counts: BTreeMap::new(),
        }
    }

    /// Next per-day label, e.g. `2024-03-01 Trade2`
    pub fn next_trade_id(&mut self, day: NaiveDate) -> String {
        let count = self.daily_trade_counts.entry(day).or_insert(0);
        *count += 1;
        format!("{} Trade{}", day.format("%Y-%m-%d"), count)
    }

    /// Apply a resolved trade to the account and record the exit
    pub fn settle(
        &mut self,
        bars: &[Bar],
        setup: &Setup,
        outcome: Outcome,
        exit_index: usize,
        exit_price: f64,
        account: &AccountConfig,
    ) -> Trade {
        let pnl = price_return(setup.side, setup.entry_price, exit_price);
        let settlement = Settlement::compute(self.balance, account, pnl);
        self.balance += settlement.net;
        self.last_exit_index = Some(exit_index);

        let id = self.next_trade_id(setup.timestamp.date_naive());
        let exit_time = bars
            .get(exit_index)
            .map(|b| b.timestamp)
            .unwrap_or(setup.timestamp);

        Trade {
            id,
            entry_index: setup.index,
            exit_index,
            entry_time: setup.timestamp,
            exit_time,
            side: setup.side,
            entry_price: setup.entry_price,
            exit_price,
            outcome,
            pnl_pct: pnl * 100.0,
            pnl_cash: settlement.net,
            fee: settlement.fee,
            balance_after: self.balance,
        }
    }
}

/// Filter funnel of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanStats {
    pub scanned: usize,
    pub setups: usize,
    pub timeouts: usize,
    pub out_of_range: usize,
    pub rejections: BTreeMap<Rejection, usize>,
}

#[derive(Debug, Clone, Default)]
pub struct BacktestResult {
    pub trades: Vec<Trade>,
    pub final_balance: f64,
    pub metrics: PerformanceMetrics,
    pub stats: ScanStats,
    /// Balance fell below the minimum and scanning stopped early
    pub halted: bool,
}

/// Backtest engine
pub struct Backtester {
    detector: BoxBreakoutDetector,
    account: AccountConfig,
}

impl Backtester {
    pub fn new(account: AccountConfig, strategy: BoxBreakoutConfig) -> Result<Self, BacktestError> {
        account.validate()?;
        let detector = box_breakout::create(&strategy)?;
        Ok(Self { detector, account })
    }

    pub fn from_config(config: &Config) -> Result<Self, BacktestError> {
        Self::new(config.account.clone(), config.strategy.clone())
    }

    pub fn detector(&self) -> &BoxBreakoutDetector {
        &self.detector
    }

    /// Minimum series length accepted by [`Backtester::run`]
    pub fn required_bars(&self) -> usize {
        self.detector.warmup() + self.detector.config().horizon
    }

    /// Run backtest on a single bar series
    pub fn run(&self, bars: &[Bar]) -> Result<BacktestResult, BacktestError> {
        let required = self.required_bars();
        if bars.len() < required {
            return Err(BacktestError::InsufficientData {
                bars: bars.len(),
                required,
            });
        }

        let horizon = self.detector.config().horizon;
        let lookahead = (horizon - 1).max(self.detector.confirm_bars());
        let end = bars.len() - lookahead;

        let series = self.detector.prepare(bars);
        let mut state = SimulationState::new(self.account.initial_balance);
        let mut trades = Vec::new();
        let mut stats = ScanStats::default();
        let mut halted = false;

        for index in self.detector.warmup()..end {
            if state.balance < self.account.min_balance {
                halted = true;
                break;
            }

            stats.scanned += 1;
            let setup = match self.detector.evaluate(&series, index, state.last_exit_index) {
                Ok(setup) => setup,
                Err(rejection) => {
                    *stats.rejections.entry(rejection).or_insert(0) += 1;
                    continue;
                }
            };
            stats.setups += 1;

            match resolve(bars, &setup, horizon) {
                Resolution::Resolved {
                    outcome,
                    exit_index,
                    exit_price,
                } => {
                    let trade = state.settle(
                        bars,
                        &setup,
                        outcome,
                        exit_index,
                        exit_price,
                        &self.account,
                    );
                    debug!(
                        id = %trade.id,
                        side = %trade.side,
                        entry = trade.entry_price,
                        exit = trade.exit_price,
                        outcome = %trade.outcome,
                        pnl_pct = trade.pnl_pct,
                        balance = trade.balance_after,
                        "Trade closed"
                    );
                    trades.push(trade);
                }
                Resolution::Timeout => stats.timeouts += 1,
                Resolution::OutOfRange => stats.out_of_range += 1,
            }
        }

        if !halted && state.balance < self.account.min_balance {
            halted = true;
        }

        let metrics = calculate_metrics(self.account.initial_balance, &trades);
        info!(
            trades = trades.len(),
            final_balance = state.balance,
            halted,
            "Backtest complete"
        );

        Ok(BacktestResult {
            trades,
            final_balance: state.balance,
            metrics,
            stats,
            halted,
        })
    }
}

/// Summary statistics over a trade log
pub fn calculate_metrics(initial_balance: f64, trades: &[Trade]) -> PerformanceMetrics {
    let final_balance = trades.last().map_or(initial_balance, |t| t.balance_after);
    if trades.is_empty() {
        return PerformanceMetrics {
            initial_balance,
            final_balance,
            ..Default::default()
        };
    }

    let total_return = ((final_balance - initial_balance) / initial_balance) * 100.0;

    let winners: Vec<&Trade> = trades.iter().filter(|t| t.is_win()).collect();
    let losers: Vec<&Trade> = trades.iter().filter(|t| !t.is_win()).collect();

    let win_rate = (winners.len() as f64 / trades.len() as f64) * 100.0;

    let gross_profits: f64 = winners.iter().map(|t| t.pnl_cash).sum();
    let gross_losses: f64 = losers.iter().map(|t| t.pnl_cash.abs()).sum();

    let profit_factor = if gross_losses > 0.0 {
        gross_profits / gross_losses
    } else if gross_profits > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let avg_win = if winners.is_empty() {
        0.0
    } else {
        gross_profits / winners.len() as f64
    };
    let avg_loss = if losers.is_empty() {
        0.0
    } else {
        gross_losses / losers.len() as f64
    };

    let largest_win = winners.iter().map(|t| t.pnl_cash).fold(0.0, f64::max);
    let largest_loss = losers.iter().map(|t| t.pnl_cash).fold(0.0, f64::min);

    // Drawdown over the balance path, starting from the initial balance
    let mut peak = initial_balance;
    let mut max_dd = 0.0;
    for balance in trades.iter().map(|t| t.balance_after) {
        if balance > peak {
            peak = balance;
        }
        let dd = if peak > 0.0 { (peak - balance) / peak } else { 0.0 };
        if dd > max_dd {
            max_dd = dd;
        }
    }

    PerformanceMetrics {
        initial_balance,
        final_balance,
        total_return,
        max_drawdown: max_dd * 100.0,
        win_rate,
        profit_factor,
        total_trades: trades.len(),
        winning_trades: winners.len(),
        losing_trades: losers.len(),
        take_profits: trades.iter().filter(|t| t.outcome == Outcome::TakeProfit).count(),
        stop_losses: trades.iter().filter(|t| t.outcome == Outcome::StopLoss).count(),
        avg_win,
        avg_loss,
        largest_win,
        largest_loss,
        total_fees: trades.iter().map(|t| t.fee).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 23, 50, 0).unwrap()
    }

    fn flat(i: usize, price: f64) -> Bar {
        Bar::new(t0() + Duration::minutes(i as i64), price, price + 0.1, price - 0.1, price, 1000.0)
    }

    fn long_setup(index: usize) -> Setup {
        Setup {
            index,
            timestamp: t0() + Duration::minutes(index as i64),
            side: Side::Long,
            entry_price: 100.0,
            take_profit_price: 100.5,
            stop_loss_price: 99.7,
        }
    }

    #[test]
    fn test_bracket_hit_stop_wins_same_bar() {
        let bar = Bar::new(t0(), 100.0, 101.0, 99.0, 100.0, 1.0);
        assert_eq!(
            bracket_hit(Side::Long, &bar, 100.5, 99.7),
            Some((Outcome::StopLoss, 99.7))
        );
        assert_eq!(
            bracket_hit(Side::Short, &bar, 99.5, 100.3),
            Some((Outcome::StopLoss, 100.3))
        );
    }

    #[test]
    fn test_bracket_hit_none_inside() {
        let bar = flat(0, 100.0);
        assert_eq!(bracket_hit(Side::Long, &bar, 100.5, 99.7), None);
    }

    #[test]
    fn test_resolve_take_profit() {
        let mut bars: Vec<Bar> = (0..10).map(|i| flat(i, 100.0)).collect();
        bars[3].high = 100.6;
        assert_eq!(
            resolve(&bars, &long_setup(0), 30),
            Resolution::Resolved {
                outcome: Outcome::TakeProfit,
                exit_index: 3,
                exit_price: 100.5
            }
        );
    }

    #[test]
    fn test_resolve_timeout_and_out_of_range() {
        let bars: Vec<Bar> = (0..40).map(|i| flat(i, 100.0)).collect();
        assert_eq!(resolve(&bars, &long_setup(0), 30), Resolution::Timeout);
        assert_eq!(resolve(&bars, &long_setup(20), 30), Resolution::OutOfRange);
    }

    #[test]
    fn test_resolve_ignores_bar_past_horizon() {
        let mut bars: Vec<Bar> = (0..40).map(|i| flat(i, 100.0)).collect();
        // j = 30 is outside 1..30
        bars[30].high = 101.0;
        assert_eq!(resolve(&bars, &long_setup(0), 30), Resolution::Timeout);
        bars[29].high = 101.0;
        assert!(matches!(
            resolve(&bars, &long_setup(0), 30),
            Resolution::Resolved { exit_index: 29, .. }
        ));
    }

    #[test]
    fn test_settlement_formula() {
        let account = AccountConfig::default();
        let s = Settlement::compute(100.0, &account, 0.005);
        assert_relative_eq!(s.notional, 3500.0);
        assert_relative_eq!(s.fee, 2.8, epsilon = 1e-9);
        assert_relative_eq!(s.net, 14.7, epsilon = 1e-9);
    }

    #[test]
    fn test_trade_ids_reset_per_day() {
        let mut state = SimulationState::new(100.0);
        let day1 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        assert_eq!(state.next_trade_id(day1), "2024-03-01 Trade1");
        assert_eq!(state.next_trade_id(day1), "2024-03-01 Trade2");
        assert_eq!(state.next_trade_id(day2), "2024-03-02 Trade1");
    }

    #[test]
    fn test_settle_updates_state() {
        let bars: Vec<Bar> = (0..10).map(|i| flat(i, 100.0)).collect();
        let mut state = SimulationState::new(100.0);
        let trade = state.settle(
            &bars,
            &long_setup(2),
            Outcome::StopLoss,
            4,
            99.7,
            &AccountConfig::default(),
        );
        assert_eq!(state.last_exit_index, Some(4));
        assert!(trade.pnl_cash < 0.0);
        assert_relative_eq!(trade.pnl_pct, -0.3, epsilon = 1e-9);
        assert_relative_eq!(state.balance, trade.balance_after);
        // 23:52 entry belongs to 2024-03-01
        assert_eq!(trade.id, "2024-03-01 Trade1");
    }

    #[test]
    fn test_insufficient_data() {
        let bt = Backtester::new(AccountConfig::default(), BoxBreakoutConfig::default()).unwrap();
        let bars: Vec<Bar> = (0..49).map(|i| flat(i, 100.0)).collect();
        assert_eq!(
            bt.run(&bars).unwrap_err(),
            BacktestError::InsufficientData {
                bars: 49,
                required: 50
            }
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let strategy = BoxBreakoutConfig {
            avg_range_window: 0,
            ..Default::default()
        };
        assert!(matches!(
            Backtester::new(AccountConfig::default(), strategy),
            Err(BacktestError::Config(_))
        ));
    }

    #[test]
    fn test_flat_series_no_trades() {
        let bt = Backtester::new(AccountConfig::default(), BoxBreakoutConfig::default()).unwrap();
        let bars: Vec<Bar> = (0..200).map(|i| flat(i, 100.0)).collect();
        let result = bt.run(&bars).unwrap();
        assert!(result.trades.is_empty());
        assert_eq!(result.stats.setups, 0);
        assert_eq!(result.final_balance, 100.0);
        assert_eq!(result.stats.scanned, 200 - 29 - 20);
    }

    #[test]
    fn test_metrics_drawdown() {
        let make = |balance_after: f64, pnl_cash: f64| Trade {
            id: String::new(),
            entry_index: 0,
            exit_index: 1,
            entry_time: t0(),
            exit_time: t0(),
            side: Side::Long,
            entry_price: 100.0,
            exit_price: 100.0,
            outcome: if pnl_cash > 0.0 { Outcome::TakeProfit } else { Outcome::StopLoss },
            pnl_pct: 0.0,
            pnl_cash,
            fee: 1.0,
            balance_after,
        };
        let trades = vec![make(120.0, 20.0), make(90.0, -30.0), make(100.0, 10.0)];
        let m = calculate_metrics(100.0, &trades);
        assert_eq!(m.total_trades, 3);
        assert_eq!(m.winning_trades, 2);
        assert_relative_eq!(m.max_drawdown, 25.0, epsilon = 1e-9);
        assert_relative_eq!(m.profit_factor, 1.0, epsilon = 1e-9);
        assert_relative_eq!(m.total_fees, 3.0);
        assert_eq!(m.stop_losses, 1);
    }
}
