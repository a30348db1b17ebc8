//! Backtest command implementation

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use breakout_scalper::backtest::{BacktestResult, Backtester};
use breakout_scalper::{data, Config, Trade};
use tracing::{info, warn};

pub struct BacktestArgs {
    pub config_path: String,
    pub data_path: Option<String>,
    pub capital: Option<f64>,
    pub leverage: Option<u32>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub trades_out: Option<String>,
    pub show_trades: bool,
}

pub fn run(args: BacktestArgs) -> Result<()> {
    info!("Starting backtest");

    let mut config = Config::from_file(&args.config_path)?;
    info!("Loaded configuration from: {}", args.config_path);

    if let Some(path) = args.data_path {
        info!("Overriding data path to: {}", path);
        config.backtest.data_path = path;
    }
    if let Some(capital) = args.capital {
        info!("Overriding initial balance to: {:.2}", capital);
        config.account.initial_balance = capital;
    }
    if let Some(leverage) = args.leverage {
        info!("Overriding leverage to: {}x", leverage);
        config.account.leverage = leverage;
    }
    if let Some(start) = args.start {
        config.backtest.start_date = Some(start);
    }
    if let Some(end) = args.end {
        config.backtest.end_date = Some(end);
    }

    let backtester = Backtester::from_config(&config)?;

    info!("Loading data from: {}", config.backtest.data_path);
    let bars = data::load_bars(&config.backtest.data_path)?;
    let start = config.backtest.start_date.as_deref().map(data::parse_date).transpose()?;
    let end = config.backtest.end_date.as_deref().map(data::parse_date).transpose()?;
    let bars = data::filter_by_date(&bars, start, end);

    let report = data::validate_bars(&bars);
    for warning in report.warnings.iter().take(5) {
        warn!("{}", warning);
    }
    if !report.is_valid() {
        warn!("{} malformed bars in data set", report.errors.len());
    }

    if let (Some(first), Some(last)) = (bars.first(), bars.last()) {
        info!("Loaded {} bars from {} to {}", bars.len(), first.timestamp, last.timestamp);
    }

    info!("Running backtest...");
    let result = backtester.run(&bars)?;

    if args.show_trades {
        print_trades(&result.trades);
    }
    print_summary(&config, &result);

    if let Some(path) = args.trades_out {
        write_trades(&result.trades, &path)?;
        info!("Wrote {} trades to {}", result.trades.len(), path);
    }

    info!("Backtest completed successfully");
    Ok(())
}

fn print_trades(trades: &[Trade]) {
    println!("\n{}", "=".repeat(100));
    println!(
        "{:<20} {:<6} {:<20} {:>12} {:>12} {:<11} {:>8} {:>12}",
        "Trade", "Side", "Entry Time", "Entry", "Exit", "Outcome", "PnL%", "Balance"
    );
    println!("{}", "-".repeat(100));
    for t in trades {
        println!(
            "{:<20} {:<6} {:<20} {:>12.2} {:>12.2} {:<11} {:>8.3} {:>12.2}",
            t.id,
            t.side,
            t.entry_time.format("%Y-%m-%d %H:%M"),
            t.entry_price,
            t.exit_price,
            t.outcome,
            t.pnl_pct,
            t.balance_after
        );
    }
}

fn print_summary(config: &Config, result: &BacktestResult) {
    let m = &result.metrics;
    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULTS");
    println!("{}", "=".repeat(60));
    println!("Initial Balance:    {:.2}", config.account.initial_balance);
    println!("Final Balance:      {:.2}", result.final_balance);
    println!("Total Return:       {:.2}%", m.total_return);
    println!("Max Drawdown:       {:.2}%", m.max_drawdown);
    println!("Win Rate:           {:.2}%", m.win_rate);
    println!("Profit Factor:      {:.2}", m.profit_factor);
    println!("Total Trades:       {}", m.total_trades);
    println!("Take Profits:       {}", m.take_profits);
    println!("Stop Losses:        {}", m.stop_losses);
    println!("Average Win:        {:.2}", m.avg_win);
    println!("Average Loss:       {:.2}", m.avg_loss);
    println!("Largest Win:        {:.2}", m.largest_win);
    println!("Largest Loss:       {:.2}", m.largest_loss);
    println!("Total Fees:         {:.2}", m.total_fees);
    if result.halted {
        println!("Halted:             balance below {:.2}", config.account.min_balance);
    }
    println!("{}", "-".repeat(60));
    println!("Indices scanned:    {}", result.stats.scanned);
    for (rejection, count) in &result.stats.rejections {
        println!("  {:<18}{}", format!("{}:", rejection), count);
    }
    println!("Setups:             {}", result.stats.setups);
    println!("Timeouts:           {}", result.stats.timeouts);
    println!("{}", "=".repeat(60));
}

fn write_trades(trades: &[Trade], path: &str) -> Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Failed to create {}", path))?;
    for trade in trades {
        writer.serialize(trade)?;
    }
    writer.flush()?;
    Ok(())
}
