//! Box breakout scalper - main entry point
//!
//! This binary provides four subcommands:
//! - backtest: Run the strategy over historical minute bars
//! - optimize: Grid search over strategy/account parameters
//! - live: Run the polling loop (paper or real)
//! - download: Download historical klines from Binance futures

use anyhow::Result;
use breakout_scalper::optimizer::SortMetric;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

const DEFAULT_CONFIG: &str = "configs/btcusdt_1m.json";

#[derive(Parser, Debug)]
#[command(name = "breakout-scalper")]
#[command(
    about = "Minute-bar box breakout strategy with backtesting, optimization, and live trading",
    long_about = None
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run strategy backtest
    Backtest {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,

        /// CSV file or directory of CSV files (overrides config)
        #[arg(short, long)]
        data: Option<String>,

        /// Initial balance
        #[arg(long)]
        capital: Option<f64>,

        /// Leverage multiplier
        #[arg(long)]
        leverage: Option<u32>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,

        /// Write the trade log to this CSV file
        #[arg(long)]
        trades_out: Option<String>,

        /// Print every trade
        #[arg(long)]
        show_trades: bool,
    },

    /// Optimize strategy parameters over the config's grid
    Optimize {
        /// Path to base configuration file (must contain a grid section)
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,

        /// CSV file or directory of CSV files (overrides config)
        #[arg(short, long)]
        data: Option<String>,

        /// Sort results by metric
        #[arg(long, value_enum, default_value = "return")]
        sort_by: SortMetric,

        /// Number of top results to show
        #[arg(short, long, default_value = "10")]
        top: usize,

        /// Ignore combinations with fewer trades
        #[arg(long, default_value = "1")]
        min_trades: usize,
    },

    /// Run live trading
    Live {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,

        /// Paper trading mode (safe, no real money)
        #[arg(long)]
        paper: bool,

        /// Live trading mode (CAUTION - REAL MONEY!)
        #[arg(long)]
        live: bool,

        /// Use the futures testnet endpoint
        #[arg(long)]
        testnet: bool,
    },

    /// Download historical klines from Binance USDT-M futures
    Download {
        /// Symbol, e.g. BTCUSDT
        #[arg(short, long, default_value = "BTCUSDT")]
        symbol: String,

        /// Kline interval
        #[arg(short, long, default_value = "1m")]
        interval: String,

        /// Days of history ending now (ignored when --start is given)
        #[arg(long, default_value = "30")]
        days: u32,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD, inclusive)
        #[arg(long)]
        end: Option<String>,

        /// Output CSV path (default data/{SYMBOL}_{interval}.csv)
        #[arg(short, long)]
        output: Option<String>,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    if file_only {
        // Console stays clean for the progress bar
        let file_appender = tracing_appender::rolling::never("logs", &log_filename);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        // Same format without ANSI colors
        let file_appender = tracing_appender::rolling::never("logs", &log_filename);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Logging initialized");
        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Backtest { .. } => ("backtest", false),
        Commands::Optimize { .. } => ("optimize", true),
        Commands::Live { .. } => ("live", false),
        Commands::Download { .. } => ("download", false),
    };

    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Backtest {
            config,
            data,
            capital,
            leverage,
            start,
            end,
            trades_out,
            show_trades,
        } => commands::backtest::run(commands::backtest::BacktestArgs {
            config_path: config,
            data_path: data,
            capital,
            leverage,
            start,
            end,
            trades_out,
            show_trades,
        }),

        Commands::Optimize {
            config,
            data,
            sort_by,
            top,
            min_trades,
        } => commands::optimize::run(config, data, sort_by, top, min_trades),

        Commands::Live {
            config,
            paper,
            live,
            testnet,
        } => commands::live::run(config, paper, live, testnet),

        Commands::Download {
            symbol,
            interval,
            days,
            start,
            end,
            output,
        } => commands::download::run(symbol, interval, days, start, end, output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_optimize() {
        let cli = Cli::try_parse_from(["breakout-scalper", "optimize", "--top", "5"]).unwrap();
        assert!(matches!(cli.command, Commands::Optimize { top: 5, .. }));
    }

    #[test]
    fn test_console_and_file_logging_initializes() {
        setup_logging(false, "logging_test", false).unwrap();
        info!("console and file layers installed");
    }
}
