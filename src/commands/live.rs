//! Live Trading Command
//!
//! Paper mode trades a simulated balance against real market data; live mode
//! routes real orders to Binance USDT-M futures.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use breakout_scalper::binance::{BinanceFuturesClient, Credentials};
use breakout_scalper::live::{BinanceExchange, Exchange, LiveTrader, PaperExchange};
use breakout_scalper::strategies::box_breakout;
use breakout_scalper::Config;
use tokio::time::sleep;
use tracing::{info, warn};

pub fn run(config_path: String, paper: bool, live: bool, testnet: bool) -> Result<()> {
    if !paper && !live {
        bail!("Must specify either --paper or --live mode");
    }
    if live && paper {
        bail!("Cannot specify both --paper and --live modes");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run_async(config_path, paper, testnet))
}

async fn run_async(config_path: String, paper_mode: bool, testnet: bool) -> Result<()> {
    let mut config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;
    if testnet {
        config.live.testnet = true;
    }
    config.validate()?;

    let mode_str = if paper_mode { "PAPER" } else { "LIVE" };
    info!("{}", "=".repeat(60));
    info!("BOX BREAKOUT - {} MODE", mode_str);
    info!("{}", "=".repeat(60));
    info!("Symbol:        {}", config.live.symbol);
    info!("Interval:      {}", config.live.interval);
    info!("Leverage:      {}x ({})", config.account.leverage, config.live.margin_type);
    info!("Risk per trade: {:.0}% of available balance", config.live.risk_pct * 100.0);
    info!("Poll interval: {}s", config.live.poll_secs);
    if config.live.testnet {
        info!("Endpoint:      testnet");
    }
    info!("{}", "=".repeat(60));

    let detector = box_breakout::create(&config.strategy)?;

    if paper_mode {
        let client = BinanceFuturesClient::public(&config.exchange, config.live.testnet)?;
        let exchange = PaperExchange::new(
            client,
            config.account.initial_balance,
            config.account.fee_rate,
        );
        let mut trader = LiveTrader::new(
            exchange,
            detector,
            config.account.clone(),
            config.live.clone(),
        );
        trader.run().await?;

        let fills = trader.exchange().fills().await;
        info!(
            "Paper session ended: {} closed trades, balance {:.2}",
            fills.len(),
            trader.exchange().balance().await
        );
        return Ok(());
    }

    warn!("LIVE TRADING MODE - REAL MONEY AT RISK!");
    warn!("Press Ctrl+C within 10 seconds to abort...");
    for i in (1..=10).rev() {
        info!("Starting in {} seconds...", i);
        sleep(Duration::from_secs(1)).await;
    }

    let credentials = Credentials::from_config(&config.exchange)?;
    let client = BinanceFuturesClient::authenticated(
        &config.exchange,
        credentials,
        config.live.testnet,
        config.live.recv_window_ms,
    )?;
    let exchange = BinanceExchange::new(client);

    let balance = exchange.available_balance(config.live.quote_asset()).await?;
    info!("Available balance: {:.2} {}", balance, config.live.quote_asset());

    let mut trader =
        LiveTrader::new(exchange, detector, config.account.clone(), config.live.clone());
    trader.run().await?;

    info!("Live trading stopped");
    Ok(())
}
