//! Download command - fetch historical klines from Binance USDT-M futures

use anyhow::{bail, Context, Result};
use breakout_scalper::binance::{is_valid_interval, BinanceFuturesClient};
use breakout_scalper::{data, Bar, Config};
use chrono::{Duration, NaiveTime, Utc};
use tracing::info;

pub fn run(
    symbol: String,
    interval: String,
    days: u32,
    start: Option<String>,
    end: Option<String>,
    output: Option<String>,
) -> Result<()> {
    if !is_valid_interval(&interval) {
        bail!("Unsupported interval '{}'", interval);
    }
    let symbol = symbol.to_uppercase();

    let end_time = match end {
        Some(d) => data::parse_date(&d)?
            .succ_opt()
            .context("End date out of range")?
            .and_time(NaiveTime::MIN)
            .and_utc(),
        None => Utc::now(),
    };
    let start_time = match start {
        Some(d) => data::parse_date(&d)?.and_time(NaiveTime::MIN).and_utc(),
        None => end_time - Duration::days(days as i64),
    };
    if start_time >= end_time {
        bail!("Start {} is not before end {}", start_time, end_time);
    }

    let output = output.unwrap_or_else(|| format!("data/{}_{}.csv", symbol, interval));

    println!("\n{}", "=".repeat(60));
    println!("DOWNLOADING HISTORICAL DATA FROM BINANCE FUTURES");
    println!("{}", "=".repeat(60));
    println!("  Symbol:   {}", symbol);
    println!("  Interval: {}", interval);
    println!("  From:     {}", start_time);
    println!("  To:       {}", end_time);
    println!("  Output:   {}", output);
    println!("{}\n", "=".repeat(60));

    let rt = tokio::runtime::Runtime::new()?;
    let client = BinanceFuturesClient::public(&Config::default().exchange, false)?;
    let klines = rt.block_on(client.fetch_history(
        &symbol,
        &interval,
        start_time.timestamp_millis(),
        end_time.timestamp_millis(),
    ))?;

    let mut bars: Vec<Bar> = klines.iter().filter_map(|k| k.to_bar()).collect();
    let removed = data::sort_and_dedup(&mut bars);
    if removed > 0 {
        info!("Dropped {} duplicate bars", removed);
    }
    if bars.is_empty() {
        bail!("No klines returned for {} {}", symbol, interval);
    }

    data::save_csv(&bars, &output)?;

    println!("\n{}", "=".repeat(60));
    println!("DOWNLOAD COMPLETE");
    println!("{}", "=".repeat(60));
    println!("  Bars:   {}", bars.len());
    println!("  Output: {}", output);
    println!("{}", "=".repeat(60));

    Ok(())
}
