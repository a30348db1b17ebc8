//! Optimize command implementation with progress tracking

use anyhow::{bail, Result};
use breakout_scalper::optimizer::{self, SortMetric};
use breakout_scalper::{data, Config};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

pub fn run(
    config_path: String,
    data_path: Option<String>,
    sort_by: SortMetric,
    top: usize,
    min_trades: usize,
) -> Result<()> {
    info!("Starting optimization");

    let mut config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);
    if let Some(path) = data_path {
        config.backtest.data_path = path;
    }

    let Some(keys) = config.grid.as_ref().map(|g| g.keys().cloned().collect::<Vec<_>>()) else {
        bail!("Config {} has no grid section to optimize", config_path);
    };

    let configs = optimizer::generate_grid_configs(&config)?;
    info!("Parameter combinations: {}", configs.len());

    let bars = data::load_bars(&config.backtest.data_path)?;
    let start = config.backtest.start_date.as_deref().map(data::parse_date).transpose()?;
    let end = config.backtest.end_date.as_deref().map(data::parse_date).transpose()?;
    let bars = data::filter_by_date(&bars, start, end);
    info!("Loaded {} bars from {}", bars.len(), config.backtest.data_path);

    println!("\n{}", "=".repeat(70));
    println!("OPTIMIZATION SUMMARY");
    println!("{}", "=".repeat(70));
    println!("  Data:          {} ({} bars)", config.backtest.data_path, bars.len());
    println!("  Grid keys:     {}", keys.join(", "));
    println!("  Combinations:  {}", configs.len());
    println!("{}\n", "=".repeat(70));

    let pb = ProgressBar::new(configs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}, {per_sec:.2}]")?
            .progress_chars("█░ "),
    );

    let results = optimizer::optimize(&bars, &configs, &keys, &pb);
    pb.finish();
    println!();

    let mut results: Vec<_> = results
        .into_iter()
        .filter(|r| r.total_trades >= min_trades)
        .collect();
    if results.is_empty() {
        info!("No valid results found.");
        println!("No combination produced at least {} trades.", min_trades);
        return Ok(());
    }

    optimizer::sort_results(&mut results, sort_by);
    info!("Total results: {}, sorted by: {:?}", results.len(), sort_by);

    let display_count = top.min(results.len());
    println!("\n{}", "=".repeat(110));
    println!("TOP {} OPTIMIZATION RESULTS (sorted by {:?})", display_count, sort_by);
    println!("{}", "=".repeat(110));
    println!(
        "{:<4} {:>9} {:>8} {:>8} {:>7} {:>6} {:>10} | Parameters",
        "Rank", "Return%", "MaxDD%", "WinR%", "PF", "Trades", "Balance"
    );
    println!("{}", "-".repeat(110));

    for (i, result) in results.iter().take(display_count).enumerate() {
        let params = result
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "{:<4} {:>9.2} {:>8.2} {:>8.2} {:>7.2} {:>6} {:>10.2} | {}{}",
            i + 1,
            result.total_return,
            result.max_drawdown,
            result.win_rate,
            result.profit_factor,
            result.total_trades,
            result.final_balance,
            params,
            if result.halted { " (halted)" } else { "" }
        );
    }
    println!("{}", "=".repeat(110));

    info!("Optimization completed successfully");
    Ok(())
}
