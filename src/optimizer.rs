//! Parameter Optimization
//!
//! Expands the config's `grid` section into one config per combination and
//! backtests each in parallel against the same bar series.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use indicatif::ProgressBar;
use itertools::Itertools;
use rayon::prelude::*;
use serde_json::Value;
use tracing::{debug, info};

use crate::backtest::Backtester;
use crate::{Bar, Config};

const ACCOUNT_PREFIX: &str = "account.";

/// Optimization result for a single parameter combination
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub params: BTreeMap<String, Value>,
    pub total_return: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub total_trades: usize,
    pub final_balance: f64,
    pub halted: bool,
}

/// Metric used to rank results
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SortMetric {
    Return,
    WinRate,
    ProfitFactor,
    /// Smallest drawdown first
    Drawdown,
    Trades,
}

/// Split a grid key into its config section and field
fn grid_target(key: &str) -> (&'static str, &str) {
    match key.strip_prefix(ACCOUNT_PREFIX) {
        Some(field) => ("account", field),
        None => ("strategy", key),
    }
}

/// Total number of grid combinations (1 when there is no grid)
pub fn total_combinations(config: &Config) -> usize {
    match &config.grid {
        Some(grid) if !grid.is_empty() => grid.values().map(|v| v.len()).product(),
        _ => 1,
    }
}

/// Generate all config combinations from the grid section
///
/// Keys name a strategy field (`box_window`) or an account field
/// (`account.leverage`). Every generated config has its grid cleared.
pub fn generate_grid_configs(config: &Config) -> Result<Vec<Config>> {
    let grid = match &config.grid {
        Some(g) if !g.is_empty() => g,
        _ => {
            let mut base = config.clone();
            base.grid = None;
            return Ok(vec![base]);
        }
    };

    let mut base = serde_json::to_value(config).context("Failed to serialize base config")?;
    if let Some(obj) = base.as_object_mut() {
        obj.remove("grid");
    }

    for (key, values) in grid {
        let (section, field) = grid_target(key);
        if base.get(section).and_then(|s| s.get(field)).is_none() {
            bail!("Unknown grid parameter '{}'", key);
        }
        if values.is_empty() {
            bail!("Grid parameter '{}' has no values", key);
        }
    }

    grid.iter()
        .map(|(key, values)| values.iter().map(move |v| (key, v)))
        .multi_cartesian_product()
        .map(|combo| {
            let mut value = base.clone();
            for (key, v) in combo {
                let (section, field) = grid_target(key);
                value[section][field] = v.clone();
            }
            serde_json::from_value::<Config>(value).context("Grid value has the wrong type")
        })
        .collect()
}

/// Current values of the grid keys in a config
pub fn extract_params(config: &Config, keys: &[String]) -> BTreeMap<String, Value> {
    let Ok(value) = serde_json::to_value(config) else {
        return BTreeMap::new();
    };
    keys.iter()
        .filter_map(|key| {
            let (section, field) = grid_target(key);
            value
                .get(section)
                .and_then(|s| s.get(field))
                .map(|v| (key.clone(), v.clone()))
        })
        .collect()
}

/// Backtest every config in parallel. Combinations that fail validation or
/// have too little data are skipped.
pub fn optimize(
    bars: &[Bar],
    configs: &[Config],
    keys: &[String],
    progress: &ProgressBar,
) -> Vec<OptimizationResult> {
    info!("Testing {} parameter combinations", configs.len());

    configs
        .par_iter()
        .filter_map(|config| {
            let result = Backtester::from_config(config).and_then(|bt| bt.run(bars));
            progress.inc(1);
            match result {
                Ok(result) => Some(OptimizationResult {
                    params: extract_params(config, keys),
                    total_return: result.metrics.total_return,
                    max_drawdown: result.metrics.max_drawdown,
                    win_rate: result.metrics.win_rate,
                    profit_factor: result.metrics.profit_factor,
                    total_trades: result.metrics.total_trades,
                    final_balance: result.final_balance,
                    halted: result.halted,
                }),
                Err(e) => {
                    debug!(params = ?extract_params(config, keys), "Skipped combination: {}", e);
                    None
                }
            }
        })
        .collect()
}

/// Sort best first
pub fn sort_results(results: &mut [OptimizationResult], sort_by: SortMetric) {
    results.sort_by(|a, b| {
        let (va, vb) = match sort_by {
            SortMetric::Return => (a.total_return, b.total_return),
            SortMetric::WinRate => (a.win_rate, b.win_rate),
            SortMetric::ProfitFactor => (a.profit_factor, b.profit_factor),
            SortMetric::Drawdown => (-a.max_drawdown, -b.max_drawdown),
            SortMetric::Trades => (a.total_trades as f64, b.total_trades as f64),
        };
        vb.partial_cmp(&va).unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn grid_config(grid: Value) -> Config {
        let mut config = Config::default();
        config.grid = Some(serde_json::from_value(grid).unwrap());
        config
    }

    fn result(total_return: f64, max_drawdown: f64, trades: usize) -> OptimizationResult {
        OptimizationResult {
            params: BTreeMap::new(),
            total_return,
            max_drawdown,
            win_rate: 50.0,
            profit_factor: 1.0,
            total_trades: trades,
            final_balance: 100.0,
            halted: false,
        }
    }

    #[test]
    fn test_no_grid_returns_base() {
        let configs = generate_grid_configs(&Config::default()).unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(total_combinations(&Config::default()), 1);
    }

    #[test]
    fn test_grid_expansion() {
        let config = grid_config(json!({
            "box_window": [4, 5],
            "min_volume_spike": [1.2, 1.5, 2.0],
            "account.leverage": [20]
        }));
        assert_eq!(total_combinations(&config), 6);

        let configs = generate_grid_configs(&config).unwrap();
        assert_eq!(configs.len(), 6);
        assert!(configs.iter().all(|c| c.grid.is_none()));
        assert!(configs.iter().all(|c| c.account.leverage == 20));
        assert_eq!(configs.iter().filter(|c| c.strategy.box_window == 4).count(), 3);
        assert!(configs.iter().any(|c| c.strategy.min_volume_spike == 2.0));
    }

    #[test]
    fn test_unknown_grid_key() {
        let config = grid_config(json!({"box_size": [4, 5]}));
        assert!(generate_grid_configs(&config).is_err());
        let config = grid_config(json!({"account.margin": [1]}));
        assert!(generate_grid_configs(&config).is_err());
    }

    #[test]
    fn test_wrong_value_type() {
        let config = grid_config(json!({"box_window": ["five"]}));
        assert!(generate_grid_configs(&config).is_err());
    }

    #[test]
    fn test_extract_params() {
        let config = Config::default();
        let keys = vec!["box_window".to_string(), "account.leverage".to_string()];
        let params = extract_params(&config, &keys);
        assert_eq!(params["box_window"], json!(5));
        assert_eq!(params["account.leverage"], json!(35));
    }

    #[test]
    fn test_sort_results() {
        let mut results = vec![result(5.0, 10.0, 3), result(12.0, 30.0, 8), result(-2.0, 2.0, 1)];

        sort_results(&mut results, SortMetric::Return);
        assert_eq!(results[0].total_return, 12.0);

        sort_results(&mut results, SortMetric::Drawdown);
        assert_eq!(results[0].max_drawdown, 2.0);

        sort_results(&mut results, SortMetric::Trades);
        assert_eq!(results[0].total_trades, 8);
    }

    #[test]
    fn test_optimize_skips_invalid_combinations() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars: Vec<Bar> = (0..120)
            .map(|i| Bar::new(start + Duration::minutes(i), 100.0, 100.1, 99.9, 100.0, 1000.0))
            .collect();
        let config = grid_config(json!({"box_window": [0, 5]}));
        let configs = generate_grid_configs(&config).unwrap();
        let keys: Vec<String> = config.grid.as_ref().unwrap().keys().cloned().collect();

        let results = optimize(&bars, &configs, &keys, &ProgressBar::hidden());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].params["box_window"], json!(5));
        assert_eq!(results[0].total_trades, 0);
    }
}
