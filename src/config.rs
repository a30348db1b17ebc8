//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable support for API credentials.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::strategies::BoxBreakoutConfig;

pub const API_KEY_ENV: &str = "BINANCE_API_KEY";
pub const API_SECRET_ENV: &str = "BINANCE_SECRET_KEY";

/// Configuration validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroWindow(&'static str),

    #[error("{field} must be at least {min}, got {value}")]
    WindowTooShort {
        field: &'static str,
        min: usize,
        value: usize,
    },

    #[error("{field} must be a finite non-negative number, got {value}")]
    InvalidThreshold { field: &'static str, value: f64 },

    #[error("{field} = {value} puts the bracket on the wrong side of entry")]
    BracketSide { field: &'static str, value: f64 },

    #[error("leverage must be positive")]
    NonPositiveLeverage,

    #[error("initial balance must be positive, got {0}")]
    NonPositiveBalance(f64),

    #[error("fee rate must be in [0, 1), got {0}")]
    InvalidFeeRate(f64),

    #[error("min balance must be a finite non-negative number, got {0}")]
    InvalidMinBalance(f64),

    #[error("risk_pct must be in (0, 1], got {0}")]
    InvalidRiskPct(f64),

    #[error("lookback {lookback} is shorter than the {required} bars the detector needs")]
    LookbackTooShort { lookback: usize, required: usize },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub account: AccountConfig,
    pub strategy: BoxBreakoutConfig,
    pub backtest: BacktestConfig,
    pub live: LiveConfig,
    pub exchange: ExchangeConfig,
    /// Grid search parameters for optimization (optional)
    /// Each key is a strategy param name (or `account.<field>`), value is the
    /// array of values to test
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid: Option<BTreeMap<String, Vec<serde_json::Value>>>,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        config.exchange.apply_env();
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.account.validate()?;
        self.strategy.validate()?;
        if !(self.live.risk_pct > 0.0 && self.live.risk_pct <= 1.0) {
            return Err(ConfigError::InvalidRiskPct(self.live.risk_pct));
        }
        let required = self.strategy.warmup() + self.strategy.confirm_bars + 2;
        if self.live.lookback < required {
            return Err(ConfigError::LookbackTooShort {
                lookback: self.live.lookback,
                required,
            });
        }
        Ok(())
    }
}

/// Account and fee model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    pub initial_balance: f64,
    pub leverage: u32,
    /// Charged on notional, once per side
    pub fee_rate: f64,
    /// Scanning halts once the balance falls below this
    pub min_balance: f64,
}

impl Default for AccountConfig {
    fn default() -> Self {
        AccountConfig {
            initial_balance: 100.0,
            leverage: 35,
            fee_rate: 0.0004,
            min_balance: 1.0,
        }
    }
}

impl AccountConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.leverage == 0 {
            return Err(ConfigError::NonPositiveLeverage);
        }
        if !(self.initial_balance.is_finite() && self.initial_balance > 0.0) {
            return Err(ConfigError::NonPositiveBalance(self.initial_balance));
        }
        if !(self.fee_rate >= 0.0 && self.fee_rate < 1.0) {
            return Err(ConfigError::InvalidFeeRate(self.fee_rate));
        }
        if !(self.min_balance.is_finite() && self.min_balance >= 0.0) {
            return Err(ConfigError::InvalidMinBalance(self.min_balance));
        }
        Ok(())
    }
}

/// Backtest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// CSV file or directory of CSV files
    pub data_path: String,
    /// Inclusive, YYYY-MM-DD
    pub start_date: Option<String>,
    /// Inclusive, YYYY-MM-DD
    pub end_date: Option<String>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            data_path: "data/BTCUSDT_1m.csv".to_string(),
            start_date: None,
            end_date: None,
        }
    }
}

/// Live trading loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub symbol: String,
    pub interval: String,
    /// Klines fetched per cycle
    pub lookback: usize,
    /// ISOLATED or CROSSED
    pub margin_type: String,
    /// Fraction of available balance committed as margin
    pub risk_pct: f64,
    pub poll_secs: u64,
    /// Heartbeat log interval
    pub log_interval_secs: u64,
    pub testnet: bool,
    pub recv_window_ms: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        LiveConfig {
            symbol: "BTCUSDT".to_string(),
            interval: "1m".to_string(),
            lookback: 140,
            margin_type: "ISOLATED".to_string(),
            risk_pct: 0.95,
            poll_secs: 10,
            log_interval_secs: 3600,
            testnet: false,
            recv_window_ms: 5000,
        }
    }
}

impl LiveConfig {
    /// Quote asset from the symbol suffix, USDT when unknown
    pub fn quote_asset(&self) -> &'static str {
        if self.symbol.ends_with("USDC") {
            "USDC"
        } else {
            "USDT"
        }
    }
}

/// Exchange connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    pub max_retries: u32,
    pub timeout_secs: u64,
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    pub circuit_timeout_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            api_key: None,
            api_secret: None,
            max_retries: 3,
            timeout_secs: 30,
            failure_threshold: 5,
            circuit_timeout_secs: 60,
        }
    }
}

impl ExchangeConfig {
    /// Load API credentials from environment, overriding the file
    pub fn apply_env(&mut self) {
        if let Ok(api_key) = std::env::var(API_KEY_ENV) {
            self.api_key = Some(api_key);
        }
        if let Ok(api_secret) = std::env::var(API_SECRET_ENV) {
            self.api_secret = Some(api_secret);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_json_gives_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.account, AccountConfig::default());
        assert_eq!(config.strategy, BoxBreakoutConfig::default());
        assert_eq!(config.live.symbol, "BTCUSDT");
        assert!(config.grid.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_with_grid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "account": {{ "initial_balance": 250.0, "leverage": 20 }},
                "strategy": {{ "cooldown_bars": 5 }},
                "grid": {{ "min_volume_spike": [1.5, 2.0] }}
            }}"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.account.initial_balance, 250.0);
        assert_eq!(config.account.leverage, 20);
        assert_eq!(config.account.fee_rate, 0.0004);
        assert_eq!(config.strategy.cooldown_bars, 5);
        assert_eq!(config.grid.unwrap()["min_volume_spike"].len(), 2);
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(Config::from_file("/nonexistent/config.json").is_err());
    }

    #[test]
    fn test_zero_leverage_rejected() {
        let account = AccountConfig {
            leverage: 0,
            ..Default::default()
        };
        assert_eq!(account.validate(), Err(ConfigError::NonPositiveLeverage));
    }

    #[test]
    fn test_invalid_min_balance_rejected() {
        for min_balance in [-1.0, f64::INFINITY] {
            let account = AccountConfig {
                min_balance,
                ..Default::default()
            };
            assert_eq!(account.validate(), Err(ConfigError::InvalidMinBalance(min_balance)));
        }

        let nan = AccountConfig {
            min_balance: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(nan.validate(), Err(ConfigError::InvalidMinBalance(_))));

        let zero = AccountConfig {
            min_balance: 0.0,
            ..Default::default()
        };
        assert!(zero.validate().is_ok());
    }

    #[test]
    fn test_short_lookback_rejected() {
        let mut config = Config::default();
        config.live.lookback = 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::LookbackTooShort { .. })
        ));
    }

    #[test]
    fn test_quote_asset() {
        let mut live = LiveConfig::default();
        assert_eq!(live.quote_asset(), "USDT");
        live.symbol = "BTCUSDC".to_string();
        assert_eq!(live.quote_asset(), "USDC");
    }
}
