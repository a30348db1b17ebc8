//! Binance USDT-M futures API types

use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use chrono::DateTime;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::Bar;

/// Binance kline/candlestick data
/// API returns an array: [open_time, open, high, low, close, volume, close_time,
///                        quote_volume, trades, taker_buy_base, taker_buy_quote, ignore]
#[derive(Debug, Clone, PartialEq)]
pub struct BinanceKline {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
    pub quote_volume: f64,
    pub trades: u64,
}

impl BinanceKline {
    /// Parse from raw JSON array returned by Binance API
    pub fn from_raw(raw: &[serde_json::Value]) -> Option<Self> {
        if raw.len() < 9 {
            return None;
        }
        let num = |v: &serde_json::Value| v.as_str()?.parse::<f64>().ok();

        Some(BinanceKline {
            open_time: raw[0].as_i64()?,
            open: num(&raw[1])?,
            high: num(&raw[2])?,
            low: num(&raw[3])?,
            close: num(&raw[4])?,
            volume: num(&raw[5])?,
            close_time: raw[6].as_i64()?,
            quote_volume: num(&raw[7])?,
            trades: raw[8].as_u64()?,
        })
    }

    pub fn to_bar(&self) -> Option<Bar> {
        Some(Bar {
            timestamp: DateTime::from_timestamp_millis(self.open_time)?,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            quote_volume: self.quote_volume,
        })
    }
}

/// Error body returned by the API, e.g. `{"code":-4046,"msg":"No need to change margin type."}`
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub code: i64,
    pub msg: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub filters: Vec<serde_json::Value>,
}

impl ExchangeInfo {
    pub fn find(&self, symbol: &str) -> Option<&SymbolInfo> {
        self.symbols.iter().find(|s| s.symbol == symbol)
    }
}

/// Lot size and price filters for one symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolFilters {
    pub step_size: Decimal,
    pub min_qty: Decimal,
    pub tick_size: Decimal,
}

impl SymbolFilters {
    /// Read LOT_SIZE and PRICE_FILTER from a symbol's filter list
    pub fn from_symbol_info(info: &SymbolInfo) -> Result<Self> {
        let field = |filter_type: &str, key: &str| -> Result<Decimal> {
            let filter = info
                .filters
                .iter()
                .find(|f| f.get("filterType").and_then(|t| t.as_str()) == Some(filter_type))
                .ok_or_else(|| anyhow!("No {} filter for {}", filter_type, info.symbol))?;
            let raw = filter
                .get(key)
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    anyhow!("{} filter for {} has no {}", filter_type, info.symbol, key)
                })?;
            Decimal::from_str(raw).with_context(|| format!("Bad {} '{}'", key, raw))
        };

        let filters = SymbolFilters {
            step_size: field("LOT_SIZE", "stepSize")?,
            min_qty: field("LOT_SIZE", "minQty")?,
            tick_size: field("PRICE_FILTER", "tickSize")?,
        };
        if filters.step_size <= Decimal::ZERO || filters.tick_size <= Decimal::ZERO {
            return Err(anyhow!("Non-positive step or tick size for {}", info.symbol));
        }
        Ok(filters)
    }

    /// Quantity floored to the lot step
    pub fn floor_quantity(&self, raw: f64) -> Option<Decimal> {
        let value = Decimal::try_from(raw).ok()?;
        Some(((value / self.step_size).floor() * self.step_size).normalize())
    }

    /// Price rounded to the nearest tick
    pub fn round_price(&self, raw: f64) -> Option<Decimal> {
        let value = Decimal::try_from(raw).ok()?;
        Some(((value / self.tick_size).round() * self.tick_size).normalize())
    }

    pub fn meets_min_qty(&self, qty: Decimal) -> bool {
        qty >= self.min_qty && qty > Decimal::ZERO
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalance {
    pub asset: String,
    pub available_balance: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRisk {
    pub symbol: String,
    pub position_amt: String,
    pub entry_price: String,
}

/// Open position snapshot; `amount` is signed (> 0 long, < 0 short)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionInfo {
    pub amount: f64,
    pub entry_price: f64,
}

impl PositionInfo {
    pub fn is_open(&self) -> bool {
        self.amount.abs() > 0.0
    }
}

impl TryFrom<&PositionRisk> for PositionInfo {
    type Error = anyhow::Error;

    fn try_from(p: &PositionRisk) -> Result<Self> {
        Ok(PositionInfo {
            amount: p.position_amt.parse().context("Bad positionAmt")?,
            entry_price: p.entry_price.parse().context("Bad entryPrice")?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: i64,
    pub symbol: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "type", default)]
    pub order_type: String,
}

pub fn decimal_to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

/// Valid kline intervals
pub const BINANCE_INTERVALS: &[&str] = &[
    "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w", "1M",
];

pub fn is_valid_interval(interval: &str) -> bool {
    BINANCE_INTERVALS.contains(&interval)
}
