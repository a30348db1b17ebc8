//! Data loading and management
//!
//! Loads minute bars from CSV files. Three layouts are accepted:
//! - the crate's own `datetime,open,high,low,close,quote_volume`
//! - merged Binance exports with a header (`timestamp`/`datetime`, ...,
//!   `quote_asset_volume`, ...)
//! - raw headerless Binance kline files (12 columns, open time in ms)

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::types::BarValidationError;
use crate::Bar;

// =============================================================================
// Timestamp parsing
// =============================================================================

/// Parse a timestamp given as epoch millis (or micros), RFC 3339, or
/// `YYYY-MM-DD HH:MM:SS[.f]` in UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if let Ok(n) = s.parse::<i64>() {
        // Newer Binance dumps use microseconds
        return if n > 100_000_000_000_000 {
            DateTime::from_timestamp_micros(n)
        } else {
            DateTime::from_timestamp_millis(n)
        };
    }
    if let Ok(dt) = s.parse::<DateTime<Utc>>() {
        return Some(dt);
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|ndt| ndt.and_utc())
}

/// Parse a `YYYY-MM-DD` date
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", s))
}

// =============================================================================
// CSV Data Loading
// =============================================================================

/// Column positions for one file
#[derive(Debug, Clone, Copy, PartialEq)]
struct Columns {
    time: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    quote_volume: usize,
}

impl Columns {
    /// Raw Binance kline layout
    const RAW_KLINE: Columns = Columns {
        time: 0,
        open: 1,
        high: 2,
        low: 3,
        close: 4,
        quote_volume: 7,
    };

    fn from_header(header: &csv::StringRecord) -> Result<Self> {
        let find = |names: &[&str]| {
            header
                .iter()
                .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
        };

        let time = find(&["datetime", "timestamp", "open_time"])
            .context("Missing datetime/timestamp column")?;
        let quote_volume = find(&["quote_volume", "quote_asset_volume"])
            .context("Missing quote_volume/quote_asset_volume column")?;

        Ok(Columns {
            time,
            open: find(&["open"]).context("Missing open column")?,
            high: find(&["high"]).context("Missing high column")?,
            low: find(&["low"]).context("Missing low column")?,
            close: find(&["close"]).context("Missing close column")?,
            quote_volume,
        })
    }

    fn parse(&self, record: &csv::StringRecord) -> Option<Bar> {
        let num = |idx: usize| record.get(idx)?.trim().parse::<f64>().ok();
        Some(Bar {
            timestamp: parse_timestamp(record.get(self.time)?)?,
            open: num(self.open)?,
            high: num(self.high)?,
            low: num(self.low)?,
            close: num(self.close)?,
            quote_volume: num(self.quote_volume)?,
        })
    }
}

/// Load bars from one CSV file, in file order
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut records = reader.records();
    let first = match records.next() {
        Some(record) => record.with_context(|| format!("Failed to read {}", path.display()))?,
        None => return Ok(Vec::new()),
    };

    let mut bars = Vec::new();
    let columns = if first.get(0).is_some_and(|f| f.trim().parse::<i64>().is_ok()) {
        let columns = Columns::RAW_KLINE;
        if let Some(bar) = columns.parse(&first) {
            bars.push(bar);
        } else {
            warn!("{}: skipping unparseable row 1", path.display());
        }
        columns
    } else {
        Columns::from_header(&first).with_context(|| format!("Bad header in {}", path.display()))?
    };

    let mut skipped = 0usize;
    for (row_idx, result) in records.enumerate() {
        let parsed = result.ok().and_then(|record| columns.parse(&record));
        match parsed {
            Some(bar) => bars.push(bar),
            None => {
                skipped += 1;
                if skipped <= 5 {
                    warn!("{}: skipping unparseable row {}", path.display(), row_idx + 2);
                }
            }
        }
    }
    if skipped > 5 {
        warn!("{}: skipped {} unparseable rows in total", path.display(), skipped);
    }

    Ok(bars)
}

/// Load bars from a CSV file or from every `.csv` file in a directory.
///
/// The result is sorted by timestamp with duplicate timestamps removed.
pub fn load_bars(path: impl AsRef<Path>) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    let files: Vec<PathBuf> = if path.is_dir() {
        let mut files: Vec<PathBuf> = fs::read_dir(path)
            .with_context(|| format!("Failed to read directory {}", path.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv")))
            .collect();
        files.sort();
        files
    } else {
        vec![path.to_path_buf()]
    };

    if files.is_empty() {
        bail!("No CSV files found in {}", path.display());
    }

    let mut bars = Vec::new();
    for file in &files {
        let loaded = load_csv(file)?;
        info!("Loaded {} bars from {}", loaded.len(), file.display());
        bars.extend(loaded);
    }

    let removed = sort_and_dedup(&mut bars);
    if removed > 0 {
        info!("Removed {} duplicate bars", removed);
    }

    Ok(bars)
}

/// Sort by timestamp and drop repeated timestamps, keeping the first.
/// Returns how many bars were dropped.
pub fn sort_and_dedup(bars: &mut Vec<Bar>) -> usize {
    let before = bars.len();
    bars.sort_by_key(|b| b.timestamp);
    bars.dedup_by_key(|b| b.timestamp);
    before - bars.len()
}

/// Keep bars whose UTC date lies in `[start, end]`
pub fn filter_by_date(bars: &[Bar], start: Option<NaiveDate>, end: Option<NaiveDate>) -> Vec<Bar> {
    bars.iter()
        .filter(|b| {
            let day = b.timestamp.date_naive();
            start.map_or(true, |s| day >= s) && end.map_or(true, |e| day <= e)
        })
        .cloned()
        .collect()
}

#[derive(Debug, Serialize)]
struct BarRow {
    datetime: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    quote_volume: f64,
}

/// Save bars to CSV in the crate's own layout
pub fn save_csv(bars: &[Bar], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create output file {}", path.display()))?;
    for bar in bars {
        writer.serialize(BarRow {
            datetime: bar.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            quote_volume: bar.quote_volume,
        })?;
    }
    writer.flush()?;

    info!("Saved {} rows to {}", bars.len(), path.display());
    Ok(())
}

// =============================================================================
// Data Validation
// =============================================================================

/// Result of data validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<(usize, BarValidationError)>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Report malformed bars and ordering problems; never mutates
pub fn validate_bars(bars: &[Bar]) -> ValidationResult {
    let mut result = ValidationResult::default();

    for (i, bar) in bars.iter().enumerate() {
        if let Err(e) = bar.validate() {
            result.errors.push((i, e));
        }
        if i > 0 {
            let gap = bar.timestamp - bars[i - 1].timestamp;
            if gap <= chrono::Duration::zero() {
                result.warnings.push(format!("Bar {}: not chronological", i));
            } else if gap > chrono::Duration::minutes(1) {
                result
                    .warnings
                    .push(format!("Bar {}: gap of {} minutes", i, gap.num_minutes()));
            }
        }
    }

    result
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 0, 1, 0).unwrap();
        assert_eq!(parse_timestamp("1709251260000"), Some(expected));
        assert_eq!(parse_timestamp("1709251260000000"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01 00:01:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T00:01:00Z"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_load_raw_kline_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "BTCUSDT-1m-2024-03.csv",
            "1709251260000,100.0,101.0,99.0,100.5,12.0,1709251319999,1206.0,50,6.0,603.0,0\n\
             1709251200000,99.0,100.5,98.5,100.0,10.0,1709251259999,1000.0,40,5.0,500.0,0\n",
        );
        let bars = load_bars(&path).unwrap();
        assert_eq!(bars.len(), 2);
        assert!(bars[0].timestamp < bars[1].timestamp);
        assert_eq!(bars[0].quote_volume, 1000.0);
        assert_eq!(bars[1].close, 100.5);
    }

    #[test]
    fn test_load_merged_export_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "merged.csv",
            "timestamp,open,high,low,close,volume,close_time,quote_asset_volume,number_of_trades,taker_buy_base_vol,taker_buy_quote_vol,ignore,datetime\n\
             1709251200000,99.0,100.5,98.5,100.0,10.0,1709251259999,1000.0,40,5.0,500.0,0,2024-03-01 00:00:00\n\
             1709251260000,100.0,101.0,99.0,oops,12.0,1709251319999,1206.0,50,6.0,603.0,0,2024-03-01 00:01:00\n",
        );
        let bars = load_bars(&path).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].quote_volume, 1000.0);
    }

    #[test]
    fn test_load_directory_merges_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "a.csv",
            "1709251200000,99,100.5,98.5,100,10,0,1000,0,0,0,0\n\
             1709251260000,100,101,99,100.5,12,0,1206,0,0,0,0\n",
        );
        write_file(
            dir.path(),
            "b.csv",
            "1709251260000,100,101,99,100.5,12,0,1206,0,0,0,0\n\
             1709251320000,100.5,101,100,100.8,9,0,900,0,0,0,0\n",
        );
        write_file(dir.path(), "notes.txt", "ignored");

        let bars = load_bars(dir.path()).unwrap();
        assert_eq!(bars.len(), 3);
        assert!(bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let bars = vec![Bar::new(t, 1.0, 2.0, 0.5, 1.5, 100.0)];
        let path = dir.path().join("out/bars.csv");
        save_csv(&bars, &path).unwrap();
        assert_eq!(load_bars(&path).unwrap(), bars);
    }

    #[test]
    fn test_filter_by_date_inclusive() {
        let bars: Vec<Bar> = (1..=5)
            .map(|d| {
                let t = Utc.with_ymd_and_hms(2024, 3, d, 12, 0, 0).unwrap();
                Bar::new(t, 1.0, 1.0, 1.0, 1.0, 1.0)
            })
            .collect();
        let start = parse_date("2024-03-02").unwrap();
        let end = parse_date("2024-03-04").unwrap();
        assert_eq!(filter_by_date(&bars, Some(start), Some(end)).len(), 3);
        assert_eq!(filter_by_date(&bars, None, Some(end)).len(), 4);
    }

    #[test]
    fn test_validate_bars_reports() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let bars = vec![
            Bar::new(t, 1.0, 2.0, 0.5, 1.5, 100.0),
            Bar::new(t + chrono::Duration::minutes(3), 1.0, 0.5, 2.0, 1.5, 100.0),
        ];
        let result = validate_bars(&bars);
        assert!(!result.is_valid());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].0, 1);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_parse_date_error() {
        assert!(parse_date("03/01/2024").is_err());
    }
}
