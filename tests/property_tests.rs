//! Property tests for detector and simulator invariants.
//!
//! Uses proptest to verify:
//! 1. Flat series: every index rejected, no trades
//! 2. Bracket ordering around the entry for both sides
//! 3. Cooldown gap between consecutive trades
//! 4. Timeouts stay timeouts and runs are repeatable
//! 5. A bar spanning both levels resolves as a stop
//! 6. Malformed input never panics

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use breakout_scalper::backtest::{bracket_hit, resolve, Backtester, Resolution};
use breakout_scalper::config::AccountConfig;
use breakout_scalper::strategies::{
    BoxBreakoutConfig, BoxBreakoutDetector, BracketPrices, SetupDetector,
};
use breakout_scalper::{Bar, Outcome, Setup, Side};

fn at(i: usize) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::minutes(i as i64)
}

fn backtester() -> Backtester {
    Backtester::new(AccountConfig::default(), BoxBreakoutConfig::default()).unwrap()
}

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_side() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Long), Just(Side::Short)]
}

fn arb_price() -> impl Strategy<Value = f64> {
    (1.0..100_000.0_f64).prop_map(|p| (p * 100.0).round() / 100.0)
}

/// (open, high, low, close, quote volume)
type Row = (f64, f64, f64, f64, f64);

const WIDE: Row = (99.5, 100.5, 98.5, 99.5, 1000.0);

/// One planted long breakout priced around 100: wide history, a tight box at
/// 20..=24, the breakout at 25 and a confirming bar at 26
fn breakout_block(scale: f64) -> Vec<Row> {
    let mut rows = vec![WIDE; 20];
    rows.extend([(99.5, 99.6, 99.4, 99.5, 1000.0); 3]);
    rows.extend([
        (99.5, 99.6, 99.4, 99.45, 1000.0),
        (99.45, 99.6, 99.4, 99.5, 100.0),
        (99.6, 100.1, 99.5, 100.0, 200.0),
        (100.0, 100.2, 99.9, 100.1, 1000.0),
    ]);
    rows.into_iter()
        .map(|(o, h, l, c, v)| (o * scale, h * scale, l * scale, c * scale, v))
        .collect()
}

/// Planted breakouts at random price levels, each followed by a short random
/// walk of (return, wick, volume) steps, then a wide tail that settles
/// anything still open. Yields the number of planted breakouts with the bars.
fn arb_breakouts() -> impl Strategy<Value = (usize, Vec<Bar>)> {
    let step = (-0.004..0.004_f64, 0.0..0.003_f64, 50.0..5_000.0_f64);
    let block = (0.01..1_000.0_f64, prop::collection::vec(step, 0..12));
    prop::collection::vec(block, 1..6).prop_map(|blocks| {
        let count = blocks.len();
        let mut rows: Vec<Row> = Vec::new();
        let mut scale = 1.0;
        for (price, walk) in blocks {
            scale = price / 100.0;
            rows.extend(breakout_block(scale));
            let mut close = 100.1 * scale;
            for (ret, wick, volume) in walk {
                let open = close;
                close = open * (1.0 + ret);
                let high = open.max(close) * (1.0 + wick);
                let low = open.min(close) * (1.0 - wick);
                rows.push((open, high, low, close, volume));
            }
        }
        let (o, h, l, c, v) = WIDE;
        rows.extend(vec![(o * scale, h * scale, l * scale, c * scale, v); 30]);

        let bars = rows
            .into_iter()
            .enumerate()
            .map(|(i, (o, h, l, c, v))| Bar::new(at(i), o, h, l, c, v))
            .collect();
        (count, bars)
    })
}

fn arb_any_value() -> impl Strategy<Value = f64> {
    prop_oneof![
        8 => -10.0..1_000.0_f64,
        1 => Just(0.0),
        1 => Just(f64::NAN),
        1 => Just(f64::INFINITY),
    ]
}

// ── 1. Flat series ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn flat_series_never_trades(
        price in arb_price(),
        spread in 0.0..0.01_f64,
        volume in 1.0..1e6_f64,
        len in 50usize..200,
    ) {
        let bars: Vec<Bar> = (0..len)
            .map(|i| {
                let high = price * (1.0 + spread);
                let low = price * (1.0 - spread);
                Bar::new(at(i), price, high, low, price, volume)
            })
            .collect();

        let detector = BoxBreakoutDetector::new(BoxBreakoutConfig::default());
        let series = detector.prepare(&bars);
        for i in 0..len {
            prop_assert!(detector.evaluate(&series, i, None).is_err());
        }

        let result = backtester().run(&bars).unwrap();
        prop_assert!(result.trades.is_empty());
        prop_assert_eq!(result.final_balance, 100.0);
    }
}

// ── 2. Bracket ordering ──────────────────────────────────────────────

proptest! {
    #[test]
    fn brackets_straddle_entry(side in arb_side(), entry in arb_price()) {
        let b = BracketPrices::for_entry(side, entry, &BoxBreakoutConfig::default());
        match side {
            Side::Long => prop_assert!(b.stop_loss < entry && entry < b.take_profit),
            Side::Short => prop_assert!(b.take_profit < entry && entry < b.stop_loss),
        }
        prop_assert!(b.contains(entry));
    }
}

// ── 3. Cooldown ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn trades_respect_cooldown((planted, bars) in arb_breakouts()) {
        let result = backtester().run(&bars).unwrap();
        prop_assert!(result.trades.len() >= planted);
        for t in &result.trades {
            prop_assert!(t.exit_index > t.entry_index);
            prop_assert!(t.exit_index - t.entry_index < 30);
        }
        for pair in result.trades.windows(2) {
            prop_assert!(pair[1].entry_index as i64 - pair[0].exit_index as i64 > 3);
        }
    }
}

// ── 4. Timeouts and repeatability ────────────────────────────────────

proptest! {
    #[test]
    fn timeout_inside_bracket(side in arb_side(), entry in arb_price(), extra in 0usize..10) {
        let config = BoxBreakoutConfig::default();
        let b = BracketPrices::for_entry(side, entry, &config);
        // every bar stays strictly between the levels
        let hi = entry + (b.take_profit.max(b.stop_loss) - entry) * 0.5;
        let lo = entry - (entry - b.take_profit.min(b.stop_loss)) * 0.5;
        let bars: Vec<Bar> = (0..config.horizon + extra)
            .map(|i| Bar::new(at(i), entry, hi, lo, entry, 1000.0))
            .collect();
        let setup = Setup {
            index: 0,
            timestamp: at(0),
            side,
            entry_price: entry,
            take_profit_price: b.take_profit,
            stop_loss_price: b.stop_loss,
        };

        let first = resolve(&bars, &setup, config.horizon);
        prop_assert_eq!(first, Resolution::Timeout);
        prop_assert_eq!(resolve(&bars, &setup, config.horizon), first);
    }

    #[test]
    fn runs_are_repeatable((_, bars) in arb_breakouts()) {
        let bt = backtester();
        let first = bt.run(&bars).unwrap();
        prop_assert!(!first.trades.is_empty());
        let second = bt.run(&bars).unwrap();
        prop_assert_eq!(&first.trades, &second.trades);
        prop_assert_eq!(first.final_balance, second.final_balance);
        prop_assert_eq!(&first.stats, &second.stats);

        // balance only moves through settled trades
        let settled: f64 = first.trades.iter().map(|t| t.pnl_cash).sum();
        prop_assert!((100.0 + settled - first.final_balance).abs() < 1e-6);
    }
}

// ── 5. Same-bar conflict ─────────────────────────────────────────────

proptest! {
    #[test]
    fn spanning_bar_is_a_stop(side in arb_side(), entry in arb_price(), reach in 1.0..1.5_f64) {
        let b = BracketPrices::for_entry(side, entry, &BoxBreakoutConfig::default());
        let top = b.take_profit.max(b.stop_loss);
        let bottom = b.take_profit.min(b.stop_loss);
        let high = top + (top - entry) * reach;
        let low = bottom - (entry - bottom) * reach;
        let bar = Bar::new(at(0), entry, high, low, entry, 1.0);

        prop_assert_eq!(
            bracket_hit(side, &bar, b.take_profit, b.stop_loss),
            Some((Outcome::StopLoss, b.stop_loss))
        );
    }
}

// ── 6. Malformed input ───────────────────────────────────────────────

proptest! {
    #[test]
    fn malformed_bars_never_panic(
        values in prop::collection::vec(
            (arb_any_value(), arb_any_value(), arb_any_value(), arb_any_value(), arb_any_value()),
            0..120,
        )
    ) {
        let bars: Vec<Bar> = values
            .into_iter()
            .enumerate()
            .map(|(i, (o, h, l, c, v))| Bar::new(at(i), o, h, l, c, v))
            .collect();

        let detector = BoxBreakoutDetector::new(BoxBreakoutConfig::default());
        let series = detector.prepare(&bars);
        for i in 0..bars.len() + 5 {
            let _ = detector.evaluate(&series, i, Some(i.saturating_sub(2)));
        }
        let _ = backtester().run(&bars);
    }
}
