pub mod backtest;
pub mod download;
pub mod live;
pub mod optimize;
