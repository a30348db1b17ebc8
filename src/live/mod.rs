//! Live and paper trading

mod binance_exchange;
mod exchange;
mod paper;
mod trader;

pub use binance_exchange::BinanceExchange;
pub use exchange::{BracketOrder, Exchange};
pub use paper::{PaperExchange, PaperFill, PaperPosition};
pub use trader::{CycleOutcome, LiveTrader, SkipReason};
