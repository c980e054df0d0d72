//! Data models for tickers, price ticks, accounts, positions, and trades.

mod account;
mod market;
mod position;
mod signal;
mod trade;

pub use account::{Account, AutoTradeConfig, User};
pub use market::{PriceTick, Ticker};
pub use position::Position;
pub use signal::{SignalAction, TradingSignal};
pub use trade::{Trade, TradeAction};
