//! Trading logic: the ledger applying buy/sell mutations and the periodic
//! auto-trade sweep.

mod auto_trader;
mod ledger;

pub use auto_trader::AutoTrader;
pub use ledger::Ledger;
