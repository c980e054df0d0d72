//! Market data: append-only price history and the simulated price feed.

mod simulator;
mod store;

pub use simulator::{PriceSimulator, SimulatorConfig, TickerSeed, TICKER_SEEDS};
pub use store::PriceStore;
