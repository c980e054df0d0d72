//! Simulated price feed: idempotent historical backfill plus the periodic
//! random-walk tick with occasional momentum.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::market::PriceStore;
use crate::models::Ticker;

/// Bootstrap data for one ticker.
pub struct TickerSeed {
    pub symbol: &'static str,
    pub name: &'static str,
    pub initial_price: f64,
}

/// The fixed ticker universe created at bootstrap.
pub const TICKER_SEEDS: &[TickerSeed] = &[
    TickerSeed { symbol: "AAPL", name: "Apple Inc.", initial_price: 150.0 },
    TickerSeed { symbol: "GOOGL", name: "Alphabet Inc.", initial_price: 140.0 },
    TickerSeed { symbol: "MSFT", name: "Microsoft Corporation", initial_price: 380.0 },
    TickerSeed { symbol: "TSLA", name: "Tesla Inc.", initial_price: 250.0 },
    TickerSeed { symbol: "AMZN", name: "Amazon.com Inc.", initial_price: 180.0 },
    TickerSeed { symbol: "NVDA", name: "NVIDIA Corporation", initial_price: 500.0 },
    TickerSeed { symbol: "META", name: "Meta Platforms Inc.", initial_price: 350.0 },
    TickerSeed { symbol: "NFLX", name: "Netflix Inc.", initial_price: 450.0 },
    TickerSeed { symbol: "AMD", name: "Advanced Micro Devices Inc.", initial_price: 120.0 },
    TickerSeed { symbol: "INTC", name: "Intel Corporation", initial_price: 45.0 },
];

/// Tunables for the geometric random walk.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Base per-step volatility rate
    pub base_volatility: f64,

    /// Uniform perturbation applied to the base rate each step
    pub volatility_range: f64,

    /// Probability of nudging the price further in the direction of the
    /// immediately preceding move
    pub momentum_probability: f64,

    /// Size of the momentum nudge as a fraction of the last price
    pub momentum_nudge: f64,

    /// Prices never fall below this
    pub price_floor: f64,

    pub min_volume: i64,
    pub max_volume: i64,

    /// Span of the historical backfill
    pub historical_days: i64,

    /// Sampling interval of the historical backfill
    pub historical_interval_minutes: i64,

    /// Rows per insert batch during backfill
    pub batch_size: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            base_volatility: 0.02,
            volatility_range: 0.005,
            momentum_probability: 0.3,
            momentum_nudge: 0.001,
            price_floor: 1.0,
            min_volume: 100_000,
            max_volume: 10_000_000,
            historical_days: 180,
            historical_interval_minutes: 5,
            batch_size: 1_000,
        }
    }
}

/// Generates simulated price ticks for every ticker.
pub struct PriceSimulator {
    db: Database,
    store: PriceStore,
    config: SimulatorConfig,
}

impl PriceSimulator {
    pub fn new(db: Database, config: SimulatorConfig) -> Self {
        let store = PriceStore::new(db.clone());
        Self { db, store, config }
    }

    /// Create any tickers from the fixed universe that do not exist yet.
    pub async fn initialize_tickers(&self) -> Result<()> {
        for seed in TICKER_SEEDS {
            self.db.insert_ticker(seed.symbol, seed.name).await?;
        }
        info!(tickers = TICKER_SEEDS.len(), "Tickers initialized");
        Ok(())
    }

    /// Backfill the configured historical span for every ticker that has no
    /// history yet. Tickers with any existing ticks are skipped, so running
    /// this twice performs no additional writes.
    pub async fn backfill_history(&self) -> Result<()> {
        let end = Utc::now();
        let start = end - Duration::days(self.config.historical_days);

        for ticker in self.db.all_tickers().await? {
            let existing = self.db.tick_count(ticker.id).await?;
            if existing > 0 {
                debug!(
                    symbol = %ticker.symbol,
                    ticks = existing,
                    "History already present, skipping backfill"
                );
                continue;
            }

            let ticks = self.generate_walk(seed_price(&ticker.symbol), start, end);
            for chunk in ticks.chunks(self.config.batch_size) {
                self.db.insert_ticks_batch(ticker.id, chunk).await?;
            }
            info!(
                symbol = %ticker.symbol,
                ticks = ticks.len(),
                "Backfilled price history"
            );
        }

        Ok(())
    }

    /// One scheduled run: append a fresh tick for every ticker. A failure on
    /// one ticker is logged and does not stop the rest.
    pub async fn simulate_tick(&self) -> Result<()> {
        let tickers = self.db.all_tickers().await?;

        for ticker in &tickers {
            if let Err(e) = self.tick_one(ticker).await {
                warn!(symbol = %ticker.symbol, error = %e, "Price tick failed for ticker");
            }
        }

        debug!(tickers = tickers.len(), "Generated price ticks");
        Ok(())
    }

    async fn tick_one(&self, ticker: &Ticker) -> Result<()> {
        let last_price = match self.store.last_tick(ticker.id).await? {
            Some(tick) => tick.price,
            None => seed_price(&ticker.symbol),
        };

        let (price, volume) = {
            let mut rng = rand::thread_rng();
            let price = self.step(&mut rng, last_price, true);
            let volume = rng.gen_range(self.config.min_volume..=self.config.max_volume);
            (price, volume)
        };

        self.store
            .append_tick(ticker.id, price, volume, Utc::now())
            .await?;
        Ok(())
    }

    /// One random-walk step: the price moves by `price * volatility * U(-1,1)`
    /// where volatility is the base rate plus a small random perturbation,
    /// floored so the price never goes non-positive.
    fn step<R: Rng>(&self, rng: &mut R, last_price: f64, with_momentum: bool) -> f64 {
        let volatility = self.config.base_volatility
            + rng.gen_range(-self.config.volatility_range..=self.config.volatility_range);
        let change = last_price * volatility * rng.gen_range(-1.0..=1.0);
        let mut price = (last_price + change).max(self.config.price_floor);

        // Short trends instead of pure noise: occasionally continue the move.
        if with_momentum && rng.gen_bool(self.config.momentum_probability) {
            let trend = if change > 0.0 { 1.0 } else { -1.0 };
            price += last_price * self.config.momentum_nudge * trend;
        }

        round_cents(price.max(self.config.price_floor))
    }

    fn generate_walk(
        &self,
        initial_price: f64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<(f64, i64, DateTime<Utc>)> {
        let mut rng = rand::thread_rng();
        let mut ticks = Vec::new();
        let mut price = initial_price;
        let mut at = start;
        let step = Duration::minutes(self.config.historical_interval_minutes);

        while at <= end {
            price = self.step(&mut rng, price, false);
            let volume = rng.gen_range(self.config.min_volume..=self.config.max_volume);
            ticks.push((price, volume, at));
            at += step;
        }

        ticks
    }
}

/// Bootstrap price for a symbol, falling back to a round number for tickers
/// created outside the fixed universe.
fn seed_price(symbol: &str) -> f64 {
    TICKER_SEEDS
        .iter()
        .find(|s| s.symbol == symbol)
        .map(|s| s.initial_price)
        .unwrap_or(100.0)
}

fn round_cents(price: f64) -> f64 {
    (price * 100.0).round() / 100.0
}
