//! Append-only, time-ordered price history per ticker.
//!
//! The most recent tick is the authoritative current price. Appends for
//! different tickers are independent; reads are side-effect-free.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::db::Database;
use crate::error::PriceError;
use crate::models::PriceTick;

/// Read/append interface over the persisted price history.
#[derive(Clone)]
pub struct PriceStore {
    db: Database,
}

impl PriceStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append one tick, rejecting timestamps that precede the ticker's last
    /// recorded tick.
    pub async fn append_tick(
        &self,
        ticker_id: i64,
        price: f64,
        volume: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), PriceError> {
        if let Some(last) = self.db.last_tick(ticker_id).await? {
            if timestamp < last.timestamp {
                return Err(PriceError::NonMonotonicTimestamp {
                    last: last.timestamp,
                    attempted: timestamp,
                });
            }
        }

        self.db
            .insert_tick(ticker_id, price, volume, timestamp)
            .await?;
        Ok(())
    }

    /// The ticker's current price, taken from its most recent tick.
    pub async fn latest_price(&self, ticker_id: i64) -> Result<Decimal, PriceError> {
        let tick = self
            .db
            .last_tick(ticker_id)
            .await?
            .ok_or(PriceError::NoPriceData)?;
        Ok(Decimal::try_from(tick.price)?)
    }

    /// Raw latest price for simulation arithmetic, if any history exists.
    pub async fn last_tick(&self, ticker_id: i64) -> Result<Option<PriceTick>, PriceError> {
        Ok(self.db.last_tick(ticker_id).await?)
    }

    /// Up to the last `n` ticks in chronological order (oldest first),
    /// fewer if the history is shorter.
    pub async fn recent_window(
        &self,
        ticker_id: i64,
        n: i64,
    ) -> Result<Vec<PriceTick>, PriceError> {
        let mut ticks = self.db.recent_ticks(ticker_id, n).await?;
        ticks.reverse();
        Ok(ticks)
    }

    /// Closing prices of the recent window, oldest first. This is the input
    /// shape the indicator engine expects.
    pub async fn closing_prices(&self, ticker_id: i64, n: i64) -> Result<Vec<f64>, PriceError> {
        let window = self.recent_window(ticker_id, n).await?;
        Ok(window.into_iter().map(|t| t.price).collect())
    }
}
