//! Position model representing a user's current holding of a ticker.

use serde::{Deserialize, Serialize};

/// One (user, ticker) portfolio row.
///
/// Created on the first buy, blended on subsequent buys, and deleted (not
/// zeroed) when a sell brings the quantity to exactly zero.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Position {
    pub id: i64,
    pub user_id: i64,
    pub ticker_id: i64,

    /// Shares held, strictly positive while the row exists
    pub quantity: i64,

    /// Quantity-weighted average cost basis per share
    pub avg_price: f64,

    /// Last observed market price (cache, may lag the price store)
    pub current_price: f64,

    pub created_at: String,
    pub updated_at: String,
}

impl Position {
    /// Market value at the cached current price.
    pub fn market_value(&self) -> f64 {
        self.quantity as f64 * self.current_price
    }

    /// Unrealized P&L against the average cost basis.
    pub fn unrealized_pnl(&self) -> f64 {
        self.quantity as f64 * (self.current_price - self.avg_price)
    }
}
