//! Ticker and price-tick models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tradable instrument. Created once at bootstrap, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Ticker {
    pub id: i64,

    /// Unique, immutable symbol (e.g., "AAPL")
    pub symbol: String,

    /// Display name (e.g., "Apple Inc.")
    pub name: String,

    pub created_at: String,
}

/// One timestamped (price, volume) observation for a ticker.
///
/// Immutable once written; per-ticker history is append-only with
/// monotonically non-decreasing timestamps.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PriceTick {
    pub id: i64,
    pub ticker_id: i64,

    /// Price per share, always positive
    pub price: f64,

    /// Shares traded in this interval, non-negative
    pub volume: i64,

    pub timestamp: DateTime<Utc>,
}
