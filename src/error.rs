//! Typed failures for the price store and the trading ledger.
//!
//! These are user-facing validation errors, surfaced verbatim and never
//! retried. Job-level and transport failures stay `anyhow` at the call site.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// Failures reading from or appending to the price history.
#[derive(Debug, Error)]
pub enum PriceError {
    #[error("no price data available for this ticker")]
    NoPriceData,

    #[error("tick timestamp {attempted} precedes last recorded tick at {last}")]
    NonMonotonicTimestamp {
        last: DateTime<Utc>,
        attempted: DateTime<Utc>,
    },

    #[error("numeric conversion failed: {0}")]
    Numeric(#[from] rust_decimal::Error),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Failures validating or committing a buy/sell mutation.
#[derive(Debug, Error)]
pub enum TradeError {
    #[error("trade quantity must be positive")]
    InvalidQuantity,

    #[error("insufficient funds: required ${required:.2}, available ${available:.2}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    #[error("no position found for this ticker")]
    NoPosition,

    #[error("insufficient shares: holding {held}, trying to sell {requested}")]
    InsufficientShares { held: i64, requested: i64 },

    #[error("account not found for user")]
    NoAccount,

    #[error("unknown ticker symbol: {0}")]
    UnknownTicker(String),

    #[error(transparent)]
    Price(#[from] PriceError),

    #[error("numeric conversion failed: {0}")]
    Numeric(#[from] rust_decimal::Error),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}
