//! Trade models: the buy/sell direction and the immutable trade record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a committed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "BUY",
            TradeAction::Sell => "SELL",
        }
    }
}

impl TryFrom<String> for TradeAction {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_uppercase().as_str() {
            "BUY" => Ok(TradeAction::Buy),
            "SELL" => Ok(TradeAction::Sell),
            other => Err(format!("unknown trade action: {other}")),
        }
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of a committed buy or sell. Never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Trade {
    pub id: i64,
    pub user_id: i64,
    pub ticker_id: i64,

    #[sqlx(try_from = "String")]
    pub action: TradeAction,

    /// Shares traded, strictly positive
    pub quantity: i64,

    /// Execution price per share
    pub price: f64,

    /// price * quantity
    pub total_amount: f64,

    /// Account cash balance immediately after this trade committed
    pub cash_after: f64,

    pub timestamp: DateTime<Utc>,
}
