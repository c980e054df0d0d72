//! User, account, and auto-trade configuration models.

use serde::{Deserialize, Serialize};

/// Owner of an account and portfolio. Registration and authentication live
/// outside this crate; only the identity row is needed here.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub created_at: String,
}

/// Cash account, one per user. The balance never goes negative after a
/// committed trade and is only mutated through the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: i64,
    pub user_id: i64,
    pub cash_balance: f64,
    pub created_at: String,
    pub updated_at: String,
}

/// Per-user auto-trading settings, read by the auto-trade sweep and written
/// only through explicit user configuration.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AutoTradeConfig {
    pub id: i64,
    pub user_id: i64,
    pub enabled: bool,

    /// Minimum signal confidence (0.0 to 1.0) required before acting
    pub confidence_threshold: f64,

    /// Maximum shares per auto-trade
    pub max_trade_size: i64,

    pub created_at: String,
    pub updated_at: String,
}
