//! SQLite persistence for the market simulator.
//!
//! Holds everything the engine needs across restarts:
//! - Users, accounts, and per-user auto-trade configuration
//! - Tickers and their append-only price history
//! - Positions and the immutable trade log
//!
//! Ledger mutations (cash debit/credit + position upsert + trade insert) run
//! in explicit transactions started from [`Database::pool`].

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{Account, AutoTradeConfig, Position, PriceTick, Ticker, Trade, User};

/// Cash balance every new account starts with.
pub const DEFAULT_STARTING_CASH: f64 = 10_000.0;

/// Database connection pool with schema management.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect and ensure the schema exists.
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_max_connections(database_url, 5).await
    }

    async fn with_max_connections(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL UNIQUE,
                cash_balance REAL NOT NULL DEFAULT 10000.0,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (user_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tickers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS price_ticks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticker_id INTEGER NOT NULL,
                price REAL NOT NULL,
                volume INTEGER NOT NULL DEFAULT 0,
                timestamp TEXT NOT NULL,
                FOREIGN KEY (ticker_id) REFERENCES tickers(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                ticker_id INTEGER NOT NULL,
                quantity INTEGER NOT NULL,
                avg_price REAL NOT NULL,
                current_price REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(user_id, ticker_id),
                FOREIGN KEY (user_id) REFERENCES users(id),
                FOREIGN KEY (ticker_id) REFERENCES tickers(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                ticker_id INTEGER NOT NULL,
                action TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                price REAL NOT NULL,
                total_amount REAL NOT NULL,
                cash_after REAL NOT NULL,
                timestamp TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id),
                FOREIGN KEY (ticker_id) REFERENCES tickers(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS auto_trade_configs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL UNIQUE,
                enabled INTEGER NOT NULL DEFAULT 0,
                confidence_threshold REAL NOT NULL DEFAULT 0.7,
                max_trade_size INTEGER NOT NULL DEFAULT 5,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (user_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Indexes
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_price_ticks_ticker_time ON price_ticks(ticker_id, timestamp)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_user ON trades(user_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_positions_user ON positions(user_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Users & Accounts ====================

    /// Create a user together with their cash account.
    pub async fn create_user(&self, username: &str, starting_cash: f64) -> Result<User> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO users (username) VALUES (?)")
            .bind(username)
            .execute(&mut *tx)
            .await
            .context("Failed to create user")?;

        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO accounts (user_id, cash_balance) VALUES (?, ?)")
            .bind(user.id)
            .bind(starting_cash)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(user)
    }

    /// Look up a user by username.
    pub async fn get_user_by_name(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    /// Get a user's cash account.
    pub async fn get_account(&self, user_id: i64) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    // ==================== Tickers ====================

    /// Insert a ticker if it does not already exist.
    pub async fn insert_ticker(&self, symbol: &str, name: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO tickers (symbol, name) VALUES (?, ?)")
            .bind(symbol)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All tickers, ordered by symbol.
    pub async fn all_tickers(&self) -> Result<Vec<Ticker>> {
        let tickers = sqlx::query_as::<_, Ticker>("SELECT * FROM tickers ORDER BY symbol")
            .fetch_all(&self.pool)
            .await?;
        Ok(tickers)
    }

    /// Look up a ticker by symbol.
    pub async fn get_ticker_by_symbol(
        &self,
        symbol: &str,
    ) -> Result<Option<Ticker>, sqlx::Error> {
        sqlx::query_as::<_, Ticker>("SELECT * FROM tickers WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await
    }

    // ==================== Price Ticks ====================

    /// Number of recorded ticks for a ticker.
    pub async fn tick_count(&self, ticker_id: i64) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM price_ticks WHERE ticker_id = ?")
                .bind(ticker_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Most recent tick for a ticker, if any.
    pub async fn last_tick(&self, ticker_id: i64) -> Result<Option<PriceTick>, sqlx::Error> {
        sqlx::query_as::<_, PriceTick>(
            "SELECT * FROM price_ticks WHERE ticker_id = ? ORDER BY timestamp DESC, id DESC LIMIT 1",
        )
        .bind(ticker_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Append a single tick. Monotonicity is enforced by the price store.
    pub async fn insert_tick(
        &self,
        ticker_id: i64,
        price: f64,
        volume: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO price_ticks (ticker_id, price, volume, timestamp) VALUES (?, ?, ?, ?)",
        )
        .bind(ticker_id)
        .bind(price)
        .bind(volume)
        .bind(timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Bulk-append ticks in one transaction (historical backfill).
    pub async fn insert_ticks_batch(
        &self,
        ticker_id: i64,
        ticks: &[(f64, i64, DateTime<Utc>)],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for (price, volume, timestamp) in ticks {
            sqlx::query(
                "INSERT INTO price_ticks (ticker_id, price, volume, timestamp) VALUES (?, ?, ?, ?)",
            )
            .bind(ticker_id)
            .bind(price)
            .bind(volume)
            .bind(timestamp)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// The most recent `limit` ticks, newest first.
    pub async fn recent_ticks(
        &self,
        ticker_id: i64,
        limit: i64,
    ) -> Result<Vec<PriceTick>, sqlx::Error> {
        sqlx::query_as::<_, PriceTick>(
            "SELECT * FROM price_ticks WHERE ticker_id = ? ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(ticker_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    // ==================== Positions ====================

    /// A user's position in one ticker, if held.
    pub async fn get_position(
        &self,
        user_id: i64,
        ticker_id: i64,
    ) -> Result<Option<Position>, sqlx::Error> {
        sqlx::query_as::<_, Position>(
            "SELECT * FROM positions WHERE user_id = ? AND ticker_id = ?",
        )
        .bind(user_id)
        .bind(ticker_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// All positions a user currently holds.
    pub async fn positions_for_user(&self, user_id: i64) -> Result<Vec<Position>, sqlx::Error> {
        sqlx::query_as::<_, Position>(
            "SELECT * FROM positions WHERE user_id = ? ORDER BY ticker_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Refresh the cached market price on a position row.
    pub async fn update_position_price(
        &self,
        position_id: i64,
        current_price: f64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE positions SET current_price = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(current_price)
        .bind(position_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ==================== Trades ====================

    /// A user's trade history, newest first.
    pub async fn trades_for_user(&self, user_id: i64, limit: i64) -> Result<Vec<Trade>> {
        let trades = sqlx::query_as::<_, Trade>(
            "SELECT * FROM trades WHERE user_id = ? ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(trades)
    }

    // ==================== Auto-Trade Config ====================

    /// A user's auto-trade settings, if configured.
    pub async fn get_auto_trade_config(&self, user_id: i64) -> Result<Option<AutoTradeConfig>> {
        let config = sqlx::query_as::<_, AutoTradeConfig>(
            "SELECT * FROM auto_trade_configs WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(config)
    }

    /// Create or update a user's auto-trade settings.
    pub async fn upsert_auto_trade_config(
        &self,
        user_id: i64,
        enabled: bool,
        confidence_threshold: f64,
        max_trade_size: i64,
    ) -> Result<AutoTradeConfig> {
        sqlx::query(
            r#"
            INSERT INTO auto_trade_configs (user_id, enabled, confidence_threshold, max_trade_size)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                enabled = excluded.enabled,
                confidence_threshold = excluded.confidence_threshold,
                max_trade_size = excluded.max_trade_size,
                updated_at = datetime('now')
            "#,
        )
        .bind(user_id)
        .bind(enabled)
        .bind(confidence_threshold)
        .bind(max_trade_size)
        .execute(&self.pool)
        .await?;

        let config = self
            .get_auto_trade_config(user_id)
            .await?
            .context("Auto-trade config missing after upsert")?;
        Ok(config)
    }

    /// All configs with auto-trading switched on.
    pub async fn enabled_auto_trade_configs(&self) -> Result<Vec<AutoTradeConfig>> {
        let configs = sqlx::query_as::<_, AutoTradeConfig>(
            "SELECT * FROM auto_trade_configs WHERE enabled = 1",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(configs)
    }

    /// Get the connection pool (for transactional ledger operations).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// A single connection so every query sees the same in-memory database.
#[cfg(test)]
pub(crate) async fn test_db() -> Database {
    Database::with_max_connections("sqlite::memory:", 1)
        .await
        .expect("in-memory database")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_user_creates_account() {
        let db = test_db().await;
        let user = db.create_user("alice", DEFAULT_STARTING_CASH).await.unwrap();

        let account = db.get_account(user.id).await.unwrap().unwrap();
        assert_eq!(account.user_id, user.id);
        assert_eq!(account.cash_balance, 10_000.0);
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let db = test_db().await;
        db.create_user("alice", DEFAULT_STARTING_CASH).await.unwrap();
        assert!(db.create_user("alice", DEFAULT_STARTING_CASH).await.is_err());
    }

    #[tokio::test]
    async fn test_insert_ticker_is_idempotent() {
        let db = test_db().await;
        db.insert_ticker("AAPL", "Apple Inc.").await.unwrap();
        db.insert_ticker("AAPL", "Apple Inc.").await.unwrap();

        let tickers = db.all_tickers().await.unwrap();
        assert_eq!(tickers.len(), 1);
        assert_eq!(tickers[0].symbol, "AAPL");
    }

    #[tokio::test]
    async fn test_auto_trade_config_upsert() {
        let db = test_db().await;
        let user = db.create_user("bob", DEFAULT_STARTING_CASH).await.unwrap();

        let config = db
            .upsert_auto_trade_config(user.id, true, 0.8, 10)
            .await
            .unwrap();
        assert!(config.enabled);
        assert_eq!(config.max_trade_size, 10);

        let config = db
            .upsert_auto_trade_config(user.id, false, 0.8, 10)
            .await
            .unwrap();
        assert!(!config.enabled);

        assert!(db.enabled_auto_trade_configs().await.unwrap().is_empty());
    }
}
