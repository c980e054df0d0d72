//! The ledger: per-user cash and position state, mutated only here.
//!
//! Every buy/sell is one atomic unit — cash mutation, position upsert, and
//! trade record commit together or not at all. Operations for the same user
//! are serialized through a per-user async mutex so a manual trade and the
//! auto-trade sweep can never interleave a read-then-write on the same
//! account; different users proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::debug;

use crate::db::Database;
use crate::error::{PriceError, TradeError};
use crate::market::PriceStore;
use crate::models::{Account, Position, Trade, TradeAction};

/// Applies buy/sell mutations against accounts and positions.
pub struct Ledger {
    db: Database,
    store: PriceStore,
    user_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl Ledger {
    pub fn new(db: Database) -> Self {
        let store = PriceStore::new(db.clone());
        Self {
            db,
            store,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The single entry point the external API layer needs: execute a trade
    /// by ticker symbol.
    pub async fn submit_trade(
        &self,
        user_id: i64,
        symbol: &str,
        action: TradeAction,
        quantity: i64,
    ) -> Result<Trade, TradeError> {
        let ticker = self
            .db
            .get_ticker_by_symbol(symbol)
            .await?
            .ok_or_else(|| TradeError::UnknownTicker(symbol.to_string()))?;

        match action {
            TradeAction::Buy => self.buy(user_id, ticker.id, quantity).await,
            TradeAction::Sell => self.sell(user_id, ticker.id, quantity).await,
        }
    }

    /// Buy `quantity` shares at the ticker's latest price.
    pub async fn buy(
        &self,
        user_id: i64,
        ticker_id: i64,
        quantity: i64,
    ) -> Result<Trade, TradeError> {
        if quantity <= 0 {
            return Err(TradeError::InvalidQuantity);
        }

        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let price = self.store.latest_price(ticker_id).await?;
        let cost = price * Decimal::from(quantity);

        let mut tx = self.db.pool().begin().await?;

        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(TradeError::NoAccount)?;
        let cash = Decimal::try_from(account.cash_balance)?;

        if cost > cash {
            return Err(TradeError::InsufficientFunds {
                required: cost,
                available: cash,
            });
        }

        let new_cash = cash - cost;
        sqlx::query("UPDATE accounts SET cash_balance = ?, updated_at = datetime('now') WHERE id = ?")
            .bind(new_cash.to_f64().unwrap_or(0.0))
            .bind(account.id)
            .execute(&mut *tx)
            .await?;

        let position = sqlx::query_as::<_, Position>(
            "SELECT * FROM positions WHERE user_id = ? AND ticker_id = ?",
        )
        .bind(user_id)
        .bind(ticker_id)
        .fetch_optional(&mut *tx)
        .await?;

        match position {
            Some(pos) => {
                // Quantity-weighted blend of the old basis and this purchase
                let old_avg = Decimal::try_from(pos.avg_price)?;
                let new_quantity = pos.quantity + quantity;
                let new_avg =
                    (old_avg * Decimal::from(pos.quantity) + cost) / Decimal::from(new_quantity);

                sqlx::query(
                    r#"
                    UPDATE positions SET
                        quantity = ?,
                        avg_price = ?,
                        current_price = ?,
                        updated_at = datetime('now')
                    WHERE id = ?
                    "#,
                )
                .bind(new_quantity)
                .bind(new_avg.to_f64().unwrap_or(0.0))
                .bind(price.to_f64().unwrap_or(0.0))
                .bind(pos.id)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO positions (user_id, ticker_id, quantity, avg_price, current_price)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(user_id)
                .bind(ticker_id)
                .bind(quantity)
                .bind(price.to_f64().unwrap_or(0.0))
                .bind(price.to_f64().unwrap_or(0.0))
                .execute(&mut *tx)
                .await?;
            }
        }

        let trade = self
            .record_trade(
                &mut tx,
                user_id,
                ticker_id,
                TradeAction::Buy,
                quantity,
                price,
                cost,
                new_cash,
            )
            .await?;

        tx.commit().await?;

        debug!(
            user_id = user_id,
            ticker_id = ticker_id,
            quantity = quantity,
            price = %price,
            "Buy committed"
        );
        Ok(trade)
    }

    /// Sell `quantity` shares at the ticker's latest price.
    pub async fn sell(
        &self,
        user_id: i64,
        ticker_id: i64,
        quantity: i64,
    ) -> Result<Trade, TradeError> {
        if quantity <= 0 {
            return Err(TradeError::InvalidQuantity);
        }

        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let price = self.store.latest_price(ticker_id).await?;
        let revenue = price * Decimal::from(quantity);

        let mut tx = self.db.pool().begin().await?;

        let position = sqlx::query_as::<_, Position>(
            "SELECT * FROM positions WHERE user_id = ? AND ticker_id = ?",
        )
        .bind(user_id)
        .bind(ticker_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(TradeError::NoPosition)?;

        if quantity > position.quantity {
            return Err(TradeError::InsufficientShares {
                held: position.quantity,
                requested: quantity,
            });
        }

        let remaining = position.quantity - quantity;
        if remaining == 0 {
            // The row is removed, never left at zero
            sqlx::query("DELETE FROM positions WHERE id = ?")
                .bind(position.id)
                .execute(&mut *tx)
                .await?;
        } else {
            // Average cost is never recomputed on a sell
            sqlx::query(
                r#"
                UPDATE positions SET
                    quantity = ?,
                    current_price = ?,
                    updated_at = datetime('now')
                WHERE id = ?
                "#,
            )
            .bind(remaining)
            .bind(price.to_f64().unwrap_or(0.0))
            .bind(position.id)
            .execute(&mut *tx)
            .await?;
        }

        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(TradeError::NoAccount)?;
        let new_cash = Decimal::try_from(account.cash_balance)? + revenue;

        sqlx::query("UPDATE accounts SET cash_balance = ?, updated_at = datetime('now') WHERE id = ?")
            .bind(new_cash.to_f64().unwrap_or(0.0))
            .bind(account.id)
            .execute(&mut *tx)
            .await?;

        let trade = self
            .record_trade(
                &mut tx,
                user_id,
                ticker_id,
                TradeAction::Sell,
                quantity,
                price,
                revenue,
                new_cash,
            )
            .await?;

        tx.commit().await?;

        debug!(
            user_id = user_id,
            ticker_id = ticker_id,
            quantity = quantity,
            price = %price,
            "Sell committed"
        );
        Ok(trade)
    }

    /// Refresh the cached current price on every position the user holds,
    /// silently skipping tickers with no price data.
    pub async fn refresh_position_prices(&self, user_id: i64) -> Result<(), TradeError> {
        for position in self.db.positions_for_user(user_id).await? {
            match self.store.latest_price(position.ticker_id).await {
                Ok(price) => {
                    self.db
                        .update_position_price(position.id, price.to_f64().unwrap_or(0.0))
                        .await?;
                }
                Err(PriceError::NoPriceData) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_trade(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        user_id: i64,
        ticker_id: i64,
        action: TradeAction,
        quantity: i64,
        price: Decimal,
        total_amount: Decimal,
        cash_after: Decimal,
    ) -> Result<Trade, TradeError> {
        let timestamp = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO trades (user_id, ticker_id, action, quantity, price, total_amount, cash_after, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(ticker_id)
        .bind(action.as_str())
        .bind(quantity)
        .bind(price.to_f64().unwrap_or(0.0))
        .bind(total_amount.to_f64().unwrap_or(0.0))
        .bind(cash_after.to_f64().unwrap_or(0.0))
        .bind(timestamp)
        .execute(&mut **tx)
        .await?;

        Ok(Trade {
            id: result.last_insert_rowid(),
            user_id,
            ticker_id,
            action,
            quantity,
            price: price.to_f64().unwrap_or(0.0),
            total_amount: total_amount.to_f64().unwrap_or(0.0),
            cash_after: cash_after.to_f64().unwrap_or(0.0),
            timestamp,
        })
    }

    /// The serialization lock for one user, created lazily.
    async fn user_lock(&self, user_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_db, DEFAULT_STARTING_CASH};
    use approx::assert_relative_eq;
    use chrono::Duration;

    struct Fixture {
        db: Database,
        store: PriceStore,
        ledger: Arc<Ledger>,
        user_id: i64,
        ticker_id: i64,
    }

    async fn fixture() -> Fixture {
        let db = test_db().await;
        let user = db.create_user("alice", DEFAULT_STARTING_CASH).await.unwrap();
        db.insert_ticker("AAPL", "Apple Inc.").await.unwrap();
        let ticker = db.get_ticker_by_symbol("AAPL").await.unwrap().unwrap();
        let store = PriceStore::new(db.clone());
        let ledger = Arc::new(Ledger::new(db.clone()));
        Fixture {
            db,
            store,
            ledger,
            user_id: user.id,
            ticker_id: ticker.id,
        }
    }

    async fn set_price(f: &Fixture, price: f64) {
        f.store
            .append_tick(f.ticker_id, price, 1_000, Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_buy_average_sell_scenario() {
        let f = fixture().await;

        // Buy 10 @ 150.00
        set_price(&f, 150.0).await;
        let trade = f.ledger.buy(f.user_id, f.ticker_id, 10).await.unwrap();
        assert_eq!(trade.action, TradeAction::Buy);
        assert_relative_eq!(trade.total_amount, 1_500.0);
        assert_relative_eq!(trade.cash_after, 8_500.0);

        let pos = f.db.get_position(f.user_id, f.ticker_id).await.unwrap().unwrap();
        assert_eq!(pos.quantity, 10);
        assert_relative_eq!(pos.avg_price, 150.0);

        // Buy 5 more @ 160.00: avg = (150*10 + 160*5) / 15
        set_price(&f, 160.0).await;
        let trade = f.ledger.buy(f.user_id, f.ticker_id, 5).await.unwrap();
        assert_relative_eq!(trade.cash_after, 7_700.0);

        let pos = f.db.get_position(f.user_id, f.ticker_id).await.unwrap().unwrap();
        assert_eq!(pos.quantity, 15);
        assert_relative_eq!(pos.avg_price, 2_300.0 / 15.0, epsilon = 1e-9);

        // Sell all 15 @ 170.00
        set_price(&f, 170.0).await;
        let trade = f.ledger.sell(f.user_id, f.ticker_id, 15).await.unwrap();
        assert_eq!(trade.action, TradeAction::Sell);
        assert_relative_eq!(trade.total_amount, 2_550.0);
        assert_relative_eq!(trade.cash_after, 10_250.0);

        // Position removed, not zeroed
        assert!(f.db.get_position(f.user_id, f.ticker_id).await.unwrap().is_none());

        // cash_after on each trade matches the account balance at that point
        let account = f.db.get_account(f.user_id).await.unwrap().unwrap();
        assert_relative_eq!(account.cash_balance, 10_250.0);
        let trades = f.db.trades_for_user(f.user_id, 10).await.unwrap();
        assert_eq!(trades.len(), 3);
    }

    #[tokio::test]
    async fn test_partial_sell_keeps_average_cost() {
        let f = fixture().await;
        set_price(&f, 100.0).await;
        f.ledger.buy(f.user_id, f.ticker_id, 10).await.unwrap();

        set_price(&f, 120.0).await;
        f.ledger.sell(f.user_id, f.ticker_id, 4).await.unwrap();

        let pos = f.db.get_position(f.user_id, f.ticker_id).await.unwrap().unwrap();
        assert_eq!(pos.quantity, 6);
        assert_relative_eq!(pos.avg_price, 100.0);
        assert_relative_eq!(pos.current_price, 120.0);
    }

    #[tokio::test]
    async fn test_buy_without_price_data_fails() {
        let f = fixture().await;
        assert!(matches!(
            f.ledger.buy(f.user_id, f.ticker_id, 1).await,
            Err(TradeError::Price(PriceError::NoPriceData))
        ));
    }

    #[tokio::test]
    async fn test_insufficient_funds_rolls_back() {
        let f = fixture().await;
        set_price(&f, 3_000.0).await;

        assert!(matches!(
            f.ledger.buy(f.user_id, f.ticker_id, 4).await,
            Err(TradeError::InsufficientFunds { .. })
        ));

        // Nothing committed
        let account = f.db.get_account(f.user_id).await.unwrap().unwrap();
        assert_relative_eq!(account.cash_balance, 10_000.0);
        assert!(f.db.get_position(f.user_id, f.ticker_id).await.unwrap().is_none());
        assert!(f.db.trades_for_user(f.user_id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sell_validation_errors() {
        let f = fixture().await;
        set_price(&f, 50.0).await;

        assert!(matches!(
            f.ledger.sell(f.user_id, f.ticker_id, 1).await,
            Err(TradeError::NoPosition)
        ));

        f.ledger.buy(f.user_id, f.ticker_id, 3).await.unwrap();
        assert!(matches!(
            f.ledger.sell(f.user_id, f.ticker_id, 5).await,
            Err(TradeError::InsufficientShares { held: 3, requested: 5 })
        ));

        assert!(matches!(
            f.ledger.sell(f.user_id, f.ticker_id, 0).await,
            Err(TradeError::InvalidQuantity)
        ));
        assert!(matches!(
            f.ledger.buy(f.user_id, f.ticker_id, -2).await,
            Err(TradeError::InvalidQuantity)
        ));
    }

    #[tokio::test]
    async fn test_submit_trade_resolves_symbol() {
        let f = fixture().await;
        set_price(&f, 200.0).await;

        let trade = f
            .ledger
            .submit_trade(f.user_id, "AAPL", TradeAction::Buy, 2)
            .await
            .unwrap();
        assert_relative_eq!(trade.total_amount, 400.0);

        assert!(matches!(
            f.ledger
                .submit_trade(f.user_id, "ZZZZ", TradeAction::Buy, 1)
                .await,
            Err(TradeError::UnknownTicker(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_buys_serialize_per_user() {
        let f = fixture().await;
        set_price(&f, 150.0).await;

        let mut handles = Vec::new();
        for _ in 0..5 {
            let ledger = f.ledger.clone();
            let (user_id, ticker_id) = (f.user_id, f.ticker_id);
            handles.push(tokio::spawn(async move {
                ledger.buy(user_id, ticker_id, 1).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // No lost updates: every debit is reflected
        let account = f.db.get_account(f.user_id).await.unwrap().unwrap();
        assert_relative_eq!(account.cash_balance, 10_000.0 - 5.0 * 150.0);
        let pos = f.db.get_position(f.user_id, f.ticker_id).await.unwrap().unwrap();
        assert_eq!(pos.quantity, 5);
    }

    #[tokio::test]
    async fn test_refresh_position_prices_updates_cached_price() {
        let f = fixture().await;
        set_price(&f, 100.0).await;
        f.ledger.buy(f.user_id, f.ticker_id, 1).await.unwrap();

        set_price(&f, 111.0).await;
        f.ledger.refresh_position_prices(f.user_id).await.unwrap();

        let pos = f.db.get_position(f.user_id, f.ticker_id).await.unwrap().unwrap();
        assert_relative_eq!(pos.current_price, 111.0);
    }

    #[tokio::test]
    async fn test_refresh_skips_positions_without_price_data() {
        let f = fixture().await;
        set_price(&f, 100.0).await;
        f.ledger.buy(f.user_id, f.ticker_id, 1).await.unwrap();

        // Orphan the position's price history, then refresh: the position
        // is skipped, not an error, and its cached price is untouched.
        sqlx::query("DELETE FROM price_ticks WHERE ticker_id = ?")
            .bind(f.ticker_id)
            .execute(f.db.pool())
            .await
            .unwrap();
        f.ledger.refresh_position_prices(f.user_id).await.unwrap();

        let pos = f.db.get_position(f.user_id, f.ticker_id).await.unwrap().unwrap();
        assert_relative_eq!(pos.current_price, 100.0);
    }
}
