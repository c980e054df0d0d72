//! Unattended trading: one sweep evaluates every ticker's signal for every
//! user with auto-trading enabled, and conditionally invokes the ledger.
//!
//! A failure on one (user, ticker) pair is logged and skipped; it never
//! aborts the rest of the sweep.

use std::sync::Arc;

use anyhow::{Context, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::indicators::IndicatorSet;
use crate::market::PriceStore;
use crate::models::{AutoTradeConfig, SignalAction, Ticker};
use crate::signals::SignalGenerator;
use crate::trading::Ledger;

/// How much history feeds the indicator pipeline each evaluation.
const INDICATOR_WINDOW: i64 = 100;

/// Drives the periodic auto-trade sweep.
pub struct AutoTrader {
    db: Database,
    store: PriceStore,
    ledger: Arc<Ledger>,
    signals: SignalGenerator,
}

impl AutoTrader {
    pub fn new(db: Database, ledger: Arc<Ledger>, signals: SignalGenerator) -> Self {
        let store = PriceStore::new(db.clone());
        Self {
            db,
            store,
            ledger,
            signals,
        }
    }

    /// One sweep across all enabled users and all tickers.
    pub async fn run_sweep(&self) -> Result<()> {
        let configs = self
            .db
            .enabled_auto_trade_configs()
            .await
            .context("Failed to load auto-trade configs")?;
        if configs.is_empty() {
            return Ok(());
        }

        let tickers = self.db.all_tickers().await?;
        info!(users = configs.len(), tickers = tickers.len(), "Auto-trade sweep starting");

        for config in &configs {
            for ticker in &tickers {
                if let Err(e) = self.evaluate_pair(config, ticker).await {
                    warn!(
                        user_id = config.user_id,
                        symbol = %ticker.symbol,
                        error = %e,
                        "Auto-trade evaluation failed, continuing sweep"
                    );
                }
            }
        }

        info!("Auto-trade sweep complete");
        Ok(())
    }

    /// Evaluate one (user, ticker) pair and trade when the signal clears the
    /// user's confidence threshold.
    async fn evaluate_pair(&self, config: &AutoTradeConfig, ticker: &Ticker) -> Result<()> {
        let prices = self.store.closing_prices(ticker.id, INDICATOR_WINDOW).await?;
        let indicators = IndicatorSet::compute(&prices);
        let signal = self.signals.signal(&ticker.symbol, &indicators).await;

        if signal.confidence < config.confidence_threshold {
            debug!(
                user_id = config.user_id,
                symbol = %ticker.symbol,
                action = %signal.action,
                confidence = signal.confidence,
                threshold = config.confidence_threshold,
                "Signal below threshold, skipping"
            );
            return Ok(());
        }

        info!(
            user_id = config.user_id,
            symbol = %ticker.symbol,
            action = %signal.action,
            confidence = signal.confidence,
            reason = %signal.reason,
            "Actionable signal"
        );

        match signal.action {
            SignalAction::Buy => self.execute_buy(config, ticker).await,
            SignalAction::Sell => self.execute_sell(config, ticker).await,
            SignalAction::Hold => Ok(()),
        }
    }

    /// Buy the largest quantity within the user's max trade size that their
    /// cash can afford at the latest price.
    async fn execute_buy(&self, config: &AutoTradeConfig, ticker: &Ticker) -> Result<()> {
        let price = self.store.latest_price(ticker.id).await?;
        let account = self
            .db
            .get_account(config.user_id)
            .await?
            .context("Account missing for auto-trade user")?;

        let cash = Decimal::try_from(account.cash_balance)?;
        let affordable = (cash / price).floor().to_i64().unwrap_or(0);
        let quantity = affordable.min(config.max_trade_size);

        if quantity < 1 {
            debug!(
                user_id = config.user_id,
                symbol = %ticker.symbol,
                "Insufficient cash for auto-buy, skipping"
            );
            return Ok(());
        }

        let trade = self.ledger.buy(config.user_id, ticker.id, quantity).await?;
        info!(
            user_id = config.user_id,
            symbol = %ticker.symbol,
            quantity = quantity,
            price = trade.price,
            total = trade.total_amount,
            "Auto-buy executed"
        );
        Ok(())
    }

    /// Sell up to the user's max trade size, bounded by the held quantity.
    async fn execute_sell(&self, config: &AutoTradeConfig, ticker: &Ticker) -> Result<()> {
        let position = match self.db.get_position(config.user_id, ticker.id).await? {
            Some(p) if p.quantity > 0 => p,
            _ => {
                debug!(
                    user_id = config.user_id,
                    symbol = %ticker.symbol,
                    "No shares to auto-sell, skipping"
                );
                return Ok(());
            }
        };

        let quantity = position.quantity.min(config.max_trade_size);
        let trade = self.ledger.sell(config.user_id, ticker.id, quantity).await?;
        info!(
            user_id = config.user_id,
            symbol = %ticker.symbol,
            quantity = quantity,
            price = trade.price,
            total = trade.total_amount,
            "Auto-sell executed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_db, DEFAULT_STARTING_CASH};
    use crate::models::TradingSignal;
    use crate::signals::{Advisor, AdvisoryError};
    use approx::assert_relative_eq;
    use async_trait::async_trait;
    use chrono::Utc;

    struct FixedAdvisor(TradingSignal);

    #[async_trait]
    impl Advisor for FixedAdvisor {
        async fn advise(
            &self,
            _symbol: &str,
            _indicators: &IndicatorSet,
        ) -> Result<TradingSignal, AdvisoryError> {
            Ok(self.0.clone())
        }
    }

    struct TimingOutAdvisor;

    #[async_trait]
    impl Advisor for TimingOutAdvisor {
        async fn advise(
            &self,
            _symbol: &str,
            _indicators: &IndicatorSet,
        ) -> Result<TradingSignal, AdvisoryError> {
            Err(AdvisoryError::Timeout)
        }
    }

    struct Fixture {
        db: Database,
        ledger: Arc<Ledger>,
        user_id: i64,
        ticker_id: i64,
    }

    async fn fixture(price: f64) -> Fixture {
        let db = test_db().await;
        let user = db.create_user("carol", DEFAULT_STARTING_CASH).await.unwrap();
        db.insert_ticker("NVDA", "NVIDIA Corporation").await.unwrap();
        let ticker = db.get_ticker_by_symbol("NVDA").await.unwrap().unwrap();
        PriceStore::new(db.clone())
            .append_tick(ticker.id, price, 1_000, Utc::now())
            .await
            .unwrap();
        let ledger = Arc::new(Ledger::new(db.clone()));
        Fixture {
            db,
            ledger,
            user_id: user.id,
            ticker_id: ticker.id,
        }
    }

    fn trader_with(f: &Fixture, advisor: impl Advisor + 'static) -> AutoTrader {
        AutoTrader::new(
            f.db.clone(),
            f.ledger.clone(),
            SignalGenerator::new(Some(Box::new(advisor))),
        )
    }

    fn buy_signal(confidence: f64) -> TradingSignal {
        TradingSignal {
            action: SignalAction::Buy,
            confidence,
            reason: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_below_threshold_places_no_trade() {
        let f = fixture(100.0).await;
        f.db.upsert_auto_trade_config(f.user_id, true, 0.8, 5)
            .await
            .unwrap();

        let trader = trader_with(&f, FixedAdvisor(buy_signal(0.75)));
        trader.run_sweep().await.unwrap();

        assert!(f.db.trades_for_user(f.user_id, 10).await.unwrap().is_empty());
        let account = f.db.get_account(f.user_id).await.unwrap().unwrap();
        assert_relative_eq!(account.cash_balance, 10_000.0);
    }

    #[tokio::test]
    async fn test_buy_quantity_respects_max_trade_size() {
        let f = fixture(100.0).await;
        f.db.upsert_auto_trade_config(f.user_id, true, 0.7, 5)
            .await
            .unwrap();

        let trader = trader_with(&f, FixedAdvisor(buy_signal(0.9)));
        trader.run_sweep().await.unwrap();

        // Cash affords 100 shares; max size caps it at 5
        let pos = f.db.get_position(f.user_id, f.ticker_id).await.unwrap().unwrap();
        assert_eq!(pos.quantity, 5);
    }

    #[tokio::test]
    async fn test_buy_quantity_bounded_by_cash() {
        let f = fixture(4_000.0).await;
        f.db.upsert_auto_trade_config(f.user_id, true, 0.7, 5)
            .await
            .unwrap();

        let trader = trader_with(&f, FixedAdvisor(buy_signal(0.9)));
        trader.run_sweep().await.unwrap();

        // 10 000 / 4 000 affords 2 shares
        let pos = f.db.get_position(f.user_id, f.ticker_id).await.unwrap().unwrap();
        assert_eq!(pos.quantity, 2);
    }

    #[tokio::test]
    async fn test_unaffordable_buy_is_skipped() {
        let f = fixture(15_000.0).await;
        f.db.upsert_auto_trade_config(f.user_id, true, 0.7, 5)
            .await
            .unwrap();

        let trader = trader_with(&f, FixedAdvisor(buy_signal(0.9)));
        trader.run_sweep().await.unwrap();

        assert!(f.db.trades_for_user(f.user_id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sell_without_position_is_skipped() {
        let f = fixture(100.0).await;
        f.db.upsert_auto_trade_config(f.user_id, true, 0.7, 5)
            .await
            .unwrap();

        let trader = trader_with(
            &f,
            FixedAdvisor(TradingSignal {
                action: SignalAction::Sell,
                confidence: 0.9,
                reason: "test".to_string(),
            }),
        );
        trader.run_sweep().await.unwrap();

        assert!(f.db.trades_for_user(f.user_id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sell_bounded_by_held_quantity() {
        let f = fixture(100.0).await;
        f.ledger.buy(f.user_id, f.ticker_id, 3).await.unwrap();
        f.db.upsert_auto_trade_config(f.user_id, true, 0.7, 5)
            .await
            .unwrap();

        let trader = trader_with(
            &f,
            FixedAdvisor(TradingSignal {
                action: SignalAction::Sell,
                confidence: 0.9,
                reason: "test".to_string(),
            }),
        );
        trader.run_sweep().await.unwrap();

        // Held 3 < max 5: sells exactly the 3 held, removing the row
        assert!(f.db.get_position(f.user_id, f.ticker_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_advisory_timeout_falls_back_and_sweep_proceeds() {
        let f = fixture(100.0).await;
        f.db.upsert_auto_trade_config(f.user_id, true, 0.4, 5)
            .await
            .unwrap();

        // One flat tick of history: the fallback yields HOLD at 0.5, which
        // clears the 0.4 threshold but never trades.
        let trader = trader_with(&f, TimingOutAdvisor);
        trader.run_sweep().await.unwrap();

        assert!(f.db.trades_for_user(f.user_id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_users_are_ignored() {
        let f = fixture(100.0).await;
        f.db.upsert_auto_trade_config(f.user_id, false, 0.1, 5)
            .await
            .unwrap();

        let trader = trader_with(&f, FixedAdvisor(buy_signal(1.0)));
        trader.run_sweep().await.unwrap();

        assert!(f.db.trades_for_user(f.user_id, 10).await.unwrap().is_empty());
    }
}
