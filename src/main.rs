//! Paper Trading Simulator
//!
//! Simulated stock market with a random-walk price feed, technical
//! indicators, AI-assisted trading signals, and automated trading against
//! virtual cash accounts.

mod db;
mod error;
mod indicators;
mod market;
mod models;
mod scheduler;
mod signals;
mod trading;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::db::{Database, DEFAULT_STARTING_CASH};
use crate::indicators::IndicatorSet;
use crate::market::{PriceSimulator, PriceStore, SimulatorConfig};
use crate::models::{TradeAction, User};
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::signals::SignalGenerator;
use crate::trading::{AutoTrader, Ledger};

/// Paper trading simulator CLI.
#[derive(Parser)]
#[command(name = "papertrader")]
#[command(about = "Simulated stock trading with AI-assisted signals", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./papertrader.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database: seed tickers and backfill price history
    Init,

    /// Run the market simulation and auto-trader
    Run {
        /// Seconds between price ticks
        #[arg(long, default_value = "5")]
        price_interval: u64,

        /// Seconds between auto-trade sweeps
        #[arg(long, default_value = "30")]
        trade_interval: u64,
    },

    /// Create a user with a starting cash balance
    CreateUser {
        /// Username
        username: String,

        /// Starting cash in USD
        #[arg(short, long, default_value_t = DEFAULT_STARTING_CASH)]
        cash: f64,
    },

    /// Buy shares at the latest price
    Buy {
        /// Username
        username: String,

        /// Ticker symbol
        symbol: String,

        /// Number of shares
        quantity: i64,
    },

    /// Sell shares at the latest price
    Sell {
        /// Username
        username: String,

        /// Ticker symbol
        symbol: String,

        /// Number of shares
        quantity: i64,
    },

    /// Show cash, positions, and P&L for a user
    Portfolio {
        /// Username
        username: String,
    },

    /// Show the current trading signal for a ticker
    Signal {
        /// Ticker symbol
        symbol: String,
    },

    /// Show technical indicators for a ticker
    Indicators {
        /// Ticker symbol
        symbol: String,
    },

    /// Show or update a user's auto-trade settings
    Autotrade {
        /// Username
        username: String,

        /// Enable automated trading
        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        /// Disable automated trading
        #[arg(long)]
        disable: bool,

        /// Minimum signal confidence to act on (0-1)
        #[arg(long)]
        threshold: Option<f64>,

        /// Maximum shares per automated trade
        #[arg(long)]
        max_size: Option<i64>,
    },

    /// List tracked tickers with their latest prices
    Tickers,

    /// Show recent trades for a user
    Trades {
        /// Username
        username: String,

        /// Maximum number of trades to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let db = Database::new(&cli.database).await?;
    let store = PriceStore::new(db.clone());

    match cli.command {
        Commands::Init => {
            let simulator = PriceSimulator::new(db.clone(), SimulatorConfig::default());
            simulator.initialize_tickers().await?;
            println!("Seeded tickers.");

            println!("Backfilling price history (this may take a moment)...");
            simulator.backfill_history().await?;

            let tickers = db.all_tickers().await?;
            println!("Database ready: {} tickers tracked.", tickers.len());
        }

        Commands::Run {
            price_interval,
            trade_interval,
        } => {
            let simulator = Arc::new(PriceSimulator::new(db.clone(), SimulatorConfig::default()));
            simulator.initialize_tickers().await?;
            simulator.backfill_history().await?;

            let ledger = Arc::new(Ledger::new(db.clone()));
            let generator = SignalGenerator::from_env();
            let auto_trader = Arc::new(AutoTrader::new(db.clone(), ledger, generator));

            let config = SchedulerConfig {
                price_interval_secs: price_interval,
                auto_trade_interval_secs: trade_interval,
            };

            println!("\n=== Paper Trading Simulator ===");
            println!("Price tick interval: {}s", price_interval);
            println!("Auto-trade interval: {}s", trade_interval);
            println!("\nPress Ctrl+C to stop.\n");

            let scheduler = Scheduler::new(simulator, auto_trader, config);
            scheduler.run().await?;
        }

        Commands::CreateUser { username, cash } => {
            let user = db.create_user(&username, cash).await?;
            println!(
                "Created user '{}' (id {}) with ${:.2} cash.",
                user.username, user.id, cash
            );
        }

        Commands::Buy {
            username,
            symbol,
            quantity,
        } => {
            let user = resolve_user(&db, &username).await?;
            let ledger = Ledger::new(db.clone());
            let trade = ledger
                .submit_trade(user.id, &symbol, TradeAction::Buy, quantity)
                .await?;

            println!(
                "Bought {} {} @ ${:.2} (total ${:.2}, cash ${:.2})",
                trade.quantity, symbol, trade.price, trade.total_amount, trade.cash_after
            );
        }

        Commands::Sell {
            username,
            symbol,
            quantity,
        } => {
            let user = resolve_user(&db, &username).await?;
            let ledger = Ledger::new(db.clone());
            let trade = ledger
                .submit_trade(user.id, &symbol, TradeAction::Sell, quantity)
                .await?;

            println!(
                "Sold {} {} @ ${:.2} (total ${:.2}, cash ${:.2})",
                trade.quantity, symbol, trade.price, trade.total_amount, trade.cash_after
            );
        }

        Commands::Portfolio { username } => {
            let user = resolve_user(&db, &username).await?;
            let ledger = Ledger::new(db.clone());
            ledger.refresh_position_prices(user.id).await?;

            let account = db
                .get_account(user.id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Account not found"))?;
            let positions = db.positions_for_user(user.id).await?;
            let tickers = db.all_tickers().await?;

            println!("\n=== Portfolio: {} ===", user.username);
            println!("Cash: ${:.2}", account.cash_balance);

            if positions.is_empty() {
                println!("No open positions.");
            } else {
                println!(
                    "\n{:<8} {:>8} {:>12} {:>12} {:>12} {:>12}",
                    "SYMBOL", "QTY", "AVG PRICE", "PRICE", "VALUE", "P&L"
                );
                println!("{}", "-".repeat(68));

                let mut total_value = 0.0;
                for pos in &positions {
                    let symbol = tickers
                        .iter()
                        .find(|t| t.id == pos.ticker_id)
                        .map(|t| t.symbol.as_str())
                        .unwrap_or("?");
                    let value = pos.market_value();
                    total_value += value;
                    println!(
                        "{:<8} {:>8} {:>12.2} {:>12.2} {:>12.2} {:>+12.2}",
                        symbol,
                        pos.quantity,
                        pos.avg_price,
                        pos.current_price,
                        value,
                        pos.unrealized_pnl()
                    );
                }

                println!(
                    "\nTotal value: ${:.2}",
                    account.cash_balance + total_value
                );
            }
        }

        Commands::Signal { symbol } => {
            let indicators = indicators_for(&db, &store, &symbol).await?;
            let generator = SignalGenerator::from_env();
            let signal = generator.signal(&symbol, &indicators).await;

            println!("\n=== Signal: {} ===", symbol);
            println!("Action:     {}", signal.action);
            println!("Confidence: {:.2}", signal.confidence);
            println!("Reason:     {}", signal.reason);
        }

        Commands::Indicators { symbol } => {
            let ind = indicators_for(&db, &store, &symbol).await?;

            println!("\n=== Indicators: {} ===", symbol);
            println!("SMA(20):        {}", fmt_opt(ind.sma_20));
            println!("SMA(50):        {}", fmt_opt(ind.sma_50));
            println!("EMA(12):        {}", fmt_opt(ind.ema_12));
            println!("EMA(26):        {}", fmt_opt(ind.ema_26));
            println!("RSI(14):        {}", fmt_opt(ind.rsi_14));
            println!("MACD:           {}", fmt_opt(ind.macd));
            println!("MACD signal:    {}", fmt_opt(ind.macd_signal));
            println!("MACD histogram: {}", fmt_opt(ind.macd_histogram));
            println!("Bollinger up:   {}", fmt_opt(ind.bollinger_upper));
            println!("Bollinger mid:  {}", fmt_opt(ind.bollinger_middle));
            println!("Bollinger low:  {}", fmt_opt(ind.bollinger_lower));
            println!("Volatility:     {}", fmt_opt(ind.volatility));
        }

        Commands::Autotrade {
            username,
            enable,
            disable,
            threshold,
            max_size,
        } => {
            let user = resolve_user(&db, &username).await?;
            let current = db.get_auto_trade_config(user.id).await?;

            if enable || disable || threshold.is_some() || max_size.is_some() {
                let enabled = if enable {
                    true
                } else if disable {
                    false
                } else {
                    current.as_ref().map(|c| c.enabled).unwrap_or(false)
                };
                let new_threshold = threshold
                    .or_else(|| current.as_ref().map(|c| c.confidence_threshold))
                    .unwrap_or(0.7);
                let new_max = max_size
                    .or_else(|| current.as_ref().map(|c| c.max_trade_size))
                    .unwrap_or(5);

                if !(0.0..=1.0).contains(&new_threshold) {
                    anyhow::bail!("Threshold must be between 0 and 1");
                }
                if new_max < 1 {
                    anyhow::bail!("Max trade size must be at least 1");
                }

                db.upsert_auto_trade_config(user.id, enabled, new_threshold, new_max)
                    .await?;
                info!(user_id = user.id, enabled = enabled, "Auto-trade config updated");
            }

            let config = db
                .get_auto_trade_config(user.id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("No auto-trade config"))?;

            println!("\n=== Auto-Trade: {} ===", user.username);
            println!("Enabled:              {}", if config.enabled { "Yes" } else { "No" });
            println!("Confidence threshold: {:.2}", config.confidence_threshold);
            println!("Max trade size:       {} shares", config.max_trade_size);
        }

        Commands::Tickers => {
            let tickers = db.all_tickers().await?;

            println!("\n{:<8} {:<28} {:>12}", "SYMBOL", "NAME", "PRICE");
            println!("{}", "-".repeat(50));

            for ticker in tickers {
                let price = match store.last_tick(ticker.id).await? {
                    Some(tick) => format!("{:.2}", tick.price),
                    None => "-".to_string(),
                };
                println!("{:<8} {:<28} {:>12}", ticker.symbol, ticker.name, price);
            }
        }

        Commands::Trades { username, limit } => {
            let user = resolve_user(&db, &username).await?;
            let trades = db.trades_for_user(user.id, limit).await?;
            let tickers = db.all_tickers().await?;

            if trades.is_empty() {
                println!("No trades for '{}'.", user.username);
                return Ok(());
            }

            println!(
                "\n{:<20} {:<6} {:<8} {:>8} {:>10} {:>12} {:>12}",
                "TIME", "SIDE", "SYMBOL", "QTY", "PRICE", "TOTAL", "CASH AFTER"
            );
            println!("{}", "-".repeat(82));

            for trade in trades {
                let symbol = tickers
                    .iter()
                    .find(|t| t.id == trade.ticker_id)
                    .map(|t| t.symbol.as_str())
                    .unwrap_or("?");
                println!(
                    "{:<20} {:<6} {:<8} {:>8} {:>10.2} {:>12.2} {:>12.2}",
                    trade.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    trade.action,
                    symbol,
                    trade.quantity,
                    trade.price,
                    trade.total_amount,
                    trade.cash_after
                );
            }
        }
    }

    Ok(())
}

async fn resolve_user(db: &Database, username: &str) -> Result<User> {
    db.get_user_by_name(username)
        .await?
        .ok_or_else(|| anyhow::anyhow!("User '{}' not found", username))
}

async fn indicators_for(
    db: &Database,
    store: &PriceStore,
    symbol: &str,
) -> Result<IndicatorSet> {
    let ticker = db
        .get_ticker_by_symbol(symbol)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Unknown ticker '{}'", symbol))?;
    let prices = store.closing_prices(ticker.id, 100).await?;
    Ok(IndicatorSet::compute(&prices))
}

fn fmt_opt(v: Option<f64>) -> String {
    match v {
        Some(x) => format!("{:.4}", x),
        None => "insufficient history".to_string(),
    }
}
