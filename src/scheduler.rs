//! Background job scheduler.
//!
//! Two independent interval loops drive the simulation: a fast one that
//! generates a price tick for every tracked ticker, and a slower one that
//! runs the auto-trade sweep. Each job carries a busy flag so a run that
//! overtakes its interval is skipped rather than stacked.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::market::PriceSimulator;
use crate::trading::AutoTrader;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Seconds between price-generation runs
    pub price_interval_secs: u64,
    /// Seconds between auto-trade sweeps
    pub auto_trade_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            price_interval_secs: 5,
            auto_trade_interval_secs: 30,
        }
    }
}

/// Runs the periodic jobs until a shutdown signal arrives.
pub struct Scheduler {
    simulator: Arc<PriceSimulator>,
    auto_trader: Arc<AutoTrader>,
    config: SchedulerConfig,
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(
        simulator: Arc<PriceSimulator>,
        auto_trader: Arc<AutoTrader>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            simulator,
            auto_trader,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shutdown signal for external control.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Main run loop. Returns once the shutdown flag is set.
    pub async fn run(&self) -> Result<()> {
        info!(
            price_interval = self.config.price_interval_secs,
            auto_trade_interval = self.config.auto_trade_interval_secs,
            "Starting scheduler"
        );

        // Register shutdown handler
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        let price_job = {
            let simulator = self.simulator.clone();
            self.spawn_job(
                "price-simulator",
                self.config.price_interval_secs,
                move || {
                    let simulator = simulator.clone();
                    async move { simulator.simulate_tick().await }
                },
            )
        };

        let auto_trade_job = {
            let auto_trader = self.auto_trader.clone();
            self.spawn_job(
                "auto-trader",
                self.config.auto_trade_interval_secs,
                move || {
                    let auto_trader = auto_trader.clone();
                    async move { auto_trader.run_sweep().await }
                },
            )
        };

        let (price_res, trade_res) = tokio::join!(price_job, auto_trade_job);
        price_res?;
        trade_res?;

        info!("Scheduler stopped");
        Ok(())
    }

    /// Spawn one interval-driven job loop. The busy flag guarantees a run
    /// never overlaps the previous one: an overdue tick is skipped.
    fn spawn_job<F, Fut>(
        &self,
        name: &'static str,
        interval_secs: u64,
        job: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        let busy = Arc::new(AtomicBool::new(false));

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while !shutdown.load(Ordering::SeqCst) {
                ticker.tick().await;
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }

                if busy
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    warn!(job = name, "Previous run still in progress, skipping");
                    continue;
                }

                let busy = busy.clone();
                let run = job();
                tokio::spawn(async move {
                    if let Err(e) = run.await {
                        error!(job = name, error = %e, "Job run failed");
                    }
                    busy.store(false, Ordering::SeqCst);
                });
            }

            info!(job = name, "Job loop stopped");
        })
    }
}
