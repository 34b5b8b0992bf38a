//! Resumable interval runner.
//!
//! Reads the persisted last-run time on startup. If there is none, or it is
//! older than one interval, a catch-up cycle runs immediately; after that a
//! cycle runs every interval until Ctrl-C. Cycles run one after another on a
//! single task and never overlap.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::agent::Agent;
use crate::config::SchedulerConfig;
use crate::market::MarketDataSource;

pub struct Scheduler {
    interval: Duration,
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs),
        }
    }

    /// True when no cycle has run yet or the last one is at least one interval old.
    pub fn catch_up_due(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_run {
            None => true,
            Some(at) => match (now - at).to_std() {
                Ok(elapsed) => elapsed >= self.interval,
                // Last run in the future (clock skew): wait for the next tick
                Err(_) => false,
            },
        }
    }

    /// Delay before the first regular tick, counted from the last run.
    pub fn first_delay(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
        if self.catch_up_due(last_run, now) {
            return self.interval;
        }
        let elapsed = last_run
            .and_then(|at| (now - at).to_std().ok())
            .unwrap_or_default();
        self.interval.saturating_sub(elapsed)
    }

    /// Run cycles until Ctrl-C.
    pub async fn run(&self, agent: &Agent, source: &dyn MarketDataSource) -> Result<()> {
        let last_run = agent.db().get_last_run().await?;
        let now = Utc::now();

        info!(
            interval_secs = self.interval.as_secs(),
            last_run = ?last_run,
            "Starting scheduler"
        );

        if self.catch_up_due(last_run, now) {
            info!("Running catch-up cycle");
            Self::cycle(agent, source).await;
        }

        let start = Instant::now() + self.first_delay(last_run, now);
        let mut ticker = interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        self.run_until(agent, source, &mut ticker, shutdown).await;

        Ok(())
    }

    /// Tick loop. `shutdown` lives across iterations, so a signal that lands
    /// while a cycle is running stops the loop right after that cycle.
    async fn run_until<F>(
        &self,
        agent: &Agent,
        source: &dyn MarketDataSource,
        ticker: &mut Interval,
        mut shutdown: std::pin::Pin<&mut F>,
    ) where
        F: Future,
    {
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = ticker.tick() => Self::cycle(agent, source).await,
            }
        }
    }

    async fn cycle(agent: &Agent, source: &dyn MarketDataSource) {
        match agent.run_cycle(source).await {
            Ok(report) => {
                if report.trades.is_empty() {
                    info!(equity = %report.equity, "Cycle complete, no trades");
                } else {
                    info!(
                        trades = report.trades.len(),
                        equity = %report.equity,
                        "Cycle complete"
                    );
                }
                if !report.skipped.is_empty() {
                    warn!(skipped = report.skipped.len(), "Malformed observations skipped");
                }
            }
            // Last-run time is left untouched so the next start catches up
            Err(e) => error!(error = %e, "Trading cycle failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::TimeZone;
    use tokio::sync::oneshot;

    use crate::config::AppConfig;
    use crate::db::Database;
    use crate::models::MarketBatch;

    /// Fires the shutdown channel from inside the first cycle.
    struct SignalingSource {
        fetches: AtomicUsize,
        shutdown: Mutex<Option<oneshot::Sender<()>>>,
    }

    #[async_trait]
    impl MarketDataSource for SignalingSource {
        async fn fetch_batch(&self, _held: &[String]) -> Result<MarketBatch> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(tx) = self.shutdown.lock().unwrap().take() {
                let _ = tx.send(());
            }
            Ok(MarketBatch::default())
        }
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(&SchedulerConfig { interval_secs: 900 })
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap()
    }

    #[test]
    fn test_catch_up_without_history() {
        let s = scheduler();
        assert!(s.catch_up_due(None, now()));
        assert_eq!(s.first_delay(None, now()), Duration::from_secs(900));
    }

    #[test]
    fn test_catch_up_when_stale() {
        let s = scheduler();
        let last = now() - chrono::Duration::minutes(20);
        assert!(s.catch_up_due(Some(last), now()));

        let exactly = now() - chrono::Duration::minutes(15);
        assert!(s.catch_up_due(Some(exactly), now()));
    }

    #[test]
    fn test_recent_run_waits_for_remainder() {
        let s = scheduler();
        let last = now() - chrono::Duration::minutes(5);
        assert!(!s.catch_up_due(Some(last), now()));
        assert_eq!(s.first_delay(Some(last), now()), Duration::from_secs(600));
    }

    #[test]
    fn test_future_last_run_is_not_due() {
        let s = scheduler();
        let last = now() + chrono::Duration::minutes(5);
        assert!(!s.catch_up_due(Some(last), now()));
        assert_eq!(s.first_delay(Some(last), now()), Duration::from_secs(900));
    }

    #[tokio::test]
    async fn test_signal_during_cycle_stops_loop() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let agent = Agent::new(&AppConfig::default(), db).await.unwrap();
        let (tx, rx) = oneshot::channel();
        let source = SignalingSource {
            fetches: AtomicUsize::new(0),
            shutdown: Mutex::new(Some(tx)),
        };

        let s = Scheduler {
            interval: Duration::from_millis(10),
        };
        let mut ticker = tokio::time::interval(s.interval);
        tokio::pin!(rx);

        tokio::time::timeout(
            Duration::from_secs(5),
            s.run_until(&agent, &source, &mut ticker, rx),
        )
        .await
        .unwrap();

        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        agent.shutdown().await.unwrap();
    }
}
