//! Agent runtime: wires ledger, predictor, feedback loop and storage together.
//!
//! Handles:
//! - Restoring the ledger snapshot and training history on startup
//! - Running one trading cycle against a market-data source
//! - Persisting trades, the ledger snapshot, equity and last-run time
//! - Manual buy/sell overrides and on-demand retraining
//! - Flushing pending training examples on shutdown

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::db::Database;
use crate::market::MarketDataSource;
use crate::metrics::{PerformanceCalculator, PerformanceMetrics};
use crate::models::{ExampleRecord, MarketObservation, Trade};
use crate::predictor::{LogisticPredictor, Predictor, TrainingSummary};
use crate::trading::{
    example_channel, BuyOutcome, CycleReport, Decision, EntryContext, ExampleStore, ExitReason,
    FeedbackLoop, Ledger, LedgerStatus, NormalizationConfig, SellOutcome, TradingCycle,
    FEATURE_COUNT,
};

/// Long-lived trading agent.
pub struct Agent {
    db: Arc<Database>,
    predictor: Arc<LogisticPredictor>,
    feedback: Arc<FeedbackLoop>,
    cycle: TradingCycle,
    feedback_task: JoinHandle<()>,
}

impl Agent {
    /// Build the agent from stored state.
    pub async fn new(config: &AppConfig, db: Arc<Database>) -> Result<Self> {
        info!("Initializing agent...");

        let predictor = Arc::new(LogisticPredictor::from_config(FEATURE_COUNT, &config.feedback));
        let store: Arc<dyn ExampleStore> = db.clone();
        let feedback = Arc::new(FeedbackLoop::new(
            config.feedback.clone(),
            predictor.clone(),
            Some(store),
        ));

        let ledger = match db.load_ledger().await? {
            Some(snapshot) => {
                info!(
                    cash = %snapshot.cash,
                    positions = snapshot.positions.len(),
                    trades = snapshot.trades.len(),
                    "Resuming from previous session"
                );
                Ledger::restore(&config.ledger, snapshot)
            }
            None => Ledger::new(&config.ledger),
        };
        let (sender, rx) = example_channel();
        let ledger = Arc::new(Mutex::new(ledger.with_example_sender(sender)));

        check_normalization(&db, &config.normalization).await?;
        if feedback.load_history().await? > 0 {
            if let Err(e) = feedback.retrain().await {
                warn!(error = %e, "Initial retrain failed, running without a model");
            }
        }
        let feedback_task = feedback.clone().spawn(rx);

        let predictor_handle: Arc<dyn Predictor> = predictor.clone();
        let cycle = TradingCycle::from_config(ledger, predictor_handle, config);

        info!(
            trained = predictor.is_trained(),
            examples = feedback.example_count().await,
            "Agent initialized"
        );

        Ok(Self {
            db,
            predictor,
            feedback,
            cycle,
            feedback_task,
        })
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn predictor(&self) -> Arc<dyn Predictor> {
        self.predictor.clone()
    }

    /// Symbols with an open position, sorted.
    pub async fn held_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .cycle
            .ledger()
            .lock()
            .await
            .positions()
            .map(|p| p.symbol.clone())
            .collect();
        symbols.sort();
        symbols
    }

    /// Fetch a batch, run the cycle, persist the results.
    pub async fn run_cycle(&self, source: &dyn MarketDataSource) -> Result<CycleReport> {
        let held = self.held_symbols().await;
        let batch = source
            .fetch_batch(&held)
            .await
            .context("Failed to fetch market batch")?;
        if batch.is_empty() {
            info!("No movers this cycle");
        }

        let report = self.cycle.run(&batch).await;
        self.persist(&report.trades, true).await;

        Ok(report)
    }

    /// Decisions for the current batch without executing them.
    pub async fn decide(&self, source: &dyn MarketDataSource) -> Result<Vec<Decision>> {
        let held = self.held_symbols().await;
        let batch = source
            .fetch_batch(&held)
            .await
            .context("Failed to fetch market batch")?;
        Ok(self.cycle.decide_only(&batch).await)
    }

    /// Manual buy at `price`, scored on the given raw signals.
    pub async fn buy(
        &self,
        symbol: &str,
        price: Decimal,
        change_percent: f64,
        sentiment: Option<f64>,
    ) -> Result<BuyOutcome> {
        let mut observation = MarketObservation::new(symbol, price, change_percent);
        observation.sentiment = sentiment;
        if let Some(reason) = observation.malformed_reason() {
            anyhow::bail!("Cannot buy {}: {}", symbol, reason);
        }

        let features = self.cycle.normalizer().features(&observation, None);
        let confidence = self.predictor.score(&features);

        let (outcome, trades) = {
            let mut ledger = self.cycle.ledger().lock().await;
            let mark = ledger.trades().len();
            let outcome = ledger.buy(symbol, price, EntryContext::new(features, confidence));
            (outcome, ledger.trades_since(mark).to_vec())
        };
        self.persist(&trades, false).await;

        Ok(outcome)
    }

    /// Manual exit of the whole position.
    pub async fn sell(&self, symbol: &str, price: Decimal) -> Result<SellOutcome> {
        if price <= Decimal::ZERO {
            anyhow::bail!("Cannot sell {}: non-positive price", symbol);
        }

        let (outcome, trades) = {
            let mut ledger = self.cycle.ledger().lock().await;
            let mark = ledger.trades().len();
            let outcome = ledger.sell(symbol, price, ExitReason::ManualExit);
            (outcome, ledger.trades_since(mark).to_vec())
        };
        self.persist(&trades, false).await;

        Ok(outcome)
    }

    /// Refit the predictor on all accumulated examples now.
    pub async fn retrain(&self) -> Result<TrainingSummary> {
        self.feedback.retrain().await
    }

    /// Store imported examples and add them to the training set.
    ///
    /// Returns (imported, rejected).
    pub async fn import_examples(&self, records: Vec<ExampleRecord>) -> Result<(usize, usize)> {
        let total = records.len();
        let mut examples = Vec::with_capacity(total);
        for record in records {
            if let Some(example) = self.cycle.normalizer().import(record) {
                examples.push(example);
            }
        }

        for example in &examples {
            self.db.save_example(example).await?;
        }
        let imported = examples.len();
        self.feedback.seed(examples).await;

        info!(imported, rejected = total - imported, "Examples imported");
        Ok((imported, total - imported))
    }

    pub async fn status(&self) -> LedgerStatus {
        self.cycle.ledger().lock().await.status()
    }

    /// Metrics over the stored trade log and equity curve.
    pub async fn performance(&self) -> Result<PerformanceMetrics> {
        let trades = self.db.get_trades(10_000).await?;
        let curve: Vec<Decimal> = self
            .db
            .get_equity_curve(10_000)
            .await?
            .into_iter()
            .rev()
            .filter_map(|p| Decimal::from_f64(p.equity))
            .collect();

        Ok(PerformanceCalculator::calculate(&trades, &curve))
    }

    /// Write new trades and the ledger snapshot; on cycle runs also the
    /// equity point and last-run time. Storage failures are logged only.
    async fn persist(&self, trades: &[Trade], cycle_run: bool) {
        let (snapshot, status) = {
            let ledger = self.cycle.ledger().lock().await;
            (ledger.snapshot(), ledger.status())
        };

        if let Err(e) = self.db.save_trades(trades).await {
            error!(error = %e, "Failed to record trades");
        }
        if let Err(e) = self.db.save_ledger(&snapshot).await {
            error!(error = %e, "Failed to save ledger snapshot");
        }

        if cycle_run {
            if let Err(e) = self.db.record_equity_point(&status).await {
                error!(error = %e, "Failed to record equity point");
            }
            if let Err(e) = self.db.set_last_run(Utc::now()).await {
                error!(error = %e, "Failed to save last run time");
            }
        }
    }

    /// Flush pending examples and save final state.
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down agent...");

        let snapshot = {
            let mut ledger = self.cycle.ledger().lock().await;
            drop(ledger.detach_example_sender());
            ledger.snapshot()
        };
        self.db.save_ledger(&snapshot).await?;

        // Channel is closed; the loop exits after draining
        self.feedback_task
            .await
            .context("Feedback loop task failed")?;

        info!("Agent shutdown complete");
        Ok(())
    }
}

/// Refuse to mix training examples built under different normalization ranges.
///
/// The first start (or one with no stored examples) records the current
/// ranges; later starts must match them while any example is stored.
async fn check_normalization(db: &Database, config: &NormalizationConfig) -> Result<()> {
    let current = config.fingerprint();

    match db.get_normalization().await? {
        Some(stored) if stored == current => return Ok(()),
        Some(stored) => {
            let examples = db.count_examples().await?;
            if examples > 0 {
                anyhow::bail!(
                    "{} stored training examples were normalized with {} but the config uses {}; \
                     restore the previous [normalization] section or start from a fresh database",
                    examples,
                    stored,
                    current
                );
            }
        }
        None => {
            let examples = db.count_examples().await?;
            if examples > 0 {
                warn!(examples, normalization = %current, "Stored examples have no recorded normalization, assuming current ranges");
            }
        }
    }

    db.set_normalization(&current).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::StaticSource;
    use crate::models::MarketBatch;
    use crate::trading::SignalRange;
    use rust_decimal_macros::dec;

    /// Returns a fixed batch and remembers which held symbols it was asked for.
    struct RecordingSource {
        batch: MarketBatch,
        held: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl MarketDataSource for RecordingSource {
        async fn fetch_batch(&self, held: &[String]) -> Result<MarketBatch> {
            *self.held.lock().unwrap() = held.to_vec();
            Ok(self.batch.clone())
        }
    }

    async fn agent(db: Arc<Database>) -> Agent {
        Agent::new(&AppConfig::default(), db).await.unwrap()
    }

    #[tokio::test]
    async fn test_untrained_cycle_persists_state() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let agent = agent(db.clone()).await;
        let source = StaticSource::new(MarketBatch::new(
            vec![MarketObservation::new("AAPL", dec!(150), 2.0)],
            None,
        ));

        let report = agent.run_cycle(&source).await.unwrap();

        // No trained model: never buys
        assert!(report.trades.is_empty());
        assert!(db.get_last_run().await.unwrap().is_some());
        assert_eq!(db.get_equity_curve(10).await.unwrap().len(), 1);
        agent.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_quiet_holding_still_hits_trailing_stop() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let agent = agent(db).await;
        agent.buy("AAPL", dec!(150), 2.0, None).await.unwrap();

        // -0.1% on the day, far below the mover threshold, but 2.67% off the high
        let source = RecordingSource {
            batch: MarketBatch::new(vec![MarketObservation::new("AAPL", dec!(146), -0.1)], None),
            held: std::sync::Mutex::new(Vec::new()),
        };
        let report = agent.run_cycle(&source).await.unwrap();

        assert_eq!(*source.held.lock().unwrap(), vec!["AAPL".to_string()]);
        assert_eq!(report.decisions[0].exit_reason, Some(ExitReason::TrailingStop));
        assert!(agent.held_symbols().await.is_empty());
        agent.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_manual_round_trip_feeds_training_store() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let agent = agent(db.clone()).await;

        let outcome = agent.buy("X", dec!(100), 1.0, None).await.unwrap();
        assert!(matches!(outcome, BuyOutcome::Filled(ref t) if t.amount == 20));

        let outcome = agent.sell("X", dec!(120)).await.unwrap();
        let SellOutcome::Closed { trade, example } = outcome else {
            panic!("expected close");
        };
        assert_eq!(trade.profit, Some(dec!(400)));
        assert_eq!(trade.reason.as_deref(), Some("manual exit"));
        assert_eq!(example.label, 1);

        agent.shutdown().await.unwrap();

        assert_eq!(db.count_examples().await.unwrap(), 1);
        assert_eq!(db.get_trades(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_restart_restores_ledger() {
        let db = Arc::new(Database::in_memory().await.unwrap());

        let first = agent(db.clone()).await;
        first.buy("NVDA", dec!(125), 2.0, Some(0.3)).await.unwrap();
        let cash = first.status().await.cash;
        first.shutdown().await.unwrap();

        let second = agent(db.clone()).await;
        let status = second.status().await;
        assert_eq!(status.cash, cash);
        assert_eq!(status.positions.len(), 1);
        assert_eq!(status.positions[0].symbol, "NVDA");
        second.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_changed_normalization_refuses_to_start() {
        let db = Arc::new(Database::in_memory().await.unwrap());

        let first = agent(db.clone()).await;
        first.buy("X", dec!(100), 1.0, None).await.unwrap();
        first.sell("X", dec!(101)).await.unwrap();
        first.shutdown().await.unwrap();
        assert_eq!(db.count_examples().await.unwrap(), 1);

        let mut edited = AppConfig::default();
        edited.normalization.change_pct = SignalRange::new(-10.0, 10.0);
        let err = Agent::new(&edited, db.clone()).await.err().unwrap();
        assert!(err.to_string().contains("normalized with"));

        // Original ranges still start fine
        agent(db).await.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_normalization_change_allowed_without_examples() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        agent(db.clone()).await.shutdown().await.unwrap();

        let mut edited = AppConfig::default();
        edited.normalization.sentiment = SignalRange::new(-2.0, 2.0);
        Agent::new(&edited, db.clone()).await.unwrap().shutdown().await.unwrap();

        assert_eq!(
            db.get_normalization().await.unwrap(),
            Some(edited.normalization.fingerprint())
        );
    }

    #[tokio::test]
    async fn test_import_then_retrain() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let agent = agent(db.clone()).await;

        let records: Vec<ExampleRecord> = serde_json::from_str(
            r#"[
                {"input": {"change": 3.0, "market": 1.0}, "output": {"buy": 1}},
                {"input": {"change": -3.0, "market": 1.0}, "output": {"buy": 0}},
                {"features": [0.5], "label": 1}
            ]"#,
        )
        .unwrap();

        let (imported, rejected) = agent.import_examples(records).await.unwrap();
        assert_eq!((imported, rejected), (2, 1));

        let summary = agent.retrain().await.unwrap();
        assert_eq!(summary.examples, 2);
        assert!(agent.predictor().is_trained());
        agent.shutdown().await.unwrap();
    }
}
