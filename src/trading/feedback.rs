//! Training feedback loop: closed trades become labeled examples, and the
//! predictor is periodically refit on everything accumulated so far.
//!
//! The ledger only holds an [`ExampleSender`]. Sending never blocks and never
//! fails the trade; the loop task owns persistence and retraining.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::models::TrainingExample;
use crate::predictor::{Predictor, TrainingSummary};

use super::FeedbackConfig;

/// Append-only sink for training examples.
#[async_trait]
pub trait ExampleStore: Send + Sync {
    async fn append_example(&self, example: &TrainingExample) -> Result<()>;

    async fn load_examples(&self) -> Result<Vec<TrainingExample>>;
}

/// Ledger-side handle for emitting examples.
#[derive(Debug, Clone)]
pub struct ExampleSender {
    tx: mpsc::UnboundedSender<TrainingExample>,
}

/// Loop-side end of the example channel.
pub type ExampleReceiver = mpsc::UnboundedReceiver<TrainingExample>;

impl ExampleSender {
    /// Queue an example. Errors only once the receiving loop is gone.
    pub fn send(&self, example: TrainingExample) -> Result<()> {
        self.tx
            .send(example)
            .map_err(|_| anyhow::anyhow!("feedback loop is not running"))
    }
}

/// Create a connected sender/receiver pair.
pub fn example_channel() -> (ExampleSender, ExampleReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ExampleSender { tx }, rx)
}

#[derive(Debug, Default)]
struct FeedbackState {
    examples: Vec<TrainingExample>,
    since_retrain: usize,
}

/// Accumulates examples and drives [`Predictor::retrain`].
pub struct FeedbackLoop {
    config: FeedbackConfig,
    predictor: Arc<dyn Predictor>,
    store: Option<Arc<dyn ExampleStore>>,
    state: Mutex<FeedbackState>,
    // Serializes fits so an older example set never commits over a newer one
    fitting: Mutex<()>,
}

impl FeedbackLoop {
    pub fn new(
        config: FeedbackConfig,
        predictor: Arc<dyn Predictor>,
        store: Option<Arc<dyn ExampleStore>>,
    ) -> Self {
        Self {
            config,
            predictor,
            store,
            state: Mutex::new(FeedbackState::default()),
            fitting: Mutex::new(()),
        }
    }

    /// Add examples that are already persisted elsewhere (stored history,
    /// foundation data). They are not written to the store again.
    pub async fn seed(&self, examples: Vec<TrainingExample>) {
        let mut state = self.state.lock().await;
        state.examples.extend(examples);
    }

    /// Seed from the store's history. Returns how many examples were loaded.
    pub async fn load_history(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let history = store
            .load_examples()
            .await
            .context("Failed to load training history")?;
        let count = history.len();
        self.seed(history).await;
        Ok(count)
    }

    pub async fn example_count(&self) -> usize {
        self.state.lock().await.examples.len()
    }

    /// Persist one new example and retrain if the cadence says so.
    pub async fn record(&self, example: TrainingExample) -> Option<TrainingSummary> {
        if let Some(store) = &self.store {
            if let Err(e) = store.append_example(&example).await {
                error!(symbol = %example.symbol, error = %e, "Failed to persist training example");
            }
        }

        let due = {
            let mut state = self.state.lock().await;
            debug!(
                symbol = %example.symbol,
                label = example.label,
                total = state.examples.len() + 1,
                "Training example recorded"
            );
            state.examples.push(example);
            state.since_retrain += 1;
            state.examples.len() >= self.config.min_examples
                && state.since_retrain >= self.config.retrain_every
        };

        if !due {
            return None;
        }

        match self.retrain().await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(error = %e, "Scheduled retrain failed");
                None
            }
        }
    }

    /// Refit the predictor on every example accumulated so far.
    ///
    /// The state lock is released during the fit; examples recorded meanwhile
    /// count toward the next retrain.
    pub async fn retrain(&self) -> Result<TrainingSummary> {
        let _fitting = self.fitting.lock().await;

        let (examples, counted) = {
            let state = self.state.lock().await;
            (state.examples.clone(), state.since_retrain)
        };
        let predictor = self.predictor.clone();

        let summary = tokio::task::spawn_blocking(move || predictor.retrain(&examples))
            .await
            .context("Retrain task panicked")??;

        let mut state = self.state.lock().await;
        state.since_retrain = state.since_retrain.saturating_sub(counted);
        Ok(summary)
    }

    /// Drain the channel until every sender is dropped.
    pub async fn run(&self, mut rx: ExampleReceiver) {
        info!("Feedback loop started");
        while let Some(example) = rx.recv().await {
            self.record(example).await;
        }
        info!("Feedback loop stopped");
    }

    pub fn spawn(self: Arc<Self>, rx: ExampleReceiver) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(rx).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::LogisticPredictor;
    use std::sync::Mutex as StdMutex;

    /// In-memory store that can be told to fail.
    #[derive(Default)]
    struct MemoryStore {
        examples: StdMutex<Vec<TrainingExample>>,
        fail: bool,
    }

    #[async_trait]
    impl ExampleStore for MemoryStore {
        async fn append_example(&self, example: &TrainingExample) -> Result<()> {
            if self.fail {
                anyhow::bail!("disk full");
            }
            self.examples.lock().unwrap().push(example.clone());
            Ok(())
        }

        async fn load_examples(&self) -> Result<Vec<TrainingExample>> {
            Ok(self.examples.lock().unwrap().clone())
        }
    }

    fn example(label: u8) -> TrainingExample {
        let x = if label == 1 { 0.8 } else { 0.2 };
        TrainingExample::foundation(vec![x, 0.5, x], label)
    }

    fn config(min_examples: usize, retrain_every: usize) -> FeedbackConfig {
        FeedbackConfig {
            min_examples,
            retrain_every,
            epochs: 100,
            learning_rate: 0.5,
        }
    }

    #[tokio::test]
    async fn test_retrains_on_cadence() {
        let predictor = Arc::new(LogisticPredictor::new(3, 100, 0.5));
        let store = Arc::new(MemoryStore::default());
        let feedback = FeedbackLoop::new(config(4, 2), predictor.clone(), Some(store.clone()));

        assert!(feedback.record(example(1)).await.is_none());
        assert!(feedback.record(example(0)).await.is_none());
        assert!(feedback.record(example(1)).await.is_none());
        assert!(!predictor.is_trained());

        let summary = feedback.record(example(0)).await.unwrap();
        assert_eq!(summary.examples, 4);
        assert!(predictor.is_trained());
        assert_eq!(store.examples.lock().unwrap().len(), 4);

        // Counter resets after a retrain
        assert!(feedback.record(example(1)).await.is_none());
    }

    #[tokio::test]
    async fn test_store_failure_does_not_drop_example() {
        let predictor = Arc::new(LogisticPredictor::new(3, 100, 0.5));
        let store = Arc::new(MemoryStore {
            fail: true,
            ..Default::default()
        });
        let feedback = FeedbackLoop::new(config(100, 1), predictor, Some(store));

        feedback.record(example(1)).await;
        assert_eq!(feedback.example_count().await, 1);
    }

    #[tokio::test]
    async fn test_seeded_examples_feed_retrain() {
        let predictor = Arc::new(LogisticPredictor::new(3, 100, 0.5));
        let feedback = FeedbackLoop::new(config(1, 1), predictor.clone(), None);

        assert!(feedback.retrain().await.is_err());

        feedback.seed(vec![example(1), example(0)]).await;
        let summary = feedback.retrain().await.unwrap();
        assert_eq!(summary.examples, 2);
        assert!(predictor.is_trained());
    }

    #[tokio::test]
    async fn test_load_history_from_store() {
        let predictor = Arc::new(LogisticPredictor::new(3, 100, 0.5));
        let store = Arc::new(MemoryStore::default());
        store.examples.lock().unwrap().extend([example(1), example(0), example(1)]);
        let feedback = FeedbackLoop::new(config(100, 1), predictor, Some(store.clone()));

        assert_eq!(feedback.load_history().await.unwrap(), 3);
        assert_eq!(feedback.example_count().await, 3);
        // History is not written back
        assert_eq!(store.examples.lock().unwrap().len(), 3);
    }

    /// Predictor whose fit waits until the test lets it finish.
    struct GatedPredictor {
        entered: std::sync::Barrier,
        release: std::sync::Barrier,
    }

    impl Predictor for GatedPredictor {
        fn score(&self, _features: &[f64]) -> Option<f64> {
            None
        }

        fn retrain(&self, examples: &[TrainingExample]) -> Result<TrainingSummary> {
            self.entered.wait();
            self.release.wait();
            Ok(TrainingSummary {
                examples: examples.len(),
                positives: examples.iter().filter(|e| e.is_positive()).count(),
                loss: 0.0,
                accuracy: 1.0,
                trained_at: chrono::Utc::now(),
            })
        }

        fn is_trained(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_record_not_blocked_by_running_fit() {
        let predictor = Arc::new(GatedPredictor {
            entered: std::sync::Barrier::new(2),
            release: std::sync::Barrier::new(2),
        });
        let feedback = Arc::new(FeedbackLoop::new(config(100, 100), predictor.clone(), None));
        feedback.seed(vec![example(1), example(0)]).await;

        let fit = tokio::spawn({
            let feedback = feedback.clone();
            async move { feedback.retrain().await }
        });
        let gate = predictor.clone();
        tokio::task::spawn_blocking(move || gate.entered.wait())
            .await
            .unwrap();

        // Fit is in progress; recording must still go through
        tokio::time::timeout(std::time::Duration::from_secs(5), feedback.record(example(1)))
            .await
            .unwrap();
        assert_eq!(feedback.example_count().await, 3);

        let gate = predictor.clone();
        tokio::task::spawn_blocking(move || gate.release.wait())
            .await
            .unwrap();
        let summary = fit.await.unwrap().unwrap();

        assert_eq!(summary.examples, 2);
        // The example recorded during the fit still counts toward the next one
        assert_eq!(feedback.state.lock().await.since_retrain, 1);
    }

    #[tokio::test]
    async fn test_channel_drains_into_loop() {
        let predictor = Arc::new(LogisticPredictor::new(3, 100, 0.5));
        let feedback = Arc::new(FeedbackLoop::new(config(100, 1), predictor, None));
        let (sender, rx) = example_channel();

        let handle = feedback.clone().spawn(rx);
        sender.send(example(1)).unwrap();
        sender.send(example(0)).unwrap();
        drop(sender);
        handle.await.unwrap();

        assert_eq!(feedback.example_count().await, 2);
    }

    #[tokio::test]
    async fn test_send_fails_once_loop_is_gone() {
        let (sender, rx) = example_channel();
        drop(rx);
        assert!(sender.send(example(1)).is_err());
    }
}
