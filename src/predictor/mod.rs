//! Confidence scoring capability consumed by the trading core.

mod logistic;

pub use logistic::LogisticPredictor;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::TrainingExample;

/// Result of one retrain pass.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingSummary {
    /// Examples the model was fitted on
    pub examples: usize,

    /// Examples with label 1
    pub positives: usize,

    /// Mean cross-entropy loss after the final epoch
    pub loss: f64,

    /// Fraction of examples classified correctly at a 0.5 cutoff
    pub accuracy: f64,

    pub trained_at: DateTime<Utc>,
}

impl std::fmt::Display for TrainingSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} examples ({} positive), loss {:.4}, accuracy {:.1}%",
            self.examples,
            self.positives,
            self.loss,
            self.accuracy * 100.0
        )
    }
}

/// A stateful scorer: features in, confidence in `[0, 1]` out.
///
/// Implementations must be safe to score from one task while another task
/// retrains; readers only ever observe a fully committed model.
pub trait Predictor: Send + Sync {
    /// Confidence that entering on these features is profitable.
    ///
    /// `None` when no model has been trained yet or the features do not fit.
    fn score(&self, features: &[f64]) -> Option<f64>;

    /// Replace the model with one fitted on `examples`.
    fn retrain(&self, examples: &[TrainingExample]) -> anyhow::Result<TrainingSummary>;

    fn is_trained(&self) -> bool;
}
