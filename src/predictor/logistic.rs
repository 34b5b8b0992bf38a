//! Logistic-regression scorer trained with full-batch gradient descent.

use std::sync::{Arc, RwLock};

use anyhow::{bail, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::models::TrainingExample;
use crate::trading::FeedbackConfig;

use super::{Predictor, TrainingSummary};

#[derive(Debug, Clone, PartialEq)]
struct Model {
    weights: Vec<f64>,
    bias: f64,
}

impl Model {
    fn zeros(dims: usize) -> Self {
        Self {
            weights: vec![0.0; dims],
            bias: 0.0,
        }
    }

    fn predict(&self, features: &[f64]) -> f64 {
        let z: f64 = self
            .weights
            .iter()
            .zip(features)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias;
        sigmoid(z)
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Default [`Predictor`]: a single logistic unit over the feature vector.
///
/// Training always starts from zero weights and runs a fixed number of
/// epochs, so the same example set always yields the same model.
pub struct LogisticPredictor {
    dims: usize,
    epochs: usize,
    learning_rate: f64,
    model: RwLock<Option<Arc<Model>>>,
}

impl LogisticPredictor {
    pub fn new(dims: usize, epochs: usize, learning_rate: f64) -> Self {
        Self {
            dims,
            epochs,
            learning_rate,
            model: RwLock::new(None),
        }
    }

    pub fn from_config(dims: usize, config: &FeedbackConfig) -> Self {
        Self::new(dims, config.epochs, config.learning_rate)
    }

    fn current(&self) -> Option<Arc<Model>> {
        match self.model.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn commit(&self, model: Model) {
        let model = Some(Arc::new(model));
        match self.model.write() {
            Ok(mut guard) => *guard = model,
            Err(poisoned) => *poisoned.into_inner() = model,
        }
    }

    fn fit(&self, examples: &[TrainingExample]) -> Model {
        let mut model = Model::zeros(self.dims);
        let n = examples.len() as f64;

        for _ in 0..self.epochs {
            let mut grad_w = vec![0.0; self.dims];
            let mut grad_b = 0.0;

            for example in examples {
                let error = model.predict(&example.features) - f64::from(example.label);
                for (g, x) in grad_w.iter_mut().zip(&example.features) {
                    *g += error * x;
                }
                grad_b += error;
            }

            for (w, g) in model.weights.iter_mut().zip(&grad_w) {
                *w -= self.learning_rate * g / n;
            }
            model.bias -= self.learning_rate * grad_b / n;
        }

        model
    }
}

impl Predictor for LogisticPredictor {
    fn score(&self, features: &[f64]) -> Option<f64> {
        if features.len() != self.dims {
            warn!(
                expected = self.dims,
                got = features.len(),
                "Feature vector has wrong shape"
            );
            return None;
        }
        let model = self.current()?;
        Some(model.predict(features))
    }

    fn retrain(&self, examples: &[TrainingExample]) -> Result<TrainingSummary> {
        if examples.is_empty() {
            bail!("cannot train on an empty example set");
        }
        if let Some(bad) = examples.iter().find(|e| e.features.len() != self.dims) {
            bail!(
                "example has {} features, expected {}",
                bad.features.len(),
                self.dims
            );
        }

        debug!(examples = examples.len(), epochs = self.epochs, "Fitting logistic model");
        let model = self.fit(examples);

        let mut loss = 0.0;
        let mut correct = 0usize;
        for example in examples {
            let p = model.predict(&example.features).clamp(1e-12, 1.0 - 1e-12);
            let y = f64::from(example.label);
            loss -= y * p.ln() + (1.0 - y) * (1.0 - p).ln();
            if (p >= 0.5) == example.is_positive() {
                correct += 1;
            }
        }

        let summary = TrainingSummary {
            examples: examples.len(),
            positives: examples.iter().filter(|e| e.is_positive()).count(),
            loss: loss / examples.len() as f64,
            accuracy: correct as f64 / examples.len() as f64,
            trained_at: Utc::now(),
        };

        self.commit(model);
        info!(%summary, "Predictor retrained");

        Ok(summary)
    }

    fn is_trained(&self) -> bool {
        self.current().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable() -> Vec<TrainingExample> {
        vec![
            TrainingExample::foundation(vec![0.9, 0.6, 0.8], 1),
            TrainingExample::foundation(vec![0.8, 0.7, 0.9], 1),
            TrainingExample::foundation(vec![0.7, 0.5, 0.7], 1),
            TrainingExample::foundation(vec![0.1, 0.4, 0.2], 0),
            TrainingExample::foundation(vec![0.2, 0.3, 0.1], 0),
            TrainingExample::foundation(vec![0.3, 0.5, 0.3], 0),
        ]
    }

    #[test]
    fn test_untrained_scores_none() {
        let predictor = LogisticPredictor::new(3, 100, 0.5);
        assert!(!predictor.is_trained());
        assert!(predictor.score(&[0.5, 0.5, 0.5]).is_none());
    }

    #[test]
    fn test_learns_separable_set() {
        let predictor = LogisticPredictor::new(3, 500, 0.5);
        let summary = predictor.retrain(&separable()).unwrap();

        assert_eq!(summary.examples, 6);
        assert_eq!(summary.positives, 3);
        assert_eq!(summary.accuracy, 1.0);

        let high = predictor.score(&[0.9, 0.6, 0.9]).unwrap();
        let low = predictor.score(&[0.1, 0.4, 0.1]).unwrap();
        assert!(high > 0.5 && low < 0.5);
        assert!((0.0..=1.0).contains(&high));
    }

    #[test]
    fn test_retrain_is_deterministic() {
        let predictor = LogisticPredictor::new(3, 200, 0.5);
        let features = [0.6, 0.5, 0.7];

        predictor.retrain(&separable()).unwrap();
        let first = predictor.score(&features).unwrap();
        predictor.retrain(&separable()).unwrap();
        let second = predictor.score(&features).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_rejected_retrain_keeps_model() {
        let predictor = LogisticPredictor::new(3, 200, 0.5);
        predictor.retrain(&separable()).unwrap();
        let before = predictor.score(&[0.6, 0.5, 0.7]);

        assert!(predictor.retrain(&[]).is_err());
        assert!(predictor
            .retrain(&[TrainingExample::foundation(vec![0.5], 1)])
            .is_err());
        assert_eq!(predictor.score(&[0.6, 0.5, 0.7]), before);
    }

    #[test]
    fn test_wrong_shape_scores_none() {
        let predictor = LogisticPredictor::new(3, 200, 0.5);
        predictor.retrain(&separable()).unwrap();
        assert!(predictor.score(&[0.5, 0.5]).is_none());
    }

    #[test]
    fn test_scores_during_retrain_see_committed_model() {
        let features = [0.6, 0.5, 0.7];
        let flipped: Vec<TrainingExample> = separable()
            .into_iter()
            .map(|e| TrainingExample::foundation(e.features, 1 - e.label))
            .collect();

        let reference = LogisticPredictor::new(3, 2000, 0.5);
        reference.retrain(&separable()).unwrap();
        let old = reference.score(&features).unwrap();
        reference.retrain(&flipped).unwrap();
        let new = reference.score(&features).unwrap();
        assert_ne!(old, new);

        let predictor = LogisticPredictor::new(3, 2000, 0.5);
        predictor.retrain(&separable()).unwrap();
        let done = std::sync::atomic::AtomicBool::new(false);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..5 {
                    predictor.retrain(&flipped).unwrap();
                }
                done.store(true, std::sync::atomic::Ordering::SeqCst);
            });

            let mut reads = 0;
            while !done.load(std::sync::atomic::Ordering::SeqCst) || reads == 0 {
                let score = predictor.score(&features).unwrap();
                assert!(score == old || score == new, "partial model observed: {}", score);
                reads += 1;
            }
        });

        assert_eq!(predictor.score(&features), Some(new));
    }
}
