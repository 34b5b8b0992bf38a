//! Feature normalization shared by live scoring, backtests and training imports.

use crate::models::{
    ExampleRecord, FeatureVector, FoundationRecord, MarketContext, MarketObservation,
    TrainingExample,
};

use super::NormalizationConfig;

/// Number of features presented to the predictor.
pub const FEATURE_COUNT: usize = 3;

/// Maps raw market signals into the predictor's `[0, 1]` feature space.
///
/// Layout: `[symbol change, market change, sentiment]`. Missing sentiment or
/// market context contribute a neutral raw value of 0.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureNormalizer {
    config: NormalizationConfig,
}

impl FeatureNormalizer {
    pub fn new(config: NormalizationConfig) -> Self {
        Self { config }
    }

    /// Features for a live observation.
    pub fn features(
        &self,
        observation: &MarketObservation,
        market: Option<&MarketContext>,
    ) -> FeatureVector {
        self.raw_features(
            observation.change_percent,
            market.map(|m| m.change_percent),
            observation.sentiment,
        )
    }

    /// Features from raw signal values.
    pub fn raw_features(
        &self,
        change_pct: f64,
        market_change_pct: Option<f64>,
        sentiment: Option<f64>,
    ) -> FeatureVector {
        vec![
            self.config.change_pct.normalize(change_pct),
            self.config
                .market_change_pct
                .normalize(market_change_pct.unwrap_or(0.0)),
            self.config.sentiment.normalize(sentiment.unwrap_or(0.0)),
        ]
    }

    /// Normalize a raw foundation lesson with the live ranges.
    pub fn foundation_example(&self, record: &FoundationRecord) -> TrainingExample {
        let features = self.raw_features(
            record.input.change,
            record.input.market,
            record.input.sentiment,
        );
        let mut example = TrainingExample::foundation(features, u8::from(record.output.buy >= 0.5));
        if let Some(details) = &record.details {
            example.symbol = details.symbol.clone();
            example.profit = details.profit;
        }
        example
    }

    /// Canonical example for any import record. Normalized records must
    /// already have the live feature shape.
    pub fn import(&self, record: ExampleRecord) -> Option<TrainingExample> {
        match record {
            ExampleRecord::Normalized(example) => {
                (example.features.len() == FEATURE_COUNT).then_some(example)
            }
            ExampleRecord::Foundation(record) => Some(self.foundation_example(&record)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::SignalRange;
    use rust_decimal_macros::dec;

    #[test]
    fn test_features_in_unit_interval() {
        let normalizer = FeatureNormalizer::new(NormalizationConfig::default());
        let obs = MarketObservation::new("TSLA", dec!(200), 9.0).with_sentiment(-3.0);
        let features = normalizer.features(&obs, Some(&MarketContext { change_percent: 1.5 }));

        assert_eq!(features.len(), FEATURE_COUNT);
        assert_eq!(features[0], 1.0);
        assert_eq!(features[1], 0.75);
        assert_eq!(features[2], 0.0);
    }

    #[test]
    fn test_missing_signals_are_neutral() {
        let normalizer = FeatureNormalizer::new(NormalizationConfig::default());
        let obs = MarketObservation::new("AMD", dec!(100), 0.0);
        assert_eq!(normalizer.features(&obs, None), vec![0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_live_and_raw_paths_agree() {
        let normalizer = FeatureNormalizer::new(NormalizationConfig {
            change_pct: SignalRange::new(-10.0, 10.0),
            ..Default::default()
        });
        let obs = MarketObservation::new("MSFT", dec!(400), 2.5).with_sentiment(0.3);
        let ctx = MarketContext { change_percent: -0.6 };

        assert_eq!(
            normalizer.features(&obs, Some(&ctx)),
            normalizer.raw_features(2.5, Some(-0.6), Some(0.3))
        );
    }

    #[test]
    fn test_foundation_import_uses_live_ranges() {
        let normalizer = FeatureNormalizer::new(NormalizationConfig::default());
        let records: Vec<ExampleRecord> = serde_json::from_str(
            r#"[
                {"input": {"change": 2.5, "market": -1.5}, "output": {"buy": 1}},
                {"features": [0.1, 0.2], "label": 1}
            ]"#,
        )
        .unwrap();
        let mut records = records.into_iter();

        let example = normalizer.import(records.next().unwrap()).unwrap();
        assert_eq!(example.features, vec![0.75, 0.25, 0.5]);
        assert_eq!(example.label, 1);

        // Wrong shape is refused
        assert!(normalizer.import(records.next().unwrap()).is_none());
    }
}
