//! Labeled training examples derived from closed trades.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Normalized predictor inputs, every element in [0, 1].
pub type FeatureVector = Vec<f64>;

/// One `(features, label)` lesson for the predictor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingExample {
    /// Features the entry decision was scored on
    pub features: FeatureVector,

    /// 1 if the trade closed with a profit, 0 otherwise
    pub label: u8,

    /// Symbol the lesson came from (empty for foundation data)
    #[serde(default)]
    pub symbol: String,

    /// Realized profit of the source trade
    #[serde(default)]
    pub profit: Option<Decimal>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl TrainingExample {
    /// Label a closed trade: profitable means a positive example.
    pub fn from_closed_trade(symbol: &str, features: FeatureVector, profit: Decimal) -> Self {
        Self {
            features,
            label: u8::from(profit > Decimal::ZERO),
            symbol: symbol.to_string(),
            profit: Some(profit),
            created_at: Utc::now(),
        }
    }

    /// Example without a source trade (e.g. imported foundation data).
    pub fn foundation(features: FeatureVector, label: u8) -> Self {
        Self {
            features,
            label: label.min(1),
            symbol: String::new(),
            profit: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_positive(&self) -> bool {
        self.label == 1
    }
}

/// Raw-signal inputs of a foundation lesson.
#[derive(Debug, Clone, Deserialize)]
pub struct FoundationInput {
    /// Symbol percent change
    pub change: f64,

    /// Benchmark percent change
    #[serde(default)]
    pub market: Option<f64>,

    /// Net news sentiment
    #[serde(default)]
    pub sentiment: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FoundationOutput {
    /// 1 for a winning setup, 0 otherwise
    pub buy: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FoundationDetails {
    #[serde(default)]
    pub symbol: String,

    #[serde(default)]
    pub profit: Option<Decimal>,
}

/// Externally supplied lesson in raw signal units, normalized on import.
#[derive(Debug, Clone, Deserialize)]
pub struct FoundationRecord {
    pub input: FoundationInput,
    pub output: FoundationOutput,
    #[serde(default)]
    pub details: Option<FoundationDetails>,
}

/// One entry of an example import file.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExampleRecord {
    /// Already-normalized example
    Normalized(TrainingExample),
    Foundation(FoundationRecord),
}
