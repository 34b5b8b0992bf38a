//! Trading configuration: sizing, risk bands, decision thresholds, normalization.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Cash and position sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Starting cash balance
    pub initial_cash: Decimal,

    /// Fraction of equity committed to a single new position
    pub allocation_fraction: Decimal,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            initial_cash: dec!(10000),
            allocation_fraction: dec!(0.20), // 20% of equity per stock
        }
    }
}

impl LedgerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_cash < Decimal::ZERO {
            return Err(ConfigError::invalid("ledger.initial_cash", "must be >= 0"));
        }
        if self.allocation_fraction <= Decimal::ZERO || self.allocation_fraction > Decimal::ONE {
            return Err(ConfigError::invalid(
                "ledger.allocation_fraction",
                "must be in (0, 1]",
            ));
        }
        Ok(())
    }
}

/// Trailing stop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Drop from the high-water mark that forces an exit (0.02 = 2%)
    pub trail_stop_fraction: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            trail_stop_fraction: dec!(0.02),
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trail_stop_fraction <= Decimal::ZERO || self.trail_stop_fraction >= Decimal::ONE {
            return Err(ConfigError::invalid(
                "risk.trail_stop_fraction",
                "must be in (0, 1)",
            ));
        }
        Ok(())
    }
}

/// Entry and exit thresholds for the decision policy.
///
/// Every field is required when the section is given in a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Unrealized gain that locks in profit (0.02 = +2%)
    pub take_profit_fraction: Decimal,

    /// Unrealized loss that cuts the position (0.01 = -1%)
    pub stop_loss_fraction: Decimal,

    /// Confidence must exceed this to open a position
    pub entry_confidence_threshold: f64,

    /// Held positions are exited once confidence falls below this
    pub exit_confidence_threshold: f64,

    /// Only buy symbols that are actually moving up
    pub require_positive_momentum: bool,

    /// Benchmark change (percent) at or below which the market is in meltdown
    pub market_meltdown_pct: f64,

    /// Sentiment below this blocks new entries
    pub entry_sentiment_floor: f64,

    /// Sentiment below this forces an exit
    pub exit_sentiment_floor: f64,

    /// Skip entries when RSI is above this (overbought)
    #[serde(default)]
    pub max_entry_rsi: Option<f64>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            take_profit_fraction: dec!(0.02),
            stop_loss_fraction: dec!(0.01),
            entry_confidence_threshold: 0.6,
            exit_confidence_threshold: 0.35,
            require_positive_momentum: true,
            market_meltdown_pct: -2.0,
            entry_sentiment_floor: -0.2,
            exit_sentiment_floor: -0.8,
            max_entry_rsi: Some(70.0),
        }
    }
}

impl PolicyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.take_profit_fraction <= Decimal::ZERO {
            return Err(ConfigError::invalid("policy.take_profit_fraction", "must be > 0"));
        }
        if self.stop_loss_fraction <= Decimal::ZERO || self.stop_loss_fraction >= Decimal::ONE {
            return Err(ConfigError::invalid(
                "policy.stop_loss_fraction",
                "must be in (0, 1)",
            ));
        }
        if !(0.0..=1.0).contains(&self.entry_confidence_threshold) {
            return Err(ConfigError::invalid(
                "policy.entry_confidence_threshold",
                "must be in [0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.exit_confidence_threshold) {
            return Err(ConfigError::invalid(
                "policy.exit_confidence_threshold",
                "must be in [0, 1]",
            ));
        }
        if self.exit_confidence_threshold >= self.entry_confidence_threshold {
            return Err(ConfigError::invalid(
                "policy.exit_confidence_threshold",
                format!(
                    "must be below entry threshold {}",
                    self.entry_confidence_threshold
                ),
            ));
        }
        if self.exit_sentiment_floor > self.entry_sentiment_floor {
            return Err(ConfigError::invalid(
                "policy.exit_sentiment_floor",
                "must not exceed entry_sentiment_floor",
            ));
        }
        if !self.market_meltdown_pct.is_finite() {
            return Err(ConfigError::invalid("policy.market_meltdown_pct", "must be finite"));
        }
        if let Some(rsi) = self.max_entry_rsi {
            if !(0.0..=100.0).contains(&rsi) {
                return Err(ConfigError::invalid("policy.max_entry_rsi", "must be in [0, 100]"));
            }
        }
        Ok(())
    }
}

/// Affine range mapping a raw signal into [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalRange {
    pub min: f64,
    pub max: f64,
}

impl SignalRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// `clamp01((x - min) / (max - min))`
    pub fn normalize(&self, x: f64) -> f64 {
        ((x - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }

    fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(ConfigError::invalid(field, "bounds must be finite"));
        }
        if self.max <= self.min {
            return Err(ConfigError::invalid(
                field,
                format!("max {} must exceed min {}", self.max, self.min),
            ));
        }
        Ok(())
    }
}

/// Per-signal normalization ranges shared by live scoring and training.
///
/// Every field is required when the section is given in a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationConfig {
    /// Symbol percent change
    pub change_pct: SignalRange,

    /// Benchmark percent change
    pub market_change_pct: SignalRange,

    /// Net news sentiment
    pub sentiment: SignalRange,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            change_pct: SignalRange::new(-5.0, 5.0),
            market_change_pct: SignalRange::new(-3.0, 3.0),
            sentiment: SignalRange::new(-1.0, 1.0),
        }
    }
}

impl NormalizationConfig {
    /// Stable text form of the ranges, stored alongside training examples.
    pub fn fingerprint(&self) -> String {
        format!(
            "change_pct=[{},{}];market_change_pct=[{},{}];sentiment=[{},{}]",
            self.change_pct.min,
            self.change_pct.max,
            self.market_change_pct.min,
            self.market_change_pct.max,
            self.sentiment.min,
            self.sentiment.max
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.change_pct.validate("normalization.change_pct")?;
        self.market_change_pct
            .validate("normalization.market_change_pct")?;
        self.sentiment.validate("normalization.sentiment")?;
        Ok(())
    }
}

/// Feedback loop cadence and trainer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Minimum accumulated examples before the first retrain
    pub min_examples: usize,

    /// Retrain after this many new examples arrive
    pub retrain_every: usize,

    /// Gradient descent passes per retrain
    pub epochs: usize,

    /// Gradient descent step size
    pub learning_rate: f64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            min_examples: 10,
            retrain_every: 5,
            epochs: 500,
            learning_rate: 0.5,
        }
    }
}

impl FeedbackConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retrain_every == 0 {
            return Err(ConfigError::invalid("feedback.retrain_every", "must be >= 1"));
        }
        if self.epochs == 0 {
            return Err(ConfigError::invalid("feedback.epochs", "must be >= 1"));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(ConfigError::invalid("feedback.learning_rate", "must be > 0"));
        }
        Ok(())
    }
}
