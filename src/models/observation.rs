//! Market observations consumed once per trading cycle.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Immutable quote snapshot for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketObservation {
    /// Ticker symbol (e.g. "AAPL")
    pub symbol: String,

    /// Last traded price
    pub price: Decimal,

    /// Percent change against the previous close (1.5 = +1.5%)
    pub change_percent: f64,

    /// Net news sentiment in [-1, 1]
    #[serde(default)]
    pub sentiment: Option<f64>,

    /// Relative strength index (0-100)
    #[serde(default)]
    pub rsi: Option<f64>,

    /// When the quote was observed
    #[serde(default = "Utc::now")]
    pub time: DateTime<Utc>,
}

impl MarketObservation {
    /// Create an observation stamped with the current time.
    pub fn new(symbol: impl Into<String>, price: Decimal, change_percent: f64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            change_percent,
            sentiment: None,
            rsi: None,
            time: Utc::now(),
        }
    }

    pub fn with_sentiment(mut self, sentiment: f64) -> Self {
        self.sentiment = Some(sentiment);
        self
    }

    /// Reason this observation cannot be traded on, if any.
    pub fn malformed_reason(&self) -> Option<&'static str> {
        if self.symbol.trim().is_empty() {
            return Some("empty symbol");
        }
        if self.price <= Decimal::ZERO {
            return Some("non-positive price");
        }
        if !self.change_percent.is_finite() {
            return Some("non-finite change percent");
        }
        if self.sentiment.is_some_and(|s| !s.is_finite()) {
            return Some("non-finite sentiment");
        }
        if self.rsi.is_some_and(|r| !r.is_finite()) {
            return Some("non-finite rsi");
        }
        None
    }
}

/// Broader-market reference signal for a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketContext {
    /// Benchmark percent change against its previous close
    pub change_percent: f64,
}

/// Everything the orchestrator needs for one cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketBatch {
    pub observations: Vec<MarketObservation>,

    #[serde(default)]
    pub market_context: Option<MarketContext>,
}

impl MarketBatch {
    pub fn new(observations: Vec<MarketObservation>, market_context: Option<MarketContext>) -> Self {
        Self {
            observations,
            market_context,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Market context, or `None` when its change is not a finite number.
    pub fn usable_context(&self) -> Option<&MarketContext> {
        self.market_context
            .as_ref()
            .filter(|c| c.change_percent.is_finite())
    }
}
