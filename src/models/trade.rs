//! Trade records appended to the ledger's audit log.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "BUY",
            TradeAction::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Some(TradeAction::Buy),
            "SELL" => Some(TradeAction::Sell),
            _ => None,
        }
    }
}

/// Immutable record of one executed ledger operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    /// Unique trade identifier
    pub id: String,

    /// Trade direction
    pub action: TradeAction,

    /// Ticker symbol
    pub symbol: String,

    /// Fill price per share
    pub price: Decimal,

    /// Number of shares
    pub amount: u32,

    /// Realized profit (SELL only)
    #[serde(default)]
    pub profit: Option<Decimal>,

    /// Why the position was closed (SELL only)
    #[serde(default)]
    pub reason: Option<String>,

    /// Predictor confidence attached to the position
    #[serde(default)]
    pub confidence: Option<f64>,

    /// When the trade was executed
    pub time: DateTime<Utc>,
}

impl Trade {
    pub fn buy(
        symbol: &str,
        price: Decimal,
        amount: u32,
        confidence: Option<f64>,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action: TradeAction::Buy,
            symbol: symbol.to_string(),
            price,
            amount,
            profit: None,
            reason: None,
            confidence,
            time,
        }
    }

    pub fn sell(
        symbol: &str,
        price: Decimal,
        amount: u32,
        profit: Decimal,
        reason: &str,
        confidence: Option<f64>,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action: TradeAction::Sell,
            symbol: symbol.to_string(),
            price,
            amount,
            profit: Some(profit),
            reason: Some(reason.to_string()),
            confidence,
            time,
        }
    }

    /// Cash moved by this trade.
    pub fn notional(&self) -> Decimal {
        self.price * Decimal::from(self.amount)
    }
}
