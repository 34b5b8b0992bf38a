//! Open position held by the ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::FeatureVector;

/// An open long position in one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Ticker symbol
    pub symbol: String,

    /// Number of shares held (always > 0)
    pub amount: u32,

    /// Fill price at entry
    pub entry_price: Decimal,

    /// Most recent known market price
    pub current_price: Decimal,

    /// Highest price seen since entry (never decreases)
    pub high_price: Decimal,

    /// Normalized features the entry decision was scored on
    pub entry_features: FeatureVector,

    /// Predictor confidence at entry, if the entry was model-driven
    #[serde(default)]
    pub confidence: Option<f64>,

    /// When the position was opened
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Open a new position at the given fill price.
    pub fn open(
        symbol: String,
        amount: u32,
        price: Decimal,
        entry_features: FeatureVector,
        confidence: Option<f64>,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol,
            amount,
            entry_price: price,
            current_price: price,
            high_price: price,
            entry_features,
            confidence,
            opened_at,
        }
    }

    /// Refresh the live price and ratchet the high-water mark.
    pub(crate) fn mark_price(&mut self, price: Decimal) {
        self.current_price = price;
        if price > self.high_price {
            self.high_price = price;
        }
    }

    pub fn shares(&self) -> Decimal {
        Decimal::from(self.amount)
    }

    /// Value at the last known price.
    pub fn market_value(&self) -> Decimal {
        self.current_price * self.shares()
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        (self.current_price - self.entry_price) * self.shares()
    }

    /// Fractional gain at `price` relative to entry (0.02 = +2%).
    pub fn return_at(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (price - self.entry_price) / self.entry_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position() -> Position {
        Position::open(
            "AAPL".to_string(),
            10,
            dec!(100),
            vec![0.5, 0.5, 0.5],
            Some(0.7),
            Utc::now(),
        )
    }

    #[test]
    fn test_position_pnl() {
        let mut pos = position();
        assert_eq!(pos.market_value(), dec!(1000));
        assert_eq!(pos.unrealized_pnl(), dec!(0));

        pos.mark_price(dec!(112));
        assert_eq!(pos.market_value(), dec!(1120));
        assert_eq!(pos.unrealized_pnl(), dec!(120));
        assert_eq!(pos.return_at(dec!(112)), dec!(0.12));
    }

    #[test]
    fn test_high_price_ratchets() {
        let mut pos = position();
        pos.mark_price(dec!(105));
        pos.mark_price(dec!(101));
        assert_eq!(pos.high_price, dec!(105));
        assert_eq!(pos.current_price, dec!(101));

        pos.mark_price(dec!(107));
        assert_eq!(pos.high_price, dec!(107));
        assert!(pos.high_price >= pos.entry_price);
    }
}
