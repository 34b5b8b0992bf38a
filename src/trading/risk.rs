//! Trailing-stop monitor over ledger-owned positions.
//!
//! The monitor never mutates positions; the ledger ratchets `high_price` on
//! every price update and the monitor only reads it back.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;

use crate::models::Position;

use super::RiskConfig;

/// A fired trailing stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrailingStop {
    pub high_price: Decimal,
    pub current_price: Decimal,
    /// `(high - current) / high`
    pub drop_fraction: Decimal,
}

/// Computes forced exits from each position's high-water mark.
#[derive(Debug, Clone)]
pub struct RiskMonitor {
    trail_stop_fraction: Decimal,
}

impl RiskMonitor {
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            trail_stop_fraction: config.trail_stop_fraction,
        }
    }

    /// Check the position at its last marked price.
    pub fn check(&self, position: &Position) -> Option<TrailingStop> {
        self.check_at(position, position.current_price)
    }

    /// Check the position against `price`, treating `price` as already marked.
    pub fn check_at(&self, position: &Position, price: Decimal) -> Option<TrailingStop> {
        let high_price = position.high_price.max(price);
        if high_price <= Decimal::ZERO {
            return None;
        }

        let drop_fraction = (high_price - price) / high_price;
        if drop_fraction < self.trail_stop_fraction {
            return None;
        }

        warn!(
            symbol = %position.symbol,
            high = %high_price,
            price = %price,
            drop_pct = %(drop_fraction * Decimal::ONE_HUNDRED).round_dp(2),
            "Trailing stop triggered"
        );

        Some(TrailingStop {
            high_price,
            current_price: price,
            drop_fraction,
        })
    }

    /// Price at which the trailing stop currently fires.
    pub fn stop_price(&self, position: &Position) -> Decimal {
        position.high_price * (Decimal::ONE - self.trail_stop_fraction)
    }
}
