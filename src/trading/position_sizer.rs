//! Fixed-fraction position sizing.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Calculator for whole-share position sizes.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    allocation_fraction: Decimal,
}

impl PositionSizer {
    /// Create a sizer that commits `allocation_fraction` of equity per position.
    pub fn new(allocation_fraction: Decimal) -> Self {
        Self {
            allocation_fraction,
        }
    }

    /// Calculate the number of shares to buy.
    ///
    /// `floor(equity * fraction / price)`, clamped to what `available_cash`
    /// can pay for. Zero means "skip, insufficient liquidity".
    pub fn size(&self, equity: Decimal, price: Decimal, available_cash: Decimal) -> u32 {
        if price <= Decimal::ZERO || equity <= Decimal::ZERO || available_cash <= Decimal::ZERO {
            return 0;
        }

        let target = whole_shares(equity * self.allocation_fraction / price);

        if Decimal::from(target) * price > available_cash {
            return whole_shares(available_cash / price);
        }

        target
    }
}

/// Floor to whole shares, saturating at `u32::MAX`.
fn whole_shares(raw: Decimal) -> u32 {
    raw.floor()
        .min(Decimal::from(u32::MAX))
        .to_u32()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fixed_fraction_sizing() {
        let sizer = PositionSizer::new(dec!(0.20));

        // 10000 * 0.20 / 50 = 40
        assert_eq!(sizer.size(dec!(10000), dec!(50), dec!(10000)), 40);

        // 2000 / 150 = 13.33 -> 13
        assert_eq!(sizer.size(dec!(10000), dec!(150), dec!(10000)), 13);
    }

    #[test]
    fn test_clamped_to_cash() {
        let sizer = PositionSizer::new(dec!(0.20));

        // Wants 40 shares (2000) but only 1500 cash: floor(1500 / 50) = 30
        assert_eq!(sizer.size(dec!(10000), dec!(50), dec!(1500)), 30);
    }

    #[test]
    fn test_zero_when_too_expensive() {
        let sizer = PositionSizer::new(dec!(0.20));

        assert_eq!(sizer.size(dec!(1000), dec!(500), dec!(1000)), 0);
        assert_eq!(sizer.size(dec!(10000), dec!(50), dec!(40)), 0);
        assert_eq!(sizer.size(dec!(10000), dec!(0), dec!(10000)), 0);
    }

    #[test]
    fn test_huge_order_saturates() {
        let sizer = PositionSizer::new(dec!(0.20));

        // floor(2e8 / 0.01) = 2e10 shares, capped at u32::MAX and still affordable
        assert_eq!(sizer.size(dec!(1000000000), dec!(0.01), dec!(1000000000)), u32::MAX);

        // Saturated target exceeds cash: floor(1e6 / 0.01)
        assert_eq!(sizer.size(dec!(1000000000), dec!(0.01), dec!(1000000)), 100_000_000);
    }
}
