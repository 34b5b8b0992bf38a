//! Calculator for portfolio performance: win rate, drawdown, Sharpe, etc.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;

use crate::models::{Trade, TradeAction};

use super::PerformanceMetrics;

/// Trading periods per year used to annualize per-step returns.
const PERIODS_PER_YEAR: f64 = 252.0;

/// Computes [`PerformanceMetrics`] from the trade log and equity curve.
pub struct PerformanceCalculator;

impl PerformanceCalculator {
    /// `trades` is the ledger's audit log; only SELL records carry realized P&L.
    /// `equity_curve` is equity sampled once per cycle, oldest first.
    pub fn calculate(trades: &[Trade], equity_curve: &[Decimal]) -> PerformanceMetrics {
        let mut metrics = PerformanceMetrics::default();

        let pnls: Vec<Decimal> = trades
            .iter()
            .filter(|t| t.action == TradeAction::Sell)
            .filter_map(|t| t.profit)
            .collect();

        if !pnls.is_empty() {
            Self::calculate_pnl_metrics(&mut metrics, &pnls);
        }

        Self::calculate_drawdown(&mut metrics, equity_curve);
        Self::calculate_sharpe_sortino(&mut metrics, equity_curve);

        metrics
    }

    /// Calculate P&L-related metrics from closed trade outcomes.
    fn calculate_pnl_metrics(metrics: &mut PerformanceMetrics, pnls: &[Decimal]) {
        let (wins, losses): (Vec<Decimal>, Vec<Decimal>) =
            pnls.iter().partition(|&&p| p > Decimal::ZERO);

        metrics.closed_trades = pnls.len();
        metrics.winning_trades = wins.len();
        metrics.losing_trades = losses.len();
        metrics.total_pnl = pnls.iter().copied().sum();
        metrics.win_rate = wins.len() as f64 / pnls.len() as f64;

        let gross_profit: Decimal = wins.iter().copied().sum();
        let gross_loss: Decimal = losses.iter().map(|l| l.abs()).sum();

        if !wins.is_empty() {
            metrics.avg_win = gross_profit / Decimal::from(wins.len());
        }
        if !losses.is_empty() {
            metrics.avg_loss = gross_loss / Decimal::from(losses.len());
        }

        if gross_loss > Decimal::ZERO {
            metrics.profit_factor =
                gross_profit.to_f64().unwrap_or(0.0) / gross_loss.to_f64().unwrap_or(1.0);
        }

        metrics.expectancy = metrics.total_pnl / Decimal::from(pnls.len());
    }

    /// Calculate maximum drawdown from the equity curve.
    fn calculate_drawdown(metrics: &mut PerformanceMetrics, equity_curve: &[Decimal]) {
        let mut peak = Decimal::ZERO;
        let mut max_dd = Decimal::ZERO;
        let mut max_dd_pct = 0.0f64;

        for &equity in equity_curve {
            if equity > peak {
                peak = equity;
            }

            if peak > Decimal::ZERO {
                let dd = peak - equity;
                if dd > max_dd {
                    max_dd = dd;
                }

                let dd_pct = (dd / peak).to_f64().unwrap_or(0.0);
                if dd_pct > max_dd_pct {
                    max_dd_pct = dd_pct;
                }
            }
        }

        metrics.max_drawdown = max_dd_pct;
        metrics.max_drawdown_usd = max_dd;
        metrics.peak_equity = peak;
    }

    /// Calculate annualized Sharpe and Sortino ratios from per-step returns.
    fn calculate_sharpe_sortino(metrics: &mut PerformanceMetrics, equity_curve: &[Decimal]) {
        let returns: Vec<f64> = equity_curve
            .windows(2)
            .filter_map(|w| {
                let prev = w[0].to_f64()?;
                let curr = w[1].to_f64()?;
                (prev > 0.0).then(|| (curr - prev) / prev)
            })
            .collect();

        if returns.len() < 2 {
            return;
        }

        let mean = returns.iter().mean();
        let std_dev = returns.iter().std_dev();

        // Zero risk-free rate
        if std_dev > 0.0 {
            metrics.sharpe_ratio = (mean / std_dev) * PERIODS_PER_YEAR.sqrt();
        }

        let negative_returns: Vec<f64> = returns.iter().copied().filter(|&r| r < 0.0).collect();
        if negative_returns.len() >= 2 {
            let downside_dev = negative_returns.iter().std_dev();
            if downside_dev > 0.0 {
                metrics.sortino_ratio = (mean / downside_dev) * PERIODS_PER_YEAR.sqrt();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn sell(profit: Decimal) -> Trade {
        Trade::sell("AAPL", dec!(100), 10, profit, "take profit", None, Utc::now())
    }

    #[test]
    fn test_calculate_pnl_metrics() {
        let trades = vec![
            Trade::buy("AAPL", dec!(100), 10, None, Utc::now()),
            sell(dec!(100)),  // Win
            sell(dec!(-50)),  // Loss
            sell(dec!(200)),  // Win
            sell(dec!(-30)),  // Loss
            sell(dec!(150)),  // Win
        ];

        let metrics = PerformanceCalculator::calculate(&trades, &[]);

        assert_eq!(metrics.closed_trades, 5);
        assert_eq!(metrics.winning_trades, 3);
        assert_eq!(metrics.losing_trades, 2);
        assert_eq!(metrics.total_pnl, dec!(370));
        assert_eq!(metrics.avg_win, dec!(150));
        assert_eq!(metrics.avg_loss, dec!(40));
        assert!((metrics.win_rate - 0.6).abs() < 1e-9);
        assert!((metrics.profit_factor - 450.0 / 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_calculate_drawdown() {
        let curve = vec![
            dec!(10000),
            dec!(10500),
            dec!(9450),  // DD: 1050 (10%)
            dec!(9900),
            dec!(11000),
        ];

        let metrics = PerformanceCalculator::calculate(&[], &curve);

        assert!((metrics.max_drawdown - 0.10).abs() < 1e-9);
        assert_eq!(metrics.max_drawdown_usd, dec!(1050));
        assert_eq!(metrics.peak_equity, dec!(11000));
    }

    #[test]
    fn test_sharpe_sign_follows_returns() {
        let rising = vec![dec!(100), dec!(101), dec!(103), dec!(104), dec!(106)];
        let falling = vec![dec!(100), dec!(99), dec!(97), dec!(96), dec!(94)];

        assert!(PerformanceCalculator::calculate(&[], &rising).sharpe_ratio > 0.0);
        assert!(PerformanceCalculator::calculate(&[], &falling).sharpe_ratio < 0.0);
    }

    #[test]
    fn test_empty_inputs() {
        let metrics = PerformanceCalculator::calculate(&[], &[]);
        assert_eq!(metrics.closed_trades, 0);
        assert_eq!(metrics.sharpe_ratio, 0.0);
        assert_eq!(metrics.max_drawdown, 0.0);
    }
}
