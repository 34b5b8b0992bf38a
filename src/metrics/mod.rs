//! Portfolio performance metrics.

mod calculator;

pub use calculator::PerformanceCalculator;

use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;

/// Performance summary over closed trades and the equity curve.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceMetrics {
    // === Win/Loss ===
    /// Number of SELL trades
    pub closed_trades: usize,

    pub winning_trades: usize,

    pub losing_trades: usize,

    /// Win rate (0.0 to 1.0)
    pub win_rate: f64,

    /// Total realized P&L
    pub total_pnl: Decimal,

    /// Average profit on winning trades
    pub avg_win: Decimal,

    /// Average loss on losing trades (absolute value)
    pub avg_loss: Decimal,

    /// Gross profit / gross loss
    pub profit_factor: f64,

    /// Mean realized P&L per closed trade
    pub expectancy: Decimal,

    // === Risk ===
    /// Maximum drawdown (0.0 to 1.0)
    pub max_drawdown: f64,

    /// Maximum drawdown in dollars
    pub max_drawdown_usd: Decimal,

    pub peak_equity: Decimal,

    /// Annualized Sharpe ratio
    pub sharpe_ratio: f64,

    /// Annualized Sortino ratio
    pub sortino_ratio: f64,
}

impl fmt::Display for PerformanceMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Trades ---")?;
        writeln!(f, "Closed:        {}", self.closed_trades)?;
        writeln!(f, "Winners:       {} ({:.1}%)", self.winning_trades, self.win_rate * 100.0)?;
        writeln!(f, "Losers:        {}", self.losing_trades)?;
        writeln!(f, "Total P&L:     ${:.2}", self.total_pnl)?;
        writeln!(f, "Avg Win:       ${:.2}", self.avg_win)?;
        writeln!(f, "Avg Loss:      ${:.2}", self.avg_loss)?;
        writeln!(f, "Profit Factor: {:.2}", self.profit_factor)?;
        writeln!(f, "Expectancy:    ${:.2}", self.expectancy)?;
        writeln!(f, "--- Risk ---")?;
        writeln!(f, "Max Drawdown:  {:.2}% (${:.2})", self.max_drawdown * 100.0, self.max_drawdown_usd)?;
        writeln!(f, "Sharpe Ratio:  {:.2}", self.sharpe_ratio)?;
        writeln!(f, "Sortino Ratio: {:.2}", self.sortino_ratio)
    }
}
