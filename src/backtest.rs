//! Backtesting engine: replays historical bars through an isolated ledger.
//!
//! Features:
//! - Same normalizer, risk monitor and decision policy as live trading
//! - Live predictor used read-only; it is never retrained here
//! - Labeled examples are collected and reported, never stored
//! - Performance statistics over the simulated trade log and equity curve

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::metrics::{PerformanceCalculator, PerformanceMetrics};
use crate::models::{MarketBatch, MarketContext, MarketObservation, Trade, TrainingExample};
use crate::predictor::Predictor;
use crate::trading::{example_channel, Ledger, PositionView, TradingCycle};

/// One historical observation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalBar {
    pub symbol: String,
    pub price: Decimal,
    pub change_percent: f64,

    #[serde(default)]
    pub sentiment: Option<f64>,

    #[serde(default)]
    pub rsi: Option<f64>,

    /// Benchmark change at the same moment
    #[serde(default)]
    pub market_change_percent: Option<f64>,

    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

impl HistoricalBar {
    fn batch(&self) -> MarketBatch {
        let observation = MarketObservation {
            symbol: self.symbol.clone(),
            price: self.price,
            change_percent: self.change_percent,
            sentiment: self.sentiment,
            rsi: self.rsi,
            time: self.time.unwrap_or_else(Utc::now),
        };
        let context = self
            .market_change_percent
            .map(|change_percent| MarketContext { change_percent });

        MarketBatch::new(vec![observation], context)
    }
}

/// Load a JSON array of bars.
pub fn load_bars(path: &Path) -> Result<Vec<HistoricalBar>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read history file {}", path.display()))?;
    serde_json::from_str(&raw).context("Failed to parse history bars")
}

/// Backtest results summary.
#[derive(Debug, Clone)]
pub struct BacktestResults {
    pub initial_capital: Decimal,

    /// Cash plus open positions marked at their last price
    pub final_equity: Decimal,

    /// Total return (0.05 = +5%)
    pub total_return_pct: Decimal,

    /// Bars replayed (malformed ones excluded)
    pub bars: usize,

    /// Full simulated trade log
    pub trades: Vec<Trade>,

    /// Examples the run would have produced
    pub examples: Vec<TrainingExample>,

    pub metrics: PerformanceMetrics,

    /// Positions still open at the end
    pub open_positions: Vec<PositionView>,

    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl std::fmt::Display for BacktestResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n{:=^60}", " BACKTEST RESULTS ")?;
        writeln!(f)?;
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            writeln!(f, "Period: {} to {}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d"))?;
            writeln!(f)?;
        }
        writeln!(f, "--- Capital ---")?;
        writeln!(f, "Initial:     ${:.2}", self.initial_capital)?;
        writeln!(f, "Final:       ${:.2}", self.final_equity)?;
        writeln!(f, "Return:      {:.2}%", self.total_return_pct * dec!(100))?;
        writeln!(f, "Bars:        {}", self.bars)?;
        writeln!(f, "Open:        {}", self.open_positions.len())?;
        writeln!(f)?;
        write!(f, "{}", self.metrics)?;
        writeln!(f)?;
        let positives = self.examples.iter().filter(|e| e.is_positive()).count();
        writeln!(f, "--- Learning ---")?;
        writeln!(f, "Examples:    {} ({} positive)", self.examples.len(), positives)?;
        writeln!(f, "{:=^60}", "")?;
        Ok(())
    }
}

/// Backtesting engine.
pub struct Backtester {
    config: AppConfig,
    predictor: Arc<dyn Predictor>,
}

impl Backtester {
    pub fn new(config: AppConfig, predictor: Arc<dyn Predictor>) -> Self {
        Self { config, predictor }
    }

    /// Replay `bars` in time order (file order when any bar lacks a time).
    pub async fn run(&self, bars: &[HistoricalBar]) -> Result<BacktestResults> {
        if bars.is_empty() {
            anyhow::bail!("No historical bars to replay");
        }

        let mut ordered: Vec<&HistoricalBar> = bars.iter().collect();
        if ordered.iter().all(|b| b.time.is_some()) {
            ordered.sort_by_key(|b| b.time);
        }

        info!(
            bars = ordered.len(),
            trained = self.predictor.is_trained(),
            "Starting backtest"
        );

        let (sender, mut rx) = example_channel();
        let ledger = Ledger::new(&self.config.ledger).with_example_sender(sender);
        let ledger = Arc::new(Mutex::new(ledger));
        let cycle = TradingCycle::from_config(ledger.clone(), self.predictor.clone(), &self.config);

        let initial_capital = self.config.ledger.initial_cash;
        let mut equity_curve = vec![initial_capital];
        let mut replayed = 0;

        for bar in &ordered {
            let report = cycle.run(&bar.batch()).await;
            replayed += report.decisions.len();
            equity_curve.push(report.equity);
            debug!(symbol = %bar.symbol, price = %bar.price, equity = %report.equity, "Bar replayed");
        }

        let mut examples = Vec::new();
        while let Ok(example) = rx.try_recv() {
            examples.push(example);
        }

        let status = ledger.lock().await.status();
        let final_equity = status.equity;
        let total_return_pct = if initial_capital > Decimal::ZERO {
            (final_equity - initial_capital) / initial_capital
        } else {
            Decimal::ZERO
        };
        let metrics = PerformanceCalculator::calculate(&status.trades, &equity_curve);

        info!(
            final_equity = %final_equity,
            trades = status.trades.len(),
            examples = examples.len(),
            "Backtest complete"
        );

        Ok(BacktestResults {
            initial_capital,
            final_equity,
            total_return_pct,
            bars: replayed,
            trades: status.trades,
            examples,
            metrics,
            open_positions: status.positions,
            start_time: ordered.first().and_then(|b| b.time),
            end_time: ordered.last().and_then(|b| b.time),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::TrainingSummary;
    use crate::trading::PolicyConfig;

    struct ConstantPredictor(f64);

    impl Predictor for ConstantPredictor {
        fn score(&self, _features: &[f64]) -> Option<f64> {
            Some(self.0)
        }

        fn retrain(&self, _examples: &[TrainingExample]) -> Result<TrainingSummary> {
            anyhow::bail!("constant predictor cannot be trained")
        }

        fn is_trained(&self) -> bool {
            true
        }
    }

    fn config() -> AppConfig {
        AppConfig {
            policy: PolicyConfig {
                take_profit_fraction: dec!(0.05),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn bars(json: &str) -> Vec<HistoricalBar> {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn test_trailing_stop_replay() {
        let history = bars(
            r#"[
                {"symbol": "AAPL", "price": 150, "changePercent": 1.8, "time": "2024-03-01T15:00:00Z"},
                {"symbol": "AAPL", "price": 153, "changePercent": 2.0, "time": "2024-03-01T15:15:00Z"},
                {"symbol": "AAPL", "price": 150, "changePercent": 0.0, "time": "2024-03-01T15:30:00Z"},
                {"symbol": "AAPL", "price": 149.9, "changePercent": -0.1, "time": "2024-03-01T15:45:00Z"}
            ]"#,
        );

        let backtester = Backtester::new(config(), Arc::new(ConstantPredictor(0.7)));
        let results = backtester.run(&history).await.unwrap();

        assert_eq!(results.bars, 4);
        assert_eq!(results.trades.len(), 2);
        // 8050 + 13 * 149.9
        assert_eq!(results.final_equity, dec!(9998.70));
        assert!(results.open_positions.is_empty());
        assert_eq!(results.examples.len(), 1);
        assert_eq!(results.examples[0].label, 0);
        assert_eq!(results.metrics.closed_trades, 1);
        assert_eq!(results.metrics.total_pnl, dec!(-1.30));
    }

    #[tokio::test]
    async fn test_bars_sorted_by_time() {
        let history = bars(
            r#"[
                {"symbol": "NVDA", "price": 110, "changePercent": 0.5, "time": "2024-03-01T15:15:00Z"},
                {"symbol": "NVDA", "price": 100, "changePercent": 2.0, "time": "2024-03-01T15:00:00Z"}
            ]"#,
        );

        let backtester = Backtester::new(config(), Arc::new(ConstantPredictor(0.9)));
        let results = backtester.run(&history).await.unwrap();

        // Bought at 100 first, then take profit at 110
        assert_eq!(results.trades[0].price, dec!(100));
        assert_eq!(results.trades[1].reason.as_deref(), Some("take profit"));
        assert_eq!(results.examples[0].label, 1);
        assert!(results.final_equity > results.initial_capital);
    }

    #[tokio::test]
    async fn test_empty_history_is_rejected() {
        let backtester = Backtester::new(config(), Arc::new(ConstantPredictor(0.9)));
        assert!(backtester.run(&[]).await.is_err());
    }
}
