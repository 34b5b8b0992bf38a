//! Trading cycle orchestrator: drives risk monitor, decision policy and ledger
//! for every observation in a batch.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::models::{MarketBatch, MarketContext, MarketObservation, Trade};
use crate::predictor::Predictor;

use super::{
    Action, BuyOutcome, Decision, DecisionPolicy, EntryContext, ExitReason, FeatureNormalizer,
    Ledger, RiskMonitor, SellOutcome,
};

/// An observation dropped before reaching the policy.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedObservation {
    pub symbol: String,
    pub reason: String,
}

/// Everything that happened in one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub decisions: Vec<Decision>,
    pub trades: Vec<Trade>,
    pub skipped: Vec<SkippedObservation>,
    pub equity: Decimal,
}

impl CycleReport {
    pub fn count(&self, action: Action) -> usize {
        self.decisions.iter().filter(|d| d.action == action).count()
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n{:=^60}", " CYCLE REPORT ")?;
        writeln!(f, "Started:            {}", self.started_at.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f, "Observations:       {}", self.decisions.len() + self.skipped.len())?;
        writeln!(f, "Buys / Sells:       {} / {}", self.count(Action::Buy), self.count(Action::Sell))?;
        writeln!(f, "Skipped:            {}", self.skipped.len())?;
        writeln!(f, "Equity:             ${:.2}", self.equity)?;
        writeln!(f, "\n{:-^60}", " DECISIONS ")?;
        for d in &self.decisions {
            writeln!(f, "{:<6} {:<11} {}", d.symbol, d.action.as_str(), d.reason)?;
        }
        writeln!(f, "{:=^60}", "")
    }
}

/// Runs one decision pass over a market batch.
pub struct TradingCycle {
    ledger: Arc<Mutex<Ledger>>,
    predictor: Arc<dyn Predictor>,
    normalizer: FeatureNormalizer,
    risk: RiskMonitor,
    policy: DecisionPolicy,
}

impl TradingCycle {
    pub fn new(
        ledger: Arc<Mutex<Ledger>>,
        predictor: Arc<dyn Predictor>,
        normalizer: FeatureNormalizer,
        risk: RiskMonitor,
        policy: DecisionPolicy,
    ) -> Self {
        Self {
            ledger,
            predictor,
            normalizer,
            risk,
            policy,
        }
    }

    pub fn from_config(
        ledger: Arc<Mutex<Ledger>>,
        predictor: Arc<dyn Predictor>,
        config: &AppConfig,
    ) -> Self {
        Self::new(
            ledger,
            predictor,
            FeatureNormalizer::new(config.normalization.clone()),
            RiskMonitor::new(&config.risk),
            DecisionPolicy::new(config.policy.clone()),
        )
    }

    pub fn ledger(&self) -> &Arc<Mutex<Ledger>> {
        &self.ledger
    }

    pub fn normalizer(&self) -> &FeatureNormalizer {
        &self.normalizer
    }

    /// Process every observation, executing BUY/SELL decisions.
    pub async fn run(&self, batch: &MarketBatch) -> CycleReport {
        let started_at = Utc::now();
        let context = batch.usable_context();
        if batch.market_context.is_some() && context.is_none() {
            warn!("Non-finite market context, scoring without it");
        }
        let mut decisions = Vec::with_capacity(batch.observations.len());
        let mut skipped = Vec::new();

        let trade_mark = self.ledger.lock().await.trades().len();

        for observation in &batch.observations {
            if let Some(reason) = observation.malformed_reason() {
                warn!(symbol = %observation.symbol, reason, "Malformed observation, skipping");
                skipped.push(SkippedObservation {
                    symbol: observation.symbol.clone(),
                    reason: reason.to_string(),
                });
                continue;
            }

            decisions.push(self.process(observation, context).await);
        }

        let ledger = self.ledger.lock().await;
        let report = CycleReport {
            started_at,
            decisions,
            trades: ledger.trades_since(trade_mark).to_vec(),
            skipped,
            equity: ledger.equity(),
        };

        info!(
            observations = batch.observations.len(),
            buys = report.count(Action::Buy),
            sells = report.count(Action::Sell),
            skipped = report.skipped.len(),
            equity = %report.equity,
            "Cycle complete"
        );

        report
    }

    /// Decisions for a batch without touching the ledger.
    pub async fn decide_only(&self, batch: &MarketBatch) -> Vec<Decision> {
        let context = batch.usable_context();
        let ledger = self.ledger.lock().await;

        batch
            .observations
            .iter()
            .filter(|o| o.malformed_reason().is_none())
            .map(|observation| {
                let confidence = self
                    .predictor
                    .score(&self.normalizer.features(observation, context));
                let position = ledger.position(&observation.symbol);
                let stop = position.and_then(|p| self.risk.check_at(p, observation.price));
                self.policy
                    .decide(observation, position, confidence, context, stop.as_ref())
            })
            .collect()
    }

    async fn process(
        &self,
        observation: &MarketObservation,
        context: Option<&MarketContext>,
    ) -> Decision {
        let symbol = observation.symbol.as_str();
        let features = self.normalizer.features(observation, context);
        let confidence = self.predictor.score(&features);

        // Held for the whole symbol step so same-symbol calls serialize
        let mut ledger = self.ledger.lock().await;

        let stop = if ledger.update_price(symbol, observation.price) {
            ledger.position(symbol).and_then(|p| self.risk.check(p))
        } else {
            None
        };

        let decision = self.policy.decide(
            observation,
            ledger.position(symbol),
            confidence,
            context,
            stop.as_ref(),
        );

        match decision.action {
            Action::Buy => {
                let entry = EntryContext::new(features, confidence).at(observation.time);
                match ledger.buy(symbol, observation.price, entry) {
                    BuyOutcome::Filled(_) => {}
                    BuyOutcome::AlreadyHolding => {
                        warn!(symbol = %symbol, "Policy chose BUY for a held symbol");
                    }
                    BuyOutcome::InsufficientFunds => {
                        debug!(symbol = %symbol, "Buy skipped for size");
                    }
                }
            }
            Action::Sell => {
                let reason = decision.exit_reason.unwrap_or(ExitReason::SignalDecay);
                if let SellOutcome::NoPosition =
                    ledger.sell_at(symbol, observation.price, reason, observation.time)
                {
                    warn!(symbol = %symbol, reason = %reason, "Policy chose SELL with no open position");
                }
            }
            Action::Hold => {
                if let Some(position) = ledger.position(symbol) {
                    debug!(
                        symbol = %symbol,
                        price = %observation.price,
                        high = %position.high_price,
                        stop = %self.risk.stop_price(position),
                        reason = %decision.reason,
                        "Holding"
                    );
                }
            }
            Action::DoNothing => {
                debug!(symbol = %symbol, reason = %decision.reason, "No trade");
            }
        }

        decision
    }
}
