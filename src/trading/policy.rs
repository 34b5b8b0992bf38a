//! Decision policy: maps an observation and position state to one action.
//!
//! Two logical states per symbol. FLAT only leaves via BUY, HELD only leaves
//! via SELL, and HOLD / DO_NOTHING are self-loops.
//!
//! Exit rules (HELD, first match wins):
//! 1. Trailing stop signaled by the risk monitor
//! 2. Take profit
//! 3. Stop loss
//! 4. Signal decay (confidence or sentiment collapse)
//!
//! Entry rules (FLAT): confidence above threshold plus corroborating
//! momentum, sentiment, RSI and market-regime checks.

use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use crate::models::{MarketContext, MarketObservation, Position};

use super::{PolicyConfig, TrailingStop};

/// Action chosen for a symbol this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
    DoNothing,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::Hold => "HOLD",
            Action::DoNothing => "DO_NOTHING",
        }
    }
}

/// Why a held position is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitReason {
    TrailingStop,
    TakeProfit,
    StopLoss,
    SignalDecay,
    ManualExit,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TrailingStop => "trailing stop",
            ExitReason::TakeProfit => "take profit",
            ExitReason::StopLoss => "stop loss",
            ExitReason::SignalDecay => "signal decay",
            ExitReason::ManualExit => "manual exit",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy output: an action and a human-readable reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub symbol: String,
    pub action: Action,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<ExitReason>,
    pub confidence: Option<f64>,
}

impl Decision {
    fn new(symbol: &str, action: Action, reason: impl Into<String>, confidence: Option<f64>) -> Self {
        Self {
            symbol: symbol.to_string(),
            action,
            reason: reason.into(),
            exit_reason: None,
            confidence,
        }
    }

    fn exit(symbol: &str, reason: ExitReason, confidence: Option<f64>) -> Self {
        Self {
            symbol: symbol.to_string(),
            action: Action::Sell,
            reason: reason.as_str().to_string(),
            exit_reason: Some(reason),
            confidence,
        }
    }
}

/// Threshold-driven decision policy.
#[derive(Debug, Clone)]
pub struct DecisionPolicy {
    config: PolicyConfig,
}

impl DecisionPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    /// Decide what to do with `observation.symbol` this cycle.
    ///
    /// `confidence` is the predictor's score for the current features, or
    /// `None` when no trained predictor is available. `trailing_stop` is the
    /// risk monitor's verdict for a held position.
    pub fn decide(
        &self,
        observation: &MarketObservation,
        position: Option<&Position>,
        confidence: Option<f64>,
        market: Option<&MarketContext>,
        trailing_stop: Option<&TrailingStop>,
    ) -> Decision {
        match position {
            Some(position) => self.decide_exit(observation, position, confidence, trailing_stop),
            None => self.decide_entry(observation, confidence, market),
        }
    }

    fn decide_exit(
        &self,
        observation: &MarketObservation,
        position: &Position,
        confidence: Option<f64>,
        trailing_stop: Option<&TrailingStop>,
    ) -> Decision {
        let symbol = &observation.symbol;

        if trailing_stop.is_some() {
            return Decision::exit(symbol, ExitReason::TrailingStop, confidence);
        }

        let gain = position.return_at(observation.price);
        if gain >= self.config.take_profit_fraction {
            debug!(symbol = %symbol, gain = %gain, "Take profit reached");
            return Decision::exit(symbol, ExitReason::TakeProfit, confidence);
        }
        if gain <= -self.config.stop_loss_fraction {
            debug!(symbol = %symbol, gain = %gain, "Stop loss reached");
            return Decision::exit(symbol, ExitReason::StopLoss, confidence);
        }

        if let Some(score) = confidence {
            if score < self.config.exit_confidence_threshold {
                debug!(symbol = %symbol, confidence = score, "Confidence decayed");
                return Decision::exit(symbol, ExitReason::SignalDecay, confidence);
            }
        }
        if let Some(sentiment) = observation.sentiment {
            if sentiment < self.config.exit_sentiment_floor {
                debug!(symbol = %symbol, sentiment, "Sentiment collapsed");
                return Decision::exit(symbol, ExitReason::SignalDecay, confidence);
            }
        }

        Decision::new(
            symbol,
            Action::Hold,
            format!("holding at {:+.2}%", gain * Decimal::ONE_HUNDRED),
            confidence,
        )
    }

    fn decide_entry(
        &self,
        observation: &MarketObservation,
        confidence: Option<f64>,
        market: Option<&MarketContext>,
    ) -> Decision {
        let symbol = &observation.symbol;

        let Some(score) = confidence else {
            return Decision::new(symbol, Action::DoNothing, "no confidence available", None);
        };

        if score <= self.config.entry_confidence_threshold {
            return Decision::new(
                symbol,
                Action::DoNothing,
                format!(
                    "confidence {:.3} <= {}",
                    score, self.config.entry_confidence_threshold
                ),
                confidence,
            );
        }

        if let Some(veto) = self.entry_veto(observation, market) {
            return Decision::new(symbol, Action::DoNothing, veto, confidence);
        }

        Decision::new(
            symbol,
            Action::Buy,
            format!("confidence {:.3}", score),
            confidence,
        )
    }

    /// First corroborating condition that fails, if any.
    fn entry_veto(
        &self,
        observation: &MarketObservation,
        market: Option<&MarketContext>,
    ) -> Option<String> {
        if self.config.require_positive_momentum && observation.change_percent <= 0.0 {
            return Some(format!(
                "no upward momentum ({:+.2}%)",
                observation.change_percent
            ));
        }

        if let Some(ctx) = market {
            if ctx.change_percent <= self.config.market_meltdown_pct {
                return Some(format!("market meltdown ({:+.2}%)", ctx.change_percent));
            }
        }

        if let Some(sentiment) = observation.sentiment {
            if sentiment < self.config.entry_sentiment_floor {
                return Some(format!("negative sentiment ({:.2})", sentiment));
            }
        }

        if let (Some(rsi), Some(max_rsi)) = (observation.rsi, self.config.max_entry_rsi) {
            if rsi > max_rsi {
                return Some(format!("overbought (rsi {:.1})", rsi));
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn policy() -> DecisionPolicy {
        DecisionPolicy::new(PolicyConfig::default())
    }

    fn held(entry: Decimal) -> Position {
        Position::open("AAPL".to_string(), 10, entry, vec![0.5; 3], Some(0.7), Utc::now())
    }

    fn obs(price: Decimal, change: f64) -> MarketObservation {
        MarketObservation::new("AAPL", price, change)
    }

    #[test]
    fn test_buy_when_confident_and_moving() {
        let decision = policy().decide(&obs(dec!(100), 2.0), None, Some(0.8), None, None);
        assert_eq!(decision.action, Action::Buy);
    }

    #[test]
    fn test_no_buy_at_threshold() {
        let decision = policy().decide(&obs(dec!(100), 2.0), None, Some(0.6), None, None);
        assert_eq!(decision.action, Action::DoNothing);
    }

    #[test]
    fn test_no_buy_without_confidence() {
        let decision = policy().decide(&obs(dec!(100), 2.0), None, None, None, None);
        assert_eq!(decision.action, Action::DoNothing);
        assert_eq!(decision.reason, "no confidence available");
    }

    #[test]
    fn test_entry_vetoes() {
        let p = policy();

        let falling = p.decide(&obs(dec!(100), -2.0), None, Some(0.9), None, None);
        assert_eq!(falling.action, Action::DoNothing);
        assert!(falling.reason.contains("momentum"));

        let meltdown = p.decide(
            &obs(dec!(100), 2.0),
            None,
            Some(0.9),
            Some(&MarketContext { change_percent: -2.5 }),
            None,
        );
        assert!(meltdown.reason.contains("meltdown"));

        let bad_news = p.decide(&obs(dec!(100), 2.0).with_sentiment(-0.5), None, Some(0.9), None, None);
        assert!(bad_news.reason.contains("sentiment"));

        let mut hot = obs(dec!(100), 2.0);
        hot.rsi = Some(82.0);
        let overbought = p.decide(&hot, None, Some(0.9), None, None);
        assert!(overbought.reason.contains("overbought"));
    }

    #[test]
    fn test_exit_priority_trailing_stop_first() {
        let pos = held(dec!(100));
        let stop = TrailingStop {
            high_price: dec!(110),
            current_price: dec!(107),
            drop_fraction: dec!(0.027),
        };

        // Would also be take-profit, but the trailing stop wins
        let decision = policy().decide(&obs(dec!(107), 1.0), Some(&pos), Some(0.9), None, Some(&stop));
        assert_eq!(decision.action, Action::Sell);
        assert_eq!(decision.exit_reason, Some(ExitReason::TrailingStop));
        assert_eq!(decision.reason, "trailing stop");
    }

    #[test]
    fn test_take_profit_and_stop_loss() {
        let pos = held(dec!(100));
        let p = policy();

        let tp = p.decide(&obs(dec!(102), 1.0), Some(&pos), Some(0.9), None, None);
        assert_eq!(tp.exit_reason, Some(ExitReason::TakeProfit));

        let sl = p.decide(&obs(dec!(99), -1.0), Some(&pos), Some(0.9), None, None);
        assert_eq!(sl.exit_reason, Some(ExitReason::StopLoss));
        assert_eq!(sl.reason, "stop loss");
    }

    #[test]
    fn test_signal_decay() {
        let pos = held(dec!(100));
        let p = policy();

        let weak = p.decide(&obs(dec!(100.5), 0.2), Some(&pos), Some(0.2), None, None);
        assert_eq!(weak.exit_reason, Some(ExitReason::SignalDecay));

        let toxic = p.decide(
            &obs(dec!(100.5), 0.2).with_sentiment(-0.9),
            Some(&pos),
            Some(0.7),
            None,
            None,
        );
        assert_eq!(toxic.exit_reason, Some(ExitReason::SignalDecay));
    }

    #[test]
    fn test_hold_inside_bands() {
        let pos = held(dec!(100));

        let decision = policy().decide(&obs(dec!(100.5), 0.5), Some(&pos), Some(0.7), None, None);
        assert_eq!(decision.action, Action::Hold);

        // Missing confidence never forces a decay exit
        let decision = policy().decide(&obs(dec!(100.5), 0.5), Some(&pos), None, None, None);
        assert_eq!(decision.action, Action::Hold);
    }
}
