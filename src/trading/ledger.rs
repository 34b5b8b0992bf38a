//! Portfolio ledger: the single owner of cash, open positions and trade history.
//!
//! Business no-ops (already holding, nothing affordable, nothing to sell) come
//! back as outcome variants, never as errors.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::models::{FeatureVector, Position, Trade, TrainingExample};

use super::{ExampleSender, ExitReason, LedgerConfig, PositionSizer};

/// What the decision path knew when it asked to buy.
#[derive(Debug, Clone)]
pub struct EntryContext {
    /// Normalized features scored at entry
    pub features: FeatureVector,

    /// Predictor confidence at entry
    pub confidence: Option<f64>,

    /// Fill time
    pub time: DateTime<Utc>,
}

impl EntryContext {
    pub fn new(features: FeatureVector, confidence: Option<f64>) -> Self {
        Self {
            features,
            confidence,
            time: Utc::now(),
        }
    }

    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }
}

/// Result of a buy request.
#[derive(Debug, Clone, PartialEq)]
pub enum BuyOutcome {
    Filled(Trade),
    AlreadyHolding,
    /// Sizing produced zero shares
    InsufficientFunds,
}

/// Result of a sell request.
#[derive(Debug, Clone, PartialEq)]
pub enum SellOutcome {
    Closed {
        trade: Trade,
        example: TrainingExample,
    },
    NoPosition,
}

/// Owned copy of one open position for presentation.
#[derive(Debug, Clone, Serialize)]
pub struct PositionView {
    pub symbol: String,
    pub amount: u32,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub high_price: Decimal,
    pub unrealized_pnl: Decimal,
    /// Unrealized return in percent
    pub pl_percent: Decimal,
    pub confidence: Option<f64>,
    pub opened_at: DateTime<Utc>,
}

impl From<&Position> for PositionView {
    fn from(p: &Position) -> Self {
        Self {
            symbol: p.symbol.clone(),
            amount: p.amount,
            entry_price: p.entry_price,
            current_price: p.current_price,
            high_price: p.high_price,
            unrealized_pnl: p.unrealized_pnl(),
            pl_percent: (p.return_at(p.current_price) * Decimal::ONE_HUNDRED).round_dp(2),
            confidence: p.confidence,
            opened_at: p.opened_at,
        }
    }
}

/// Read-only snapshot of ledger state.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerStatus {
    pub cash: Decimal,
    pub equity: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub positions: Vec<PositionView>,
    pub trades: Vec<Trade>,
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n{:=^60}", " LEDGER STATUS ")?;
        writeln!(f, "Cash:               ${:.2}", self.cash)?;
        writeln!(f, "Equity:             ${:.2}", self.equity)?;
        writeln!(f, "Unrealized P&L:     ${:.2}", self.unrealized_pnl)?;
        writeln!(f, "Realized P&L:       ${:.2}", self.realized_pnl)?;
        writeln!(f, "Trades:             {}", self.trades.len())?;
        writeln!(f, "\n{:-^60}", " POSITIONS ")?;
        if self.positions.is_empty() {
            writeln!(f, "(none)")?;
        }
        for p in &self.positions {
            writeln!(
                f,
                "{:<6} {:>5} @ {:>9.2}  now {:>9.2}  high {:>9.2}  {:>+7.2}%",
                p.symbol, p.amount, p.entry_price, p.current_price, p.high_price, p.pl_percent
            )?;
        }
        writeln!(f, "{:=^60}", "")
    }
}

/// Serializable ledger state for restart recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSnapshot {
    pub cash: Decimal,
    pub positions: Vec<Position>,
    pub trades: Vec<Trade>,
}

/// Simulated cash-and-positions account.
#[derive(Debug)]
pub struct Ledger {
    cash: Decimal,
    positions: BTreeMap<String, Position>,
    trades: Vec<Trade>,
    sizer: PositionSizer,
    examples: Option<ExampleSender>,
}

impl Ledger {
    pub fn new(config: &LedgerConfig) -> Self {
        Self {
            cash: config.initial_cash,
            positions: BTreeMap::new(),
            trades: Vec::new(),
            sizer: PositionSizer::new(config.allocation_fraction),
            examples: None,
        }
    }

    /// Rebuild a ledger from a persisted snapshot.
    pub fn restore(config: &LedgerConfig, snapshot: LedgerSnapshot) -> Self {
        let mut ledger = Self::new(config);
        ledger.cash = snapshot.cash;
        ledger.trades = snapshot.trades;
        for position in snapshot.positions {
            ledger.positions.insert(position.symbol.clone(), position);
        }
        ledger
    }

    /// Route closed-trade examples to the feedback loop.
    pub fn with_example_sender(mut self, sender: ExampleSender) -> Self {
        self.examples = Some(sender);
        self
    }

    /// Stop emitting examples. Dropping the returned sender lets the loop drain and exit.
    pub fn detach_example_sender(&mut self) -> Option<ExampleSender> {
        self.examples.take()
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Trades appended after the first `count`.
    pub fn trades_since(&self, count: usize) -> &[Trade] {
        self.trades.get(count..).unwrap_or(&[])
    }

    /// Cash plus open positions at their last known price.
    pub fn equity(&self) -> Decimal {
        self.cash + self.positions.values().map(Position::market_value).sum::<Decimal>()
    }

    /// Open a position sized from current equity. No-op when already holding.
    pub fn buy(&mut self, symbol: &str, price: Decimal, context: EntryContext) -> BuyOutcome {
        if self.positions.contains_key(symbol) {
            debug!(symbol = %symbol, "Already holding, skipping buy");
            return BuyOutcome::AlreadyHolding;
        }

        let amount = self.sizer.size(self.equity(), price, self.cash);
        if amount == 0 {
            info!(
                symbol = %symbol,
                price = %price,
                cash = %self.cash,
                "Skipping buy: insufficient funds"
            );
            return BuyOutcome::InsufficientFunds;
        }

        let trade = Trade::buy(symbol, price, amount, context.confidence, context.time);
        let cost = trade.notional();
        self.cash -= cost;

        let position = Position::open(
            symbol.to_string(),
            amount,
            price,
            context.features,
            context.confidence,
            context.time,
        );
        self.positions.insert(symbol.to_string(), position);
        self.trades.push(trade.clone());

        info!(
            symbol = %symbol,
            price = %price,
            amount,
            cost = %cost,
            cash = %self.cash,
            "BUY"
        );

        BuyOutcome::Filled(trade)
    }

    /// Close the whole position now.
    pub fn sell(&mut self, symbol: &str, price: Decimal, reason: ExitReason) -> SellOutcome {
        self.sell_at(symbol, price, reason, Utc::now())
    }

    /// Close the whole position with an explicit fill time.
    pub fn sell_at(
        &mut self,
        symbol: &str,
        price: Decimal,
        reason: ExitReason,
        time: DateTime<Utc>,
    ) -> SellOutcome {
        let Some(position) = self.positions.remove(symbol) else {
            debug!(symbol = %symbol, "No open position, skipping sell");
            return SellOutcome::NoPosition;
        };

        let profit = (price - position.entry_price) * position.shares();
        let trade = Trade::sell(
            symbol,
            price,
            position.amount,
            profit,
            reason.as_str(),
            position.confidence,
            time,
        );
        self.cash += trade.notional();
        self.trades.push(trade.clone());

        info!(
            symbol = %symbol,
            price = %price,
            amount = position.amount,
            profit = %profit,
            reason = %reason,
            cash = %self.cash,
            "SELL"
        );

        let example = TrainingExample::from_closed_trade(symbol, position.entry_features, profit);
        if let Some(sender) = &self.examples {
            if let Err(e) = sender.send(example.clone()) {
                warn!(symbol = %symbol, error = %e, "Failed to emit training example");
            }
        }

        SellOutcome::Closed { trade, example }
    }

    /// Mark an open position to `price`. Returns false when nothing is held.
    pub fn update_price(&mut self, symbol: &str, price: Decimal) -> bool {
        match self.positions.get_mut(symbol) {
            Some(position) => {
                position.mark_price(price);
                true
            }
            None => false,
        }
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.trades.iter().filter_map(|t| t.profit).sum()
    }

    pub fn status(&self) -> LedgerStatus {
        LedgerStatus {
            cash: self.cash,
            equity: self.equity(),
            unrealized_pnl: self.positions.values().map(Position::unrealized_pnl).sum(),
            realized_pnl: self.realized_pnl(),
            positions: self.positions.values().map(PositionView::from).collect(),
            trades: self.trades.clone(),
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            cash: self.cash,
            positions: self.positions.values().cloned().collect(),
            trades: self.trades.clone(),
        }
    }
}
