//! Trading core: sizing, risk, decision policy, ledger, cycle orchestration
//! and the training feedback loop.

mod config;
mod cycle;
mod features;
mod feedback;
mod ledger;
mod policy;
mod position_sizer;
mod risk;

pub use config::{
    FeedbackConfig, LedgerConfig, NormalizationConfig, PolicyConfig, RiskConfig, SignalRange,
};
pub use cycle::{CycleReport, SkippedObservation, TradingCycle};
pub use features::{FeatureNormalizer, FEATURE_COUNT};
pub use feedback::{example_channel, ExampleReceiver, ExampleSender, ExampleStore, FeedbackLoop};
pub use ledger::{
    BuyOutcome, EntryContext, Ledger, LedgerSnapshot, LedgerStatus, PositionView, SellOutcome,
};
pub use policy::{Action, Decision, DecisionPolicy, ExitReason};
pub use position_sizer::PositionSizer;
pub use risk::{RiskMonitor, TrailingStop};
